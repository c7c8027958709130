use crate::concurrency::CancelToken;
use crate::planner::{Plan, PlannedStep, ProvisionPlanner};
use crate::report::{ReportEntry, RunReport};
use crate::CoreError;
use chrono::{DateTime, Utc};
use groundwork_schema::{FailureKind, Manifest, Step, StepResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the scheduler wakes to check for cancellation while steps run.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Executes a single step. Failures are returned, not raised; a panic is
/// still caught and recorded as a failed step.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, step: &Step) -> StepResult;
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    Started {
        index: usize,
        step: &'a Step,
    },
    Finished {
        index: usize,
        step: &'a Step,
        result: &'a StepResult,
        duration: Duration,
    },
}

/// Receives step progress from the scheduler thread. Blocked and cancelled
/// steps produce a `Finished` event without a matching `Started`.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done { ok: bool },
}

struct Outcome {
    started_at: DateTime<Utc>,
    result: StepResult,
    duration: Duration,
}

pub struct ProvisionRunner<E> {
    executor: E,
    planner: ProvisionPlanner,
    parallelism: Option<usize>,
    cancel: CancelToken,
    observer: Option<Box<dyn RunObserver>>,
}

impl<E: StepExecutor> ProvisionRunner<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            planner: ProvisionPlanner::new(),
            parallelism: None,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    /// Override the manifest's `settings.parallelism`.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }

    #[must_use]
    pub fn with_planner(mut self, planner: ProvisionPlanner) -> Self {
        self.planner = planner;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Validate and plan `manifest`, then execute it. Planning errors are
    /// returned before any step runs.
    pub fn run(&self, manifest: &Manifest) -> Result<RunReport, CoreError> {
        let plan = self.planner.plan(manifest)?;
        let parallelism = self
            .parallelism
            .unwrap_or(manifest.settings.parallelism)
            .max(1);
        Ok(self.execute(&plan, parallelism))
    }

    /// Execute an already validated plan with at most `parallelism` steps in
    /// flight and at most one exclusive step at a time.
    pub fn execute(&self, plan: &Plan, parallelism: usize) -> RunReport {
        let run_started = Utc::now();
        let steps = &plan.steps;
        let mut slots = vec![Slot::Pending; steps.len()];
        let mut outcomes: Vec<Option<Outcome>> = steps.iter().map(|_| None).collect();
        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();

        info!(
            "executing {} steps with parallelism {parallelism}",
            steps.len()
        );

        std::thread::scope(|scope| {
            let mut running = 0usize;
            let mut exclusive_running = false;

            loop {
                self.block_dependents(steps, &mut slots, &mut outcomes);

                if !self.cancel.is_cancelled() {
                    for planned in steps {
                        if running >= parallelism {
                            break;
                        }
                        let i = planned.index;
                        if slots[i] != Slot::Pending || !deps_satisfied(planned, &slots) {
                            continue;
                        }
                        if planned.is_exclusive() && exclusive_running {
                            continue;
                        }

                        slots[i] = Slot::Running;
                        running += 1;
                        exclusive_running |= planned.is_exclusive();
                        self.notify(&ProgressEvent::Started {
                            index: i,
                            step: &planned.step,
                        });
                        debug!("dispatching step {i}: {}", planned.step);

                        let tx = tx.clone();
                        let executor = &self.executor;
                        scope.spawn(move || {
                            let started_at = Utc::now();
                            let clock = Instant::now();
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                executor.execute(&planned.step)
                            }))
                            .unwrap_or_else(|payload| {
                                let msg = panic_message(payload.as_ref());
                                warn!("step {i} panicked: {msg}");
                                StepResult::failed(
                                    FailureKind::Io,
                                    format!("step panicked: {msg}"),
                                )
                            });
                            let outcome = Outcome {
                                started_at,
                                result,
                                duration: clock.elapsed(),
                            };
                            let _ = tx.send((i, outcome));
                        });
                    }
                }

                if running == 0 {
                    break;
                }

                match rx.recv_timeout(CANCEL_POLL) {
                    Ok((i, outcome)) => {
                        running -= 1;
                        if steps[i].is_exclusive() {
                            exclusive_running = false;
                        }
                        slots[i] = Slot::Done {
                            ok: outcome.result.is_ok(),
                        };
                        self.notify(&ProgressEvent::Finished {
                            index: i,
                            step: &steps[i].step,
                            result: &outcome.result,
                            duration: outcome.duration,
                        });
                        if !outcome.result.is_ok() {
                            warn!("step {i} failed: {}", outcome.result.detail);
                        }
                        outcomes[i] = Some(outcome);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let cancelled = self.cancel.is_cancelled();
        let entries = steps
            .iter()
            .zip(outcomes)
            .map(|(planned, outcome)| match outcome {
                Some(o) => ReportEntry {
                    index: planned.index,
                    step: planned.step.clone(),
                    result: o.result,
                    started_at: Some(o.started_at),
                    duration_ms: o.duration.as_millis() as u64,
                },
                None => {
                    let result = StepResult::cancelled();
                    self.notify(&ProgressEvent::Finished {
                        index: planned.index,
                        step: &planned.step,
                        result: &result,
                        duration: Duration::ZERO,
                    });
                    ReportEntry::not_dispatched(planned.index, planned.step.clone(), result)
                }
            })
            .collect();

        let report = RunReport::new(entries, run_started, Utc::now(), cancelled);
        info!("run {}: {}", report.status, report.counts());
        report
    }

    /// Mark pending steps whose producers failed. Dependencies always point
    /// to earlier indices, so one forward pass reaches the whole cascade.
    fn block_dependents(
        &self,
        steps: &[PlannedStep],
        slots: &mut [Slot],
        outcomes: &mut [Option<Outcome>],
    ) {
        for planned in steps {
            let i = planned.index;
            if slots[i] != Slot::Pending {
                continue;
            }
            let blocked = planned
                .depends_on
                .iter()
                .any(|&d| slots[d] == Slot::Done { ok: false });
            if blocked {
                let result = StepResult::blocked();
                debug!("step {i} blocked by a failed dependency");
                self.notify(&ProgressEvent::Finished {
                    index: i,
                    step: &planned.step,
                    result: &result,
                    duration: Duration::ZERO,
                });
                slots[i] = Slot::Done { ok: false };
                outcomes[i] = Some(Outcome {
                    started_at: Utc::now(),
                    result,
                    duration: Duration::ZERO,
                });
            }
        }
    }

    fn notify(&self, event: &ProgressEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }
}

fn deps_satisfied(planned: &PlannedStep, slots: &[Slot]) -> bool {
    planned
        .depends_on
        .iter()
        .all(|&d| slots[d] == Slot::Done { ok: true })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
