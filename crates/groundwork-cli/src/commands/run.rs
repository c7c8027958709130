use super::{
    colorize_result, describe_core_error, spin_finish, spinner, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use groundwork_core::{
    default_lock_path, install_signal_handler, CancelToken, Dispatcher, ProgressEvent,
    ProvisionRunner, RunLock, RunObserver, RunReport,
};
use groundwork_fetch::{CredentialSource, HostTokens};
use groundwork_schema::{parse_manifest_file, StepStatus};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct RunArgs {
    pub manifest: PathBuf,
    pub jobs: Option<usize>,
    pub python: Option<String>,
    pub credentials: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
}

pub fn run(args: &RunArgs, json: bool) -> Result<u8, String> {
    let mut manifest =
        parse_manifest_file(&args.manifest).map_err(|e| format!("invalid manifest: {e}"))?;
    if let Some(python) = &args.python {
        manifest.environment.python.clone_from(python);
    }

    let credentials = load_credentials(args.credentials.as_deref())?;
    let dispatcher =
        Dispatcher::from_manifest(&manifest, credentials).map_err(|e| describe_core_error(&e))?;

    let lock_path = args.lock_file.clone().unwrap_or_else(default_lock_path);
    let _lock = RunLock::try_acquire(&lock_path).map_err(|e| describe_core_error(&e))?;
    debug!("holding run lock {}", lock_path.display());

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let total = manifest.steps.len();
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("provisioning {total} steps...")))
    };

    let mut runner = ProvisionRunner::new(dispatcher).with_cancel_token(cancel);
    if let Some(jobs) = args.jobs {
        runner = runner.with_parallelism(jobs);
    }
    if let Some(pb) = &pb {
        runner = runner.with_observer(StepLines {
            pb: pb.clone(),
            total,
            finished: AtomicUsize::new(0),
        });
    }

    let report = match runner.run(&manifest) {
        Ok(report) => report,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_finish(pb, false, "planning failed");
            }
            return Err(describe_core_error(&e));
        }
    };

    if let Some(pb) = &pb {
        spin_finish(pb, report.is_success(), &format!("run {}", report.status));
    }

    if json {
        let out = report
            .to_json()
            .map_err(|e| format!("JSON serialization failed: {e}"))?;
        println!("{out}");
    } else {
        print_summary(&report);
    }

    Ok(exit_code(&report))
}

fn load_credentials(path: Option<&Path>) -> Result<Option<Arc<dyn CredentialSource>>, String> {
    let tokens = match path {
        Some(path) => HostTokens::load(path).map(Some),
        None => HostTokens::load_default(),
    }
    .map_err(|e| format!("invalid configuration: credentials: {e}"))?;
    Ok(tokens.map(|t| Arc::new(t) as Arc<dyn CredentialSource>))
}

fn exit_code(report: &RunReport) -> u8 {
    if report.cancelled {
        EXIT_CANCELLED
    } else if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn print_summary(report: &RunReport) {
    for entry in &report.entries {
        if entry.result.status == StepStatus::Failed {
            println!(
                "  step {} ({}): {}",
                entry.index + 1,
                entry.step.kind(),
                entry.result.detail
            );
        }
    }
    println!(
        "{}: {} in {} ms",
        report.status,
        report.counts(),
        report.duration_ms()
    );
}

/// Prints one line per finished step above the spinner.
struct StepLines {
    pb: ProgressBar,
    total: usize,
    finished: AtomicUsize,
}

impl RunObserver for StepLines {
    fn on_event(&self, event: &ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { step, .. } => {
                self.pb.set_message(step.kind().to_string());
            }
            ProgressEvent::Finished {
                index,
                step,
                result,
                duration,
            } => {
                let n = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
                let line = format!(
                    "[{n}/{}] {} {}: {step} ({} ms)",
                    self.total,
                    colorize_result(result),
                    index + 1,
                    duration.as_millis()
                );
                self.pb.suspend(|| println!("{line}"));
            }
        }
    }
}
