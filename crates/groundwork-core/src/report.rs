use chrono::{DateTime, Utc};
use groundwork_schema::{FailureKind, Step, StepResult, StepStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub index: usize,
    pub step: Step,
    pub result: StepResult,
    /// Unset for steps that were never dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl ReportEntry {
    pub fn not_dispatched(index: usize, step: Step, result: StepResult) -> Self {
        Self {
            index,
            step,
            result,
            started_at: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

/// Outcome of one run. Entries are in planned order regardless of the order
/// in which steps actually finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new(
        entries: Vec<ReportEntry>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        cancelled: bool,
    ) -> Self {
        let status = if entries.iter().all(|e| e.result.is_ok()) {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        Self {
            status,
            cancelled,
            started_at,
            finished_at,
            entries,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in &self.entries {
            match (entry.result.status, entry.result.failure) {
                (StepStatus::Succeeded, _) => counts.succeeded += 1,
                (StepStatus::Skipped, _) => counts.skipped += 1,
                (StepStatus::Failed, Some(FailureKind::DependencyBlocked)) => counts.blocked += 1,
                (StepStatus::Failed, Some(FailureKind::Cancelled)) => counts.cancelled += 1,
                (StepStatus::Failed, _) => counts.failed += 1,
            }
        }
        counts
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded, self.skipped, self.failed
        )?;
        if self.blocked > 0 {
            write!(f, ", {} blocked", self.blocked)?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}
