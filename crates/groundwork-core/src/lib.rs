//! Planning and execution of provisioning runs.
//!
//! `ProvisionPlanner` validates a manifest and derives each step's
//! producer/consumer dependencies without touching the filesystem.
//! `ProvisionRunner` executes the plan on a bounded set of worker threads,
//! blocks the dependents of failed steps, honors cancellation, and records
//! results in planned order as a `RunReport`.

pub mod concurrency;
pub mod dispatch;
pub mod planner;
pub mod report;
pub mod runner;

pub use concurrency::{default_lock_path, install_signal_handler, CancelToken, RunLock};
pub use dispatch::Dispatcher;
pub use planner::{Access, Plan, PlannedStep, ProvisionPlanner};
pub use report::{ReportEntry, RunReport, RunStatus, StatusCounts};
pub use runner::{ProgressEvent, ProvisionRunner, RunObserver, StepExecutor};

use groundwork_schema::StepKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] groundwork_schema::ManifestError),
    #[error("step {step} ({kind}) consumes '{}', which no earlier step produces and which does not exist", .path.display())]
    UnresolvedInput {
        step: usize,
        kind: StepKind,
        path: PathBuf,
    },
    #[error("package client error: {0}")]
    Packages(#[from] groundwork_packages::PackageError),
    #[error("credentials error: {0}")]
    Credentials(#[from] groundwork_fetch::FetchError),
    #[error("run lock '{}' is held by another groundwork process", .0.display())]
    LockHeld(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Errors raised before any step runs because the manifest or its
    /// environment cannot be provisioned as written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_) | Self::UnresolvedInput { .. } | Self::Packages(_) | Self::Credentials(_)
        )
    }
}
