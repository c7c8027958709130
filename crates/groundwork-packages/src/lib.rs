//! Package installation for Groundwork.
//!
//! The engine never resolves dependencies itself. A [`PackageClient`] wraps an
//! external package-index client (pip by default) that receives exact pins
//! verbatim; [`PackageInstaller`] adds the pre-install "already satisfied"
//! check and turns client failures into step outcomes with the tool's own
//! diagnostics attached.

pub mod client;
pub mod installer;
pub mod mock;
pub mod pip;

pub use client::{select_client, PackageClient};
pub use installer::{InstallOutcome, PackageInstaller};
pub use mock::MockClient;
pub use pip::PipClient;

use groundwork_schema::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}\n{output}")]
    ToolFailed {
        tool: String,
        status: String,
        output: String,
    },
    #[error("unknown package client '{0}', expected pip or mock")]
    UnknownClient(String),
    #[error("package client state error: {0}")]
    State(String),
}

impl PackageError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Spawn { .. } | Self::ToolFailed { .. } => FailureKind::ExternalTool,
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                FailureKind::Permission
            }
            Self::UnknownClient(_) => FailureKind::Validation,
            Self::Io(_) | Self::State(_) => FailureKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_keeps_output() {
        let e = PackageError::ToolFailed {
            tool: "pip".to_owned(),
            status: "exit status: 1".to_owned(),
            output: "ERROR: No matching distribution found for pillow==99.0".to_owned(),
        };
        assert_eq!(e.failure_kind(), FailureKind::ExternalTool);
        assert!(e
            .to_string()
            .contains("No matching distribution found for pillow==99.0"));
    }

    #[test]
    fn unknown_client_is_validation() {
        assert_eq!(
            PackageError::UnknownClient("conda".to_owned()).failure_kind(),
            FailureKind::Validation
        );
    }
}
