use serde::{Deserialize, Serialize};
use std::fmt;

/// Detail recorded for steps that were never attempted because a producer failed.
pub const BLOCKED_DETAIL: &str = "blocked: upstream step failed";

/// Detail recorded for steps that were never dispatched because the run was cancelled.
pub const CANCELLED_DETAIL: &str = "cancelled: run interrupted before dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Target state already matched; nothing was written.
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// Why a step failed. Drives retry decisions and lets callers tell a bad
/// checksum from a denied write without parsing `detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    TransientFetch,
    /// Non-retryable HTTP failure: a 4xx response or a request that could not be built.
    Http,
    Integrity,
    Permission,
    ExternalTool,
    Io,
    DependencyBlocked,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::TransientFetch => "transient fetch",
            Self::Http => "http",
            Self::Integrity => "integrity",
            Self::Permission => "permission",
            Self::ExternalTool => "external tool",
            Self::Io => "io",
            Self::DependencyBlocked => "dependency blocked",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Outcome of executing one step. `failure` is set exactly when `status` is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl StepResult {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            detail: detail.into(),
            failure: None,
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            detail: detail.into(),
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            detail: detail.into(),
            failure: Some(kind),
        }
    }

    pub fn blocked() -> Self {
        Self::failed(FailureKind::DependencyBlocked, BLOCKED_DETAIL)
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, CANCELLED_DETAIL)
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_failure_only_when_failed() {
        assert_eq!(StepResult::succeeded("x").failure, None);
        assert_eq!(StepResult::skipped("x").failure, None);
        let f = StepResult::failed(FailureKind::Integrity, "bad");
        assert_eq!(f.status, StepStatus::Failed);
        assert_eq!(f.failure, Some(FailureKind::Integrity));
    }

    #[test]
    fn blocked_and_cancelled_details() {
        assert_eq!(StepResult::blocked().detail, "blocked: upstream step failed");
        assert!(StepResult::cancelled().detail.starts_with("cancelled"));
        assert!(!StepResult::blocked().is_ok());
    }

    #[test]
    fn serializes_snake_case_and_omits_empty_failure() {
        let json = serde_json::to_value(StepResult::skipped("already present")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(json.get("failure").is_none());

        let json =
            serde_json::to_value(StepResult::failed(FailureKind::ExternalTool, "boom")).unwrap();
        assert_eq!(json["failure"], "external_tool");
    }
}
