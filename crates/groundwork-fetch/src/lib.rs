//! Artifact downloads for Groundwork.
//!
//! [`ArtifactFetcher`] streams an HTTP(S) response into a temporary file next
//! to the destination, hashing as it goes, and renames it into place only
//! after the expected checksum matches. Connection failures and 5xx responses
//! are retried with exponential backoff; 4xx responses are not. Credentials
//! for private hosts come from a [`CredentialSource`].

pub mod config;
pub mod credentials;
pub mod fetcher;
pub mod retry;
#[cfg(any(test, feature = "test-server"))]
pub mod testing;

pub use config::FetchConfig;
pub use credentials::{default_credentials_path, CredentialSource, HostTokens, NoCredentials};
pub use fetcher::{ArtifactFetcher, FetchOutcome};
pub use retry::{Backoff, RetryPolicy};

use groundwork_schema::FailureKind;
use std::path::PathBuf;
use thiserror::Error;

/// Sent as `User-Agent` on every request.
pub const USER_AGENT: &str = concat!("groundwork/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("destination '{}' has no parent directory", .0.display())]
    NoParent(PathBuf),
    #[error("credentials config error: {0}")]
    Config(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } | Self::RetriesExhausted { .. } => FailureKind::TransientFetch,
            Self::Status { status, .. } if *status >= 500 => FailureKind::TransientFetch,
            Self::Status { .. } | Self::Request { .. } => FailureKind::Http,
            Self::Integrity { .. } => FailureKind::Integrity,
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                FailureKind::Permission
            }
            Self::Io(_) | Self::NoParent(_) => FailureKind::Io,
            Self::Config(_) => FailureKind::Validation,
        }
    }

    pub(crate) fn from_ureq(url: &str, err: ureq::Error) -> Self {
        let message = err.to_string();
        match err {
            ureq::Error::StatusCode(status) => Self::Status {
                url: url.to_owned(),
                status,
            },
            ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::HostNotFound
            | ureq::Error::ConnectionFailed => Self::Transport {
                url: url.to_owned(),
                message,
            },
            _ => Self::Request {
                url: url.to_owned(),
                message,
            },
        }
    }
}
