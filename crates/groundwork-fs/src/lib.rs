//! Filesystem side of provisioning for Groundwork.
//!
//! `ArchiveExtractor` unpacks content-sniffed tar archives into a staging
//! directory and swaps it into place; `LinkInstaller` replaces symlinks by
//! renaming a freshly created link over the old one. Both report a
//! `StepResult` and never leave a half-written target behind.

pub mod extract;
pub mod format;
pub mod link;

pub use extract::{ArchiveExtractor, ExtractMarker, Extraction, MARKER_FILE};
pub use format::{sniff_format, ArchiveFormat};
pub use link::{LinkInstall, LinkInstaller};

use groundwork_schema::FailureKind;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` inside it is durable.
///
/// POSIX only guarantees rename durability once the parent directory itself
/// has been synced.
pub fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("I/O error on '{}': {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("filesystem I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("archive entry '{entry}' rejected: {reason}")]
    UnsafeEntry { entry: String, reason: String },
    #[error("archive missing: '{}'", .0.display())]
    ArchiveMissing(PathBuf),
    #[error("target missing: '{}'", .0.display())]
    TargetMissing(PathBuf),
    #[error("refusing to replace directory '{}'", .0.display())]
    DirectoryInTheWay(PathBuf),
    #[error("archive '{}' lies inside its destination '{}'", .archive.display(), .dest.display())]
    ArchiveInsideDestination { archive: PathBuf, dest: PathBuf },
    #[error("'{}' has no parent directory", .0.display())]
    NoParent(PathBuf),
    #[error("marker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FsError {
    /// Classification carried into the step outcome.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Io(e) | Self::IoAt { source: e, .. } if e.kind() == ErrorKind::PermissionDenied => {
                FailureKind::Permission
            }
            Self::UnsupportedFormat(_) | Self::ArchiveInsideDestination { .. } => {
                FailureKind::Validation
            }
            Self::UnsafeEntry { .. } => FailureKind::Integrity,
            _ => FailureKind::Io,
        }
    }
}

/// Attach the offending path to an I/O error.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> FsError + '_ {
    move |source| FsError::IoAt {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_classified() {
        let e = FsError::IoAt {
            path: "/opt/tool".into(),
            source: std::io::Error::new(ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(e.failure_kind(), FailureKind::Permission);
        assert!(e.to_string().contains("/opt/tool"));
    }

    #[test]
    fn other_errors_are_classified() {
        assert_eq!(
            FsError::UnsupportedFormat("zip".to_owned()).failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            FsError::UnsafeEntry {
                entry: "../x".to_owned(),
                reason: "escapes".to_owned()
            }
            .failure_kind(),
            FailureKind::Integrity
        );
        assert_eq!(
            FsError::TargetMissing("/opt/x".into()).failure_kind(),
            FailureKind::Io
        );
        assert!(FsError::TargetMissing("/opt/x".into())
            .to_string()
            .starts_with("target missing"));
    }

    #[test]
    fn fsync_dir_on_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        fsync_dir(dir.path()).unwrap();
        assert!(fsync_dir(&dir.path().join("missing")).is_err());
    }
}
