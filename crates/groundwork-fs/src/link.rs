use crate::{fsync_dir, io_at, FsError};
use groundwork_schema::StepResult;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInstall {
    AlreadyLinked,
    Created,
    Replaced { previous: Option<PathBuf> },
}

/// Points symlinks at installed files.
///
/// A new link is created under a temporary name in the same directory and
/// renamed over `link_path`, so readers see either the old link or the new one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkInstaller;

impl LinkInstaller {
    pub fn new() -> Self {
        Self
    }

    pub fn install(&self, link_path: &Path, target_path: &Path) -> StepResult {
        match self.try_install(link_path, target_path) {
            Ok(LinkInstall::AlreadyLinked) => StepResult::skipped(format!(
                "{} already points at {}",
                link_path.display(),
                target_path.display()
            )),
            Ok(LinkInstall::Created) => StepResult::succeeded(format!(
                "linked {} -> {}",
                link_path.display(),
                target_path.display()
            )),
            Ok(LinkInstall::Replaced { previous }) => StepResult::succeeded(match previous {
                Some(old) => format!(
                    "relinked {} -> {} (was {})",
                    link_path.display(),
                    target_path.display(),
                    old.display()
                ),
                None => format!(
                    "replaced file {} with link to {}",
                    link_path.display(),
                    target_path.display()
                ),
            }),
            Err(e) => StepResult::failed(e.failure_kind(), e.to_string()),
        }
    }

    pub fn try_install(&self, link_path: &Path, target_path: &Path) -> Result<LinkInstall, FsError> {
        if !target_path.exists() {
            return Err(FsError::TargetMissing(target_path.to_path_buf()));
        }

        let outcome = match fs::symlink_metadata(link_path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let current = fs::read_link(link_path).map_err(io_at(link_path))?;
                if current == target_path {
                    debug!("{} already linked", link_path.display());
                    return Ok(LinkInstall::AlreadyLinked);
                }
                LinkInstall::Replaced {
                    previous: Some(current),
                }
            }
            Ok(meta) if meta.is_dir() => {
                return Err(FsError::DirectoryInTheWay(link_path.to_path_buf()));
            }
            Ok(_) => LinkInstall::Replaced { previous: None },
            Err(e) if e.kind() == ErrorKind::NotFound => LinkInstall::Created,
            Err(e) => return Err(io_at(link_path)(e)),
        };

        let parent = link_path
            .parent()
            .ok_or_else(|| FsError::NoParent(link_path.to_path_buf()))?;
        fs::create_dir_all(parent).map_err(io_at(parent))?;

        let staged = tempfile::Builder::new()
            .prefix(".groundwork-link-")
            .make_in(parent, |path| symlink(target_path, path))
            .map_err(io_at(parent))?;
        staged
            .persist(link_path)
            .map_err(|e| io_at(link_path)(e.error))?;
        fsync_dir(parent).map_err(io_at(parent))?;

        info!(
            "linked {} -> {}",
            link_path.display(),
            target_path.display()
        );
        Ok(outcome)
    }
}
