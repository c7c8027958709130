//! Structural validation, run before planning. Nothing here touches the filesystem.

use crate::manifest::{Manifest, ManifestError};
use crate::step::{Pin, Step};
use std::collections::HashSet;
use std::path::{Component, Path};

impl Manifest {
    /// Check every invariant that can be decided from the manifest text alone.
    ///
    /// Step numbers in errors are 1-based, matching the order in the file.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }
        if self.settings.parallelism == 0 {
            return Err(ManifestError::InvalidSetting(
                "settings.parallelism must be at least 1".to_owned(),
            ));
        }
        if self.settings.fetch_attempts == 0 {
            return Err(ManifestError::InvalidSetting(
                "settings.fetch_attempts must be at least 1".to_owned(),
            ));
        }
        if self.settings.fetch_backoff_max_ms < self.settings.fetch_backoff_ms {
            return Err(ManifestError::InvalidSetting(
                "settings.fetch_backoff_max_ms must not be below fetch_backoff_ms".to_owned(),
            ));
        }
        if let Some(dir) = &self.environment.state_dir {
            if !dir.is_absolute() {
                return Err(ManifestError::InvalidSetting(format!(
                    "environment.state_dir must be an absolute path, got '{}'",
                    dir.display()
                )));
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            match step {
                Step::PackageInstall {
                    index_url,
                    packages,
                } => {
                    if let Some(url) = index_url {
                        check_url(n, "index_url", url)?;
                    }
                    check_pins(n, packages)?;
                }
                Step::ArtifactFetch {
                    source_url,
                    dest_path,
                    expected_checksum,
                } => {
                    check_url(n, "source_url", source_url)?;
                    check_path(n, "dest_path", dest_path)?;
                    if self.settings.require_checksums && expected_checksum.is_none() {
                        return Err(ManifestError::MissingChecksum { step: n });
                    }
                }
                Step::ArchiveExtract {
                    archive_path,
                    dest_dir,
                    ..
                } => {
                    check_path(n, "archive_path", archive_path)?;
                    check_path(n, "dest_dir", dest_dir)?;
                    // Extraction replaces dest_dir wholesale.
                    if archive_path.starts_with(dest_dir) {
                        return Err(ManifestError::ArchiveInsideDestination {
                            step: n,
                            archive: archive_path.clone(),
                            dest: dest_dir.clone(),
                        });
                    }
                }
                Step::LinkInstall {
                    link_path,
                    target_path,
                } => {
                    check_path(n, "link_path", link_path)?;
                    check_path(n, "target_path", target_path)?;
                }
            }
        }
        Ok(())
    }
}

fn check_path(step: usize, field: &'static str, path: &Path) -> Result<(), ManifestError> {
    if !path.is_absolute() {
        return Err(ManifestError::RelativePath {
            step,
            field,
            path: path.to_path_buf(),
        });
    }
    // `Path::components` already drops interior `.`; look at the raw text too.
    let raw_has_dot = path
        .to_string_lossy()
        .split('/')
        .any(|seg| seg == "." || seg == "..");
    if raw_has_dot
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(ManifestError::UnresolvedPath {
            step,
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn check_url(step: usize, field: &'static str, raw: &str) -> Result<(), ManifestError> {
    let invalid = |reason: String| ManifestError::InvalidUrl {
        step,
        field,
        url: raw.to_owned(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected http or https",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(())
}

fn check_pins(step: usize, packages: &[Pin]) -> Result<(), ManifestError> {
    if packages.is_empty() {
        return Err(ManifestError::EmptyPackageList { step });
    }
    let mut seen = HashSet::with_capacity(packages.len());
    for pin in packages {
        if pin.name.trim().is_empty() {
            return Err(ManifestError::EmptyPackageName { step });
        }
        if !seen.insert(pin.name.normalized()) {
            return Err(ManifestError::DuplicatePackage {
                step,
                name: pin.name.to_string(),
            });
        }
        if !pin.version.is_exact() {
            return Err(ManifestError::UnpinnedVersion {
                step,
                name: pin.name.to_string(),
                version: pin.version.to_string(),
            });
        }
    }
    Ok(())
}
