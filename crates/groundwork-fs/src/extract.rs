use crate::format::{sniff_format, ArchiveFormat};
use crate::{fsync_dir, io_at, FsError};
use groundwork_schema::{digest_file, ChecksumAlgorithm, StepResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Name of the file recording which archive populated a directory.
pub const MARKER_FILE: &str = ".groundwork-extract.json";

/// Provenance of an extracted tree. Written last, inside the staging
/// directory, so it only ever exists next to a complete extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractMarker {
    pub archive_blake3: String,
    pub strip_components: u32,
    pub entries: usize,
    pub extracted_at: String,
}

impl ExtractMarker {
    fn describes(&self, digest: &str, strip_components: u32) -> bool {
        self.archive_blake3 == digest && self.strip_components == strip_components
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    AlreadyExtracted { digest: String },
    Extracted { digest: String, entries: usize },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, archive_path: &Path, dest_dir: &Path, strip_components: u32) -> StepResult {
        match self.try_extract(archive_path, dest_dir, strip_components) {
            Ok(Extraction::AlreadyExtracted { digest }) => StepResult::skipped(format!(
                "{} already holds archive blake3:{digest}",
                dest_dir.display()
            )),
            Ok(Extraction::Extracted { digest, entries }) => StepResult::succeeded(format!(
                "extracted {entries} entries from blake3:{digest} into {}",
                dest_dir.display()
            )),
            Err(e) => StepResult::failed(e.failure_kind(), e.to_string()),
        }
    }

    /// Unpack `archive_path` into a sibling staging directory, then move the
    /// staged tree to `dest_dir`. On error the staging directory is removed
    /// and `dest_dir` is left as it was.
    ///
    /// `dest_dir` is replaced, not merged: anything it held before that the
    /// archive does not contain is gone afterwards.
    pub fn try_extract(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        strip_components: u32,
    ) -> Result<Extraction, FsError> {
        if archive_path.starts_with(dest_dir) {
            return Err(FsError::ArchiveInsideDestination {
                archive: archive_path.to_path_buf(),
                dest: dest_dir.to_path_buf(),
            });
        }
        if !archive_path.is_file() {
            return Err(FsError::ArchiveMissing(archive_path.to_path_buf()));
        }
        let format = sniff_format(archive_path)?;
        let digest =
            digest_file(archive_path, ChecksumAlgorithm::Blake3).map_err(io_at(archive_path))?;

        if let Some(marker) = read_marker(dest_dir) {
            if marker.describes(&digest, strip_components) && has_content(dest_dir)? {
                debug!("{} already extracted from {digest}", dest_dir.display());
                return Ok(Extraction::AlreadyExtracted { digest });
            }
        }

        let parent = dest_dir
            .parent()
            .ok_or_else(|| FsError::NoParent(dest_dir.to_path_buf()))?;
        fs::create_dir_all(parent).map_err(io_at(parent))?;

        let staging = tempfile::Builder::new()
            .prefix(".groundwork-stage-")
            .tempdir_in(parent)
            .map_err(io_at(parent))?;
        let entries = unpack_into(format, archive_path, staging.path(), strip_components)?;

        let marker = ExtractMarker {
            archive_blake3: digest.clone(),
            strip_components,
            entries,
            extracted_at: chrono::Utc::now().to_rfc3339(),
        };
        write_marker(staging.path(), &marker)?;
        place_dir(staging.path(), dest_dir, parent)?;

        info!(
            "extracted {} ({}, {entries} entries) into {}",
            archive_path.display(),
            format.as_str(),
            dest_dir.display()
        );
        Ok(Extraction::Extracted { digest, entries })
    }
}

fn read_marker(dest_dir: &Path) -> Option<ExtractMarker> {
    let content = fs::read_to_string(dest_dir.join(MARKER_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_marker(dir: &Path, marker: &ExtractMarker) -> Result<(), FsError> {
    let path = dir.join(MARKER_FILE);
    let mut file = File::create(&path).map_err(io_at(&path))?;
    file.write_all(serde_json::to_string_pretty(marker)?.as_bytes())
        .map_err(io_at(&path))?;
    file.sync_all().map_err(io_at(&path))?;
    Ok(())
}

/// True when the directory holds anything besides the marker.
fn has_content(dir: &Path) -> Result<bool, FsError> {
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        if entry.file_name() != MARKER_FILE {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rename `staged` to `dest`. An existing `dest` is first moved into a
/// scratch directory that is dropped afterwards.
fn place_dir(staged: &Path, dest: &Path, parent: &Path) -> Result<(), FsError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            let scratch = tempfile::Builder::new()
                .prefix(".groundwork-old-")
                .tempdir_in(parent)
                .map_err(io_at(parent))?;
            let retired = scratch.path().join("previous");
            fs::rename(dest, &retired).map_err(io_at(dest))?;
            if let Err(e) = fs::rename(staged, dest) {
                let _ = fs::rename(&retired, dest);
                return Err(io_at(dest)(e));
            }
        }
        Ok(_) => {
            return Err(FsError::IoAt {
                path: dest.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "destination exists and is not a directory",
                ),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::rename(staged, dest).map_err(io_at(dest))?;
        }
        Err(e) => return Err(io_at(dest)(e)),
    }
    fsync_dir(parent).map_err(io_at(parent))?;
    Ok(())
}

fn unpack_into(
    format: ArchiveFormat,
    archive_path: &Path,
    root: &Path,
    strip_components: u32,
) -> Result<usize, FsError> {
    let file = File::open(archive_path).map_err(io_at(archive_path))?;
    let mut ar = tar::Archive::new(format.reader(file));
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.set_overwrite(true);

    let canonical_root = root.canonicalize().map_err(io_at(root))?;
    let strip = strip_components as usize;
    let mut count = 0;

    for entry in ar.entries().map_err(io_at(archive_path))? {
        let mut entry = entry.map_err(io_at(archive_path))?;
        let raw = entry.path().map_err(io_at(archive_path))?.into_owned();
        let Some(rel) = strip_entry_path(&raw, strip)? else {
            continue;
        };
        let kind = entry.header().entry_type();
        let out = root.join(&rel);

        let dirs = if kind.is_dir() {
            Some(rel.as_path())
        } else {
            rel.parent()
        };
        if let Some(dirs) = dirs {
            create_dirs(root, dirs, &raw)?;
        }
        ensure_inside(&canonical_root, &out, &raw)?;

        if kind.is_symlink() {
            let target = link_target(&entry, &raw)?;
            check_symlink_target(&canonical_root, &out, &target, &raw)?;
            entry.unpack(&out).map_err(io_at(&out))?;
        } else if kind.is_hard_link() {
            let target = link_target(&entry, &raw)?;
            let Some(target_rel) = strip_entry_path(&target, strip)? else {
                return Err(unsafe_entry(&raw, "hard link target is stripped away"));
            };
            let source = root.join(target_rel);
            ensure_inside(&canonical_root, &source, &raw)?;
            // Repeated entries replace what an earlier one wrote.
            if let Ok(meta) = fs::symlink_metadata(&out) {
                if !meta.is_dir() {
                    fs::remove_file(&out).map_err(io_at(&out))?;
                }
            }
            fs::hard_link(&source, &out).map_err(io_at(&out))?;
        } else if kind.is_file() || kind.is_dir() || kind == tar::EntryType::Continuous {
            entry.unpack(&out).map_err(io_at(&out))?;
        } else {
            debug!("skipping {:?} entry {}", kind, raw.display());
            continue;
        }
        count += 1;
    }
    Ok(count)
}

fn link_target<R: std::io::Read>(entry: &tar::Entry<'_, R>, raw: &Path) -> Result<PathBuf, FsError> {
    entry
        .link_name()
        .map_err(FsError::Io)?
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| unsafe_entry(raw, "link entry without a target"))
}

/// Drop the first `strip` components. Returns `None` when nothing is left.
fn strip_entry_path(raw: &Path, strip: usize) -> Result<Option<PathBuf>, FsError> {
    let mut parts = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry(raw, "path escapes the destination directory"));
            }
        }
    }
    if parts.len() <= strip {
        return Ok(None);
    }
    Ok(Some(parts[strip..].iter().collect()))
}

/// Create `rel` under `root` one component at a time. Nothing is created
/// through a symlink, including one an earlier entry of the same archive
/// put there.
fn create_dirs(root: &Path, rel: &Path, raw: &Path) -> Result<(), FsError> {
    let mut current = root.to_path_buf();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            return Err(unsafe_entry(raw, "path escapes the destination directory"));
        };
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(unsafe_entry(raw, "path passes through a symlink"));
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(FsError::IoAt {
                    path: current,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "an earlier entry left a non-directory here",
                    ),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir(&current).map_err(io_at(&current))?;
            }
            Err(e) => return Err(io_at(&current)(e)),
        }
    }
    Ok(())
}

/// A symlink written at `out` may only point somewhere under the extraction
/// root. The target is resolved from the real location of `out`'s parent;
/// `..` is only allowed before the first named component.
fn check_symlink_target(
    canonical_root: &Path,
    out: &Path,
    target: &Path,
    raw: &Path,
) -> Result<(), FsError> {
    let escapes = || unsafe_entry(raw, "symlink target escapes the destination directory");
    if target.has_root() {
        return Err(unsafe_entry(raw, "symlink target is absolute"));
    }
    let parent = out
        .parent()
        .ok_or_else(|| FsError::NoParent(out.to_path_buf()))?;
    let mut resolved = parent.canonicalize().map_err(io_at(parent))?;
    let mut descended = false;
    for component in target.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                descended = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if descended {
                    return Err(unsafe_entry(
                        raw,
                        "symlink target climbs back out of a subdirectory",
                    ));
                }
                if !resolved.pop() || !resolved.starts_with(canonical_root) {
                    return Err(escapes());
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry(raw, "symlink target is absolute"));
            }
        }
    }
    if resolved.starts_with(canonical_root) {
        Ok(())
    } else {
        Err(escapes())
    }
}

/// Resolve what is already on disk and make sure `path` stays under `root`.
fn ensure_inside(canonical_root: &Path, path: &Path, raw: &Path) -> Result<(), FsError> {
    let resolved = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent.canonicalize().map_err(io_at(parent))?.join(name),
            _ => path.to_path_buf(),
        },
    };
    if resolved.starts_with(canonical_root) {
        Ok(())
    } else {
        Err(unsafe_entry(raw, "path escapes the destination directory"))
    }
}

fn unsafe_entry(raw: &Path, reason: &str) -> FsError {
    FsError::UnsafeEntry {
        entry: raw.display().to_string(),
        reason: reason.to_owned(),
    }
}
