use crate::checksum::Checksum;
use crate::types::{PackageName, PinnedVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One `(name, exact_version)` pair handed to the package client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pin {
    pub name: PackageName,
    pub version: PinnedVersion,
}

impl Pin {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: PackageName::new(name),
            version: PinnedVersion::new(version),
        }
    }

    /// Requirement string in the form package clients accept: `name==version`.
    pub fn requirement(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    PackageInstall,
    ArtifactFetch,
    ArchiveExtract,
    LinkInstall,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackageInstall => "package_install",
            Self::ArtifactFetch => "artifact_fetch",
            Self::ArchiveExtract => "archive_extract",
            Self::LinkInstall => "link_install",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single provisioning action, tagged by `kind` in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    PackageInstall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_url: Option<String>,
        packages: Vec<Pin>,
    },
    ArtifactFetch {
        source_url: String,
        dest_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_checksum: Option<Checksum>,
    },
    ArchiveExtract {
        archive_path: PathBuf,
        dest_dir: PathBuf,
        #[serde(default)]
        strip_components: u32,
    },
    LinkInstall {
        link_path: PathBuf,
        target_path: PathBuf,
    },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::PackageInstall { .. } => StepKind::PackageInstall,
            Self::ArtifactFetch { .. } => StepKind::ArtifactFetch,
            Self::ArchiveExtract { .. } => StepKind::ArchiveExtract,
            Self::LinkInstall { .. } => StepKind::LinkInstall,
        }
    }

    /// Path this step writes, if any. Extraction produces the whole `dest_dir` tree.
    pub fn produces(&self) -> Option<&Path> {
        match self {
            Self::PackageInstall { .. } => None,
            Self::ArtifactFetch { dest_path, .. } => Some(dest_path.as_path()),
            Self::ArchiveExtract { dest_dir, .. } => Some(dest_dir.as_path()),
            Self::LinkInstall { link_path, .. } => Some(link_path.as_path()),
        }
    }

    /// Path this step reads and requires to exist before it runs.
    pub fn consumes(&self) -> Option<&Path> {
        match self {
            Self::PackageInstall { .. } | Self::ArtifactFetch { .. } => None,
            Self::ArchiveExtract { archive_path, .. } => Some(archive_path.as_path()),
            Self::LinkInstall { target_path, .. } => Some(target_path.as_path()),
        }
    }

    /// Package installs mutate one shared environment and must not overlap.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::PackageInstall { .. })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageInstall { packages, .. } => {
                write!(f, "{}", self.kind())?;
                for pin in packages {
                    write!(f, " {pin}")?;
                }
                Ok(())
            }
            Self::ArtifactFetch {
                source_url,
                dest_path,
                ..
            } => write!(f, "{} {source_url} -> {}", self.kind(), dest_path.display()),
            Self::ArchiveExtract {
                archive_path,
                dest_dir,
                ..
            } => write!(
                f,
                "{} {} -> {}",
                self.kind(),
                archive_path.display(),
                dest_dir.display()
            ),
            Self::LinkInstall {
                link_path,
                target_path,
            } => write!(
                f,
                "{} {} -> {}",
                self.kind(),
                link_path.display(),
                target_path.display()
            ),
        }
    }
}
