use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("step {step}: {field} must be an absolute path, got '{}'", .path.display())]
    RelativePath {
        step: usize,
        field: &'static str,
        path: PathBuf,
    },
    #[error("step {step}: {field} must not contain '.' or '..' components: '{}'", .path.display())]
    UnresolvedPath {
        step: usize,
        field: &'static str,
        path: PathBuf,
    },
    #[error("step {step}: invalid {field} '{url}': {reason}")]
    InvalidUrl {
        step: usize,
        field: &'static str,
        url: String,
        reason: String,
    },
    #[error("step {step}: package list must not be empty")]
    EmptyPackageList { step: usize },
    #[error("step {step}: package name must not be empty")]
    EmptyPackageName { step: usize },
    #[error("step {step}: package '{name}' is listed more than once")]
    DuplicatePackage { step: usize, name: String },
    #[error("step {step}: '{name}' is not pinned to an exact version: '{version}'")]
    UnpinnedVersion {
        step: usize,
        name: String,
        version: String,
    },
    #[error("step {step}: expected_checksum is required (settings.require_checksums = true)")]
    MissingChecksum { step: usize },
    #[error("step {step}: archive_path '{}' lies inside dest_dir '{}'", .archive.display(), .dest.display())]
    ArchiveInsideDestination {
        step: usize,
        archive: PathBuf,
        dest: PathBuf,
    },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// A parsed provisioning manifest. Immutable once loaded.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub manifest_version: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// Engine tuning. Every value has a default so the section can be omitted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub require_checksums: bool,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,
    #[serde(default = "default_fetch_backoff_max_ms")]
    pub fetch_backoff_max_ms: u64,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            require_checksums: false,
            fetch_attempts: default_fetch_attempts(),
            fetch_backoff_ms: default_fetch_backoff_ms(),
            fetch_backoff_max_ms: default_fetch_backoff_max_ms(),
            fetch_timeout_secs: None,
        }
    }
}

/// The package environment that `package_install` steps mutate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            client: default_client(),
            python: default_python(),
            state_dir: None,
        }
    }
}

fn default_parallelism() -> usize {
    4
}

fn default_fetch_attempts() -> u32 {
    4
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

fn default_fetch_backoff_max_ms() -> u64 {
    8_000
}

fn default_client() -> String {
    "pip".to_owned()
}

fn default_python() -> String {
    "python3".to_owned()
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Pin;

    #[test]
    fn parses_full_manifest() {
        let input = r#"
manifest_version = 1

[settings]
parallelism = 2
require_checksums = true
fetch_attempts = 3

[environment]
client = "pip"
python = "/usr/local/bin/python3.11"

[[step]]
kind = "package_install"
index_url = "https://pypi.org/simple"
packages = [
  { name = "pillow", version = "10.4.0" },
  { name = "numpy", version = "1.26.4" },
]

[[step]]
kind = "artifact_fetch"
source_url = "https://example.com/tool.tar.gz"
dest_path = "/tmp/tool.tar.gz"
expected_checksum = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"

[[step]]
kind = "archive_extract"
archive_path = "/tmp/tool.tar.gz"
dest_dir = "/opt/tool"
strip_components = 1

[[step]]
kind = "link_install"
link_path = "/usr/bin/tool"
target_path = "/opt/tool/bin/tool"
"#;
        let manifest = parse_manifest_str(input).expect("should parse");
        assert_eq!(manifest.manifest_version, 1);
        assert_eq!(manifest.settings.parallelism, 2);
        assert!(manifest.settings.require_checksums);
        assert_eq!(manifest.settings.fetch_attempts, 3);
        assert_eq!(manifest.settings.fetch_backoff_ms, 500);
        assert_eq!(manifest.environment.python, "/usr/local/bin/python3.11");
        assert_eq!(manifest.steps.len(), 4);
        match &manifest.steps[0] {
            Step::PackageInstall { index_url, packages } => {
                assert_eq!(index_url.as_deref(), Some("https://pypi.org/simple"));
                assert_eq!(packages[0], Pin::new("pillow", "10.4.0"));
                assert_eq!(packages[1], Pin::new("numpy", "1.26.4"));
            }
            other => panic!("unexpected first step: {other:?}"),
        }
        match &manifest.steps[2] {
            Step::ArchiveExtract {
                strip_components, ..
            } => assert_eq!(*strip_components, 1),
            other => panic!("unexpected third step: {other:?}"),
        }
    }

    #[test]
    fn parses_minimal_manifest() {
        let manifest = parse_manifest_str("manifest_version = 1\n").expect("should parse");
        assert!(manifest.steps.is_empty());
        assert_eq!(manifest.settings, Settings::default());
        assert_eq!(manifest.environment.client, "pip");
        assert_eq!(manifest.environment.python, "python3");
    }

    #[test]
    fn strip_components_defaults_to_zero() {
        let input = r#"
manifest_version = 1
[[step]]
kind = "archive_extract"
archive_path = "/tmp/a.tar"
dest_dir = "/opt/a"
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.steps[0],
            Step::ArchiveExtract {
                strip_components: 0,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let input = r"
manifest_version = 1
unknown_field = true
";
        assert!(parse_manifest_str(input).is_err());
    }

    #[test]
    fn rejects_unknown_step_kind() {
        let input = r#"
manifest_version = 1
[[step]]
kind = "compile"
"#;
        assert!(parse_manifest_str(input).is_err());
    }

    #[test]
    fn rejects_unknown_step_field() {
        let input = r#"
manifest_version = 1
[[step]]
kind = "link_install"
link_path = "/usr/bin/tool"
target_path = "/opt/tool/bin/tool"
force = true
"#;
        assert!(parse_manifest_str(input).is_err());
    }

    #[test]
    fn rejects_malformed_checksum_at_parse_time() {
        let input = r#"
manifest_version = 1
[[step]]
kind = "artifact_fetch"
source_url = "https://example.com/x"
dest_path = "/tmp/x"
expected_checksum = "md5:abc"
"#;
        let err = parse_manifest_str(input).unwrap_err();
        assert!(err.to_string().contains("md5"), "{err}");
    }

    #[test]
    fn rejects_missing_version() {
        assert!(parse_manifest_str("[settings]\nparallelism = 1\n").is_err());
    }

    #[test]
    fn reads_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groundwork.toml");
        std::fs::write(&path, "manifest_version = 1\n").unwrap();
        assert!(parse_manifest_file(&path).is_ok());
        assert!(matches!(
            parse_manifest_file(dir.path().join("missing.toml")),
            Err(ManifestError::Io(_))
        ));
    }
}
