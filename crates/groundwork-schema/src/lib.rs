//! Manifest model, validation, checksums, and step outcomes for Groundwork.
//!
//! This crate defines the schema layer: TOML manifest parsing (`Manifest`),
//! the tagged `Step` variants a manifest is made of, structural validation
//! that runs before anything touches the filesystem, content checksums used
//! for integrity checks, and the `StepResult` value every executor returns.

pub mod checksum;
pub mod manifest;
pub mod outcome;
pub mod step;
pub mod types;
pub mod validate;

pub use checksum::{digest_file, Checksum, ChecksumAlgorithm, ChecksumError, ContentHasher};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, EnvironmentSection, Manifest, ManifestError,
    Settings,
};
pub use outcome::{FailureKind, StepResult, StepStatus, BLOCKED_DETAIL, CANCELLED_DETAIL};
pub use step::{Pin, Step, StepKind};
pub use types::{PackageName, PinnedVersion};
