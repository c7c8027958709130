//! End-to-end provisioning against a local artifact server and the mock
//! package client.

use flate2::write::GzEncoder;
use flate2::Compression;
use groundwork_core::{CoreError, Dispatcher, ProvisionRunner, RunReport};
use groundwork_fetch::testing::ArtifactServer;
use groundwork_schema::{
    parse_manifest_str, ChecksumAlgorithm, ContentHasher, FailureKind, StepResult, StepStatus,
};
use std::fs;
use std::path::{Path, PathBuf};

const TOOL_BODY: &[u8] = b"#!/bin/sh\necho tool\n";

struct Fixture {
    root: tempfile::TempDir,
    server: ArtifactServer,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            server: ArtifactServer::start(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    fn state_dir(&self) -> PathBuf {
        self.path("state")
    }

    fn mock_state(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.state_dir().join("mock-packages.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// The install/fetch/extract/link manifest, with `checksum` on the fetch step.
    fn manifest(&self, package: &str, checksum: &str) -> String {
        format!(
            r#"
manifest_version = 1

[settings]
parallelism = 4
fetch_attempts = 2
fetch_backoff_ms = 10

[environment]
client = "mock"
state_dir = "{state}"

[[step]]
kind = "package_install"
packages = [{{ name = "{package}", version = "10.4.0" }}]

[[step]]
kind = "artifact_fetch"
source_url = "{url}"
dest_path = "{archive}"
expected_checksum = "{checksum}"

[[step]]
kind = "archive_extract"
archive_path = "{archive}"
dest_dir = "{dest}"
strip_components = 1

[[step]]
kind = "link_install"
link_path = "{link}"
target_path = "{dest}/bin/tool"
"#,
            state = self.state_dir().display(),
            url = self.server.url("/tool.tar.gz"),
            archive = self.path("downloads/tool.tar.gz").display(),
            dest = self.path("opt/tool").display(),
            link = self.path("usr/bin/tool").display(),
        )
    }

    fn run(&self, manifest: &str) -> Result<RunReport, CoreError> {
        let manifest = parse_manifest_str(manifest).unwrap();
        let dispatcher = Dispatcher::from_manifest(&manifest, None)?;
        ProvisionRunner::new(dispatcher).run(&manifest)
    }
}

fn tar_gz(build: impl FnOnce(&mut tar::Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
    let mut b = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    build(&mut b);
    b.into_inner().unwrap().finish().unwrap()
}

fn tool_archive() -> Vec<u8> {
    tar_gz(|b| {
        let mut h = tar::Header::new_gnu();
        h.set_size(TOOL_BODY.len() as u64);
        h.set_mode(0o755);
        h.set_mtime(0);
        b.append_data(&mut h, "tool-2.0.0/bin/tool", TOOL_BODY).unwrap();
    })
}

fn escaping_archive() -> Vec<u8> {
    tar_gz(|b| {
        let data = b"owned";
        let mut h = tar::Header::new_gnu();
        h.set_size(data.len() as u64);
        h.set_mode(0o644);
        h.set_mtime(0);
        let path = "tool-2.0.0/../../escape";
        h.as_old_mut().name[..path.len()].copy_from_slice(path.as_bytes());
        h.set_cksum();
        b.append(&h, &data[..]).unwrap();
    })
}

fn sha256(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new(ChecksumAlgorithm::Sha256);
    hasher.update(data);
    format!("sha256:{}", hasher.finalize_hex())
}

fn statuses(report: &RunReport) -> Vec<StepStatus> {
    report.entries.iter().map(|e| e.result.status).collect()
}

fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            let meta = fs::symlink_metadata(&path).unwrap();
            if meta.is_dir() {
                stack.push(path.clone());
                out.push((path, None));
            } else if meta.file_type().is_symlink() {
                let target = fs::read_link(&path).unwrap();
                out.push((path, Some(target.into_os_string().into_encoded_bytes())));
            } else {
                let data = fs::read(&path).unwrap();
                out.push((path, Some(data)));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn provisions_then_reruns_as_all_skipped() {
    let fx = Fixture::new();
    let archive = tool_archive();
    fx.server.serve("/tool.tar.gz", archive.clone());
    let manifest = fx.manifest("pillow", &sha256(&archive));

    let first = fx.run(&manifest).unwrap();
    assert!(first.is_success(), "{first:#?}");
    assert_eq!(statuses(&first), vec![StepStatus::Succeeded; 4]);

    let link = fx.path("usr/bin/tool");
    assert_eq!(fs::read_link(&link).unwrap(), fx.path("opt/tool/bin/tool"));
    assert_eq!(fs::read(&link).unwrap(), TOOL_BODY);
    assert_eq!(fx.mock_state()["installed"]["pillow"]["version"], "10.4.0");

    let before = snapshot(fx.root.path());
    let second = fx.run(&manifest).unwrap();
    assert!(second.is_success());
    assert_eq!(statuses(&second), vec![StepStatus::Skipped; 4]);
    assert_eq!(snapshot(fx.root.path()), before);

    assert_eq!(fx.server.hits("/tool.tar.gz"), 1);
    assert_eq!(fx.mock_state()["invocations"], 1);
}

#[test]
fn checksum_mismatch_blocks_dependents_only() {
    let fx = Fixture::new();
    fx.server.serve("/tool.tar.gz", tool_archive());
    let wrong = format!("sha256:{}", "0".repeat(64));

    let report = fx.run(&fx.manifest("pillow", &wrong)).unwrap();
    assert!(!report.is_success());
    assert_eq!(report.entries[0].result.status, StepStatus::Succeeded);
    assert_eq!(report.entries[1].result.failure, Some(FailureKind::Integrity));
    assert_eq!(report.entries[2].result, StepResult::blocked());
    assert_eq!(report.entries[3].result, StepResult::blocked());

    assert!(!fx.path("downloads/tool.tar.gz").exists());
    assert!(!fx.path("opt/tool").exists());
    assert!(fs::symlink_metadata(fx.path("usr/bin/tool")).is_err());
    // Integrity failures are not retried.
    assert_eq!(fx.server.hits("/tool.tar.gz"), 1);
}

#[test]
fn escaping_archive_fails_without_writing_outside() {
    let fx = Fixture::new();
    let archive = escaping_archive();
    fx.server.serve("/tool.tar.gz", archive.clone());

    let report = fx.run(&fx.manifest("pillow", &sha256(&archive))).unwrap();
    assert_eq!(report.entries[1].result.status, StepStatus::Succeeded);
    assert_eq!(report.entries[2].result.failure, Some(FailureKind::Integrity));
    assert_eq!(report.entries[3].result, StepResult::blocked());
    assert!(!fx.path("escape").exists());
    assert!(!fx.path("opt/escape").exists());
    assert!(!fx.path("opt/tool").exists());
}

#[test]
fn unavailable_package_does_not_stop_independent_steps() {
    let fx = Fixture::new();
    let archive = tool_archive();
    fx.server.serve("/tool.tar.gz", archive.clone());

    let report = fx
        .run(&fx.manifest("nonexistent-pkg", &sha256(&archive)))
        .unwrap();
    assert_eq!(report.entries[0].result.failure, Some(FailureKind::ExternalTool));
    assert!(report.entries[0].result.detail.contains("nonexistent-pkg"));
    assert_eq!(
        statuses(&report)[1..],
        [StepStatus::Succeeded, StepStatus::Succeeded, StepStatus::Succeeded]
    );
    assert_eq!(report.counts().failed, 1);
}

#[test]
fn unresolved_input_fails_before_anything_runs() {
    let fx = Fixture::new();
    fx.server.serve("/tool.tar.gz", tool_archive());
    let manifest = format!(
        r#"
manifest_version = 1

[environment]
client = "mock"
state_dir = "{state}"

[[step]]
kind = "package_install"
packages = [{{ name = "pillow", version = "10.4.0" }}]

[[step]]
kind = "link_install"
link_path = "{link}"
target_path = "{missing}"
"#,
        state = fx.state_dir().display(),
        link = fx.path("usr/bin/tool").display(),
        missing = fx.path("opt/missing/bin/tool").display(),
    );

    let err = fx.run(&manifest).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedInput { step: 2, .. }), "{err}");
    assert!(err.is_validation());
    assert!(!fx.state_dir().exists());
    assert!(!fx.path("usr").exists());
}

#[test]
fn transient_server_errors_are_retried() {
    use groundwork_fetch::testing::Reply;

    let fx = Fixture::new();
    let archive = tool_archive();
    fx.server.serve_sequence(
        "/tool.tar.gz",
        vec![Reply::Status(503), Reply::Body(archive.clone())],
    );

    let report = fx.run(&fx.manifest("pillow", &sha256(&archive))).unwrap();
    assert!(report.is_success(), "{report:#?}");
    assert!(report.entries[1].result.detail.contains("after 2 attempts"));
    assert_eq!(fx.server.hits("/tool.tar.gz"), 2);
}
