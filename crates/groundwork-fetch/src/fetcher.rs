use crate::config::FetchConfig;
use crate::credentials::{CredentialSource, NoCredentials};
use crate::{FetchError, USER_AGENT};
use groundwork_fs::fsync_dir;
use groundwork_schema::{Checksum, ChecksumAlgorithm, ContentHasher, StepResult};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// `dest_path` already existed and matched (or no checksum was given).
    AlreadyPresent,
    Downloaded {
        bytes: u64,
        checksum: String,
        attempts: u32,
    },
}

/// A downloaded body sitting in a temp file beside its destination.
struct Staged {
    file: NamedTempFile,
    bytes: u64,
    digest: String,
}

pub struct ArtifactFetcher {
    agent: ureq::Agent,
    config: FetchConfig,
    credentials: Arc<dyn CredentialSource>,
}

impl ArtifactFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(config.timeout)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            config,
            credentials: Arc::new(NoCredentials),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn fetch(
        &self,
        source_url: &str,
        dest_path: &Path,
        expected_checksum: Option<&Checksum>,
    ) -> StepResult {
        match self.try_fetch(source_url, dest_path, expected_checksum) {
            Ok(FetchOutcome::AlreadyPresent) => StepResult::skipped(match expected_checksum {
                Some(c) => format!("{} already present ({c})", dest_path.display()),
                None => format!("{} already present", dest_path.display()),
            }),
            Ok(FetchOutcome::Downloaded {
                bytes,
                checksum,
                attempts,
            }) => {
                let tries = if attempts > 1 {
                    format!(" after {attempts} attempts")
                } else {
                    String::new()
                };
                StepResult::succeeded(format!(
                    "downloaded {bytes} bytes to {} ({checksum}){tries}",
                    dest_path.display()
                ))
            }
            Err(e) => StepResult::failed(e.failure_kind(), e.to_string()),
        }
    }

    pub fn try_fetch(
        &self,
        source_url: &str,
        dest_path: &Path,
        expected_checksum: Option<&Checksum>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = Url::parse(source_url).map_err(|e| FetchError::Request {
            url: source_url.to_owned(),
            message: e.to_string(),
        })?;

        let stale = if dest_path.is_file() {
            match expected_checksum {
                None => return Ok(FetchOutcome::AlreadyPresent),
                Some(c) if c.matches_file(dest_path)? => return Ok(FetchOutcome::AlreadyPresent),
                Some(c) => {
                    info!(
                        "{} does not match {c}, downloading again",
                        dest_path.display()
                    );
                    true
                }
            }
        } else {
            false
        };

        let dir = dest_path
            .parent()
            .ok_or_else(|| FetchError::NoParent(dest_path.to_path_buf()))?;
        fs::create_dir_all(dir)?;

        let algorithm = expected_checksum.map_or(ChecksumAlgorithm::Sha256, Checksum::algorithm);
        let (staged, attempts) = self.config.retry.run(source_url, |attempt| {
            debug!("GET {source_url} (attempt {attempt})");
            self.download(&url, dir, algorithm)
        })?;

        if let Some(expected) = expected_checksum {
            if !expected.matches_hex(&staged.digest) {
                // The temp file is removed when `staged` drops.
                if stale {
                    if let Err(e) = fs::remove_file(dest_path) {
                        warn!("failed to remove stale {}: {e}", dest_path.display());
                    }
                }
                return Err(FetchError::Integrity {
                    url: source_url.to_owned(),
                    expected: expected.to_string(),
                    actual: format!("{algorithm}:{}", staged.digest),
                });
            }
        }

        staged
            .file
            .persist(dest_path)
            .map_err(|e| FetchError::Io(e.error))?;
        fsync_dir(dir)?;

        info!(
            "fetched {source_url} -> {} ({} bytes)",
            dest_path.display(),
            staged.bytes
        );
        Ok(FetchOutcome::Downloaded {
            bytes: staged.bytes,
            checksum: format!("{algorithm}:{}", staged.digest),
            attempts,
        })
    }

    /// One attempt: stream the body into a temp file in `dir`, hashing on the way.
    fn download(&self, url: &Url, dir: &Path, algorithm: ChecksumAlgorithm) -> Result<Staged, FetchError> {
        let mut request = self.agent.get(url.as_str()).header("User-Agent", USER_AGENT);
        if let Some(auth) = self.credentials.authorization(url) {
            request = request.header("Authorization", auth.as_str());
        }
        let response = request
            .call()
            .map_err(|e| FetchError::from_ureq(url.as_str(), e))?;

        let mut file = tempfile::Builder::new()
            .prefix(".groundwork-fetch-")
            .tempfile_in(dir)?;
        let mut reader = response.into_body().into_reader();
        let mut hasher = ContentHasher::new(algorithm);
        let mut buf = vec![0u8; 64 * 1024];
        let mut bytes = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        message: format!("body read failed after {bytes} bytes: {e}"),
                    });
                }
            };
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            bytes += n as u64;
        }
        file.as_file().sync_all()?;

        Ok(Staged {
            file,
            bytes,
            digest: hasher.finalize_hex(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::HostTokens;
    use crate::retry::{Backoff, RetryPolicy};
    use crate::testing::{ArtifactServer, Reply};
    use groundwork_schema::{FailureKind, StepStatus};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // sha256("hello world")
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn fetcher(attempts: u32) -> ArtifactFetcher {
        ArtifactFetcher::new(FetchConfig::default().with_retry(RetryPolicy::new(
            attempts,
            Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
        )))
    }

    fn hello() -> Checksum {
        Checksum::parse(HELLO_SHA256).unwrap()
    }

    fn temp_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".groundwork-fetch-"))
            .collect()
    }

    #[test]
    fn downloads_and_verifies() {
        let server = ArtifactServer::start();
        server.serve("/tool.tar.gz", "hello world");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dl/tool.tar.gz");

        let result = fetcher(1).fetch(&server.url("/tool.tar.gz"), &dest, Some(&hello()));
        assert_eq!(result.status, StepStatus::Succeeded, "{}", result.detail);
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
        assert!(result.detail.contains(HELLO_SHA256));
        assert!(temp_entries(dest.parent().unwrap()).is_empty());
    }

    #[test]
    fn present_and_matching_is_skipped_without_request() {
        let server = ArtifactServer::start();
        server.serve("/a", "hello world");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a");
        fs::write(&dest, "hello world").unwrap();

        let result = fetcher(1).fetch(&server.url("/a"), &dest, Some(&hello()));
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(server.hits("/a"), 0);
    }

    #[test]
    fn present_without_checksum_is_skipped() {
        let server = ArtifactServer::start();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a");
        fs::write(&dest, "anything").unwrap();
        let result = fetcher(1).fetch(&server.url("/a"), &dest, None);
        assert_eq!(result.status, StepStatus::Skipped);
    }

    #[test]
    fn present_but_stale_is_downloaded_again() {
        let server = ArtifactServer::start();
        server.serve("/a", "hello world");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a");
        fs::write(&dest, "old bytes").unwrap();

        let result = fetcher(1).fetch(&server.url("/a"), &dest, Some(&hello()));
        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
        assert_eq!(server.hits("/a"), 1);
    }

    #[test]
    fn checksum_mismatch_leaves_nothing() {
        let server = ArtifactServer::start();
        server.serve("/a", "tampered");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a");

        let result = fetcher(3).fetch(&server.url("/a"), &dest, Some(&hello()));
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Integrity));
        assert!(!dest.exists());
        assert!(temp_entries(dir.path()).is_empty());
        assert_eq!(server.hits("/a"), 1, "integrity failures are not retried");
    }

    #[test]
    fn stale_file_is_removed_on_mismatch() {
        let server = ArtifactServer::start();
        server.serve("/a", "tampered");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a");
        fs::write(&dest, "old bytes").unwrap();

        let result = fetcher(1).fetch(&server.url("/a"), &dest, Some(&hello()));
        assert_eq!(result.failure, Some(FailureKind::Integrity));
        assert!(!dest.exists());
    }

    #[test]
    fn retries_server_errors() {
        let server = ArtifactServer::start();
        server.serve_sequence(
            "/flaky",
            vec![
                Reply::Status(503),
                Reply::Status(502),
                Reply::Body(b"hello world".to_vec()),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("flaky");

        let result = fetcher(4).fetch(&server.url("/flaky"), &dest, Some(&hello()));
        assert_eq!(result.status, StepStatus::Succeeded, "{}", result.detail);
        assert!(result.detail.contains("after 3 attempts"), "{}", result.detail);
        assert_eq!(server.hits("/flaky"), 3);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let server = ArtifactServer::start();
        server.serve_sequence("/down", vec![Reply::Status(500)]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("down");

        let result = fetcher(3).fetch(&server.url("/down"), &dest, None);
        assert_eq!(result.failure, Some(FailureKind::TransientFetch));
        assert_eq!(server.hits("/down"), 3);
        assert!(!dest.exists());
    }

    #[test]
    fn client_error_fails_immediately() {
        let server = ArtifactServer::start();
        server.serve_sequence("/gone", vec![Reply::Status(404)]);
        let dir = tempfile::tempdir().unwrap();

        let result = fetcher(4).fetch(&server.url("/gone"), &dir.path().join("gone"), None);
        assert_eq!(result.failure, Some(FailureKind::Http));
        assert!(result.detail.contains("404"), "{}", result.detail);
        assert_eq!(server.hits("/gone"), 1);
    }

    #[test]
    fn connection_refused_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(2).fetch(
            &format!("http://127.0.0.1:{port}/x"),
            &dir.path().join("x"),
            None,
        );
        assert_eq!(result.failure, Some(FailureKind::TransientFetch), "{}", result.detail);
    }

    #[test]
    fn sends_host_credentials() {
        let server = ArtifactServer::start();
        server.serve("/private", "hello world");
        let tokens = HostTokens::default().with_token(&format!("127.0.0.1:{}", server.port), "s3cret");
        let dir = tempfile::tempdir().unwrap();

        let result = fetcher(1)
            .with_credentials(Arc::new(tokens))
            .fetch(&server.url("/private"), &dir.path().join("p"), None);
        assert!(result.is_ok(), "{}", result.detail);
        assert_eq!(
            server.last_authorization("/private").as_deref(),
            Some("Bearer s3cret")
        );
    }

    #[test]
    fn blake3_checksum_is_supported() {
        let server = ArtifactServer::start();
        server.serve("/b", "groundwork");
        let expected =
            Checksum::parse(&format!("blake3:{}", blake3_hex(b"groundwork"))).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher(1).fetch(&server.url("/b"), &dir.path().join("b"), Some(&expected));
        assert_eq!(result.status, StepStatus::Succeeded, "{}", result.detail);
    }

    #[test]
    fn concurrent_reader_sees_old_or_new_file_only() {
        let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let server = ArtifactServer::start();
        server.serve_sequence(
            "/big",
            vec![Reply::Trickle {
                body: body.clone(),
                chunk: 4096,
                pause: Duration::from_millis(5),
            }],
        );
        let mut hasher = ContentHasher::new(ChecksumAlgorithm::Sha256);
        hasher.update(&body);
        let expected = Checksum::parse(&format!("sha256:{}", hasher.finalize_hex())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.bin");
        let old = b"previous release".to_vec();
        fs::write(&dest, &old).unwrap();

        let done = AtomicBool::new(false);
        let (result, reads) = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut reads = 0usize;
                loop {
                    let content = fs::read(&dest).expect("dest_path vanished mid-download");
                    assert!(
                        content == old || content == body,
                        "read a partial file of {} bytes",
                        content.len()
                    );
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        return reads;
                    }
                }
            });
            let result = fetcher(1).fetch(&server.url("/big"), &dest, Some(&expected));
            done.store(true, Ordering::SeqCst);
            (result, reader.join().unwrap())
        });

        assert_eq!(result.status, StepStatus::Succeeded, "{}", result.detail);
        assert!(reads > 0);
        assert_eq!(fs::read(&dest).unwrap(), body);
        assert!(temp_entries(dir.path()).is_empty());
    }

    fn blake3_hex(data: &[u8]) -> String {
        let mut h = ContentHasher::new(ChecksumAlgorithm::Blake3);
        h.update(data);
        h.finalize_hex()
    }
}
