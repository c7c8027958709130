use crate::FetchError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Supplies an `Authorization` header value for outgoing requests.
pub trait CredentialSource: Send + Sync {
    fn authorization(&self, url: &Url) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn authorization(&self, _url: &Url) -> Option<String> {
        None
    }
}

/// Per-host tokens loaded from `~/.config/groundwork/credentials.json`:
///
/// ```json
/// { "hosts": { "artifacts.example.com": "s3cr3t", "127.0.0.1:8080": "Basic dXNlcjpwdw==" } }
/// ```
///
/// A `host:port` key wins over a bare host. Values that already carry a
/// scheme (`Bearer `, `Basic `) are sent as-is; anything else becomes a
/// bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTokens {
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
}

impl HostTokens {
    #[must_use]
    pub fn with_token(mut self, host: &str, token: &str) -> Self {
        self.hosts.insert(host.to_owned(), token.to_owned());
        self
    }

    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| FetchError::Config(format!("invalid credentials file: {e}")))
    }

    /// Load the default file, or `None` if it does not exist or `HOME` is unset.
    pub fn load_default() -> Result<Option<Self>, FetchError> {
        let Ok(path) = default_credentials_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<(), FetchError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FetchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl CredentialSource for HostTokens {
    fn authorization(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let with_port = url.port().map(|port| format!("{host}:{port}"));
        let token = with_port
            .as_ref()
            .and_then(|key| self.hosts.get(key))
            .or_else(|| self.hosts.get(host))?;
        if token.starts_with("Bearer ") || token.starts_with("Basic ") {
            Some(token.clone())
        } else {
            Some(format!("Bearer {token}"))
        }
    }
}

pub fn default_credentials_path() -> Result<PathBuf, FetchError> {
    let home = std::env::var("HOME").map_err(|_| FetchError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/groundwork/credentials.json"))
}
