use crate::client::PackageClient;
use crate::PackageError;
use groundwork_schema::Pin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

const STATE_FILE: &str = "mock-packages.json";

/// Names starting with this prefix behave like packages missing from the index.
pub const UNAVAILABLE_PREFIX: &str = "nonexistent";

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockState {
    /// Normalized name -> pin as it was requested.
    installed: BTreeMap<String, Pin>,
    invocations: u64,
}

/// A package client that records installs in a JSON file under `state_dir`.
///
/// Used by tests and dry environments. Install calls are all-or-nothing: if
/// any requested name starts with [`UNAVAILABLE_PREFIX`] nothing is recorded.
pub struct MockClient {
    state_dir: PathBuf,
    lock: Mutex<()>,
}

impl MockClient {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Number of `install` calls that reached the client.
    pub fn invocations(&self) -> Result<u64, PackageError> {
        Ok(self.load()?.invocations)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn load(&self) -> Result<MockState, PackageError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(MockState::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| PackageError::State(format!("corrupt {}: {e}", path.display())))
    }

    fn save(&self, state: &MockState) -> Result<(), PackageError> {
        std::fs::create_dir_all(&self.state_dir)?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| PackageError::State(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&self.state_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.state_path()).map_err(|e| PackageError::Io(e.error))?;
        Ok(())
    }
}

impl PackageClient for MockClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn installed(&self) -> Result<Vec<Pin>, PackageError> {
        Ok(self.load()?.installed.into_values().collect())
    }

    fn install(&self, _index_url: Option<&str>, pins: &[Pin]) -> Result<(), PackageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| PackageError::State(format!("mutex poisoned: {e}")))?;
        let mut state = self.load()?;
        state.invocations += 1;

        let unavailable: Vec<String> = pins
            .iter()
            .filter(|p| p.name.normalized().starts_with(UNAVAILABLE_PREFIX))
            .map(Pin::requirement)
            .collect();
        if !unavailable.is_empty() {
            self.save(&state)?;
            let output = unavailable
                .iter()
                .map(|r| format!("ERROR: No matching distribution found for {r}\n"))
                .collect();
            return Err(PackageError::ToolFailed {
                tool: "mock".to_owned(),
                status: "exit status: 1".to_owned(),
                output,
            });
        }

        for pin in pins {
            state.installed.insert(pin.name.normalized(), pin.clone());
        }
        self.save(&state)
    }
}
