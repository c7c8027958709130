use crate::mock::MockClient;
use crate::pip::PipClient;
use crate::PackageError;
use groundwork_schema::{EnvironmentSection, Pin};

/// An external package-index client bound to one environment.
///
/// Implementations must pass pins through unchanged and must not widen them.
pub trait PackageClient: Send + Sync {
    fn name(&self) -> &str;

    /// Distributions currently installed in the environment, as exact pins.
    fn installed(&self) -> Result<Vec<Pin>, PackageError>;

    /// Install every pin in one invocation. Any per-package failure fails the call.
    fn install(&self, index_url: Option<&str>, pins: &[Pin]) -> Result<(), PackageError>;
}

pub fn select_client(environment: &EnvironmentSection) -> Result<Box<dyn PackageClient>, PackageError> {
    match environment.client.as_str() {
        "pip" => Ok(Box::new(PipClient::new(&environment.python))),
        "mock" => {
            let state_dir = environment.state_dir.as_deref().ok_or_else(|| {
                PackageError::State("the mock client needs environment.state_dir".to_owned())
            })?;
            Ok(Box::new(MockClient::new(state_dir)))
        }
        other => Err(PackageError::UnknownClient(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_known_clients() {
        let pip = select_client(&EnvironmentSection::default()).unwrap();
        assert_eq!(pip.name(), "pip");

        let dir = tempfile::tempdir().unwrap();
        let mock = select_client(&EnvironmentSection {
            client: "mock".to_owned(),
            state_dir: Some(dir.path().to_path_buf()),
            ..EnvironmentSection::default()
        })
        .unwrap();
        assert_eq!(mock.name(), "mock");
    }

    #[test]
    fn mock_without_state_dir_fails() {
        let env = EnvironmentSection {
            client: "mock".to_owned(),
            ..EnvironmentSection::default()
        };
        assert!(matches!(select_client(&env), Err(PackageError::State(_))));
    }

    #[test]
    fn unknown_client_fails() {
        let env = EnvironmentSection {
            client: "conda".to_owned(),
            ..EnvironmentSection::default()
        };
        assert!(matches!(
            select_client(&env),
            Err(PackageError::UnknownClient(_))
        ));
    }
}
