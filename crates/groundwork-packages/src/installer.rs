use crate::client::PackageClient;
use crate::PackageError;
use groundwork_schema::{Pin, StepResult};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Every pin was already installed at exactly the requested version.
    AlreadySatisfied,
    /// The client was invoked; `missing` lists the pins that were not satisfied beforehand.
    Installed { missing: Vec<Pin> },
}

pub struct PackageInstaller {
    client: Box<dyn PackageClient>,
}

impl PackageInstaller {
    pub fn new(client: Box<dyn PackageClient>) -> Self {
        Self { client }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn install(&self, index_url: Option<&str>, packages: &[Pin]) -> StepResult {
        match self.try_install(index_url, packages) {
            Ok(InstallOutcome::AlreadySatisfied) => StepResult::skipped(format!(
                "{} already installed",
                join_pins(packages)
            )),
            Ok(InstallOutcome::Installed { missing }) => StepResult::succeeded(format!(
                "installed {} via {}",
                join_pins(&missing),
                self.client.name()
            )),
            Err(e) => StepResult::failed(e.failure_kind(), e.to_string()),
        }
    }

    /// Skip the client entirely when the environment already satisfies every
    /// pin; otherwise hand all pins to the client in one call.
    pub fn try_install(
        &self,
        index_url: Option<&str>,
        packages: &[Pin],
    ) -> Result<InstallOutcome, PackageError> {
        let missing = match self.client.installed() {
            Ok(installed) => unsatisfied(&installed, packages),
            Err(e) => {
                warn!(
                    "could not list installed packages via {}: {e}",
                    self.client.name()
                );
                packages.to_vec()
            }
        };
        if missing.is_empty() {
            debug!("all {} pins already satisfied", packages.len());
            return Ok(InstallOutcome::AlreadySatisfied);
        }

        info!(
            "installing {} via {}",
            join_pins(packages),
            self.client.name()
        );
        self.client.install(index_url, packages)?;
        Ok(InstallOutcome::Installed { missing })
    }
}

/// Pins whose exact version is not present, compared by normalized name.
fn unsatisfied(installed: &[Pin], wanted: &[Pin]) -> Vec<Pin> {
    let present: HashMap<String, &str> = installed
        .iter()
        .map(|p| (p.name.normalized(), p.version.as_str()))
        .collect();
    wanted
        .iter()
        .filter(|p| present.get(&p.name.normalized()) != Some(&p.version.as_str()))
        .cloned()
        .collect()
}

fn join_pins(pins: &[Pin]) -> String {
    pins.iter()
        .map(Pin::requirement)
        .collect::<Vec<_>>()
        .join(" ")
}
