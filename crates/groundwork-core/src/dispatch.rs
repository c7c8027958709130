use crate::runner::StepExecutor;
use crate::CoreError;
use groundwork_fetch::{ArtifactFetcher, CredentialSource, FetchConfig, NoCredentials};
use groundwork_fs::{ArchiveExtractor, LinkInstaller};
use groundwork_packages::{select_client, PackageClient, PackageInstaller};
use groundwork_schema::{EnvironmentSection, Manifest, Step, StepResult};
use std::sync::Arc;

/// Routes each step to the component that owns its kind.
pub struct Dispatcher {
    fetcher: ArtifactFetcher,
    extractor: ArchiveExtractor,
    linker: LinkInstaller,
    packages: PackageInstaller,
}

impl Dispatcher {
    pub fn new(fetcher: ArtifactFetcher, packages: Box<dyn PackageClient>) -> Self {
        Self {
            fetcher,
            extractor: ArchiveExtractor::new(),
            linker: LinkInstaller::new(),
            packages: PackageInstaller::new(packages),
        }
    }

    /// Build every component from the manifest's settings and environment.
    pub fn from_manifest(
        manifest: &Manifest,
        credentials: Option<Arc<dyn CredentialSource>>,
    ) -> Result<Self, CoreError> {
        Self::from_parts(
            FetchConfig::from_settings(&manifest.settings),
            &manifest.environment,
            credentials,
        )
    }

    pub fn from_parts(
        fetch: FetchConfig,
        environment: &EnvironmentSection,
        credentials: Option<Arc<dyn CredentialSource>>,
    ) -> Result<Self, CoreError> {
        let client = select_client(environment)?;
        let fetcher = ArtifactFetcher::new(fetch)
            .with_credentials(credentials.unwrap_or_else(|| Arc::new(NoCredentials)));
        Ok(Self::new(fetcher, client))
    }

    pub fn package_client(&self) -> &str {
        self.packages.client_name()
    }
}

impl StepExecutor for Dispatcher {
    fn execute(&self, step: &Step) -> StepResult {
        match step {
            Step::PackageInstall {
                index_url,
                packages,
            } => self.packages.install(index_url.as_deref(), packages),
            Step::ArtifactFetch {
                source_url,
                dest_path,
                expected_checksum,
            } => self
                .fetcher
                .fetch(source_url, dest_path, expected_checksum.as_ref()),
            Step::ArchiveExtract {
                archive_path,
                dest_dir,
                strip_components,
            } => self
                .extractor
                .extract(archive_path, dest_dir, *strip_components),
            Step::LinkInstall {
                link_path,
                target_path,
            } => self.linker.install(link_path, target_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundwork_schema::{parse_manifest_str, StepStatus};

    #[test]
    fn builds_from_manifest_with_mock_client() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = parse_manifest_str(&format!(
            "manifest_version = 1\n[environment]\nclient = \"mock\"\nstate_dir = \"{}\"\n",
            dir.path().display()
        ))
        .unwrap();
        let dispatcher = Dispatcher::from_manifest(&manifest, None).unwrap();
        assert_eq!(dispatcher.package_client(), "mock");
    }

    #[test]
    fn unknown_client_is_rejected() {
        let manifest =
            parse_manifest_str("manifest_version = 1\n[environment]\nclient = \"conda\"\n").unwrap();
        let err = Dispatcher::from_manifest(&manifest, None).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn routes_link_steps() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");

        let env = EnvironmentSection {
            client: "mock".to_owned(),
            state_dir: Some(dir.path().join("state")),
            ..EnvironmentSection::default()
        };
        let dispatcher = Dispatcher::from_parts(FetchConfig::default(), &env, None).unwrap();
        let result = dispatcher.execute(&Step::LinkInstall {
            link_path: link.clone(),
            target_path: target.clone(),
        });
        assert_eq!(result.status, StepStatus::Succeeded, "{}", result.detail);
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }
}
