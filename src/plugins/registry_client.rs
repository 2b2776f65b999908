//! Routes registry calls to the test index, the production index or the
//! release host

use crate::core::config::ReleaseConfig;
use crate::core::error::PublishError;
use crate::core::traits::{Artifact, PublishResult, PublishTarget, RegistryClient};
use crate::plugins::github_plugin::GitHubReleaseHost;
use crate::plugins::pypi_plugin::PyPiIndex;
use crate::security::command_executor::SafeCommandExecutor;
use crate::security::token_manager::SecureTokenManager;
use async_trait::async_trait;
use std::path::Path;

/// Uploads may take far longer than a metadata request
pub const UPLOAD_TIMEOUT_FACTOR: u32 = 10;

pub struct RemoteRegistryClient {
    test: PyPiIndex,
    production: PyPiIndex,
    release_host: Option<GitHubReleaseHost>,
}

impl RemoteRegistryClient {
    pub fn new(
        test: PyPiIndex,
        production: PyPiIndex,
        release_host: Option<GitHubReleaseHost>,
    ) -> Self {
        Self {
            test,
            production,
            release_host,
        }
    }

    /// Build every endpoint client from the loaded configuration
    pub fn from_config(config: &ReleaseConfig, working_dir: &Path) -> Result<Self, PublishError> {
        let timeout = config.timeout();
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PublishError::config(format!("cannot create HTTP client: {}", e)))?;
        let tokens = SecureTokenManager::new();
        let executor = SafeCommandExecutor::new(working_dir)
            .map_err(|e| PublishError::from_command("registry", e))?
            .with_timeout(timeout * UPLOAD_TIMEOUT_FACTOR);

        let index = |target: PublishTarget| {
            let endpoint = match target {
                PublishTarget::TestRegistry => config.test_registry(),
                _ => config.production_registry(),
            };
            PyPiIndex::new(
                target,
                endpoint,
                http.clone(),
                executor.clone(),
                tokens.clone(),
                timeout,
            )
        };

        let release_host = config.repository().map(|repository| {
            GitHubReleaseHost::new(
                http.clone(),
                config.release_api_url(),
                config.release_upload_url(),
                repository.to_string(),
                tokens.clone(),
                timeout * UPLOAD_TIMEOUT_FACTOR,
            )
        });
        if release_host.is_none() {
            tracing::warn!("no release repository configured; release tagging will fail");
        }

        Ok(Self::new(
            index(PublishTarget::TestRegistry),
            index(PublishTarget::ProductionRegistry),
            release_host,
        ))
    }

    fn index(&self, target: PublishTarget) -> Option<&PyPiIndex> {
        match target {
            PublishTarget::TestRegistry => Some(&self.test),
            PublishTarget::ProductionRegistry => Some(&self.production),
            PublishTarget::ReleaseHost => None,
        }
    }

    fn release_host(&self) -> Result<&GitHubReleaseHost, PublishError> {
        self.release_host.as_ref().ok_or_else(|| PublishError::config(
            "releaseHost.repository is not set",
        ))
    }
}

/// An unreachable endpoint answers "absent"; every other error stands
fn absent_when_unreachable(
    target: PublishTarget,
    subject: &str,
    result: Result<bool, PublishError>,
) -> Result<bool, PublishError> {
    match result {
        Err(error @ PublishError::RegistryUnreachable { .. }) => {
            tracing::warn!(target_registry = %target, subject, %error, "existence check failed, assuming absent");
            Ok(false)
        }
        other => other,
    }
}

#[async_trait]
impl RegistryClient for RemoteRegistryClient {
    async fn exists(
        &self,
        package_name: &str,
        version: &str,
        target: PublishTarget,
    ) -> Result<bool, PublishError> {
        let index = self.index(target).ok_or_else(|| {
            PublishError::config("release host existence is checked by tag, not by package")
        })?;
        absent_when_unreachable(target, package_name, index.has_version(package_name, version).await)
    }

    async fn tag_exists(&self, tag: &str) -> Result<bool, PublishError> {
        let host = self.release_host()?;
        absent_when_unreachable(PublishTarget::ReleaseHost, tag, host.tag_exists(tag).await)
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        target: PublishTarget,
    ) -> Result<PublishResult, PublishError> {
        match self.index(target) {
            Some(index) => index.upload(artifact).await,
            None => Err(PublishError::config(
                "release host uploads go through tag_release",
            )),
        }
    }

    async fn tag_release(
        &self,
        package_name: &str,
        version: &str,
        variant: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        self.release_host()?
            .create_release(package_name, version, variant, artifact_path)
            .await
    }

    async fn complete_release(
        &self,
        tag: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        self.release_host()?.complete_release(tag, artifact_path).await
    }
}
