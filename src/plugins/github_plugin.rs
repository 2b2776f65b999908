//! GitHub release host - per-variant tags with the wheel attached

use crate::core::error::PublishError;
use crate::core::traits::{PublishResult, PublishTarget, release_tag};
use crate::security::token_manager::SecureTokenManager;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = concat!("wheel-publisher/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";

/// Request body for `POST /repos/{owner}/{repo}/releases`
#[derive(Debug, Serialize)]
struct NewRelease<'a> {
    tag_name: &'a str,
    name: String,
    body: String,
    draft: bool,
    prerelease: bool,
}

/// Fields of a release we read back
#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    html_url: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
}

/// Release title: `{package} {version} ({variant})`
pub fn release_title(package_name: &str, version: &str, variant: &str) -> String {
    format!("{} {} ({})", package_name, version, variant)
}

fn release_notes(package_name: &str, version: &str, variant: &str) -> String {
    format!(
        "Wheel for the `{}` build variant.\n\n```\npip install {}=={}\n```\n",
        variant, package_name, version
    )
}

/// Release API client for one repository
pub struct GitHubReleaseHost {
    http: reqwest::Client,
    api_url: String,
    upload_url: String,
    repository: String,
    tokens: SecureTokenManager,
    timeout: Duration,
}

impl GitHubReleaseHost {
    pub fn new(
        http: reqwest::Client,
        api_url: String,
        upload_url: String,
        repository: String,
        tokens: SecureTokenManager,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            repository,
            tokens,
            timeout,
        }
    }

    fn target() -> String {
        PublishTarget::ReleaseHost.name().to_string()
    }

    fn network_error(&self, error: reqwest::Error) -> PublishError {
        if error.is_timeout() {
            PublishError::TimeoutError {
                target: Self::target(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            PublishError::RegistryUnreachable {
                target: Self::target(),
                message: error.to_string(),
            }
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .timeout(self.timeout);

        match self.tokens.token_for(PublishTarget::ReleaseHost) {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Look up the release for `tag`; `None` when the host has none
    async fn find_release(&self, tag: &str) -> Result<Option<Release>, PublishError> {
        let url = format!(
            "{}/repos/{}/releases/tags/{}",
            self.api_url, self.repository, tag
        );
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        match response.status() {
            status if status.is_success() => {
                let release = response.json().await.map_err(|e| self.network_error(e))?;
                Ok(Some(release))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(PublishError::RegistryUnreachable {
                target: Self::target(),
                message: format!("{} answered HTTP {}", url, status),
            }),
        }
    }

    /// Does a release exist for `tag`?
    pub async fn tag_exists(&self, tag: &str) -> Result<bool, PublishError> {
        Ok(self.find_release(tag).await?.is_some())
    }

    /// Attach the wheel to the existing release for `tag` if it lacks it
    ///
    /// Covers a previous run that created the release but failed before the
    /// asset upload finished.
    pub async fn complete_release(
        &self,
        tag: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        if self.tokens.token_for(PublishTarget::ReleaseHost).is_none() {
            return Err(PublishError::AuthenticationFailed {
                target: Self::target(),
            });
        }

        let release = self
            .find_release(tag)
            .await?
            .ok_or_else(|| PublishError::PublishRejected {
                target: Self::target(),
                message: format!("release {} disappeared", tag),
            })?;

        let file_name = artifact_path.file_name().and_then(|n| n.to_str());
        let attached = release
            .assets
            .iter()
            .any(|asset| Some(asset.name.as_str()) == file_name);

        if !attached {
            tracing::warn!(%tag, "release has no wheel attached, uploading it");
            self.upload_asset(release.id, artifact_path).await?;
        }

        Ok(PublishResult {
            target: PublishTarget::ReleaseHost,
            already_present: attached,
            url: Some(release.html_url),
        })
    }

    /// Create the `v{version}-{variant}` release and upload the wheel to it
    pub async fn create_release(
        &self,
        package_name: &str,
        version: &str,
        variant: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        if self.tokens.token_for(PublishTarget::ReleaseHost).is_none() {
            return Err(PublishError::AuthenticationFailed {
                target: Self::target(),
            });
        }

        let tag = release_tag(version, variant);
        let body = NewRelease {
            tag_name: &tag,
            name: release_title(package_name, version, variant),
            body: release_notes(package_name, version, variant),
            draft: false,
            prerelease: false,
        };

        tracing::info!(%tag, repository = %self.repository, "creating release");

        let url = format!("{}/repos/{}/releases", self.api_url, self.repository);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let release: Release = match response.status() {
            status if status.is_success() => response.json().await.map_err(|e| self.network_error(e))?,
            StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(PublishError::TagAlreadyExists {
                    target: Self::target(),
                    tag,
                });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PublishError::AuthenticationFailed {
                    target: Self::target(),
                });
            }
            status => {
                let detail = response.text().await.unwrap_or_default();
                return Err(PublishError::PublishRejected {
                    target: Self::target(),
                    message: format!("HTTP {}: {}", status, detail.trim()),
                });
            }
        };

        self.upload_asset(release.id, artifact_path).await?;

        Ok(PublishResult {
            target: PublishTarget::ReleaseHost,
            already_present: false,
            url: Some(release.html_url),
        })
    }

    async fn upload_asset(&self, release_id: u64, artifact_path: &Path) -> Result<(), PublishError> {
        let file_name = artifact_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PublishError::PublishRejected {
                target: Self::target(),
                message: format!("{} has no file name", artifact_path.display()),
            })?;
        let bytes = tokio::fs::read(artifact_path)
            .await
            .map_err(|e| PublishError::PublishRejected {
                target: Self::target(),
                message: format!("cannot read {}: {}", artifact_path.display(), e),
            })?;

        let url = format!(
            "{}/repos/{}/releases/{}/assets",
            self.upload_url, self.repository, release_id
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .query(&[("name", file_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PublishError::PublishRejected {
                target: Self::target(),
                message: format!("asset upload answered HTTP {}: {}", status, detail.trim()),
            });
        }

        tracing::info!(asset = file_name, release_id, "attached wheel to release");
        Ok(())
    }
}
