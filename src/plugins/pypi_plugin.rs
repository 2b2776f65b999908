//! PyPI-compatible index - existence checks over the JSON API and uploads
//! through twine

use crate::core::config::RegistryEndpoint;
use crate::core::error::PublishError;
use crate::core::traits::{Artifact, PublishResult, PublishTarget};
use crate::security::command_executor::SafeCommandExecutor;
use crate::security::token_manager::SecureTokenManager;
use crate::validation::version_resolver::normalize_version;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const UPLOADER: &str = "twine";

/// `/pypi/{project}/json` response, only the parts we read
#[derive(Debug, Deserialize)]
struct ProjectInfo {
    #[serde(default)]
    releases: HashMap<String, serde_json::Value>,
}

/// Release versions listed in a project JSON document
pub fn parse_release_versions(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let info: ProjectInfo = serde_json::from_str(body)?;
    let mut versions: Vec<String> = info.releases.into_keys().collect();
    versions.sort();
    Ok(versions)
}

/// Map a failed twine run to a publish error
pub fn classify_upload_failure(target: PublishTarget, version: &str, output: &str) -> PublishError {
    let target_name = target.name().to_string();
    let lowered = output.to_lowercase();

    if lowered.contains("403")
        || lowered.contains("401")
        || lowered.contains("invalid or non-existent authentication")
    {
        return PublishError::AuthenticationFailed {
            target: target_name,
        };
    }

    if lowered.contains("file already exists")
        || (lowered.contains("400") && lowered.contains("exist"))
    {
        return PublishError::VersionConflict {
            target: target_name,
            version: version.to_string(),
        };
    }

    PublishError::PublishRejected {
        target: target_name,
        message: output.trim().to_string(),
    }
}

/// Did twine skip the file because the index already holds it?
///
/// twine prints `Skipping <file> because it appears to already exist` under
/// `--skip-existing` and exits 0.
pub fn upload_was_skipped(output: &str) -> bool {
    output.contains("Skipping") && output.contains("already exist")
}

/// One PyPI-compatible index (TestPyPI or PyPI)
pub struct PyPiIndex {
    target: PublishTarget,
    endpoint: RegistryEndpoint,
    http: reqwest::Client,
    executor: SafeCommandExecutor,
    tokens: SecureTokenManager,
    timeout: Duration,
}

impl PyPiIndex {
    pub fn new(
        target: PublishTarget,
        endpoint: RegistryEndpoint,
        http: reqwest::Client,
        executor: SafeCommandExecutor,
        tokens: SecureTokenManager,
        timeout: Duration,
    ) -> Self {
        Self {
            target,
            endpoint,
            http,
            executor,
            tokens,
            timeout,
        }
    }

    /// Project page for a released version
    pub fn project_url(&self, package_name: &str, version: &str) -> String {
        format!(
            "{}/project/{}/{}/",
            self.endpoint.api_url.trim_end_matches('/'),
            package_name,
            version
        )
    }

    fn network_error(&self, error: reqwest::Error) -> PublishError {
        if error.is_timeout() {
            PublishError::TimeoutError {
                target: self.target.name().to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            PublishError::RegistryUnreachable {
                target: self.target.name().to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Ask the JSON API whether the version is listed
    ///
    /// An unknown project (404) counts as "no".
    pub async fn has_version(&self, package_name: &str, version: &str) -> Result<bool, PublishError> {
        let url = format!(
            "{}/pypi/{}/json",
            self.endpoint.api_url.trim_end_matches('/'),
            package_name
        );

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(PublishError::RegistryUnreachable {
                target: self.target.name().to_string(),
                message: format!("{} answered HTTP {}", url, response.status()),
            });
        }

        let body = response.text().await.map_err(|e| self.network_error(e))?;
        let versions = parse_release_versions(&body).map_err(|e| PublishError::RegistryUnreachable {
            target: self.target.name().to_string(),
            message: format!("unreadable project JSON: {}", e),
        })?;

        let wanted = normalize_version(version);
        Ok(versions.iter().any(|v| normalize_version(v) == wanted))
    }

    /// Upload a wheel. A file the index already holds is skipped and reported
    /// as `already_present`.
    pub async fn upload(&self, artifact: &Artifact) -> Result<PublishResult, PublishError> {
        let version = artifact.version().unwrap_or_default().to_string();
        let token = self
            .tokens
            .token_for(self.target)
            .ok_or_else(|| PublishError::AuthenticationFailed {
                target: self.target.name().to_string(),
            })?;

        let path = artifact.path.to_string_lossy();
        let args = [
            "upload",
            "--repository-url",
            self.endpoint.upload_url.as_str(),
            "--skip-existing",
            "--non-interactive",
            "--disable-progress-bar",
            path.as_ref(),
        ];
        let env = vec![
            ("TWINE_USERNAME".to_string(), "__token__".to_string()),
            ("TWINE_PASSWORD".to_string(), token.expose_secret().to_string()),
        ];

        tracing::info!(
            target_registry = %self.target,
            package = %artifact.package_name,
            %version,
            "uploading wheel"
        );

        let output = self
            .executor
            .execute_with_env(UPLOADER, &args, &env)
            .await
            .map_err(|e| PublishError::from_command(self.target.name(), e))?;

        let combined = self.tokens.mask_tokens_in_string(&format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ));

        if !output.status.success() {
            return Err(classify_upload_failure(self.target, &version, &combined));
        }

        let already_present = upload_was_skipped(&combined);
        Ok(PublishResult {
            target: self.target,
            already_present,
            url: Some(self.project_url(&artifact.package_name, &version)),
        })
    }
}
