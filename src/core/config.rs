//! Configuration structures and types for wheel-publisher
//!
//! Every field is optional so layers (defaults, global file, project file,
//! environment, CLI) can be merged field by field. Resolved values with
//! built-in fallbacks are exposed through accessor methods.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TEST_API_URL: &str = "https://test.pypi.org";
pub const DEFAULT_TEST_UPLOAD_URL: &str = "https://test.pypi.org/legacy/";
pub const DEFAULT_TEST_INDEX_URL: &str = "https://test.pypi.org/simple/";
pub const DEFAULT_PRODUCTION_API_URL: &str = "https://pypi.org";
pub const DEFAULT_PRODUCTION_UPLOAD_URL: &str = "https://upload.pypi.org/legacy/";
pub const DEFAULT_PRODUCTION_INDEX_URL: &str = "https://pypi.org/simple/";
pub const DEFAULT_RELEASE_API_URL: &str = "https://api.github.com";
pub const DEFAULT_RELEASE_UPLOAD_URL: &str = "https://uploads.github.com";
pub const DEFAULT_BUILD_COMMAND: &str = "python -m build --wheel";
pub const DEFAULT_LINTER: &str = "twine check --strict";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Copy every `Some` field of `$source` over `$target`
macro_rules! merge_fields {
    ($target:expr, $source:expr; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    };
}

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseConfig {
    /// Schema version (required)
    #[serde(default)]
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectConfig>,

    #[serde(default)]
    pub registries: RegistryConfigs,

    #[serde(skip_serializing_if = "Option::is_none", rename = "releaseHost")]
    pub release_host: Option<ReleaseHostConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyConfig>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "installVerify")]
    pub install_verify: Option<InstallVerifyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOptionsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
}

/// Project basic information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectConfig {
    /// Distribution name used when no variant config names one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Top-level import package expected inside every wheel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Variants to release when none are given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<String>>,
}

/// Test and production registry endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryConfigs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<RegistryEndpointConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<RegistryEndpointConfig>,
}

/// One package index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryEndpointConfig {
    /// Base URL of the JSON metadata API (`{url}/pypi/{name}/json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Upload endpoint passed to `twine upload --repository-url`
    #[serde(skip_serializing_if = "Option::is_none", rename = "uploadUrl")]
    pub upload_url: Option<String>,

    /// Simple index used by `pip install --index-url`
    #[serde(skip_serializing_if = "Option::is_none", rename = "indexUrl")]
    pub index_url: Option<String>,
}

/// Release host (GitHub-compatible REST API)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReleaseHostConfig {
    #[serde(skip_serializing_if = "Option::is_none", rename = "apiUrl")]
    pub api_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "uploadUrl")]
    pub upload_url: Option<String>,

    /// "owner/name"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Build collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BuildSettings {
    /// Variant definitions (default: build_config.json)
    #[serde(skip_serializing_if = "Option::is_none", rename = "configPath")]
    pub config_path: Option<String>,

    /// Output directory searched for wheels (default: dist)
    #[serde(skip_serializing_if = "Option::is_none", rename = "distDir")]
    pub dist_dir: Option<String>,

    /// Build command, split on whitespace (default: python -m build --wheel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Verify phase settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VerifyConfig {
    /// Rebuild attempts after a failed verification (default: 2, max: 2)
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxRebuilds")]
    pub max_rebuilds: Option<u32>,

    /// External linter command; the wheel path is appended (empty disables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linter: Option<String>,
}

/// InstallVerify phase settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InstallVerifyConfig {
    /// Interpreter used to create the disposable environment (default: python3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,

    /// Module imported after install (default: project.module)
    #[serde(skip_serializing_if = "Option::is_none", rename = "importName")]
    pub import_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkConfig {
    /// Per-call timeout for registry queries and publish commands
    #[serde(skip_serializing_if = "Option::is_none", rename = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
}

/// Publish options configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublishOptionsConfig {
    /// Require confirmation before production upload (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm: Option<bool>,

    /// Interactive mode (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SecurityConfig {
    #[serde(skip_serializing_if = "Option::is_none", rename = "envVarExpansion")]
    pub env_var_expansion: Option<EnvVarExpansionConfig>,
}

/// Environment variable expansion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EnvVarExpansionConfig {
    /// Enable environment variable expansion (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Allowed environment variable prefixes (default: all)
    #[serde(skip_serializing_if = "Option::is_none", rename = "allowedPrefixes")]
    pub allowed_prefixes: Option<Vec<String>>,

    /// Forbidden patterns (regex) for environment variable names
    #[serde(skip_serializing_if = "Option::is_none", rename = "forbiddenPatterns")]
    pub forbidden_patterns: Option<Vec<String>>,
}

/// Fully resolved endpoints of one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub api_url: String,
    pub upload_url: String,
    pub index_url: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            extends: None,
            project: None,
            registries: RegistryConfigs::default(),
            release_host: None,
            build: None,
            verify: None,
            install_verify: None,
            network: None,
            publish: Some(PublishOptionsConfig {
                confirm: Some(true),
                interactive: Some(true),
            }),
            security: Some(SecurityConfig {
                env_var_expansion: Some(EnvVarExpansionConfig {
                    enabled: Some(true),
                    allowed_prefixes: None,
                    forbidden_patterns: None,
                }),
            }),
        }
    }
}

/// Merge an optional section field by field
fn merge_section<T>(target: &mut Option<T>, source: Option<T>, merge: impl FnOnce(&mut T, T))
where
    T: Default,
{
    if let Some(source) = source {
        merge(target.get_or_insert_with(T::default), source);
    }
}

impl ReleaseConfig {
    /// Overlay `source` on top of `self`; fields set in `source` win
    pub fn merge_from(&mut self, source: ReleaseConfig) {
        if !source.version.is_empty() {
            self.version = source.version;
        }
        if source.extends.is_some() {
            self.extends = source.extends;
        }

        merge_section(&mut self.project, source.project, |t, s| {
            merge_fields!(t, s; name, module, variants);
        });
        merge_section(&mut self.registries.test, source.registries.test, |t, s| {
            merge_fields!(t, s; url, upload_url, index_url);
        });
        merge_section(
            &mut self.registries.production,
            source.registries.production,
            |t, s| {
                merge_fields!(t, s; url, upload_url, index_url);
            },
        );
        merge_section(&mut self.release_host, source.release_host, |t, s| {
            merge_fields!(t, s; api_url, upload_url, repository);
        });
        merge_section(&mut self.build, source.build, |t, s| {
            merge_fields!(t, s; config_path, dist_dir, command);
        });
        merge_section(&mut self.verify, source.verify, |t, s| {
            merge_fields!(t, s; max_rebuilds, linter);
        });
        merge_section(&mut self.install_verify, source.install_verify, |t, s| {
            merge_fields!(t, s; python, import_name);
        });
        merge_section(&mut self.network, source.network, |t, s| {
            merge_fields!(t, s; timeout_secs);
        });
        merge_section(&mut self.publish, source.publish, |t, s| {
            merge_fields!(t, s; confirm, interactive);
        });
        merge_section(&mut self.security, source.security, |t, s| {
            merge_section(&mut t.env_var_expansion, s.env_var_expansion, |t, s| {
                merge_fields!(t, s; enabled, allowed_prefixes, forbidden_patterns);
            });
        });
    }

    pub fn test_registry(&self) -> RegistryEndpoint {
        let section = self.registries.test.clone().unwrap_or_default();
        RegistryEndpoint {
            api_url: section.url.unwrap_or_else(|| DEFAULT_TEST_API_URL.to_string()),
            upload_url: section
                .upload_url
                .unwrap_or_else(|| DEFAULT_TEST_UPLOAD_URL.to_string()),
            index_url: section
                .index_url
                .unwrap_or_else(|| DEFAULT_TEST_INDEX_URL.to_string()),
        }
    }

    pub fn production_registry(&self) -> RegistryEndpoint {
        let section = self.registries.production.clone().unwrap_or_default();
        RegistryEndpoint {
            api_url: section
                .url
                .unwrap_or_else(|| DEFAULT_PRODUCTION_API_URL.to_string()),
            upload_url: section
                .upload_url
                .unwrap_or_else(|| DEFAULT_PRODUCTION_UPLOAD_URL.to_string()),
            index_url: section
                .index_url
                .unwrap_or_else(|| DEFAULT_PRODUCTION_INDEX_URL.to_string()),
        }
    }

    pub fn release_api_url(&self) -> String {
        self.release_host
            .as_ref()
            .and_then(|r| r.api_url.clone())
            .unwrap_or_else(|| DEFAULT_RELEASE_API_URL.to_string())
    }

    pub fn release_upload_url(&self) -> String {
        self.release_host
            .as_ref()
            .and_then(|r| r.upload_url.clone())
            .unwrap_or_else(|| DEFAULT_RELEASE_UPLOAD_URL.to_string())
    }

    pub fn repository(&self) -> Option<&str> {
        self.release_host
            .as_ref()
            .and_then(|r| r.repository.as_deref())
            .filter(|r| !r.is_empty())
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.name.as_deref())
    }

    pub fn module(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.module.as_deref())
    }

    pub fn variants(&self) -> Vec<String> {
        self.project
            .as_ref()
            .and_then(|p| p.variants.clone())
            .unwrap_or_default()
    }

    pub fn build_config_path(&self) -> PathBuf {
        PathBuf::from(
            self.build
                .as_ref()
                .and_then(|b| b.config_path.as_deref())
                .unwrap_or("build_config.json"),
        )
    }

    pub fn dist_dir(&self) -> PathBuf {
        PathBuf::from(
            self.build
                .as_ref()
                .and_then(|b| b.dist_dir.as_deref())
                .unwrap_or("dist"),
        )
    }

    /// Build command split into program and arguments
    pub fn build_command(&self) -> Vec<String> {
        split_command(
            self.build
                .as_ref()
                .and_then(|b| b.command.as_deref())
                .unwrap_or(DEFAULT_BUILD_COMMAND),
        )
    }

    /// Raw configured rebuild count (clamped later by the rebuild policy)
    pub fn max_rebuilds(&self) -> u32 {
        self.verify
            .as_ref()
            .and_then(|v| v.max_rebuilds)
            .unwrap_or(crate::core::retry::MAX_REBUILDS)
    }

    /// Linter command, or `None` when disabled with an empty string
    pub fn linter_command(&self) -> Option<Vec<String>> {
        let command = self
            .verify
            .as_ref()
            .and_then(|v| v.linter.as_deref())
            .unwrap_or(DEFAULT_LINTER);
        let parts = split_command(command);
        if parts.is_empty() { None } else { Some(parts) }
    }

    pub fn python(&self) -> String {
        self.install_verify
            .as_ref()
            .and_then(|i| i.python.clone())
            .unwrap_or_else(|| "python3".to_string())
    }

    /// Module to import after install: explicit setting, then project module
    pub fn import_name(&self) -> Option<String> {
        self.install_verify
            .as_ref()
            .and_then(|i| i.import_name.clone())
            .or_else(|| self.module().map(str::to_string))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.network
                .as_ref()
                .and_then(|n| n.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn confirm_required(&self) -> bool {
        self.publish
            .as_ref()
            .and_then(|p| p.confirm)
            .unwrap_or(true)
    }

    pub fn interactive(&self) -> bool {
        self.publish
            .as_ref()
            .and_then(|p| p.interactive)
            .unwrap_or(true)
    }

    pub fn env_var_expansion(&self) -> EnvVarExpansionConfig {
        self.security
            .as_ref()
            .and_then(|s| s.env_var_expansion.clone())
            .unwrap_or_default()
    }
}

/// Split a command string on whitespace
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Name → value pairs handed to the loader's environment layer
pub type EnvMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReleaseConfig::default();
        assert_eq!(config.version, "1.0");
        assert!(config.confirm_required());
        assert!(config.interactive());
        assert_eq!(config.max_rebuilds(), 2);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.dist_dir(), PathBuf::from("dist"));
        assert_eq!(config.test_registry().index_url, DEFAULT_TEST_INDEX_URL);
        assert_eq!(config.release_api_url(), DEFAULT_RELEASE_API_URL);
        assert!(config.repository().is_none());
    }

    #[test]
    fn test_serialize_config() {
        let config = ReleaseConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("version: '1.0'"));
        assert!(yaml.contains("envVarExpansion"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
version: "1.0"
project:
  name: vllm-cpu
  module: vllm
  variants: [noavx512, avx512]
registries:
  test:
    url: http://localhost:8080
releaseHost:
  repository: example/vllm-cpu
verify:
  maxRebuilds: 1
  linter: ""
installVerify:
  importName: vllm
network:
  timeoutSecs: 5
"#;
        let config: ReleaseConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.project_name(), Some("vllm-cpu"));
        assert_eq!(config.variants(), vec!["noavx512", "avx512"]);
        assert_eq!(config.test_registry().api_url, "http://localhost:8080");
        // Unset fields fall back to defaults
        assert_eq!(config.test_registry().upload_url, DEFAULT_TEST_UPLOAD_URL);
        assert_eq!(config.repository(), Some("example/vllm-cpu"));
        assert_eq!(config.max_rebuilds(), 1);
        assert!(config.linter_command().is_none());
        assert_eq!(config.import_name(), Some("vllm".to_string()));
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_merge_is_field_level() {
        let mut base: ReleaseConfig = serde_yaml::from_str(
            r#"
registries:
  test:
    url: http://base
    uploadUrl: http://base/legacy/
"#,
        )
        .unwrap();
        let overlay: ReleaseConfig = serde_yaml::from_str(
            r#"
registries:
  test:
    url: http://overlay
"#,
        )
        .unwrap();

        base.merge_from(overlay);

        let test = base.test_registry();
        assert_eq!(test.api_url, "http://overlay");
        assert_eq!(test.upload_url, "http://base/legacy/");
    }

    #[test]
    fn test_default_commands() {
        let config = ReleaseConfig::default();
        assert_eq!(config.build_command(), vec!["python", "-m", "build", "--wheel"]);
        assert_eq!(
            config.linter_command(),
            Some(vec![
                "twine".to_string(),
                "check".to_string(),
                "--strict".to_string()
            ])
        );
    }

    #[test]
    fn test_import_name_falls_back_to_module() {
        let config = ReleaseConfig {
            project: Some(ProjectConfig {
                module: Some("demo_pkg".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(config.import_name(), Some("demo_pkg".to_string()));
    }
}
