//! Configuration file loader for wheel-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublishError;
use crate::core::retry::MAX_REBUILDS;
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".release-config.yaml";

lazy_static! {
    /// Environment variable pattern (${VAR_NAME})
    static ref ENV_VAR_REGEX: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Explicit config file replacing `<project>/.release-config.yaml`
    pub config_file: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli_args: Option<ReleaseConfig>,

    /// Environment variables
    pub env: EnvMap,

    /// Skip `~/.release-config.yaml`
    pub skip_global: bool,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "registries.test.url")
    pub field: String,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Project config (./.release-config.yaml or `--config`)
    /// 4. Global config (~/.release-config.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<ReleaseConfig, PublishError> {
        let mut configs: Vec<ReleaseConfig> = vec![ReleaseConfig::default()];

        if !options.skip_global
            && let Some(global_config) = Self::load_global_config(&options.env).await?
        {
            configs.push(global_config);
        }

        let project_config = match &options.config_file {
            Some(path) => Some(Self::load_config_file(path).await?.ok_or_else(|| {
                PublishError::config(format!("Config file not found: {}", path.display()))
            })?),
            None => {
                Self::load_config_file(&options.project_path.join(CONFIG_FILENAME)).await?
            }
        };
        if let Some(project_config) = project_config {
            configs.push(project_config);
        }

        if let Some(env_config) = Self::load_env_config(&options.env) {
            configs.push(env_config);
        }

        if let Some(cli_config) = options.cli_args {
            configs.push(cli_config);
        }

        let merged_config = Self::merge_configs(configs);
        Self::expand_env_vars(merged_config, &options.env)
    }

    /// Load global configuration from ~/.release-config.yaml
    async fn load_global_config(env: &EnvMap) -> Result<Option<ReleaseConfig>, PublishError> {
        let Some(home_dir) = env
            .get("HOME")
            .cloned()
            .or_else(|| env::var("HOME").ok())
        else {
            tracing::debug!("HOME not set, skipping global config");
            return Ok(None);
        };

        Self::load_config_file(&PathBuf::from(home_dir).join(CONFIG_FILENAME)).await
    }

    /// Load configuration from YAML file, following `extends`
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Option<ReleaseConfig>, PublishError>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublishError::config(format!(
                    "Failed to read config file {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let config: ReleaseConfig = serde_yaml::from_str(&content).map_err(|e| {
                PublishError::config(format!(
                    "Failed to parse YAML config {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            tracing::debug!(path = %file_path.display(), "loaded config file");

            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| PublishError::config("Invalid config file path"))?
                    .join(extends_path);

                if base_path == file_path {
                    return Err(PublishError::config(format!(
                        "{} extends itself",
                        file_path.display()
                    )));
                }

                match Self::load_config_file(&base_path).await? {
                    Some(base_config) => {
                        return Ok(Some(Self::merge_configs(vec![base_config, config])));
                    }
                    None => tracing::warn!(
                        base = %base_path.display(),
                        "extended config file not found"
                    ),
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from `RELEASE_*` environment variables
    fn load_env_config(env: &EnvMap) -> Option<ReleaseConfig> {
        let mut config = ReleaseConfig {
            version: String::new(),
            publish: None,
            security: None,
            ..Default::default()
        };
        let mut has_changes = false;

        if let Some(url) = env.get("RELEASE_TEST_REGISTRY_URL") {
            config.registries.test = Some(RegistryEndpointConfig {
                url: Some(url.clone()),
                ..Default::default()
            });
            has_changes = true;
        }

        if let Some(url) = env.get("RELEASE_PRODUCTION_REGISTRY_URL") {
            config.registries.production = Some(RegistryEndpointConfig {
                url: Some(url.clone()),
                ..Default::default()
            });
            has_changes = true;
        }

        if let Some(repository) = env.get("RELEASE_REPOSITORY") {
            config.release_host = Some(ReleaseHostConfig {
                repository: Some(repository.clone()),
                ..Default::default()
            });
            has_changes = true;
        }

        if env.get("RELEASE_NON_INTERACTIVE").map(|s| s.as_str()) == Some("true") {
            config.publish = Some(PublishOptionsConfig {
                interactive: Some(false),
                ..Default::default()
            });
            has_changes = true;
        }

        if let Some(timeout) = env.get("RELEASE_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => {
                    config.network = Some(NetworkConfig {
                        timeout_secs: Some(secs),
                    });
                    has_changes = true;
                }
                Err(_) => tracing::warn!(value = %timeout, "ignoring invalid RELEASE_TIMEOUT_SECS"),
            }
        }

        if has_changes { Some(config) } else { None }
    }

    /// Merge multiple configurations with priority (later wins)
    fn merge_configs(configs: Vec<ReleaseConfig>) -> ReleaseConfig {
        let mut iter = configs.into_iter();
        let mut result = iter.next().unwrap_or_default();

        for config in iter {
            result.merge_from(config);
        }

        result
    }

    /// Expand environment variables in URL and command fields
    ///
    /// Security features:
    /// - Only expands variables matching ${VAR_NAME} pattern
    /// - Respects allowedPrefixes if configured
    /// - Checks forbiddenPatterns if configured
    fn expand_env_vars(mut config: ReleaseConfig, env: &EnvMap) -> Result<ReleaseConfig, PublishError> {
        let expansion = config.env_var_expansion();
        if !expansion.enabled.unwrap_or(true) {
            return Ok(config);
        }

        let allowed_prefixes = expansion.allowed_prefixes.clone();
        let mut forbidden_patterns = Vec::new();
        for pattern in expansion.forbidden_patterns.unwrap_or_default() {
            let regex = Regex::new(&pattern).map_err(|e| {
                PublishError::config(format!("Invalid forbidden pattern {}: {}", pattern, e))
            })?;
            forbidden_patterns.push(regex);
        }

        let expand = |value: &mut Option<String>| {
            if let Some(v) = value {
                *v = Self::expand_string(v, env, &allowed_prefixes, &forbidden_patterns);
            }
        };

        for registry in [&mut config.registries.test, &mut config.registries.production]
            .into_iter()
            .flatten()
        {
            expand(&mut registry.url);
            expand(&mut registry.upload_url);
            expand(&mut registry.index_url);
        }
        if let Some(host) = &mut config.release_host {
            expand(&mut host.api_url);
            expand(&mut host.upload_url);
            expand(&mut host.repository);
        }
        if let Some(build) = &mut config.build {
            expand(&mut build.command);
        }
        if let Some(verify) = &mut config.verify {
            expand(&mut verify.linter);
        }

        Ok(config)
    }

    /// Expand environment variables in a single string
    fn expand_string(
        input: &str,
        env: &EnvMap,
        allowed_prefixes: &Option<Vec<String>>,
        forbidden_patterns: &[Regex],
    ) -> String {
        let mut result = input.to_string();
        for cap in ENV_VAR_REGEX.captures_iter(input) {
            let var_name = &cap[1];

            if forbidden_patterns.iter().any(|p| p.is_match(var_name)) {
                tracing::warn!(var = var_name, "environment variable matches forbidden pattern, skipping");
                continue;
            }

            if let Some(prefixes) = allowed_prefixes
                && !prefixes.iter().any(|prefix| var_name.starts_with(prefix))
            {
                tracing::warn!(var = var_name, "environment variable not allowed by prefix whitelist, skipping");
                continue;
            }

            match env.get(var_name) {
                Some(value) => result = result.replace(&format!("${{{}}}", var_name), value),
                None => tracing::warn!(var = var_name, "environment variable not found"),
            }
        }

        result
    }

    /// Validate configuration
    pub fn validate(config: &ReleaseConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Check version (required)
        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
                expected: Some("string (e.g., \"1.0\")".to_string()),
                actual: Some("empty".to_string()),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            });
        }

        // 2. Registry URLs
        for (field, url) in [
            ("registries.test.url", config.test_registry().api_url),
            ("registries.test.uploadUrl", config.test_registry().upload_url),
            ("registries.test.indexUrl", config.test_registry().index_url),
            ("registries.production.url", config.production_registry().api_url),
            ("registries.production.uploadUrl", config.production_registry().upload_url),
            ("registries.production.indexUrl", config.production_registry().index_url),
            ("releaseHost.apiUrl", config.release_api_url()),
            ("releaseHost.uploadUrl", config.release_upload_url()),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: "URL must use http or https".to_string(),
                    expected: Some("http(s)://...".to_string()),
                    actual: Some(url),
                });
            }
        }

        // 3. Release host
        match config.repository() {
            None => warnings.push(ConfigValidationWarning {
                field: "releaseHost.repository".to_string(),
                message: "No release repository configured; release tagging will fail".to_string(),
                suggestion: Some("Set releaseHost.repository or RELEASE_REPOSITORY".to_string()),
            }),
            Some(repo) if repo.split('/').filter(|p| !p.is_empty()).count() != 2 => {
                errors.push(ConfigValidationError {
                    field: "releaseHost.repository".to_string(),
                    message: "Repository must be owner/name".to_string(),
                    expected: Some("owner/name".to_string()),
                    actual: Some(repo.to_string()),
                })
            }
            Some(_) => {}
        }

        // 4. Verify settings
        if config.max_rebuilds() > MAX_REBUILDS {
            warnings.push(ConfigValidationWarning {
                field: "verify.maxRebuilds".to_string(),
                message: format!(
                    "maxRebuilds {} exceeds the limit and is clamped to {}",
                    config.max_rebuilds(),
                    MAX_REBUILDS
                ),
                suggestion: Some(format!("Use a value between 0 and {}", MAX_REBUILDS)),
            });
        }

        // 5. Build and network settings
        if config.build_command().is_empty() {
            errors.push(ConfigValidationError {
                field: "build.command".to_string(),
                message: "Build command is empty".to_string(),
                expected: Some("non-empty command".to_string()),
                actual: Some("empty".to_string()),
            });
        }
        if config.timeout().is_zero() {
            errors.push(ConfigValidationError {
                field: "network.timeoutSecs".to_string(),
                message: "Timeout must be greater than zero".to_string(),
                expected: Some("positive integer".to_string()),
                actual: Some("0".to_string()),
            });
        }

        if config.import_name().is_none() {
            warnings.push(ConfigValidationWarning {
                field: "installVerify.importName".to_string(),
                message: "No import name configured; the package name will be used".to_string(),
                suggestion: Some("Set project.module or installVerify.importName".to_string()),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
                if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                    lines.push(format!("    Expected: {}", expected));
                    lines.push(format!("    Actual: {}", actual));
                }
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_env_config() {
        let env = env(&[
            ("RELEASE_TEST_REGISTRY_URL", "http://localhost:8080"),
            ("RELEASE_REPOSITORY", "example/demo"),
            ("RELEASE_NON_INTERACTIVE", "true"),
            ("RELEASE_TIMEOUT_SECS", "12"),
        ]);

        let config = ConfigLoader::load_env_config(&env).unwrap();

        assert_eq!(config.test_registry().api_url, "http://localhost:8080");
        assert_eq!(config.repository(), Some("example/demo"));
        assert!(!config.interactive());
        assert_eq!(config.timeout().as_secs(), 12);
    }

    #[test]
    fn test_load_env_config_without_overrides() {
        assert!(ConfigLoader::load_env_config(&env(&[("PATH", "/usr/bin")])).is_none());
    }

    #[test]
    fn test_expand_string() {
        let env = env(&[("RELEASE_HOST", "pypi.internal")]);

        let result = ConfigLoader::expand_string("https://${RELEASE_HOST}/simple/", &env, &None, &[]);

        assert_eq!(result, "https://pypi.internal/simple/");
    }

    #[test]
    fn test_expand_string_with_allowed_prefixes() {
        let env = env(&[("RELEASE_HOST", "pypi.internal"), ("SECRET_KEY", "forbidden")]);
        let allowed_prefixes = Some(vec!["RELEASE_".to_string()]);

        let result =
            ConfigLoader::expand_string("${RELEASE_HOST}-${SECRET_KEY}", &env, &allowed_prefixes, &[]);

        assert_eq!(result, "pypi.internal-${SECRET_KEY}");
    }

    #[test]
    fn test_expand_string_with_forbidden_patterns() {
        let env = env(&[("PYPI_TOKEN", "secret"), ("RELEASE_HOST", "pypi.internal")]);
        let forbidden = vec![Regex::new("TOKEN").unwrap()];

        let result = ConfigLoader::expand_string("${RELEASE_HOST}/${PYPI_TOKEN}", &env, &None, &forbidden);

        assert_eq!(result, "pypi.internal/${PYPI_TOKEN}");
    }

    #[tokio::test]
    async fn test_load_project_config_with_extends() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("base.yaml"),
            r#"
version: "1.0"
project:
  name: demo-pkg
  module: demo_pkg
registries:
  test:
    url: http://base
"#,
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILENAME),
            r#"
extends: base.yaml
registries:
  test:
    url: http://${RELEASE_HOST}
releaseHost:
  repository: example/demo
"#,
        )
        .unwrap();

        let config = ConfigLoader::load(ConfigLoadOptions {
            project_path: temp_dir.path().to_path_buf(),
            env: env(&[("RELEASE_HOST", "project"), ("RELEASE_NON_INTERACTIVE", "true")]),
            skip_global: true,
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(config.project_name(), Some("demo-pkg"));
        assert_eq!(config.test_registry().api_url, "http://project");
        assert_eq!(config.repository(), Some("example/demo"));
        assert!(!config.interactive());
        // Untouched defaults survive the merge
        assert!(config.confirm_required());
    }

    #[tokio::test]
    async fn test_cli_overrides_project_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILENAME),
            "network:\n  timeoutSecs: 60\n",
        )
        .unwrap();

        let cli = ReleaseConfig {
            version: String::new(),
            network: Some(NetworkConfig {
                timeout_secs: Some(5),
            }),
            ..Default::default()
        };

        let config = ConfigLoader::load(ConfigLoadOptions {
            project_path: temp_dir.path().to_path_buf(),
            cli_args: Some(cli),
            skip_global: true,
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(config.timeout().as_secs(), 5);
    }

    #[tokio::test]
    async fn test_explicit_config_file_must_exist() {
        let temp_dir = TempDir::new().unwrap();

        let result = ConfigLoader::load(ConfigLoadOptions {
            project_path: temp_dir.path().to_path_buf(),
            config_file: Some(temp_dir.path().join("missing.yaml")),
            skip_global: true,
            ..Default::default()
        })
        .await;

        assert!(matches!(result, Err(PublishError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILENAME), "network: [unclosed").unwrap();

        let result = ConfigLoader::load(ConfigLoadOptions {
            project_path: temp_dir.path().to_path_buf(),
            skip_global: true,
            ..Default::default()
        })
        .await;

        assert_eq!(result.unwrap_err().code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_validate_version_required() {
        let config = ReleaseConfig {
            version: String::new(),
            release_host: Some(ReleaseHostConfig {
                repository: Some("example/demo".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "version");
    }

    #[test]
    fn test_validate_clamps_max_rebuilds_with_warning() {
        let config = ReleaseConfig {
            verify: Some(VerifyConfig {
                max_rebuilds: Some(5),
                linter: None,
            }),
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);

        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.field == "verify.maxRebuilds"));
    }

    #[test]
    fn test_validate_repository_shape() {
        let config = ReleaseConfig {
            release_host: Some(ReleaseHostConfig {
                repository: Some("not-a-repo".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);

        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "releaseHost.repository");
    }

    #[test]
    fn test_validate_rejects_non_http_urls() {
        let config = ReleaseConfig {
            registries: RegistryConfigs {
                test: Some(RegistryEndpointConfig {
                    url: Some("ftp://example".to_string()),
                    ..Default::default()
                }),
                production: None,
            },
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);

        assert!(result.errors.iter().any(|e| e.field == "registries.test.url"));
    }

    #[test]
    fn test_format_validation_result() {
        let result = ConfigValidationResult {
            valid: false,
            errors: vec![ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
                expected: Some("string".to_string()),
                actual: Some("empty".to_string()),
            }],
            warnings: vec![ConfigValidationWarning {
                field: "releaseHost.repository".to_string(),
                message: "No release repository configured".to_string(),
                suggestion: Some("Set RELEASE_REPOSITORY".to_string()),
            }],
        };

        let formatted = ConfigLoader::format_validation_result(&result);

        assert!(formatted.contains("❌ Configuration has errors"));
        assert!(formatted.contains("🔴 Errors:"));
        assert!(formatted.contains("[version]"));
        assert!(formatted.contains("🟡 Warnings:"));
        assert!(formatted.contains("[releaseHost.repository]"));
    }
}
