//! Build variant definitions (`build_config.json`)
//!
//! Each variant names the distribution it produces and the CPU feature
//! flags the build is compiled with.

use crate::core::error::PublishError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

const REQUIRED_KEYS: &[&str] = &["package_name", "description", "flags", "platforms", "keywords"];
const REQUIRED_FLAGS: &[&str] = &[
    "disable_avx512",
    "enable_avx512vnni",
    "enable_avx512bf16",
    "enable_amxbf16",
];

/// CPU feature flags for one variant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VariantFlags {
    pub disable_avx512: bool,
    pub enable_avx512vnni: bool,
    pub enable_avx512bf16: bool,
    pub enable_amxbf16: bool,
}

/// One entry of the `builds` map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantConfig {
    pub package_name: String,
    pub description: String,
    pub flags: VariantFlags,
    pub platforms: Vec<String>,
    pub keywords: Vec<String>,
}

impl VariantConfig {
    /// Environment passed to the build command
    pub fn build_env(&self) -> Vec<(String, String)> {
        let flag = |on: bool| (if on { "1" } else { "0" }).to_string();

        let mut env = vec![
            ("VLLM_TARGET_DEVICE".to_string(), "cpu".to_string()),
            (
                "VLLM_CPU_DISABLE_AVX512".to_string(),
                flag(self.flags.disable_avx512),
            ),
        ];
        if self.flags.enable_avx512vnni {
            env.push(("VLLM_CPU_AVX512VNNI".to_string(), "1".to_string()));
        }
        if self.flags.enable_avx512bf16 {
            env.push(("VLLM_CPU_AVX512BF16".to_string(), "1".to_string()));
        }
        if self.flags.enable_amxbf16 {
            env.push(("VLLM_CPU_AMXBF16".to_string(), "1".to_string()));
        }
        env
    }

    /// Enabled instruction set extensions, or "baseline"
    pub fn isa_features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if !self.flags.disable_avx512 {
            features.push("AVX512");
        }
        if self.flags.enable_avx512vnni {
            features.push("VNNI");
        }
        if self.flags.enable_avx512bf16 {
            features.push("BF16");
        }
        if self.flags.enable_amxbf16 {
            features.push("AMX");
        }
        if features.is_empty() {
            features.push("baseline");
        }
        features
    }

    /// Distribution name as it appears in wheel filenames
    pub fn wheel_name(&self) -> String {
        self.package_name.replace('-', "_")
    }
}

/// Parsed `build_config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    pub builds: BTreeMap<String, VariantConfig>,
}

impl BuildConfig {
    pub async fn load(path: &Path) -> Result<Self, PublishError> {
        if !path.is_file() {
            return Err(PublishError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            PublishError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate the JSON document
    pub fn parse(content: &str) -> Result<Self, PublishError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PublishError::config(format!("Invalid JSON in configuration file: {}", e)))?;

        let builds = value
            .get("builds")
            .ok_or_else(|| PublishError::config("'builds' key not found in configuration"))?
            .as_object()
            .ok_or_else(|| PublishError::config("'builds' must be a dictionary"))?;

        let mut parsed = BTreeMap::new();
        for (name, entry) in builds {
            Self::validate_variant(name, entry)?;
            let variant: VariantConfig = serde_json::from_value(entry.clone()).map_err(|e| {
                PublishError::config(format!("Invalid variant '{}': {}", name, e))
            })?;
            parsed.insert(name.clone(), variant);
        }

        Ok(Self { builds: parsed })
    }

    fn validate_variant(name: &str, entry: &Value) -> Result<(), PublishError> {
        for key in REQUIRED_KEYS {
            if entry.get(key).is_none() {
                return Err(PublishError::config(format!(
                    "'{}' missing in variant '{}'",
                    key, name
                )));
            }
        }

        let package_name = entry
            .get("package_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                PublishError::config(format!("Invalid package_name in variant '{}'", name))
            })?;
        if !package_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PublishError::config(format!(
                "Invalid characters in package_name '{}'",
                package_name
            )));
        }

        let flags = entry
            .get("flags")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                PublishError::config(format!("'flags' must be a dictionary in variant '{}'", name))
            })?;
        for flag in REQUIRED_FLAGS {
            if !flags.contains_key(*flag) {
                return Err(PublishError::config(format!(
                    "Flag '{}' missing in variant '{}'",
                    flag, name
                )));
            }
        }

        Ok(())
    }

    pub fn variant(&self, name: &str) -> Result<&VariantConfig, PublishError> {
        self.builds.get(name).ok_or_else(|| {
            PublishError::config(format!(
                "Unknown variant '{}' (available: {})",
                name,
                self.variant_names().join(", ")
            ))
        })
    }

    pub fn variant_names(&self) -> Vec<String> {
        self.builds.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  "builds": {
    "noavx512": {
      "package_name": "vllm-cpu",
      "description": "baseline build",
      "flags": {
        "disable_avx512": true,
        "enable_avx512vnni": false,
        "enable_avx512bf16": false,
        "enable_amxbf16": false
      },
      "platforms": ["x86_64", "aarch64"],
      "keywords": ["cpu"]
    },
    "avx512bf16": {
      "package_name": "vllm-cpu-avx512bf16",
      "description": "AVX512 with BF16",
      "flags": {
        "disable_avx512": false,
        "enable_avx512vnni": true,
        "enable_avx512bf16": true,
        "enable_amxbf16": false
      },
      "platforms": ["x86_64"],
      "keywords": ["cpu", "avx512"]
    }
  }
}"#;

    #[test]
    fn test_parse_sample_config() {
        let config = BuildConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.variant_names(), vec!["avx512bf16", "noavx512"]);
        let variant = config.variant("noavx512").unwrap();
        assert_eq!(variant.package_name, "vllm-cpu");
        assert_eq!(variant.wheel_name(), "vllm_cpu");
    }

    #[test]
    fn test_build_env_for_baseline() {
        let config = BuildConfig::parse(SAMPLE).unwrap();
        let env = config.variant("noavx512").unwrap().build_env();

        assert_eq!(
            env,
            vec![
                ("VLLM_TARGET_DEVICE".to_string(), "cpu".to_string()),
                ("VLLM_CPU_DISABLE_AVX512".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_env_for_avx512() {
        let config = BuildConfig::parse(SAMPLE).unwrap();
        let env = config.variant("avx512bf16").unwrap().build_env();

        assert!(env.contains(&("VLLM_CPU_DISABLE_AVX512".to_string(), "0".to_string())));
        assert!(env.contains(&("VLLM_CPU_AVX512VNNI".to_string(), "1".to_string())));
        assert!(env.contains(&("VLLM_CPU_AVX512BF16".to_string(), "1".to_string())));
        assert!(!env.iter().any(|(k, _)| k == "VLLM_CPU_AMXBF16"));
    }

    #[test]
    fn test_isa_features() {
        let config = BuildConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.variant("noavx512").unwrap().isa_features(), vec!["baseline"]);
        assert_eq!(
            config.variant("avx512bf16").unwrap().isa_features(),
            vec!["AVX512", "VNNI", "BF16"]
        );
    }

    #[test]
    fn test_missing_builds_key() {
        let err = BuildConfig::parse(r#"{"variants": {}}"#).unwrap_err();
        assert!(err.to_string().contains("'builds' key not found"));
    }

    #[test]
    fn test_missing_flag() {
        let json = r#"{"builds": {"x": {
            "package_name": "x", "description": "", "platforms": [], "keywords": [],
            "flags": {"disable_avx512": true, "enable_avx512vnni": false, "enable_avx512bf16": false}
        }}}"#;
        let err = BuildConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Flag 'enable_amxbf16' missing in variant 'x'"));
    }

    #[test]
    fn test_invalid_package_name_characters() {
        let json = r#"{"builds": {"x": {
            "package_name": "bad name!", "description": "", "platforms": [], "keywords": [],
            "flags": {"disable_avx512": true, "enable_avx512vnni": false,
                      "enable_avx512bf16": false, "enable_amxbf16": false}
        }}}"#;
        let err = BuildConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Invalid characters"));
    }

    #[test]
    fn test_unknown_variant() {
        let config = BuildConfig::parse(SAMPLE).unwrap();
        let err = config.variant("amx").unwrap_err();
        assert!(err.to_string().contains("available: avx512bf16, noavx512"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = BuildConfig::load(&temp_dir.path().join("build_config.json")).await;
        assert_eq!(result.unwrap_err().code(), "CONFIG_ERROR");
    }
}
