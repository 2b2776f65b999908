//! Secure token manager with memory-safe handling and masking capabilities
//!
//! Registry and release-host credentials are read from the environment into
//! `SecretString` so they never show up in `Debug` output, and any string
//! that may carry one (command output, error messages) can be masked before
//! it is logged.

use crate::core::traits::PublishTarget;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;

/// Environment variable holding each target's credential
const TARGET_TOKENS: &[(PublishTarget, &str)] = &[
    (PublishTarget::TestRegistry, "TEST_PYPI_TOKEN"),
    (PublishTarget::ProductionRegistry, "PYPI_TOKEN"),
    (PublishTarget::ReleaseHost, "GITHUB_TOKEN"),
];

/// Secure token manager for registry and release-host authentication
///
/// # Examples
///
/// ```
/// use wheel_publisher::core::PublishTarget;
/// use wheel_publisher::security::SecureTokenManager;
/// use secrecy::ExposeSecret;
///
/// let manager = SecureTokenManager::new();
/// if let Some(token) = manager.token_for(PublishTarget::ProductionRegistry) {
///     println!("PyPI token found: {}", manager.mask_token(token.expose_secret()));
/// }
/// ```
#[derive(Clone)]
pub struct SecureTokenManager {
    env_vars: HashMap<PublishTarget, String>,
}

impl Default for SecureTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureTokenManager {
    pub fn new() -> Self {
        let env_vars = TARGET_TOKENS
            .iter()
            .map(|(target, var)| (*target, var.to_string()))
            .collect();

        Self { env_vars }
    }

    /// Read `target`'s credential from `var` instead of the default variable
    pub fn with_env_var(mut self, target: PublishTarget, var: &str) -> Self {
        self.env_vars.insert(target, var.to_string());
        self
    }

    /// Token for `target`; `None` when the variable is unset or blank
    pub fn token_for(&self, target: PublishTarget) -> Option<SecretString> {
        let value = env::var(self.env_var(target)?).ok()?;
        if value.trim().is_empty() {
            return None;
        }
        Some(SecretString::new(value.into()))
    }

    pub fn has_token(&self, target: PublishTarget) -> bool {
        self.token_for(target).is_some()
    }

    pub fn env_var(&self, target: PublishTarget) -> Option<&str> {
        self.env_vars.get(&target).map(String::as_str)
    }

    /// Masks a token for safe logging
    ///
    /// Shows only the first 3 and last 3 characters. Tokens shorter than 10
    /// characters are fully masked as "****".
    ///
    /// ```
    /// use wheel_publisher::security::SecureTokenManager;
    ///
    /// let manager = SecureTokenManager::new();
    /// assert_eq!(manager.mask_token("abcdef123456"), "abc...456");
    /// assert_eq!(manager.mask_token("short"), "****");
    /// ```
    pub fn mask_token(&self, token: &str) -> String {
        if token.len() < 10 || !token.is_ascii() {
            return "****".to_string();
        }
        format!("{}...{}", &token[..3], &token[token.len() - 3..])
    }

    /// Replace every configured credential found in `text` with its mask
    pub fn mask_tokens_in_string(&self, text: &str) -> String {
        self.env_vars
            .keys()
            .filter_map(|target| self.token_for(*target))
            .fold(text.to_string(), |masked, token| {
                let secret = token.expose_secret();
                masked.replace(secret, &self.mask_token(secret))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mappings() {
        let manager = SecureTokenManager::default();
        assert_eq!(manager.env_var(PublishTarget::TestRegistry), Some("TEST_PYPI_TOKEN"));
        assert_eq!(manager.env_var(PublishTarget::ProductionRegistry), Some("PYPI_TOKEN"));
        assert_eq!(manager.env_var(PublishTarget::ReleaseHost), Some("GITHUB_TOKEN"));
    }

    #[test]
    fn test_token_read_from_environment() {
        unsafe {
            env::set_var("WHEEL_PUBLISHER_TEST_TOKEN_A", "test-pypi-token-12345");
        }
        let manager = SecureTokenManager::new()
            .with_env_var(PublishTarget::TestRegistry, "WHEEL_PUBLISHER_TEST_TOKEN_A");

        let token = manager.token_for(PublishTarget::TestRegistry).unwrap();
        assert_eq!(token.expose_secret(), "test-pypi-token-12345");
        unsafe {
            env::remove_var("WHEEL_PUBLISHER_TEST_TOKEN_A");
        }
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        unsafe {
            env::set_var("WHEEL_PUBLISHER_TEST_TOKEN_B", "   ");
        }
        let manager = SecureTokenManager::new()
            .with_env_var(PublishTarget::ReleaseHost, "WHEEL_PUBLISHER_TEST_TOKEN_B");

        assert!(!manager.has_token(PublishTarget::ReleaseHost));
        unsafe {
            env::remove_var("WHEEL_PUBLISHER_TEST_TOKEN_B");
        }
    }

    #[test]
    fn test_mask_token() {
        let manager = SecureTokenManager::new();
        assert_eq!(manager.mask_token("short"), "****");
        assert_eq!(manager.mask_token(""), "****");
        assert_eq!(manager.mask_token("pypi-AgEIcHlwaS5vcmc"), "pyp...cmc");
    }

    #[test]
    fn test_mask_tokens_in_string() {
        unsafe {
            env::set_var("WHEEL_PUBLISHER_TEST_TOKEN_C", "secret-pypi-token-12345");
        }
        let manager = SecureTokenManager::new()
            .with_env_var(PublishTarget::ProductionRegistry, "WHEEL_PUBLISHER_TEST_TOKEN_C");

        let output = manager.mask_tokens_in_string("upload failed for password secret-pypi-token-12345");
        assert!(output.contains("sec...345"));
        assert!(!output.contains("secret-pypi-token-12345"));
        assert_eq!(manager.mask_tokens_in_string("nothing to hide"), "nothing to hide");
        unsafe {
            env::remove_var("WHEEL_PUBLISHER_TEST_TOKEN_C");
        }
    }
}
