//! Error handling for wheel releases
//!
//! One error type covers every failure a release phase can produce. Errors
//! are local to a single artifact's phase chain: the orchestrator turns them
//! into `PhaseStatus::Failed` and never lets them cross artifact boundaries.

use crate::security::command_executor::CommandError;
use thiserror::Error;

/// Main error type for release operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    // Discovery errors
    #[error("[{target}] no version source yielded a version for {artifact}")]
    VersionUnresolved { target: String, artifact: String },

    #[error("[{target}] build failed: {message}")]
    BuildFailed { target: String, message: String },

    // Verification errors
    #[error("[{target}] artifact verification failed after {attempts} attempt(s): {message}")]
    VerificationFailed {
        target: String,
        attempts: u32,
        message: String,
    },

    // Registry errors
    #[error("[{target}] registry unreachable: {message}")]
    RegistryUnreachable { target: String, message: String },

    #[error("[{target}] publish rejected: {message}")]
    PublishRejected { target: String, message: String },

    #[error("[{target}] version {version} already exists")]
    VersionConflict { target: String, version: String },

    #[error("[{target}] authentication failed")]
    AuthenticationFailed { target: String },

    #[error("[{target}] release tag {tag} already exists")]
    TagAlreadyExists { target: String, tag: String },

    // Gate errors
    #[error("[{target}] publish declined")]
    ConfirmationDeclined { target: String },

    #[error("[{target}] install verification failed: {message}")]
    InstallVerifyFailed { target: String, message: String },

    // Execution errors
    #[error("[{target}] timed out after {seconds}s")]
    TimeoutError { target: String, seconds: u64 },

    #[error("[{target}] command error: {message}")]
    CommandError { target: String, message: String },

    #[error("[{target}] configuration error: {message}")]
    ConfigError { target: String, message: String },

    #[error("[{target}] invalid phase transition: {message}")]
    InvalidTransition { target: String, message: String },

    #[error("[{target}] cancelled")]
    Cancelled { target: String },
}

impl PublishError {
    /// Wrap a command execution failure for the given target
    pub fn from_command(target: &str, error: CommandError) -> Self {
        match error {
            CommandError::Timeout(duration) => Self::TimeoutError {
                target: target.to_string(),
                seconds: duration.as_secs(),
            },
            other => Self::CommandError {
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Shorthand for configuration errors raised outside any target
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            target: "config".to_string(),
            message: message.into(),
        }
    }

    /// Get the target name associated with this error
    pub fn target(&self) -> &str {
        match self {
            Self::VersionUnresolved { target, .. }
            | Self::BuildFailed { target, .. }
            | Self::VerificationFailed { target, .. }
            | Self::RegistryUnreachable { target, .. }
            | Self::PublishRejected { target, .. }
            | Self::VersionConflict { target, .. }
            | Self::AuthenticationFailed { target }
            | Self::TagAlreadyExists { target, .. }
            | Self::ConfirmationDeclined { target }
            | Self::InstallVerifyFailed { target, .. }
            | Self::TimeoutError { target, .. }
            | Self::CommandError { target, .. }
            | Self::ConfigError { target, .. }
            | Self::InvalidTransition { target, .. }
            | Self::Cancelled { target } => target,
        }
    }

    /// Check if a rerun of the same phase could succeed without user changes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RegistryUnreachable { .. }
                | Self::TimeoutError { .. }
                | Self::VersionConflict { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::VersionUnresolved { .. } => vec![
                "Check that the wheel filename follows {name}-{version}-{tags}.whl",
                "Create a version tag (e.g. v1.2.3) in the source repository",
            ],
            Self::BuildFailed { .. } => vec![
                "Inspect the build output above",
                "Run the build command manually for this variant",
            ],
            Self::VerificationFailed { .. } => vec![
                "Inspect the wheel contents with `unzip -l`",
                "Run `twine check` on the wheel",
                "Rebuild the variant from a clean tree",
            ],
            Self::RegistryUnreachable { .. } => vec![
                "Check network connectivity",
                "Wait a moment and rerun; completed phases will be skipped",
            ],
            Self::PublishRejected { .. } => vec![
                "Read the registry response above",
                "Check that the package name is owned by this account",
            ],
            Self::VersionConflict { .. } => vec![
                "Bump the version; registries never accept a re-upload of the same file",
            ],
            Self::AuthenticationFailed { .. } => vec![
                "Check TEST_PYPI_TOKEN / PYPI_TOKEN / GITHUB_TOKEN",
                "Check the token scope and expiry",
            ],
            Self::TagAlreadyExists { .. } => vec![
                "The release already exists on the release host; rerun to skip it",
            ],
            Self::ConfirmationDeclined { .. } => vec![
                "Rerun interactively, or pass --yes to pre-authorize the production upload",
            ],
            Self::InstallVerifyFailed { .. } => vec![
                "Install the package from the test registry manually and import it",
                "Check that all dependencies are available on the configured indexes",
            ],
            Self::TimeoutError { .. } => vec![
                "Check network conditions",
                "Increase network.timeoutSecs in .release-config.yaml",
            ],
            Self::CommandError { .. } => vec![
                "Check the command output",
                "Make sure python, twine and git are installed",
            ],
            Self::ConfigError { .. } => vec!["Check .release-config.yaml and build_config.json"],
            Self::InvalidTransition { .. } => vec!["Delete the .release-state directory and rerun"],
            Self::Cancelled { .. } => vec!["Rerun to resume; completed phases will be skipped"],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::VersionUnresolved { .. } => "VERSION_UNRESOLVED",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::VerificationFailed { .. } => "VERIFICATION_FAILED",
            Self::RegistryUnreachable { .. } => "REGISTRY_UNREACHABLE",
            Self::PublishRejected { .. } => "PUBLISH_REJECTED",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Self::TagAlreadyExists { .. } => "TAG_ALREADY_EXISTS",
            Self::ConfirmationDeclined { .. } => "CONFIRMATION_DECLINED",
            Self::InstallVerifyFailed { .. } => "INSTALL_VERIFY_FAILED",
            Self::TimeoutError { .. } => "TIMEOUT_ERROR",
            Self::CommandError { .. } => "COMMAND_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}
