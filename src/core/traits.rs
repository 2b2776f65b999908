//! Core traits and types for wheel releases
//!
//! This module defines the release data model (artifacts, version sources,
//! publish targets, phase results) and the collaborator traits the
//! orchestrator drives: registry access, building, verification, install
//! checks and production confirmation.

use crate::core::error::PublishError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

lazy_static! {
    static ref NAME_SEPARATORS: Regex = Regex::new(r"[-_.]+").unwrap();
}

/// Normalize a distribution name: lowercase, runs of `-`, `_`, `.` become `-`
pub fn normalize_package_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name.trim(), "-")
        .to_lowercase()
}

/// Release tag for a version/variant pair
pub fn release_tag(version: &str, variant: &str) -> String {
    format!("v{}-{}", version, variant)
}

// ============================================================================
// Artifact
// ============================================================================

/// A single built wheel for one build variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub package_name: String,
    pub variant: String,
    version: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, package_name: &str, variant: &str) -> Self {
        Self {
            path: path.into(),
            package_name: normalize_package_name(package_name),
            variant: variant.to_string(),
            version: None,
        }
    }

    /// Resolved version, once finalized
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Attach the resolved version. A finalized version never changes.
    pub fn finalize_version(&mut self, version: &str) -> Result<(), PublishError> {
        match &self.version {
            Some(existing) if existing != version => Err(PublishError::InvalidTransition {
                target: self.variant.clone(),
                message: format!(
                    "version already finalized as {}, refusing {}",
                    existing, version
                ),
            }),
            Some(_) => Ok(()),
            None => {
                self.version = Some(version.to_string());
                Ok(())
            }
        }
    }

    /// Same artifact produced again by a rebuild at a (possibly) new path
    pub fn rebuilt_at(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

// ============================================================================
// Version sources
// ============================================================================

/// Where a version string came from, in fixed priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    Filename,
    VersionControlTag,
    InstalledPackage,
}

impl VersionSource {
    /// Higher rank wins
    pub fn rank(&self) -> u8 {
        match self {
            Self::Filename => 3,
            Self::VersionControlTag => 2,
            Self::InstalledPackage => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::VersionControlTag => "version-control-tag",
            Self::InstalledPackage => "installed-package",
        }
    }
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Publish targets
// ============================================================================

/// Remote systems a release is pushed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishTarget {
    TestRegistry,
    ProductionRegistry,
    ReleaseHost,
}

impl PublishTarget {
    /// Short name used in logs, errors and the token manager
    pub fn name(&self) -> &'static str {
        match self {
            Self::TestRegistry => "testpypi",
            Self::ProductionRegistry => "pypi",
            Self::ReleaseHost => "github",
        }
    }

    /// Only production uploads need an explicit go-ahead
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::ProductionRegistry)
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Steps of the release pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discover,
    Verify,
    TestPublish,
    InstallVerify,
    ProductionPublish,
    ReleaseTag,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Discover,
        Phase::Verify,
        Phase::TestPublish,
        Phase::InstallVerify,
        Phase::ProductionPublish,
        Phase::ReleaseTag,
    ];

    pub fn next(&self) -> Option<Phase> {
        let index = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(index + 1).copied()
    }

    /// Phases whose failure means the artifact was never proven releasable
    pub fn is_gate(&self) -> bool {
        *self <= Phase::InstallVerify
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Verify => "verify",
            Self::TestPublish => "test-publish",
            Self::InstallVerify => "install-verify",
            Self::ProductionPublish => "production-publish",
            Self::ReleaseTag => "release-tag",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PhaseStatus {
    Skipped(String),
    Succeeded,
    Failed(String),
}

impl PhaseStatus {
    /// Later phases may run after this status
    pub fn allows_next(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(cause) => write!(f, "failed ({})", cause),
        }
    }
}

/// Recorded result of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Number of attempts made (only Verify ever exceeds 1)
    pub attempts: u32,
    pub duration_ms: u64,
}

// ============================================================================
// Verification
// ============================================================================

/// A single problem found while inspecting a wheel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    /// Archive does not open or an entry fails its CRC
    CorruptArchive(String),
    /// Filename does not follow `{package}-{version}-{tags}.whl`
    NamingConvention(String),
    MissingMetadata,
    MissingRecord,
    MissingWheelInfo,
    MissingPayload(String),
    LinterFailed(String),
}

impl FailureKind {
    /// Advisory problems are reported but never fail verification
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::NamingConvention(_))
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptArchive(detail) => write!(f, "corrupt archive: {}", detail),
            Self::NamingConvention(detail) => write!(f, "naming convention: {}", detail),
            Self::MissingMetadata => f.write_str("missing .dist-info/METADATA"),
            Self::MissingRecord => f.write_str("missing .dist-info/RECORD"),
            Self::MissingWheelInfo => f.write_str("missing .dist-info/WHEEL"),
            Self::MissingPayload(module) => write!(f, "missing payload package {}", module),
            Self::LinterFailed(detail) => write!(f, "linter failed: {}", detail),
        }
    }
}

/// Result of inspecting a wheel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub failures: Vec<FailureKind>,
}

impl VerificationOutcome {
    pub fn from_failures(failures: Vec<FailureKind>) -> Self {
        let passed = failures.iter().all(FailureKind::is_advisory);
        Self { passed, failures }
    }

    /// Non-advisory failures joined for display
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .filter(|f| !f.is_advisory())
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Publishing
// ============================================================================

/// Result of a publish or tag call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub target: PublishTarget,
    /// The registry reported the file as already present and skipped it
    pub already_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Existence checks and writes against the test registry, the production
/// registry and the release host
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Does `version` of `package_name` exist on a package index?
    ///
    /// An unreachable index answers `Ok(false)` so an outage never blocks
    /// publishing; the index's own duplicate rejection stays the final
    /// authority. A timed-out query is an error. `ReleaseHost` is rejected;
    /// releases are looked up by tag with `tag_exists`.
    async fn exists(
        &self,
        package_name: &str,
        version: &str,
        target: PublishTarget,
    ) -> Result<bool, PublishError>;

    /// Does a release for `tag` exist on the release host? Same error rules
    /// as `exists`.
    async fn tag_exists(&self, tag: &str) -> Result<bool, PublishError>;

    /// Upload the artifact. Must tolerate an already-published file.
    async fn publish(
        &self,
        artifact: &Artifact,
        target: PublishTarget,
    ) -> Result<PublishResult, PublishError>;

    /// Create the `v{version}-{variant}` release and attach the wheel
    async fn tag_release(
        &self,
        package_name: &str,
        version: &str,
        variant: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError>;

    /// Attach the wheel to the existing release for `tag` unless it already
    /// carries it. `already_present` reports a complete release.
    async fn complete_release(
        &self,
        tag: &str,
        artifact_path: &Path,
    ) -> Result<PublishResult, PublishError>;
}

/// External build step producing a wheel for a variant
#[async_trait]
pub trait BuildCollaborator: Send + Sync {
    async fn build(&self, variant: &str, version_spec: Option<&str>)
    -> Result<PathBuf, PublishError>;
}

/// Structural inspection of a built wheel
#[async_trait]
pub trait VerifyArtifact: Send + Sync {
    async fn verify(&self, artifact: &Artifact) -> VerificationOutcome;
}

/// Delegated distribution-format lint (e.g. `twine check`)
#[async_trait]
pub trait DistributionLinter: Send + Sync {
    async fn check(&self, path: &Path) -> Result<(), String>;
}

/// Installs the released version from the test registry into a disposable
/// environment, imports it and reports the installed version
#[async_trait]
pub trait InstallVerifier: Send + Sync {
    async fn verify_install(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<String, PublishError>;
}

/// External go-ahead for irreversible uploads
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    async fn confirm(&self, artifact: &Artifact, target: PublishTarget) -> bool;
}
