//! Version resolution across prioritized sources
//!
//! Each source is a lookup returning `Some(version)` or `None`. Lookups are
//! tried in fixed rank order (filename, version-control tag, installed
//! package) and the first valid answer wins. Lower-ranked sources are only
//! ever compared against the winner, never allowed to override it.
//!
//! # Example
//!
//! ```
//! use wheel_publisher::validation::version_resolver::is_valid_version;
//!
//! assert!(is_valid_version("0.11.2.post1"));
//! assert!(!is_valid_version("latest"));
//! ```

use crate::build::discovery::WheelFilename;
use crate::core::error::PublishError;
use crate::core::traits::{Artifact, VersionSource};
use crate::security::command_executor::SafeCommandExecutor;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::Path;

lazy_static! {
    /// Public PEP 440 version, with optional leading `v`
    static ref PEP440: Regex = Regex::new(
        r"(?i)^v?(\d+!)?\d+(\.\d+)*((a|b|rc)\d+)?(\.post\d+)?(\.dev\d+)?(\+[a-z0-9]+(\.[a-z0-9]+)*)?$"
    )
    .unwrap();
}

/// Check a version string against the PEP 440 public version shape
pub fn is_valid_version(version: &str) -> bool {
    PEP440.is_match(version.trim())
}

/// Canonical form used for comparisons: trimmed, lowercase, no leading `v`
pub fn normalize_version(version: &str) -> String {
    let trimmed = version.trim().to_lowercase();
    trimmed.strip_prefix('v').unwrap_or(&trimmed).to_string()
}

/// Version part of a release tag: `v2.0.0-demo-pkg` → `2.0.0`
pub fn version_from_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let version = tag.split('-').next()?;
    if is_valid_version(version) {
        Some(version.to_string())
    } else {
        None
    }
}

/// Winning version and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    pub source: VersionSource,
}

/// Disagreement between the resolved version and a lower-ranked source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub resolved: ResolvedVersion,
    pub source: VersionSource,
    pub observed: String,
}

impl fmt::Display for VersionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reports {} but {} resolved {} (keeping {})",
            self.source,
            self.observed,
            self.resolved.source,
            self.resolved.version,
            self.resolved.version
        )
    }
}

/// One version source
#[async_trait]
pub trait VersionLookup: Send + Sync {
    fn source(&self) -> VersionSource;

    /// `None` when the source has nothing to say about this artifact
    async fn lookup(&self, artifact: &Artifact) -> Option<String>;
}

/// Version field of a conforming wheel filename
pub struct FilenameLookup;

#[async_trait]
impl VersionLookup for FilenameLookup {
    fn source(&self) -> VersionSource {
        VersionSource::Filename
    }

    async fn lookup(&self, artifact: &Artifact) -> Option<String> {
        WheelFilename::from_path(&artifact.path).map(|w| w.version)
    }
}

/// Most recent tag reachable from HEAD in the source repository
pub struct GitTagLookup {
    executor: SafeCommandExecutor,
}

impl GitTagLookup {
    pub fn new(repo_dir: &Path) -> Result<Self, PublishError> {
        let executor = SafeCommandExecutor::new(repo_dir)
            .map_err(|e| PublishError::from_command("git", e))?;
        Ok(Self { executor })
    }
}

#[async_trait]
impl VersionLookup for GitTagLookup {
    fn source(&self) -> VersionSource {
        VersionSource::VersionControlTag
    }

    async fn lookup(&self, _artifact: &Artifact) -> Option<String> {
        let output = self
            .executor
            .execute("git", &["describe", "--tags", "--abbrev=0"])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        version_from_tag(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Version reported by an installed distribution's metadata
pub struct InstalledPackageLookup {
    executor: SafeCommandExecutor,
    python: String,
}

impl InstalledPackageLookup {
    pub fn new(working_dir: &Path, python: &str) -> Result<Self, PublishError> {
        let executor = SafeCommandExecutor::new(working_dir)
            .map_err(|e| PublishError::from_command("python", e))?;
        Ok(Self {
            executor,
            python: python.to_string(),
        })
    }
}

#[async_trait]
impl VersionLookup for InstalledPackageLookup {
    fn source(&self) -> VersionSource {
        VersionSource::InstalledPackage
    }

    async fn lookup(&self, artifact: &Artifact) -> Option<String> {
        let output = self
            .executor
            .execute(
                &self.python,
                &[
                    "-c",
                    "import sys, importlib.metadata as m; print(m.version(sys.argv[1]))",
                    &artifact.package_name,
                ],
            )
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() { None } else { Some(version) }
    }
}

/// Prioritized chain of version lookups
pub struct VersionResolver {
    lookups: Vec<Box<dyn VersionLookup>>,
}

impl VersionResolver {
    /// Lookups are reordered by source rank, highest first
    pub fn new(mut lookups: Vec<Box<dyn VersionLookup>>) -> Self {
        lookups.sort_by_key(|p| std::cmp::Reverse(p.source().rank()));
        Self { lookups }
    }

    /// Filename, then git tag of `repo_dir`, then installed metadata
    pub fn standard(repo_dir: &Path, python: &str) -> Result<Self, PublishError> {
        Ok(Self::new(vec![
            Box::new(FilenameLookup),
            Box::new(GitTagLookup::new(repo_dir)?),
            Box::new(InstalledPackageLookup::new(repo_dir, python)?),
        ]))
    }

    /// First valid version in rank order
    pub async fn resolve(&self, artifact: &Artifact) -> Result<ResolvedVersion, PublishError> {
        for lookup in &self.lookups {
            let source = lookup.source();
            match lookup.lookup(artifact).await {
                Some(version) if is_valid_version(&version) => {
                    let version = normalize_version(&version);
                    tracing::debug!(source = %source, version = %version, "version resolved");
                    return Ok(ResolvedVersion { version, source });
                }
                Some(version) => {
                    tracing::warn!(source = %source, value = %version, "ignoring invalid version");
                }
                None => tracing::debug!(source = %source, "version source unavailable"),
            }
        }

        Err(PublishError::VersionUnresolved {
            target: artifact.variant.clone(),
            artifact: artifact
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| artifact.path.display().to_string()),
        })
    }

    /// Compare the winner against lower-ranked sources available before
    /// install. The installed-package source is checked after InstallVerify
    /// instead.
    pub async fn cross_check(&self, artifact: &Artifact, resolved: &ResolvedVersion) -> Vec<VersionMismatch> {
        let mut mismatches = Vec::new();
        for lookup in &self.lookups {
            let source = lookup.source();
            if source.rank() >= resolved.source.rank() || source == VersionSource::InstalledPackage {
                continue;
            }
            if let Some(observed) = lookup.lookup(artifact).await
                && let Some(mismatch) = Self::check_consistency(resolved, &observed, source)
            {
                tracing::warn!(variant = %artifact.variant, "version mismatch: {}", mismatch);
                mismatches.push(mismatch);
            }
        }
        mismatches
    }

    /// Non-fatal comparison of a later observation with the resolved version
    pub fn check_consistency(
        resolved: &ResolvedVersion,
        observed: &str,
        source: VersionSource,
    ) -> Option<VersionMismatch> {
        if normalize_version(observed) == normalize_version(&resolved.version) {
            None
        } else {
            Some(VersionMismatch {
                resolved: resolved.clone(),
                source,
                observed: observed.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticLookup {
        source: VersionSource,
        value: Option<&'static str>,
        calls: Arc<AtomicU32>,
    }

    impl StaticLookup {
        fn boxed(source: VersionSource, value: Option<&'static str>) -> (Box<dyn VersionLookup>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Box::new(Self {
                    source,
                    value,
                    calls: calls.clone(),
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl VersionLookup for StaticLookup {
        fn source(&self) -> VersionSource {
            self.source
        }

        async fn lookup(&self, _artifact: &Artifact) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value.map(str::to_string)
        }
    }

    fn artifact(file: &str) -> Artifact {
        Artifact::new(format!("dist/{}", file), "demo-pkg", "demo-pkg")
    }

    #[test]
    fn test_is_valid_version() {
        for valid in ["1.2.0", "0.11.2.post1", "2.0.0rc1", "1!2.0", "v1.0.0", "1.0.dev3", "1.0+cpu"] {
            assert!(is_valid_version(valid), "{} should be valid", valid);
        }
        for invalid in ["", "latest", "1.0-beta", "abc1.0"] {
            assert!(!is_valid_version(invalid), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn test_version_from_tag() {
        assert_eq!(version_from_tag("v2.0.0-demo-pkg\n").as_deref(), Some("2.0.0"));
        assert_eq!(version_from_tag("0.11.2").as_deref(), Some("0.11.2"));
        assert_eq!(version_from_tag("release-candidate"), None);
    }

    #[tokio::test]
    async fn test_filename_lookup() {
        let lookup = FilenameLookup;

        assert_eq!(
            lookup.lookup(&artifact("demo_pkg-2.0.0-py3-none-any.whl")).await.as_deref(),
            Some("2.0.0")
        );
        assert_eq!(lookup.lookup(&artifact("demo_pkg.whl")).await, None);
    }

    #[tokio::test]
    async fn test_filename_wins_over_tag() {
        let (tag, _) = StaticLookup::boxed(VersionSource::VersionControlTag, Some("1.3.0"));
        let resolver = VersionResolver::new(vec![tag, Box::new(FilenameLookup)]);
        let artifact = artifact("demo_pkg-1.2.0-py3-none-any.whl");

        let resolved = resolver.resolve(&artifact).await.unwrap();
        assert_eq!(resolved.version, "1.2.0");
        assert_eq!(resolved.source, VersionSource::Filename);

        let mismatches = resolver.cross_check(&artifact, &resolved).await;
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].observed, "1.3.0");
        assert_eq!(mismatches[0].source, VersionSource::VersionControlTag);
        // The winner is untouched
        assert_eq!(mismatches[0].resolved.version, "1.2.0");
    }

    #[tokio::test]
    async fn test_lower_sources_not_consulted_when_higher_yields() {
        let (tag, tag_calls) = StaticLookup::boxed(VersionSource::VersionControlTag, Some("1.3.0"));
        let (installed, installed_calls) = StaticLookup::boxed(VersionSource::InstalledPackage, Some("1.4.0"));
        let resolver = VersionResolver::new(vec![installed, tag, Box::new(FilenameLookup)]);

        resolver
            .resolve(&artifact("demo_pkg-1.2.0-py3-none-any.whl"))
            .await
            .unwrap();

        assert_eq!(tag_calls.load(Ordering::SeqCst), 0);
        assert_eq!(installed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_tag_then_installed() {
        let (tag, _) = StaticLookup::boxed(VersionSource::VersionControlTag, None);
        let (installed, _) = StaticLookup::boxed(VersionSource::InstalledPackage, Some("0.9.1"));
        let resolver = VersionResolver::new(vec![Box::new(FilenameLookup), tag, installed]);

        let resolved = resolver.resolve(&artifact("demo_pkg.whl")).await.unwrap();

        assert_eq!(resolved.version, "0.9.1");
        assert_eq!(resolved.source, VersionSource::InstalledPackage);
    }

    #[tokio::test]
    async fn test_invalid_version_falls_through() {
        let (tag, _) = StaticLookup::boxed(VersionSource::VersionControlTag, Some("v1.3.0"));
        let resolver = VersionResolver::new(vec![Box::new(FilenameLookup), tag]);

        // "latest" parses as a filename version but is not a valid version
        let resolved = resolver
            .resolve(&artifact("demo_pkg-latest-py3-none-any.whl"))
            .await
            .unwrap();

        assert_eq!(resolved.version, "1.3.0");
        assert_eq!(resolved.source, VersionSource::VersionControlTag);
    }

    #[tokio::test]
    async fn test_unresolved_when_no_source_yields() {
        let (tag, _) = StaticLookup::boxed(VersionSource::VersionControlTag, None);
        let resolver = VersionResolver::new(vec![Box::new(FilenameLookup), tag]);

        let err = resolver.resolve(&artifact("demo_pkg.whl")).await.unwrap_err();

        assert_eq!(err.code(), "VERSION_UNRESOLVED");
        assert!(err.to_string().contains("demo_pkg.whl"));
    }

    #[tokio::test]
    async fn test_cross_check_skips_installed_source() {
        let (installed, calls) = StaticLookup::boxed(VersionSource::InstalledPackage, Some("9.9.9"));
        let resolver = VersionResolver::new(vec![Box::new(FilenameLookup), installed]);
        let artifact = artifact("demo_pkg-2.0.0-py3-none-any.whl");
        let resolved = resolver.resolve(&artifact).await.unwrap();

        assert!(resolver.cross_check(&artifact, &resolved).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_check_consistency() {
        let resolved = ResolvedVersion {
            version: "2.0.0".to_string(),
            source: VersionSource::Filename,
        };

        assert!(VersionResolver::check_consistency(&resolved, "2.0.0\n", VersionSource::InstalledPackage).is_none());
        assert!(VersionResolver::check_consistency(&resolved, "v2.0.0", VersionSource::VersionControlTag).is_none());

        let mismatch =
            VersionResolver::check_consistency(&resolved, "2.0.1", VersionSource::InstalledPackage).unwrap();
        assert!(mismatch.to_string().contains("installed-package reports 2.0.1"));
    }

    #[tokio::test]
    async fn test_git_lookup_outside_repository() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let lookup = GitTagLookup::new(temp_dir.path()).unwrap();

        assert_eq!(lookup.lookup(&artifact("demo_pkg.whl")).await, None);
    }
}
