//! In-memory collaborators that record their calls

use crate::core::error::PublishError;
use crate::core::retry::RebuildPolicy;
use crate::core::traits::{
    Artifact, BuildCollaborator, FailureKind, InstallVerifier, PublishResult, PublishTarget,
    RegistryClient, VerificationOutcome, VerifyArtifact, release_tag,
};
use crate::orchestration::confirmation::PreAuthorized;
use crate::orchestration::orchestrator::PublishOrchestrator;
use crate::validation::version_resolver::{FilenameLookup, VersionResolver};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn wheel_path(variant: &str) -> PathBuf {
    PathBuf::from(format!("dist/{}/demo_pkg-2.0.0-py3-none-any.whl", variant))
}

#[derive(Default)]
pub struct FakeRegistry {
    present: Mutex<HashSet<(PublishTarget, String, String)>>,
    tags: Mutex<HashSet<String>>,
    /// Tags whose release carries the wheel
    attached: Mutex<HashSet<String>>,
    timing_out: bool,
    pub publishes: Mutex<Vec<(PublishTarget, String)>>,
    pub tag_calls: Mutex<Vec<String>>,
    pub attach_calls: Mutex<Vec<String>>,
    pub exists_calls: AtomicU32,
}

impl FakeRegistry {
    pub fn with_version(self, target: PublishTarget, package: &str, version: &str) -> Self {
        self.present
            .lock()
            .unwrap()
            .insert((target, package.to_string(), version.to_string()));
        self
    }

    /// Release for `tag` with the wheel attached
    pub fn with_tag(self, tag: &str) -> Self {
        self.attached.lock().unwrap().insert(tag.to_string());
        self.with_bare_tag(tag)
    }

    /// Release for `tag` whose asset upload never finished
    pub fn with_bare_tag(self, tag: &str) -> Self {
        self.tags.lock().unwrap().insert(tag.to_string());
        self
    }

    /// Every existence query times out
    pub fn timing_out(mut self) -> Self {
        self.timing_out = true;
        self
    }

    fn check_timeout(&self, target: PublishTarget) -> Result<(), PublishError> {
        if self.timing_out {
            return Err(PublishError::TimeoutError {
                target: target.name().to_string(),
                seconds: 30,
            });
        }
        Ok(())
    }

    pub fn publish_count(&self, target: PublishTarget) -> usize {
        self.publishes
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == target)
            .count()
    }

    pub fn tag_count(&self) -> usize {
        self.tag_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn exists(
        &self,
        package_name: &str,
        version: &str,
        target: PublishTarget,
    ) -> Result<bool, PublishError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.check_timeout(target)?;
        Ok(self.present.lock().unwrap().contains(&(
            target,
            package_name.to_string(),
            version.to_string(),
        )))
    }

    async fn tag_exists(&self, tag: &str) -> Result<bool, PublishError> {
        self.check_timeout(PublishTarget::ReleaseHost)?;
        Ok(self.tags.lock().unwrap().contains(tag))
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        target: PublishTarget,
    ) -> Result<PublishResult, PublishError> {
        let version = artifact.version().unwrap_or_default().to_string();
        self.publishes
            .lock()
            .unwrap()
            .push((target, artifact.variant.clone()));
        self.present
            .lock()
            .unwrap()
            .insert((target, artifact.package_name.clone(), version));
        Ok(PublishResult {
            target,
            already_present: false,
            url: None,
        })
    }

    async fn tag_release(
        &self,
        _package_name: &str,
        version: &str,
        variant: &str,
        _artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        let tag = release_tag(version, variant);
        self.tag_calls.lock().unwrap().push(tag.clone());
        self.tags.lock().unwrap().insert(tag.clone());
        self.attached.lock().unwrap().insert(tag);
        Ok(PublishResult {
            target: PublishTarget::ReleaseHost,
            already_present: false,
            url: None,
        })
    }

    async fn complete_release(
        &self,
        tag: &str,
        _artifact_path: &Path,
    ) -> Result<PublishResult, PublishError> {
        let already_present = !self.attached.lock().unwrap().insert(tag.to_string());
        if !already_present {
            self.attach_calls.lock().unwrap().push(tag.to_string());
        }
        Ok(PublishResult {
            target: PublishTarget::ReleaseHost,
            already_present,
            url: None,
        })
    }
}

#[derive(Default)]
pub struct FakeBuilder {
    pub calls: AtomicU32,
}

#[async_trait]
impl BuildCollaborator for FakeBuilder {
    async fn build(&self, variant: &str, _version_spec: Option<&str>) -> Result<PathBuf, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(wheel_path(variant))
    }
}

/// Fails verification for the listed variants on every attempt
#[derive(Default)]
pub struct FakeVerifier {
    pub failing: HashSet<String>,
    pub calls: AtomicU32,
}

impl FakeVerifier {
    pub fn failing(variants: &[&str]) -> Self {
        Self {
            failing: variants.iter().map(|v| v.to_string()).collect(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VerifyArtifact for FakeVerifier {
    async fn verify(&self, artifact: &Artifact) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&artifact.variant) {
            VerificationOutcome::from_failures(vec![FailureKind::MissingRecord])
        } else {
            VerificationOutcome::from_failures(Vec::new())
        }
    }
}

/// Reports `version` as installed, or fails when `version` is `None`
pub struct FakeInstaller {
    pub version: Option<String>,
    pub calls: AtomicU32,
}

impl FakeInstaller {
    pub fn reporting(version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            version: None,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl InstallVerifier for FakeInstaller {
    async fn verify_install(
        &self,
        artifact: &Artifact,
        _cancel: &CancellationToken,
    ) -> Result<String, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.version
            .clone()
            .ok_or_else(|| PublishError::InstallVerifyFailed {
                target: artifact.variant.clone(),
                message: "ModuleNotFoundError: No module named 'demo_pkg'".to_string(),
            })
    }
}

/// Shared handles to every fake behind an orchestrator
pub struct Harness {
    pub registry: Arc<FakeRegistry>,
    pub builder: Arc<FakeBuilder>,
    pub verifier: Arc<FakeVerifier>,
    pub installer: Arc<FakeInstaller>,
}

impl Harness {
    pub fn new(registry: FakeRegistry, verifier: FakeVerifier, installer: FakeInstaller) -> Self {
        Self {
            registry: Arc::new(registry),
            builder: Arc::new(FakeBuilder::default()),
            verifier: Arc::new(verifier),
            installer: Arc::new(installer),
        }
    }

    pub fn orchestrator(&self) -> PublishOrchestrator {
        PublishOrchestrator::new(
            self.registry.clone(),
            self.builder.clone(),
            self.verifier.clone(),
            self.installer.clone(),
            Arc::new(PreAuthorized),
            Arc::new(VersionResolver::new(vec![Box::new(FilenameLookup)])),
        )
        .with_rebuild_policy(RebuildPolicy::immediate(2))
    }
}
