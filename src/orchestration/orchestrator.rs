//! Publish orchestrator - drives one artifact through the release phases
//!
//! Discover → Verify → TestPublish → InstallVerify → ProductionPublish →
//! ReleaseTag. Publishing phases are skipped when the target already holds
//! the version, InstallVerify runs even when TestPublish was skipped, and a
//! failed phase ends the artifact's pipeline. Only Verify retries, by asking
//! the build collaborator for a fresh wheel.

use crate::build::discovery::{python_version_for, wheels_for};
use crate::core::error::PublishError;
use crate::core::retry::RebuildPolicy;
use crate::core::state_machine::PipelineStateMachine;
use crate::core::traits::{
    Artifact, BuildCollaborator, ConfirmationSource, InstallVerifier, Phase, PhaseResult,
    PhaseStatus, PublishTarget, RegistryClient, VersionSource, VerifyArtifact, release_tag,
};
use crate::orchestration::report::{ArtifactReport, CANCELLED};
use crate::validation::version_resolver::{ResolvedVersion, VersionResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const ALREADY_PRESENT: &str = "already present";

/// One variant to release, optionally with a wheel that is already built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCandidate {
    pub variant: String,
    pub package_name: String,
    pub prebuilt: Option<PathBuf>,
    /// Other wheels for the package that this run does not release
    pub left_out: Vec<PathBuf>,
}

impl ReleaseCandidate {
    /// Candidate that Discover has to build
    pub fn new(variant: &str, package_name: &str) -> Self {
        Self {
            variant: variant.to_string(),
            package_name: package_name.to_string(),
            prebuilt: None,
            left_out: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.prebuilt = Some(path);
        self
    }

    pub fn leaving_out(mut self, wheels: Vec<PathBuf>) -> Self {
        self.left_out = wheels;
        self
    }

    /// Use the newest wheel for the package in `dist_dir`, if there is one.
    /// Older wheels (other Python versions) are recorded as left out.
    pub fn discover(variant: &str, package_name: &str, dist_dir: &Path) -> Self {
        let mut wheels = wheels_for(dist_dir, package_name).into_iter();
        let candidate = Self::new(variant, package_name);
        match wheels.next() {
            Some(path) => candidate.with_artifact(path).leaving_out(wheels.collect()),
            None => candidate,
        }
    }
}

/// Warning for a wheel found in the dist directory but not released
fn left_out_warning(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match python_version_for(&file_name) {
        Some(python) => format!(
            "{} (Python {}) left out; one wheel per variant is released",
            file_name, python
        ),
        None => format!("{} left out; one wheel per variant is released", file_name),
    }
}

/// Mutable facts gathered while one artifact moves through the phases
struct ArtifactRun {
    artifact: Artifact,
    resolved: Option<ResolvedVersion>,
    warnings: Vec<String>,
    built: bool,
}

impl ArtifactRun {
    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn version(&self) -> Result<String, PublishError> {
        self.artifact
            .version()
            .map(str::to_string)
            .ok_or_else(|| PublishError::InvalidTransition {
                target: self.artifact.variant.clone(),
                message: "version used before Discover resolved it".to_string(),
            })
    }
}

pub struct PublishOrchestrator {
    registry: Arc<dyn RegistryClient>,
    builder: Arc<dyn BuildCollaborator>,
    verifier: Arc<dyn VerifyArtifact>,
    installer: Arc<dyn InstallVerifier>,
    confirmation: Arc<dyn ConfirmationSource>,
    resolver: Arc<VersionResolver>,
    rebuild_policy: RebuildPolicy,
    require_confirmation: bool,
    state_dir: Option<PathBuf>,
}

impl PublishOrchestrator {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        builder: Arc<dyn BuildCollaborator>,
        verifier: Arc<dyn VerifyArtifact>,
        installer: Arc<dyn InstallVerifier>,
        confirmation: Arc<dyn ConfirmationSource>,
        resolver: Arc<VersionResolver>,
    ) -> Self {
        Self {
            registry,
            builder,
            verifier,
            installer,
            confirmation,
            resolver,
            rebuild_policy: RebuildPolicy::default(),
            require_confirmation: true,
            state_dir: None,
        }
    }

    pub fn with_rebuild_policy(mut self, policy: RebuildPolicy) -> Self {
        self.rebuild_policy = policy;
        self
    }

    /// Whether production uploads need a confirmation (default: yes)
    pub fn with_confirmation_required(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    /// Persist each artifact's phase history under `dist_dir`
    pub fn with_state_dir(mut self, dist_dir: PathBuf) -> Self {
        self.state_dir = Some(dist_dir);
        self
    }

    /// Run every phase
    pub async fn run(&self, candidate: &ReleaseCandidate, cancel: &CancellationToken) -> ArtifactReport {
        self.run_through(candidate, Phase::ReleaseTag, cancel).await
    }

    /// Run phases up to and including `last`
    pub async fn run_through(
        &self,
        candidate: &ReleaseCandidate,
        last: Phase,
        cancel: &CancellationToken,
    ) -> ArtifactReport {
        let mut machine = PipelineStateMachine::new(&candidate.variant);
        if let Some(dir) = &self.state_dir {
            machine = machine.with_state_dir(dir);
        }

        let mut run = ArtifactRun {
            artifact: Artifact::new(
                candidate.prebuilt.clone().unwrap_or_default(),
                &candidate.package_name,
                &candidate.variant,
            ),
            resolved: None,
            warnings: Vec::new(),
            built: candidate.prebuilt.is_some(),
        };
        for wheel in &candidate.left_out {
            let warning = left_out_warning(wheel);
            tracing::warn!(variant = %candidate.variant, "{}", warning);
            run.warn(warning);
        }

        while let Some(phase) = machine.next_phase() {
            if phase > last {
                break;
            }
            if let Err(error) = machine.begin(phase).await {
                tracing::error!(variant = %candidate.variant, %error, "phase ordering violated");
                break;
            }

            let started = Instant::now();
            let mut attempts = 1;
            let outcome = if cancel.is_cancelled() {
                Err(PublishError::Cancelled {
                    target: candidate.variant.clone(),
                })
            } else {
                self.execute(phase, &mut run, &mut attempts, cancel).await
            };

            let status = match outcome {
                Ok(status) => status,
                Err(error) => PhaseStatus::Failed(failure_cause(&error)),
            };
            if phase == Phase::Discover
                && let Some(version) = run.artifact.version()
            {
                machine.set_version(version);
            }

            report_transition(&run.artifact, phase, &status);

            let result = PhaseResult {
                phase,
                status,
                attempts,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            if let Err(error) = machine.complete(result).await {
                tracing::error!(variant = %candidate.variant, %error, "phase completion rejected");
                break;
            }
        }

        ArtifactReport {
            artifact: run.artifact,
            results: machine.into_results(),
            warnings: run.warnings,
        }
    }

    async fn execute(
        &self,
        phase: Phase,
        run: &mut ArtifactRun,
        attempts: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<PhaseStatus, PublishError> {
        match phase {
            Phase::Discover => self.discover(run).await,
            Phase::Verify => self.verify(run, attempts, cancel).await,
            Phase::TestPublish => self.publish_to(run, PublishTarget::TestRegistry).await,
            Phase::InstallVerify => self.install_verify(run, cancel).await,
            Phase::ProductionPublish => {
                self.publish_to(run, PublishTarget::ProductionRegistry).await
            }
            Phase::ReleaseTag => self.release_tag(run).await,
        }
    }

    async fn discover(&self, run: &mut ArtifactRun) -> Result<PhaseStatus, PublishError> {
        if !run.built {
            let path = self.builder.build(&run.artifact.variant, None).await?;
            run.artifact = run.artifact.rebuilt_at(path);
            run.built = true;
        }

        let resolved = self.resolver.resolve(&run.artifact).await?;
        run.artifact.finalize_version(&resolved.version)?;
        tracing::info!(
            variant = %run.artifact.variant,
            version = %resolved.version,
            source = %resolved.source,
            "version resolved"
        );

        for mismatch in self.resolver.cross_check(&run.artifact, &resolved).await {
            run.warn(mismatch.to_string());
        }
        run.resolved = Some(resolved);
        Ok(PhaseStatus::Succeeded)
    }

    async fn verify(
        &self,
        run: &mut ArtifactRun,
        attempts: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<PhaseStatus, PublishError> {
        let variant = run.artifact.variant.clone();
        let mut rebuilds = 0;
        *attempts = 0;

        loop {
            *attempts += 1;
            let outcome = self.verifier.verify(&run.artifact).await;
            for advisory in outcome.failures.iter().filter(|f| f.is_advisory()) {
                run.warn(advisory.to_string());
            }
            if outcome.passed {
                return Ok(PhaseStatus::Succeeded);
            }

            if !self.rebuild_policy.can_rebuild(rebuilds) {
                return Err(PublishError::VerificationFailed {
                    target: variant,
                    attempts: *attempts,
                    message: outcome.summary(),
                });
            }
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled { target: variant });
            }

            rebuilds += 1;
            tracing::warn!(
                variant = %variant,
                attempt = *attempts,
                max_attempts = self.rebuild_policy.max_verify_attempts(),
                rebuild = rebuilds,
                failures = %outcome.summary(),
                "verification failed, rebuilding"
            );
            self.rebuild_policy.pause(rebuilds).await;

            let version = run.version()?;
            let path = self.builder.build(&variant, Some(&version)).await?;
            run.artifact = run.artifact.rebuilt_at(path);
        }
    }

    async fn publish_to(
        &self,
        run: &mut ArtifactRun,
        target: PublishTarget,
    ) -> Result<PhaseStatus, PublishError> {
        let version = run.version()?;
        if self
            .registry
            .exists(&run.artifact.package_name, &version, target)
            .await?
        {
            return Ok(PhaseStatus::Skipped(ALREADY_PRESENT.to_string()));
        }

        if target.requires_confirmation()
            && self.require_confirmation
            && !self.confirmation.confirm(&run.artifact, target).await
        {
            return Err(PublishError::ConfirmationDeclined {
                target: target.name().to_string(),
            });
        }

        let published = self.registry.publish(&run.artifact, target).await?;
        if published.already_present {
            return Ok(PhaseStatus::Skipped(ALREADY_PRESENT.to_string()));
        }
        if let Some(url) = &published.url {
            tracing::info!(variant = %run.artifact.variant, %target, %url, "published");
        }
        Ok(PhaseStatus::Succeeded)
    }

    async fn install_verify(
        &self,
        run: &mut ArtifactRun,
        cancel: &CancellationToken,
    ) -> Result<PhaseStatus, PublishError> {
        let installed = self.installer.verify_install(&run.artifact, cancel).await?;

        if let Some(resolved) = &run.resolved
            && let Some(mismatch) =
                VersionResolver::check_consistency(resolved, &installed, VersionSource::InstalledPackage)
        {
            tracing::warn!(variant = %run.artifact.variant, "version mismatch: {}", mismatch);
            run.warn(mismatch.to_string());
        }
        Ok(PhaseStatus::Succeeded)
    }

    async fn release_tag(&self, run: &mut ArtifactRun) -> Result<PhaseStatus, PublishError> {
        let version = run.version()?;
        let tag = release_tag(&version, &run.artifact.variant);

        if self.registry.tag_exists(&tag).await? {
            let completed = self
                .registry
                .complete_release(&tag, &run.artifact.path)
                .await?;
            if completed.already_present {
                return Ok(PhaseStatus::Skipped(format!("tag {} already exists", tag)));
            }
            tracing::info!(variant = %run.artifact.variant, %tag, "attached wheel to existing release");
            return Ok(PhaseStatus::Succeeded);
        }

        let created = self
            .registry
            .tag_release(
                &run.artifact.package_name,
                &version,
                &run.artifact.variant,
                &run.artifact.path,
            )
            .await?;
        if let Some(url) = &created.url {
            tracing::info!(variant = %run.artifact.variant, %tag, %url, "release created");
        }
        Ok(PhaseStatus::Succeeded)
    }
}

/// Cause recorded in `PhaseStatus::Failed`
fn failure_cause(error: &PublishError) -> String {
    match error {
        PublishError::ConfirmationDeclined { .. } => "declined".to_string(),
        PublishError::Cancelled { .. } => CANCELLED.to_string(),
        other => other.to_string(),
    }
}

fn report_transition(artifact: &Artifact, phase: Phase, status: &PhaseStatus) {
    let package = artifact.package_name.as_str();
    let variant = artifact.variant.as_str();
    let version = artifact.version().unwrap_or("unresolved");
    match status {
        PhaseStatus::Succeeded => {
            tracing::info!(%phase, variant, package, version, status = "succeeded", "phase finished")
        }
        PhaseStatus::Skipped(reason) => {
            tracing::info!(%phase, variant, package, version, status = "skipped", reason = %reason, "phase skipped")
        }
        PhaseStatus::Failed(cause) => {
            tracing::error!(%phase, variant, package, version, status = "failed", reason = %cause, "phase failed")
        }
    }
}
