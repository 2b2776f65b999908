//! Batch Coordinator - runs every variant of a release, one at a time
//!
//! Features:
//! - Sequential processing in the order the variants were given
//! - Failure isolation: a failed artifact never stops the others
//! - Cooperative cancellation checked between artifacts
//! - A single `RunReport` covering the whole batch

use crate::core::traits::Phase;
use crate::orchestration::orchestrator::{PublishOrchestrator, ReleaseCandidate};
use crate::orchestration::report::RunReport;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

pub struct BatchCoordinator {
    orchestrator: PublishOrchestrator,
}

impl BatchCoordinator {
    pub fn new(orchestrator: PublishOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Release every candidate
    pub async fn run(&self, candidates: &[ReleaseCandidate], cancel: &CancellationToken) -> RunReport {
        self.run_through(candidates, Phase::ReleaseTag, cancel).await
    }

    /// Discover and verify every candidate without touching a registry
    pub async fn check(&self, candidates: &[ReleaseCandidate], cancel: &CancellationToken) -> RunReport {
        self.run_through(candidates, Phase::Verify, cancel).await
    }

    async fn run_through(
        &self,
        candidates: &[ReleaseCandidate],
        last: Phase,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started_at = Utc::now();
        let mut artifacts = Vec::with_capacity(candidates.len());
        let mut not_started = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                not_started = candidates[index..]
                    .iter()
                    .map(|c| c.variant.clone())
                    .collect();
                tracing::warn!(
                    remaining = not_started.len(),
                    variants = %not_started.join(","),
                    "run cancelled, remaining variants not started"
                );
                break;
            }

            tracing::info!(
                variant = %candidate.variant,
                package = %candidate.package_name,
                position = index + 1,
                total = candidates.len(),
                "starting artifact"
            );
            let report = self.orchestrator.run_through(candidate, last, cancel).await;
            if let Some(failure) = report.failure() {
                tracing::error!(
                    variant = %candidate.variant,
                    phase = %failure.phase,
                    "artifact failed, continuing with the next variant"
                );
            }
            artifacts.push(report);
        }

        RunReport::new(started_at, artifacts).with_not_started(not_started)
    }
}
