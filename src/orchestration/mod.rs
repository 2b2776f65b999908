//! Orchestration layer for wheel releases
//!
//! This module drives each artifact through the release phases and
//! coordinates batches of variants into a single run report.

pub mod batch_coordinator;
pub mod confirmation;
pub mod install_verifier;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export main types for convenience
pub use batch_coordinator::BatchCoordinator;
pub use confirmation::{InteractivePrompt, NonInteractiveDecline, PreAuthorized};
pub use install_verifier::VenvInstallVerifier;
pub use orchestrator::{PublishOrchestrator, ReleaseCandidate};
pub use report::{ArtifactReport, RunReport, RunSummary};
