//! Phase state machine for one artifact's release pipeline
//!
//! Phases run in a fixed linear order. A phase may only start after every
//! earlier phase has completed with `Succeeded` or `Skipped`; a `Failed`
//! phase moves the pipeline straight to `Done`. The history can be persisted
//! with atomic file operations so a user can see where a rerun resumes.

use crate::core::error::PublishError;
use crate::core::traits::{Phase, PhaseResult, PhaseStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory (under the dist dir) holding per-variant state files
pub const STATE_DIR: &str = ".release-state";

/// Pipeline state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Initial,
    Discover,
    Verify,
    TestPublish,
    InstallVerify,
    ProductionPublish,
    ReleaseTag,
    Done,
}

impl From<Phase> for PipelineState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Discover => Self::Discover,
            Phase::Verify => Self::Verify,
            Phase::TestPublish => Self::TestPublish,
            Phase::InstallVerify => Self::InstallVerify,
            Phase::ProductionPublish => Self::ProductionPublish,
            Phase::ReleaseTag => Self::ReleaseTag,
        }
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub timestamp: DateTime<Utc>,
    /// Outcome of the phase being left, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PhaseStatus>,
}

/// Persisted pipeline data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStateData {
    pub variant: String,
    #[serde(rename = "currentState")]
    pub current_state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub results: Vec<PhaseResult>,
    pub transitions: Vec<StateTransition>,
    pub failed: bool,
}

/// State machine driving one artifact through the release phases
pub struct PipelineStateMachine {
    variant: String,
    current_state: PipelineState,
    /// Phase started but not yet completed
    running: Option<Phase>,
    /// Outcome of the last completed phase, attached to the next transition
    pending_status: Option<PhaseStatus>,
    version: Option<String>,
    results: Vec<PhaseResult>,
    transitions: Vec<StateTransition>,
    state_file_path: Option<PathBuf>,
    failed: bool,
}

impl PipelineStateMachine {
    /// In-memory state machine
    pub fn new(variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            current_state: PipelineState::Initial,
            running: None,
            pending_status: None,
            version: None,
            results: Vec::new(),
            transitions: Vec::new(),
            state_file_path: None,
            failed: false,
        }
    }

    /// Persist every transition to `<dist_dir>/.release-state/<variant>.json`
    pub fn with_state_dir<P: AsRef<Path>>(mut self, dist_dir: P) -> Self {
        self.state_file_path = Some(Self::state_file_for(dist_dir, &self.variant));
        self
    }

    pub fn state_file_for<P: AsRef<Path>>(dist_dir: P, variant: &str) -> PathBuf {
        dist_dir
            .as_ref()
            .join(STATE_DIR)
            .join(format!("{}.json", variant))
    }

    /// Next phase allowed to start, or `None` once the pipeline is over
    pub fn next_phase(&self) -> Option<Phase> {
        if self.failed || self.running.is_some() {
            return None;
        }
        match self.results.last() {
            None => Some(Phase::Discover),
            Some(last) => last.phase.next(),
        }
    }

    /// Enter `phase`
    pub async fn begin(&mut self, phase: Phase) -> Result<(), PublishError> {
        if self.failed {
            return Err(self.invalid(format!(
                "cannot start {} after a failed phase",
                phase
            )));
        }
        if let Some(running) = self.running {
            return Err(self.invalid(format!(
                "cannot start {} while {} is running",
                phase, running
            )));
        }
        if self.next_phase() != Some(phase) {
            return Err(self.invalid(format!(
                "{} is out of order (expected {})",
                phase,
                self.next_phase()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string())
            )));
        }

        self.running = Some(phase);
        let status = self.pending_status.take();
        self.transition(phase.into(), status).await;
        Ok(())
    }

    /// Record the result of the running phase
    pub async fn complete(&mut self, result: PhaseResult) -> Result<(), PublishError> {
        if self.running != Some(result.phase) {
            return Err(self.invalid(format!("{} was not started", result.phase)));
        }

        self.running = None;
        let status = result.status.clone();
        self.results.push(result);

        if status.is_failed() {
            self.failed = true;
            self.transition(PipelineState::Done, Some(status)).await;
        } else if self.next_phase().is_none() {
            self.transition(PipelineState::Done, Some(status)).await;
        } else {
            self.pending_status = Some(status);
            self.save_or_warn().await;
        }
        Ok(())
    }

    /// Attach the resolved version for the persisted record
    pub fn set_version(&mut self, version: &str) {
        self.version = Some(version.to_string());
    }

    pub fn get_state(&self) -> PipelineState {
        self.current_state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_done(&self) -> bool {
        self.current_state == PipelineState::Done
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<PhaseResult> {
        self.results
    }

    pub fn get_state_data(&self) -> PipelineStateData {
        PipelineStateData {
            variant: self.variant.clone(),
            current_state: self.current_state,
            version: self.version.clone(),
            results: self.results.clone(),
            transitions: self.transitions.clone(),
            failed: self.failed,
        }
    }

    /// Read a persisted state file, if any
    pub async fn restore<P: AsRef<Path>>(
        dist_dir: P,
        variant: &str,
    ) -> Result<Option<PipelineStateData>, std::io::Error> {
        let path = Self::state_file_for(dist_dir, variant);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let data = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(data))
    }

    /// Get elapsed time since the first transition, in milliseconds
    pub fn get_elapsed_time(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Transition history as human-readable lines
    pub fn history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                let status = t
                    .status
                    .as_ref()
                    .map(|s| format!(" [{}]", s))
                    .unwrap_or_default();
                format!(
                    "{}: {:?} → {:?}{}",
                    t.timestamp.to_rfc3339(),
                    t.from,
                    t.to,
                    status
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn invalid(&self, message: String) -> PublishError {
        PublishError::InvalidTransition {
            target: self.variant.clone(),
            message,
        }
    }

    /// `status` is the outcome of the phase being left
    async fn transition(&mut self, to: PipelineState, status: Option<PhaseStatus>) {
        self.transitions.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now(),
            status,
        });
        self.current_state = to;
        self.save_or_warn().await;
    }

    async fn save_or_warn(&self) {
        if let Err(e) = self.save().await {
            tracing::warn!(variant = %self.variant, error = %e, "failed to persist release state");
        }
    }

    /// Save state to file (atomic operation)
    async fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.state_file_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&self.get_state_data())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("json.tmp");
        fs::write(&temp_file, json).await?;
        fs::rename(&temp_file, path).await?;

        Ok(())
    }
}
