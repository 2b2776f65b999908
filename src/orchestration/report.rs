//! Run report - per-artifact phase outcomes and the summary folded from them

use crate::core::traits::{Artifact, Phase, PhaseResult, PhaseStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Failure cause recorded for a phase stopped by cancellation
pub const CANCELLED: &str = "cancelled";

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Outcome of one artifact's pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub artifact: Artifact,
    pub results: Vec<PhaseResult>,
    /// Non-fatal findings (version mismatches, naming problems, unreachable
    /// registries)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ArtifactReport {
    /// The failed phase, if any
    pub fn failure(&self) -> Option<&PhaseResult> {
        self.results.iter().find(|r| r.status.is_failed())
    }

    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }

    /// Failed at or before InstallVerify
    pub fn failed_before_release(&self) -> bool {
        self.failure().is_some_and(|r| r.phase.is_gate())
    }

    pub fn status_of(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.results
            .iter()
            .find(|r| r.phase == phase)
            .map(|r| &r.status)
    }
}

/// Numbers derived from a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_phases: usize,
    pub failed_variants: Vec<String>,
}

/// Result of one batch invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactReport>,
    /// Variants a cancellation kept from starting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_started: Vec<String>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, artifacts: Vec<ArtifactReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            artifacts,
            not_started: Vec::new(),
        }
    }

    pub fn with_not_started(mut self, variants: Vec<String>) -> Self {
        self.not_started = variants;
        self
    }

    /// Cancelled before every variant finished
    pub fn interrupted(&self) -> bool {
        !self.not_started.is_empty()
            || self.artifacts.iter().any(|report| {
                report
                    .results
                    .iter()
                    .any(|r| r.status == PhaseStatus::Failed(CANCELLED.to_string()))
            })
    }

    pub fn summary(&self) -> RunSummary {
        self.artifacts.iter().fold(
            RunSummary {
                total: 0,
                succeeded: 0,
                failed: 0,
                skipped_phases: 0,
                failed_variants: Vec::new(),
            },
            |mut summary, report| {
                summary.total += 1;
                if report.is_failed() {
                    summary.failed += 1;
                    summary.failed_variants.push(report.artifact.variant.clone());
                } else {
                    summary.succeeded += 1;
                }
                summary.skipped_phases += report
                    .results
                    .iter()
                    .filter(|r| matches!(r.status, PhaseStatus::Skipped(_)))
                    .count();
                summary
            },
        )
    }

    /// 1 if the run was interrupted or any artifact failed at or before
    /// InstallVerify, 2 if the only failures are at ProductionPublish or
    /// ReleaseTag, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.interrupted() || self.artifacts.iter().any(ArtifactReport::failed_before_release) {
            1
        } else if self.artifacts.iter().any(ArtifactReport::is_failed) {
            2
        } else {
            0
        }
    }

    pub fn to_markdown(&self) -> String {
        let summary = self.summary();
        let mut lines = Vec::new();

        lines.push("# Release Report\n".to_string());
        lines.push(format!("**Run**: {}", self.run_id));
        lines.push(format!("**Started**: {}", self.started_at.to_rfc3339()));
        lines.push(format!("**Finished**: {}\n", self.finished_at.to_rfc3339()));

        lines.push("## Summary\n".to_string());
        lines.push(format!("- **Artifacts**: {}", summary.total));
        lines.push(format!("- **Succeeded**: {}", summary.succeeded));
        lines.push(format!("- **Failed**: {}", summary.failed));
        lines.push(format!("- **Skipped phases**: {}\n", summary.skipped_phases));
        if self.interrupted() {
            lines.push("**Run cancelled before completion.**".to_string());
            if !self.not_started.is_empty() {
                lines.push(format!("Not started: {}", self.not_started.join(", ")));
            }
            lines.push(String::new());
        }

        for report in &self.artifacts {
            lines.push(format!(
                "## {} ({} {})\n",
                report.artifact.variant,
                report.artifact.package_name,
                report.artifact.version().unwrap_or("unresolved")
            ));
            lines.push("| Phase | Status | Attempts | Duration |".to_string());
            lines.push("|-------|--------|----------|----------|".to_string());
            for result in &report.results {
                lines.push(format!(
                    "| {} | {} | {} | {:.2}s |",
                    result.phase,
                    result.status,
                    result.attempts,
                    result.duration_ms as f64 / 1000.0
                ));
            }
            if !report.warnings.is_empty() {
                lines.push(String::new());
                lines.push("Warnings:".to_string());
                for warning in &report.warnings {
                    lines.push(format!("- {}", warning));
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    pub async fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Console summary printed at the end of a run
    pub fn print_summary(&self) {
        let summary = self.summary();

        println!("\n{}", "=".repeat(60));
        println!("Release Summary");
        println!("{}", "=".repeat(60));

        for report in &self.artifacts {
            let marker = if report.is_failed() { "FAILED" } else { "ok" };
            println!(
                "\n[{}] {} {}",
                marker,
                report.artifact.variant,
                report.artifact.version().unwrap_or("unresolved")
            );
            for result in &report.results {
                println!("   - {:<18} {}", result.phase.as_str(), result.status);
            }
        }

        println!("\n{}", "=".repeat(60));
        println!(
            "Artifacts: {}  Succeeded: {}  Failed: {}  Skipped phases: {}",
            summary.total, summary.succeeded, summary.failed, summary.skipped_phases
        );
        if self.interrupted() {
            println!("Run cancelled; not started: {}", display_list(&self.not_started));
        }
        println!("{}\n", "=".repeat(60));
    }
}
