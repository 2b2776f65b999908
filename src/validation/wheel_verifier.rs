//! Structural verification of built wheels
//!
//! A wheel passes when the archive opens and every entry decompresses with a
//! matching CRC, the `.dist-info` directory carries METADATA, RECORD and
//! WHEEL, the payload package is present, and the optional external linter
//! succeeds. Filename problems are reported but never fail a wheel.

use crate::build::discovery::WheelFilename;
use crate::core::traits::{Artifact, DistributionLinter, FailureKind, VerificationOutcome, VerifyArtifact};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Entry names of an archive whose contents all read back cleanly
fn read_archive(path: &Path) -> Result<Vec<String>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;

    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| e.to_string())?;
        let name = entry.name().to_string();
        // Reading to the end validates the CRC
        io::copy(&mut entry, &mut io::sink()).map_err(|e| format!("{}: {}", name, e))?;
        names.push(name);
    }
    Ok(names)
}

/// Check the required `.dist-info` entries and the payload package
fn check_entries(names: &[String], module: Option<&str>) -> Vec<FailureKind> {
    let top_level: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.split('/').next())
        .filter(|n| !n.is_empty())
        .collect();

    let dist_info = top_level.iter().find(|n| n.ends_with(".dist-info"));
    let has = |file: &str| {
        dist_info.is_some_and(|dir| names.iter().any(|n| n == &format!("{}/{}", dir, file)))
    };

    let mut failures = Vec::new();
    if !has("METADATA") {
        failures.push(FailureKind::MissingMetadata);
    }
    if !has("RECORD") {
        failures.push(FailureKind::MissingRecord);
    }
    if !has("WHEEL") {
        failures.push(FailureKind::MissingWheelInfo);
    }

    let payload_present = match module {
        Some(module) => {
            let package_dir = format!("{}/", module);
            let single_module = format!("{}.py", module);
            names
                .iter()
                .any(|n| n.starts_with(&package_dir) || *n == single_module)
        }
        None => top_level
            .iter()
            .any(|n| !n.ends_with(".dist-info") && !n.ends_with(".data")),
    };
    if !payload_present {
        failures.push(FailureKind::MissingPayload(
            module.unwrap_or("<any package>").to_string(),
        ));
    }

    failures
}

/// Filename convention problems for an artifact (advisory)
fn check_filename(artifact: &Artifact) -> Option<FailureKind> {
    let file_name = artifact.file_name().unwrap_or_default();
    let Some(wheel) = WheelFilename::parse(file_name) else {
        return Some(FailureKind::NamingConvention(format!(
            "{} does not match {{package}}-{{version}}-{{tags}}.whl",
            file_name
        )));
    };

    if !wheel.is_for(&artifact.package_name) {
        return Some(FailureKind::NamingConvention(format!(
            "{} is named for {}, expected {}",
            file_name, wheel.name, artifact.package_name
        )));
    }
    if let Some(version) = artifact.version()
        && wheel.version != version
    {
        return Some(FailureKind::NamingConvention(format!(
            "{} carries version {}, resolved {}",
            file_name, wheel.version, version
        )));
    }
    None
}

/// Wheel inspector used by the Verify phase
pub struct ArtifactVerifier {
    module: Option<String>,
    linter: Option<Box<dyn DistributionLinter>>,
}

impl ArtifactVerifier {
    /// `module` is the top-level package expected in every wheel; when unset
    /// any non-metadata top-level entry counts as the payload
    pub fn new(module: Option<String>) -> Self {
        Self {
            module,
            linter: None,
        }
    }

    pub fn with_linter(mut self, linter: Box<dyn DistributionLinter>) -> Self {
        self.linter = Some(linter);
        self
    }
}

#[async_trait]
impl VerifyArtifact for ArtifactVerifier {
    async fn verify(&self, artifact: &Artifact) -> VerificationOutcome {
        let mut failures = Vec::new();

        if let Some(naming) = check_filename(artifact) {
            tracing::warn!(variant = %artifact.variant, "{}", naming);
            failures.push(naming);
        }

        let path: PathBuf = artifact.path.clone();
        let read = tokio::task::spawn_blocking(move || read_archive(&path))
            .await
            .unwrap_or_else(|e| Err(format!("inspection task failed: {}", e)));

        match read {
            Err(detail) => failures.push(FailureKind::CorruptArchive(detail)),
            Ok(names) => {
                failures.extend(check_entries(&names, self.module.as_deref()));

                if let Some(linter) = &self.linter
                    && let Err(detail) = linter.check(&artifact.path).await
                {
                    failures.push(FailureKind::LinterFailed(detail));
                }
            }
        }

        VerificationOutcome::from_failures(failures)
    }
}
