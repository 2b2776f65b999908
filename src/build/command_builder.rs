//! Build collaborator backed by an external build command

use crate::build::discovery::newest_wheel_for;
use crate::build::variants::BuildConfig;
use crate::core::error::PublishError;
use crate::core::traits::BuildCollaborator;
use crate::security::command_executor::{SafeCommandExecutor, output_tail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Runs the configured build command once per variant and picks up the
/// wheel it leaves in the dist directory
pub struct CommandBuilder {
    executor: SafeCommandExecutor,
    dist_dir: PathBuf,
    command: Vec<String>,
    variants: BuildConfig,
}

impl CommandBuilder {
    pub fn new(
        project_dir: &Path,
        dist_dir: PathBuf,
        command: Vec<String>,
        variants: BuildConfig,
    ) -> Result<Self, PublishError> {
        if command.is_empty() {
            return Err(PublishError::config("build command is empty"));
        }
        let executor = SafeCommandExecutor::new(project_dir)
            .map_err(|e| PublishError::from_command("build", e))?;

        Ok(Self {
            executor,
            dist_dir,
            command,
            variants,
        })
    }

    /// Full environment for one build
    fn environment(&self, variant: &str, version_spec: Option<&str>) -> Result<Vec<(String, String)>, PublishError> {
        let mut env = self.variants.variant(variant)?.build_env();
        if let Some(version) = version_spec {
            env.push(("SETUPTOOLS_SCM_PRETEND_VERSION".to_string(), version.to_string()));
        }
        Ok(env)
    }
}

#[async_trait]
impl BuildCollaborator for CommandBuilder {
    async fn build(&self, variant: &str, version_spec: Option<&str>) -> Result<PathBuf, PublishError> {
        let package_name = self.variants.variant(variant)?.package_name.clone();
        let env = self.environment(variant, version_spec)?;
        let previous = newest_wheel_for(&self.dist_dir, &package_name).map(|p| {
            let modified = modified_time(&p);
            (p, modified)
        });

        tracing::info!(variant, package = %package_name, command = %self.command.join(" "), "building wheel");

        let args: Vec<&str> = self.command[1..].iter().map(String::as_str).collect();
        let output = self
            .executor
            .execute_with_env(&self.command[0], &args, &env)
            .await
            .map_err(|e| PublishError::from_command(variant, e))?;

        if !output.status.success() {
            return Err(PublishError::BuildFailed {
                target: variant.to_string(),
                message: format!(
                    "build command exited with {}: {}",
                    output.status,
                    output_tail(&output, 5)
                ),
            });
        }

        let wheel = newest_wheel_for(&self.dist_dir, &package_name).ok_or_else(|| {
            PublishError::BuildFailed {
                target: variant.to_string(),
                message: format!(
                    "no wheel for {} found in {}",
                    package_name,
                    self.dist_dir.display()
                ),
            }
        })?;

        // A stale wheel from an earlier build does not count
        let modified = modified_time(&wheel);
        if previous.as_ref() == Some(&(wheel.clone(), modified)) {
            return Err(PublishError::BuildFailed {
                target: variant.to_string(),
                message: format!("build did not produce a new wheel (newest is {})", wheel.display()),
            });
        }

        tracing::info!(variant, wheel = %wheel.display(), "build finished");
        Ok(wheel)
    }
}

fn modified_time(path: &Path) -> SystemTime {
    path.metadata()
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
