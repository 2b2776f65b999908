//! Delegated distribution lint (`twine check --strict` by default)

use crate::core::error::PublishError;
use crate::core::traits::DistributionLinter;
use crate::security::command_executor::{SafeCommandExecutor, output_tail};
use async_trait::async_trait;
use std::path::Path;

/// Runs an external checker with the wheel path appended
pub struct CommandLinter {
    executor: SafeCommandExecutor,
    command: Vec<String>,
}

impl CommandLinter {
    pub fn new(working_dir: &Path, command: Vec<String>) -> Result<Self, PublishError> {
        if command.is_empty() {
            return Err(PublishError::config("linter command is empty"));
        }
        let executor = SafeCommandExecutor::new(working_dir)
            .map_err(|e| PublishError::from_command("linter", e))?;
        Ok(Self { executor, command })
    }
}

#[async_trait]
impl DistributionLinter for CommandLinter {
    async fn check(&self, path: &Path) -> Result<(), String> {
        let path = path.to_string_lossy();
        let mut args: Vec<&str> = self.command[1..].iter().map(String::as_str).collect();
        args.push(&path);

        let output = self
            .executor
            .execute(&self.command[0], &args)
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(output_tail(&output, 3))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linter(script: &str) -> CommandLinter {
        CommandLinter::new(
            &std::env::temp_dir(),
            vec!["sh".to_string(), "-c".to_string(), script.to_string(), "lint".to_string()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_linter_receives_wheel_path() {
        // $1 is the appended wheel path
        let linter = linter("test \"$1\" = /tmp/demo.whl");

        assert!(linter.check(Path::new("/tmp/demo.whl")).await.is_ok());
    }

    #[tokio::test]
    async fn test_linter_failure_carries_output() {
        let linter = linter("echo 'FAILED: description' >&2; exit 1");

        let err = linter.check(Path::new("/tmp/demo.whl")).await.unwrap_err();

        assert!(err.contains("FAILED: description"));
    }

    #[tokio::test]
    async fn test_disallowed_linter() {
        let linter = CommandLinter::new(&std::env::temp_dir(), vec!["curl".to_string()]).unwrap();

        let err = linter.check(Path::new("/tmp/demo.whl")).await.unwrap_err();

        assert!(err.contains("not in the allowed whitelist"));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandLinter::new(&std::env::temp_dir(), Vec::new()).is_err());
    }
}
