//! Confirmation sources for the production upload

use crate::core::traits::{Artifact, ConfirmationSource, PublishTarget};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// `--yes`: the upload was authorized up front
pub struct PreAuthorized;

#[async_trait]
impl ConfirmationSource for PreAuthorized {
    async fn confirm(&self, artifact: &Artifact, target: PublishTarget) -> bool {
        tracing::info!(variant = %artifact.variant, %target, "upload pre-authorized");
        true
    }
}

/// Non-interactive run without authorization: every upload is declined
pub struct NonInteractiveDecline;

#[async_trait]
impl ConfirmationSource for NonInteractiveDecline {
    async fn confirm(&self, artifact: &Artifact, target: PublishTarget) -> bool {
        tracing::warn!(
            variant = %artifact.variant,
            %target,
            "no confirmation available in non-interactive mode (pass --yes)"
        );
        false
    }
}

/// Asks on the terminal
pub struct InteractivePrompt;

impl InteractivePrompt {
    async fn ask(message: &str) -> io::Result<bool> {
        let mut stdout = io::stdout();
        stdout.write_all(format!("{} (yes/no): ", message).as_bytes()).await?;
        stdout.flush().await?;

        let mut reader = BufReader::new(io::stdin());
        let mut answer = String::new();
        reader.read_line(&mut answer).await?;

        Ok(is_yes(&answer))
    }
}

fn is_yes(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    answer == "yes" || answer == "y"
}

#[async_trait]
impl ConfirmationSource for InteractivePrompt {
    async fn confirm(&self, artifact: &Artifact, target: PublishTarget) -> bool {
        let message = format!(
            "Publish {} {} ({}) to {}?",
            artifact.package_name,
            artifact.version().unwrap_or("?"),
            artifact.variant,
            target
        );
        match Self::ask(&message).await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::warn!(%error, "could not read confirmation, treating as declined");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact::new("dist/demo_pkg-2.0.0-py3-none-any.whl", "demo-pkg", "noavx512")
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("yes\n"));
        assert!(is_yes(" Y "));
        assert!(!is_yes("no"));
        assert!(!is_yes(""));
        assert!(!is_yes("yess"));
    }

    #[tokio::test]
    async fn test_pre_authorized() {
        assert!(PreAuthorized.confirm(&artifact(), PublishTarget::ProductionRegistry).await);
    }

    #[tokio::test]
    async fn test_non_interactive_declines() {
        assert!(!NonInteractiveDecline.confirm(&artifact(), PublishTarget::ProductionRegistry).await);
    }
}
