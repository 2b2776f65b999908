//! SafeCommandExecutor: whitelisted, timeout-bounded subprocess execution
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only pre-approved program names can execute
//! - **Injection prevention**: Arguments are passed as a vector, never through a shell string
//! - **Working directory validation**: Validates existence before execution
//! - **Timeout control**: Hanging processes are killed when the deadline passes
//!
//! The whitelist is not a sandbox. It checks the program's file name, not its
//! location, so `/any/dir/python` passes, and `sh` is on it because configured
//! build and lint commands run through `sh -c`. It catches typos and keeps
//! stray tools out of the pipeline; it does not contain a hostile config.
//!
//! # Example
//!
//! ```rust,no_run
//! use wheel_publisher::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), wheel_publisher::security::CommandError> {
//! let executor = SafeCommandExecutor::new(std::env::temp_dir())?
//!     .with_timeout(Duration::from_secs(30));
//!
//! let output = executor.execute("twine", &["--version"]).await?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Programs the release pipeline is allowed to run.
///
/// Matched against the file name, so a virtual environment's `bin/python`
/// is accepted the same way as `python` on `PATH`.
const ALLOWED_COMMANDS: &[&str] = &["python", "python3", "pip", "pip3", "twine", "git", "uv", "sh", "bash"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command execution failed (e.g., binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    /// Working directory where commands will be executed
    working_dir: PathBuf,
    /// Optional timeout for command execution
    timeout: Option<Duration>,
}

impl SafeCommandExecutor {
    /// Create a new SafeCommandExecutor with working directory validation.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidWorkingDirectory` if the directory does not exist.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.exists() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Check a program against the whitelist
    pub fn is_allowed(command: &str) -> bool {
        let name = Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);
        let name = name.strip_suffix(".exe").unwrap_or(name);

        // Versioned interpreters such as python3.12
        ALLOWED_COMMANDS.contains(&name) || name.starts_with("python3.")
    }

    /// Execute a whitelisted command.
    ///
    /// # Errors
    ///
    /// - `CommandError::CommandNotAllowed` - Command not in whitelist
    /// - `CommandError::ExecutionFailed` - Binary not found or execution error
    /// - `CommandError::Timeout` - The process outlived the configured timeout
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<Output, CommandError> {
        self.execute_with_env(command, args, &[]).await
    }

    /// Execute a whitelisted command with extra environment variables.
    ///
    /// The child inherits the parent environment; `env` entries are added on
    /// top. Values are never logged.
    pub async fn execute_with_env(
        &self,
        command: &str,
        args: &[&str],
        env: &[(String, String)],
    ) -> Result<Output, CommandError> {
        if !Self::is_allowed(command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        tracing::debug!(command, ?args, cwd = %self.working_dir.display(), "running command");

        let child = cmd
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", command, e)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::Timeout(limit))?,
            None => child.wait_with_output().await,
        };

        output.map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", command, e)))
    }
}

/// Last non-empty lines of a process's stderr (falling back to stdout),
/// for error messages
pub fn output_tail(output: &Output, lines: usize) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        stderr.into_owned()
    };

    let collected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SafeCommandExecutor {
        SafeCommandExecutor::new(std::env::temp_dir()).unwrap()
    }

    #[test]
    fn test_whitelist_matches_file_name() {
        assert!(SafeCommandExecutor::is_allowed("python"));
        assert!(SafeCommandExecutor::is_allowed("/tmp/venv/bin/python"));
        assert!(SafeCommandExecutor::is_allowed("python3.12"));
        assert!(SafeCommandExecutor::is_allowed("twine"));
        assert!(!SafeCommandExecutor::is_allowed("rm"));
        assert!(!SafeCommandExecutor::is_allowed("/usr/bin/curl"));
    }

    #[test]
    fn test_whitelist_ignores_location() {
        assert!(SafeCommandExecutor::is_allowed("/opt/anything/python3"));
        assert!(SafeCommandExecutor::is_allowed("sh"));
        assert!(!SafeCommandExecutor::is_allowed("/opt/anything/ruby"));
        assert!(!SafeCommandExecutor::is_allowed("python3-config"));
    }

    #[tokio::test]
    async fn test_rejected_command_rm() {
        let result = executor().execute("rm", &["-rf", "/"]).await;
        assert!(
            matches!(result, Err(CommandError::CommandNotAllowed(_))),
            "rm should be rejected as not in whitelist"
        );
    }

    #[tokio::test]
    async fn test_rejected_command_eval() {
        let result = executor().execute("eval", &["malicious code"]).await;
        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[test]
    fn test_invalid_working_directory() {
        let result = SafeCommandExecutor::new("/nonexistent/directory/that/does/not/exist");
        assert!(matches!(result, Err(CommandError::InvalidWorkingDirectory(_))));
    }

    #[tokio::test]
    async fn test_output_capture() {
        let output = executor().execute("sh", &["-c", "echo hello"]).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        // The second argument is $0 for the script, not shell syntax
        let output = executor()
            .execute("sh", &["-c", "printf '%s' \"$0\"", "a; rm -rf /"])
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "a; rm -rf /");
    }

    #[tokio::test]
    async fn test_env_injection() {
        let env = vec![("RELEASE_TEST_VALUE".to_string(), "injected".to_string())];
        let output = executor()
            .execute_with_env("sh", &["-c", "printf '%s' \"$RELEASE_TEST_VALUE\""], &env)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "injected");
    }

    #[tokio::test]
    async fn test_command_with_timeout() {
        let executor = executor().with_timeout(Duration::from_millis(100));
        let result = executor.execute("sh", &["-c", "sleep 5"]).await;
        assert!(matches!(result, Err(CommandError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_output_tail_prefers_stderr() {
        let output = executor()
            .execute("sh", &["-c", "echo out; echo one >&2; echo two >&2; echo three >&2"])
            .await
            .unwrap();
        assert_eq!(output_tail(&output, 2), "two\nthree");
    }
}
