//! InstallVerify: install the released version from the test index into a
//! throwaway virtual environment, import it and read its version back
//!
//! The environment lives in a temporary directory that is removed on every
//! exit path, including cancellation.

use crate::core::config::RegistryEndpoint;
use crate::core::error::PublishError;
use crate::core::traits::{Artifact, InstallVerifier};
use crate::security::command_executor::{SafeCommandExecutor, output_tail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Imports argv[1] and prints the installed version of distribution argv[2]
const IMPORT_SCRIPT: &str = "import sys, importlib, importlib.metadata as m; \
importlib.import_module(sys.argv[1]); print(m.version(sys.argv[2]))";

/// Installs into a fresh venv per artifact
pub struct VenvInstallVerifier {
    work_root: PathBuf,
    python: String,
    import_name: Option<String>,
    test_index: RegistryEndpoint,
    production_index: RegistryEndpoint,
    timeout: Duration,
}

impl VenvInstallVerifier {
    pub fn new(
        python: String,
        import_name: Option<String>,
        test_index: RegistryEndpoint,
        production_index: RegistryEndpoint,
        timeout: Duration,
    ) -> Self {
        Self {
            work_root: std::env::temp_dir(),
            python,
            import_name,
            test_index,
            production_index,
            timeout,
        }
    }

    /// Create the disposable environments under `dir` instead of the system
    /// temp directory
    pub fn with_work_root(mut self, dir: PathBuf) -> Self {
        self.work_root = dir;
        self
    }

    fn failed(artifact: &Artifact, message: String) -> PublishError {
        PublishError::InstallVerifyFailed {
            target: artifact.variant.clone(),
            message,
        }
    }

    fn import_name_for(&self, artifact: &Artifact) -> String {
        self.import_name
            .clone()
            .unwrap_or_else(|| artifact.package_name.replace('-', "_"))
    }

    async fn run_step(
        &self,
        executor: &SafeCommandExecutor,
        artifact: &Artifact,
        step: &str,
        program: &str,
        args: &[&str],
    ) -> Result<String, PublishError> {
        let output = executor
            .execute(program, args)
            .await
            .map_err(|e| match PublishError::from_command(&artifact.variant, e) {
                timeout @ PublishError::TimeoutError { .. } => timeout,
                other => Self::failed(artifact, format!("{}: {}", step, other)),
            })?;

        if !output.status.success() {
            return Err(Self::failed(
                artifact,
                format!("{} failed: {}", step, output_tail(&output, 5)),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn install_and_import(
        &self,
        workspace: &Path,
        artifact: &Artifact,
        version: &str,
    ) -> Result<String, PublishError> {
        let executor = SafeCommandExecutor::new(workspace)
            .map_err(|e| Self::failed(artifact, e.to_string()))?
            .with_timeout(self.timeout);

        let venv = workspace.join("venv");
        let venv_arg = venv.to_string_lossy();
        self.run_step(
            &executor,
            artifact,
            "venv creation",
            &self.python,
            &["-m", "venv", venv_arg.as_ref()],
        )
        .await?;

        let pip = venv_bin(&venv, "pip");
        let requirement = format!("{}=={}", artifact.package_name, version);
        self.run_step(
            &executor,
            artifact,
            "install",
            &pip.to_string_lossy(),
            &[
                "install",
                "--no-cache-dir",
                "--index-url",
                self.test_index.index_url.as_str(),
                "--extra-index-url",
                self.production_index.index_url.as_str(),
                requirement.as_str(),
            ],
        )
        .await?;

        let python = venv_bin(&venv, "python");
        let import_name = self.import_name_for(artifact);
        let installed = self
            .run_step(
                &executor,
                artifact,
                "import",
                &python.to_string_lossy(),
                &["-c", IMPORT_SCRIPT, import_name.as_str(), artifact.package_name.as_str()],
            )
            .await?;

        let installed = installed.lines().last().unwrap_or_default().trim().to_string();
        if installed.is_empty() {
            return Err(Self::failed(artifact, "import check printed no version".to_string()));
        }
        Ok(installed)
    }
}

fn venv_bin(venv: &Path, program: &str) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join(format!("{}.exe", program))
    } else {
        venv.join("bin").join(program)
    }
}

#[async_trait]
impl InstallVerifier for VenvInstallVerifier {
    async fn verify_install(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<String, PublishError> {
        let version = artifact
            .version()
            .ok_or_else(|| Self::failed(artifact, "version not resolved".to_string()))?;

        let workspace = tempfile::Builder::new()
            .prefix("wheel-publisher-verify-")
            .tempdir_in(&self.work_root)
            .map_err(|e| Self::failed(artifact, format!("cannot create workspace: {}", e)))?;

        tracing::info!(
            variant = %artifact.variant,
            requirement = %format!("{}=={}", artifact.package_name, version),
            workspace = %workspace.path().display(),
            "installing from test index"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PublishError::Cancelled {
                target: artifact.variant.clone(),
            }),
            result = self.install_and_import(workspace.path(), artifact, version) => result,
        };

        teardown(workspace);
        result
    }
}

fn teardown(workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    if let Err(error) = workspace.close() {
        tracing::warn!(workspace = %path.display(), %error, "could not remove verification workspace");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> RegistryEndpoint {
        RegistryEndpoint {
            api_url: format!("https://{}", host),
            upload_url: format!("https://{}/legacy/", host),
            index_url: format!("https://{}/simple/", host),
        }
    }

    fn verifier(work_root: &Path, python: &str) -> VenvInstallVerifier {
        VenvInstallVerifier::new(
            python.to_string(),
            None,
            endpoint("test.example"),
            endpoint("prod.example"),
            Duration::from_secs(30),
        )
        .with_work_root(work_root.to_path_buf())
    }

    fn resolved_artifact() -> Artifact {
        let mut artifact = Artifact::new("dist/demo_pkg-2.0.0-py3-none-any.whl", "demo-pkg", "noavx512");
        artifact.finalize_version("2.0.0").unwrap();
        artifact
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_import_name_defaults_to_package() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            verifier(root.path(), "python3").import_name_for(&resolved_artifact()),
            "demo_pkg"
        );
    }

    #[tokio::test]
    async fn test_unresolved_version_fails() {
        let root = TempDir::new().unwrap();
        let artifact = Artifact::new("dist/demo.whl", "demo-pkg", "noavx512");

        let err = verifier(root.path(), "python3")
            .verify_install(&artifact, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INSTALL_VERIFY_FAILED");
    }

    #[tokio::test]
    async fn test_cancelled_before_install_removes_workspace() {
        let root = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = verifier(root.path(), "python3")
            .verify_install(&resolved_artifact(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CANCELLED");
        assert!(is_empty(root.path()));
    }

    #[tokio::test]
    async fn test_disallowed_interpreter_fails_and_cleans_up() {
        let root = TempDir::new().unwrap();

        let err = verifier(root.path(), "ruby")
            .verify_install(&resolved_artifact(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INSTALL_VERIFY_FAILED");
        assert!(err.to_string().contains("venv creation"));
        assert!(is_empty(root.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_interpreter_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        // A stand-in interpreter whose venv contains stub pip/python
        let fake = tools.path().join("python3");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             mkdir -p \"$3/bin\"\n\
             printf '#!/bin/sh\\nexit 0\\n' > \"$3/bin/pip\"\n\
             printf '#!/bin/sh\\necho 2.0.0\\n' > \"$3/bin/python\"\n\
             chmod +x \"$3/bin/pip\" \"$3/bin/python\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let installed = verifier(root.path(), fake.to_str().unwrap())
            .verify_install(&resolved_artifact(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(installed, "2.0.0");
        assert!(is_empty(root.path()));
    }
}
