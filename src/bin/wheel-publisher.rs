//! Wheel Publisher CLI
//!
//! Multi-variant wheel release pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wheel_publisher::build::{BuildConfig, CommandBuilder, WheelFilename};
use wheel_publisher::core::{
    Artifact, BuildSettings, ConfigLoadOptions, ConfigLoader, ConfirmationSource,
    PublishOptionsConfig, RebuildPolicy, ReleaseConfig,
};
use wheel_publisher::orchestration::{
    BatchCoordinator, InteractivePrompt, NonInteractiveDecline, PreAuthorized, PublishOrchestrator,
    ReleaseCandidate, RunReport, VenvInstallVerifier,
};
use wheel_publisher::plugins::{RemoteRegistryClient, UPLOAD_TIMEOUT_FACTOR};
use wheel_publisher::telemetry::{init_tracing, parse_level};
use wheel_publisher::validation::{ArtifactVerifier, CommandLinter, VersionResolver};

/// Multi-variant wheel release pipeline
#[derive(Parser)]
#[command(name = "wheel-publisher")]
#[command(version)]
#[command(about = "Build, verify and publish wheels for every CPU variant", long_about = None)]
struct Cli {
    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Release the selected variants
    Publish {
        /// Variant to release (repeatable; defaults to the configured list)
        #[arg(long = "variant", value_name = "VARIANT")]
        variants: Vec<String>,

        /// Dist directory searched for built wheels
        #[arg(long)]
        dist: Option<PathBuf>,

        /// Configuration file (defaults to ./.release-config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Variant definitions (defaults to build_config.json)
        #[arg(long)]
        build_config: Option<PathBuf>,

        /// Confirm the production upload up front
        #[arg(short, long)]
        yes: bool,

        /// Never prompt; production uploads are declined without --yes
        #[arg(long)]
        non_interactive: bool,

        /// Write the run report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Discover and verify wheels without publishing
    Check {
        #[arg(long = "variant", value_name = "VARIANT")]
        variants: Vec<String>,

        #[arg(long)]
        dist: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        build_config: Option<PathBuf>,
    },

    /// Print the resolved version of a wheel and where it came from
    Version {
        #[arg(value_name = "WHEEL")]
        wheel: PathBuf,
    },

    /// List configured variants
    Variants {
        #[arg(long)]
        build_config: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\nError: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, parse_level(&cli.log_level));

    let project_path = std::env::current_dir().context("cannot determine working directory")?;

    match cli.command {
        Commands::Publish {
            variants,
            dist,
            config,
            build_config,
            yes,
            non_interactive,
            report,
        } => {
            let overrides = Overrides {
                dist,
                build_config,
                non_interactive,
            };
            let config = load_config(&project_path, config, overrides).await?;
            publish_command(&project_path, &config, variants, yes, report).await
        }
        Commands::Check {
            variants,
            dist,
            config,
            build_config,
        } => {
            let overrides = Overrides {
                dist,
                build_config,
                non_interactive: true,
            };
            let config = load_config(&project_path, config, overrides).await?;
            check_command(&project_path, &config, variants).await
        }
        Commands::Version { wheel } => version_command(&project_path, &wheel).await,
        Commands::Variants {
            build_config,
            config,
        } => {
            let overrides = Overrides {
                dist: None,
                build_config,
                non_interactive: false,
            };
            let config = load_config(&project_path, config, overrides).await?;
            variants_command(&project_path, &config).await
        }
    }
}

/// Command-line values layered over every configuration file
struct Overrides {
    dist: Option<PathBuf>,
    build_config: Option<PathBuf>,
    non_interactive: bool,
}

impl Overrides {
    fn into_config(self) -> Option<ReleaseConfig> {
        if self.dist.is_none() && self.build_config.is_none() && !self.non_interactive {
            return None;
        }

        let build = (self.dist.is_some() || self.build_config.is_some()).then(|| BuildSettings {
            config_path: self.build_config.map(|p| p.to_string_lossy().into_owned()),
            dist_dir: self.dist.map(|p| p.to_string_lossy().into_owned()),
            command: None,
        });
        let publish = self.non_interactive.then_some(PublishOptionsConfig {
            confirm: None,
            interactive: Some(false),
        });

        Some(ReleaseConfig {
            version: String::new(),
            extends: None,
            project: None,
            registries: Default::default(),
            release_host: None,
            build,
            verify: None,
            install_verify: None,
            network: None,
            publish,
            security: None,
        })
    }
}

async fn load_config(
    project_path: &Path,
    config_file: Option<PathBuf>,
    overrides: Overrides,
) -> Result<ReleaseConfig> {
    let options = ConfigLoadOptions {
        project_path: project_path.to_path_buf(),
        config_file,
        cli_args: overrides.into_config(),
        env: std::env::vars().collect(),
        skip_global: false,
    };
    let config = ConfigLoader::load(options).await?;

    let validation = ConfigLoader::validate(&config);
    if !validation.valid {
        anyhow::bail!("{}", ConfigLoader::format_validation_result(&validation));
    }
    for warning in &validation.warnings {
        tracing::warn!(field = %warning.field, "{}", warning.message);
    }
    Ok(config)
}

fn resolve_path(project_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_path.join(path)
    }
}

async fn load_build_config(project_path: &Path, config: &ReleaseConfig) -> Result<BuildConfig> {
    let path = resolve_path(project_path, config.build_config_path());
    Ok(BuildConfig::load(&path).await?)
}

/// Variants from the command line, then the config file, then every
/// variant in the build configuration
fn select_candidates(
    requested: Vec<String>,
    config: &ReleaseConfig,
    builds: &BuildConfig,
    dist_dir: &Path,
) -> Result<Vec<ReleaseCandidate>> {
    let mut names = requested;
    if names.is_empty() {
        names = config.variants();
    }
    if names.is_empty() {
        names = builds.variant_names();
    }

    names
        .iter()
        .map(|name| {
            let variant = builds.variant(name)?;
            Ok(ReleaseCandidate::discover(name, &variant.package_name, dist_dir))
        })
        .collect()
}

fn build_orchestrator(
    project_path: &Path,
    config: &ReleaseConfig,
    builds: BuildConfig,
    confirmation: Arc<dyn ConfirmationSource>,
) -> Result<PublishOrchestrator> {
    let dist_dir = resolve_path(project_path, config.dist_dir());

    let builder = CommandBuilder::new(project_path, dist_dir.clone(), config.build_command(), builds)?;

    let mut verifier = ArtifactVerifier::new(config.module().map(str::to_string));
    if let Some(command) = config.linter_command() {
        verifier = verifier.with_linter(Box::new(CommandLinter::new(project_path, command)?));
    }

    let installer = VenvInstallVerifier::new(
        config.python(),
        config.import_name(),
        config.test_registry(),
        config.production_registry(),
        config.timeout() * UPLOAD_TIMEOUT_FACTOR,
    );
    let registry = RemoteRegistryClient::from_config(config, project_path)?;
    let resolver = VersionResolver::standard(project_path, &config.python())?;

    Ok(PublishOrchestrator::new(
        Arc::new(registry),
        Arc::new(builder),
        Arc::new(verifier),
        Arc::new(installer),
        confirmation,
        Arc::new(resolver),
    )
    .with_rebuild_policy(RebuildPolicy::new(config.max_rebuilds()))
    .with_confirmation_required(config.confirm_required())
    .with_state_dir(dist_dir))
}

/// Token cancelled on Ctrl-C; the running phase finishes its cleanup
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            token.cancel();
        }
    });
    cancel
}

async fn publish_command(
    project_path: &Path,
    config: &ReleaseConfig,
    variants: Vec<String>,
    yes: bool,
    report_path: Option<PathBuf>,
) -> Result<i32> {
    let builds = load_build_config(project_path, config).await?;
    let dist_dir = resolve_path(project_path, config.dist_dir());
    let candidates = select_candidates(variants, config, &builds, &dist_dir)?;
    if candidates.is_empty() {
        println!("No variants to release");
        return Ok(0);
    }

    let confirmation: Arc<dyn ConfirmationSource> = if yes {
        Arc::new(PreAuthorized)
    } else if !config.interactive() {
        Arc::new(NonInteractiveDecline)
    } else {
        Arc::new(InteractivePrompt)
    };

    let orchestrator = build_orchestrator(project_path, config, builds, confirmation)?;
    let coordinator = BatchCoordinator::new(orchestrator);
    let report = coordinator.run(&candidates, &cancel_on_ctrl_c()).await;

    finish(&report, report_path).await
}

async fn check_command(
    project_path: &Path,
    config: &ReleaseConfig,
    variants: Vec<String>,
) -> Result<i32> {
    let builds = load_build_config(project_path, config).await?;
    let dist_dir = resolve_path(project_path, config.dist_dir());
    let candidates = select_candidates(variants, config, &builds, &dist_dir)?;

    let orchestrator =
        build_orchestrator(project_path, config, builds, Arc::new(NonInteractiveDecline))?;
    let report = BatchCoordinator::new(orchestrator)
        .check(&candidates, &cancel_on_ctrl_c())
        .await;

    finish(&report, None).await
}

async fn finish(report: &RunReport, report_path: Option<PathBuf>) -> Result<i32> {
    report.print_summary();
    for artifact in &report.artifacts {
        for warning in &artifact.warnings {
            println!("warning [{}]: {}", artifact.artifact.variant, warning);
        }
    }

    if let Some(path) = report_path {
        report
            .write_json(&path)
            .await
            .with_context(|| format!("cannot write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    Ok(report.exit_code())
}

async fn version_command(project_path: &Path, wheel: &Path) -> Result<i32> {
    let package_name = WheelFilename::from_path(wheel)
        .map(|w| w.name)
        .or_else(|| {
            wheel
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let artifact = Artifact::new(wheel, &package_name, "local");

    let resolver = VersionResolver::standard(project_path, "python3")?;
    let resolved = resolver.resolve(&artifact).await?;
    println!("{} (from {})", resolved.version, resolved.source);

    for mismatch in resolver.cross_check(&artifact, &resolved).await {
        println!("warning: {}", mismatch);
    }
    Ok(0)
}

async fn variants_command(project_path: &Path, config: &ReleaseConfig) -> Result<i32> {
    let builds = load_build_config(project_path, config).await?;

    for (name, variant) in &builds.builds {
        println!("\n{} -> {}", name, variant.package_name);
        println!("   {}", variant.description);
        println!("   ISA: {}", variant.isa_features().join(", "));
        for (key, value) in variant.build_env() {
            println!("   {}={}", key, value);
        }
    }
    println!();
    Ok(0)
}
