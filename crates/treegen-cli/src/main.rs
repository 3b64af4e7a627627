//! treegen - generate L-system trees through the external mesh tools
//!
//! ## Commands
//!
//! - `generate`: run one grammar through build and render, print the report
//! - `resolve`: map an artifact reference back to its file
//! - `doctor`: check the display and tool binaries
//! - `purge`: delete artifacts older than a cutoff

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use treegen_core::{obs, report, ArtifactRef, ArtifactStore, PipelineConfig};
use treegen_pipeline::{display, DisplayProbe, GenerationPipeline, ProcessRunner};

#[derive(Parser)]
#[command(name = "treegen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bounded-time L-system tree generation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Command-line overrides applied on top of `TREEGEN_*` environment settings.
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// CPU-time ceiling per stage, in seconds
    #[arg(long, global = true)]
    cpu_limit: Option<u64>,

    /// Supervisory wall-clock multiplier of the CPU ceiling
    #[arg(long, global = true)]
    wall_factor: Option<u32>,

    /// Artifact directory
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Build stage executable
    #[arg(long, global = true)]
    build_cmd: Option<PathBuf>,

    /// Render stage executable
    #[arg(long, global = true)]
    render_cmd: Option<PathBuf>,

    /// Iteration override passed to the build stage
    #[arg(long, global = true)]
    iterations: Option<u32>,

    /// X display used by the render stage
    #[arg(long, global = true)]
    display: Option<String>,
}

impl ConfigOverrides {
    fn apply(self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(v) = self.cpu_limit {
            config.cpu_limit_secs = v;
        }
        if let Some(v) = self.wall_factor {
            config.wall_factor = v;
        }
        if let Some(v) = self.artifact_dir {
            config.artifact_dir = v;
        }
        if let Some(v) = self.build_cmd {
            config.build_command = v;
        }
        if let Some(v) = self.render_cmd {
            config.render_command = v;
        }
        if self.iterations.is_some() {
            config.build_iterations = self.iterations;
        }
        if let Some(v) = self.display {
            config.display = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a mesh and preview image from an L-system grammar
    Generate {
        /// Grammar file (default: read from stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Do not check for the X display before rendering
        #[arg(long)]
        skip_display_check: bool,
    },

    /// Print the file path behind an artifact reference
    Resolve {
        /// Reference as printed by `generate` (e.g. L3D_<id>.image)
        reference: String,
    },

    /// Check that the display and stage binaries are available
    Doctor,

    /// Delete artifacts older than the given age
    Purge {
        /// Minimum age in seconds
        #[arg(long)]
        older_than: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    treegen_core::init_tracing(cli.json, level);

    let config = PipelineConfig::from_env().context("Invalid TREEGEN_* configuration")?;
    let config = cli.overrides.apply(config)?;

    match cli.command {
        Commands::Generate {
            input,
            skip_display_check,
        } => cmd_generate(&config, input.as_deref(), skip_display_check).await,
        Commands::Resolve { reference } => cmd_resolve(&config, &reference),
        Commands::Doctor => Ok(cmd_doctor(&config)),
        Commands::Purge { older_than } => cmd_purge(&config, older_than),
    }
}

/// Run one submission and print its report as JSON
async fn cmd_generate(
    config: &PipelineConfig,
    input: Option<&Path>,
    skip_display_check: bool,
) -> Result<ExitCode> {
    let submission = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read grammar file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read grammar from stdin")?;
            buf
        }
    };

    let probe = if skip_display_check {
        DisplayProbe::Skip
    } else {
        DisplayProbe::default()
    };
    let runner = ProcessRunner::with_display_probe(probe);
    let pipeline = GenerationPipeline::new(config, Arc::new(runner))
        .context("Failed to open artifact store")?;

    info!(
        cpu_limit_secs = config.cpu_limit_secs,
        artifact_dir = %config.artifact_dir.display(),
        "Starting generation"
    );
    let outcome = pipeline.run(&submission).await;
    let result = report(&outcome);

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map a reference to its file path inside the artifact directory
fn cmd_resolve(config: &PipelineConfig, reference: &str) -> Result<ExitCode> {
    let reference: ArtifactRef = reference.parse()?;
    let store = ArtifactStore::open(&config.artifact_dir)?;
    let path = store.resolve(&reference)?;
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Check the environment the stages depend on
fn cmd_doctor(config: &PipelineConfig) -> ExitCode {
    let mut healthy = true;

    match display::probe(&config.display) {
        Ok(()) => println!("display {}: ok", config.display),
        Err(e) => {
            healthy = false;
            println!("display {}: {e}", config.display);
        }
    }

    for (stage, program) in [
        ("build", &config.build_command),
        ("render", &config.render_command),
    ] {
        match find_program(program) {
            Some(path) => println!("{stage} tool: {}", path.display()),
            None => {
                healthy = false;
                println!("{stage} tool: {} not found", program.display());
            }
        }
    }

    match ArtifactStore::open(&config.artifact_dir) {
        Ok(store) => println!("artifact dir: {}", store.root().display()),
        Err(e) => {
            healthy = false;
            println!("artifact dir: {e}");
        }
    }

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Remove artifacts whose last modification is older than the cutoff
fn cmd_purge(config: &PipelineConfig, older_than: u64) -> Result<ExitCode> {
    let store = ArtifactStore::open(&config.artifact_dir)?;
    let removed = store.purge_older_than(Duration::from_secs(older_than))?;
    obs::emit_artifacts_purged(&store.root().display().to_string(), removed);
    println!("Removed {removed} artifact file(s)");
    Ok(ExitCode::SUCCESS)
}

/// Locate an executable the way `execvp` would.
fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
