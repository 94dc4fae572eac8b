use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor::conductor_config::{CONDUCTOR_DIR, FailurePolicy};
use conductor::exit_codes;
use conductor::logging::{self, LogFormat};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Dependency-ordered phase pipeline runner with an append-only manifest")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Also write JSON logs to .conductor/logs/ (rotated daily)
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .conductor/ with the reference pipeline
    Init {
        /// Overwrite an existing conductor.toml
        #[arg(long)]
        force: bool,
    },
    /// Run the pipeline for a feature, resuming from its manifest
    Run(RunArgs),
    /// Check a feature identifier without running anything
    Validate { feature: String },
    /// Show phase dependencies, parallel groups and execution waves
    Graph,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Inspect a feature's manifest
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
    /// Extract the quality score from an artifact
    Score {
        artifact: PathBuf,
        /// Threshold to compare against (defaults to quality.threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(clap::Args, Clone)]
pub struct RunArgs {
    /// Feature identifier (validated before use)
    pub feature: String,

    /// Run only these phases (comma-separated); the others must already have succeeded
    #[arg(long, value_delimiter = ',')]
    pub phases: Option<Vec<String>>,

    /// Re-run phases that already succeeded
    #[arg(long)]
    pub force: bool,

    /// Per-phase timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum quality gate evaluations
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Tool profile id
    #[arg(long)]
    pub profile: Option<String>,

    /// What to do when a phase fails: halt, abort, retry, skip, prompt
    #[arg(long)]
    pub on_failure: Option<FailurePolicy>,

    /// Keep an artifact that never reached the quality threshold
    #[arg(long)]
    pub accept_low_quality: bool,

    /// UI output mode: full, minimal, json
    #[arg(long, default_value = "full")]
    pub ui: String,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum ManifestCommands {
    /// Print every entry
    Show { feature: String },
    /// Check that every line is a well-formed record
    Verify { feature: String },
    /// Print the most recent entry for a phase
    Last { feature: String, phase: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            ExitCode::from(exit_codes::for_error(&err))
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let log_dir = cli
        .log_file
        .then(|| project_dir.join(CONDUCTOR_DIR).join("logs"));
    let _log_guard = logging::init(cli.verbose, cli.log_format, log_dir.as_deref())?;

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force),
        Commands::Run(args) => cmd::cmd_run(project_dir, args.clone(), cli.verbose).await,
        Commands::Validate { feature } => cmd::cmd_validate(&project_dir, feature),
        Commands::Graph => cmd::cmd_graph(&project_dir),
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone()),
        Commands::Manifest { command } => cmd::cmd_manifest(&project_dir, command.clone()),
        Commands::Score {
            artifact,
            threshold,
        } => cmd::cmd_score(&project_dir, artifact, *threshold),
    }
}
