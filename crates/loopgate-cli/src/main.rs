mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{checkpoint::CheckpointSubcommand, config::ConfigSubcommand, run::RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "loopgate",
    about = "Four-loop review pipeline: free checks, reviewer, external review, and the ship gate",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .claude/ or .git/)
    #[arg(long, global = true, env = "LOOPGATE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the review loops and record the ship decision
    Run(RunArgs),

    /// Record reviewer output (a file, or `-` for stdin) against the current state
    RecordReview {
        /// Path to the reviewer's raw output
        input: String,
    },

    /// Print the reviewer prompt for the staged changes
    Prompt,

    /// Show the current loop state (stale state is discarded)
    Status,

    /// Check whether shipping is allowed; exits 1 when blocked
    Ship {
        /// Skip the gate entirely
        #[arg(long)]
        force: bool,
    },

    /// Show the remaining external review quota for this hour
    Quota,

    /// Scan files for leaked credentials (default: staged files)
    Scan {
        files: Vec<String>,
    },

    /// Manage command checkpoints
    Checkpoint {
        #[command(subcommand)]
        subcommand: CheckpointSubcommand,
    },

    /// Show or validate .claude/loop-config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::RecordReview { input } => cmd::review::record(&root, &input, cli.json),
        Commands::Prompt => cmd::review::prompt(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Ship { force } => cmd::ship::run(&root, force, cli.json),
        Commands::Quota => cmd::quota::run(&root, cli.json),
        Commands::Scan { files } => cmd::scan::run(&root, files, cli.json),
        Commands::Checkpoint { subcommand } => cmd::checkpoint::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
