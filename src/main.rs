use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use wavefront::config::Settings;
use wavefront::logging::{self, LogFormat, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "wavefront")]
#[command(version, about = "Dependency-aware orchestrator for coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Console log format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Any directory inside the target repository (defaults to the current one)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute ready nodes until the plan is complete
    Run {
        /// Stop after completing this many nodes
        #[arg(long)]
        max_nodes: Option<usize>,

        /// Owner segment of session branch names
        #[arg(long)]
        owner: Option<String>,

        /// Branch completed nodes are merged into
        #[arg(long)]
        feature_branch: Option<String>,
    },
    /// Show the plan grouped into parallel waves
    Waves,
    /// List nodes whose dependencies are all complete
    Ready,
    /// Show per-node status
    Status {
        /// Return a node to pending with a fresh attempt budget
        #[arg(long, value_name = "NODE")]
        reset: Option<String>,
    },
    /// List sessions in the registry
    Sessions,
    /// List git worktrees
    Worktrees {
        /// Drop registry entries whose worktree is gone and prune git metadata
        #[arg(long)]
        prune_stale: bool,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default wavefront.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let start_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let repo_root = wavefront::git::discover_repo_root(&start_dir)?;

    // Only runs leave a log file behind
    let log_dir = match cli.command {
        Commands::Run { .. } => Some(Settings::new(repo_root.clone())?.log_dir()),
        _ => None,
    };
    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        format: cli.log_format,
        log_dir,
    })?;

    match &cli.command {
        Commands::Run {
            max_nodes,
            owner,
            feature_branch,
        } => {
            return cmd::cmd_run(
                repo_root,
                *max_nodes,
                owner.clone(),
                feature_branch.clone(),
            )
            .await;
        }
        Commands::Waves => cmd::cmd_waves(&repo_root)?,
        Commands::Ready => cmd::cmd_ready(&repo_root)?,
        Commands::Status { reset } => cmd::cmd_status(&repo_root, reset.as_deref())?,
        Commands::Sessions => cmd::cmd_sessions(&repo_root)?,
        Commands::Worktrees { prune_stale } => cmd::cmd_worktrees(&repo_root, *prune_stale)?,
        Commands::Config { command } => cmd::cmd_config(&repo_root, command.clone())?,
    }

    Ok(ExitCode::SUCCESS)
}
