//! Plan execution: `wavefront run`.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

use wavefront::agent::CommandAgent;
use wavefront::config::Settings;
use wavefront::git::SystemGit;
use wavefront::orchestrator::{Collaborators, Orchestrator, OrchestratorConfig, RunOutcome};
use wavefront::status::JsonStatusStore;
use wavefront::verify::CommandVerifier;
use wavefront::worktree::WorktreeManager;

use super::plan::load_plan;

/// Exit code when `--max-nodes` stopped the run before the plan finished.
pub const EXIT_NODE_LIMIT: u8 = 3;

pub async fn cmd_run(
    repo_root: PathBuf,
    max_nodes: Option<usize>,
    owner: Option<String>,
    feature_branch: Option<String>,
) -> Result<ExitCode> {
    let settings = Settings::with_cli_args(repo_root, owner, feature_branch)?;
    for warning in settings.validate() {
        warn!("{}", warning);
    }
    let nodes = load_plan(&settings)?;

    let config = OrchestratorConfig {
        repo_root: settings.repo_root.clone(),
        feature_branch: settings.feature_branch()?,
        owner: settings.owner(),
        role: settings.toml.agent.role.clone(),
        role_instructions: settings.toml.agent.instructions.clone(),
        context_file: Some(settings.context_file()),
        gates: settings.toml.verify.gates.clone(),
        retry: settings.retry_policy(),
        max_nodes,
        remote: settings
            .toml
            .project
            .remote
            .clone()
            .filter(|r| !r.trim().is_empty()),
    };
    let collaborators = Collaborators {
        agent: Arc::new(CommandAgent::new(
            &settings.agent_command(),
            settings.toml.agent.args.clone(),
            settings.agent_timeout(),
        )),
        verifier: Arc::new(CommandVerifier::new(settings.gate_timeout())),
        status: Arc::new(JsonStatusStore::for_repo(&settings.repo_root)),
        worktrees: WorktreeManager::new(Arc::new(SystemGit), &settings.toml.project.namespace),
    };

    println!();
    println!(
        "{} {} nodes, merging into {}",
        style("Running").bold(),
        nodes.len(),
        style(&config.feature_branch).cyan()
    );

    let result = match Orchestrator::new(config, nodes, collaborators) {
        Ok(orchestrator) => orchestrator.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            for executed in &summary.executed {
                let commit = executed
                    .commit_ref
                    .as_deref()
                    .map(|c| &c[..c.len().min(8)])
                    .unwrap_or("no changes");
                println!(
                    "  {} {} after {} attempt(s) ({})",
                    style("✓").green(),
                    executed.node,
                    executed.attempts,
                    commit
                );
            }
            println!();
            match summary.outcome {
                RunOutcome::AllComplete => {
                    println!("{}", style("All nodes complete.").green().bold());
                    Ok(ExitCode::SUCCESS)
                }
                RunOutcome::NodeLimitReached => {
                    println!(
                        "{}",
                        style("Node limit reached; run again to continue.").yellow()
                    );
                    Ok(ExitCode::from(EXIT_NODE_LIMIT))
                }
            }
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&e.report())?);
            eprintln!("{} {}", style("error:").red().bold(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}
