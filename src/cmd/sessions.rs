//! Registry and worktree listings: `wavefront sessions` and `worktrees`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;

use wavefront::config::Settings;
use wavefront::git::SystemGit;
use wavefront::session::{SessionRegistry, SessionStatus};
use wavefront::worktree::{SCRATCH_DIR, WorktreeManager};

/// First eight characters of a session id.
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

pub fn cmd_sessions(repo_root: &Path) -> Result<()> {
    let registry = SessionRegistry::for_repo(repo_root);
    let sessions = registry.all_sessions()?;

    println!();
    if sessions.is_empty() {
        println!("No sessions registered.");
        println!();
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<8} {:<8} {:<8} Branch",
        "Session", "Status", "Node", "Owner", "PID"
    );
    for session in &sessions {
        let status = format!("{:<8}", session.status.to_string());
        let status = match session.status {
            SessionStatus::Active => style(status).green(),
            SessionStatus::Idle => style(status).yellow(),
            SessionStatus::Done => style(status).dim(),
        };
        let node = session
            .node_ref
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {} {:<8} {:<8} {:<8} {}",
            short_id(&session.id),
            status,
            node,
            session.owner,
            session.pid,
            session.branch
        );
        if !session.worktree_path.exists() {
            println!(
                "           {}",
                style(format!(
                    "worktree missing: {}",
                    session.worktree_path.display()
                ))
                .red()
            );
        }
    }
    println!();
    Ok(())
}

pub fn cmd_worktrees(repo_root: &Path, prune_stale: bool) -> Result<()> {
    let settings = Settings::new(repo_root.to_path_buf())?;
    let manager = WorktreeManager::new(Arc::new(SystemGit), &settings.toml.project.namespace);

    if prune_stale {
        let registry = SessionRegistry::for_repo(&settings.repo_root);
        let removed = registry.prune_stale()?;
        manager.prune(&settings.repo_root);
        println!(
            "Removed {} stale session{}.",
            removed.len(),
            if removed.len() == 1 { "" } else { "s" }
        );
    }

    let entries = manager.list_worktrees(&settings.repo_root)?;
    println!();
    for entry in &entries {
        let branch = entry.branch.as_deref().unwrap_or("(detached)");
        let managed = entry
            .path
            .components()
            .any(|c| c.as_os_str() == SCRATCH_DIR);
        let marker = match (managed, entry.prunable) {
            (_, true) => style(" prunable").red().to_string(),
            (true, false) => style(" wavefront").cyan().to_string(),
            (false, false) => String::new(),
        };
        println!("  {}  {}{}", entry.path.display(), branch, marker);
    }
    println!();
    Ok(())
}
