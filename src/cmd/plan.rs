//! Plan inspection commands: `wavefront waves`, `ready` and `status`.

use anyhow::{Context, Result};
use console::style;
use std::collections::BTreeMap;
use std::path::Path;

use wavefront::config::Settings;
use wavefront::dag::{Dag, build_dag, compute_execution_waves, get_ready_nodes};
use wavefront::node::{NodeId, NodeSpec, NodeStatus, PlanFile};
use wavefront::session::SessionRegistry;
use wavefront::status::{JsonStatusStore, StatusStore, completed_set};

/// Read `.wavefront/plan.json` as canonical node definitions.
pub fn load_plan(settings: &Settings) -> Result<Vec<NodeSpec>> {
    let plan_path = settings.plan_file();
    if !plan_path.exists() {
        anyhow::bail!(
            "No plan found at {}. Write a milestones or requirements plan there first.",
            plan_path.display()
        );
    }
    let plan = PlanFile::load(&plan_path)?;
    Ok(plan.nodes())
}

fn load_graph(repo_root: &Path) -> Result<(Vec<NodeSpec>, Dag)> {
    let settings = Settings::new(repo_root.to_path_buf())?;
    let nodes = load_plan(&settings)?;
    let dag = build_dag(&nodes).context("Invalid plan")?;
    Ok((nodes, dag))
}

fn names(nodes: &[NodeSpec]) -> BTreeMap<&NodeId, &str> {
    nodes.iter().map(|n| (&n.id, n.name.as_str())).collect()
}

pub fn cmd_waves(repo_root: &Path) -> Result<()> {
    let (nodes, dag) = load_graph(repo_root)?;
    let names = names(&nodes);
    let plan = compute_execution_waves(&dag);

    println!();
    for wave in &plan.waves {
        println!(
            "{} ({} node{})",
            style(format!("Wave {}", wave.wave_number)).bold(),
            wave.node_ids.len(),
            if wave.node_ids.len() == 1 { "" } else { "s" }
        );
        for id in &wave.node_ids {
            println!("  {:<8} {}", id, names.get(id).copied().unwrap_or_default());
        }
    }
    println!();
    println!(
        "{} nodes in {} waves, max parallelism {}{}",
        plan.node_count(),
        plan.waves.len(),
        plan.max_parallelism,
        if plan.is_sequential { " (sequential)" } else { "" }
    );
    println!();
    Ok(())
}

pub fn cmd_ready(repo_root: &Path) -> Result<()> {
    let (nodes, dag) = load_graph(repo_root)?;
    let names = names(&nodes);
    let store = JsonStatusStore::for_repo(repo_root);
    let completed = store.completed()?;
    let registry = SessionRegistry::for_repo(repo_root);

    let ready = get_ready_nodes(&dag, &completed);
    println!();
    if ready.is_empty() {
        if dag.ids().all(|id| completed.contains(id)) {
            println!("All nodes complete.");
        } else {
            println!("No node is ready.");
        }
        println!();
        return Ok(());
    }

    println!("{}", style("Ready nodes").bold());
    for id in &ready {
        let claimed = if registry.is_node_claimed(id)? {
            style(" (claimed)").yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<8} {}{}",
            id,
            names.get(id).copied().unwrap_or_default(),
            claimed
        );
    }
    println!();
    Ok(())
}

fn styled_status(status: NodeStatus) -> String {
    let text = format!("{:<12}", status.to_string());
    match status {
        NodeStatus::Complete => style(text).green().to_string(),
        NodeStatus::InProgress => style(text).yellow().to_string(),
        NodeStatus::Failed => style(text).red().to_string(),
        NodeStatus::Pending => style(text).dim().to_string(),
    }
}

pub fn cmd_status(repo_root: &Path, reset: Option<&str>) -> Result<()> {
    let (nodes, dag) = load_graph(repo_root)?;
    let store = JsonStatusStore::for_repo(repo_root);

    if let Some(id) = reset {
        let id = NodeId::from(id);
        if !dag.contains(&id) {
            anyhow::bail!("Unknown node: {}", id);
        }
        store.reset(&id)?;
        println!("Node {} reset to pending.", id);
        return Ok(());
    }

    let records = store.load()?;
    let completed = completed_set(&records);

    println!();
    println!(
        "{:<8} {:<12} {:<9} Name",
        "Node", "Status", "Attempts"
    );
    println!(
        "{:<8} {:<12} {:<9} ----",
        "--------", "------------", "---------"
    );
    for node in &nodes {
        let record = records.get(&node.id).cloned().unwrap_or_default();
        println!(
            "{:<8} {} {:<9} {}",
            node.id,
            styled_status(record.status),
            record.attempts,
            node.name
        );
        if record.status != NodeStatus::Complete {
            for error in record.last_errors.iter().take(3) {
                println!("           {}", style(error).dim());
            }
        }
    }
    println!();
    println!(
        "{}/{} complete",
        dag.ids().filter(|id| completed.contains(*id)).count(),
        dag.len()
    );
    println!();
    Ok(())
}
