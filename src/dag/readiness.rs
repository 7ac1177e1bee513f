//! Readiness query over live completion state.
//!
//! Nothing here caches: completion is owned by the durable status store and
//! can change between calls, so callers pass the current completed set every
//! time.

use crate::dag::builder::Dag;
use crate::node::NodeId;
use std::collections::HashSet;

/// Where a run stands relative to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Every node is complete.
    AllComplete,
    /// These nodes can start now, ascending.
    Ready(Vec<NodeId>),
    /// Nothing is ready, yet these nodes are still incomplete.
    Deadlock { remaining: Vec<NodeId> },
}

/// Ids whose dependencies are all complete and which are not complete
/// themselves, ascending.
pub fn get_ready_nodes(dag: &Dag, completed: &HashSet<NodeId>) -> Vec<NodeId> {
    dag.iter()
        .filter(|(id, _)| !completed.contains(*id))
        .filter(|(_, node)| node.parents.iter().all(|p| completed.contains(p)))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Classify the current state of a run.
///
/// `excluded` holds nodes that may not be selected even when their
/// dependencies are met (for example nodes marked failed out-of-band). The
/// graph is acyclic by construction, so an empty ready list with incomplete
/// nodes can only come from such externally corrupted status. It is
/// reported as a deadlock and must not be retried.
pub fn check_progress(
    dag: &Dag,
    completed: &HashSet<NodeId>,
    excluded: &HashSet<NodeId>,
) -> Progress {
    let remaining: Vec<NodeId> = dag
        .ids()
        .filter(|id| !completed.contains(*id))
        .cloned()
        .collect();
    if remaining.is_empty() {
        return Progress::AllComplete;
    }

    let ready: Vec<NodeId> = get_ready_nodes(dag, completed)
        .into_iter()
        .filter(|id| !excluded.contains(id))
        .collect();
    if ready.is_empty() {
        Progress::Deadlock { remaining }
    } else {
        Progress::Ready(ready)
    }
}
