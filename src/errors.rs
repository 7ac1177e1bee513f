//! Typed error hierarchy for the wavefront orchestrator.
//!
//! One enum per subsystem:
//! - `GraphError`: structural plan errors, fatal at construction
//! - `WorktreeError`: git worktree lifecycle failures
//! - `RegistryError` / `StatusError`: durable state failures
//! - `OrchestratorError`: run-level failures, tagged with the phase they
//!   came from

use crate::node::NodeId;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Structural errors raised while building the dependency graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node id: {id}")]
    DuplicateNode { id: NodeId },

    #[error("Node {node} depends on unknown node {missing}")]
    MissingDependency { node: NodeId, missing: NodeId },

    #[error("Cycle detected in node dependencies: {}", format_path(.path))]
    CycleDetected { path: Vec<NodeId> },
}

fn node_suffix(node: &Option<NodeId>) -> String {
    node.as_ref()
        .map(|n| format!(" for node {}", n))
        .unwrap_or_default()
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors from the worktree manager.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create worktree for branch {branch} at {path}: {stderr}")]
    CreateFailed {
        branch: String,
        path: PathBuf,
        stderr: String,
    },

    #[error("Failed to merge {branch} into {target}: {stderr}")]
    MergeFailed {
        branch: String,
        target: String,
        stderr: String,
    },

    #[error("Failed to remove worktree at {path}: {reason}")]
    RemoveFailed { path: PathBuf, reason: String },

    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("Repository root {0} has no parent directory for scratch worktrees")]
    NoScratchParent(PathBuf),

    #[error("Failed to acquire merge lock at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the session registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Worktree {path} is already claimed by session {session}")]
    WorktreeClaimed { path: PathBuf, session: String },

    #[error("Node {node} is already claimed by session {session}")]
    NodeClaimed { node: NodeId, session: String },
}

/// Errors from the node status store.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Status store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Status store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Node {0} is already complete")]
    AlreadyComplete(NodeId),
}

/// The orchestrator phase a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Select,
    Dispatch,
    Verify,
    Commit,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Select => write!(f, "SELECT"),
            RunPhase::Dispatch => write!(f, "DISPATCH"),
            RunPhase::Verify => write!(f, "VERIFY"),
            RunPhase::Commit => write!(f, "COMMIT"),
        }
    }
}

/// Errors that stop an orchestrator run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Deadlock: no node is ready but {} remain incomplete ({})", .remaining.len(), format_path(.remaining))]
    Deadlock { remaining: Vec<NodeId> },

    #[error("Node {node} failed verification {attempts} times")]
    MaxAttemptsExceeded {
        node: NodeId,
        attempts: u32,
        last_errors: Vec<String>,
    },

    #[error("Every ready node is claimed by another session: {}", format_path(.nodes))]
    AllReadyNodesClaimed { nodes: Vec<NodeId> },

    #[error("{phase} failed{}: {source}", node_suffix(.node))]
    Phase {
        phase: RunPhase,
        node: Option<NodeId>,
        #[source]
        source: anyhow::Error,
    },
}

impl OrchestratorError {
    /// Wrap a collaborator failure with the phase it happened in.
    pub fn in_phase(
        phase: RunPhase,
        node: Option<&NodeId>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Phase {
            phase,
            node: node.cloned(),
            source: source.into(),
        }
    }

    /// Structured payload describing this failure.
    pub fn report(&self) -> FatalReport {
        let (kind, node, phase) = match self {
            OrchestratorError::Graph(_) => ("structural", None, None),
            OrchestratorError::Deadlock { .. } => ("deadlock", None, Some(RunPhase::Select)),
            OrchestratorError::MaxAttemptsExceeded { node, .. } => {
                ("verification", Some(node.clone()), Some(RunPhase::Verify))
            }
            OrchestratorError::AllReadyNodesClaimed { .. } => {
                ("claimed", None, Some(RunPhase::Select))
            }
            OrchestratorError::Phase { phase, node, .. } => {
                ("infrastructure", node.clone(), Some(*phase))
            }
        };
        FatalReport {
            kind: kind.to_string(),
            node,
            phase,
            message: self.to_string(),
        }
    }
}

/// Serializable description of a fatal stop, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct FatalReport {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<RunPhase>,
    pub message: String,
}
