//! Node definitions and plan loading for the wavefront orchestrator.
//!
//! This module provides:
//! - `NodeId` with natural ordering (numeric ids compare as numbers)
//! - `NodeSpec`, the canonical shape consumed by the graph algorithms
//! - `Milestone` and `Requirement`, the two on-disk node formats, with
//!   adapters into `NodeSpec`
//! - `PlanFile`, the JSON plan format (`.wavefront/plan.json`)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Identifier of a schedulable node.
///
/// Ordering is natural: ids that both parse as unsigned integers compare
/// numerically, numeric ids sort before non-numeric ones, everything else
/// compares lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u32> for NodeId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

/// Canonical node definition: the only shape the DAG, wave and readiness
/// algorithms see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    /// Work description handed to the agent. Kept out of the graph code.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, name: &str, depends_on: Vec<NodeId>) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            description: String::new(),
            depends_on,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Durable status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl NodeStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::InProgress => write!(f, "in_progress"),
            NodeStatus::Complete => write!(f, "complete"),
            NodeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable, persisted half of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Verification attempts spent on this node so far.
    #[serde(default)]
    pub attempts: u32,
    /// Failure detail from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_errors: Vec<String>,
}

/// A milestone from a numbered roadmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

impl From<&Milestone> for NodeSpec {
    fn from(m: &Milestone) -> Self {
        let mut description = m.goal.clone();
        if !m.deliverables.is_empty() {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str("Deliverables:\n");
            for d in &m.deliverables {
                description.push_str(&format!("- {}\n", d));
            }
        }
        Self {
            id: NodeId::from(m.number),
            name: m.title.clone(),
            description,
            depends_on: m.depends_on.iter().copied().map(NodeId::from).collect(),
        }
    }
}

/// A slug-addressed requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl From<&Requirement> for NodeSpec {
    fn from(r: &Requirement) -> Self {
        let mut description = r.body.clone();
        if !r.acceptance.is_empty() {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str("Acceptance criteria:\n");
            for a in &r.acceptance {
                description.push_str(&format!("- {}\n", a));
            }
        }
        Self {
            id: NodeId::new(r.slug.clone()),
            name: r.title.clone(),
            description,
            depends_on: r.depends_on.iter().map(|d| NodeId::new(d.clone())).collect(),
        }
    }
}

/// The plan file format. Each kind keeps its own on-disk shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanFile {
    Milestones { milestones: Vec<Milestone> },
    Requirements { requirements: Vec<Requirement> },
}

impl PlanFile {
    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse plan file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Translate to canonical node definitions.
    pub fn nodes(&self) -> Vec<NodeSpec> {
        match self {
            PlanFile::Milestones { milestones } => milestones.iter().map(NodeSpec::from).collect(),
            PlanFile::Requirements { requirements } => {
                requirements.iter().map(NodeSpec::from).collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PlanFile::Milestones { milestones } => milestones.len(),
            PlanFile::Requirements { requirements } => requirements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
