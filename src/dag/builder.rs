//! DAG builder for constructing dependency graphs from node definitions.
//!
//! The builder validates that every dependency resolves and that the graph
//! has no cycles, computing each node's topological depth on the way.

use crate::errors::GraphError;
use crate::node::{NodeId, NodeSpec};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Index into the sorted node list used during construction.
type NodeIndex = usize;

/// One node of a built graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    /// Nodes this one depends on, ascending.
    pub parents: Vec<NodeId>,
    /// Nodes that depend on this one, ascending.
    pub children: Vec<NodeId>,
    /// Length of the longest dependency chain below this node.
    pub depth: usize,
}

/// A validated directed acyclic graph of nodes.
///
/// Immutable once built; iteration is always in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: BTreeMap<NodeId, DagNode>,
}

impl Dag {
    /// Get the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All node ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// All nodes with their graph data, ascending by id.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &DagNode)> {
        self.nodes.iter()
    }

    pub fn depth(&self, id: &NodeId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.depth)
    }

    /// Get the nodes the given node depends on.
    pub fn parents(&self, id: &NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.parents.as_slice())
    }

    /// Get the nodes that depend on the given node.
    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Get nodes with no dependencies (entry points).
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parents.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Get nodes that nothing depends on (exit points).
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Check if all dependencies of a node are in the completed set.
    pub fn dependencies_satisfied(&self, id: &NodeId, completed: &HashSet<NodeId>) -> bool {
        self.parents(id).iter().all(|dep| completed.contains(dep))
    }
}

/// Builder for constructing dependency graphs.
pub struct DagBuilder<'a> {
    nodes: &'a [NodeSpec],
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl<'a> DagBuilder<'a> {
    /// Create a new builder over the given node definitions.
    pub fn new(nodes: &'a [NodeSpec]) -> Self {
        Self { nodes }
    }

    /// Build the graph.
    ///
    /// This validates the graph structure:
    /// - Node ids must be unique
    /// - All dependencies must reference existing nodes
    /// - No cycles are allowed
    pub fn build(self) -> Result<Dag, GraphError> {
        let mut sorted: Vec<&NodeSpec> = self.nodes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut index_map: HashMap<&NodeId, NodeIndex> = HashMap::with_capacity(sorted.len());
        for (i, node) in sorted.iter().enumerate() {
            if index_map.insert(&node.id, i).is_some() {
                return Err(GraphError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }

        // parents[i] and children[i] hold indices, ascending
        let mut parents: Vec<Vec<NodeIndex>> = vec![Vec::new(); sorted.len()];
        let mut children: Vec<Vec<NodeIndex>> = vec![Vec::new(); sorted.len()];

        for (to_idx, node) in sorted.iter().enumerate() {
            let mut deps: Vec<&NodeId> = node.depends_on.iter().collect();
            deps.sort();
            deps.dedup();
            for dep in deps {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| GraphError::MissingDependency {
                            node: node.id.clone(),
                            missing: dep.clone(),
                        })?;
                parents[to_idx].push(from_idx);
                children[from_idx].push(to_idx);
            }
        }
        for list in parents.iter_mut().chain(children.iter_mut()) {
            list.sort_unstable();
        }

        let depths = compute_depths(&sorted, &parents)?;

        let nodes = sorted
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let to_ids = |idx: &[NodeIndex]| -> Vec<NodeId> {
                    idx.iter().map(|&j| sorted[j].id.clone()).collect()
                };
                (
                    node.id.clone(),
                    DagNode {
                        parents: to_ids(&parents[i]),
                        children: to_ids(&children[i]),
                        depth: depths[i],
                    },
                )
            })
            .collect();

        Ok(Dag { nodes })
    }
}

/// Build a validated DAG from node definitions.
pub fn build_dag(nodes: &[NodeSpec]) -> Result<Dag, GraphError> {
    DagBuilder::new(nodes).build()
}

/// Compute depths with an iterative depth-first walk towards parents.
///
/// A node met while still on the active stack closes a cycle; the error
/// carries the stack slice from that node plus the node again.
fn compute_depths(
    sorted: &[&NodeSpec],
    parents: &[Vec<NodeIndex>],
) -> Result<Vec<usize>, GraphError> {
    let mut marks = vec![Mark::Unvisited; sorted.len()];
    let mut depths = vec![0usize; sorted.len()];
    // (node, next parent position to visit)
    let mut stack: Vec<(NodeIndex, usize)> = Vec::new();

    for root in 0..sorted.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(&(node, next)) = stack.last() {
            if let Some(&parent) = parents[node].get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks[parent] {
                    Mark::Done => {}
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|&(i, _)| i == parent)
                            .unwrap_or(0);
                        let mut path: Vec<NodeId> = stack[start..]
                            .iter()
                            .map(|&(i, _)| sorted[i].id.clone())
                            .collect();
                        path.push(sorted[parent].id.clone());
                        return Err(GraphError::CycleDetected { path });
                    }
                    Mark::Unvisited => {
                        marks[parent] = Mark::OnStack;
                        stack.push((parent, 0));
                    }
                }
            } else {
                depths[node] = parents[node]
                    .iter()
                    .map(|&p| depths[p] + 1)
                    .max()
                    .unwrap_or(0);
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }

    Ok(depths)
}
