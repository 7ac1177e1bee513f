//! Wave computation: grouping nodes by topological depth.
//!
//! Nodes in the same wave share a depth, so no dependency edge runs between
//! them and they may execute in parallel once every earlier wave is done.

use crate::dag::builder::Dag;
use crate::node::NodeId;
use serde::Serialize;
use std::collections::BTreeMap;

/// A group of nodes eligible to run in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    /// 1-based wave number; nodes here have depth `wave_number - 1`.
    pub wave_number: usize,
    /// Node ids, ascending.
    pub node_ids: Vec<NodeId>,
}

/// The full wave schedule of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WavePlan {
    pub waves: Vec<Wave>,
    /// Size of the largest wave.
    pub max_parallelism: usize,
    /// True when no wave holds more than one node.
    pub is_sequential: bool,
}

impl WavePlan {
    /// Find the wave holding a node.
    pub fn wave_of(&self, id: &NodeId) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.node_ids.contains(id))
            .map(|w| w.wave_number)
    }

    pub fn node_count(&self) -> usize {
        self.waves.iter().map(|w| w.node_ids.len()).sum()
    }
}

/// Compute execution waves from a built graph.
pub fn compute_execution_waves(dag: &Dag) -> WavePlan {
    let mut by_depth: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    // Dag iterates ascending, so each bucket is already sorted
    for (id, node) in dag.iter() {
        by_depth.entry(node.depth).or_default().push(id.clone());
    }

    let waves: Vec<Wave> = by_depth
        .into_values()
        .enumerate()
        .map(|(i, node_ids)| Wave {
            wave_number: i + 1,
            node_ids,
        })
        .collect();

    let max_parallelism = waves.iter().map(|w| w.node_ids.len()).max().unwrap_or(0);

    WavePlan {
        waves,
        max_parallelism,
        is_sequential: max_parallelism <= 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::build_dag;
    use crate::node::NodeSpec;
    use std::collections::HashSet;

    fn node(id: &str, deps: Vec<&str>) -> NodeSpec {
        NodeSpec::new(id, id, deps.into_iter().map(NodeId::from).collect())
    }

    fn wave_ids(plan: &WavePlan) -> Vec<Vec<&str>> {
        plan.waves
            .iter()
            .map(|w| w.node_ids.iter().map(|id| id.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_linear_chain_is_sequential() {
        let nodes = vec![node("1", vec![]), node("2", vec!["1"]), node("3", vec!["2"])];
        let plan = compute_execution_waves(&build_dag(&nodes).unwrap());

        assert_eq!(wave_ids(&plan), vec![vec!["1"], vec!["2"], vec!["3"]]);
        assert!(plan.is_sequential);
        assert_eq!(plan.max_parallelism, 1);
    }

    #[test]
    fn test_two_roots_join() {
        let nodes = vec![
            node("1", vec![]),
            node("2", vec![]),
            node("3", vec!["1", "2"]),
            node("4", vec!["3"]),
        ];
        let plan = compute_execution_waves(&build_dag(&nodes).unwrap());

        assert_eq!(wave_ids(&plan), vec![vec!["1", "2"], vec!["3"], vec!["4"]]);
        assert_eq!(plan.max_parallelism, 2);
        assert!(!plan.is_sequential);
    }

    #[test]
    fn test_wave_numbers_are_one_based() {
        let nodes = vec![node("1", vec![]), node("2", vec!["1"])];
        let plan = compute_execution_waves(&build_dag(&nodes).unwrap());

        assert_eq!(plan.waves[0].wave_number, 1);
        assert_eq!(plan.waves[1].wave_number, 2);
        assert_eq!(plan.wave_of(&"2".into()), Some(2));
        assert_eq!(plan.wave_of(&"missing".into()), None);
    }

    #[test]
    fn test_empty_graph_has_no_waves() {
        let plan = compute_execution_waves(&build_dag(&[]).unwrap());

        assert!(plan.waves.is_empty());
        assert_eq!(plan.max_parallelism, 0);
        assert!(plan.is_sequential);
    }

    #[test]
    fn test_waves_partition_and_respect_dependencies() {
        let nodes = vec![
            node("1", vec![]),
            node("2", vec!["1"]),
            node("3", vec!["1"]),
            node("4", vec!["2", "3"]),
            node("5", vec![]),
            node("6", vec!["5", "2"]),
            node("7", vec!["6", "4"]),
        ];
        let dag = build_dag(&nodes).unwrap();
        let plan = compute_execution_waves(&dag);

        // Every id appears in exactly one wave
        let mut seen = HashSet::new();
        for wave in &plan.waves {
            for id in &wave.node_ids {
                assert!(seen.insert(id.clone()), "{} appears twice", id);
            }
        }
        assert_eq!(seen.len(), dag.len());
        assert_eq!(plan.node_count(), dag.len());

        // Dependencies always lie in strictly earlier waves
        for wave in &plan.waves {
            for id in &wave.node_ids {
                for parent in dag.parents(id) {
                    let parent_wave = plan.wave_of(parent).unwrap();
                    assert!(parent_wave < wave.wave_number);
                }
            }
        }
    }

    #[test]
    fn test_wave_ids_use_natural_order() {
        let nodes = vec![node("10", vec![]), node("9", vec![]), node("2", vec![])];
        let plan = compute_execution_waves(&build_dag(&nodes).unwrap());
        assert_eq!(wave_ids(&plan), vec![vec!["2", "9", "10"]]);
    }
}
