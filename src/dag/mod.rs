//! Dependency graph scheduling for plan nodes.
//!
//! This module turns a flat list of [`NodeSpec`](crate::node::NodeSpec)s into
//! an immutable graph and answers the two questions the orchestrator asks of
//! it: which nodes could run together, and which nodes can run right now.
//!
//! ## Architecture
//!
//! 1. **Builder** - validates ids and dependencies, rejects cycles, assigns
//!    every node its topological depth
//! 2. **Waves** - groups nodes by depth into parallel execution waves
//! 3. **Readiness** - recomputes the ready set from live completion state
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashSet;
//! use wavefront::dag::{build_dag, compute_execution_waves, get_ready_nodes};
//! use wavefront::node::{NodeId, NodeSpec};
//!
//! # fn example() -> Result<(), wavefront::errors::GraphError> {
//! let nodes = vec![
//!     NodeSpec::new("1", "Setup", vec![]),
//!     NodeSpec::new("2", "Core", vec![NodeId::from("1")]),
//!     NodeSpec::new("3", "Tests", vec![NodeId::from("1")]),
//!     NodeSpec::new("4", "Docs", vec![NodeId::from("2"), NodeId::from("3")]),
//! ];
//!
//! let dag = build_dag(&nodes)?;
//! let plan = compute_execution_waves(&dag);
//! // Wave 1: [1]
//! // Wave 2: [2, 3]
//! // Wave 3: [4]
//! assert_eq!(plan.max_parallelism, 2);
//!
//! let ready = get_ready_nodes(&dag, &HashSet::new());
//! assert_eq!(ready, vec![NodeId::from("1")]);
//! # Ok(())
//! # }
//! ```

mod builder;
mod readiness;
mod waves;

pub use builder::{Dag, DagBuilder, DagNode, build_dag};
pub use readiness::{Progress, check_progress, get_ready_nodes};
pub use waves::{Wave, WavePlan, compute_execution_waves};
