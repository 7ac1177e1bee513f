//! wavefront: run a dependency graph of work items through isolated,
//! verified coding-agent attempts.

pub mod agent;
pub mod config;
pub mod context;
pub mod dag;
pub mod errors;
pub mod git;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod session;
pub mod status;
pub mod util;
pub mod verify;
pub mod worktree;
