//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                  |
//! |-------------|-----------------------------------|
//! | `run`       | `Run`                             |
//! | `plan`      | `Waves`, `Ready`, `Status`        |
//! | `sessions`  | `Sessions`, `Worktrees`           |
//! | `config`    | `Config`                          |

pub mod config;
pub mod plan;
pub mod run;
pub mod sessions;

pub use config::cmd_config;
pub use plan::{cmd_ready, cmd_status, cmd_waves};
pub use run::cmd_run;
pub use sessions::{cmd_sessions, cmd_worktrees};
