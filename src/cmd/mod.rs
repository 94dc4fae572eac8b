//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                          |
//! |-----------------|-------------------------------------------|
//! | `run`           | `Run`                                     |
//! | `project`       | `Init`, `Validate`, `Graph`, `Score`      |
//! | `config`        | `Config`                                  |
//! | `manifest`      | `Manifest`                                |
//!
//! Commands return the process exit code on success; failures are errors and
//! are mapped to exit codes in `main`.

pub mod config;
pub mod manifest;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use manifest::cmd_manifest;
pub use project::{cmd_graph, cmd_init, cmd_score, cmd_validate};
pub use run::cmd_run;
