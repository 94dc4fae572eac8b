//! Phase dependency graph.
//!
//! The graph is built once from the configured phases and validated at
//! construction: unknown dependencies, duplicates, cycles and malformed
//! parallel groups are configuration errors, never runtime conditions.
//!
//! ## Example
//!
//! ```
//! use conductor::dag::{DagBuilder, ReadyUnit};
//! use std::collections::HashSet;
//!
//! let graph = DagBuilder::new(conductor::phase::default_pipeline()).build().unwrap();
//!
//! let waves = graph.compute_waves();
//! // Wave 0: [phase1]
//! // Wave 1: [phase2a, phase2b, phase2c]
//! // Wave 2: [phase3]
//! assert_eq!(waves.len(), 3);
//!
//! let completed: HashSet<String> = ["phase1".to_string()].into();
//! let ready = graph.ready_phases(&completed);
//! assert!(matches!(&ready[..], [ReadyUnit::Group(g)] if g.id == "research"));
//! ```

mod builder;
mod ready;

pub use builder::{DagBuilder, PhaseGraph, PhaseIndex};
pub use ready::{ParallelGroup, ReadyUnit};
