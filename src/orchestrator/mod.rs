//! Pipeline orchestration: scheduling, failure recovery and the quality gate.

pub mod pipeline;
pub mod recovery;
pub mod state;

pub use pipeline::{PipelineOrchestrator, RunOptions};
pub use recovery::{FailureContext, PromptPolicy, RecoveryAction, RecoveryPolicy, StaticPolicy};
pub use state::{BlockedPhase, HaltedPhase, PipelineEvent, QualityReport, RunReport, RunState};
