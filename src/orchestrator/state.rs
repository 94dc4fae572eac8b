//! Run state machine, events and the final report.

use crate::errors::OrchestratorError;
use crate::quality::{ExhaustionDecision, QualityOutcome};
use crate::runner::{ExecutionResult, PhaseStatus};
use crate::security::FeatureName;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// `NotStarted → Running → {Completed, Failed, Aborted}`, passing through
/// `PhaseRunning`/`PhaseDone` once per unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    PhaseRunning { unit: String },
    PhaseDone { unit: String, success: bool },
    /// Every selected phase succeeded (or was a skipped non-blocking phase).
    Completed,
    /// A branch halted or a phase could not be reached.
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running => f.write_str("running"),
            Self::PhaseRunning { unit } => write!(f, "running {unit}"),
            Self::PhaseDone { unit, success } => {
                write!(f, "{unit} {}", if *success { "done" } else { "failed" })
            }
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Progress notifications for the terminal UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        feature: String,
        run_id: Uuid,
        pending: Vec<String>,
        already_satisfied: Vec<String>,
    },
    UnitStarted {
        unit: String,
        phases: Vec<String>,
    },
    PhaseFinished {
        result: ExecutionResult,
    },
    PhaseRetrying {
        phase: String,
        attempt: u32,
        #[serde(rename = "timeout_sec", serialize_with = "as_secs")]
        timeout: Duration,
    },
    PhaseSkipped {
        phase: String,
    },
    BranchHalted {
        phase: String,
        blocked: Vec<String>,
    },
    QualityStarted {
        artifact: String,
    },
    RunFinished {
        state: RunState,
    },
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// A phase whose failure stopped its branch.
#[derive(Debug, Clone, PartialEq)]
pub struct HaltedPhase {
    pub phase: String,
    pub status: PhaseStatus,
    pub reason: String,
}

/// A selected phase that never started.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedPhase {
    pub phase: String,
    pub reason: String,
}

/// Quality gate part of the report.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub threshold: f64,
    pub outcome: QualityOutcome,
    /// Operator's choice when the gate was exhausted.
    pub decision: Option<ExhaustionDecision>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_accepted() || self.decision == Some(ExhaustionDecision::AcceptAsIs)
    }
}

/// Everything a run did, in order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub feature: FeatureName,
    pub run_id: Uuid,
    pub state: RunState,
    /// Every attempt of every phase, in completion order.
    pub results: Vec<ExecutionResult>,
    /// Selected phases that already had a `success` entry and were not re-run.
    pub already_satisfied: Vec<String>,
    pub halted: Vec<HaltedPhase>,
    pub blocked: Vec<BlockedPhase>,
    pub skipped: Vec<String>,
    pub quality: Option<QualityReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.quality.as_ref().is_none_or(QualityReport::passed)
    }

    /// Latest result per phase, in first-run order.
    pub fn final_results(&self) -> Vec<&ExecutionResult> {
        let mut latest: Vec<&ExecutionResult> = Vec::new();
        for result in &self.results {
            match latest.iter_mut().find(|r| r.phase == result.phase) {
                Some(slot) => *slot = result,
                None => latest.push(result),
            }
        }
        latest
    }

    /// The error that best describes why the run did not succeed.
    pub fn failure(&self) -> Option<OrchestratorError> {
        if self.is_success() {
            return None;
        }
        if let Some(quality) = self.quality.as_ref().filter(|q| !q.passed()) {
            let score = quality.outcome.score();
            return Some(OrchestratorError::QualityExhausted {
                score: score.value,
                threshold: quality.threshold,
                attempts: quality.outcome.attempts(),
                artifact: quality.outcome.artifact().to_path_buf(),
            });
        }
        if let Some(halted) = self.halted.first() {
            return Some(OrchestratorError::PhaseFailed {
                phase: halted.phase.clone(),
                status: halted.status,
            });
        }
        let reason = self
            .blocked
            .first()
            .map(|b| format!("phase {} did not run: {}", b.phase, b.reason))
            .unwrap_or_else(|| format!("run ended {}", self.state));
        Some(OrchestratorError::Other(anyhow::anyhow!(reason)))
    }
}
