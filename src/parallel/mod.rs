//! Concurrent execution of independent work units.
//!
//! The executor works in three steps:
//!
//! 1. **Launch** every unit's process and record its handle. No wait happens
//!    until all handles exist, so a unit that exits instantly is still tracked.
//! 2. **Supervise** each handle in its own task, so every unit's timeout is
//!    enforced on time regardless of the others.
//! 3. **Join** the tasks one by one, in submission order, storing each result
//!    immediately after its own join returns.
//!
//! Failures never cross this boundary as errors: launch failures and panicked
//! supervisors become `failed` results. The result count always equals the
//! unit count.

use crate::errors::ManifestError;
use crate::manifest::SegmentWriter;
use crate::runner::{ExecutionResult, ProcessRunner, WorkUnit};
use std::collections::HashSet;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Batch-level problems detected before anything is launched.
#[derive(Debug, Error)]
pub enum ParallelError {
    #[error("Units {first} and {second} share output sink {sink}")]
    SharedSink {
        first: String,
        second: String,
        sink: String,
    },

    #[error("Unit name {0} appears more than once in the batch")]
    DuplicateUnit(String),
}

/// A unit plus an optional manifest segment its supervisor writes the
/// terminal record into.
pub struct ParallelUnit {
    pub unit: WorkUnit,
    pub segment: Option<SegmentWriter>,
}

impl From<WorkUnit> for ParallelUnit {
    fn from(unit: WorkUnit) -> Self {
        Self {
            unit,
            segment: None,
        }
    }
}

impl ParallelUnit {
    pub fn with_segment(unit: WorkUnit, segment: SegmentWriter) -> Self {
        Self {
            unit,
            segment: Some(segment),
        }
    }
}

/// Aggregate of one batch: every unit's identity and status.
#[derive(Debug, Default)]
pub struct ParallelOutcome {
    /// One result per submitted unit, in submission order.
    pub results: Vec<ExecutionResult>,
    /// Segment writes that failed; any entry here means the audit trail is incomplete.
    pub record_errors: Vec<(String, ManifestError)>,
}

impl ParallelOutcome {
    /// Success iff every unit succeeded.
    pub fn all_success(&self) -> bool {
        self.results.iter().all(ExecutionResult::is_success)
    }

    pub fn failures(&self) -> Vec<&ExecutionResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Per-unit lines naming each phase and its status.
    pub fn describe(&self) -> Vec<String> {
        self.results.iter().map(ExecutionResult::describe).collect()
    }
}

/// What the launch step produced for one unit.
enum Slot {
    Supervised(JoinHandle<(ExecutionResult, Option<ManifestError>)>),
    Finished(ExecutionResult, Option<ManifestError>),
}

/// Runs batches of independent units concurrently.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    runner: ProcessRunner,
}

impl ParallelExecutor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Run plain work units (no manifest segments).
    pub async fn run_all(&self, units: Vec<WorkUnit>) -> Result<ParallelOutcome, ParallelError> {
        self.run_batch(units.into_iter().map(ParallelUnit::from).collect())
            .await
    }

    /// Run a batch, writing each unit's terminal record to its own segment as
    /// soon as that unit finishes.
    pub async fn run_batch(
        &self,
        units: Vec<ParallelUnit>,
    ) -> Result<ParallelOutcome, ParallelError> {
        check_batch(&units)?;
        let total = units.len();
        info!(units = total, "launching parallel batch");

        // Step 1: launch everything, recording handles before any wait.
        let mut launched = Vec::with_capacity(total);
        for ParallelUnit { unit, segment } in units {
            let name = unit.name.clone();
            let attempt = unit.attempt;
            let sink = unit.sink.clone();
            let launch_started = Instant::now();
            match self.runner.launch(unit) {
                Ok(process) => launched.push((name, attempt, Ok(process), segment)),
                Err(e) => {
                    error!(phase = %name, error = %e, "launch failed");
                    let result = ExecutionResult::launch_failure(
                        &name,
                        attempt,
                        &e.to_string(),
                        launch_started.elapsed(),
                    )
                    .with_log_path(sink);
                    launched.push((name, attempt, Err(result), segment));
                }
            }
        }

        // Step 2: one supervisor per running process.
        let mut slots = Vec::with_capacity(total);
        for (name, attempt, process, segment) in launched {
            let slot = match process {
                Ok(process) => Slot::Supervised(tokio::spawn(async move {
                    let result = process.wait().await;
                    let record_error = record(segment.as_ref(), &result);
                    (result, record_error)
                })),
                Err(result) => {
                    let record_error = record(segment.as_ref(), &result);
                    Slot::Finished(result, record_error)
                }
            };
            slots.push((name, attempt, slot));
        }

        // Step 3: join each handle individually, capturing its result at once.
        let mut outcome = ParallelOutcome {
            results: Vec::with_capacity(total),
            record_errors: Vec::new(),
        };
        for (name, attempt, slot) in slots {
            let (result, record_error) = match slot {
                Slot::Finished(result, record_error) => (result, record_error),
                Slot::Supervised(handle) => match handle.await {
                    Ok(joined) => joined,
                    Err(join_err) => {
                        error!(phase = %name, error = %join_err, "supervisor task failed");
                        let result = ExecutionResult::launch_failure(
                            &name,
                            attempt,
                            &format!("supervisor task failed: {join_err}"),
                            std::time::Duration::ZERO,
                        );
                        (result, None)
                    }
                },
            };
            debug!(phase = %name, status = %result.status, "joined");
            if let Some(e) = record_error {
                outcome.record_errors.push((name, e));
            }
            outcome.results.push(result);
        }

        info!(
            units = total,
            succeeded = outcome.success_count(),
            failed = total - outcome.success_count(),
            "parallel batch joined"
        );
        Ok(outcome)
    }
}

fn record(segment: Option<&SegmentWriter>, result: &ExecutionResult) -> Option<ManifestError> {
    segment.and_then(|s| s.append_result(result).err())
}

fn check_batch(units: &[ParallelUnit]) -> Result<(), ParallelError> {
    let mut names = HashSet::new();
    let mut sinks: Vec<(&std::path::Path, &str)> = Vec::with_capacity(units.len());
    for ParallelUnit { unit, .. } in units {
        if !names.insert(unit.name.as_str()) {
            return Err(ParallelError::DuplicateUnit(unit.name.clone()));
        }
        if let Some((_, first)) = sinks.iter().find(|(sink, _)| *sink == unit.sink.as_path()) {
            return Err(ParallelError::SharedSink {
                first: first.to_string(),
                second: unit.name.clone(),
                sink: unit.sink.display().to_string(),
            });
        }
        sinks.push((unit.sink.as_path(), unit.name.as_str()));
    }
    Ok(())
}
