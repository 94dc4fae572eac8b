//! Drives a feature's phases through the graph.
//!
//! The orchestrator is the only writer of the main manifest while a run is
//! active. It schedules one ready unit at a time; concurrency exists only
//! inside a parallel group, where the members run through the
//! [`ParallelExecutor`] and report through per-phase segments that are merged
//! back in submission order once the whole group has finished.
//!
//! Readiness is always derived from the manifest: a phase may start only when
//! the last recorded entry of each dependency is `success`.

use super::recovery::{self, FailureContext, RecoveryAction, RecoveryPolicy};
use super::state::{BlockedPhase, HaltedPhase, PipelineEvent, QualityReport, RunReport, RunState};
use crate::config::OrchestratorConfig;
use crate::dag::{DagBuilder, ParallelGroup, PhaseGraph, ReadyUnit};
use crate::errors::{ConfigError, OrchestratorError, QualityError};
use crate::manifest::ManifestLogger;
use crate::parallel::{ParallelExecutor, ParallelUnit};
use crate::phase::{Phase, substitute_feature};
use crate::quality::{
    ExhaustionDecision, ExhaustionHandler, FixedDecision, QualityGate, QualityScore, Regenerator,
};
use crate::runner::{CommandSpec, ExecutionResult, ProcessRunner, WorkUnit};
use crate::security::FeatureName;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Environment variables every phase process receives.
pub const FEATURE_ENV: &str = "CONDUCTOR_FEATURE";
pub const PHASE_ENV: &str = "CONDUCTOR_PHASE";
pub const ATTEMPT_ENV: &str = "CONDUCTOR_ATTEMPT";

/// Which phases a run covers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to these phases; the rest must already have succeeded.
    pub phases: Option<Vec<String>>,
    /// Re-run selected phases even when the manifest already shows success.
    pub force: bool,
}

impl RunOptions {
    pub fn only<I, S>(phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phases: Some(phases.into_iter().map(Into::into).collect()),
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

pub struct PipelineOrchestrator {
    config: OrchestratorConfig,
    graph: PhaseGraph,
    manifest: ManifestLogger,
    executor: ParallelExecutor,
    recovery: Box<dyn RecoveryPolicy>,
    exhaustion: Box<dyn ExhaustionHandler + Send + Sync>,
    events: Option<mpsc::Sender<PipelineEvent>>,
    state: RunState,
    run_id: Uuid,
    /// Attempts started per phase in the current run.
    attempts: HashMap<String, u32>,
    /// Budget for the next attempt, once it differs from the configured one.
    budgets: HashMap<String, Duration>,
    results: Vec<ExecutionResult>,
}

impl PipelineOrchestrator {
    /// Build the graph and manifest logger for `config`.
    ///
    /// Fails on any graph defect, so a bad pipeline never starts a process.
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        if !(config.timeout_backoff.is_finite() && config.timeout_backoff > 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "defaults.timeout_backoff".into(),
                message: format!(
                    "must be a finite number greater than 1.0, got {}",
                    config.timeout_backoff
                ),
            }
            .into());
        }
        let graph = DagBuilder::new(config.phases.clone())
            .build()
            .map_err(ConfigError::from)?;
        let run_id = Uuid::new_v4();
        let manifest = ManifestLogger::new(config.manifest_dir.clone()).with_run_id(run_id);
        let executor = ParallelExecutor::new(ProcessRunner::new(config.grace));
        let recovery = recovery::policy_for(config.on_failure);

        Ok(Self {
            config,
            graph,
            manifest,
            executor,
            recovery,
            exhaustion: Box::new(FixedDecision(ExhaustionDecision::Abort)),
            events: None,
            state: RunState::NotStarted,
            run_id,
            attempts: HashMap::new(),
            budgets: HashMap::new(),
            results: Vec::new(),
        })
    }

    pub fn with_recovery_policy(mut self, policy: impl RecoveryPolicy + 'static) -> Self {
        self.recovery = Box::new(policy);
        self
    }

    pub fn with_exhaustion_handler(
        mut self,
        handler: impl ExhaustionHandler + Send + Sync + 'static,
    ) -> Self {
        self.exhaustion = Box::new(handler);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    pub fn manifest(&self) -> &ManifestLogger {
        &self.manifest
    }

    /// Identifier stamped on every manifest entry this orchestrator writes.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Validate `raw_feature`, then run it.
    pub async fn run(
        &mut self,
        raw_feature: &str,
        options: &RunOptions,
    ) -> Result<RunReport, OrchestratorError> {
        let feature = self.config.validator.validate(raw_feature).inspect_err(|e| {
            warn!(input = %raw_feature.escape_debug(), error = %e, "feature name rejected");
        })?;
        self.run_feature(&feature, options).await
    }

    /// Run the selected phases of an already validated feature.
    pub async fn run_feature(
        &mut self,
        feature: &FeatureName,
        options: &RunOptions,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        self.reset();
        self.transition(RunState::Running);

        let recovered = self.manifest.recover_segments(feature)?;
        if recovered > 0 {
            warn!(feature = %feature, records = recovered, "merged segments left by an interrupted run");
        }
        let entries = self.manifest.verify_well_formed(feature)?;
        debug!(feature = %feature, entries, "manifest verified");

        let selected = self.select(options)?;
        let succeeded = self.manifest.successful_phases(feature)?;
        let (already_satisfied, mut pending): (Vec<String>, Vec<String>) = if options.force {
            (Vec::new(), selected)
        } else {
            selected.into_iter().partition(|p| succeeded.contains(p))
        };
        self.check_runnable(&pending)?;

        info!(
            feature = %feature,
            run_id = %self.run_id,
            pending = ?pending,
            already_satisfied = ?already_satisfied,
            "run started"
        );
        self.emit(PipelineEvent::RunStarted {
            feature: feature.to_string(),
            run_id: self.run_id,
            pending: pending.clone(),
            already_satisfied: already_satisfied.clone(),
        })
        .await;

        let mut halted = Vec::new();
        let mut skipped = Vec::new();
        let mut aborted = false;

        while !aborted {
            let pending_set: HashSet<String> = pending.iter().cloned().collect();
            let satisfied: HashSet<String> = self
                .manifest
                .successful_phases(feature)?
                .into_iter()
                .filter(|p| !pending_set.contains(p))
                .collect();
            let Some(unit) = self
                .graph
                .ready_among(&satisfied, &pending_set)
                .into_iter()
                .next()
            else {
                break;
            };

            // Every member of the unit is accounted for, even after an abort.
            for result in self.run_unit(feature, &unit).await? {
                if result.is_success() {
                    pending.retain(|p| *p != result.phase);
                    continue;
                }
                let action = if aborted {
                    RecoveryAction::Abort
                } else {
                    self.recover(&result).await?
                };
                match action {
                    RecoveryAction::Retry => {}
                    RecoveryAction::Skip => {
                        pending.retain(|p| *p != result.phase);
                        skipped.push(result.phase.clone());
                        self.emit(PipelineEvent::PhaseSkipped {
                            phase: result.phase.clone(),
                        })
                        .await;
                    }
                    action @ (RecoveryAction::Halt | RecoveryAction::Abort) => {
                        pending.retain(|p| *p != result.phase);
                        let blocked = self.graph.transitive_dependents(&result.phase);
                        warn!(phase = %result.phase, blocked = ?blocked, "branch halted");
                        self.emit(PipelineEvent::BranchHalted {
                            phase: result.phase.clone(),
                            blocked,
                        })
                        .await;
                        halted.push(HaltedPhase {
                            phase: result.phase.clone(),
                            status: result.status,
                            reason: result.describe(),
                        });
                        if action == RecoveryAction::Abort {
                            aborted = true;
                        }
                    }
                }
            }
        }

        let mut blocked = Vec::with_capacity(pending.len());
        for phase in &pending {
            let reason = if aborted {
                "run aborted".to_string()
            } else {
                self.block_reason(feature, phase)?
            };
            blocked.push(BlockedPhase {
                phase: phase.clone(),
                reason,
            });
        }

        let mut state = if aborted {
            RunState::Aborted
        } else if halted.is_empty() && blocked.is_empty() {
            RunState::Completed
        } else {
            RunState::Failed
        };

        let quality = if state == RunState::Completed {
            self.enforce_quality(feature).await?
        } else {
            None
        };
        if quality.as_ref().is_some_and(|q| !q.passed()) {
            state = RunState::Aborted;
        }

        self.transition(state.clone());
        info!(
            feature = %feature,
            state = %state,
            halted = halted.len(),
            blocked = blocked.len(),
            skipped = skipped.len(),
            "run finished"
        );
        self.emit(PipelineEvent::RunFinished {
            state: state.clone(),
        })
        .await;

        Ok(RunReport {
            feature: feature.clone(),
            run_id: self.run_id,
            state,
            results: std::mem::take(&mut self.results),
            already_satisfied,
            halted,
            blocked,
            skipped,
            quality,
            duration: started.elapsed(),
        })
    }

    fn reset(&mut self) {
        self.state = RunState::NotStarted;
        self.attempts.clear();
        self.budgets.clear();
        self.results.clear();
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.events {
            tx.send(event).await.ok();
        }
    }

    /// Selected phase names in declaration order.
    fn select(&self, options: &RunOptions) -> Result<Vec<String>, ConfigError> {
        let Some(requested) = &options.phases else {
            return Ok(self.graph.names().map(str::to_string).collect());
        };
        if let Some(unknown) = requested.iter().find(|name| !self.graph.contains(name)) {
            return Err(ConfigError::UnknownPhase {
                phase: unknown.clone(),
                context: "phase selection".into(),
            });
        }
        Ok(self
            .graph
            .names()
            .filter(|name| requested.iter().any(|r| r == name))
            .map(str::to_string)
            .collect())
    }

    /// Configuration problems that would only surface mid-run.
    fn check_runnable(&self, pending: &[String]) -> Result<(), ConfigError> {
        let phases: Vec<&Phase> = pending
            .iter()
            .filter_map(|name| self.graph.phase(name))
            .collect();
        for phase in &phases {
            phase.check_action()?;
        }
        self.config.check_profile(phases.iter().copied())
    }

    /// Refuse to start `phase` unless each dependency's last entry is `success`.
    fn guard_dependencies(&self, feature: &FeatureName, phase: &str) -> Result<(), OrchestratorError> {
        let Some(definition) = self.graph.phase(phase) else {
            return Ok(());
        };
        for dependency in &definition.depends_on {
            let last = self.manifest.query_last_entry(feature, dependency)?;
            if !last.as_ref().is_some_and(|entry| entry.is_success()) {
                return Err(OrchestratorError::DependencyUnsatisfied {
                    phase: phase.to_string(),
                    dependency: dependency.clone(),
                    status: describe_status(last.as_ref().map(|e| e.status.as_str())),
                });
            }
        }
        Ok(())
    }

    fn block_reason(&self, feature: &FeatureName, phase: &str) -> Result<String, OrchestratorError> {
        Ok(match self.guard_dependencies(feature, phase) {
            Err(OrchestratorError::DependencyUnsatisfied {
                dependency, status, ..
            }) => format!("dependency {dependency} is {status}"),
            Err(other) => return Err(other),
            Ok(()) => "dependencies not satisfied".to_string(),
        })
    }

    async fn run_unit(
        &mut self,
        feature: &FeatureName,
        unit: &ReadyUnit,
    ) -> Result<Vec<ExecutionResult>, OrchestratorError> {
        let phases = unit.phases();
        for phase in &phases {
            self.guard_dependencies(feature, phase)?;
        }

        let label = unit.to_string();
        self.transition(RunState::PhaseRunning {
            unit: label.clone(),
        });
        self.emit(PipelineEvent::UnitStarted {
            unit: label.clone(),
            phases,
        })
        .await;

        let results = match unit {
            ReadyUnit::Single(name) => vec![self.run_single(feature, name).await?],
            ReadyUnit::Group(group) => self.run_group(feature, group).await?,
        };

        self.transition(RunState::PhaseDone {
            unit: label,
            success: results.iter().all(ExecutionResult::is_success),
        });
        for result in &results {
            self.emit(PipelineEvent::PhaseFinished {
                result: result.clone(),
            })
            .await;
        }
        self.results.extend(results.iter().cloned());
        Ok(results)
    }

    async fn run_single(
        &mut self,
        feature: &FeatureName,
        name: &str,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let attempt = self.next_attempt(name);
        self.manifest.record_start(feature, name)?;
        let result = match self.work_unit(feature, name, attempt) {
            Ok(work) => self.executor.runner().run(work).await,
            Err(message) => {
                error!(phase = %name, error = %message, "phase could not be prepared");
                ExecutionResult::launch_failure(name, attempt, &message, Duration::ZERO)
            }
        };
        self.manifest.record_result(feature, &result)?;
        Ok(result)
    }

    /// Run a group's members concurrently. Terminal records reach the main
    /// manifest only after every member has finished, in member order.
    async fn run_group(
        &mut self,
        feature: &FeatureName,
        group: &ParallelGroup,
    ) -> Result<Vec<ExecutionResult>, OrchestratorError> {
        let mut units = Vec::with_capacity(group.members.len());
        let mut unprepared = Vec::new();
        for name in &group.members {
            let attempt = self.next_attempt(name);
            self.manifest.record_start(feature, name)?;
            match self.work_unit(feature, name, attempt) {
                Ok(work) => {
                    let segment = self.manifest.segment_writer(feature, name)?;
                    units.push(ParallelUnit::with_segment(work, segment));
                }
                Err(message) => {
                    error!(phase = %name, error = %message, "phase could not be prepared");
                    unprepared.push(ExecutionResult::launch_failure(
                        name,
                        attempt,
                        &message,
                        Duration::ZERO,
                    ));
                }
            }
        }

        let outcome = self
            .executor
            .run_batch(units)
            .await
            .map_err(|e| OrchestratorError::Other(e.into()))?;
        let merged = self.manifest.merge_segments(feature, &group.members)?;
        debug!(group = %group.id, records = merged, "group segments merged");
        if let Some((phase, err)) = outcome.record_errors.into_iter().next() {
            error!(phase = %phase, error = %err, "group record was not written");
            return Err(err.into());
        }
        for result in &unprepared {
            self.manifest.record_result(feature, result)?;
        }

        let mut results = outcome.results;
        results.extend(unprepared);
        results.sort_by_key(|r| group.members.iter().position(|m| *m == r.phase));
        Ok(results)
    }

    fn next_attempt(&mut self, phase: &str) -> u32 {
        let attempt = self.attempts.entry(phase.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    fn budget(&self, phase: &Phase) -> Duration {
        self.budgets
            .get(&phase.name)
            .copied()
            .unwrap_or_else(|| self.config.timeout_for(phase))
    }

    /// The work unit for one attempt, or why it cannot be built.
    fn work_unit(
        &self,
        feature: &FeatureName,
        name: &str,
        attempt: u32,
    ) -> Result<WorkUnit, String> {
        let phase = self
            .graph
            .phase(name)
            .ok_or_else(|| format!("unknown phase {name}"))?;

        let command = match &phase.command {
            Some(argv) => {
                let mut argv = argv.iter().map(|a| substitute_feature(a, feature.as_str()));
                let program = argv
                    .next()
                    .ok_or_else(|| format!("phase {name} has an empty command"))?;
                CommandSpec::new(program).args(argv)
            }
            None => {
                let spec = self
                    .config
                    .tool
                    .command_spec(name, feature)
                    .map_err(|e| e.to_string())?;
                match &phase.prompt {
                    Some(template) => {
                        let path = self
                            .config
                            .project_dir
                            .join(substitute_feature(template, feature.as_str()));
                        let prompt = std::fs::read(&path).map_err(|e| {
                            format!("cannot read prompt {}: {e}", path.display())
                        })?;
                        spec.stdin(prompt)
                    }
                    None => spec,
                }
            }
        };

        let command = command
            .env(FEATURE_ENV, feature.as_str())
            .env(PHASE_ENV, name)
            .env(ATTEMPT_ENV, attempt.to_string())
            .current_dir(&self.config.project_dir);
        Ok(WorkUnit::new(
            name,
            command,
            self.budget(phase),
            self.config.phase_log_path(feature, name, attempt),
        )
        .with_attempt(attempt))
    }

    /// Ask the recovery policy, then clamp its answer to what is allowed.
    async fn recover(&mut self, result: &ExecutionResult) -> Result<RecoveryAction, OrchestratorError> {
        let phase = self
            .graph
            .phase(&result.phase)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("result for unknown phase {}", result.phase))?;
        let next_timeout =
            recovery::next_budget(result, self.budget(&phase), self.config.timeout_backoff);
        let retries_used = self
            .attempts
            .get(&phase.name)
            .copied()
            .unwrap_or(1)
            .saturating_sub(1);
        let failure = FailureContext {
            phase: &phase,
            result,
            retries_used,
            max_retries: self.config.max_phase_retries,
            next_timeout,
        };

        let requested = self.recovery.decide(&failure)?;
        let action = recovery::permitted(requested, &failure);
        if action != requested {
            warn!(phase = %phase.name, requested = ?requested, action = ?action, "recovery action not permitted");
        }
        info!(phase = %phase.name, status = %result.status, action = ?action, "phase failure handled");

        if action == RecoveryAction::Retry {
            self.budgets.insert(phase.name.clone(), next_timeout);
            self.emit(PipelineEvent::PhaseRetrying {
                phase: phase.name.clone(),
                attempt: retries_used + 2,
                timeout: next_timeout,
            })
            .await;
        }
        Ok(action)
    }

    async fn enforce_quality(
        &mut self,
        feature: &FeatureName,
    ) -> Result<Option<QualityReport>, OrchestratorError> {
        let Some(settings) = self.config.quality.clone() else {
            return Ok(None);
        };
        let gate = QualityGate::from_pattern(settings.score_pattern.as_deref())?;
        let artifact = settings.artifact_path(&self.config.project_dir, feature);
        self.emit(PipelineEvent::QualityStarted {
            artifact: artifact.display().to_string(),
        })
        .await;

        let outcome = {
            let mut regenerator = PhaseRegenerator {
                orchestrator: &mut *self,
                feature,
                phase: &settings.regenerate_phase,
                artifact: artifact.clone(),
            };
            gate.enforce(
                &artifact,
                &mut regenerator,
                settings.threshold,
                settings.max_attempts,
            )
            .await?
        };

        let decision = if outcome.is_accepted() {
            None
        } else {
            let decision =
                self.exhaustion
                    .decide(&outcome.score(), settings.threshold, outcome.artifact())?;
            info!(feature = %feature, decision = ?decision, "quality gate exhausted");
            Some(decision)
        };
        Ok(Some(QualityReport {
            threshold: settings.threshold,
            outcome,
            decision,
        }))
    }

    /// Re-run one phase outside the main loop.
    async fn rerun_phase(
        &mut self,
        feature: &FeatureName,
        phase: &str,
    ) -> Result<ExecutionResult, OrchestratorError> {
        self.run_unit(feature, &ReadyUnit::Single(phase.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("phase {phase} produced no result").into())
    }
}

fn describe_status(status: Option<&str>) -> String {
    status.unwrap_or("absent").to_string()
}

/// Regenerates the quality artifact by re-running its producing phase.
struct PhaseRegenerator<'a> {
    orchestrator: &'a mut PipelineOrchestrator,
    feature: &'a FeatureName,
    phase: &'a str,
    artifact: PathBuf,
}

#[async_trait]
impl Regenerator for PhaseRegenerator<'_> {
    async fn regenerate(
        &mut self,
        attempt: u32,
        previous: &QualityScore,
    ) -> Result<PathBuf, QualityError> {
        info!(
            phase = %self.phase,
            attempt,
            previous = previous.value,
            "regenerating quality artifact"
        );
        let result = self
            .orchestrator
            .rerun_phase(self.feature, self.phase)
            .await
            .map_err(|e| QualityError::RegenerationFailed {
                attempt,
                message: e.to_string(),
            })?;
        if !result.is_success() {
            return Err(QualityError::RegenerationFailed {
                attempt,
                message: result.describe(),
            });
        }
        Ok(self.artifact.clone())
    }
}
