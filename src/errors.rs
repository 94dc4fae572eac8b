//! Typed error hierarchy for the conductor engine.
//!
//! One enum per subsystem, plus the top-level `OrchestratorError`:
//! - `ValidationError`: untrusted feature name rejected
//! - `ProcessError`: an external command could not be launched or supervised
//! - `ManifestError`: the audit trail cannot be read or written
//! - `GraphError`: the phase dependency graph is not a valid DAG
//! - `ConfigError`: invalid or incomplete configuration
//! - `QualityError`: the quality score could not be extracted
//! - `OrchestratorError`: everything that can end a pipeline run

use std::path::PathBuf;
use thiserror::Error;

use crate::runner::PhaseStatus;

/// Why a raw feature name was rejected. Each variant is a distinct reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("feature name is empty")]
    Empty,

    #[error("feature name '{raw}' contains a path traversal sequence '..'")]
    PathTraversal { raw: String },

    #[error("feature name '{raw}' is empty after stripping prefix '{prefix}'")]
    EmptyAfterPrefix { raw: String, prefix: String },

    #[error(
        "feature name '{name}' contains characters outside [A-Za-z0-9_-] (first offending: {offending:?})"
    )]
    InvalidCharacters { name: String, offending: char },

    #[error("feature name is {len} characters long, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("feature name '{name}' contains dangerous character {ch:?}")]
    DangerousCharacter { name: String, ch: char },

    #[error(
        "feature name '{name}' repeats the '{prefix}' prefix already implied by its location; use '{suggested}' instead"
    )]
    RedundantPrefix {
        name: String,
        prefix: String,
        suggested: String,
    },

    #[error("feature name '{name}' is a reserved system name")]
    ReservedName { name: String },
}

/// Failures at the process boundary. These never cross the runner: they are
/// converted into `ExecutionResult` values.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to open output sink at {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{program}' for phase {phase}: {source}")]
    SpawnFailed {
        phase: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for phase {phase}: {source}")]
    WaitFailed {
        phase: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the manifest subsystem. Write failures are fatal to a run.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock manifest {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest {path} at line {line}: {content:?} ({reason})")]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
        reason: String,
    },

    #[error("Failed to serialize manifest entry for phase {phase}: {source}")]
    Serialize {
        phase: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ManifestError {
    /// Whether this error means the audit trail could not be written.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Self::Write { .. } | Self::Lock { .. } | Self::Serialize { .. }
        )
    }
}

/// Structural problems in the phase graph, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate phase name: {0}")]
    DuplicatePhase(String),

    #[error("Unknown dependency '{dependency}' in phase '{phase}': no phase with that name exists")]
    UnknownDependency { phase: String, dependency: String },

    #[error("Cycle detected in phase dependencies. Involved phases: {0:?}")]
    Cycle(Vec<String>),

    #[error("Parallel group '{group}': phase '{phase}' depends on '{dependency}' from the same group")]
    IntraGroupDependency {
        group: String,
        phase: String,
        dependency: String,
    },

    #[error(
        "Parallel group '{group}': phases '{first}' and '{second}' declare different dependencies"
    )]
    MismatchedGroupDependencies {
        group: String,
        first: String,
        second: String,
    },

    #[error("Phase '{dependent}' depends on non-blocking phase '{phase}', which may be skipped")]
    NonBlockingDependency { phase: String, dependent: String },

    #[error("Invalid {kind} name {name:?}: only letters, digits, '_' and '-' are allowed")]
    InvalidPhaseName { kind: &'static str, name: String },
}

/// Configuration errors surfaced before any phase runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Phase {phase} invokes the external tool but no profile is configured; set [tool] profile, CONDUCTOR_PROFILE or --profile"
    )]
    MissingProfile { phase: String },

    #[error("Phase {phase} has neither a command nor a prompt")]
    NoAction { phase: String },

    #[error("Unknown phase '{phase}' in {context}")]
    UnknownPhase { phase: String, context: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pipeline graph: {0}")]
    Graph(#[from] GraphError),
}

/// Errors extracting a quality score from an artifact.
#[derive(Debug, Error)]
pub enum QualityError {
    #[error("Failed to read artifact {path}: {source}")]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No quality score found in {path} (expected a line matching {pattern})")]
    ScoreMissing { path: PathBuf, pattern: String },

    #[error("Artifact {path} contains conflicting quality scores: {values:?}")]
    AmbiguousScore { path: PathBuf, values: Vec<f64> },

    #[error("Quality score {raw:?} in {path} is not a number")]
    NonNumericScore { path: PathBuf, raw: String },

    #[error("Quality score {value} in {path} is outside the 0-10 scale")]
    OutOfRange { path: PathBuf, value: f64 },

    #[error("Invalid score pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("Regeneration attempt {attempt} failed: {message}")]
    RegenerationFailed { attempt: u32, message: String },
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Input rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "Phase {phase} cannot start: dependency {dependency} is {status} in the manifest, not success"
    )]
    DependencyUnsatisfied {
        phase: String,
        dependency: String,
        status: String,
    },

    #[error("Audit trail cannot be guaranteed, aborting: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Phase {phase} ended with status {status}")]
    PhaseFailed { phase: String, status: PhaseStatus },

    #[error(
        "Quality gate exhausted after {attempts} attempt(s): score {score} is below threshold {threshold} for {artifact}"
    )]
    QualityExhausted {
        score: f64,
        threshold: f64,
        attempts: u32,
        artifact: PathBuf,
    },

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
