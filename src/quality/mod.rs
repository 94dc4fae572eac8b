//! Quality gate: extract a numeric score from a generated artifact and run a
//! strictly bounded regeneration loop until it meets the threshold.
//!
//! The score format is fixed by a regex with one capture group. The default
//! matches lines such as `Confidence Score: 8/10` or `**Quality Score**: 7.5/10`.
//! A missing score, several disagreeing scores, or a value outside 0-10 is an
//! error. Nothing is guessed.

mod exhaustion;

pub use exhaustion::{ExhaustionDecision, ExhaustionHandler, FixedDecision, PromptDecision};

use crate::errors::QualityError;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Default score pattern; case-insensitive, markdown emphasis allowed.
pub const DEFAULT_SCORE_PATTERN: &str =
    r"(?i)\b(?:confidence|quality)\s+score\s*[*_]*\s*:\s*[*_]*\s*(\d+(?:\.\d+)?)\s*[*_]*\s*/\s*10\b";

/// Upper end of the score scale.
pub const MAX_SCORE: f64 = 10.0;

static DEFAULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_SCORE_PATTERN).expect("default score pattern is a valid static regex")
});

/// A score extracted from one artifact evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub value: f64,
    /// 1-based evaluation number within one `enforce` call.
    pub attempt: u32,
}

impl QualityScore {
    pub fn meets(&self, threshold: f64) -> bool {
        self.value >= threshold
    }
}

/// Produces a new artifact after a below-threshold evaluation.
#[async_trait]
pub trait Regenerator: Send {
    /// Regenerate ahead of evaluation number `attempt`; returns the artifact to evaluate.
    async fn regenerate(
        &mut self,
        attempt: u32,
        previous: &QualityScore,
    ) -> Result<PathBuf, QualityError>;
}

/// Result of [`QualityGate::enforce`].
#[derive(Debug, Clone, PartialEq)]
pub enum QualityOutcome {
    Accepted {
        score: QualityScore,
        artifact: PathBuf,
        history: Vec<QualityScore>,
    },
    /// Every permitted attempt stayed below the threshold.
    Exhausted {
        score: QualityScore,
        artifact: PathBuf,
        history: Vec<QualityScore>,
    },
}

impl QualityOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn score(&self) -> QualityScore {
        match self {
            Self::Accepted { score, .. } | Self::Exhausted { score, .. } => *score,
        }
    }

    pub fn artifact(&self) -> &Path {
        match self {
            Self::Accepted { artifact, .. } | Self::Exhausted { artifact, .. } => artifact,
        }
    }

    /// Number of evaluations performed.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Accepted { history, .. } | Self::Exhausted { history, .. } => {
                history.len() as u32
            }
        }
    }
}

/// Extracts scores with one compiled pattern.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pattern: Regex,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.clone(),
        }
    }
}

impl QualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `pattern` (or the default when `None`). It must have a capture group.
    pub fn from_pattern(pattern: Option<&str>) -> Result<Self, QualityError> {
        let Some(source) = pattern else {
            return Ok(Self::default());
        };
        let invalid = |message: String| QualityError::InvalidPattern {
            pattern: source.to_string(),
            message,
        };
        let pattern = Regex::new(source).map_err(|e| invalid(e.to_string()))?;
        if pattern.captures_len() < 2 {
            return Err(invalid("pattern needs a capture group for the score".into()));
        }
        Ok(Self { pattern })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Extract the score from artifact text. `path` is only used in errors.
    pub fn extract(&self, content: &str, path: &Path) -> Result<f64, QualityError> {
        let mut values: Vec<f64> = Vec::new();
        for caps in self.pattern.captures_iter(content) {
            let Some(raw) = caps.get(1) else { continue };
            let raw = raw.as_str().trim();
            let value = raw
                .parse::<f64>()
                .map_err(|_| QualityError::NonNumericScore {
                    path: path.to_path_buf(),
                    raw: raw.to_string(),
                })?;
            values.push(value);
        }

        let Some(&first) = values.first() else {
            return Err(QualityError::ScoreMissing {
                path: path.to_path_buf(),
                pattern: self.pattern.as_str().to_string(),
            });
        };
        if values.iter().any(|v| *v != first) {
            return Err(QualityError::AmbiguousScore {
                path: path.to_path_buf(),
                values,
            });
        }
        if !(0.0..=MAX_SCORE).contains(&first) {
            return Err(QualityError::OutOfRange {
                path: path.to_path_buf(),
                value: first,
            });
        }
        Ok(first)
    }

    /// Read the artifact and extract its score (attempt 1).
    pub fn evaluate(&self, artifact: &Path) -> Result<QualityScore, QualityError> {
        self.evaluate_attempt(artifact, 1)
    }

    fn evaluate_attempt(&self, artifact: &Path, attempt: u32) -> Result<QualityScore, QualityError> {
        let content =
            std::fs::read_to_string(artifact).map_err(|source| QualityError::ArtifactRead {
                path: artifact.to_path_buf(),
                source,
            })?;
        let value = self.extract(&content, artifact)?;
        Ok(QualityScore { value, attempt })
    }

    /// Evaluate, regenerating while below `threshold`, for at most
    /// `max_attempts` evaluations (so at most `max_attempts - 1` regenerations).
    pub async fn enforce(
        &self,
        artifact: &Path,
        regenerator: &mut dyn Regenerator,
        threshold: f64,
        max_attempts: u32,
    ) -> Result<QualityOutcome, QualityError> {
        if max_attempts == 0 {
            return Err(QualityError::ZeroAttempts);
        }

        let mut artifact = artifact.to_path_buf();
        let mut history = Vec::new();
        for attempt in 1..=max_attempts {
            let score = self.evaluate_attempt(&artifact, attempt)?;
            history.push(score);
            info!(
                attempt,
                score = score.value,
                threshold,
                artifact = %artifact.display(),
                "quality evaluated"
            );

            if score.meets(threshold) {
                return Ok(QualityOutcome::Accepted {
                    score,
                    artifact,
                    history,
                });
            }
            if attempt < max_attempts {
                warn!(attempt, score = score.value, threshold, "below threshold, regenerating");
                artifact = regenerator.regenerate(attempt + 1, &score).await?;
            }
        }

        let score = history
            .last()
            .copied()
            .ok_or(QualityError::ZeroAttempts)?;
        warn!(
            attempts = max_attempts,
            score = score.value,
            threshold,
            "quality gate exhausted"
        );
        Ok(QualityOutcome::Exhausted {
            score,
            artifact,
            history,
        })
    }
}
