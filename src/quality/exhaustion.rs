//! What to do with an artifact that never reached the threshold.

use super::QualityScore;
use crate::ui::suspended;
use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::MultiProgress;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionDecision {
    /// Keep the last artifact despite the low score.
    AcceptAsIs,
    Abort,
}

/// Surfaces an exhausted quality gate to the operator.
pub trait ExhaustionHandler {
    fn decide(
        &mut self,
        score: &QualityScore,
        threshold: f64,
        artifact: &Path,
    ) -> Result<ExhaustionDecision>;
}

/// Always the same answer: `--accept-low-quality`, or abort when nobody can be asked.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub ExhaustionDecision);

impl ExhaustionHandler for FixedDecision {
    fn decide(&mut self, _: &QualityScore, _: f64, _: &Path) -> Result<ExhaustionDecision> {
        Ok(self.0)
    }
}

/// Interactive choice on the terminal.
#[derive(Debug, Default)]
pub struct PromptDecision {
    progress: Option<MultiProgress>,
}

impl PromptDecision {
    /// Clear `progress` from the terminal while the question is open.
    pub fn with_progress(progress: MultiProgress) -> Self {
        Self {
            progress: Some(progress),
        }
    }
}

impl ExhaustionHandler for PromptDecision {
    fn decide(
        &mut self,
        score: &QualityScore,
        threshold: f64,
        artifact: &Path,
    ) -> Result<ExhaustionDecision> {
        suspended(self.progress.as_ref(), || -> Result<ExhaustionDecision> {
            println!();
            println!(
                "{} Quality score {} is below threshold {} after {} attempt(s)",
                style("!").yellow().bold(),
                style(score.value).red().bold(),
                threshold,
                score.attempt
            );
            println!("  Artifact: {}", style(artifact.display()).dim());

            let options = &["Accept the artifact as is", "Abort"];
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("How do you want to proceed?")
                .items(options)
                .default(1)
                .interact()?;

            Ok(match selection {
                0 => ExhaustionDecision::AcceptAsIs,
                _ => ExhaustionDecision::Abort,
            })
        })
    }
}
