//! What happens after a phase fails.

use crate::conductor_config::FailurePolicy;
use crate::phase::Phase;
use crate::runner::ExecutionResult;
use crate::ui::suspended;
use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::MultiProgress;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Run the phase again, within the retry budget.
    Retry,
    /// Leave a non-blocking phase failed and carry on.
    Skip,
    /// Stop this branch; independent branches continue.
    Halt,
    /// Stop the whole run.
    Abort,
}

/// Everything a policy may look at when deciding.
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub phase: &'a Phase,
    pub result: &'a ExecutionResult,
    pub retries_used: u32,
    pub max_retries: u32,
    /// Budget the next attempt would get.
    pub next_timeout: Duration,
}

impl FailureContext<'_> {
    pub fn can_retry(&self) -> bool {
        self.retries_used < self.max_retries
    }

    pub fn can_skip(&self) -> bool {
        self.phase.non_blocking
    }
}

pub trait RecoveryPolicy: Send + Sync {
    fn decide(&mut self, failure: &FailureContext<'_>) -> Result<RecoveryAction>;
}

/// Same action for every failure.
#[derive(Debug, Clone, Copy)]
pub struct StaticPolicy(pub RecoveryAction);

impl RecoveryPolicy for StaticPolicy {
    fn decide(&mut self, _: &FailureContext<'_>) -> Result<RecoveryAction> {
        Ok(self.0)
    }
}

/// Ask the operator on the terminal.
#[derive(Debug, Default)]
pub struct PromptPolicy {
    progress: Option<MultiProgress>,
}

impl PromptPolicy {
    /// Clear `progress` from the terminal while the question is open.
    pub fn with_progress(progress: MultiProgress) -> Self {
        Self {
            progress: Some(progress),
        }
    }
}

impl RecoveryPolicy for PromptPolicy {
    fn decide(&mut self, failure: &FailureContext<'_>) -> Result<RecoveryAction> {
        suspended(self.progress.as_ref(), || ask(failure))
    }
}

fn ask(failure: &FailureContext<'_>) -> Result<RecoveryAction> {
    println!();
    println!(
        "{} Phase {} failed: {}",
        style("✗").red().bold(),
        style(&failure.phase.name).bold(),
        failure.result.describe()
    );
    if let Some(log) = &failure.result.log_path {
        println!("  Log: {}", style(log.display()).dim());
    }

    let options = choices(failure);
    let labels: Vec<&str> = options.iter().map(|(label, _)| label.as_str()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("How do you want to proceed?")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(options
        .get(selection)
        .map(|(_, action)| *action)
        .unwrap_or(RecoveryAction::Halt))
}

/// Actions offered for `failure`, most hopeful first.
fn choices(failure: &FailureContext<'_>) -> Vec<(String, RecoveryAction)> {
    let mut options = Vec::new();
    if failure.can_retry() {
        options.push((
            format!(
                "Retry ({} of {} retries left, {}s budget)",
                failure.max_retries - failure.retries_used,
                failure.max_retries,
                failure.next_timeout.as_secs()
            ),
            RecoveryAction::Retry,
        ));
    }
    if failure.can_skip() {
        options.push(("Skip this phase".into(), RecoveryAction::Skip));
    }
    options.push(("Halt this branch".into(), RecoveryAction::Halt));
    options.push(("Abort the run".into(), RecoveryAction::Abort));
    options
}

/// Policy for a configured `on_failure` setting.
///
/// `prompt` falls back to halting when no terminal is attached.
pub fn policy_for(policy: FailurePolicy) -> Box<dyn RecoveryPolicy> {
    match policy {
        FailurePolicy::Halt => Box::new(StaticPolicy(RecoveryAction::Halt)),
        FailurePolicy::Abort => Box::new(StaticPolicy(RecoveryAction::Abort)),
        FailurePolicy::Retry => Box::new(StaticPolicy(RecoveryAction::Retry)),
        FailurePolicy::Skip => Box::new(StaticPolicy(RecoveryAction::Skip)),
        FailurePolicy::Prompt if console::user_attended() => Box::new(PromptPolicy::default()),
        FailurePolicy::Prompt => {
            warn!("on_failure = prompt but no terminal is attached; halting failed branches");
            Box::new(StaticPolicy(RecoveryAction::Halt))
        }
    }
}

/// Clamp a requested action to what the failure allows.
pub(crate) fn permitted(action: RecoveryAction, failure: &FailureContext<'_>) -> RecoveryAction {
    match action {
        RecoveryAction::Retry if !failure.can_retry() => RecoveryAction::Halt,
        RecoveryAction::Skip if !failure.can_skip() => RecoveryAction::Halt,
        other => other,
    }
}

/// Next attempt's budget: timeouts grow by `backoff`, other failures keep it.
/// A product too large for a `Duration` saturates.
pub(crate) fn next_budget(result: &ExecutionResult, current: Duration, backoff: f64) -> Duration {
    if result.status.is_timeout() {
        Duration::try_from_secs_f64(backoff * current.as_secs_f64()).unwrap_or(Duration::MAX)
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::PhaseStatus;

    fn failed(status: PhaseStatus) -> ExecutionResult {
        ExecutionResult::new("phase2b", status, Some(1), Duration::from_secs(1), 1)
    }

    #[test]
    fn test_retry_beyond_budget_halts() {
        let phase = Phase::new("phase2b", "", vec![]);
        let result = failed(PhaseStatus::Failed);
        let mut ctx = FailureContext {
            phase: &phase,
            result: &result,
            retries_used: 0,
            max_retries: 1,
            next_timeout: Duration::from_secs(10),
        };
        assert_eq!(permitted(RecoveryAction::Retry, &ctx), RecoveryAction::Retry);
        ctx.retries_used = 1;
        assert_eq!(permitted(RecoveryAction::Retry, &ctx), RecoveryAction::Halt);
    }

    #[test]
    fn test_skip_only_for_non_blocking() {
        let blocking = Phase::new("phase2b", "", vec![]);
        let optional = Phase::new("lint", "", vec![]).non_blocking();
        let result = failed(PhaseStatus::Failed);
        for (phase, expected) in [
            (&blocking, RecoveryAction::Halt),
            (&optional, RecoveryAction::Skip),
        ] {
            let ctx = FailureContext {
                phase,
                result: &result,
                retries_used: 0,
                max_retries: 0,
                next_timeout: Duration::ZERO,
            };
            assert_eq!(permitted(RecoveryAction::Skip, &ctx), expected);
        }
    }

    #[test]
    fn test_timeout_grows_budget() {
        let base = Duration::from_secs(10);
        assert_eq!(
            next_budget(&failed(PhaseStatus::Timeout), base, 2.0),
            Duration::from_secs(20)
        );
        assert_eq!(next_budget(&failed(PhaseStatus::Failed), base, 2.0), base);
    }

    #[test]
    fn test_budget_growth_saturates() {
        let huge = Duration::from_secs(u64::MAX / 2);
        assert_eq!(
            next_budget(&failed(PhaseStatus::Killed), huge, 4.0),
            Duration::MAX
        );
        assert_eq!(
            next_budget(&failed(PhaseStatus::Timeout), Duration::from_secs(1), f64::INFINITY),
            Duration::MAX
        );
    }

    #[test]
    fn test_prompt_offers_only_permitted_actions() {
        let optional = Phase::new("lint", "", vec![]).non_blocking();
        let result = failed(PhaseStatus::Timeout);
        let mut ctx = FailureContext {
            phase: &optional,
            result: &result,
            retries_used: 1,
            max_retries: 3,
            next_timeout: Duration::from_secs(40),
        };
        let offered = choices(&ctx);
        let actions: Vec<RecoveryAction> = offered.iter().map(|(_, a)| *a).collect();
        assert_eq!(
            actions,
            vec![
                RecoveryAction::Retry,
                RecoveryAction::Skip,
                RecoveryAction::Halt,
                RecoveryAction::Abort
            ]
        );
        assert_eq!(offered[0].0, "Retry (2 of 3 retries left, 40s budget)");

        let blocking = Phase::new("phase2b", "", vec![]);
        ctx.phase = &blocking;
        ctx.retries_used = 3;
        let actions: Vec<RecoveryAction> = choices(&ctx).into_iter().map(|(_, a)| a).collect();
        assert_eq!(actions, vec![RecoveryAction::Halt, RecoveryAction::Abort]);
    }

    #[test]
    fn test_static_policies() {
        let phase = Phase::new("a", "", vec![]);
        let result = failed(PhaseStatus::Failed);
        let ctx = FailureContext {
            phase: &phase,
            result: &result,
            retries_used: 0,
            max_retries: 1,
            next_timeout: Duration::ZERO,
        };
        assert_eq!(
            policy_for(FailurePolicy::Abort).decide(&ctx).unwrap(),
            RecoveryAction::Abort
        );
        assert_eq!(
            policy_for(FailurePolicy::Halt).decide(&ctx).unwrap(),
            RecoveryAction::Halt
        );
    }
}
