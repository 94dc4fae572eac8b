//! Pipeline execution command: `conductor run`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::super::RunArgs;

pub async fn cmd_run(project_dir: PathBuf, args: RunArgs, verbose: bool) -> Result<u8> {
    use conductor::conductor_config::{CliOverrides, ConductorConfig, FailurePolicy};
    use conductor::exit_codes;
    use conductor::orchestrator::{PipelineOrchestrator, PromptPolicy, RunOptions};
    use conductor::quality::{ExhaustionDecision, FixedDecision, PromptDecision};
    use conductor::ui::{PipelineUi, UiMode};

    let config = ConductorConfig::with_cli_args(
        project_dir,
        CliOverrides {
            profile: args.profile.clone(),
            timeout_secs: args.timeout,
            max_attempts: args.max_attempts,
            on_failure: args.on_failure,
        },
    )?;
    let frozen = config.freeze().context("Invalid configuration")?;

    let ui = PipelineUi::new(UiMode::parse(&args.ui), verbose);
    let progress = ui.progress();
    let (tx, mut rx) = mpsc::channel(64);
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
        ui
    });

    let attended = console::user_attended();
    let prompt_on_failure = attended && frozen.on_failure == FailurePolicy::Prompt;
    let mut orchestrator = PipelineOrchestrator::new(frozen)?.with_event_channel(tx);
    if prompt_on_failure {
        orchestrator =
            orchestrator.with_recovery_policy(PromptPolicy::with_progress(progress.clone()));
    }
    let mut orchestrator = if args.accept_low_quality {
        orchestrator.with_exhaustion_handler(FixedDecision(ExhaustionDecision::AcceptAsIs))
    } else if attended {
        orchestrator.with_exhaustion_handler(PromptDecision::with_progress(progress))
    } else {
        orchestrator.with_exhaustion_handler(FixedDecision(ExhaustionDecision::Abort))
    };

    let options = RunOptions {
        phases: args.phases.clone(),
        force: args.force,
    };
    let outcome = orchestrator.run(&args.feature, &options).await;
    // Closes the event channel so the UI task can finish.
    drop(orchestrator);
    let ui = ui_task.await.context("UI task failed")?;

    let report = outcome?;
    ui.print_report(&report);
    match report.failure() {
        Some(err) => Err(err.into()),
        None => Ok(exit_codes::SUCCESS),
    }
}
