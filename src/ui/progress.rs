//! Pipeline progress UI.
//!
//! Renders [`PipelineEvent`]s in one of three modes:
//! - `full`: progress bars and colors
//! - `minimal`: one line per finished phase
//! - `json`: one JSON object per event, for machine consumption

use crate::orchestrator::{PipelineEvent, RunReport, RunState};
use crate::runner::ExecutionResult;
use crate::ui::icons::{BLOCKER, CHECK, CLOCK, CROSS, GAUGE, PARALLEL, RETRY, RUNNING, SKIP, SPARKLE};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Terminal UI for a pipeline run.
///
/// Events are consumed from a single task, so the bar map lock is never
/// contended.
pub struct PipelineUi {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    phase_bars: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
    term: Term,
}

impl PipelineUi {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let header_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let header_bar = if mode == UiMode::Full {
            multi.add(ProgressBar::new(0))
        } else {
            ProgressBar::hidden()
        };
        header_bar.set_style(header_style);
        header_bar.set_prefix("Phases");

        Self {
            mode,
            multi,
            header_bar,
            phase_bars: Mutex::new(HashMap::new()),
            verbose,
            term: Term::stdout(),
        }
    }

    /// Handle to the bars, for clearing them while a prompt is open.
    pub fn progress(&self) -> MultiProgress {
        self.multi.clone()
    }

    pub fn handle_event(&self, event: &PipelineEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &PipelineEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{json}");
        }
    }

    fn handle_minimal(&self, event: &PipelineEvent) {
        let line = match event {
            PipelineEvent::PhaseFinished { result } if result.is_success() => {
                format!("✓ {}", result.phase)
            }
            PipelineEvent::PhaseFinished { result } => format!("✗ {}", result.describe()),
            PipelineEvent::PhaseSkipped { phase } => format!("- {phase} (skipped)"),
            PipelineEvent::RunFinished { state } => format!("Run {state}"),
            _ => return,
        };
        let _ = writeln!(&self.term, "{line}");
    }

    fn handle_full(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted {
                feature,
                pending,
                already_satisfied,
                ..
            } => self.on_run_started(feature, pending, already_satisfied),
            PipelineEvent::UnitStarted { unit, phases } => self.on_unit_started(unit, phases),
            PipelineEvent::PhaseFinished { result } => self.on_phase_finished(result),
            PipelineEvent::PhaseRetrying {
                phase,
                attempt,
                timeout,
            } => {
                self.print_line(format!(
                    "  {}Retrying {} (attempt {}, {} budget)",
                    RETRY,
                    style(phase).yellow(),
                    attempt,
                    format_duration(*timeout)
                ));
                // The retried attempt is counted again when it finishes.
                self.header_bar
                    .set_length(self.header_bar.length().unwrap_or(0) + 1);
            }
            PipelineEvent::PhaseSkipped { phase } => {
                self.print_line(format!(
                    "  {}Skipped non-blocking phase {}",
                    SKIP,
                    style(phase).dim()
                ));
            }
            PipelineEvent::BranchHalted { phase, blocked } => {
                if blocked.is_empty() {
                    self.print_line(format!("  {}Halted at {}", BLOCKER, style(phase).red()));
                } else {
                    self.print_line(format!(
                        "  {}Halted at {}; not starting {}",
                        BLOCKER,
                        style(phase).red(),
                        style(blocked.join(", ")).dim()
                    ));
                }
            }
            PipelineEvent::QualityStarted { artifact } => {
                self.header_bar.set_message("quality gate");
                self.print_line(format!("{}Evaluating {}", GAUGE, style(artifact).dim()));
            }
            PipelineEvent::RunFinished { state } => {
                match state {
                    RunState::Completed => self.header_bar.finish_with_message("done"),
                    other => self.header_bar.abandon_with_message(other.to_string()),
                }
            }
        }
    }

    fn on_run_started(&self, feature: &str, pending: &[String], already: &[String]) {
        self.header_bar.set_length(pending.len() as u64);
        self.header_bar.set_message(feature.to_string());
        if !already.is_empty() {
            self.print_line(format!(
                "{}Already satisfied: {}",
                CHECK,
                style(already.join(", ")).dim()
            ));
        }
    }

    fn on_unit_started(&self, unit: &str, phases: &[String]) {
        if phases.len() > 1 {
            self.print_line(format!("{}{}", PARALLEL, style(unit).cyan().bold()));
        } else if self.verbose {
            self.print_line(format!("{}{}", RUNNING, style(unit).cyan()));
        }

        let bar_style = ProgressStyle::default_spinner()
            .template("  {spinner} {prefix:.bold} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");
        let Ok(mut bars) = self.phase_bars.lock() else {
            return;
        };
        for phase in phases {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(bar_style.clone());
            bar.set_prefix(phase.clone());
            bar.set_message("running");
            bar.enable_steady_tick(Duration::from_millis(100));
            bars.insert(phase.clone(), bar);
        }
    }

    fn on_phase_finished(&self, result: &ExecutionResult) {
        if let Some(bar) = self
            .phase_bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&result.phase))
        {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);

        if result.is_success() {
            self.print_line(format!(
                "  {}{} {} ({})",
                SPARKLE,
                style(&result.phase).green().bold(),
                style("complete").green(),
                format_duration(result.duration)
            ));
        } else {
            let icon = if result.status.is_timeout() { CLOCK } else { CROSS };
            self.print_line(format!("  {}{}", icon, style(result.describe()).red()));
            if let Some(log) = &result.log_path {
                self.print_line(format!("     log: {}", style(log.display()).dim()));
            }
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.mode != UiMode::Full || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Final summary, printed after the event stream is drained.
    pub fn print_report(&self, report: &RunReport) {
        if self.mode == UiMode::Json {
            return;
        }
        let _ = self.multi.clear();
        println!();
        let headline = match report.state {
            RunState::Completed => style(format!("{}Run completed", CHECK)).green().bold(),
            ref other => style(format!("{}Run {}", CROSS, other)).red().bold(),
        };
        println!(
            "{} for {} in {}",
            headline,
            style(&report.feature).bold(),
            format_duration(report.duration)
        );

        for result in report.final_results() {
            let mark = if result.is_success() {
                style("✓").green()
            } else {
                style("✗").red()
            };
            let attempts = if result.attempt > 1 {
                format!(" after {} attempts", result.attempt)
            } else {
                String::new()
            };
            println!(
                "  {} {:<16} {}{}",
                mark,
                result.phase,
                result.status,
                style(attempts).dim()
            );
        }
        for phase in &report.skipped {
            println!("  {} {:<16} skipped", style("-").dim(), phase);
        }
        for blocked in &report.blocked {
            println!(
                "  {} {:<16} {}",
                style("·").dim(),
                blocked.phase,
                style(&blocked.reason).dim()
            );
        }
        if let Some(quality) = &report.quality {
            let score = quality.outcome.score();
            let verdict = if quality.outcome.is_accepted() {
                style("accepted".to_string()).green()
            } else if quality.passed() {
                style("accepted below threshold".to_string()).yellow()
            } else {
                style("rejected".to_string()).red()
            };
            println!(
                "  {}quality {}/10 (threshold {}) after {} evaluation(s): {}",
                GAUGE,
                score.value,
                quality.threshold,
                quality.outcome.attempts(),
                verdict
            );
        }
    }
}

/// Run `f` with the bars of `progress` cleared from the terminal, redrawing
/// them afterwards. Without bars `f` simply runs.
pub fn suspended<R>(progress: Option<&MultiProgress>, f: impl FnOnce() -> R) -> R {
    match progress {
        Some(multi) => multi.suspend(f),
        None => f(),
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", d.as_millis())
    }
}
