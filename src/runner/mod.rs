//! Process runner: one external command under a timeout, output to its own sink.
//!
//! The runner is split in two steps so that a caller can record every process
//! handle before waiting on any of them:
//!
//! 1. [`ProcessRunner::launch`] spawns the child synchronously and returns a
//!    [`LaunchedProcess`] handle.
//! 2. [`LaunchedProcess::wait`] supervises the child until it exits or its
//!    budget elapses, then returns an [`ExecutionResult`].
//!
//! On timeout the child's process group receives SIGTERM; if it has not exited
//! after the grace period it receives SIGKILL. The two endings are reported as
//! `timeout` and `killed` respectively, never as an ordinary failure.

mod command;
mod platform;
mod result;

pub use command::{CommandSpec, WorkUnit};
pub use result::{
    ExecutionResult, KILLED_EXIT_CODE, LAUNCH_FAILURE_EXIT_CODE, PhaseStatus, TIMEOUT_EXIT_CODE,
};

use crate::errors::ProcessError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default time a process gets to exit after SIGTERM before SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Launches external commands. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Run one unit to completion. Never returns an error: launch failures
    /// become `failed` results.
    pub async fn run(&self, unit: WorkUnit) -> ExecutionResult {
        let started = Instant::now();
        let (name, attempt, sink) = (unit.name.clone(), unit.attempt, unit.sink.clone());
        match self.launch(unit) {
            Ok(process) => process.wait().await,
            Err(e) => {
                warn!(phase = %name, error = %e, "launch failed");
                ExecutionResult::launch_failure(&name, attempt, &e.to_string(), started.elapsed())
                    .with_log_path(sink)
            }
        }
    }

    /// Spawn the unit's child process and return its handle without waiting.
    pub fn launch(&self, unit: WorkUnit) -> Result<LaunchedProcess, ProcessError> {
        let started = Instant::now();
        let (stdout, stderr) = open_sink(&unit.sink)?;

        let spec = &unit.command;
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = spec.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            phase: unit.name.clone(),
            program: spec.program.clone(),
            source,
        })?;

        info!(
            phase = %unit.name,
            attempt = unit.attempt,
            pid = child.id().unwrap_or(0),
            timeout_secs = unit.timeout.as_secs(),
            command = %spec.display(),
            "launched"
        );

        Ok(LaunchedProcess {
            name: unit.name,
            attempt: unit.attempt,
            sink: unit.sink,
            stdin_payload: unit.command.stdin,
            child,
            started,
            timeout: unit.timeout,
            grace: self.grace,
        })
    }
}

/// Open the unit's sink twice (stdout + stderr share the file, nothing else does).
fn open_sink(path: &Path) -> Result<(File, File), ProcessError> {
    let sink_err = |source| ProcessError::SinkOpen {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(sink_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(sink_err)?;
    let clone = file.try_clone().map_err(sink_err)?;
    Ok((file, clone))
}

/// How a supervised child ended.
enum Ending {
    Exited(ExitStatus),
    /// Exited during the grace window after SIGTERM.
    TimedOut,
    /// Needed SIGKILL.
    Killed,
    WaitFailed(std::io::Error),
}

/// A running child process, recorded before anyone waits on it.
#[derive(Debug)]
pub struct LaunchedProcess {
    name: String,
    attempt: u32,
    sink: PathBuf,
    stdin_payload: Option<Vec<u8>>,
    child: Child,
    started: Instant,
    timeout: Duration,
    grace: Duration,
}

impl LaunchedProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Supervise the child until it exits, enforcing its budget.
    ///
    /// Returns once the budget plus the grace period has elapsed at the latest
    /// (plus the time the OS needs to reap a SIGKILLed group).
    pub async fn wait(mut self) -> ExecutionResult {
        let feeder = self.feed_stdin();

        // A budget past the clock's range never expires.
        let waited = match self.started.checked_add(self.timeout) {
            Some(deadline) => tokio::time::timeout_at(deadline, self.child.wait()).await,
            None => Ok(self.child.wait().await),
        };
        let ending = match waited {
            Ok(Ok(status)) => Ending::Exited(status),
            Ok(Err(e)) => Ending::WaitFailed(e),
            Err(_) => self.terminate().await,
        };

        if let Some(feeder) = feeder {
            feeder.abort();
        }

        let duration = self.started.elapsed();
        let result = match ending {
            Ending::Exited(status) => {
                let code = status
                    .code()
                    .or_else(|| platform::signal_exit_code(&status))
                    .unwrap_or(-1);
                ExecutionResult::new(
                    &self.name,
                    PhaseStatus::from_exit_code(code),
                    Some(code),
                    duration,
                    self.attempt,
                )
            }
            Ending::TimedOut => ExecutionResult::new(
                &self.name,
                PhaseStatus::Timeout,
                Some(TIMEOUT_EXIT_CODE),
                duration,
                self.attempt,
            )
            .with_error(format!(
                "exceeded {}s budget, stopped after SIGTERM",
                self.timeout.as_secs()
            )),
            Ending::Killed => ExecutionResult::new(
                &self.name,
                PhaseStatus::Killed,
                Some(KILLED_EXIT_CODE),
                duration,
                self.attempt,
            )
            .with_error(format!(
                "exceeded {}s budget, ignored SIGTERM for {}s and was killed",
                self.timeout.as_secs(),
                self.grace.as_secs()
            )),
            Ending::WaitFailed(source) => {
                let err = ProcessError::WaitFailed {
                    phase: self.name.clone(),
                    source,
                };
                ExecutionResult::new(&self.name, PhaseStatus::Failed, None, duration, self.attempt)
                    .with_error(err.to_string())
            }
        };

        info!(
            phase = %result.phase,
            status = %result.status,
            exit_code = result.exit_code.unwrap_or(-1),
            duration_sec = result.duration_sec(),
            "finished"
        );
        result.with_log_path(self.sink)
    }

    /// Write the stdin payload concurrently with the wait, so a child that
    /// never reads cannot block supervision.
    fn feed_stdin(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let payload = self.stdin_payload.take()?;
        let mut stdin = self.child.stdin.take()?;
        let phase = self.name.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                // Broken pipe: the child exited without consuming its input.
                debug!(phase = %phase, error = %e, "stdin not fully consumed");
            }
            let _ = stdin.shutdown().await;
        }))
    }

    async fn terminate(&mut self) -> Ending {
        warn!(
            phase = %self.name,
            timeout_secs = self.timeout.as_secs(),
            "budget exceeded, sending SIGTERM"
        );
        platform::request_termination(&mut self.child);

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(_)) => Ending::TimedOut,
            Ok(Err(e)) => Ending::WaitFailed(e),
            Err(_) => {
                warn!(phase = %self.name, "grace period over, sending SIGKILL");
                platform::force_kill(&mut self.child);
                match self.child.wait().await {
                    Ok(_) => Ending::Killed,
                    Err(e) => Ending::WaitFailed(e),
                }
            }
        }
    }
}
