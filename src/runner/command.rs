//! Argv-style command description and the unit of work handed to the runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// An external command, described as argv (never a shell string).
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Payload written to the child's stdin, then closed.
    pub stdin: Option<Vec<u8>>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// `sh -c <script>`; used for explicit phase commands and in tests.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Human-readable rendering for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// One invocation of an external command with its own budget and output sink.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Identity reported back in the result (the phase name).
    pub name: String,
    pub command: CommandSpec,
    pub timeout: Duration,
    /// File receiving the combined stdout and stderr. Never shared.
    pub sink: PathBuf,
    /// 1-based attempt number for this phase within the run.
    pub attempt: u32,
}

impl WorkUnit {
    pub fn new(
        name: impl Into<String>,
        command: CommandSpec,
        timeout: Duration,
        sink: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            timeout,
            sink: sink.into(),
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("claude")
            .arg("--profile")
            .arg("ci")
            .env("CONDUCTOR_PHASE", "phase1")
            .stdin("prompt");

        assert_eq!(spec.args, vec!["--profile", "ci"]);
        assert_eq!(spec.stdin.as_deref(), Some("prompt".as_bytes()));
        assert_eq!(spec.display(), "claude --profile ci");
    }

    #[test]
    fn test_shell_spec() {
        let spec = CommandSpec::shell("exit 3");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "exit 3"]);
    }

    #[test]
    fn test_work_unit_defaults_to_first_attempt() {
        let unit = WorkUnit::new(
            "phase1",
            CommandSpec::new("true"),
            Duration::from_secs(1),
            "/tmp/p1.log",
        );
        assert_eq!(unit.attempt, 1);
        assert_eq!(unit.with_attempt(3).attempt, 3);
    }
}
