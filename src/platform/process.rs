//! External command execution behind a narrow trait so the flows can be
//! driven by scripted fakes in tests.

use std::fmt;
use std::process::Command;

use crate::core::errors::{DeployError, Result};

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments, already split.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build a command from a program and its arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Program followed by arguments, space-joined.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful, silent output.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last few lines of stderr (or stdout when stderr is empty), for error
    /// messages.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(5)..].join("\n");
        match (tail.is_empty(), self.code) {
            (true, Some(code)) => format!("exit status {code}"),
            (true, None) => "terminated by signal".to_string(),
            (false, Some(code)) => format!("exit status {code}: {tail}"),
            (false, None) => format!("terminated by signal: {tail}"),
        }
    }
}

/// Runs external commands and reports whether tools are invocable.
pub trait CommandRunner {
    /// Run `spec` to completion, capturing its output.
    ///
    /// # Errors
    /// Returns `CommandSpawn` when the process cannot be started. A non-zero
    /// exit is NOT an error at this level; callers inspect the output.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` can be found and executed.
    fn is_invocable(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec, "running external command");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .output()
            .map_err(|e| DeployError::CommandSpawn {
                program: spec.program.clone(),
                details: e.to_string(),
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn is_invocable(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_arguments() {
        let spec = CommandSpec::new("systemctl", ["is-active", "--quiet", "webmonitor"]);
        assert_eq!(spec.command_line(), "systemctl is-active --quiet webmonitor");
        assert_eq!(spec.to_string(), spec.command_line());
    }

    #[test]
    fn diagnostic_prefers_stderr_tail() {
        let output = CommandOutput {
            code: Some(1),
            stdout: "noise".into(),
            stderr: "a\nb\nc\nd\ne\nf\nERROR: no matching distribution\n".into(),
        };
        let diag = output.diagnostic();
        assert!(diag.starts_with("exit status 1"));
        assert!(diag.contains("no matching distribution"));
        assert!(!diag.contains("a\n"));
    }

    #[test]
    fn diagnostic_without_output_reports_status() {
        assert_eq!(CommandOutput::failed(3, "").diagnostic(), "exit status 3");
    }

    #[test]
    fn system_runner_captures_exit_code() {
        let runner = SystemRunner;
        if !runner.is_invocable("sh") {
            return;
        }
        let out = runner
            .run(&CommandSpec::new("sh", ["-c", "echo hi; exit 4"]))
            .unwrap();
        assert_eq!(out.code, Some(4));
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn system_runner_reports_spawn_failure() {
        let err = SystemRunner
            .run(&CommandSpec::new("/nonexistent/wmdeploy-tool", Vec::<String>::new()))
            .unwrap_err();
        assert_eq!(err.code(), "WMD-3900");
    }
}
