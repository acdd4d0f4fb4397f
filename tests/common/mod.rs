//! Shared harness for driving the `wmdeploy` binary in integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Captured result of one CLI invocation.
pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Per-case log with the command line and both output streams.
    pub log_path: PathBuf,
}

/// Run the built binary with `args` and no inherited config override.
pub fn run_cli_case(case: &str, args: &[&str]) -> CliResult {
    run_cli_case_with_env(case, args, &[])
}

/// Run the built binary with `args` and extra environment variables.
pub fn run_cli_case_with_env(case: &str, args: &[&str], env: &[(&str, &Path)]) -> CliResult {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wmdeploy"));
    cmd.args(args)
        .env_remove("WMDEPLOY_CONFIG")
        .env_remove("WMDEPLOY_LOG")
        .env("NO_COLOR", "1");
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("spawn wmdeploy");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("cli-cases");
    fs::create_dir_all(&log_dir).expect("create log dir");
    let log_path = log_dir.join(format!("{case}.log"));
    let log = format!(
        "args: {args:?}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
        output.status
    );
    fs::write(&log_path, log).expect("write case log");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
