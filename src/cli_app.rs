//! Top-level CLI definition and dispatch.

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;

use crate::cli::install::{InstallOptions, run_install_sequence};
use crate::cli::report::{FlowFailure, FlowReport, StepOutcome, format_report};
use crate::cli::status::{collect_inventory, format_inventory};
use crate::cli::uninstall::{UninstallOptions, run_uninstall_sequence};
use crate::core::config::DeployConfig;
use crate::core::errors::DeployError;
use crate::logger;
use crate::platform::Host;
use crate::platform::pal::LinuxPlatform;
use crate::platform::process::SystemRunner;
use crate::platform::systemd::Systemctl;
use crate::provision::PreservationPolicy;

/// Provision and remove the webmonitor system service.
#[derive(Debug, Parser)]
#[command(name = "wmdeploy", version, about)]
pub struct Cli {
    /// Deployment configuration file (TOML).
    #[arg(long, global = true, env = "WMDEPLOY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Print reports as JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Enable debug diagnostics on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision the service: identity, directories, application, unit, CLI links.
    Install {
        /// Application source tree (defaults to `artifact.source_dir`).
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,
        /// Show what would be done without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove the service and everything it installed.
    Uninstall {
        /// Keep the configuration directory.
        #[arg(long)]
        preserve_config: bool,
        /// Back up data and configuration before removing them.
        #[arg(long)]
        preserve_data: bool,
        /// Show what would be done without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show which managed resources are present.
    Status,
    /// Print the effective configuration as TOML.
    Config,
    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Parse `args` and run. Returns the process exit code.
///
/// `--help` and `--version` exit 0; every usage error exits 1 without
/// touching the system.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => run(&cli),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = err.print();
                0
            }
            _ => {
                let _ = err.print();
                print_error(&DeployError::Usage {
                    details: err.kind().to_string(),
                })
            }
        },
    }
}

/// Dispatch a parsed command line. Returns the process exit code.
#[must_use]
pub fn run(cli: &Cli) -> i32 {
    logger::init_logging(cli.verbose, cli.json);
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Command::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "wmdeploy", &mut std::io::stdout());
        return 0;
    }

    let config = match DeployConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return print_error(&err),
    };

    let runner = SystemRunner;
    let platform = LinuxPlatform::new(&runner);
    let init = Systemctl::new(&runner, config.runtime.systemctl.clone());
    let host = Host::new(&platform, &runner, &init);

    match &cli.command {
        Command::Install { source, dry_run } => {
            let opts = InstallOptions {
                source: source.clone(),
                dry_run: *dry_run,
            };
            let result = run_install_sequence(&host, &config, &opts);
            let next_step = !cli.json && result.as_ref().is_ok_and(|r| !r.dry_run);
            let code = finish(result, cli.json);
            if next_step {
                println!(
                    "\n  Enable and start with: {}",
                    format!("systemctl enable --now {}", config.unit.name).bold()
                );
            }
            code
        }
        Command::Uninstall {
            preserve_config,
            preserve_data,
            dry_run,
        } => {
            let opts = UninstallOptions {
                policy: PreservationPolicy {
                    preserve_config: *preserve_config,
                    preserve_data: *preserve_data,
                },
                dry_run: *dry_run,
            };
            finish(run_uninstall_sequence(&host, &config, opts), cli.json)
        }
        Command::Status => match collect_inventory(&host, &config) {
            Ok(inv) if cli.json => print_json(&inv),
            Ok(inv) => {
                print!("{}", format_inventory(&inv));
                0
            }
            Err(err) => print_error(&err),
        },
        Command::Config => match config.to_toml() {
            Ok(text) => {
                print!("{text}");
                0
            }
            Err(err) => print_error(&err),
        },
        Command::Completions { .. } => 0,
    }
}

fn finish(result: Result<FlowReport, FlowFailure>, json: bool) -> i32 {
    let (report, code) = match result {
        Ok(report) => (report, 0),
        Err(failure) => (failure.report, 1),
    };
    if json {
        let printed = print_json(&report);
        return code.max(printed);
    }
    if std::io::stdout().is_terminal() {
        print!("{}", render_report(&report));
    } else {
        print!("{}", format_report(&report));
    }
    code
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(err) => print_error(&DeployError::from(err)),
    }
}

fn print_error(err: &DeployError) -> i32 {
    eprintln!("{} {err}", "error:".red().bold());
    if let Some(hint) = err.hint() {
        eprintln!("  {} {hint}", "hint:".yellow());
    }
    1
}

fn render_report(report: &FlowReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let mode = if report.dry_run {
        "dry-run"
    } else {
        report.flow.name()
    };
    let _ = writeln!(out, "{}\n", format!("wmdeploy {mode} report:").bold());
    for step in &report.steps {
        let tag = format!("[{}]", step.outcome.tag());
        let tag = match step.outcome {
            StepOutcome::Done => tag.green(),
            StepOutcome::Skipped => tag.dimmed(),
            StepOutcome::Warned => tag.yellow(),
            StepOutcome::Planned => tag.cyan(),
            StepOutcome::Failed => tag.red().bold(),
        };
        let _ = writeln!(out, "  {tag} {}", step.description);
        if let Some(err) = &step.error {
            let _ = writeln!(out, "         {} {err}", "error:".red());
        }
    }
    if let Some(backup) = &report.backup {
        let _ = writeln!(
            out,
            "\n  Backup:  {} ({} files, {} bytes)",
            backup.path.display(),
            backup.files,
            backup.bytes
        );
    }
    match &report.failure {
        Some(failure) => {
            if let Some(hint) = &failure.hint {
                let _ = writeln!(out, "\n  {} {hint}", "hint:".yellow());
            }
        }
        None if report.success && !report.dry_run => {
            let done = format!("{} completed.", report.flow.name());
            let _ = writeln!(out, "\n  {}", done.green().bold());
        }
        None => {}
    }
    out
}
