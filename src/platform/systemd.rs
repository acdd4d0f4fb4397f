//! systemd integration: unit descriptor rendering and `systemctl` control.

use crate::core::config::DeployConfig;
use crate::core::errors::{DeployError, Result};
use crate::platform::process::{CommandRunner, CommandSpec};

/// Init-system client. State is queried on every call, never cached.
pub trait InitSystem {
    /// Whether the unit is currently running.
    ///
    /// # Errors
    /// Returns an error when the init system cannot be queried.
    fn is_active(&self, unit: &str) -> Result<bool>;

    /// Whether the unit is enabled at boot.
    ///
    /// # Errors
    /// Returns an error when the init system cannot be queried.
    fn is_enabled(&self, unit: &str) -> Result<bool>;

    /// Stop a running unit.
    ///
    /// # Errors
    /// Returns `InitSystem` when the stop command fails.
    fn stop(&self, unit: &str) -> Result<()>;

    /// Disable a unit at boot.
    ///
    /// # Errors
    /// Returns `InitSystem` when the disable command fails.
    fn disable(&self, unit: &str) -> Result<()>;

    /// Re-read unit files.
    ///
    /// # Errors
    /// Returns `InitSystem` when the reload command fails.
    fn reload(&self) -> Result<()>;
}

/// [`InitSystem`] driving `systemctl` through a [`CommandRunner`].
pub struct Systemctl<'r> {
    runner: &'r dyn CommandRunner,
    program: String,
}

impl<'r> Systemctl<'r> {
    /// Control systemd with the given `systemctl` binary.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn query(&self, verb: &'static str, unit: &str) -> Result<bool> {
        let spec = CommandSpec::new(&self.program, [verb, "--quiet", unit]);
        match self.runner.run(&spec) {
            // is-active / is-enabled signal "no" through a non-zero exit.
            Ok(output) => Ok(output.success()),
            // Without systemctl nothing can be running or enabled.
            Err(DeployError::CommandSpawn { program, details }) => {
                tracing::warn!(%program, %details, "cannot query {verb}; assuming no");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn control(&self, action: &'static str, unit: Option<&str>) -> Result<()> {
        let mut args = vec![action];
        if let Some(unit) = unit {
            args.push(unit);
        }
        let output = self.runner.run(&CommandSpec::new(&self.program, args))?;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::InitSystem {
                action,
                unit: unit.unwrap_or("*").to_string(),
                details: output.diagnostic(),
            })
        }
    }
}

impl InitSystem for Systemctl<'_> {
    fn is_active(&self, unit: &str) -> Result<bool> {
        self.query("is-active", unit)
    }

    fn is_enabled(&self, unit: &str) -> Result<bool> {
        self.query("is-enabled", unit)
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.control("stop", Some(unit))
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.control("disable", Some(unit))
    }

    fn reload(&self) -> Result<()> {
        self.control("daemon-reload", None)
    }
}

/// Render the service unit descriptor for the configured deployment.
///
/// The daemon runs from the data directory so state it writes to relative
/// paths lands where backups and reinstalls expect it.
#[must_use]
pub fn render_unit(config: &DeployConfig) -> String {
    let log_file = config.paths.log_dir.join("webmonitor.log");
    format!(
        r"[Unit]
Description={description}
After=network.target

[Service]
Type=simple
User={user}
Group={group}
WorkingDirectory={workdir}
Environment=SOCKET_PATH={socket}
ExecStart={exec}
Restart={restart}
RestartSec={restart_sec}
StandardOutput=append:{log}
StandardError=append:{log}

[Install]
WantedBy=multi-user.target
",
        description = config.unit.description,
        user = config.service.user,
        group = config.service.group,
        workdir = config.paths.data_dir.display(),
        socket = config.socket_path().display(),
        exec = config.daemon_executable().display(),
        restart = config.unit.restart,
        restart_sec = config.unit.restart_sec,
        log = log_file.display(),
    )
}
