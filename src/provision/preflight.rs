//! Preflight validation: privilege and tooling checks that run before any
//! mutation.

use crate::core::config::DeployConfig;
use crate::core::errors::{DeployError, Result};
use crate::platform::Host;
use crate::platform::process::CommandSpec;

/// What a flow needs from the host before it may mutate anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    /// Effective uid 0.
    pub elevated: bool,
    /// Interpreter that must be invocable.
    pub runtime: Option<String>,
    /// Whether `<runtime> -m venv` must work.
    pub isolation: bool,
    /// Init-system control tool that must be invocable.
    pub init_tool: Option<String>,
}

impl Requirements {
    /// Install needs root, the interpreter, `venv` and `systemctl`.
    #[must_use]
    pub fn for_install(config: &DeployConfig) -> Self {
        Self {
            elevated: true,
            runtime: Some(config.runtime.python.clone()),
            isolation: true,
            init_tool: Some(config.runtime.systemctl.clone()),
        }
    }

    /// Uninstall only needs root; it must work after the runtime is gone.
    #[must_use]
    pub fn for_uninstall() -> Self {
        Self {
            elevated: true,
            runtime: None,
            isolation: false,
            init_tool: None,
        }
    }
}

/// Check privilege.
///
/// # Errors
/// `Privilege` when the effective uid is not 0.
pub fn check_privilege(host: &Host<'_>) -> Result<()> {
    let euid = host.platform.effective_uid();
    if euid == 0 {
        Ok(())
    } else {
        Err(DeployError::Privilege { euid })
    }
}

/// Check that every required tool is invocable. Read-only.
///
/// # Errors
/// `DependencyMissing` naming the first absent tool with a remediation hint.
pub fn check_tools(host: &Host<'_>, req: &Requirements) -> Result<()> {
    if let Some(python) = &req.runtime {
        if !host.runner.is_invocable(python) {
            return Err(DeployError::DependencyMissing {
                tool: python.clone(),
                hint: format!(
                    "install Python 3 (e.g. `apt install python3`) so `{python}` is on PATH"
                ),
            });
        }
        if req.isolation {
            let probe = CommandSpec::new(python, ["-m", "venv", "--help"]);
            let available = host.runner.run(&probe).is_ok_and(|out| out.success());
            if !available {
                return Err(DeployError::DependencyMissing {
                    tool: format!("{python} -m venv"),
                    hint: "install the venv module (e.g. `apt install python3-venv`)".to_string(),
                });
            }
        }
    }
    if let Some(tool) = &req.init_tool {
        if !host.runner.is_invocable(tool) {
            return Err(DeployError::DependencyMissing {
                tool: tool.clone(),
                hint: "this installer targets systemd hosts; `systemctl` must be on PATH"
                    .to_string(),
            });
        }
    }
    Ok(())
}

/// Run every preflight check in order: privilege first, then tooling.
///
/// # Errors
/// The first failing check.
pub fn validate(host: &Host<'_>, req: &Requirements) -> Result<()> {
    if req.elevated {
        check_privilege(host)?;
    }
    check_tools(host, req)
}
