//! Install orchestration for `wmdeploy install`.
//!
//! Coordinates the install sequence: preflight, quiescing a running service,
//! identity, directory layout, artifact deployment, the virtualenv, unit
//! registration and CLI links. Every step is idempotent, so re-running over
//! a partial or complete install converges on the same end state.

use std::path::PathBuf;

use crate::cli::report::{Flow, FlowFailure, FlowReport};
use crate::core::config::{DeployConfig, DirectoryRole};
use crate::core::errors::{DeployError, Result};
use crate::platform::Host;
use crate::platform::systemd::render_unit;
use crate::provision::directories::{self, DirectoryOutcome};
use crate::provision::identity::{self, IdentityOutcome};
use crate::provision::preflight::{self, Requirements};
use crate::provision::{binder, deployer, registrar};

// ---------------------------------------------------------------------------
// Install options
// ---------------------------------------------------------------------------

/// Options controlling the install orchestration.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Application source tree; falls back to `artifact.source_dir`.
    pub source: Option<PathBuf>,
    /// Show plan without executing.
    pub dry_run: bool,
}

/// Step identifier for a managed directory.
#[must_use]
pub const fn directory_step(role: DirectoryRole) -> &'static str {
    match role {
        DirectoryRole::Install => "dir:install",
        DirectoryRole::Data => "dir:data",
        DirectoryRole::Run => "dir:run",
        DirectoryRole::Log => "dir:log",
        DirectoryRole::Config => "dir:config",
    }
}

// ---------------------------------------------------------------------------
// Install orchestration
// ---------------------------------------------------------------------------

/// Run the install sequence.
///
/// Steps:
/// 1. Validate configuration and preflight (privilege, interpreter, venv, systemctl).
/// 2. Stop the service if it is running.
/// 3. Ensure the service identity.
/// 4. Ensure each managed directory.
/// 5. Deploy the application tree.
/// 6. Build the virtualenv and install the application into it.
/// 7. Register the service unit (not enabled or started).
/// 8. Link the CLI into the global binary directory.
///
/// # Errors
/// A [`FlowFailure`] holding the report up to and including the failing
/// step. Nothing is rolled back.
pub fn run_install_sequence(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: &InstallOptions,
) -> std::result::Result<FlowReport, FlowFailure> {
    let mut report = FlowReport::new(Flow::Install, opts.dry_run);
    let outcome = if opts.dry_run {
        plan_install(host, config, opts, &mut report)
    } else {
        execute_install(host, config, opts, &mut report)
    };
    match outcome {
        Ok(()) => {
            report.success = true;
            Ok(report)
        }
        Err(error) => Err(FlowFailure { report, error }),
    }
}

fn check_preconditions(
    host: &Host<'_>,
    config: &DeployConfig,
    dry_run: bool,
    report: &mut FlowReport,
) -> Result<()> {
    report.check("config", "Validate configuration", config.validate())?;
    match preflight::validate(host, &Requirements::for_install(config)) {
        Ok(()) => report.done("preflight", "Preflight checks passed"),
        Err(err @ DeployError::Privilege { .. }) if dry_run => {
            report.warned("preflight", format!("{err} (a real install needs root)"));
            let tools = preflight::check_tools(host, &Requirements::for_install(config));
            report.check("preflight", "Check required tools", tools)?;
        }
        Err(err) => {
            report.failed("preflight", "Preflight checks", &err);
            return Err(err);
        }
    }
    Ok(())
}

fn execute_install(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: &InstallOptions,
    report: &mut FlowReport,
) -> Result<()> {
    check_preconditions(host, config, false, report)?;

    // Quiesce a previous deployment before replacing its files.
    let unit = &config.unit.name;
    let stopped = report.check(
        "quiesce",
        "Stop running service",
        registrar::stop_if_running(host, unit),
    )?;
    if stopped {
        report.done("quiesce", format!("Stopped running service {unit}"));
    } else {
        report.skipped("quiesce", format!("Service {unit} not running"));
    }

    let outcome = report.check(
        "identity",
        "Ensure service identity",
        identity::ensure_service_identity(host.platform, &config.service),
    )?;
    let owner = outcome.identity().owner();
    match &outcome {
        IdentityOutcome::Created(id) => report.done(
            "identity",
            format!(
                "Provisioned system user {} in group {} (uid {}, gid {})",
                id.user, id.group, id.uid, id.gid
            ),
        ),
        IdentityOutcome::Existing(id) => report.skipped(
            "identity",
            format!("System user {} already exists (uid {})", id.user, id.uid),
        ),
    }

    for entry in config.directory_set() {
        let step = directory_step(entry.role);
        let description = format!("Ensure {} {}", entry.role.label(), entry.path.display());
        let result = directories::ensure_directory(host.platform, &entry.path, owner, entry.mode);
        match report.check(step, &description, result)? {
            DirectoryOutcome::Created => report.done(
                step,
                format!(
                    "Created {} {} (mode {:o})",
                    entry.role.label(),
                    entry.path.display(),
                    entry.mode
                ),
            ),
            DirectoryOutcome::Reapplied => report.skipped(
                step,
                format!(
                    "{} {} exists; mode and owner re-applied",
                    entry.role.label(),
                    entry.path.display()
                ),
            ),
        }
    }

    let source = opts
        .source
        .clone()
        .unwrap_or_else(|| config.artifact.source_dir.clone());
    let install_dir = &config.paths.install_dir;
    let stats = report.check(
        "deploy",
        "Deploy application",
        deployer::deploy_artifact(
            &source,
            install_dir,
            &config.artifact.exclude,
            &config.runtime.venv_name,
        ),
    )?;
    report.done(
        "deploy",
        format!(
            "Copied {} files ({} bytes) from {} to {}",
            stats.files,
            stats.bytes,
            source.display(),
            install_dir.display()
        ),
    );

    report.check(
        "dependencies",
        "Install dependencies",
        deployer::install_dependencies(host, &config.runtime, install_dir, owner),
    )?;
    report.done(
        "dependencies",
        format!("Installed application into {}", config.venv_dir().display()),
    );

    let unit_path = config.unit_path();
    report.check(
        "unit",
        "Register service unit",
        registrar::register_unit(host, &render_unit(config), &unit_path),
    )?;
    report.done(
        "unit",
        format!("Registered unit {} (not enabled or started)", unit_path.display()),
    );

    let bind = binder::bind_executable(&binder::bindings(config), report);
    report.check("bind", "Link CLI", bind)?;
    Ok(())
}

fn plan_install(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: &InstallOptions,
    report: &mut FlowReport,
) -> Result<()> {
    check_preconditions(host, config, true, report)?;

    let unit = &config.unit.name;
    if report.check("quiesce", "Query service state", host.init.is_active(unit))? {
        report.planned("quiesce", format!("Would stop running service {unit}"));
    } else {
        report.skipped("quiesce", format!("Service {unit} not running"));
    }

    let existing = report.check(
        "identity",
        "Look up service identity",
        identity::lookup_service_identity(host.platform, &config.service),
    )?;
    match existing {
        Some(id) => report.skipped(
            "identity",
            format!("System user {} already exists (uid {})", id.user, id.uid),
        ),
        None => report.planned(
            "identity",
            format!(
                "Would create system user {} in group {}",
                config.service.user, config.service.group
            ),
        ),
    }

    for entry in config.directory_set() {
        let verb = if entry.path.is_dir() { "re-apply" } else { "create" };
        report.planned(
            directory_step(entry.role),
            format!(
                "Would {verb} {} {} (mode {:o})",
                entry.role.label(),
                entry.path.display(),
                entry.mode
            ),
        );
    }

    let source = opts
        .source
        .clone()
        .unwrap_or_else(|| config.artifact.source_dir.clone());
    let install_dir = &config.paths.install_dir;
    let source = report.check(
        "deploy",
        "Validate application source",
        deployer::validate_artifact(&source, install_dir),
    )?;
    report.planned(
        "deploy",
        format!("Would copy {} to {}", source.display(), install_dir.display()),
    );

    for (step, spec) in deployer::dependency_commands(&config.runtime, install_dir) {
        report.planned("dependencies", format!("Would {step}: {spec}"));
    }

    report.planned(
        "unit",
        format!("Would write {} and reload systemd", config.unit_path().display()),
    );
    for binding in binder::bindings(config) {
        report.planned(
            "bind",
            format!(
                "Would link {} -> {}",
                binding.link.display(),
                binding.target.display()
            ),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::report::StepOutcome;
    use crate::platform::mock::{MockInitSystem, MockPlatform, MockRunner};
    use std::fs;
    use tempfile::TempDir;

    fn checkout(root: &std::path::Path) -> PathBuf {
        let src = root.join("checkout");
        fs::create_dir_all(src.join("webmonitor")).unwrap();
        fs::write(src.join("pyproject.toml"), "[project]\nname = \"webmonitor\"\n").unwrap();
        fs::write(src.join("webmonitor/__init__.py"), "").unwrap();
        src
    }

    #[test]
    fn dry_run_as_non_root_plans_without_mutating() {
        let tmp = TempDir::new().unwrap();
        let config = DeployConfig::default().rooted_at(tmp.path());
        let platform = MockPlatform::new().unprivileged(1000);
        let (runner, init) = (MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);
        let opts = InstallOptions {
            source: Some(checkout(tmp.path())),
            dry_run: true,
        };

        let report = run_install_sequence(&host, &config, &opts).unwrap();

        assert!(report.success);
        assert_eq!(report.outcome_of("preflight"), Some(StepOutcome::Warned));
        assert_eq!(report.outcome_of("identity"), Some(StepOutcome::Planned));
        assert!(!config.paths.install_dir.exists());
        assert_eq!(platform.user_count(), 0);
        assert_eq!(runner.command_lines(), vec!["python3 -m venv --help"]);
    }

    #[test]
    fn invalid_config_stops_before_preflight() {
        let mut config = DeployConfig::default();
        config.service.user = "Web Monitor".to_string();
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);

        let failure = run_install_sequence(&host, &config, &InstallOptions::default()).unwrap_err();
        assert_eq!(failure.error.category(), "config");
        assert_eq!(failure.report.step_ids(), vec!["config"]);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn directory_steps_are_distinct() {
        let steps: std::collections::HashSet<_> = DeployConfig::default()
            .directory_set()
            .iter()
            .map(|d| directory_step(d.role))
            .collect();
        assert_eq!(steps.len(), 5);
    }
}
