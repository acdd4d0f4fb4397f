//! Uninstall orchestration for `wmdeploy uninstall`.

use chrono::{DateTime, Local};

use crate::cli::report::{Flow, FlowFailure, FlowReport};
use crate::core::config::DeployConfig;
use crate::core::errors::{DeployError, Result};
use crate::platform::Host;
use crate::provision::preflight::{self, Requirements};
use crate::provision::{PreservationPolicy, reclaimer};

/// Options controlling the uninstall orchestration.
#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// What survives the teardown.
    pub policy: PreservationPolicy,
    /// Show plan without executing.
    pub dry_run: bool,
}

/// Run the uninstall sequence using the current local time for the backup
/// name.
///
/// # Errors
/// See [`run_uninstall_sequence_at`].
pub fn run_uninstall_sequence(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: UninstallOptions,
) -> std::result::Result<FlowReport, FlowFailure> {
    run_uninstall_sequence_at(host, config, opts, Local::now())
}

/// Run the uninstall sequence: configuration and privilege checks, then the
/// ordered teardown (unit, backup, directories, identity, links).
///
/// Uninstall does not require the Python runtime, so it works on hosts
/// where the interpreter was already removed.
///
/// # Errors
/// A [`FlowFailure`] holding the report up to and including the failing
/// step. A failed backup verification stops the run before any data is
/// deleted.
pub fn run_uninstall_sequence_at(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: UninstallOptions,
    now: DateTime<Local>,
) -> std::result::Result<FlowReport, FlowFailure> {
    let mut report = FlowReport::new(Flow::Uninstall, opts.dry_run);
    match execute_uninstall(host, config, opts, now, &mut report) {
        Ok(()) => {
            report.success = true;
            Ok(report)
        }
        Err(error) => Err(FlowFailure { report, error }),
    }
}

fn execute_uninstall(
    host: &Host<'_>,
    config: &DeployConfig,
    opts: UninstallOptions,
    now: DateTime<Local>,
    report: &mut FlowReport,
) -> Result<()> {
    report.check("config", "Validate configuration", config.validate())?;
    match preflight::validate(host, &Requirements::for_uninstall()) {
        Ok(()) => report.done("preflight", "Preflight checks passed"),
        Err(err @ DeployError::Privilege { .. }) if opts.dry_run => {
            report.warned("preflight", format!("{err} (a real uninstall needs root)"));
        }
        Err(err) => {
            report.failed("preflight", "Preflight checks", &err);
            return Err(err);
        }
    }

    if opts.dry_run {
        return reclaimer::plan(host, config, opts.policy, report)
            .inspect_err(|err| report.failed("plan", "Inspect installed state", err));
    }
    report.backup = reclaimer::reclaim(host, config, opts.policy, now, report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::report::StepOutcome;
    use crate::platform::mock::{MockInitSystem, MockPlatform, MockRunner};

    #[test]
    fn non_root_uninstall_fails_at_preflight() {
        let platform = MockPlatform::new().unprivileged(1000);
        let (runner, init) = (MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);

        let failure =
            run_uninstall_sequence(&host, &DeployConfig::default(), UninstallOptions::default())
                .unwrap_err();

        assert_eq!(failure.error.category(), "privilege");
        assert_eq!(failure.report.outcome_of("preflight"), Some(StepOutcome::Failed));
        assert_eq!(failure.report.step_ids(), vec!["preflight"]);
    }

    #[test]
    fn missing_runtime_does_not_block_uninstall() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DeployConfig::default().rooted_at(tmp.path());
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        runner.remove_tool("python3");
        runner.remove_tool("systemctl");
        let host = Host::new(&platform, &runner, &init);

        let report = run_uninstall_sequence(&host, &config, UninstallOptions::default()).unwrap();
        assert!(report.success);
    }
}
