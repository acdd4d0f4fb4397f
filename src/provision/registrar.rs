//! Service registration with the init system.

use std::fs;
use std::path::Path;

use crate::cli::report::FlowReport;
use crate::core::errors::{DeployError, Result};
use crate::platform::Host;

/// Write the unit descriptor (overwriting any previous one) and reload the
/// init system. The unit is neither enabled nor started.
///
/// # Errors
/// `Io` if the descriptor cannot be written, `InitSystem` if the reload fails.
pub fn register_unit(host: &Host<'_>, descriptor: &str, unit_path: &Path) -> Result<()> {
    if let Some(parent) = unit_path.parent() {
        fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
    }
    fs::write(unit_path, descriptor).map_err(|e| DeployError::io(unit_path, e))?;
    host.init.reload()
}

/// Stop the unit if it is running. Returns whether a stop was issued.
///
/// # Errors
/// `InitSystem` if the state query or the stop command fails.
pub fn stop_if_running(host: &Host<'_>, unit: &str) -> Result<bool> {
    if host.init.is_active(unit)? {
        host.init.stop(unit)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Stop, disable and remove the unit. Each part is conditional on the
/// current state, so a partially removed or never installed unit is fine.
///
/// Sub-steps are recorded as `unit-stop`, `unit-disable`, `unit-file`.
///
/// # Errors
/// `InitSystem` on a failing stop/disable/reload, `Io` if the unit file
/// cannot be removed.
pub fn unregister_unit(
    host: &Host<'_>,
    unit: &str,
    unit_path: &Path,
    report: &mut FlowReport,
) -> Result<()> {
    if stop_if_running(host, unit)? {
        report.done("unit-stop", format!("Stopped service {unit}"));
    } else {
        report.skipped("unit-stop", format!("Service {unit} not running"));
    }

    if host.init.is_enabled(unit)? {
        host.init.disable(unit)?;
        report.done("unit-disable", format!("Disabled service {unit}"));
    } else {
        report.skipped("unit-disable", format!("Service {unit} not enabled"));
    }

    if fs::symlink_metadata(unit_path).is_ok() {
        fs::remove_file(unit_path).map_err(|e| DeployError::io(unit_path, e))?;
        host.init.reload()?;
        report.done(
            "unit-file",
            format!("Removed unit file {} and reloaded", unit_path.display()),
        );
    } else {
        report.skipped(
            "unit-file",
            format!("Unit file not found: {}", unit_path.display()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::report::{Flow, StepOutcome};
    use crate::platform::mock::{Journal, MockInitSystem, MockPlatform, MockRunner};
    use tempfile::TempDir;

    #[test]
    fn register_writes_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let unit_path = tmp.path().join("systemd/system/webmonitor.service");
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);

        register_unit(&host, "[Unit]\n", &unit_path).unwrap();
        register_unit(&host, "[Unit]\nDescription=v2\n", &unit_path).unwrap();

        assert_eq!(fs::read_to_string(&unit_path).unwrap(), "[Unit]\nDescription=v2\n");
        assert_eq!(init.reload_count(), 2);
        assert!(!init.is_running());
    }

    #[test]
    fn unregister_stops_before_removing_file() {
        let tmp = TempDir::new().unwrap();
        let unit_path = tmp.path().join("webmonitor.service");
        fs::write(&unit_path, "[Unit]\n").unwrap();
        let journal = Journal::new();
        let init = MockInitSystem::new().with_journal(journal.clone());
        init.set_running(true, true);
        let (platform, runner) = (MockPlatform::new(), MockRunner::new());
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);

        unregister_unit(&host, "webmonitor", &unit_path, &mut report).unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "systemctl stop webmonitor",
                "systemctl disable webmonitor",
                "systemctl daemon-reload *"
            ]
        );
        assert!(!unit_path.exists());
        assert_eq!(report.outcome_of("unit-file"), Some(StepOutcome::Done));
    }

    #[test]
    fn unregister_absent_unit_is_all_skips() {
        let tmp = TempDir::new().unwrap();
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);

        unregister_unit(&host, "webmonitor", &tmp.path().join("none.service"), &mut report)
            .unwrap();

        assert!(report.steps.iter().all(|s| s.outcome == StepOutcome::Skipped));
        assert_eq!(init.reload_count(), 0);
    }

    #[test]
    fn failing_stop_aborts_before_file_removal() {
        let tmp = TempDir::new().unwrap();
        let unit_path = tmp.path().join("webmonitor.service");
        fs::write(&unit_path, "[Unit]\n").unwrap();
        let init = MockInitSystem::new();
        init.set_running(true, false);
        init.fail("stop");
        let (platform, runner) = (MockPlatform::new(), MockRunner::new());
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);

        let err = unregister_unit(&host, "webmonitor", &unit_path, &mut report).unwrap_err();
        assert_eq!(err.category(), "init-system");
        assert!(unit_path.exists());
    }
}
