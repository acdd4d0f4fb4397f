//! Resource reclamation: the ordered teardown behind `wmdeploy uninstall`.
//!
//! Order is fixed: the unit is stopped before anything is deleted, and data
//! is only deleted after a verified backup when one was requested. Every
//! step tolerates its resource being absent. The first error stops the run;
//! nothing is rolled back.

use std::path::Path;

use chrono::{DateTime, Local};

use crate::cli::report::FlowReport;
use crate::core::config::{DeployConfig, DirectoryEntry, DirectoryRole};
use crate::core::errors::Result;
use crate::platform::Host;
use crate::provision::backup::{self, BackupArchive, BackupSource};
use crate::provision::{PreservationPolicy, binder, directories, identity, registrar};

/// Directories captured by a data-preserving uninstall.
#[must_use]
pub fn backup_sources(config: &DeployConfig) -> Vec<BackupSource> {
    vec![
        BackupSource::new("data", &config.paths.data_dir),
        BackupSource::new("config", &config.paths.config_dir),
    ]
}

fn directory(config: &DeployConfig, role: DirectoryRole) -> Option<DirectoryEntry> {
    config.directory_set().into_iter().find(|d| d.role == role)
}

fn step_for(role: DirectoryRole) -> String {
    format!("remove:{}", role_key(role))
}

const fn role_key(role: DirectoryRole) -> &'static str {
    match role {
        DirectoryRole::Install => "install",
        DirectoryRole::Data => "data",
        DirectoryRole::Run => "run",
        DirectoryRole::Log => "log",
        DirectoryRole::Config => "config",
    }
}

fn remove_step(report: &mut FlowReport, entry: &DirectoryEntry) -> Result<()> {
    let step = step_for(entry.role);
    let description = format!("Remove {} {}", entry.role.label(), entry.path.display());
    let removed = report.check(&step, &description, directories::remove_directory(&entry.path))?;
    if removed {
        report.done(step, description);
    } else {
        report.skipped(
            step,
            format!("{} not found: {}", entry.role.label(), entry.path.display()),
        );
    }
    Ok(())
}

/// Tear down every managed resource in order.
///
/// Returns the verified backup when one was written.
///
/// # Errors
/// The first failing step's error; the failing step is already recorded in
/// `report`.
pub fn reclaim(
    host: &Host<'_>,
    config: &DeployConfig,
    policy: PreservationPolicy,
    now: DateTime<Local>,
    report: &mut FlowReport,
) -> Result<Option<BackupArchive>> {
    // 1. Unit: stop, disable, remove.
    let unit = registrar::unregister_unit(host, &config.unit.name, &config.unit_path(), report);
    report.check("unit", "Unregister service unit", unit)?;

    // 2. Backup before any deletion.
    let archive = if policy.preserve_data {
        let result =
            backup::backup_if_requested(policy, &backup_sources(config), &config.backup, now);
        match report.check("backup", "Back up data and configuration", result)? {
            Some(archive) => {
                report.done(
                    "backup",
                    format!(
                        "Backed up {} files ({} bytes) to {}",
                        archive.files,
                        archive.bytes,
                        archive.path.display()
                    ),
                );
                Some(archive)
            }
            None => {
                report.skipped("backup", "Nothing to back up: data and config are absent");
                None
            }
        }
    } else {
        report.skipped("backup", "Backup not requested");
        None
    };

    // 3. Directories that never survive an uninstall.
    for entry in config
        .directory_set()
        .iter()
        .filter(|d| d.role.always_removable())
    {
        remove_step(report, entry)?;
    }

    // 4. Config unless preserved.
    if let Some(entry) = directory(config, DirectoryRole::Config) {
        if policy.preserve_config {
            report.skipped(
                step_for(DirectoryRole::Config),
                format!("Preserved config directory {}", entry.path.display()),
            );
        } else {
            remove_step(report, &entry)?;
        }
    }

    // 5. Data, which is safe now: either not wanted or verified in the archive.
    if let Some(entry) = directory(config, DirectoryRole::Data) {
        remove_step(report, &entry)?;
    }

    // 6. Identity: user, then group.
    let removal = report.check(
        "identity",
        "Remove service identity",
        identity::remove_service_identity(host.platform, &config.service),
    )?;
    record_identity(report, config, removal);

    // 7. CLI links.
    let unbind = binder::unbind_executable(
        &binder::bindings(config),
        &config.paths.install_dir,
        report,
    );
    report.check("unbind", "Remove CLI links", unbind)?;

    Ok(archive)
}

fn record_identity(report: &mut FlowReport, config: &DeployConfig, removal: identity::IdentityRemoval) {
    let user = &config.service.user;
    let group = &config.service.group;
    if removal.user_removed {
        report.done("identity:user", format!("Removed system user {user}"));
    } else {
        report.skipped("identity:user", format!("System user {user} not found"));
    }
    if removal.group_removed {
        report.done("identity:group", format!("Removed system group {group}"));
    } else {
        report.skipped("identity:group", format!("System group {group} not found"));
    }
}

/// Dry-run counterpart of [`reclaim`]: inspects current state and records
/// what would happen, mutating nothing.
///
/// # Errors
/// Init-system or account lookups that fail.
pub fn plan(
    host: &Host<'_>,
    config: &DeployConfig,
    policy: PreservationPolicy,
    report: &mut FlowReport,
) -> Result<()> {
    let unit = &config.unit.name;
    if host.init.is_active(unit)? {
        report.planned("unit-stop", format!("Would stop service {unit}"));
    }
    if host.init.is_enabled(unit)? {
        report.planned("unit-disable", format!("Would disable service {unit}"));
    }
    plan_path(report, "unit-file", "unit file", &config.unit_path());

    if policy.preserve_data {
        let present: Vec<_> = backup_sources(config)
            .into_iter()
            .filter(|s| s.path.is_dir())
            .map(|s| s.label)
            .collect();
        if present.is_empty() {
            report.skipped("backup", "Nothing to back up: data and config are absent");
        } else {
            report.planned(
                "backup",
                format!(
                    "Would back up {} under {}",
                    present.join(" and "),
                    config.backup.root.display()
                ),
            );
        }
    }

    let order = [
        DirectoryRole::Install,
        DirectoryRole::Log,
        DirectoryRole::Run,
        DirectoryRole::Config,
        DirectoryRole::Data,
    ];
    for role in order {
        let Some(entry) = directory(config, role) else {
            continue;
        };
        if role == DirectoryRole::Config && policy.preserve_config {
            report.skipped(
                step_for(role),
                format!("Preserved config directory {}", entry.path.display()),
            );
            continue;
        }
        directories::check_removable(&entry.path)?;
        plan_path(report, &step_for(role), entry.role.label(), &entry.path);
    }

    if host.platform.lookup_user(&config.service.user)?.is_some() {
        report.planned(
            "identity:user",
            format!("Would remove system user {}", config.service.user),
        );
    }
    if host.platform.lookup_group(&config.service.group)?.is_some() {
        report.planned(
            "identity:group",
            format!("Would remove system group {}", config.service.group),
        );
    }

    for binding in binder::bindings(config) {
        if binder::points_into(&binding.link, &config.paths.install_dir) {
            report.planned(
                format!("unbind:{}", link_name(&binding.link)),
                format!("Would remove link {}", binding.link.display()),
            );
        }
    }
    Ok(())
}

fn plan_path(report: &mut FlowReport, step: &str, label: &str, path: &Path) {
    if std::fs::symlink_metadata(path).is_ok() {
        report.planned(step, format!("Would remove {label} {}", path.display()));
    } else {
        report.skipped(step, format!("{label} not found: {}", path.display()));
    }
}

fn link_name(link: &Path) -> String {
    link.file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::report::{Flow, StepOutcome};
    use crate::platform::mock::{MockInitSystem, MockPlatform, MockRunner};
    use std::fs;
    use tempfile::TempDir;

    fn installed(tmp: &TempDir) -> (DeployConfig, MockPlatform, MockInitSystem) {
        let config = DeployConfig::default().rooted_at(tmp.path());
        for entry in config.directory_set() {
            fs::create_dir_all(&entry.path).unwrap();
        }
        fs::write(config.paths.data_dir.join("webmonitor.db"), "rows").unwrap();
        fs::write(config.paths.config_dir.join("config.yaml"), "a: 1\n").unwrap();
        fs::create_dir_all(&config.unit.unit_dir).unwrap();
        fs::write(config.unit_path(), "[Unit]\n").unwrap();
        let platform = MockPlatform::new();
        platform.add_user(&config.service.user, &config.service.home);
        let init = MockInitSystem::new();
        init.set_running(true, true);
        (config, platform, init)
    }

    #[test]
    fn full_teardown_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);

        let archive =
            reclaim(&host, &config, PreservationPolicy::default(), Local::now(), &mut report)
                .unwrap();

        assert!(archive.is_none());
        for entry in config.directory_set() {
            assert!(!entry.path.exists(), "{}", entry.path.display());
        }
        assert!(!config.unit_path().exists());
        assert_eq!(platform.user_count(), 0);
        assert_eq!(platform.group_count(), 0);
        assert!(!init.is_running());
    }

    #[test]
    fn preserve_config_keeps_config_dir() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);
        let policy = PreservationPolicy {
            preserve_config: true,
            preserve_data: false,
        };

        reclaim(&host, &config, policy, Local::now(), &mut report).unwrap();

        assert!(config.paths.config_dir.join("config.yaml").is_file());
        assert!(!config.paths.data_dir.exists());
        assert_eq!(report.outcome_of("remove:config"), Some(StepOutcome::Skipped));
    }

    #[test]
    fn backup_precedes_data_removal() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);
        let policy = PreservationPolicy {
            preserve_config: false,
            preserve_data: true,
        };

        let archive = reclaim(&host, &config, policy, Local::now(), &mut report)
            .unwrap()
            .unwrap();

        assert_eq!(
            fs::read_to_string(archive.path.join("data/webmonitor.db")).unwrap(),
            "rows"
        );
        assert!(archive.path.join("config/config.yaml").is_file());
        assert!(!config.paths.data_dir.exists());
        assert!(report.position("backup") < report.position("remove:data"));
        assert!(report.position("unit-stop") < report.position("backup"));
    }

    #[test]
    fn second_run_is_all_skips() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);

        let mut first = FlowReport::new(Flow::Uninstall, false);
        reclaim(&host, &config, PreservationPolicy::default(), Local::now(), &mut first).unwrap();
        let mut second = FlowReport::new(Flow::Uninstall, false);
        reclaim(&host, &config, PreservationPolicy::default(), Local::now(), &mut second).unwrap();

        assert!(
            second.steps.iter().all(|s| s.outcome == StepOutcome::Skipped),
            "{:?}",
            second.step_ids()
        );
    }

    #[test]
    fn failed_unit_stop_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        init.fail("stop");
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, false);

        let err = reclaim(&host, &config, PreservationPolicy::default(), Local::now(), &mut report)
            .unwrap_err();

        assert_eq!(err.category(), "init-system");
        assert_eq!(report.outcome_of("unit"), Some(StepOutcome::Failed));
        assert!(config.paths.data_dir.is_dir());
        assert_eq!(platform.user_count(), 1);
    }

    #[test]
    fn plan_mutates_nothing() {
        let tmp = TempDir::new().unwrap();
        let (config, platform, init) = installed(&tmp);
        let runner = MockRunner::new();
        let host = Host::new(&platform, &runner, &init);
        let mut report = FlowReport::new(Flow::Uninstall, true);
        let policy = PreservationPolicy {
            preserve_config: true,
            preserve_data: true,
        };

        plan(&host, &config, policy, &mut report).unwrap();

        assert_eq!(report.outcome_of("remove:data"), Some(StepOutcome::Planned));
        assert_eq!(report.outcome_of("remove:config"), Some(StepOutcome::Skipped));
        assert_eq!(report.outcome_of("backup"), Some(StepOutcome::Planned));
        assert!(config.paths.data_dir.is_dir());
        assert!(init.is_running());
        assert!(!config.backup.root.exists());
        assert_eq!(platform.user_count(), 1);
    }
}
