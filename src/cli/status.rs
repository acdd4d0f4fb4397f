//! Read-only inventory of the managed resources for `wmdeploy status`.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::config::{DeployConfig, DirectoryRole};
use crate::core::errors::Result;
use crate::platform::Host;
use crate::provision::binder;
use crate::provision::identity::{self, ServiceIdentity};

/// State of one managed directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryState {
    /// Directory role.
    pub role: DirectoryRole,
    /// Configured path.
    pub path: PathBuf,
    /// Whether a directory exists at `path`.
    pub present: bool,
}

/// State of the service unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitState {
    /// Unit name.
    pub name: String,
    /// Descriptor path.
    pub path: PathBuf,
    /// Whether the descriptor exists.
    pub file_present: bool,
    /// `systemctl is-active`.
    pub active: bool,
    /// `systemctl is-enabled`.
    pub enabled: bool,
}

/// State of one CLI link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkState {
    /// Link path.
    pub link: PathBuf,
    /// Whether anything exists at `link`.
    pub present: bool,
    /// Whether it is a symlink into the installation.
    pub managed: bool,
}

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    /// Service identity, if the user exists.
    pub identity: Option<ServiceIdentity>,
    /// Managed directories in provisioning order.
    pub directories: Vec<DirectoryState>,
    /// Whether the virtualenv's daemon entry point is installed.
    pub daemon_installed: bool,
    /// Service unit.
    pub unit: UnitState,
    /// CLI links.
    pub links: Vec<LinkState>,
}

impl Inventory {
    /// True when every managed resource is present.
    #[must_use]
    pub fn fully_installed(&self) -> bool {
        self.identity.is_some()
            && self.directories.iter().all(|d| d.present)
            && self.daemon_installed
            && self.unit.file_present
            && self.links.iter().all(|l| l.managed)
    }

    /// True when no managed resource is left.
    #[must_use]
    pub fn absent(&self) -> bool {
        self.identity.is_none()
            && self.directories.iter().all(|d| !d.present)
            && !self.unit.file_present
            && self.links.iter().all(|l| !l.managed)
    }
}

/// Collect the current state from the host. Mutates nothing and does not
/// need root.
///
/// # Errors
/// Account-database or init-system query failures.
pub fn collect_inventory(host: &Host<'_>, config: &DeployConfig) -> Result<Inventory> {
    let identity = identity::lookup_service_identity(host.platform, &config.service)?;
    let directories = config
        .directory_set()
        .into_iter()
        .map(|entry| DirectoryState {
            present: entry.path.is_dir(),
            role: entry.role,
            path: entry.path,
        })
        .collect();
    let unit_path = config.unit_path();
    let unit = UnitState {
        name: config.unit.name.clone(),
        file_present: unit_path.is_file(),
        path: unit_path,
        active: host.init.is_active(&config.unit.name)?,
        enabled: host.init.is_enabled(&config.unit.name)?,
    };
    let links = binder::bindings(config)
        .into_iter()
        .map(|binding| {
            let present = fs::symlink_metadata(&binding.link).is_ok();
            let managed = binder::points_into(&binding.link, &config.paths.install_dir);
            LinkState {
                link: binding.link,
                present,
                managed,
            }
        })
        .collect();
    Ok(Inventory {
        identity,
        directories,
        daemon_installed: config.daemon_executable().is_file(),
        unit,
        links,
    })
}

/// Format an inventory for terminal output.
#[must_use]
pub fn format_inventory(inv: &Inventory) -> String {
    let mut out = String::new();
    let mark = |present: bool| if present { "present" } else { "absent" };

    let _ = writeln!(out, "wmdeploy status:\n");
    match &inv.identity {
        Some(id) => {
            let _ = writeln!(
                out,
                "  Identity:  {}:{} (uid {}, gid {})",
                id.user, id.group, id.uid, id.gid
            );
        }
        None => {
            let _ = writeln!(out, "  Identity:  absent");
        }
    }
    for dir in &inv.directories {
        let _ = writeln!(
            out,
            "  {:<18} {} ({})",
            format!("{}:", dir.role.label()),
            dir.path.display(),
            mark(dir.present)
        );
    }
    let _ = writeln!(out, "  Daemon:    {}", mark(inv.daemon_installed));
    let _ = writeln!(
        out,
        "  Unit:      {} ({}, {}, {})",
        inv.unit.path.display(),
        mark(inv.unit.file_present),
        if inv.unit.active { "active" } else { "inactive" },
        if inv.unit.enabled { "enabled" } else { "disabled" }
    );
    for link in &inv.links {
        let state = match (link.present, link.managed) {
            (true, true) => "managed",
            (true, false) => "foreign",
            _ => "absent",
        };
        let _ = writeln!(out, "  Link:      {} ({state})", link.link.display());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockInitSystem, MockPlatform, MockRunner};
    use tempfile::TempDir;

    #[test]
    fn empty_host_is_absent() {
        let tmp = TempDir::new().unwrap();
        let config = DeployConfig::default().rooted_at(tmp.path());
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);

        let inv = collect_inventory(&host, &config).unwrap();
        assert!(inv.absent());
        assert!(!inv.fully_installed());
        assert!(format_inventory(&inv).contains("Identity:  absent"));
    }

    #[test]
    fn foreign_link_is_not_managed() {
        let tmp = TempDir::new().unwrap();
        let config = DeployConfig::default().rooted_at(tmp.path());
        fs::create_dir_all(&config.links.bin_dir).unwrap();
        std::os::unix::fs::symlink("/usr/bin/true", config.links.bin_dir.join("wm")).unwrap();
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        init.set_running(true, false);
        let host = Host::new(&platform, &runner, &init);

        let inv = collect_inventory(&host, &config).unwrap();
        let wm = inv.links.iter().find(|l| l.link.ends_with("wm")).unwrap();
        assert!(wm.present && !wm.managed);
        assert!(inv.absent());
        let text = format_inventory(&inv);
        assert!(text.contains("(foreign)"));
        assert!(text.contains("active, disabled"));
    }
}
