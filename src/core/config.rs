//! Deployment configuration: service identity, managed layout, unit, links.
//!
//! Every field has a default matching the stock webmonitor layout, so an
//! empty (or absent) TOML file yields a usable configuration. Tests substitute
//! temporary paths by constructing the struct directly.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DeployError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "WMDEPLOY_CONFIG";

static ACCOUNT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("static regex"));

static LINK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"));

/// Whether `name` is acceptable as a system user or group name.
#[must_use]
pub fn is_valid_account_name(name: &str) -> bool {
    ACCOUNT_NAME.is_match(name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub service: ServiceConfig,
    pub paths: PathsConfig,
    pub unit: UnitConfig,
    pub links: LinksConfig,
    pub runtime: RuntimeConfig,
    pub artifact: ArtifactConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub user: String,
    pub group: String,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            user: "webmonitor".to_string(),
            group: "webmonitor".to_string(),
            home: PathBuf::from("/opt/webmonitor"),
            shell: PathBuf::from("/usr/sbin/nologin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Mode for install, run and log directories.
    pub public_mode: u32,
    /// Mode for data and config directories.
    pub private_mode: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("/opt/webmonitor"),
            data_dir: PathBuf::from("/var/lib/webmonitor"),
            run_dir: PathBuf::from("/var/run/webmonitor"),
            log_dir: PathBuf::from("/var/log/webmonitor"),
            config_dir: PathBuf::from("/etc/webmonitor"),
            public_mode: 0o755,
            private_mode: 0o750,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub name: String,
    pub unit_dir: PathBuf,
    pub description: String,
    pub restart: String,
    pub restart_sec: u32,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: "webmonitor".to_string(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            description: "WebMonitor - website and database monitoring daemon".to_string(),
            restart: "always".to_string(),
            restart_sec: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub bin_dir: PathBuf,
    pub primary: String,
    pub shorthand: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/usr/local/bin"),
            primary: "webmonitor".to_string(),
            shorthand: "wm".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter used to create the virtual environment.
    pub python: String,
    /// Virtual environment directory name, relative to the install directory.
    pub venv_name: String,
    /// Console script exposed to operators.
    pub cli_entry_point: String,
    /// Console script run by the service unit.
    pub daemon_entry_point: String,
    /// Init-system control tool.
    pub systemctl: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            venv_name: "venv".to_string(),
            cli_entry_point: "webmonitor".to_string(),
            daemon_entry_point: "webmonitor-daemon".to_string(),
            systemctl: "systemctl".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Application source tree; relative paths resolve against the working directory.
    pub source_dir: PathBuf,
    /// Entry names skipped while copying the tree.
    pub exclude: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            exclude: [".git", "__pycache__", ".venv", "venv", ".tox", ".pytest_cache"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub root: PathBuf,
    pub prefix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp"),
            prefix: "webmonitor_backup".to_string(),
        }
    }
}

/// Role of a managed directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryRole {
    Install,
    Data,
    Run,
    Log,
    Config,
}

impl DirectoryRole {
    /// Install, run and log directories are removed on every uninstall.
    #[must_use]
    pub const fn always_removable(self) -> bool {
        matches!(self, Self::Install | Self::Run | Self::Log)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Install => "install directory",
            Self::Data => "data directory",
            Self::Run => "run directory",
            Self::Log => "log directory",
            Self::Config => "config directory",
        }
    }
}

/// One managed directory with the mode it is provisioned with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub role: DirectoryRole,
    pub path: PathBuf,
    pub mode: u32,
}

impl DeployConfig {
    /// Load configuration from `path`, or defaults when no path is given.
    ///
    /// # Errors
    /// `MissingConfig` when an explicit file does not exist, `ConfigParse`
    /// on malformed TOML, `InvalidConfig` when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                if !path.is_file() {
                    return Err(DeployError::MissingConfig {
                        path: path.to_path_buf(),
                    });
                }
                let raw = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
                toml::from_str::<Self>(&raw)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    /// Returns `Serialization` if TOML encoding fails.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check names, paths and modes for internal consistency.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (label, name) in [
            ("service.user", &self.service.user),
            ("service.group", &self.service.group),
        ] {
            if !is_valid_account_name(name) {
                return invalid(format!("{label} {name:?} is not a valid account name"));
            }
        }
        for (label, name) in [
            ("links.primary", &self.links.primary),
            ("links.shorthand", &self.links.shorthand),
        ] {
            if !LINK_NAME.is_match(name) {
                return invalid(format!("{label} {name:?} is not a valid command name"));
            }
        }
        if self.links.primary == self.links.shorthand {
            return invalid("links.primary and links.shorthand must differ".to_string());
        }
        if self.unit.name.is_empty() || self.unit.name.contains('/') {
            return invalid(format!("unit.name {:?} is not a valid unit name", self.unit.name));
        }
        if self.runtime.venv_name.is_empty() || self.runtime.venv_name.contains('/') {
            return invalid("runtime.venv_name must be a single path component".to_string());
        }

        let directories = self.directory_set();
        let mut seen = HashSet::new();
        for entry in &directories {
            if !entry.path.is_absolute() || has_parent_component(&entry.path) {
                return invalid(format!(
                    "{} {} must be absolute and free of `..`",
                    entry.role.label(),
                    entry.path.display()
                ));
            }
            if entry.path.components().count() < 2 {
                return invalid(format!(
                    "{} must not be the filesystem root",
                    entry.role.label()
                ));
            }
            if !seen.insert(entry.path.clone()) {
                return invalid(format!(
                    "{} {} is shared with another managed directory",
                    entry.role.label(),
                    entry.path.display()
                ));
            }
            if entry.mode > 0o7777 {
                return invalid(format!("mode {:o} is out of range", entry.mode));
            }
        }
        // Deploy and removal each treat a managed directory as a whole.
        for outer in &directories {
            for inner in &directories {
                if outer.role != inner.role && inner.path.starts_with(&outer.path) {
                    return invalid(format!(
                        "{} {} is nested inside {} {}",
                        inner.role.label(),
                        inner.path.display(),
                        outer.role.label(),
                        outer.path.display()
                    ));
                }
            }
        }
        for (label, path) in [
            ("unit.unit_dir", &self.unit.unit_dir),
            ("links.bin_dir", &self.links.bin_dir),
            ("backup.root", &self.backup.root),
        ] {
            if !path.is_absolute() || has_parent_component(path) {
                return invalid(format!(
                    "{label} {} must be absolute and free of `..`",
                    path.display()
                ));
            }
        }
        // An archive inside a directory it copies would copy itself.
        if let Some(owner) = directories
            .iter()
            .find(|entry| self.backup.root.starts_with(&entry.path))
        {
            return invalid(format!(
                "backup.root {} is inside {} {}",
                self.backup.root.display(),
                owner.role.label(),
                owner.path.display()
            ));
        }
        Ok(())
    }

    /// The managed directories in provisioning order.
    #[must_use]
    pub fn directory_set(&self) -> Vec<DirectoryEntry> {
        let p = &self.paths;
        vec![
            DirectoryEntry {
                role: DirectoryRole::Install,
                path: p.install_dir.clone(),
                mode: p.public_mode,
            },
            DirectoryEntry {
                role: DirectoryRole::Data,
                path: p.data_dir.clone(),
                mode: p.private_mode,
            },
            DirectoryEntry {
                role: DirectoryRole::Run,
                path: p.run_dir.clone(),
                mode: p.public_mode,
            },
            DirectoryEntry {
                role: DirectoryRole::Log,
                path: p.log_dir.clone(),
                mode: p.public_mode,
            },
            DirectoryEntry {
                role: DirectoryRole::Config,
                path: p.config_dir.clone(),
                mode: p.private_mode,
            },
        ]
    }

    #[must_use]
    pub fn venv_dir(&self) -> PathBuf {
        self.paths.install_dir.join(&self.runtime.venv_name)
    }

    /// Executable the CLI links point at.
    #[must_use]
    pub fn cli_executable(&self) -> PathBuf {
        self.venv_dir().join("bin").join(&self.runtime.cli_entry_point)
    }

    /// Executable the service unit runs.
    #[must_use]
    pub fn daemon_executable(&self) -> PathBuf {
        self.venv_dir()
            .join("bin")
            .join(&self.runtime.daemon_entry_point)
    }

    #[must_use]
    pub fn unit_file_name(&self) -> String {
        format!("{}.service", self.unit.name)
    }

    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.unit.unit_dir.join(self.unit_file_name())
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.paths.run_dir.join("webmonitor.sock")
    }

    /// Re-root every managed path under `root`. Used to run the flows
    /// against a scratch tree.
    #[must_use]
    pub fn rooted_at(mut self, root: &Path) -> Self {
        let reroot = |path: &Path| -> PathBuf {
            root.join(path.strip_prefix("/").unwrap_or(path))
        };
        self.service.home = reroot(&self.service.home);
        self.paths.install_dir = reroot(&self.paths.install_dir);
        self.paths.data_dir = reroot(&self.paths.data_dir);
        self.paths.run_dir = reroot(&self.paths.run_dir);
        self.paths.log_dir = reroot(&self.paths.log_dir);
        self.paths.config_dir = reroot(&self.paths.config_dir);
        self.unit.unit_dir = reroot(&self.unit.unit_dir);
        self.links.bin_dir = reroot(&self.links.bin_dir);
        self.backup.root = reroot(&self.backup.root);
        self
    }
}

fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

fn invalid(details: String) -> Result<()> {
    Err(DeployError::InvalidConfig { details })
}
