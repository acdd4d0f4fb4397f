//! Platform abstraction layer: privilege, account database, file ownership.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use crate::core::errors::{DeployError, Result};
use crate::platform::process::{CommandRunner, CommandSpec};

/// A user account as reported by the account database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// A group as reported by the account database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAccount {
    pub name: String,
    pub gid: u32,
}

/// Request to create a non-interactive system user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSystemUser<'a> {
    pub name: &'a str,
    pub group: &'a str,
    pub home: &'a Path,
    pub shell: &'a Path,
}

/// Privileged host operations.
///
/// Every query is answered from the live OS; implementations keep no cache.
pub trait Platform {
    fn effective_uid(&self) -> u32;

    fn lookup_user(&self, name: &str) -> Result<Option<UserAccount>>;

    fn lookup_group(&self, name: &str) -> Result<Option<GroupAccount>>;

    fn create_system_group(&self, name: &str) -> Result<()>;

    fn create_system_user(&self, user: &NewSystemUser<'_>) -> Result<()>;

    fn delete_user(&self, name: &str) -> Result<()>;

    fn delete_group(&self, name: &str) -> Result<()>;

    /// Change ownership of `path` without following a final symlink.
    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;
}

/// Linux implementation: account lookups through `nix`, mutations through
/// the shadow-utils commands.
pub struct LinuxPlatform<'r> {
    runner: &'r dyn CommandRunner,
}

impl<'r> LinuxPlatform<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn run_account_tool(&self, name: &str, spec: CommandSpec) -> Result<()> {
        let output = self.runner.run(&spec)?;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::Identity {
                name: name.to_string(),
                details: format!("`{spec}` failed with {}", output.diagnostic()),
            })
        }
    }
}

impl Platform for LinuxPlatform<'_> {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn lookup_user(&self, name: &str) -> Result<Option<UserAccount>> {
        let user = nix::unistd::User::from_name(name).map_err(|e| DeployError::Identity {
            name: name.to_string(),
            details: format!("user lookup failed: {e}"),
        })?;
        Ok(user.map(|u| UserAccount {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
            home: u.dir,
            shell: u.shell,
        }))
    }

    fn lookup_group(&self, name: &str) -> Result<Option<GroupAccount>> {
        let group = nix::unistd::Group::from_name(name).map_err(|e| DeployError::Identity {
            name: name.to_string(),
            details: format!("group lookup failed: {e}"),
        })?;
        Ok(group.map(|g| GroupAccount {
            name: g.name,
            gid: g.gid.as_raw(),
        }))
    }

    fn create_system_group(&self, name: &str) -> Result<()> {
        self.run_account_tool(name, CommandSpec::new("groupadd", ["--system", name]))
    }

    fn create_system_user(&self, user: &NewSystemUser<'_>) -> Result<()> {
        let home = user.home.display().to_string();
        let shell = user.shell.display().to_string();
        self.run_account_tool(
            user.name,
            CommandSpec::new(
                "useradd",
                [
                    "--system",
                    "--gid",
                    user.group,
                    "--home-dir",
                    home.as_str(),
                    "--no-create-home",
                    "--shell",
                    shell.as_str(),
                    user.name,
                ],
            ),
        )
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.run_account_tool(name, CommandSpec::new("userdel", [name]))
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.run_account_tool(name, CommandSpec::new("groupdel", [name]))
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid)).map_err(|e| DeployError::io(path, e))
    }
}
