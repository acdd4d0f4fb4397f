//! In-memory platform fakes for exercising the flows without root, systemd
//! or a package index. Every fake records the calls it receives.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::errors::{DeployError, Result};
use crate::platform::pal::{GroupAccount, NewSystemUser, Platform, UserAccount};
use crate::platform::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::platform::systemd::InitSystem;

/// Ordered record of mutating calls shared between fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Index of the first entry starting with `prefix`.
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }
}

// ---------------------------------------------------------------------------
// Command runner
// ---------------------------------------------------------------------------

/// Scripted [`CommandRunner`]. Commands succeed silently unless a response
/// was registered for a matching command-line prefix.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<Vec<(String, CommandOutput)>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<CommandSpec>>,
    journal: Journal,
}

impl MockRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Answer commands whose command line starts with `prefix`. Later
    /// registrations take precedence.
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) {
        self.responses.lock().push((prefix.into(), output));
    }

    /// Make `program` look absent from PATH.
    pub fn remove_tool(&self, program: impl Into<String>) {
        self.missing.lock().insert(program.into());
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Command lines of every call, in order.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(CommandSpec::command_line).collect()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        self.journal.push(format!("run {spec}"));
        if self.missing.lock().contains(&spec.program) {
            return Err(DeployError::CommandSpawn {
                program: spec.program.clone(),
                details: "No such file or directory (os error 2)".to_string(),
            });
        }
        let line = spec.command_line();
        let responses = self.responses.lock();
        let scripted = responses
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        Ok(scripted.unwrap_or_else(CommandOutput::ok))
    }

    fn is_invocable(&self, program: &str) -> bool {
        !self.missing.lock().contains(program)
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct AccountDb {
    users: BTreeMap<String, UserAccount>,
    groups: BTreeMap<String, GroupAccount>,
    next_id: u32,
}

/// In-memory account database with recorded ownership changes.
#[derive(Debug)]
pub struct MockPlatform {
    euid: u32,
    accounts: Mutex<AccountDb>,
    owners: Mutex<BTreeMap<PathBuf, (u32, u32)>>,
    userdel_removes_group: bool,
    journal: Journal,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// A root-privileged host with no service accounts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            euid: 0,
            accounts: Mutex::new(AccountDb {
                next_id: 990,
                ..AccountDb::default()
            }),
            owners: Mutex::new(BTreeMap::new()),
            userdel_removes_group: false,
            journal: Journal::new(),
        }
    }

    #[must_use]
    pub fn unprivileged(mut self, euid: u32) -> Self {
        self.euid = euid;
        self
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Emulate `USERGROUPS_ENAB`: `userdel` also drops the same-named group.
    #[must_use]
    pub fn userdel_removes_group(mut self) -> Self {
        self.userdel_removes_group = true;
        self
    }

    /// Seed an existing user and its primary group.
    pub fn add_user(&self, name: &str, home: &Path) {
        let mut db = self.accounts.lock();
        let existing = db.groups.get(name).map(|g| g.gid);
        let gid = match existing {
            Some(gid) => gid,
            None => {
                let gid = db.next_id;
                db.next_id += 1;
                db.groups.insert(
                    name.to_string(),
                    GroupAccount {
                        name: name.to_string(),
                        gid,
                    },
                );
                gid
            }
        };
        let uid = db.next_id;
        db.next_id += 1;
        db.users.insert(
            name.to_string(),
            UserAccount {
                name: name.to_string(),
                uid,
                gid,
                home: home.to_path_buf(),
                shell: PathBuf::from("/usr/sbin/nologin"),
            },
        );
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.accounts.lock().users.len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.accounts.lock().groups.len()
    }

    #[must_use]
    pub fn owner_of(&self, path: &Path) -> Option<(u32, u32)> {
        self.owners.lock().get(path).copied()
    }

    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Platform for MockPlatform {
    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn lookup_user(&self, name: &str) -> Result<Option<UserAccount>> {
        Ok(self.accounts.lock().users.get(name).cloned())
    }

    fn lookup_group(&self, name: &str) -> Result<Option<GroupAccount>> {
        Ok(self.accounts.lock().groups.get(name).cloned())
    }

    fn create_system_group(&self, name: &str) -> Result<()> {
        self.journal.push(format!("groupadd {name}"));
        let mut db = self.accounts.lock();
        if db.groups.contains_key(name) {
            return Err(DeployError::Identity {
                name: name.to_string(),
                details: "group already exists".to_string(),
            });
        }
        let gid = db.next_id;
        db.next_id += 1;
        db.groups.insert(
            name.to_string(),
            GroupAccount {
                name: name.to_string(),
                gid,
            },
        );
        Ok(())
    }

    fn create_system_user(&self, user: &NewSystemUser<'_>) -> Result<()> {
        self.journal.push(format!("useradd {}", user.name));
        let mut db = self.accounts.lock();
        if db.users.contains_key(user.name) {
            return Err(DeployError::Identity {
                name: user.name.to_string(),
                details: "user already exists".to_string(),
            });
        }
        let gid = db
            .groups
            .get(user.group)
            .map(|g| g.gid)
            .ok_or_else(|| DeployError::Identity {
                name: user.name.to_string(),
                details: format!("group {} does not exist", user.group),
            })?;
        let uid = db.next_id;
        db.next_id += 1;
        db.users.insert(
            user.name.to_string(),
            UserAccount {
                name: user.name.to_string(),
                uid,
                gid,
                home: user.home.to_path_buf(),
                shell: user.shell.to_path_buf(),
            },
        );
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.journal.push(format!("userdel {name}"));
        let mut db = self.accounts.lock();
        if db.users.remove(name).is_none() {
            return Err(DeployError::Identity {
                name: name.to_string(),
                details: "user does not exist".to_string(),
            });
        }
        if self.userdel_removes_group {
            db.groups.remove(name);
        }
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.journal.push(format!("groupdel {name}"));
        let mut db = self.accounts.lock();
        if db.users.values().any(|u| db.groups.get(name).is_some_and(|g| g.gid == u.gid)) {
            return Err(DeployError::Identity {
                name: name.to_string(),
                details: "cannot remove the primary group of an existing user".to_string(),
            });
        }
        if db.groups.remove(name).is_none() {
            return Err(DeployError::Identity {
                name: name.to_string(),
                details: "group does not exist".to_string(),
            });
        }
        Ok(())
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        if std::fs::symlink_metadata(path).is_err() {
            return Err(DeployError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        self.owners.lock().insert(path.to_path_buf(), (uid, gid));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Init system
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct UnitState {
    active: bool,
    enabled: bool,
    reloads: usize,
}

/// Init-system fake holding the active/enabled state of a single unit.
#[derive(Debug, Default)]
pub struct MockInitSystem {
    state: Mutex<UnitState>,
    failing: Mutex<HashSet<&'static str>>,
    journal: Journal,
}

impl MockInitSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Put the unit into the running, enabled state.
    pub fn set_running(&self, active: bool, enabled: bool) {
        let mut state = self.state.lock();
        state.active = active;
        state.enabled = enabled;
    }

    /// Make `action` (`stop`, `disable`, `daemon-reload`) fail.
    pub fn fail(&self, action: &'static str) {
        self.failing.lock().insert(action);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().active
    }

    #[must_use]
    pub fn reload_count(&self) -> usize {
        self.state.lock().reloads
    }

    fn check(&self, action: &'static str, unit: &str) -> Result<()> {
        self.journal.push(format!("systemctl {action} {unit}"));
        if self.failing.lock().contains(action) {
            return Err(DeployError::InitSystem {
                action,
                unit: unit.to_string(),
                details: "exit status 1: simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

impl InitSystem for MockInitSystem {
    fn is_active(&self, _unit: &str) -> Result<bool> {
        Ok(self.state.lock().active)
    }

    fn is_enabled(&self, _unit: &str) -> Result<bool> {
        Ok(self.state.lock().enabled)
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.check("stop", unit)?;
        self.state.lock().active = false;
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.check("disable", unit)?;
        self.state.lock().enabled = false;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.check("daemon-reload", "*")?;
        self.state.lock().reloads += 1;
        Ok(())
    }
}
