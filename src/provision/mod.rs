//! Provisioning building blocks: each step is idempotent on install and a
//! no-op on absence during removal.

pub mod backup;
pub mod binder;
pub mod deployer;
pub mod directories;
pub mod identity;
pub mod preflight;
pub mod reclaimer;
pub mod registrar;
pub mod tree;

use serde::Serialize;

/// Which managed state survives an uninstall. Fixed for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreservationPolicy {
    /// Leave the configuration directory in place.
    pub preserve_config: bool,
    /// Snapshot data (and config) into a verified backup before removal.
    pub preserve_data: bool,
}

/// Numeric owner applied to managed paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Owner {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}
