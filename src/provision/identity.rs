//! Service identity: the dedicated non-interactive system user and group.

use std::path::PathBuf;

use serde::Serialize;

use crate::core::config::ServiceConfig;
use crate::core::errors::{DeployError, Result};
use crate::platform::pal::{NewSystemUser, Platform};
use crate::provision::Owner;

/// The resolved service identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    /// User name.
    pub user: String,
    /// Primary group name.
    pub group: String,
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
    /// Login shell.
    pub shell: PathBuf,
}

impl ServiceIdentity {
    /// Numeric owner for chown.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        Owner {
            uid: self.uid,
            gid: self.gid,
        }
    }
}

/// Result of [`ensure_service_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The user or its group was created by this call.
    Created(ServiceIdentity),
    /// User and group already existed; nothing was changed.
    Existing(ServiceIdentity),
}

impl IdentityOutcome {
    /// The identity, however it was obtained.
    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Resolve an existing identity without creating anything. Both the user
/// and the configured group must exist.
///
/// # Errors
/// Propagates account-database lookup failures.
pub fn lookup_service_identity(
    platform: &dyn Platform,
    spec: &ServiceConfig,
) -> Result<Option<ServiceIdentity>> {
    let Some(user) = platform.lookup_user(&spec.user)? else {
        return Ok(None);
    };
    let Some(group) = platform.lookup_group(&spec.group)? else {
        return Ok(None);
    };
    Ok(Some(ServiceIdentity {
        user: user.name,
        group: group.name,
        uid: user.uid,
        gid: group.gid,
        home: user.home,
        shell: user.shell,
    }))
}

/// Ensure the service user and group exist. Idempotent.
///
/// The group is created first so the user can reference it. An existing
/// user is never modified; if only its configured group is missing, the
/// group is created and owns the managed paths.
///
/// # Errors
/// `Identity` when an account tool fails or the created accounts cannot be
/// read back.
pub fn ensure_service_identity(
    platform: &dyn Platform,
    spec: &ServiceConfig,
) -> Result<IdentityOutcome> {
    if let Some(existing) = lookup_service_identity(platform, spec)? {
        return Ok(IdentityOutcome::Existing(existing));
    }

    if platform.lookup_group(&spec.group)?.is_none() {
        platform.create_system_group(&spec.group)?;
    }
    if platform.lookup_user(&spec.user)?.is_none() {
        platform.create_system_user(&NewSystemUser {
            name: &spec.user,
            group: &spec.group,
            home: &spec.home,
            shell: &spec.shell,
        })?;
    } else {
        tracing::info!(user = %spec.user, group = %spec.group, "created missing group for existing user");
    }

    lookup_service_identity(platform, spec)?
        .map(IdentityOutcome::Created)
        .ok_or_else(|| DeployError::Identity {
            name: spec.user.clone(),
            details: "identity was created but cannot be looked up".to_string(),
        })
}

/// What [`remove_service_identity`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityRemoval {
    /// The user existed and was deleted.
    pub user_removed: bool,
    /// The group still existed after the user and was deleted.
    pub group_removed: bool,
}

/// Remove the service user, then its group, each only if present.
///
/// `userdel` may already drop a same-named group, so the group is looked up
/// again after the user is gone.
///
/// # Errors
/// `Identity` when an account tool fails.
pub fn remove_service_identity(
    platform: &dyn Platform,
    spec: &ServiceConfig,
) -> Result<IdentityRemoval> {
    let mut removal = IdentityRemoval::default();
    if platform.lookup_user(&spec.user)?.is_some() {
        platform.delete_user(&spec.user)?;
        removal.user_removed = true;
    }
    if platform.lookup_group(&spec.group)?.is_some() {
        platform.delete_group(&spec.group)?;
        removal.group_removed = true;
    }
    Ok(removal)
}
