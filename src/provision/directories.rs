//! Managed directory creation and removal.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};

use crate::core::errors::{DeployError, Result};
use crate::platform::pal::Platform;
use crate::provision::Owner;

/// Result of [`ensure_directory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryOutcome {
    /// The directory did not exist and was created.
    Created,
    /// The directory existed; mode and owner were re-applied.
    Reapplied,
}

/// Ensure `path` exists with `mode` and `owner`. Pre-existence is not an
/// error; ownership and mode are re-applied every time.
///
/// # Errors
/// `Io` when the directory cannot be created or its metadata changed.
pub fn ensure_directory(
    platform: &dyn Platform,
    path: &Path,
    owner: Owner,
    mode: u32,
) -> Result<DirectoryOutcome> {
    let outcome = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => DirectoryOutcome::Reapplied,
        Ok(_) => {
            return Err(DeployError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a directory",
                ),
            ));
        }
        Err(_) => {
            fs::create_dir_all(path).map_err(|e| DeployError::io(path, e))?;
            DirectoryOutcome::Created
        }
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| DeployError::io(path, e))?;
    platform.set_owner(path, owner.uid, owner.gid)?;
    Ok(outcome)
}

/// Refuse to recursively delete paths that cannot be a managed directory.
///
/// # Errors
/// `SafetyVeto` for relative paths, the root, top-level directories, and
/// paths containing `..`.
pub fn check_removable(path: &Path) -> Result<()> {
    let veto = |reason: &str| {
        Err(DeployError::SafetyVeto {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        })
    };
    if !path.is_absolute() {
        return veto("refusing to remove a relative path");
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return veto("refusing to remove a path containing `..`");
    }
    let normal = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    if normal < 2 {
        return veto("refusing to remove the filesystem root or a top-level directory");
    }
    Ok(())
}

/// Recursively remove a managed directory if it exists. Returns whether
/// anything was removed.
///
/// # Errors
/// `SafetyVeto` for paths rejected by [`check_removable`], `Io` on removal
/// failure.
pub fn remove_directory(path: &Path) -> Result<bool> {
    check_removable(path)?;
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| DeployError::io(path, e))?;
            Ok(true)
        }
        Ok(_) => {
            fs::remove_file(path).map_err(|e| DeployError::io(path, e))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DeployError::io(path, e)),
    }
}
