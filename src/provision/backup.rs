//! Two-phase data backup: stage a copy, then verify it against the source
//! before anything is deleted.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::config::BackupConfig;
use crate::core::errors::{DeployError, Result};
use crate::provision::PreservationPolicy;
use crate::provision::tree::{self, ManifestEntry};

/// Timestamp format of the archive directory suffix.
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Archives hold service data; keep them private to root.
const ARCHIVE_MODE: u32 = 0o700;

/// One directory captured into an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSource {
    /// Subdirectory name inside the archive (`data`, `config`).
    pub label: String,
    /// Directory that was copied.
    pub path: PathBuf,
}

impl BackupSource {
    /// Source copied into `<archive>/<label>`.
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// A staged and verified backup. Never deleted automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArchive {
    /// Archive directory.
    pub path: PathBuf,
    /// Directories captured, in order.
    pub sources: Vec<BackupSource>,
    /// Regular files captured.
    pub files: u64,
    /// Bytes captured.
    pub bytes: u64,
}

/// Archive directory name for `now`, e.g. `webmonitor_backup_20240501_101500`.
#[must_use]
pub fn archive_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{prefix}_{}", now.format(STAMP_FORMAT))
}

/// Create a fresh archive directory under `config.root`, appending `-N` when
/// a directory with the timestamped name already exists.
///
/// # Errors
/// `Io` when the backup root cannot be created or written.
pub fn claim_archive_dir(config: &BackupConfig, now: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(&config.root).map_err(|e| DeployError::io(&config.root, e))?;
    let base = archive_name(&config.prefix, now);
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let candidate = config.root.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => {
                fs::set_permissions(&candidate, fs::Permissions::from_mode(ARCHIVE_MODE))
                    .map_err(|e| DeployError::io(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(DeployError::io(&candidate, e)),
        }
    }
}

/// Phase one: copy every existing source into the archive.
///
/// # Errors
/// `Io` on copy failure.
pub fn stage(archive: &Path, sources: &[BackupSource]) -> Result<Vec<BackupSource>> {
    let mut staged = Vec::with_capacity(sources.len());
    for source in sources {
        if !source.path.is_dir() {
            tracing::debug!(path = %source.path.display(), "backup source absent");
            continue;
        }
        let stats = tree::copy_tree(&source.path, &archive.join(&source.label), &[])?;
        tracing::debug!(
            label = %source.label,
            files = stats.files,
            bytes = stats.bytes,
            "staged backup source"
        );
        staged.push(source.clone());
    }
    Ok(staged)
}

/// Phase two: compare the staged copies with their sources by file count,
/// total size and per-file SHA-256. Returns the captured totals.
///
/// # Errors
/// `BackupVerification` naming the first difference.
pub fn verify(archive: &Path, staged: &[BackupSource]) -> Result<(u64, u64)> {
    let mismatch = |details: String| DeployError::BackupVerification {
        archive: archive.to_path_buf(),
        details,
    };
    let (mut files, mut bytes) = (0u64, 0u64);
    for source in staged {
        let original = tree::manifest(&source.path)?;
        let copy_root = archive.join(&source.label);
        let copy = tree::manifest(&copy_root)?;

        let (orig_files, orig_bytes) = tree::manifest_totals(&original);
        let (copy_files, copy_bytes) = tree::manifest_totals(&copy);
        if (orig_files, orig_bytes) != (copy_files, copy_bytes) {
            return Err(mismatch(format!(
                "{}: expected {orig_files} files / {orig_bytes} bytes, staged {copy_files} files / {copy_bytes} bytes",
                source.label
            )));
        }
        for (rel, entry) in &original {
            match (entry, copy.get(rel)) {
                (expected, Some(actual)) if expected == actual => {}
                (ManifestEntry::File { .. }, Some(_)) => {
                    return Err(mismatch(format!(
                        "{}/{}: content digest differs",
                        source.label,
                        rel.display()
                    )));
                }
                (_, _) => {
                    return Err(mismatch(format!(
                        "{}/{}: missing or different in the staged copy",
                        source.label,
                        rel.display()
                    )));
                }
            }
        }
        files += orig_files;
        bytes += orig_bytes;
    }
    Ok((files, bytes))
}

/// Snapshot `sources` when the policy asks to preserve data.
///
/// Returns `None` without touching the filesystem when `preserve_data` is
/// off, or when none of the sources exist.
///
/// # Errors
/// `Io` while staging, `BackupVerification` when the staged copy does not
/// match. The partial archive is left on disk for inspection.
pub fn backup_if_requested(
    policy: PreservationPolicy,
    sources: &[BackupSource],
    config: &BackupConfig,
    now: DateTime<Local>,
) -> Result<Option<BackupArchive>> {
    if !policy.preserve_data {
        return Ok(None);
    }
    if !sources.iter().any(|s| s.path.is_dir()) {
        return Ok(None);
    }
    let path = claim_archive_dir(config, now)?;
    let staged = stage(&path, sources)?;
    let (files, bytes) = verify(&path, &staged)?;
    tracing::info!(archive = %path.display(), files, bytes, "backup verified");
    Ok(Some(BackupArchive {
        path,
        sources: staged,
        files,
        bytes,
    }))
}
