//! Global CLI links pointing at the installed executable.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::cli::report::FlowReport;
use crate::core::config::DeployConfig;
use crate::core::errors::{DeployError, Result};

/// One global link and the executable it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymlinkBinding {
    /// Link path under the global binary directory.
    pub link: PathBuf,
    /// Executable inside the managed installation.
    pub target: PathBuf,
}

/// The primary and shorthand bindings for a deployment.
#[must_use]
pub fn bindings(config: &DeployConfig) -> Vec<SymlinkBinding> {
    let target = config.cli_executable();
    [&config.links.primary, &config.links.shorthand]
        .into_iter()
        .map(|name| SymlinkBinding {
            link: config.links.bin_dir.join(name),
            target: target.clone(),
        })
        .collect()
}

/// Force-create each link, replacing any symlink or file already there.
///
/// # Errors
/// `Io` when the binary directory is not writable or a directory occupies
/// a link path.
pub fn bind_executable(bindings: &[SymlinkBinding], report: &mut FlowReport) -> Result<()> {
    for binding in bindings {
        let step = step_id("bind", &binding.link);
        if let Some(parent) = binding.link.parent() {
            fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        match fs::symlink_metadata(&binding.link) {
            Ok(meta) if meta.is_dir() => {
                return Err(DeployError::io(
                    &binding.link,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "a directory occupies the link path",
                    ),
                ));
            }
            Ok(_) => {
                fs::remove_file(&binding.link).map_err(|e| DeployError::io(&binding.link, e))?;
            }
            Err(_) => {}
        }
        std::os::unix::fs::symlink(&binding.target, &binding.link)
            .map_err(|e| DeployError::io(&binding.link, e))?;

        let description = format!(
            "Linked {} -> {}",
            binding.link.display(),
            binding.target.display()
        );
        if binding.target.exists() {
            report.done(step, description);
        } else {
            report.warned(step, format!("{description} (target does not exist yet)"));
        }
    }
    Ok(())
}

/// Remove links that are symlinks into `managed_root`. Regular files and
/// links pointing elsewhere are left alone with a warning; absence is a skip.
///
/// # Errors
/// `Io` when an owned link cannot be removed.
pub fn unbind_executable(
    bindings: &[SymlinkBinding],
    managed_root: &Path,
    report: &mut FlowReport,
) -> Result<()> {
    for binding in bindings {
        let step = step_id("unbind", &binding.link);
        let link = &binding.link;
        let meta = match fs::symlink_metadata(link) {
            Ok(meta) => meta,
            Err(_) => {
                report.skipped(step, format!("Link not found: {}", link.display()));
                continue;
            }
        };
        if !meta.is_symlink() {
            report.warned(
                step,
                format!("Left {} in place: not a symbolic link", link.display()),
            );
            continue;
        }
        let target = fs::read_link(link).map_err(|e| DeployError::io(link, e))?;
        if !resolve_target(link, &target).starts_with(managed_root) {
            report.warned(
                step,
                format!(
                    "Left {} in place: points outside the installation ({})",
                    link.display(),
                    target.display()
                ),
            );
            continue;
        }
        fs::remove_file(link).map_err(|e| DeployError::io(link, e))?;
        report.done(step, format!("Removed link {}", link.display()));
    }
    Ok(())
}

/// Whether `link` is a symlink into `managed_root`.
#[must_use]
pub fn points_into(link: &Path, managed_root: &Path) -> bool {
    fs::read_link(link).is_ok_and(|target| resolve_target(link, &target).starts_with(managed_root))
}

/// Absolute form of a link target: relative targets are taken from the
/// link's directory, then `.` and `..` are folded without touching the
/// filesystem.
fn resolve_target(link: &Path, target: &Path) -> PathBuf {
    let joined = link.parent().unwrap_or(Path::new("/")).join(target);
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved
}

fn step_id(prefix: &str, link: &Path) -> String {
    let name = link
        .file_name()
        .map_or_else(|| link.display().to_string(), |n| n.to_string_lossy().into_owned());
    format!("{prefix}:{name}")
}
