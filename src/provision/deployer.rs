//! Application deployment: artifact copy and the isolated virtualenv.

use std::path::{Path, PathBuf};

use crate::core::config::RuntimeConfig;
use crate::core::errors::{DeployError, Result};
use crate::platform::Host;
use crate::platform::process::CommandSpec;
use crate::provision::Owner;
use crate::provision::tree::{self, CopyStats};

/// Files that mark a directory as an installable Python package root.
const PACKAGE_MARKERS: [&str; 2] = ["setup.py", "pyproject.toml"];

/// Dependency list installed before the package itself, when shipped.
const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Check that `source` is a package root that can be copied into `dest`.
///
/// # Errors
/// `InvalidArtifact` when the source is missing, has no package marker, or
/// overlaps the destination.
pub fn validate_artifact(source: &Path, dest: &Path) -> Result<PathBuf> {
    let invalid = |details: &str| DeployError::InvalidArtifact {
        path: source.to_path_buf(),
        details: details.to_string(),
    };
    let source = source
        .canonicalize()
        .map_err(|_| invalid("source directory does not exist or is unreadable"))?;
    if !source.is_dir() {
        return Err(invalid("source is not a directory"));
    }
    if !PACKAGE_MARKERS.iter().any(|m| source.join(m).is_file()) {
        return Err(invalid("no setup.py or pyproject.toml found"));
    }
    let dest = dest.canonicalize().unwrap_or_else(|_| dest.to_path_buf());
    if source.starts_with(&dest) || dest.starts_with(&source) {
        return Err(invalid("source and install directory overlap"));
    }
    Ok(source)
}

/// Copy the application at `source` over `dest`.
///
/// Files shipped by the artifact overwrite their previous copies. Only the
/// old virtualenv is removed; anything else under `dest` (state the daemon
/// wrote relative to its working directory included) is left in place.
///
/// # Errors
/// `InvalidArtifact` from [`validate_artifact`], `Io` on copy failure.
pub fn deploy_artifact(
    source: &Path,
    dest: &Path,
    exclude: &[String],
    venv_name: &str,
) -> Result<CopyStats> {
    let source = validate_artifact(source, dest)?;
    let venv = dest.join(venv_name);
    if tree::remove_path(&venv)? {
        tracing::debug!(path = %venv.display(), "removed previous virtualenv");
    }
    tree::copy_tree(&source, dest, exclude)
}

/// The commands [`install_dependencies`] runs, in order.
#[must_use]
pub fn dependency_commands(runtime: &RuntimeConfig, install_dir: &Path) -> Vec<(&'static str, CommandSpec)> {
    let venv = install_dir.join(&runtime.venv_name);
    let pip = venv.join("bin").join("pip").display().to_string();
    let mut commands = vec![
        (
            "create virtualenv",
            CommandSpec::new(
                &runtime.python,
                ["-m".to_string(), "venv".to_string(), venv.display().to_string()],
            ),
        ),
        (
            "upgrade pip",
            CommandSpec::new(&pip, ["install", "--upgrade", "pip"]),
        ),
    ];
    let requirements = install_dir.join(REQUIREMENTS_FILE);
    if requirements.is_file() {
        commands.push((
            "install requirements",
            CommandSpec::new(
                &pip,
                ["install".to_string(), "-r".to_string(), requirements.display().to_string()],
            ),
        ));
    }
    commands.push((
        "install application",
        CommandSpec::new(&pip, ["install".to_string(), install_dir.display().to_string()]),
    ));
    commands
}

/// Create the virtualenv, install the application and its dependencies into
/// it, then hand the whole install tree to the service identity.
///
/// Not retried: a failure leaves the partial environment for inspection.
///
/// # Errors
/// `DependencyInstall` carrying the failing command's output tail, `Io` if
/// ownership cannot be applied.
pub fn install_dependencies(
    host: &Host<'_>,
    runtime: &RuntimeConfig,
    install_dir: &Path,
    owner: Owner,
) -> Result<()> {
    for (step, spec) in dependency_commands(runtime, install_dir) {
        let output = host
            .runner
            .run(&spec)
            .map_err(|e| DeployError::DependencyInstall {
                step,
                details: e.to_string(),
            })?;
        if !output.success() {
            return Err(DeployError::DependencyInstall {
                step,
                details: format!("`{spec}` failed with {}", output.diagnostic()),
            });
        }
        tracing::debug!(step, command = %spec, "dependency step finished");
    }
    tree::chown_tree(host.platform, install_dir, owner)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockInitSystem, MockPlatform, MockRunner};
    use crate::platform::process::CommandOutput;
    use std::fs;
    use tempfile::TempDir;

    fn artifact(root: &Path, with_requirements: bool) {
        fs::create_dir_all(root.join("src/webmonitor")).unwrap();
        fs::write(root.join("setup.py"), "setup(name='webmonitor')\n").unwrap();
        fs::write(root.join("src/webmonitor/__init__.py"), "").unwrap();
        if with_requirements {
            fs::write(root.join("requirements.txt"), "click\npyyaml\n").unwrap();
        }
    }

    #[test]
    fn deploy_overwrites_code_and_drops_old_venv() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("checkout");
        let dest = tmp.path().join("opt/webmonitor");
        artifact(&src, false);
        fs::create_dir_all(dest.join("venv/bin")).unwrap();
        fs::write(dest.join("setup.py"), "old").unwrap();

        let stats = deploy_artifact(&src, &dest, &[], "venv").unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(
            fs::read_to_string(dest.join("setup.py")).unwrap(),
            "setup(name='webmonitor')\n"
        );
        assert!(!dest.join("venv").exists());
    }

    #[test]
    fn deploy_keeps_state_written_under_the_install_dir() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("checkout");
        let dest = tmp.path().join("opt/webmonitor");
        artifact(&src, false);
        fs::create_dir_all(dest.join("data")).unwrap();
        fs::write(dest.join("data/webmonitor.db"), "rows").unwrap();

        deploy_artifact(&src, &dest, &[], "venv").unwrap();
        assert_eq!(fs::read_to_string(dest.join("data/webmonitor.db")).unwrap(), "rows");
    }

    #[test]
    fn source_without_package_marker_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("empty");
        fs::create_dir_all(&src).unwrap();
        let err = deploy_artifact(&src, &tmp.path().join("dest"), &[], "venv").unwrap_err();
        assert_eq!(err.code(), "WMD-2002");
    }

    #[test]
    fn source_inside_destination_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("opt/webmonitor");
        let src = dest.join("checkout");
        artifact(&src, false);
        let err = deploy_artifact(&src, &dest, &[], "venv").unwrap_err();
        assert!(err.to_string().contains("overlap"));
        assert!(src.join("setup.py").is_file());
    }

    #[test]
    fn requirements_file_adds_an_install_step() {
        let tmp = TempDir::new().unwrap();
        artifact(tmp.path(), true);
        let steps: Vec<_> = dependency_commands(&RuntimeConfig::default(), tmp.path())
            .into_iter()
            .map(|(step, _)| step)
            .collect();
        assert_eq!(
            steps,
            vec![
                "create virtualenv",
                "upgrade pip",
                "install requirements",
                "install application"
            ]
        );
    }

    #[test]
    fn dependencies_run_in_order_and_chown_tree() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("opt/webmonitor");
        artifact(&dir, false);
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let host = Host::new(&platform, &runner, &init);

        install_dependencies(&host, &RuntimeConfig::default(), &dir, Owner { uid: 7, gid: 8 })
            .unwrap();

        let venv = dir.join("venv");
        let pip = venv.join("bin/pip");
        assert_eq!(
            runner.command_lines(),
            vec![
                format!("python3 -m venv {}", venv.display()),
                format!("{} install --upgrade pip", pip.display()),
                format!("{} install {}", pip.display(), dir.display()),
            ]
        );
        assert_eq!(platform.owner_of(&dir.join("setup.py")), Some((7, 8)));
    }

    #[test]
    fn failing_pip_stops_and_reports_step() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("opt/webmonitor");
        artifact(&dir, false);
        let (platform, runner, init) = (MockPlatform::new(), MockRunner::new(), MockInitSystem::new());
        let pip = dir.join("venv/bin/pip").display().to_string();
        runner.respond(
            format!("{pip} install --upgrade"),
            CommandOutput::failed(1, "Could not fetch URL https://pypi.org/simple/pip/"),
        );
        let host = Host::new(&platform, &runner, &init);

        let err = install_dependencies(&host, &RuntimeConfig::default(), &dir, Owner { uid: 7, gid: 8 })
            .unwrap_err();
        assert!(matches!(err, DeployError::DependencyInstall { step: "upgrade pip", .. }));
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(platform.owner_of(&dir), None);
    }
}
