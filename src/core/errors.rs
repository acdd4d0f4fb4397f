//! WMD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Top-level error type for the webmonitor deployment orchestrator.
///
/// Every error is terminal for the current invocation. Recovery is the
/// operator re-running the flow.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("[WMD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WMD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WMD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WMD-1101] usage error: {details}")]
    Usage { details: String },

    #[error("[WMD-1201] elevated privileges required (effective uid {euid})")]
    Privilege { euid: u32 },

    #[error("[WMD-1202] required tool not available: {tool}")]
    DependencyMissing { tool: String, hint: String },

    #[error("[WMD-2001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WMD-2002] invalid application artifact at {path}: {details}")]
    InvalidArtifact { path: PathBuf, details: String },

    #[error("[WMD-2003] safety veto for {path}: {reason}")]
    SafetyVeto { path: PathBuf, reason: String },

    #[error("[WMD-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WMD-3001] service identity {name}: {details}")]
    Identity { name: String, details: String },

    #[error("[WMD-3101] init system `{action}` failed for {unit}: {details}")]
    InitSystem {
        action: &'static str,
        unit: String,
        details: String,
    },

    #[error("[WMD-3201] dependency installation failed during {step}: {details}")]
    DependencyInstall { step: &'static str, details: String },

    #[error("[WMD-3301] backup verification failed for {archive}: {details}")]
    BackupVerification { archive: PathBuf, details: String },

    #[error("[WMD-3900] could not run `{program}`: {details}")]
    CommandSpawn { program: String, details: String },
}

impl DeployError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WMD-1001",
            Self::MissingConfig { .. } => "WMD-1002",
            Self::ConfigParse { .. } => "WMD-1003",
            Self::Usage { .. } => "WMD-1101",
            Self::Privilege { .. } => "WMD-1201",
            Self::DependencyMissing { .. } => "WMD-1202",
            Self::Io { .. } => "WMD-2001",
            Self::InvalidArtifact { .. } => "WMD-2002",
            Self::SafetyVeto { .. } => "WMD-2003",
            Self::Serialization { .. } => "WMD-2101",
            Self::Identity { .. } => "WMD-3001",
            Self::InitSystem { .. } => "WMD-3101",
            Self::DependencyInstall { .. } => "WMD-3201",
            Self::BackupVerification { .. } => "WMD-3301",
            Self::CommandSpawn { .. } => "WMD-3900",
        }
    }

    /// Coarse failure category, as reported in JSON output.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => {
                "config"
            }
            Self::Usage { .. } => "usage",
            Self::Privilege { .. } => "privilege",
            Self::DependencyMissing { .. } => "dependency-missing",
            Self::Io { .. }
            | Self::InvalidArtifact { .. }
            | Self::SafetyVeto { .. }
            | Self::Serialization { .. } => "filesystem",
            Self::Identity { .. } => "identity",
            Self::InitSystem { .. } | Self::CommandSpawn { .. } => "init-system",
            Self::DependencyInstall { .. } => "dependency-install",
            Self::BackupVerification { .. } => "backup",
        }
    }

    /// Operator-facing remediation text, when one exists.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Privilege { .. } => Some("re-run with sudo or as root"),
            Self::DependencyMissing { hint, .. } => Some(hint.as_str()),
            Self::MissingConfig { .. } => {
                Some("pass an existing file with --config or drop the flag to use defaults")
            }
            Self::Usage { .. } => Some("run with --help to see the accepted flags"),
            Self::DependencyInstall { .. } => {
                Some("check network access to the package index, then re-run install")
            }
            Self::BackupVerification { .. } => Some(
                "nothing was deleted after the failed verification; inspect the archive and re-run",
            ),
            Self::SafetyVeto { .. } => Some("fix the managed paths in the configuration file"),
            _ => None,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DeployError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DeployError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_embedded_in_messages() {
        let err = DeployError::Privilege { euid: 1000 };
        assert!(err.to_string().starts_with("[WMD-1201]"));
        assert_eq!(err.code(), "WMD-1201");
        assert_eq!(err.category(), "privilege");
    }

    #[test]
    fn dependency_missing_carries_its_own_hint() {
        let err = DeployError::DependencyMissing {
            tool: "python3".into(),
            hint: "apt install python3".into(),
        };
        assert_eq!(err.hint(), Some("apt install python3"));
        assert_eq!(err.category(), "dependency-missing");
    }

    #[test]
    fn io_constructor_keeps_path() {
        let err = DeployError::io(
            "/var/lib/webmonitor",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/var/lib/webmonitor"));
        assert_eq!(err.category(), "filesystem");
    }
}
