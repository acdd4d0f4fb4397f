//! Structured step reports shared by the install and uninstall flows.
//!
//! Every recorded step also emits a leveled `tracing` event as it happens,
//! so an aborted run still leaves an audit trail of what completed.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::errors::DeployError;
use crate::provision::backup::BackupArchive;

/// Which flow produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Provisioning.
    Install,
    /// Deprovisioning.
    Uninstall,
}

impl Flow {
    /// Lowercase flow name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step changed the system.
    Done,
    /// Nothing to do: the resource was already in the wanted state.
    Skipped,
    /// Completed, with something the operator should look at.
    Warned,
    /// Dry-run: would have been performed.
    Planned,
    /// The step failed and the flow stopped here.
    Failed,
}

impl StepOutcome {
    /// Fixed-width tag used in human output.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Skipped => "SKIP",
            Self::Warned => "WARN",
            Self::Planned => "PLAN",
            Self::Failed => "FAIL",
        }
    }
}

/// A single step in a flow.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Stable step identifier, e.g. `identity` or `remove:data`.
    pub step: String,
    /// Human-readable description.
    pub description: String,
    /// What happened.
    pub outcome: StepOutcome,
    /// Error message if the step failed.
    pub error: Option<String>,
}

/// Machine-readable summary of the error that stopped a flow.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    /// Stable error code.
    pub code: &'static str,
    /// Coarse category.
    pub category: &'static str,
    /// Full message.
    pub message: String,
    /// Remediation text, if any.
    pub hint: Option<String>,
}

impl From<&DeployError> for FailureSummary {
    fn from(err: &DeployError) -> Self {
        Self {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            hint: err.hint().map(str::to_string),
        }
    }
}

/// Structured report from one install or uninstall run.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    /// Which flow ran.
    pub flow: Flow,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Overall success.
    pub success: bool,
    /// Ordered list of steps attempted.
    pub steps: Vec<StepRecord>,
    /// Backup written during uninstall, if any.
    pub backup: Option<BackupArchive>,
    /// The error that stopped the flow, if any.
    pub failure: Option<FailureSummary>,
}

impl FlowReport {
    /// Empty report for `flow`.
    #[must_use]
    pub fn new(flow: Flow, dry_run: bool) -> Self {
        Self {
            flow,
            dry_run,
            success: false,
            steps: Vec::new(),
            backup: None,
            failure: None,
        }
    }

    /// Record a step outcome and emit the matching status line.
    pub fn record(
        &mut self,
        step: impl Into<String>,
        outcome: StepOutcome,
        description: impl Into<String>,
    ) {
        let step = step.into();
        let description = description.into();
        match outcome {
            StepOutcome::Done => tracing::info!(%step, status = "success", "{description}"),
            StepOutcome::Skipped => tracing::info!(%step, status = "skipped", "{description}"),
            StepOutcome::Planned => tracing::info!(%step, status = "planned", "{description}"),
            StepOutcome::Warned => tracing::warn!(%step, "{description}"),
            StepOutcome::Failed => tracing::error!(%step, "{description}"),
        }
        self.steps.push(StepRecord {
            step,
            description,
            outcome,
            error: None,
        });
    }

    /// Record a performed step.
    pub fn done(&mut self, step: impl Into<String>, description: impl Into<String>) {
        self.record(step, StepOutcome::Done, description);
    }

    /// Record a step that found nothing to do.
    pub fn skipped(&mut self, step: impl Into<String>, description: impl Into<String>) {
        self.record(step, StepOutcome::Skipped, description);
    }

    /// Record a completed step that needs operator attention.
    pub fn warned(&mut self, step: impl Into<String>, description: impl Into<String>) {
        self.record(step, StepOutcome::Warned, description);
    }

    /// Record a dry-run step.
    pub fn planned(&mut self, step: impl Into<String>, description: impl Into<String>) {
        self.record(step, StepOutcome::Planned, description);
    }

    /// Record the failing step and the error that stopped the flow.
    pub fn failed(
        &mut self,
        step: impl Into<String>,
        description: impl Into<String>,
        error: &DeployError,
    ) {
        let step = step.into();
        let description = description.into();
        tracing::error!(%step, code = error.code(), "{description}: {error}");
        self.steps.push(StepRecord {
            step,
            description,
            outcome: StepOutcome::Failed,
            error: Some(error.to_string()),
        });
        self.failure = Some(FailureSummary::from(error));
        self.success = false;
    }

    /// Pass `result` through, recording a failed step when it is an error.
    ///
    /// # Errors
    /// Returns `result` unchanged.
    pub fn check<T>(
        &mut self,
        step: &str,
        description: &str,
        result: Result<T, DeployError>,
    ) -> Result<T, DeployError> {
        result.inspect_err(|err| self.failed(step, description, err))
    }

    /// Outcome of the first step named `step`.
    #[must_use]
    pub fn outcome_of(&self, step: &str) -> Option<StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| s.outcome)
    }

    /// Index of the first step named `step`.
    #[must_use]
    pub fn position(&self, step: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step == step)
    }

    /// Identifiers of all steps, in order.
    #[must_use]
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.as_str()).collect()
    }
}

/// A flow that stopped on its first error, with the report of how far it got.
#[derive(Debug, thiserror::Error)]
#[error("{} failed: {error}", .report.flow.name())]
pub struct FlowFailure {
    /// Steps completed before, and including, the failing one.
    pub report: FlowReport,
    /// The error that stopped the flow.
    #[source]
    pub error: DeployError,
}

// ---------------------------------------------------------------------------
// Human formatting
// ---------------------------------------------------------------------------

/// Format a report for terminal output.
#[must_use]
pub fn format_report(report: &FlowReport) -> String {
    let mut out = String::new();

    let mode = if report.dry_run {
        "dry-run"
    } else {
        report.flow.name()
    };
    let _ = writeln!(out, "wmdeploy {mode} report:\n");

    for step in &report.steps {
        let _ = writeln!(out, "  [{}] {}", step.outcome.tag(), step.description);
        if let Some(err) = &step.error {
            let _ = writeln!(out, "         error: {err}");
        }
    }

    if let Some(backup) = &report.backup {
        let _ = writeln!(
            out,
            "\n  Backup:  {} ({} files, {} bytes)",
            backup.path.display(),
            backup.files,
            backup.bytes
        );
    }

    if let Some(failure) = &report.failure {
        if let Some(hint) = &failure.hint {
            let _ = writeln!(out, "\n  hint: {hint}");
        }
    } else if report.success && !report.dry_run {
        let _ = writeln!(out, "\n  {} completed.", report.flow.name());
    }

    out
}
