//! Deployment and teardown reports.
//!
//! The deployment report is the only link between a deploy run and its
//! teardown: it carries every recorded resource id, so teardown never has to
//! guess names.

use crate::clients::{CloudResource, ImageRef};
use crate::context::{InfrastructureHandle, RunContext, REPORT_FILE};
use crate::core::StageResult;
use crate::errors::{ConfigError, DeployError, Result};
use crate::utils::{compact_timestamp, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process exit status for a deployment that succeeded cleanly.
pub const EXIT_SUCCESS: i32 = 0;
/// Aborted before any infrastructure existed.
pub const EXIT_ABORTED_CLEAN: i32 = 1;
/// Aborted with infrastructure left behind; teardown is needed.
pub const EXIT_ABORTED_PARTIAL: i32 = 2;
/// Completed with degraded or timed-out stages.
pub const EXIT_DEGRADED: i32 = 3;

/// How a deployment run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Every stage ran and the report was written.
    ReportWritten,
    /// A fatal stage failure stopped the run.
    Aborted,
}

/// The persisted record of one deployment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Run identity.
    pub context: RunContext,
    /// Stage results in execution order.
    pub stages: Vec<StageResult>,
    /// True if no stage failed.
    pub success: bool,
    /// How the run ended.
    pub terminal_state: TerminalState,
    /// The stage that aborted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_stage: Option<String>,
    /// Created resource ids.
    pub infrastructure: InfrastructureHandle,
    /// Built image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// When the run ended.
    pub completed_at: DateTime<Utc>,
}

impl DeploymentReport {
    /// Returns the process exit status for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.terminal_state {
            TerminalState::Aborted if self.infrastructure.has_resources() => EXIT_ABORTED_PARTIAL,
            TerminalState::Aborted => EXIT_ABORTED_CLEAN,
            TerminalState::ReportWritten if self.has_warnings() => EXIT_DEGRADED,
            TerminalState::ReportWritten => EXIT_SUCCESS,
        }
    }

    /// Returns true if any stage timed out or was degraded.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.stages.iter().any(|s| s.status.is_warning())
    }

    /// Returns the result recorded for `stage`.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Writes the report as pretty JSON.
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(path, &serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }

    /// Reads a report written by [`DeploymentReport::write`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound {
                path: path.to_path_buf(),
            }
            .into(),
            _ => DeployError::Io(err),
        })?;
        serde_json::from_slice(&raw).map_err(|err| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
            .into()
        })
    }

    /// Finds the most recent run's report under `output_root`.
    ///
    /// Run directories are named by compact timestamp, so the greatest name
    /// holding a report is the latest run.
    pub fn find_latest(output_root: &Path) -> Result<PathBuf> {
        let not_found = || ConfigError::NotFound {
            path: output_root.join("*").join(REPORT_FILE),
        };
        let entries = match std::fs::read_dir(output_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found().into())
            }
            Err(err) => return Err(err.into()),
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path().join(REPORT_FILE))
            .filter(|path| path.is_file())
            .collect();
        candidates.sort();
        candidates.pop().ok_or_else(|| not_found().into())
    }
}

/// Whether teardown deletes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownMode {
    /// Discover and plan only.
    DryRun,
    /// Delete the planned resources.
    Execute,
}

/// A recorded resource and whether discovery found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownTarget {
    /// The resource.
    pub resource: CloudResource,
    /// Name it was created with.
    pub name: String,
    /// Whether the resource still existed at discovery.
    pub present: bool,
}

/// The persisted record of one teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// The deployment report this teardown read.
    pub source_report: PathBuf,
    /// Run id of the deployment being torn down.
    pub deployment_run_id: uuid::Uuid,
    /// When teardown started.
    pub started_at: DateTime<Utc>,
    /// Dry run or execute.
    pub mode: TeardownMode,
    /// Workload namespace.
    pub namespace: String,
    /// Every recorded resource, in deletion order.
    pub targets: Vec<TeardownTarget>,
    /// Step results in execution order.
    pub steps: Vec<StageResult>,
    /// Resources still present after verification.
    pub remaining: Vec<CloudResource>,
    /// True if every step succeeded and nothing remains.
    pub success: bool,
}

impl TeardownReport {
    /// Returns the resources discovery found, in deletion order.
    #[must_use]
    pub fn planned(&self) -> Vec<&CloudResource> {
        self.targets
            .iter()
            .filter(|t| t.present)
            .map(|t| &t.resource)
            .collect()
    }

    /// Returns the process exit status for this teardown.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_ABORTED_CLEAN
        }
    }

    /// Returns the messages of failed steps.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.status.is_failure())
            .map(|s| format!("{}: {}", s.stage, s.message.as_deref().unwrap_or("failed")))
            .collect()
    }

    /// Writes the report to `{output_root}/teardown_report_{timestamp}.json`.
    pub async fn write(&self, output_root: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_root).await?;
        let path = output_root.join(format!(
            "teardown_report_{}.json",
            compact_timestamp(&self.started_at)
        ));
        write_atomic(&path, &serde_json::to_vec_pretty(self)?).await?;
        Ok(path)
    }
}
