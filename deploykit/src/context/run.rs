//! Per-run identity.

use crate::config::DeployConfig;
use crate::utils::{compact_timestamp, time_of_day_suffix, ResourceNames};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the deployment report inside a run directory.
pub const REPORT_FILE: &str = "deployment_report.json";
/// File name of the kubeconfig inside a run directory.
pub const KUBECONFIG_FILE: &str = "kubeconfig.yaml";
/// Directory holding applied manifests inside a run directory.
pub const MANIFESTS_DIR: &str = "k8s-manifests";

/// Identity of one deployment run.
///
/// Created once when the run starts and shared by reference with every
/// stage. Resource names derive from the start time, so two runs of the same
/// project never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    timestamp: String,
    project: String,
    slug: String,
    names: ResourceNames,
    output_root: PathBuf,
    run_dir: PathBuf,
    zone: String,
    namespace: String,
}

impl RunContext {
    /// Creates the context for a run starting now.
    #[must_use]
    pub fn new(config: &DeployConfig) -> Self {
        Self::starting_at(config, Utc::now())
    }

    /// Creates the context for a run starting at `started_at`.
    #[must_use]
    pub fn starting_at(config: &DeployConfig, started_at: DateTime<Utc>) -> Self {
        let slug = config.project_slug();
        let timestamp = compact_timestamp(&started_at);
        let names = ResourceNames::derive(&slug, &time_of_day_suffix(&started_at));
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            run_dir: config.output_dir.join(&timestamp),
            output_root: config.output_dir.clone(),
            timestamp,
            project: config.project_name.clone(),
            slug,
            names,
            zone: config.zone.clone(),
            namespace: config.kubernetes.namespace.clone(),
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the start time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the compact `YYYYMMDD_HHMMSS` timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Returns the project name.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns the project slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Returns the generated resource names.
    #[must_use]
    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Returns the root of all run directories.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Returns this run's output directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Returns the zone.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Returns the workload namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns where the kubeconfig is written.
    #[must_use]
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.run_dir.join(KUBECONFIG_FILE)
    }

    /// Returns where the deployment report is written.
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.run_dir.join(REPORT_FILE)
    }

    /// Returns where applied manifests are written.
    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.run_dir.join(MANIFESTS_DIR)
    }

    /// Creates the run directory.
    pub fn create_run_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.run_dir)
    }
}
