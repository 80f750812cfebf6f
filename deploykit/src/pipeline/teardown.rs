//! Teardown of a recorded deployment.
//!
//! Targets come only from what a deployment report recorded: ids for created
//! resources, names for the load balancers its Services requested. Deletion
//! runs dependents first: the workload namespace, any load balancer still
//! holding the node pool, the node pool, the cluster, a settle pause, then the
//! security group. A failed step is recorded and the remaining steps still run.

use super::report::{DeploymentReport, TeardownMode, TeardownReport, TeardownTarget};
use crate::clients::{CloudApi, CloudResource, KubeApi};
use crate::config::Policies;
use crate::core::{StageResult, StageStatus, TeardownStep};
use crate::errors::{CloudError, DeployError, Result};
use crate::events::{EventSink, NoOpEventSink, STAGE_COMPLETED, STAGE_FAILED, STAGE_STARTED};
use crate::polling::LockRetry;
use crate::tools::{ExecEnv, KubeAccess};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// What a teardown step did when it did not fail.
#[derive(Debug)]
struct StepDone {
    status: StageStatus,
    message: Option<String>,
    retries: u32,
}

impl StepDone {
    fn success() -> Self {
        Self {
            status: StageStatus::Success,
            message: None,
            retries: 0,
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            message: Some(reason.into()),
            retries: 0,
        }
    }

    /// A failure that still carries the retries spent on it.
    fn failed(err: &DeployError, retries: u32) -> Self {
        Self {
            status: StageStatus::Failed,
            message: Some(err.to_string()),
            retries,
        }
    }
}

/// Deletes the resources a deployment report recorded.
pub struct TeardownPipeline<'a> {
    cloud: &'a dyn CloudApi,
    kube: &'a dyn KubeApi,
    policy: Policies,
    env: ExecEnv,
    events: Arc<dyn EventSink>,
}

impl<'a> TeardownPipeline<'a> {
    /// Creates a teardown pipeline.
    #[must_use]
    pub fn new(cloud: &'a dyn CloudApi, kube: &'a dyn KubeApi, policy: Policies, env: ExecEnv) -> Self {
        Self {
            cloud,
            kube,
            policy,
            env,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sends step lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Lists every recorded resource in deletion order and checks which still exist.
    ///
    /// Load balancers are matched by recorded name and come first. A resource
    /// whose existence cannot be checked is planned as present.
    pub async fn discover(&self, report: &DeploymentReport) -> Vec<TeardownTarget> {
        let handle = &report.infrastructure;
        let mut discovered = self
            .discover_load_balancers(&handle.zone, &handle.load_balancer_names)
            .await;
        let mut targets = Vec::new();
        if let (Some(cluster), Some(pool)) = (&handle.cluster, &handle.node_pool) {
            targets.push((
                CloudResource::NodePool {
                    cluster_id: cluster.id.clone(),
                    id: pool.id.clone(),
                },
                pool.name.clone(),
            ));
        }
        if let Some(cluster) = &handle.cluster {
            targets.push((CloudResource::Cluster { id: cluster.id.clone() }, cluster.name.clone()));
        }
        if let Some(sg) = &handle.security_group {
            targets.push((CloudResource::SecurityGroup { id: sg.id.clone() }, sg.name.clone()));
        }

        for (resource, name) in targets {
            let present = match self.cloud.exists(&handle.zone, &resource).await {
                Ok(present) => present,
                Err(err) => {
                    warn!(resource = %resource, error = %err, "existence check failed, assuming present");
                    true
                }
            };
            info!(resource = %resource, name = %name, present, "discovered");
            discovered.push(TeardownTarget {
                resource,
                name,
                present,
            });
        }
        discovered
    }

    async fn discover_load_balancers(&self, zone: &str, names: &[String]) -> Vec<TeardownTarget> {
        if names.is_empty() {
            return Vec::new();
        }
        let listed = match self.cloud.list_load_balancers(zone).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(error = %err, names = ?names, "could not list load balancers, they may block node pool deletion");
                return Vec::new();
            }
        };
        let targets: Vec<TeardownTarget> = listed
            .into_iter()
            .filter(|lb| names.contains(&lb.name))
            .map(|lb| {
                info!(load_balancer_id = %lb.id, name = %lb.name, "discovered load balancer");
                TeardownTarget {
                    resource: CloudResource::LoadBalancer { id: lb.id },
                    name: lb.name,
                    present: true,
                }
            })
            .collect();
        if targets.is_empty() {
            info!(names = ?names, "no recorded load balancer exists");
        }
        targets
    }

    /// Discovers targets and, unless `mode` is a dry run, deletes them.
    ///
    /// A dry run issues no delete calls.
    pub async fn run(
        &self,
        report: &DeploymentReport,
        source_report: &Path,
        mode: TeardownMode,
    ) -> TeardownReport {
        let targets = self.discover(report).await;
        self.run_with_targets(report, source_report, mode, targets).await
    }

    /// Deletes `targets`, as returned by [`Self::discover`] for `report`.
    ///
    /// Callers that already showed the plan pass it back here so existence is
    /// not checked twice.
    pub async fn run_with_targets(
        &self,
        report: &DeploymentReport,
        source_report: &Path,
        mode: TeardownMode,
        targets: Vec<TeardownTarget>,
    ) -> TeardownReport {
        let started_at = Utc::now();
        let namespace = report.context.namespace().to_string();
        info!(
            run_id = %report.context.run_id(),
            source = %source_report.display(),
            ?mode,
            "teardown started"
        );
        let mut teardown = TeardownReport {
            source_report: source_report.to_path_buf(),
            deployment_run_id: report.context.run_id(),
            started_at,
            mode,
            namespace,
            targets,
            steps: Vec::new(),
            remaining: Vec::new(),
            success: true,
        };
        if mode == TeardownMode::DryRun {
            info!(planned = teardown.planned().len(), "dry run, nothing deleted");
            return teardown;
        }

        let zone = report.infrastructure.zone.as_str();
        let present = |kind: fn(&CloudResource) -> bool| {
            teardown
                .targets
                .iter()
                .find(|t| kind(&t.resource))
                .filter(|t| t.present)
                .map(|t| t.resource.clone())
        };
        let pool = present(|r| matches!(r, CloudResource::NodePool { .. }));
        let cluster = present(|r| matches!(r, CloudResource::Cluster { .. }));
        let security_group = present(|r| matches!(r, CloudResource::SecurityGroup { .. }));
        let load_balancers: Vec<&str> = teardown
            .targets
            .iter()
            .filter(|t| t.present)
            .filter_map(|t| match &t.resource {
                CloudResource::LoadBalancer { id } => Some(id.as_str()),
                _ => None,
            })
            .collect();

        let mut steps = Vec::new();
        let workloads = self.delete_workloads(report, &teardown.namespace, cluster.is_some());
        steps.push(self.run_step(TeardownStep::DeleteWorkloads, workloads).await);
        steps.push(
            self.run_step(
                TeardownStep::DeleteLoadBalancers,
                self.delete_load_balancers(zone, &load_balancers),
            )
            .await,
        );
        steps.push(
            self.run_step(TeardownStep::DeleteNodePool, self.delete_node_pool(zone, pool.as_ref()))
                .await,
        );
        steps.push(
            self.run_step(TeardownStep::DeleteCluster, self.delete_cluster(zone, cluster.as_ref()))
                .await,
        );
        if security_group.is_some() {
            let settle = self.policy.teardown_settle();
            info!(settle_secs = settle.as_secs(), "waiting for the cluster to release the security group");
            tokio::time::sleep(settle).await;
        }
        steps.push(
            self.run_step(
                TeardownStep::DeleteSecurityGroup,
                self.delete_security_group(security_group.as_ref()),
            )
            .await,
        );

        let remaining = self.verify(zone, &teardown.targets).await;
        let verify = if remaining.is_empty() {
            Ok(StepDone::success())
        } else {
            let listed: Vec<String> = remaining.iter().map(ToString::to_string).collect();
            Err(DeployError::kube(format!("still present: {}", listed.join(", "))))
        };
        steps.push(self.run_step(TeardownStep::Verify, async { verify }).await);

        teardown.success = remaining.is_empty() && steps.iter().all(|s| !s.status.is_failure());
        teardown.steps = steps;
        teardown.remaining = remaining;
        if teardown.success {
            info!("teardown complete, nothing remains");
        } else {
            warn!(errors = ?teardown.errors(), remaining = teardown.remaining.len(), "teardown finished with errors");
        }
        teardown
    }

    async fn run_step<F>(&self, step: TeardownStep, work: F) -> StageResult
    where
        F: std::future::Future<Output = Result<StepDone>>,
    {
        let span = info_span!("teardown_step", step = step.as_str());
        async {
            let started_at = Utc::now();
            let clock = Instant::now();
            self.events
                .emit(STAGE_STARTED, Some(json!({ "stage": step.as_str() })))
                .await;
            let outcome = work.await;
            let elapsed = clock.elapsed();
            match outcome {
                Ok(done) => {
                    if done.status.is_failure() {
                        error!(retries = done.retries, error = done.message.as_deref().unwrap_or(""), "step failed");
                        self.events
                            .emit(STAGE_FAILED, Some(json!({ "stage": step.as_str(), "error": done.message })))
                            .await;
                    } else {
                        info!(status = %done.status, retries = done.retries, "step finished");
                        self.events
                            .emit(STAGE_COMPLETED, Some(json!({ "stage": step.as_str(), "status": done.status })))
                            .await;
                    }
                    let mut result = StageResult::new(step.as_str(), done.status, started_at, elapsed)
                        .with_retries(done.retries);
                    if let Some(message) = done.message {
                        result = result.with_message(message);
                    }
                    result
                }
                Err(err) => {
                    error!(error = %err, "step failed");
                    self.events
                        .emit(STAGE_FAILED, Some(json!({ "stage": step.as_str(), "error": err.to_string() })))
                        .await;
                    StageResult::new(step.as_str(), StageStatus::Failed, started_at, elapsed)
                        .with_message(err.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn delete_workloads(
        &self,
        report: &DeploymentReport,
        namespace: &str,
        cluster_present: bool,
    ) -> Result<StepDone> {
        if !cluster_present {
            return Ok(StepDone::skipped("cluster already gone"));
        }
        let Some(kubeconfig) = report.infrastructure.kubeconfig().filter(|p| p.is_file()) else {
            warn!(namespace, "no kubeconfig on disk, skipping namespace deletion");
            return Ok(StepDone::skipped("no kubeconfig recorded on disk"));
        };
        let access = KubeAccess::new(kubeconfig, self.env.clone());
        let deleted = self.kube.delete_namespace(&access, namespace).await?;
        let mut done = StepDone::success();
        if !deleted {
            done.message = Some(format!("namespace {namespace} was already absent"));
        }
        Ok(done)
    }

    /// Deletes load balancers left behind after the namespace is gone.
    ///
    /// The cloud controller usually removes them with their Service; any that
    /// remain keep the node pool locked.
    async fn delete_load_balancers(&self, zone: &str, ids: &[&str]) -> Result<StepDone> {
        if ids.is_empty() {
            return Ok(StepDone::skipped("no load balancer present"));
        }
        let mut already_gone = 0;
        for id in ids {
            info!(load_balancer_id = %id, "deleting load balancer");
            if !tolerate_not_found(self.cloud.delete_load_balancer(zone, id).await)? {
                already_gone += 1;
            }
        }
        let mut done = StepDone::success();
        if already_gone > 0 {
            done.message = Some(format!("{already_gone} of {} already deleted", ids.len()));
        }
        Ok(done)
    }

    async fn delete_node_pool(&self, zone: &str, pool: Option<&CloudResource>) -> Result<StepDone> {
        let Some(CloudResource::NodePool { cluster_id, id }) = pool else {
            return Ok(StepDone::skipped("no node pool present"));
        };
        let outcome = LockRetry::new("delete node pool", self.policy.pool_delete_retry)
            .run(|attempt| async move {
                info!(node_pool_id = %id, attempt, "deleting node pool");
                tolerate_not_found(self.cloud.delete_node_pool(zone, cluster_id, id).await)
            })
            .await;
        deletion_step(outcome.result, outcome.retries)
    }

    async fn delete_cluster(&self, zone: &str, cluster: Option<&CloudResource>) -> Result<StepDone> {
        let Some(CloudResource::Cluster { id }) = cluster else {
            return Ok(StepDone::skipped("no cluster present"));
        };
        info!(cluster_id = %id, "deleting cluster");
        deletion_step(tolerate_not_found(self.cloud.delete_cluster(zone, id).await), 0)
    }

    async fn delete_security_group(&self, security_group: Option<&CloudResource>) -> Result<StepDone> {
        let Some(CloudResource::SecurityGroup { id }) = security_group else {
            return Ok(StepDone::skipped("no security group present"));
        };
        let outcome = LockRetry::new("delete security group", self.policy.sg_delete_retry)
            .run(|attempt| async move {
                info!(security_group_id = %id, attempt, "deleting security group");
                tolerate_not_found(self.cloud.delete_security_group(id).await)
            })
            .await;
        deletion_step(outcome.result, outcome.retries)
    }

    /// Returns the recorded resources that still exist.
    async fn verify(&self, zone: &str, targets: &[TeardownTarget]) -> Vec<CloudResource> {
        let mut remaining = Vec::new();
        for target in targets {
            match self.cloud.exists(zone, &target.resource).await {
                Ok(false) => {}
                Ok(true) => {
                    warn!(resource = %target.resource, name = %target.name, "still present");
                    remaining.push(target.resource.clone());
                }
                Err(err) => {
                    warn!(resource = %target.resource, error = %err, "existence check failed, reporting as remaining");
                    remaining.push(target.resource.clone());
                }
            }
        }
        remaining
    }
}

/// Maps "already gone" to success, reporting whether anything was deleted.
fn tolerate_not_found(result: std::result::Result<(), CloudError>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn deletion_step(result: Result<bool>, retries: u32) -> Result<StepDone> {
    let deleted = match result {
        Ok(deleted) => deleted,
        Err(err) if retries > 0 => return Ok(StepDone::failed(&err, retries)),
        Err(err) => return Err(err),
    };
    let mut done = StepDone::success();
    done.retries = retries;
    if !deleted {
        done.message = Some("already deleted".to_string());
    }
    Ok(done)
}

/// Resolves the report to tear down: `explicit`, or the latest run under `output_root`.
pub fn resolve_report_path(explicit: Option<&Path>, output_root: &Path) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => DeploymentReport::find_latest(output_root),
    }
}
