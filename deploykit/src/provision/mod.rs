//! Infrastructure provisioning.
//!
//! Creates the security group, the cluster and the node pool, records each id
//! in the [`InfrastructureHandle`] the moment its creation call returns, and
//! works around managed node pools rejecting a security group at creation:
//! the pool is created bare, awaited until Running, and only then is the
//! group attached.

mod readiness;

pub use readiness::NodeReadiness;

use crate::clients::{
    CloudApi, ClusterSpec, KubeApi, KubeconfigRequest, NodePoolSpec, NodePoolState,
};
use crate::config::{DeployConfig, FORBIDDEN_SIZES};
use crate::context::{InfrastructureHandle, NodePoolRecord, RecordedResource, RunContext};
use crate::core::DeployStage;
use crate::errors::{DeployError, Result};
use crate::polling::{CancellationToken, LockRetry, PollOutcome, WaitPoller};
use crate::tools::KubeAccess;
use crate::utils::write_atomic;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of the security-group attach step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    /// Whether the group ended up attached.
    pub attached: bool,
    /// Retries performed.
    pub retries: u32,
    /// Last error, when the attach was abandoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What provisioning resolved and how the attach went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionSummary {
    /// Instance type used for workers.
    pub instance_type_id: String,
    /// Kubernetes version of the cluster.
    pub kubernetes_version: String,
    /// Security-group attach result.
    pub attach: AttachReport,
    /// Kubeconfig written for the cluster.
    pub kubeconfig: PathBuf,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

impl ProvisionSummary {
    /// Returns true if provisioning finished with a shortfall.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.attach.attached
    }
}

/// Creates cloud resources for one run.
pub struct InfrastructureProvisioner<'a> {
    cloud: &'a dyn CloudApi,
    config: &'a DeployConfig,
    ctx: &'a RunContext,
    cancel: Option<Arc<CancellationToken>>,
}

impl<'a> InfrastructureProvisioner<'a> {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(cloud: &'a dyn CloudApi, config: &'a DeployConfig, ctx: &'a RunContext) -> Self {
        Self {
            cloud,
            config,
            ctx,
            cancel: None,
        }
    }

    /// Lets `token` end waits early.
    #[must_use]
    pub fn with_cancellation(mut self, token: Option<Arc<CancellationToken>>) -> Self {
        self.cancel = token;
        self
    }

    /// Runs every provisioning step, recording ids into `handle` as they appear.
    ///
    /// On error, every resource created so far is already in `handle`.
    pub async fn provision(&self, handle: &mut InfrastructureHandle) -> Result<ProvisionSummary> {
        let mut warnings = Vec::new();

        let (instance_type_id, type_warnings) = self.resolve_instance_type().await?;
        warnings.extend(type_warnings);
        let kubernetes_version = self.resolve_kubernetes_version().await?;

        let security_group_id = self.create_security_group(handle).await?;
        let cluster_id = self.create_cluster(handle, &kubernetes_version).await?;
        let pool_id = self.create_node_pool(handle, &cluster_id, &instance_type_id).await?;

        self.wait_for_pool_running(&cluster_id, &pool_id).await?;
        let attach = self
            .attach_security_group(handle, &cluster_id, &pool_id, &security_group_id)
            .await;
        if let Some(error) = &attach.error {
            warnings.push(format!(
                "security group {security_group_id} not attached to node pool {pool_id}: {error}"
            ));
        }

        let kubeconfig = self.fetch_kubeconfig(handle, &cluster_id).await?;

        Ok(ProvisionSummary {
            instance_type_id,
            kubernetes_version,
            attach,
            kubeconfig,
            warnings,
        })
    }

    /// Resolves the configured family and size to an instance type id.
    ///
    /// Sizes managed pools refuse are upgraded to `small`. Without an exact
    /// match the first listed type is used.
    pub async fn resolve_instance_type(&self) -> Result<(String, Vec<String>)> {
        let mut warnings = Vec::new();
        let family = self.config.nodes.family.to_ascii_lowercase();
        let mut size = self.config.nodes.size.to_ascii_lowercase();
        if FORBIDDEN_SIZES.contains(&size.as_str()) {
            let message = format!("instance size '{size}' is not supported for node pools, using 'small'");
            warn!("{message}");
            warnings.push(message);
            size = "small".to_string();
        }

        let types = self.cloud.list_instance_types(self.ctx.zone()).await?;
        let exact = types.iter().find(|t| {
            t.family.eq_ignore_ascii_case(&family) && t.size.eq_ignore_ascii_case(&size)
        });
        let chosen = match exact {
            Some(t) => t,
            None => {
                let first = types.first().ok_or_else(|| {
                    DeployError::fatal(
                        DeployStage::ProvisionInfrastructure.as_str(),
                        format!("no instance types available in {}", self.ctx.zone()),
                    )
                })?;
                let message = format!(
                    "no instance type {family}.{size}, falling back to {}.{}",
                    first.family, first.size
                );
                warn!("{message}");
                warnings.push(message);
                first
            }
        };
        info!(instance_type = %chosen.id, family = %chosen.family, size = %chosen.size, "resolved instance type");
        Ok((chosen.id.clone(), warnings))
    }

    /// Returns the pinned Kubernetes version, or the newest the provider offers.
    pub async fn resolve_kubernetes_version(&self) -> Result<String> {
        if let Some(pinned) = &self.config.cluster.kubernetes_version {
            return Ok(pinned.clone());
        }
        let versions = self.cloud.list_kubernetes_versions(self.ctx.zone()).await?;
        versions.into_iter().next().ok_or_else(|| {
            DeployError::fatal(
                DeployStage::ProvisionInfrastructure.as_str(),
                format!("no Kubernetes versions available in {}", self.ctx.zone()),
            )
        })
    }

    /// Creates the security group and records it.
    pub async fn create_security_group(&self, handle: &mut InfrastructureHandle) -> Result<String> {
        let name = &self.ctx.names().security_group;
        let description = format!(
            "{} {} ({})",
            self.ctx.project(),
            self.config.service_name,
            self.ctx.timestamp()
        );
        let id = self.cloud.create_security_group(name, &description).await?;
        handle.security_group = Some(RecordedResource::new(&id, name));
        info!(security_group_id = %id, name = %name, "created security group");
        Ok(id)
    }

    /// Creates the cluster and records it.
    pub async fn create_cluster(
        &self,
        handle: &mut InfrastructureHandle,
        kubernetes_version: &str,
    ) -> Result<String> {
        let spec = ClusterSpec {
            name: self.ctx.names().cluster.clone(),
            zone: self.ctx.zone().to_string(),
            kubernetes_version: kubernetes_version.to_string(),
            level: self.config.cluster.level.clone(),
            cni: self.config.cluster.cni.clone(),
            addons: self.config.cluster.addons.clone(),
            description: format!("{} ({})", self.ctx.project(), self.ctx.timestamp()),
        };
        let id = self.cloud.create_cluster(&spec).await?;
        handle.cluster = Some(RecordedResource::new(&id, &spec.name));
        info!(cluster_id = %id, name = %spec.name, version = %kubernetes_version, "created cluster");
        Ok(id)
    }

    /// Creates the node pool, without a security group, and records it.
    pub async fn create_node_pool(
        &self,
        handle: &mut InfrastructureHandle,
        cluster_id: &str,
        instance_type_id: &str,
    ) -> Result<String> {
        let spec = NodePoolSpec {
            name: self.ctx.names().node_pool.clone(),
            size: self.config.nodes.count,
            instance_type_id: instance_type_id.to_string(),
            disk_gb: self.config.nodes.disk_gb,
            description: format!("{} worker nodes", self.ctx.project()),
        };
        let id = self
            .cloud
            .create_node_pool(self.ctx.zone(), cluster_id, &spec)
            .await?;
        handle.node_pool = Some(NodePoolRecord {
            id: id.clone(),
            name: spec.name.clone(),
            size: spec.size,
            security_group_attached: false,
        });
        info!(cluster_id, node_pool_id = %id, size = spec.size, "created node pool");
        Ok(id)
    }

    /// Waits until the node pool reports Running.
    ///
    /// The error state and the deadline are both fatal.
    pub async fn wait_for_pool_running(&self, cluster_id: &str, pool_id: &str) -> Result<()> {
        let poller = WaitPoller::from_settings("node pool running", self.config.timeouts.pool_running)
            .with_cancellation(self.cancel.clone());
        let zone = self.ctx.zone();
        let outcome = poller
            .wait(|| async move {
                match self.cloud.node_pool_state(zone, cluster_id, pool_id).await {
                    Ok(NodePoolState::Running) => PollOutcome::Ready(NodePoolState::Running),
                    Ok(NodePoolState::Error) => PollOutcome::Failed(DeployError::fatal(
                        DeployStage::ProvisionInfrastructure.as_str(),
                        format!("node pool {pool_id} entered the error state"),
                    )),
                    Ok(state) => PollOutcome::Pending(Some(state)),
                    Err(err) => PollOutcome::Failed(err.into()),
                }
            })
            .await;
        match outcome {
            PollOutcome::Pending(last) => Err(DeployError::DeadlineExceeded {
                what: format!(
                    "node pool {pool_id} to reach running (last state: {})",
                    last.map_or_else(|| "unknown".to_string(), |s| s.to_string())
                ),
                waited_secs: poller.deadline().as_secs(),
            }),
            other => other.into_result(poller.what(), poller.deadline()).map(|_| ()),
        }
    }

    /// Attaches the security group to a Running pool.
    ///
    /// Every failure except a missing target or a name conflict is retried,
    /// since the pool may still be settling. Exhausting the retries is not
    /// fatal; the handle keeps `security_group_attached = false`.
    pub async fn attach_security_group(
        &self,
        handle: &mut InfrastructureHandle,
        cluster_id: &str,
        pool_id: &str,
        security_group_id: &str,
    ) -> AttachReport {
        let zone = self.ctx.zone();
        let outcome = LockRetry::new("attach security group", self.config.policy.attach_retry)
            .run_while(|err| !err.is_permanent(), |attempt| async move {
                info!(cluster_id, node_pool_id = pool_id, security_group_id, attempt, "attaching security group");
                self.cloud
                    .attach_security_group(zone, cluster_id, pool_id, security_group_id)
                    .await
                    .map_err(DeployError::from)
            })
            .await;

        let attached = outcome.result.is_ok();
        if let Some(pool) = handle.node_pool.as_mut() {
            pool.security_group_attached = attached;
        }
        let error = outcome.result.err().map(|err| {
            warn!(node_pool_id = pool_id, error = %err, "security group attach abandoned");
            err.to_string()
        });
        AttachReport {
            attached,
            retries: outcome.retries,
            error,
        }
    }

    /// Generates an admin kubeconfig and writes it with owner-only permissions.
    pub async fn fetch_kubeconfig(
        &self,
        handle: &mut InfrastructureHandle,
        cluster_id: &str,
    ) -> Result<PathBuf> {
        let request = KubeconfigRequest {
            user: "admin".to_string(),
            groups: vec!["system:masters".to_string()],
            ttl_secs: self.config.cluster.kubeconfig_ttl_secs,
        };
        let contents = self
            .cloud
            .generate_kubeconfig(self.ctx.zone(), cluster_id, &request)
            .await?;

        let path = self.ctx.kubeconfig_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, contents.as_bytes()).await?;
        restrict_permissions(&path).await?;
        handle.kubeconfig = Some(path.clone());
        info!(path = %path.display(), ttl_secs = request.ttl_secs, "wrote kubeconfig");
        Ok(path)
    }

    /// Polls the node list until `expected` nodes are Ready or the deadline elapses.
    ///
    /// Control-plane errors count as "not ready yet": a new cluster's API is
    /// often briefly unreachable while nodes join.
    pub async fn wait_for_nodes_ready(
        &self,
        kube: &dyn KubeApi,
        access: &KubeAccess,
        expected: u32,
    ) -> PollOutcome<NodeReadiness> {
        WaitPoller::from_settings("worker nodes ready", self.config.timeouts.nodes_ready)
            .with_cancellation(self.cancel.clone())
            .wait(|| async move {
                match kube.get(access, "nodes", "").await {
                    Ok(nodes) => {
                        let readiness = NodeReadiness::from_nodes(&nodes, expected);
                        info!(
                            registered = readiness.registered,
                            ready = readiness.ready,
                            expected,
                            "node readiness"
                        );
                        if readiness.is_complete() {
                            PollOutcome::Ready(readiness)
                        } else {
                            PollOutcome::Pending(Some(readiness))
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "listing nodes failed");
                        PollOutcome::Pending(None)
                    }
                }
            })
            .await
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod provision_tests;
