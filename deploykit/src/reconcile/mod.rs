//! Manifest reconciliation against a running cluster.
//!
//! Every write is an apply: objects are created or updated in place, never
//! deleted and recreated, so running the reconciler twice converges on the
//! same cluster state.

mod pods;

pub use pods::PodReadiness;

use crate::clients::{ApplyOutcome, KubeApi};
use crate::config::{RegistryCredentials, WaitSettings};
use crate::core::DeployStage;
use crate::errors::{DeployError, Result};
use crate::manifests::{namespace_manifest, pull_secret_manifest, Manifest, ManifestSet};
use crate::polling::{CancellationToken, PollOutcome, WaitPoller};
use crate::tools::KubeAccess;
use crate::utils::write_atomic;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One applied manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedManifest {
    /// `kind/name`.
    pub reference: String,
    /// Target namespace, if namespaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// What the apply did.
    pub outcome: ApplyOutcome,
    /// Hex SHA-256 of the applied body.
    pub digest: String,
    /// Audit copy, when an audit directory is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Applies manifests and waits on workload pods in one cluster.
pub struct ManifestReconciler<'a> {
    kube: &'a dyn KubeApi,
    access: &'a KubeAccess,
    audit_dir: Option<PathBuf>,
    cancel: Option<Arc<CancellationToken>>,
}

impl<'a> ManifestReconciler<'a> {
    /// Creates a reconciler for the cluster `access` points at.
    #[must_use]
    pub fn new(kube: &'a dyn KubeApi, access: &'a KubeAccess) -> Self {
        Self {
            kube,
            access,
            audit_dir: None,
            cancel: None,
        }
    }

    /// Writes a YAML copy of every applied manifest into `dir`.
    #[must_use]
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    /// Lets `token` end the pod wait early.
    #[must_use]
    pub fn with_cancellation(mut self, token: Option<Arc<CancellationToken>>) -> Self {
        self.cancel = token;
        self
    }

    /// Creates the namespace if it does not exist.
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<ApplyOutcome> {
        let manifest = namespace_manifest(namespace)?;
        let outcome = self.kube.apply(self.access, &manifest).await?;
        info!(namespace, %outcome, "namespace ensured");
        Ok(outcome)
    }

    /// Creates or updates the image pull secret.
    ///
    /// The namespace must exist already.
    pub async fn reconcile_secret(
        &self,
        namespace: &str,
        name: &str,
        credentials: &RegistryCredentials,
    ) -> Result<ApplyOutcome> {
        let manifest = pull_secret_manifest(namespace, name, credentials)?;
        let outcome = self.kube.apply(self.access, &manifest).await?;
        info!(namespace, secret = name, server = %credentials.server, %outcome, "pull secret reconciled");
        Ok(outcome)
    }

    /// Applies `set` in phase order, stopping at the first failure.
    pub async fn apply_manifests(&self, set: &ManifestSet) -> Result<Vec<AppliedManifest>> {
        if let Some(dir) = &self.audit_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut applied = Vec::with_capacity(set.len());
        for (index, manifest) in set.ordered().into_iter().enumerate() {
            let file = self.write_audit_copy(manifest, index + 1).await?;
            let digest = manifest.digest()?;
            let outcome = self.kube.apply(self.access, manifest).await.map_err(|err| {
                warn!(manifest = %manifest, error = %err, "apply failed");
                err
            })?;
            info!(manifest = %manifest, phase = %manifest.phase(), %outcome, "applied");
            applied.push(AppliedManifest {
                reference: manifest.reference(),
                namespace: manifest.namespace().map(str::to_string),
                outcome,
                digest,
                file,
            });
        }
        Ok(applied)
    }

    async fn write_audit_copy(&self, manifest: &Manifest, index: usize) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.audit_dir else {
            return Ok(None);
        };
        let path = dir.join(manifest.file_name(index));
        write_atomic(&path, manifest.to_yaml()?.as_bytes()).await?;
        debug!(path = %path.display(), "wrote manifest copy");
        Ok(Some(path))
    }

    /// Waits until `expected` pods in `namespace` are Running.
    ///
    /// Returns the final count when at least one pod is Running; the caller
    /// decides whether a partial count is acceptable. No Running pod at the
    /// deadline is fatal.
    pub async fn wait_for_pods_running(
        &self,
        namespace: &str,
        expected: u32,
        settings: WaitSettings,
    ) -> Result<PodReadiness> {
        let poller = WaitPoller::from_settings("pods running", settings)
            .with_cancellation(self.cancel.clone());
        let outcome = poller
            .wait(|| async move {
                match self.kube.get(self.access, "pods", namespace).await {
                    Ok(pods) => {
                        let readiness = PodReadiness::from_pods(&pods, expected);
                        info!(namespace, running = readiness.running, expected, "pod readiness");
                        if readiness.is_complete() {
                            PollOutcome::Ready(readiness)
                        } else {
                            PollOutcome::Pending(Some(readiness))
                        }
                    }
                    Err(err) => PollOutcome::Failed(err),
                }
            })
            .await;

        match outcome {
            PollOutcome::Ready(readiness) => Ok(readiness),
            PollOutcome::Pending(Some(readiness)) if readiness.running > 0 => {
                warn!(
                    namespace,
                    running = readiness.running,
                    expected,
                    "not every pod reached Running before the deadline"
                );
                Ok(readiness)
            }
            PollOutcome::Pending(last) => Err(DeployError::fatal(
                DeployStage::VerifyPods.as_str(),
                format!(
                    "no pod in namespace {namespace} reached Running within {}s (pods: {})",
                    settings.deadline_secs,
                    last.map_or_else(|| "none listed".to_string(), |r| r.describe())
                ),
            )),
            PollOutcome::Failed(err) => Err(err),
        }
    }
}
