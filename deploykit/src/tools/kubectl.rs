//! Kubernetes control plane backed by the `kubectl` CLI.

use super::{KubeAccess, ToolCommand};
use crate::clients::{ApplyOutcome, KubeApi, ObjectSummary};
use crate::errors::{DeployError, Result};
use crate::manifests::Manifest;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const CLUSTER_SCOPED_KINDS: [&str; 6] = [
    "nodes",
    "node",
    "namespaces",
    "namespace",
    "persistentvolumes",
    "storageclasses",
];

/// Drives `kubectl` with an explicit kubeconfig per call.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    delete_timeout_secs: u64,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            program: "kubectl".to_string(),
            delete_timeout_secs: 300,
        }
    }
}

impl Kubectl {
    /// Creates a client running `kubectl`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the program name.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets how long a namespace deletion may take.
    #[must_use]
    pub fn with_delete_timeout_secs(mut self, secs: u64) -> Self {
        self.delete_timeout_secs = secs;
        self
    }
}

/// Reduces `kubectl get -o json` output to names and statuses.
pub fn summarize_list(kind: &str, list: &Value) -> Result<Vec<ObjectSummary>> {
    let items = list
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| DeployError::kube(format!("unexpected `get {kind}` output: no items")))?;

    Ok(items
        .iter()
        .map(|item| {
            let name = item
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ObjectSummary::new(name, object_status(kind, item))
        })
        .collect())
}

fn object_status(kind: &str, item: &Value) -> String {
    match kind {
        "pods" | "pod" => item
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        "nodes" | "node" => {
            let ready = item
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conditions| {
                    conditions.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                });
            let status = if ready { "Ready" } else { "NotReady" };
            status.to_string()
        }
        _ => item
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

#[async_trait]
impl KubeApi for Kubectl {
    async fn apply(&self, access: &KubeAccess, manifest: &Manifest) -> Result<ApplyOutcome> {
        let output = ToolCommand::new(&self.program, "apply")
            .args(["apply", "-f", "-"])
            .with_stdin(manifest.to_json()?)
            .run(access.env())
            .await?;
        let outcome = ApplyOutcome::parse(output.stdout.trim());
        debug!(object = %manifest, %outcome, "applied manifest");
        Ok(outcome)
    }

    async fn get(
        &self,
        access: &KubeAccess,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<ObjectSummary>> {
        let mut command = ToolCommand::new(&self.program, "get").args(["get", kind]);
        if !CLUSTER_SCOPED_KINDS.contains(&kind) {
            command = command.args(["--namespace", namespace]);
        }
        let output = command.args(["--output", "json"]).run(access.env()).await?;
        let list: Value = serde_json::from_str(&output.stdout)?;
        summarize_list(kind, &list)
    }

    async fn delete_namespace(&self, access: &KubeAccess, namespace: &str) -> Result<bool> {
        let output = ToolCommand::new(&self.program, "delete namespace")
            .args(["delete", "namespace", namespace, "--ignore-not-found", "--wait=true"])
            .arg(format!("--timeout={}s", self.delete_timeout_secs))
            .run(access.env())
            .await?;
        Ok(output.stdout.contains("deleted"))
    }
}
