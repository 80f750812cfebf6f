//! Kubernetes manifests and their apply order.
//!
//! A [`Manifest`] is one Kubernetes object held as JSON. A [`ManifestSet`]
//! orders objects into fixed phases so dependencies exist before dependents:
//! namespaces first, then configuration, then workloads, then networking and
//! policy objects. Order within a phase is the order the source produced.

mod secret;
mod source;

pub use secret::{pull_secret_manifest, DOCKER_CONFIG_JSON_TYPE};
pub use source::{DirectoryManifestSource, ManifestSource, TemplateVars};

use crate::errors::{DeployError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Service annotation naming the network load balancer the cloud controller creates.
pub const LOAD_BALANCER_NAME_ANNOTATION: &str = "service.beta.kubernetes.io/exoscale-loadbalancer-name";

/// The phase a manifest is applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplyPhase {
    /// Namespaces.
    Namespace,
    /// Secrets, config maps, service accounts and RBAC.
    Configuration,
    /// Controllers and pods.
    Workload,
    /// Services, ingresses and policy objects.
    Networking,
}

impl ApplyPhase {
    /// Classifies a Kubernetes kind.
    #[must_use]
    pub fn of_kind(kind: &str) -> Self {
        match kind {
            "Namespace" => Self::Namespace,
            "Secret" | "ConfigMap" | "ServiceAccount" | "Role" | "RoleBinding" | "ClusterRole"
            | "ClusterRoleBinding" | "PersistentVolumeClaim" => Self::Configuration,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" | "CronJob"
            | "Pod" => Self::Workload,
            _ => Self::Networking,
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace => write!(f, "namespace"),
            Self::Configuration => write!(f, "configuration"),
            Self::Workload => write!(f, "workload"),
            Self::Networking => write!(f, "networking"),
        }
    }
}

/// One Kubernetes object.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    kind: String,
    name: String,
    namespace: Option<String>,
    body: Value,
}

impl Manifest {
    /// Wraps a parsed object, reading its kind, name and namespace.
    pub fn from_value(body: Value) -> Result<Self> {
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DeployError::kube("manifest has no kind"))?
            .to_string();
        let metadata = body.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DeployError::kube(format!("{kind} manifest has no metadata.name")))?
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            kind,
            name,
            namespace,
            body,
        })
    }

    /// Returns the object kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the object namespace, if set.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the object body.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the apply phase.
    #[must_use]
    pub fn phase(&self) -> ApplyPhase {
        ApplyPhase::of_kind(&self.kind)
    }

    /// Returns the load balancer name a `LoadBalancer` Service asks for.
    #[must_use]
    pub fn load_balancer_name(&self) -> Option<&str> {
        if self.kind != "Service" || self.body["spec"]["type"] != "LoadBalancer" {
            return None;
        }
        self.body["metadata"]["annotations"][LOAD_BALANCER_NAME_ANNOTATION]
            .as_str()
            .filter(|name| !name.is_empty())
    }

    /// Returns `kind/name`, the form kubectl prints.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind.to_ascii_lowercase(), self.name)
    }

    /// Serializes the body as JSON for the control plane.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }

    /// Renders the body as YAML for audit files.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.body)?)
    }

    /// Returns the hex SHA-256 of the JSON body.
    pub fn digest(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.to_json()?)))
    }

    /// Returns the audit file name, `NN-kind-name.yaml`.
    #[must_use]
    pub fn file_name(&self, index: usize) -> String {
        format!(
            "{index:02}-{}-{}.yaml",
            self.kind.to_ascii_lowercase(),
            self.name
        )
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} ({ns})", self.reference()),
            None => f.write_str(&self.reference()),
        }
    }
}

/// A collection of manifests applied together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    manifests: Vec<Manifest>,
}

impl ManifestSet {
    /// Creates a set from manifests in source order.
    #[must_use]
    pub fn new(manifests: Vec<Manifest>) -> Self {
        Self { manifests }
    }

    /// Appends a manifest.
    pub fn push(&mut self, manifest: Manifest) {
        self.manifests.push(manifest);
    }

    /// Returns the number of manifests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Returns the manifests in source order.
    #[must_use]
    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    /// Returns the load balancer names requested by Services, without duplicates.
    #[must_use]
    pub fn load_balancer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.manifests.iter().filter_map(Manifest::load_balancer_name) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Returns the manifests in apply order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Manifest> {
        let mut ordered: Vec<&Manifest> = self.manifests.iter().collect();
        ordered.sort_by_key(|m| m.phase());
        ordered
    }
}

impl FromIterator<Manifest> for ManifestSet {
    fn from_iter<I: IntoIterator<Item = Manifest>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Builds a bare namespace manifest.
pub fn namespace_manifest(namespace: &str) -> Result<Manifest> {
    Manifest::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": namespace,
            "labels": { "app.kubernetes.io/managed-by": "deploykit" }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(kind: &str, name: &str) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": { "name": name, "namespace": "acme" }
        }))
        .unwrap()
    }

    #[test]
    fn test_phase_classification() {
        assert_eq!(ApplyPhase::of_kind("Namespace"), ApplyPhase::Namespace);
        assert_eq!(ApplyPhase::of_kind("Secret"), ApplyPhase::Configuration);
        assert_eq!(ApplyPhase::of_kind("ServiceAccount"), ApplyPhase::Configuration);
        assert_eq!(ApplyPhase::of_kind("Deployment"), ApplyPhase::Workload);
        assert_eq!(ApplyPhase::of_kind("NetworkPolicy"), ApplyPhase::Networking);
        assert_eq!(ApplyPhase::of_kind("HorizontalPodAutoscaler"), ApplyPhase::Networking);
    }

    #[test]
    fn test_ordered_is_stable_within_phase() {
        let set: ManifestSet = [
            object("Service", "web"),
            object("Deployment", "web"),
            object("ConfigMap", "settings"),
            object("Namespace", "acme"),
            object("ResourceQuota", "quota"),
            object("Secret", "tls"),
            object("Deployment", "worker"),
        ]
        .into_iter()
        .collect();

        let order: Vec<String> = set.ordered().iter().map(|m| m.reference()).collect();
        assert_eq!(
            order,
            vec![
                "namespace/acme",
                "configmap/settings",
                "secret/tls",
                "deployment/web",
                "deployment/worker",
                "service/web",
                "resourcequota/quota",
            ]
        );
    }

    #[test]
    fn test_from_value_requires_kind_and_name() {
        assert!(Manifest::from_value(json!({"metadata": {"name": "x"}})).is_err());
        assert!(Manifest::from_value(json!({"kind": "Service", "metadata": {}})).is_err());
    }

    #[test]
    fn test_file_name_and_digest() {
        let manifest = object("Deployment", "web");
        assert_eq!(manifest.file_name(3), "03-deployment-web.yaml");

        let digest = manifest.digest().unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, object("Deployment", "web").digest().unwrap());
        assert_ne!(digest, object("Deployment", "api").digest().unwrap());
    }

    #[test]
    fn test_load_balancer_names_from_annotated_services() {
        let service = |name: &str, kind: &str, lb: &str| {
            Manifest::from_value(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": name,
                    "annotations": { LOAD_BALANCER_NAME_ANNOTATION: lb }
                },
                "spec": { "type": kind }
            }))
            .unwrap()
        };
        let set: ManifestSet = [
            service("web", "LoadBalancer", "web-nlb"),
            service("internal", "ClusterIP", "internal-nlb"),
            service("web-again", "LoadBalancer", "web-nlb"),
            service("api", "LoadBalancer", "api-nlb"),
            object("Service", "plain"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.load_balancer_names(), vec!["web-nlb", "api-nlb"]);
        assert_eq!(object("Deployment", "web").load_balancer_name(), None);
    }

    #[test]
    fn test_namespace_manifest() {
        let manifest = namespace_manifest("acme").unwrap();
        assert_eq!(manifest.phase(), ApplyPhase::Namespace);
        assert_eq!(manifest.namespace(), None);
        assert_eq!(manifest.body()["metadata"]["labels"]["app.kubernetes.io/managed-by"], "deploykit");
    }
}
