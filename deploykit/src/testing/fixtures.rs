//! Sample configuration, credentials and manifests.

use crate::config::{
    BuildSettings, ClusterSettings, Credentials, DeployConfig, KubernetesSettings, NodeSettings,
    Policies, RegistrySettings, Timeouts, DEFAULT_SEARCH_PATH,
};
use crate::errors::Result;
use crate::manifests::{
    Manifest, ManifestSet, ManifestSource, TemplateVars, LOAD_BALANCER_NAME_ANNOTATION,
};
use serde_json::json;
use std::path::Path;

/// A valid configuration writing its outputs under `output_dir`.
///
/// Two `standard.medium` workers, two replicas in namespace `acme`.
#[must_use]
pub fn sample_config(output_dir: &Path) -> DeployConfig {
    DeployConfig {
        project_name: "Acme Web".to_string(),
        service_name: "web".to_string(),
        service_version: "1.2.0".to_string(),
        registry: RegistrySettings {
            server: "docker.io".to_string(),
            user: "acme".to_string(),
            secret_name: "registry-creds".to_string(),
            email: "ops@acme.dev".to_string(),
        },
        zone: "ch-gva-2".to_string(),
        nodes: NodeSettings {
            count: 2,
            disk_gb: 50,
            family: "standard".to_string(),
            size: "medium".to_string(),
        },
        cluster: ClusterSettings::default(),
        build: BuildSettings::default(),
        kubernetes: KubernetesSettings {
            namespace: "acme".to_string(),
            replicas: 2,
            manifests_dir: output_dir.join("manifests"),
        },
        output_dir: output_dir.to_path_buf(),
        search_path: DEFAULT_SEARCH_PATH.to_string(),
        timeouts: Timeouts::default(),
        policy: Policies::default(),
    }
}

/// Credentials with placeholder secrets.
#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn sample_credentials() -> Credentials {
    let lookup = |name: &str| Some(format!("test-{}", name.to_ascii_lowercase()));
    match Credentials::from_lookup(lookup) {
        Ok(credentials) => credentials,
        Err(err) => unreachable!("lookup supplies every variable: {err}"),
    }
}

/// A manifest source returning a fixed set regardless of the template values.
#[derive(Debug, Clone, Default)]
pub struct StaticManifestSource {
    set: ManifestSet,
}

impl StaticManifestSource {
    /// Creates a source returning `set`.
    #[must_use]
    pub fn new(set: ManifestSet) -> Self {
        Self { set }
    }
}

impl ManifestSource for StaticManifestSource {
    fn load(&self, _vars: &TemplateVars) -> Result<ManifestSet> {
        Ok(self.set.clone())
    }
}

/// Namespace, Deployment and Service for the sample configuration,
/// deliberately listed out of apply order.
pub fn sample_manifests(namespace: &str) -> Result<ManifestSet> {
    let service = Manifest::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": "web",
            "namespace": namespace,
            "annotations": { LOAD_BALANCER_NAME_ANNOTATION: "web-nlb" }
        },
        "spec": { "type": "LoadBalancer", "selector": { "app": "web" }, "ports": [{ "port": 80, "targetPort": 5000 }] }
    }))?;
    let deployment = Manifest::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "web", "namespace": namespace },
        "spec": {
            "replicas": 2,
            "selector": { "matchLabels": { "app": "web" } },
            "template": {
                "metadata": { "labels": { "app": "web" } },
                "spec": {
                    "imagePullSecrets": [{ "name": "registry-creds" }],
                    "containers": [{ "name": "web", "image": "acme/web:1.2.0" }]
                }
            }
        }
    }))?;
    let ns = Manifest::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": namespace }
    }))?;
    Ok(ManifestSet::new(vec![service, deployment, ns]))
}
