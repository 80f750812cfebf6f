//! Deployment configuration.
//!
//! The configuration is read once at the process boundary from `config.yaml`,
//! validated as a whole, and then passed by reference to the pipelines. Every
//! optional field carries a default so a minimal file only names the project,
//! the image and the cluster shape.

mod credentials;
mod policy;

pub use credentials::{
    CloudCredentials, Credentials, RegistryCredentials, CLOUD_KEY_VAR, CLOUD_SECRET_VAR,
    REGISTRY_TOKEN_VAR,
};
pub use policy::{LockRetryPolicy, NodeTimeoutPolicy, Policies, Timeouts, WaitSettings};

use crate::errors::ConfigError;
use crate::utils::{is_dns_label, slugify};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default executable search path handed to external tools.
pub const DEFAULT_SEARCH_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Instance sizes managed node pools refuse.
pub const FORBIDDEN_SIZES: [&str; 2] = ["tiny", "micro"];

/// Container registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySettings {
    /// Registry server.
    #[serde(default = "default_registry_server")]
    pub server: String,
    /// Registry user, also the image repository namespace.
    pub user: String,
    /// Name of the image pull secret created in the workload namespace.
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
    /// Contact email stored in the pull secret.
    #[serde(default)]
    pub email: String,
}

/// Worker node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSettings {
    /// Number of worker nodes.
    pub count: u32,
    /// Root disk size in GB.
    pub disk_gb: u32,
    /// Instance family, e.g. `standard`.
    pub family: String,
    /// Instance size, e.g. `medium`.
    pub size: String,
}

/// Managed cluster settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    /// Container network plugin.
    pub cni: String,
    /// Service level of the control plane.
    pub level: String,
    /// Cluster add-ons to enable.
    pub addons: Vec<String>,
    /// Pinned Kubernetes version; the latest available is used when unset.
    pub kubernetes_version: Option<String>,
    /// Lifetime of the generated admin kubeconfig.
    pub kubeconfig_ttl_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cni: "calico".to_string(),
            level: "pro".to_string(),
            addons: Vec::new(),
            kubernetes_version: None,
            kubeconfig_ttl_secs: 86_400,
        }
    }
}

/// Image build settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    /// Build context directory.
    pub context_dir: PathBuf,
    /// Dockerfile path; `{context_dir}/Dockerfile` when unset.
    pub dockerfile: Option<PathBuf>,
    /// Target platform.
    pub platform: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from("service"),
            dockerfile: None,
            platform: "linux/amd64".to_string(),
        }
    }
}

/// Kubernetes workload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesSettings {
    /// Workload namespace.
    pub namespace: String,
    /// Expected number of Running pods.
    pub replicas: u32,
    /// Directory holding manifest templates.
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,
}

/// Complete, validated deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Free-form project name; slugified for resource names.
    pub project_name: String,
    /// Service (image repository) name.
    pub service_name: String,
    /// Service version, used as the image tag.
    pub service_version: String,
    /// Registry settings.
    pub registry: RegistrySettings,
    /// Cloud zone.
    pub zone: String,
    /// Worker node settings.
    pub nodes: NodeSettings,
    /// Cluster settings.
    #[serde(default)]
    pub cluster: ClusterSettings,
    /// Image build settings.
    #[serde(default)]
    pub build: BuildSettings,
    /// Kubernetes workload settings.
    pub kubernetes: KubernetesSettings,
    /// Root directory for run outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Executable search path for external tools.
    #[serde(default = "default_search_path")]
    pub search_path: String,
    /// Wait deadlines.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Failure-handling policies.
    #[serde(default)]
    pub policy: Policies,
}

fn default_registry_server() -> String {
    "docker.io".to_string()
}

fn default_secret_name() -> String {
    "registry-creds".to_string()
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from("manifests")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_search_path() -> String {
    DEFAULT_SEARCH_PATH.to_string()
}

impl DeployConfig {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })?;
        Self::from_yaml_str(&raw).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses and validates configuration from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.project_slug().is_empty() {
            problems.push(format!(
                "project_name '{}' contains no usable characters",
                self.project_name
            ));
        }
        for (field, value) in [
            ("service_name", &self.service_name),
            ("service_version", &self.service_version),
            ("registry.user", &self.registry.user),
            ("registry.server", &self.registry.server),
            ("zone", &self.zone),
            ("nodes.family", &self.nodes.family),
            ("nodes.size", &self.nodes.size),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{field} must not be empty"));
            }
        }
        if self.nodes.count == 0 {
            problems.push("nodes.count must be greater than 0".to_string());
        }
        if self.nodes.disk_gb == 0 {
            problems.push("nodes.disk_gb must be greater than 0".to_string());
        }
        if self.kubernetes.replicas == 0 {
            problems.push("kubernetes.replicas must be greater than 0".to_string());
        }
        if !is_dns_label(&self.kubernetes.namespace) {
            problems.push(format!(
                "kubernetes.namespace '{}' is not a valid DNS label",
                self.kubernetes.namespace
            ));
        }
        if !is_dns_label(&self.registry.secret_name) {
            problems.push(format!(
                "registry.secret_name '{}' is not a valid DNS label",
                self.registry.secret_name
            ));
        }
        for (field, wait) in [
            ("timeouts.pool_running", self.timeouts.pool_running),
            ("timeouts.nodes_ready", self.timeouts.nodes_ready),
            ("timeouts.pods_running", self.timeouts.pods_running),
        ] {
            if wait.interval_secs == 0 {
                problems.push(format!("{field}.interval_secs must be greater than 0"));
            }
        }
        for (field, retry) in [
            ("policy.attach_retry", self.policy.attach_retry),
            ("policy.sg_delete_retry", self.policy.sg_delete_retry),
            ("policy.pool_delete_retry", self.policy.pool_delete_retry),
        ] {
            if retry.max_attempts == 0 {
                problems.push(format!("{field}.max_attempts must be greater than 0"));
            }
        }
        if self.search_path.trim().is_empty() {
            problems.push("search_path must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    /// Returns the project name as a DNS-label slug.
    #[must_use]
    pub fn project_slug(&self) -> String {
        slugify(&self.project_name)
    }

    /// Returns the image repository, `{registry.user}/{service_name}`.
    #[must_use]
    pub fn image_repository(&self) -> String {
        format!("{}/{}", self.registry.user, self.service_name)
    }

    /// Returns the Dockerfile path, defaulting to the one inside the build context.
    #[must_use]
    pub fn dockerfile(&self) -> PathBuf {
        self.build
            .dockerfile
            .clone()
            .unwrap_or_else(|| self.build.context_dir.join("Dockerfile"))
    }

    /// Returns the node size managed pools will accept, upgrading refused sizes to `small`.
    #[must_use]
    pub fn effective_node_size(&self) -> &str {
        if FORBIDDEN_SIZES.contains(&self.nodes.size.as_str()) {
            "small"
        } else {
            &self.nodes.size
        }
    }

    /// Returns registry credentials built from these settings and a token.
    #[must_use]
    pub fn registry_credentials(&self, credentials: &Credentials) -> RegistryCredentials {
        use secrecy::ExposeSecret;
        RegistryCredentials::new(
            self.registry.server.clone(),
            self.registry.user.clone(),
            credentials.registry_token.expose_secret().clone(),
            self.registry.email.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r"
project_name: Acme Web
service_name: web
service_version: 1.2.0
registry:
  user: acme
zone: ch-gva-2
nodes:
  count: 2
  disk_gb: 50
  family: standard
  size: medium
kubernetes:
  namespace: acme
  replicas: 2
";

    #[test]
    fn test_minimal_config_defaults() {
        let config = DeployConfig::from_yaml_str(MINIMAL).unwrap();

        assert_eq!(config.registry.server, "docker.io");
        assert_eq!(config.registry.secret_name, "registry-creds");
        assert_eq!(config.cluster.cni, "calico");
        assert_eq!(config.cluster.kubeconfig_ttl_secs, 86_400);
        assert_eq!(config.build.platform, "linux/amd64");
        assert_eq!(config.kubernetes.manifests_dir, PathBuf::from("manifests"));
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.search_path, DEFAULT_SEARCH_PATH);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.policy, Policies::default());
    }

    #[test]
    fn test_derived_values() {
        let config = DeployConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.project_slug(), "acme-web");
        assert_eq!(config.image_repository(), "acme/web");
        assert_eq!(config.dockerfile(), PathBuf::from("service/Dockerfile"));
        assert_eq!(config.effective_node_size(), "medium");
    }

    #[test]
    fn test_forbidden_size_upgraded() {
        let raw = MINIMAL.replace("size: medium", "size: micro");
        let config = DeployConfig::from_yaml_str(&raw).unwrap();
        assert_eq!(config.effective_node_size(), "small");
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let raw = MINIMAL
            .replace("count: 2", "count: 0")
            .replace("namespace: acme", "namespace: Acme_NS")
            .replace("zone: ch-gva-2", "zone: ''");
        let err = DeployConfig::from_yaml_str(&raw).unwrap_err();

        match err {
            ConfigError::Invalid { problems } => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.starts_with("zone")));
                assert!(problems.iter().any(|p| p.starts_with("nodes.count")));
                assert!(problems.iter().any(|p| p.starts_with("kubernetes.namespace")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_required_field_is_parse_error() {
        let raw = MINIMAL.replace("service_version: 1.2.0\n", "");
        let err = DeployConfig::from_yaml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("service_version"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = format!("{MINIMAL}colour: blue\n");
        assert!(matches!(
            DeployConfig::from_yaml_str(&raw),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let err = DeployConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_from_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let raw = format!(
            "{MINIMAL}policy:\n  node_timeout: fail\ntimeouts:\n  nodes_ready: {{deadline_secs: 60, interval_secs: 5}}\n"
        );
        std::fs::write(&path, raw).unwrap();

        let config = DeployConfig::load(&path).unwrap();
        assert_eq!(config.policy.node_timeout, NodeTimeoutPolicy::Fail);
        assert_eq!(config.timeouts.nodes_ready, WaitSettings::new(60, 5));
        assert_eq!(config.timeouts.pods_running, WaitSettings::new(300, 15));
    }
}
