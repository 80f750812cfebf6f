//! Cloud provider capability.

use crate::errors::{CloudError, ResourceKind};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for cloud calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// An instance type offered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    /// Provider identifier.
    pub id: String,
    /// Family, e.g. `standard`.
    pub family: String,
    /// Size, e.g. `medium`.
    pub size: String,
}

impl InstanceType {
    /// Creates an instance type.
    #[must_use]
    pub fn new(id: impl Into<String>, family: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            size: size.into(),
        }
    }
}

/// Parameters for a managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name.
    pub name: String,
    /// Zone.
    pub zone: String,
    /// Kubernetes version.
    pub kubernetes_version: String,
    /// Control plane service level.
    pub level: String,
    /// Network plugin.
    pub cni: String,
    /// Add-ons.
    pub addons: Vec<String>,
    /// Free-form description.
    pub description: String,
}

/// Parameters for a node pool.
///
/// There is no security-group field: managed node pools reject one at
/// creation, so the group is attached once the pool is Running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolSpec {
    /// Pool name.
    pub name: String,
    /// Number of nodes.
    pub size: u32,
    /// Resolved instance type id.
    pub instance_type_id: String,
    /// Root disk size in GB.
    pub disk_gb: u32,
    /// Free-form description.
    pub description: String,
}

/// Lifecycle state of a node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePoolState {
    /// Being created.
    Creating,
    /// Ready to accept updates.
    Running,
    /// Scaling up or down.
    Scaling,
    /// Being updated.
    Updating,
    /// Being deleted.
    Deleting,
    /// Failed.
    Error,
    /// A state this crate does not know.
    Other(String),
}

impl NodePoolState {
    /// Parses a provider state string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "creating" => Self::Creating,
            "running" => Self::Running,
            "scaling" => Self::Scaling,
            "updating" => Self::Updating,
            "deleting" | "destroying" => Self::Deleting,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NodePoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Scaling => write!(f, "scaling"),
            Self::Updating => write!(f, "updating"),
            Self::Deleting => write!(f, "deleting"),
            Self::Error => write!(f, "error"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// Parameters for a generated admin kubeconfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigRequest {
    /// User name embedded in the certificate.
    pub user: String,
    /// Groups embedded in the certificate.
    pub groups: Vec<String>,
    /// Certificate lifetime in seconds.
    pub ttl_secs: u64,
}

/// A network load balancer, as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Provider identifier.
    pub id: String,
    /// Name, set by the cloud controller from the Service annotation.
    pub name: String,
}

impl LoadBalancer {
    /// Creates a load balancer entry.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A recorded cloud resource whose existence can be checked or that can be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudResource {
    /// A security group.
    SecurityGroup {
        /// Group id.
        id: String,
    },
    /// A cluster.
    Cluster {
        /// Cluster id.
        id: String,
    },
    /// A node pool within a cluster.
    NodePool {
        /// Owning cluster id.
        cluster_id: String,
        /// Pool id.
        id: String,
    },
    /// A network load balancer created by the cluster's cloud controller.
    LoadBalancer {
        /// Load balancer id.
        id: String,
    },
}

impl CloudResource {
    /// Returns the resource kind.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::SecurityGroup { .. } => ResourceKind::SecurityGroup,
            Self::Cluster { .. } => ResourceKind::Cluster,
            Self::NodePool { .. } => ResourceKind::NodePool,
            Self::LoadBalancer { .. } => ResourceKind::LoadBalancer,
        }
    }

    /// Returns the resource id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::SecurityGroup { id }
            | Self::Cluster { id }
            | Self::NodePool { id, .. }
            | Self::LoadBalancer { id } => id,
        }
    }
}

impl fmt::Display for CloudResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// Operations against the managed Kubernetes provider.
///
/// Mutating calls return once the provider reports the operation complete.
/// Completion of an operation says nothing about node or workload readiness.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Lists instance types available in a zone.
    async fn list_instance_types(&self, zone: &str) -> CloudResult<Vec<InstanceType>>;

    /// Lists supported Kubernetes versions, newest first.
    async fn list_kubernetes_versions(&self, zone: &str) -> CloudResult<Vec<String>>;

    /// Creates a security group and returns its id.
    async fn create_security_group(&self, name: &str, description: &str) -> CloudResult<String>;

    /// Creates a cluster and returns its id.
    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<String>;

    /// Creates a node pool and returns its id.
    async fn create_node_pool(
        &self,
        zone: &str,
        cluster_id: &str,
        spec: &NodePoolSpec,
    ) -> CloudResult<String>;

    /// Returns the current state of a node pool.
    async fn node_pool_state(
        &self,
        zone: &str,
        cluster_id: &str,
        pool_id: &str,
    ) -> CloudResult<NodePoolState>;

    /// Attaches a security group to a Running node pool.
    async fn attach_security_group(
        &self,
        zone: &str,
        cluster_id: &str,
        pool_id: &str,
        security_group_id: &str,
    ) -> CloudResult<()>;

    /// Generates an admin kubeconfig and returns its YAML text.
    async fn generate_kubeconfig(
        &self,
        zone: &str,
        cluster_id: &str,
        request: &KubeconfigRequest,
    ) -> CloudResult<String>;

    /// Returns true if the resource still exists.
    async fn exists(&self, zone: &str, resource: &CloudResource) -> CloudResult<bool>;

    /// Lists the network load balancers in a zone.
    async fn list_load_balancers(&self, zone: &str) -> CloudResult<Vec<LoadBalancer>>;

    /// Deletes a network load balancer.
    async fn delete_load_balancer(&self, zone: &str, load_balancer_id: &str) -> CloudResult<()>;

    /// Deletes a node pool.
    async fn delete_node_pool(&self, zone: &str, cluster_id: &str, pool_id: &str)
        -> CloudResult<()>;

    /// Deletes a cluster.
    async fn delete_cluster(&self, zone: &str, cluster_id: &str) -> CloudResult<()>;

    /// Deletes a security group.
    async fn delete_security_group(&self, security_group_id: &str) -> CloudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool_state_parse() {
        assert_eq!(NodePoolState::parse("Running"), NodePoolState::Running);
        assert_eq!(NodePoolState::parse("creating"), NodePoolState::Creating);
        assert_eq!(
            NodePoolState::parse("rebooting"),
            NodePoolState::Other("rebooting".to_string())
        );
    }

    #[test]
    fn test_cloud_resource_serialization() {
        let pool = CloudResource::NodePool {
            cluster_id: "c-1".to_string(),
            id: "p-1".to_string(),
        };
        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(json["kind"], "node_pool");
        assert_eq!(json["cluster_id"], "c-1");
        assert_eq!(pool.to_string(), "node pool p-1");

        let nlb = CloudResource::LoadBalancer {
            id: "nlb-1".to_string(),
        };
        assert_eq!(serde_json::to_value(&nlb).unwrap()["kind"], "load_balancer");
        assert_eq!(nlb.to_string(), "load balancer nlb-1");
    }

    #[test]
    fn test_node_pool_spec_has_no_security_group() {
        let spec = NodePoolSpec {
            name: "acme-workers".to_string(),
            size: 2,
            instance_type_id: "it-1".to_string(),
            disk_gb: 50,
            description: String::new(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert!(keys.iter().all(|k| !k.contains("security")));
    }
}
