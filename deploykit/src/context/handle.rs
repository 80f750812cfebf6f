//! Identifiers of created infrastructure.

use crate::clients::CloudResource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A created resource's id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResource {
    /// Provider id.
    pub id: String,
    /// Name it was created with.
    pub name: String,
}

impl RecordedResource {
    /// Creates a record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A created node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolRecord {
    /// Provider id.
    pub id: String,
    /// Name it was created with.
    pub name: String,
    /// Requested node count.
    pub size: u32,
    /// Whether the security group was attached after the pool reached Running.
    pub security_group_attached: bool,
}

/// Everything a deployment created, recorded as soon as each creation call returned.
///
/// Teardown trusts these ids over anything derivable from naming conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureHandle {
    /// Zone the resources live in.
    pub zone: String,
    /// Security group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<RecordedResource>,
    /// Cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<RecordedResource>,
    /// Node pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<NodePoolRecord>,
    /// Kubeconfig path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    /// Load balancer names requested by applied Services. The cloud
    /// controller creates these, so only names are known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancer_names: Vec<String>,
}

impl InfrastructureHandle {
    /// Creates an empty handle for `zone`.
    #[must_use]
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            ..Self::default()
        }
    }

    /// Returns true if any cloud resource was created.
    #[must_use]
    pub fn has_resources(&self) -> bool {
        self.security_group.is_some() || self.cluster.is_some() || self.node_pool.is_some()
    }

    /// Returns the security group id.
    #[must_use]
    pub fn security_group_id(&self) -> Option<&str> {
        self.security_group.as_ref().map(|r| r.id.as_str())
    }

    /// Returns the cluster id.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster.as_ref().map(|r| r.id.as_str())
    }

    /// Returns the node pool id.
    #[must_use]
    pub fn node_pool_id(&self) -> Option<&str> {
        self.node_pool.as_ref().map(|r| r.id.as_str())
    }

    /// Returns the kubeconfig path.
    #[must_use]
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    /// Returns the recorded cloud resources in deletion order: pool, cluster, group.
    #[must_use]
    pub fn resources(&self) -> Vec<CloudResource> {
        let mut resources = Vec::new();
        if let (Some(pool), Some(cluster)) = (&self.node_pool, &self.cluster) {
            resources.push(CloudResource::NodePool {
                cluster_id: cluster.id.clone(),
                id: pool.id.clone(),
            });
        }
        if let Some(cluster) = &self.cluster {
            resources.push(CloudResource::Cluster {
                id: cluster.id.clone(),
            });
        }
        if let Some(group) = &self.security_group {
            resources.push(CloudResource::SecurityGroup {
                id: group.id.clone(),
            });
        }
        resources
    }
}
