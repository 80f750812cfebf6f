//! Kubernetes control-plane capability.

use crate::errors::Result;
use crate::manifests::Manifest;
use crate::tools::KubeAccess;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an apply did to the cluster object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object existed and was changed.
    Configured,
    /// The object already matched.
    Unchanged,
}

impl ApplyOutcome {
    /// Parses the trailing word kubectl prints after `kind/name`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.split_whitespace().last() {
            Some("created") => Self::Created,
            Some("unchanged") => Self::Unchanged,
            _ => Self::Configured,
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Configured => write!(f, "configured"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Name and status of a listed object.
///
/// For pods the status is the phase; for nodes it is `Ready` or `NotReady`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    /// Object name.
    pub name: String,
    /// Kind-specific status.
    pub status: String,
}

impl ObjectSummary {
    /// Creates a summary.
    #[must_use]
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
        }
    }
}

/// Operations against a cluster's control plane.
///
/// Every call names the cluster explicitly through [`KubeAccess`]; there is no
/// ambient kubeconfig.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// Creates or updates one object.
    async fn apply(&self, access: &KubeAccess, manifest: &Manifest) -> Result<ApplyOutcome>;

    /// Lists objects of `kind`; `namespace` is ignored for cluster-scoped kinds.
    async fn get(
        &self,
        access: &KubeAccess,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<ObjectSummary>>;

    /// Deletes a namespace and everything in it; returns false if it did not exist.
    async fn delete_namespace(&self, access: &KubeAccess, namespace: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_outcome_parse() {
        assert_eq!(ApplyOutcome::parse("namespace/acme created"), ApplyOutcome::Created);
        assert_eq!(
            ApplyOutcome::parse("deployment.apps/web unchanged"),
            ApplyOutcome::Unchanged
        );
        assert_eq!(
            ApplyOutcome::parse("secret/registry-creds configured"),
            ApplyOutcome::Configured
        );
        assert_eq!(ApplyOutcome::parse(""), ApplyOutcome::Configured);
    }
}
