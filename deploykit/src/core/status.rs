//! Stage status and stage name enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Success,
    /// Stage failed.
    Failed,
    /// Stage was skipped.
    Skipped,
    /// Stage hit its deadline but the pipeline was allowed to continue.
    Timeout,
    /// Stage completed with a flagged shortfall (e.g. some replicas not Running).
    Degraded,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Timeout => write!(f, "timeout"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates full success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if the stage finished but with a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Timeout | Self::Degraded)
    }
}

/// The seven deployment stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    /// Build the container image.
    BuildImage,
    /// Push the image to the registry.
    PushImage,
    /// Create security group, cluster and node pool.
    ProvisionInfrastructure,
    /// Wait for worker nodes to report Ready.
    WaitForNodes,
    /// Reconcile the pull secret and apply manifests.
    ApplyManifests,
    /// Wait for pods to reach Running.
    VerifyPods,
    /// Serialize the deployment report.
    WriteReport,
}

impl DeployStage {
    /// All stages in execution order.
    pub const ALL: [Self; 7] = [
        Self::BuildImage,
        Self::PushImage,
        Self::ProvisionInfrastructure,
        Self::WaitForNodes,
        Self::ApplyManifests,
        Self::VerifyPods,
        Self::WriteReport,
    ];

    /// Returns the stable snake_case name used in reports and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildImage => "build_image",
            Self::PushImage => "push_image",
            Self::ProvisionInfrastructure => "provision_infrastructure",
            Self::WaitForNodes => "wait_for_nodes",
            Self::ApplyManifests => "apply_manifests",
            Self::VerifyPods => "verify_pods",
            Self::WriteReport => "write_report",
        }
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The teardown steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    /// Delete the workload namespace so load balancers are released.
    DeleteWorkloads,
    /// Delete load balancers the cloud controller left behind.
    DeleteLoadBalancers,
    /// Delete the node pool.
    DeleteNodePool,
    /// Delete the cluster.
    DeleteCluster,
    /// Delete the security group.
    DeleteSecurityGroup,
    /// Re-check that nothing remains.
    Verify,
}

impl TeardownStep {
    /// Returns the stable snake_case name used in reports and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteWorkloads => "delete_workloads",
            Self::DeleteLoadBalancers => "delete_load_balancers",
            Self::DeleteNodePool => "delete_node_pool",
            Self::DeleteCluster => "delete_cluster",
            Self::DeleteSecurityGroup => "delete_security_group",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Success.to_string(), "success");
        assert_eq!(StageStatus::Timeout.to_string(), "timeout");
        assert_eq!(StageStatus::Degraded.to_string(), "degraded");
    }

    #[test]
    fn test_stage_status_classes() {
        assert!(StageStatus::Success.is_success());
        assert!(StageStatus::Skipped.is_success());
        assert!(StageStatus::Failed.is_failure());
        assert!(StageStatus::Timeout.is_warning());
        assert!(!StageStatus::Timeout.is_failure());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Timeout).unwrap();
        assert_eq!(json, r#""timeout""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Timeout);
    }

    #[test]
    fn test_deploy_stage_order() {
        assert_eq!(DeployStage::ALL.len(), 7);
        assert_eq!(DeployStage::ALL[0], DeployStage::BuildImage);
        assert_eq!(DeployStage::ALL[6], DeployStage::WriteReport);
        assert_eq!(DeployStage::WaitForNodes.to_string(), "wait_for_nodes");
    }

    #[test]
    fn test_teardown_step_serialize() {
        let json = serde_json::to_string(&TeardownStep::DeleteSecurityGroup).unwrap();
        assert_eq!(json, r#""delete_security_group""#);
    }
}
