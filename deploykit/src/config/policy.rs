//! Wait and retry policies resolved from configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the pipeline does when worker nodes are not all Ready by the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTimeoutPolicy {
    /// Record the stage as `timeout` and continue to manifest application.
    #[default]
    Proceed,
    /// Treat the timeout as fatal and abort the run.
    Fail,
}

/// A bounded poll: how long to wait and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSettings {
    /// Overall deadline in seconds.
    pub deadline_secs: u64,
    /// Fixed interval between checks in seconds.
    pub interval_secs: u64,
}

impl WaitSettings {
    /// Creates wait settings.
    #[must_use]
    pub const fn new(deadline_secs: u64, interval_secs: u64) -> Self {
        Self {
            deadline_secs,
            interval_secs,
        }
    }

    /// Returns the deadline as a duration.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Returns the poll interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Bounded fixed-delay retry applied to transient lock failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockRetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts in seconds.
    pub delay_secs: u64,
}

impl LockRetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, delay_secs: u64) -> Self {
        Self {
            max_attempts,
            delay_secs,
        }
    }

    /// Returns the delay as a duration.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Deadlines for the blocking waits of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Waiting for the node pool to reach Running.
    pub pool_running: WaitSettings,
    /// Waiting for worker nodes to report Ready.
    pub nodes_ready: WaitSettings,
    /// Waiting for pods to reach Running.
    pub pods_running: WaitSettings,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pool_running: WaitSettings::new(600, 10),
            nodes_ready: WaitSettings::new(720, 20),
            pods_running: WaitSettings::new(300, 15),
        }
    }
}

/// Failure-handling policies for deployment and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policies {
    /// Node readiness timeout handling.
    pub node_timeout: NodeTimeoutPolicy,
    /// Security-group attach retries after node pool creation.
    pub attach_retry: LockRetryPolicy,
    /// Security-group delete retries during teardown.
    pub sg_delete_retry: LockRetryPolicy,
    /// Node-pool delete retries during teardown.
    pub pool_delete_retry: LockRetryPolicy,
    /// Pause before deleting the security group, letting the cluster release it.
    pub teardown_settle_secs: u64,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            node_timeout: NodeTimeoutPolicy::Proceed,
            attach_retry: LockRetryPolicy::new(5, 30),
            sg_delete_retry: LockRetryPolicy::new(2, 30),
            pool_delete_retry: LockRetryPolicy::new(3, 30),
            teardown_settle_secs: 10,
        }
    }
}

impl Policies {
    /// Returns the settle delay as a duration.
    #[must_use]
    pub const fn teardown_settle(&self) -> Duration {
        Duration::from_secs(self.teardown_settle_secs)
    }
}
