//! Fixed-delay retry for transient resource locks.
//!
//! [`LockRetry::run`] retries only errors classified as locks
//! ([`DeployError::is_lock`]); every other error is returned on the first
//! attempt. [`LockRetry::run_while`] takes the classification from the caller.
//! A lock error that outlives every attempt is reported as
//! [`DeployError::TransientLock`]. The retry count is returned with the result
//! so callers can record it.

use crate::config::LockRetryPolicy;
use crate::errors::{DeployError, Result};
use std::future::Future;
use tracing::{info, warn};

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result.
    pub result: Result<T>,
    /// Retries performed after the first attempt.
    pub retries: u32,
}

impl<T> RetryOutcome<T> {
    /// Returns true if the final attempt succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Retries an operation while it fails with a retryable error.
#[derive(Debug, Clone)]
pub struct LockRetry {
    what: String,
    policy: LockRetryPolicy,
}

impl LockRetry {
    /// Creates a retrier; `what` names the operation in logs.
    #[must_use]
    pub fn new(what: impl Into<String>, policy: LockRetryPolicy) -> Self {
        Self {
            what: what.into(),
            policy,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> LockRetryPolicy {
        self.policy
    }

    /// Runs `operation`, passing the 1-based attempt number, retrying lock errors.
    pub async fn run<T, F, Fut>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_while(DeployError::is_lock, operation).await
    }

    /// Runs `operation`, retrying every error for which `retryable` holds.
    pub async fn run_while<T, P, F, Fut>(&self, retryable: P, mut operation: F) -> RetryOutcome<T>
    where
        P: Fn(&DeployError) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(what = %self.what, attempt, "succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        retries: attempt - 1,
                    };
                }
                Err(err) if retryable(&err) && attempt < max_attempts => {
                    warn!(
                        what = %self.what,
                        attempt,
                        max_attempts,
                        delay_secs = self.policy.delay_secs,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.delay()).await;
                    attempt += 1;
                }
                Err(err) => {
                    let err = if attempt > 1 && err.is_lock() {
                        DeployError::TransientLock {
                            resource: self.what.clone(),
                            message: err.to_string(),
                        }
                    } else {
                        err
                    };
                    return RetryOutcome {
                        result: Err(err),
                        retries: attempt - 1,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CloudError, DeployError, ResourceKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn locked() -> DeployError {
        CloudError::Locked {
            kind: ResourceKind::SecurityGroup,
            id: "sg-1".to_string(),
            message: "still referenced".to_string(),
        }
        .into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let outcome = LockRetry::new("op", LockRetryPolicy::new(3, 30))
            .run(|_| async { Ok::<_, DeployError>(42) })
            .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_then_success_records_one_retry() {
        let started = Instant::now();
        let outcome = LockRetry::new("delete security group", LockRetryPolicy::new(2, 30))
            .run(|attempt| async move {
                if attempt == 1 {
                    Err(locked())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.retries, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = LockRetry::new("op", LockRetryPolicy::new(3, 10))
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(locked()) }
            })
            .await;

        let err = outcome.result.unwrap_err();
        assert!(err.is_lock());
        assert!(matches!(err, DeployError::TransientLock { ref resource, .. } if resource == "op"));
        assert_eq!(outcome.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_lock_error_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = LockRetry::new("op", LockRetryPolicy::new(5, 10))
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CloudError::api(Some(500), "internal").into()) }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_while_retries_caller_classified_errors() {
        let calls = AtomicU32::new(0);
        let outcome = LockRetry::new("attach", LockRetryPolicy::new(3, 10))
            .run_while(
                |err| !err.is_permanent(),
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 1 {
                            Err(CloudError::api(Some(500), "internal").into())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
            )
            .await;

        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.retries, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_while_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = LockRetry::new("attach", LockRetryPolicy::new(3, 10))
            .run_while(
                |err| !err.is_permanent(),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(CloudError::NotFound {
                            kind: ResourceKind::NodePool,
                            id: "pool-1".to_string(),
                        }
                        .into())
                    }
                },
            )
            .await;

        assert!(matches!(outcome.result, Err(DeployError::Cloud(CloudError::NotFound { .. }))));
        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
