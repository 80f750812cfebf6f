//! Bounded polling.
//!
//! [`WaitPoller`] bridges asynchronous provider operations and a sequential
//! pipeline: it re-checks a condition at a fixed interval until the condition
//! holds, the check fails, or the deadline elapses. It never blocks past the
//! deadline and never backs off.

use super::CancellationToken;
use crate::config::WaitSettings;
use crate::errors::{DeployError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a check or of a whole wait.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The condition holds.
    Ready(T),
    /// The condition does not hold yet; carries the latest observation, if any.
    Pending(Option<T>),
    /// Checking failed; polling stops.
    Failed(DeployError),
}

impl<T> PollOutcome<T> {
    /// Returns true for `Ready`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns true for `Pending`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Converts to a result, mapping `Pending` to [`DeployError::DeadlineExceeded`].
    pub fn into_result(self, what: &str, waited: Duration) -> Result<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(_) => Err(DeployError::DeadlineExceeded {
                what: what.to_string(),
                waited_secs: waited.as_secs(),
            }),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Polls a condition at a fixed interval until a deadline.
#[derive(Debug, Clone)]
pub struct WaitPoller {
    what: String,
    interval: Duration,
    deadline: Duration,
    cancel: Option<Arc<CancellationToken>>,
}

impl WaitPoller {
    /// Creates a poller; `what` names the awaited condition in logs.
    #[must_use]
    pub fn new(what: impl Into<String>, interval: Duration, deadline: Duration) -> Self {
        Self {
            what: what.into(),
            interval: interval.max(Duration::from_millis(1)),
            deadline,
            cancel: None,
        }
    }

    /// Creates a poller from configured wait settings.
    #[must_use]
    pub fn from_settings(what: impl Into<String>, settings: WaitSettings) -> Self {
        Self::new(what, settings.interval(), settings.deadline())
    }

    /// Ends the wait with [`DeployError::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Option<Arc<CancellationToken>>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the deadline.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns what is being waited for.
    #[must_use]
    pub fn what(&self) -> &str {
        &self.what
    }

    /// Runs `check` until it reports `Ready` or `Failed`, or the deadline elapses.
    ///
    /// On expiry returns `Pending` with the last observation any check reported.
    pub async fn wait<T, F, Fut>(&self, mut check: F) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        let started = Instant::now();
        let deadline_at = started + self.deadline;
        let mut last = None;
        let mut attempt: u32 = 0;

        loop {
            if let Some(outcome) = self.cancelled_outcome() {
                return outcome;
            }

            attempt += 1;
            match check().await {
                PollOutcome::Ready(value) => {
                    debug!(what = %self.what, attempt, elapsed_ms = elapsed_ms(started), "condition met");
                    return PollOutcome::Ready(value);
                }
                PollOutcome::Failed(err) => {
                    warn!(what = %self.what, attempt, error = %err, "check failed");
                    return PollOutcome::Failed(err);
                }
                PollOutcome::Pending(observation) => {
                    if observation.is_some() {
                        last = observation;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline_at {
                warn!(
                    what = %self.what,
                    attempt,
                    elapsed_ms = elapsed_ms(started),
                    "deadline elapsed before condition was met"
                );
                return PollOutcome::Pending(last);
            }

            let pause = self.interval.min(deadline_at - now);
            debug!(what = %self.what, attempt, next_check_ms = pause.as_millis(), "still waiting");
            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        () = tokio::time::sleep(pause) => {}
                        () = token.cancelled() => {}
                    }
                }
                None => tokio::time::sleep(pause).await,
            }
        }
    }

    fn cancelled_outcome<T>(&self) -> Option<PollOutcome<T>> {
        let token = self.cancel.as_ref()?;
        if !token.is_cancelled() {
            return None;
        }
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        Some(PollOutcome::Failed(DeployError::Cancelled(format!(
            "waiting for {}: {reason}",
            self.what
        ))))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
