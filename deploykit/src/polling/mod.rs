//! Waiting on asynchronous infrastructure.
//!
//! - [`WaitPoller`]: fixed-interval polling bounded by a deadline
//! - [`LockRetry`]: fixed-delay retry of transient lock failures
//! - [`CancellationToken`]: ends waits early when a host enforces a budget

mod cancel;
mod retry;
mod wait;

pub use cancel::CancellationToken;
pub use retry::{LockRetry, RetryOutcome};
pub use wait::{PollOutcome, WaitPoller};
