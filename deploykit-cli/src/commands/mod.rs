//! CLI commands

pub mod deploy;
pub mod teardown;

use deploykit::polling::CancellationToken;
use std::sync::Arc;
use tracing::warn;

/// Returns a token that is cancelled on Ctrl-C.
///
/// Cancellation only ends blocking waits early; a stage that is already
/// creating a resource finishes and records it.
pub fn interrupt_token() -> Arc<CancellationToken> {
    let token = Arc::new(CancellationToken::new());
    let watched = Arc::clone(&token);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next wait");
            watched.cancel("interrupted");
        }
    });
    token
}
