//! Fixed-interval background token refresh
//!
//! The task runs independently of every request path. Refresh failures are
//! logged and counted by `TokenManager::refresh`; the loop itself only stops
//! when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use common::spawn_periodic;
use tokio_util::sync::CancellationToken;

use crate::manager::TokenManager;

/// Spawn a task that calls `TokenManager::refresh` every `interval`.
///
/// The first refresh fires one full interval after spawning, since the
/// token was just obtained. Cancelling aborts an in-flight refresh; the
/// store is only written after a complete response, so nothing is torn.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_periodic("token_refresh", interval, cancel, move || {
        let manager = manager.clone();
        async move {
            // Outcome is logged and counted by the manager
            let _ = manager.refresh().await;
        }
    })
}
