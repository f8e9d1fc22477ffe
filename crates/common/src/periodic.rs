//! Fixed-interval background loops

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn a task that awaits `run()` every `interval` until `cancel` fires.
///
/// The first run is one full interval after spawning. A late run delays the
/// schedule rather than bursting. Cancelling drops an in-flight run, so
/// `run` must only publish state once its work is complete.
pub fn spawn_periodic<F, Fut>(
    task: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;
        info!(task, interval_secs = interval.as_secs(), "periodic task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(task, "periodic run");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = run() => {}
                    }
                }
            }
        }

        info!(task, "periodic task stopped");
    })
}
