//! Service-specific error types

use thiserror::Error;

/// Startup failures. Any of these aborts the process before it reports
/// itself running; steady-state failures never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("initial authentication failed: {0}")]
    Auth(#[from] nsp_auth::Error),

    #[error("subscription setup failed: {0}")]
    Subscription(#[from] nsp_subscription::Error),

    #[error("event log unavailable: {0}")]
    EventLog(#[from] event_stream::Error),

    #[error("schedule does not fit issued lifetime: {0}")]
    Schedule(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
