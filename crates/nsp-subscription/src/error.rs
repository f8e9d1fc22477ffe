//! Error types for subscription operations

/// Errors from the notification subscription endpoints.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("subscription create failed: {0}")]
    CreateFailure(String),

    #[error("subscription renewal failed: {0}")]
    RenewFailure(String),

    #[error("subscription delete failed: {0}")]
    DeleteFailure(String),

    #[error("subscription response missing field: {0}")]
    MissingField(&'static str),

    #[error("no active subscription")]
    NoSubscription,

    #[error("authorization unavailable: {0}")]
    Auth(#[from] nsp_auth::Error),
}

/// Result alias for subscription operations.
pub type Result<T> = std::result::Result<T, Error>;
