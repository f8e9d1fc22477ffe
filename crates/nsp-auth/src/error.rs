//! Error types for NSP authentication operations

/// Errors from token acquisition, refresh and revocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("authentication failed ({status}): {body}")]
    AuthFailure { status: u16, body: String },

    #[error("token refresh failed: {0}")]
    RefreshFailure(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("no access token available, authenticate first")]
    NotAuthenticated,

    #[error("token revocation failed: {0}")]
    Revocation(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
