//! Error types for stream consumption and export

/// Errors from the consume/export pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection, TLS or broker failure. Ends the current consume run.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A single record could not be decoded. The record is dropped.
    #[error("decode failure: {0}")]
    Decode(String),

    #[error("event log error: {0}")]
    Sink(String),

    #[error("consumer is already running")]
    AlreadyRunning,
}

/// Result alias for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
