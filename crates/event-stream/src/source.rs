//! Record source abstraction
//!
//! `SourceConnector` opens a subscription to a topic; the resulting
//! `RecordSource` yields raw records until the transport fails. Kafka is the
//! production implementation (see `kafka`); tests drive the consumer with
//! in-memory sources.

use async_trait::async_trait;

use crate::error::Result;

/// One record as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

#[async_trait]
pub trait RecordSource: Send {
    /// Wait for the next record. An `Err` is a transport failure that ends
    /// the consume run; transient broker hiccups are absorbed by the source.
    async fn next_record(&mut self) -> Result<RawRecord>;

    /// Leave the consumer group and release the connection.
    async fn close(&mut self);
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connect and subscribe to `topic`.
    async fn connect(&self, topic: &str) -> Result<Box<dyn RecordSource>>;
}
