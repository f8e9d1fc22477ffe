//! Fault event stream consumption and export
//!
//! Consumes the NSP notification topic over mutually authenticated TLS and
//! appends every decoded event to a JSON Lines log, one record per line.
//!
//! Pipeline:
//! 1. `SourceConnector::connect()` joins the consumer group and subscribes
//! 2. `StreamConsumer::run()` pulls `RawRecord`s until stopped
//! 3. `decode_payload()` turns bytes into a JSON value (bad records dropped)
//! 4. `EventSink::append()` writes an `ExportedRecord` line
//!
//! Delivery is at-least-once: offsets are auto-committed, so a restart can
//! replay records already written to the log.

pub mod consumer;
pub mod decode;
pub mod error;
pub mod kafka;
pub mod record;
pub mod sink;
pub mod source;

pub use consumer::{ConsumerSnapshot, ConsumerState, ConsumerStatus, StreamConsumer};
pub use decode::decode_payload;
pub use error::{Error, Result};
pub use kafka::{KafkaConnector, KafkaSettings};
pub use record::ExportedRecord;
pub use sink::EventSink;
pub use source::{RawRecord, RecordSource, SourceConnector};
