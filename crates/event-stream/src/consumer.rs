//! Consume loop: source records in, exported lines out
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Consuming -> Stopping -> Disconnected
//!                      |                          |
//!                      +---- transport error -----+--> Disconnected
//! ```
//!
//! Stop is checked only between records. A record already taken from the
//! source is always decoded and appended before the loop exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decode::decode_payload;
use crate::error::{Error, Result};
use crate::record::ExportedRecord;
use crate::sink::EventSink;
use crate::source::{RawRecord, RecordSource, SourceConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
    Stopping,
}

/// Live counters, shared with status reporting.
#[derive(Debug)]
pub struct ConsumerStatus {
    state: RwLock<ConsumerState>,
    running: AtomicBool,
    topic: RwLock<Option<String>>,
    received: AtomicU64,
    exported: AtomicU64,
    decode_failures: AtomicU64,
    sink_failures: AtomicU64,
    empty: AtomicU64,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of `ConsumerStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub state: ConsumerState,
    pub topic: Option<String>,
    pub received: u64,
    pub exported: u64,
    pub decode_failures: u64,
    pub sink_failures: u64,
    pub empty: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ConsumerStatus {
    fn default() -> Self {
        Self {
            state: RwLock::new(ConsumerState::Disconnected),
            running: AtomicBool::new(false),
            topic: RwLock::new(None),
            received: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            last_event_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }
}

impl ConsumerStatus {
    pub fn state(&self) -> ConsumerState {
        *self.state.read()
    }

    pub fn is_consuming(&self) -> bool {
        self.state() == ConsumerState::Consuming
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.write() = state;
        metrics::gauge!("nsp_stream_consuming")
            .set(if state == ConsumerState::Consuming { 1.0 } else { 0.0 });
        debug!(?state, "consumer state changed");
    }

    fn record_error(&self, e: &Error) {
        *self.last_error.write() = Some(e.to_string());
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            state: self.state(),
            topic: self.topic.read().clone(),
            received: self.received.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            last_event_at: *self.last_event_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Pulls records from a `SourceConnector` and appends them to an `EventSink`.
pub struct StreamConsumer {
    connector: Arc<dyn SourceConnector>,
    sink: Arc<EventSink>,
    status: Arc<ConsumerStatus>,
}

impl StreamConsumer {
    pub fn new(connector: Arc<dyn SourceConnector>, sink: Arc<EventSink>) -> Self {
        Self {
            connector,
            sink,
            status: Arc::new(ConsumerStatus::default()),
        }
    }

    pub fn status(&self) -> &Arc<ConsumerStatus> {
        &self.status
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    /// Run on a spawned task. See `run()`.
    pub fn spawn(
        self: &Arc<Self>,
        topic: String,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let consumer = self.clone();
        tokio::spawn(async move { consumer.run(&topic, cancel).await })
    }

    /// Connect to `topic` and export records until `cancel` fires.
    ///
    /// Returns `Ok(())` on a requested stop and `Err(Transport)` when the
    /// connection is lost or refused. Per-record failures never end the run.
    pub async fn run(&self, topic: &str, cancel: CancellationToken) -> Result<()> {
        if self.status.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let outcome = self.run_inner(topic, &cancel).await;
        if let Err(e) = &outcome {
            self.status.record_error(e);
            error!(topic, error = %e, "stream consumer stopped on transport failure");
        }
        self.status.set_state(ConsumerState::Disconnected);
        self.status.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_inner(&self, topic: &str, cancel: &CancellationToken) -> Result<()> {
        *self.status.topic.write() = Some(topic.to_string());
        self.status.set_state(ConsumerState::Connecting);
        info!(topic, "connecting stream consumer");

        let mut source = tokio::select! {
            _ = cancel.cancelled() => {
                info!(topic, "stop requested before connection completed");
                return Ok(());
            }
            source = self.connector.connect(topic) => source?,
        };
        self.status.set_state(ConsumerState::Subscribed);
        info!(topic, "subscribed to topic");

        self.status.set_state(ConsumerState::Consuming);
        let outcome = self.consume(source.as_mut(), cancel).await;

        self.status.set_state(ConsumerState::Stopping);
        source.close().await;
        info!(topic, "stream consumer closed");
        outcome
    }

    async fn consume(
        &self,
        source: &mut dyn RecordSource,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = source.next_record() => next,
            };
            self.process(next?).await;
        }
    }

    async fn process(&self, record: RawRecord) {
        self.status.received.fetch_add(1, Ordering::Relaxed);
        *self.status.last_event_at.write() = Some(Utc::now());

        let message = match decode_payload(record.payload.as_deref()) {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.status.empty.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("nsp_stream_records_total", "outcome" => "empty").increment(1);
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    "skipping empty record"
                );
                return;
            }
            Err(e) => {
                self.status.decode_failures.fetch_add(1, Ordering::Relaxed);
                self.status.record_error(&e);
                metrics::counter!("nsp_stream_records_total", "outcome" => "decode_failed")
                    .increment(1);
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "dropping undecodable record"
                );
                return;
            }
        };

        match self.sink.append(&ExportedRecord::now(message)).await {
            Ok(()) => {
                self.status.exported.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("nsp_stream_records_total", "outcome" => "exported").increment(1);
                debug!(partition = record.partition, offset = record.offset, "record exported");
            }
            Err(e) => {
                self.status.sink_failures.fetch_add(1, Ordering::Relaxed);
                self.status.record_error(&e);
                metrics::counter!("nsp_stream_records_total", "outcome" => "sink_failed")
                    .increment(1);
                error!(offset = record.offset, error = %e, "failed to write record to event log");
            }
        }
    }
}
