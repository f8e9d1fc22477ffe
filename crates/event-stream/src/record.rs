//! The unit persisted to the event log

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One exported event: the decoded payload plus its receive time in UTC and
/// in the host's local zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRecord {
    #[serde(rename = "timestamp")]
    pub received_at_utc: DateTime<Utc>,
    #[serde(rename = "received_at")]
    pub received_at_local: DateTime<Local>,
    pub message: Value,
}

impl ExportedRecord {
    /// Stamp `message` with the current time.
    pub fn now(message: Value) -> Self {
        let now = Utc::now();
        Self {
            received_at_utc: now,
            received_at_local: now.with_timezone(&Local),
            message,
        }
    }
}
