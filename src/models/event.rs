//! Log events delivered to the external collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity / kind of a log event, mirrored by the collector UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Log,
    Notify,
    Warn,
    Error,
    Success,
}

/// One event in a bot's log stream. Immutable once constructed; enqueued once
/// and delivered at-least-once in enqueue order per bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub bot_id: String,
    pub status: EventStatus,
    pub message: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(bot_id: impl Into<String>, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            status,
            message: message.into(),
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
