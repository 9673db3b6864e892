//! `EventEnvelope` and `DeadLetterMessage` (spec §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spice_core::SpiceValue;
use uuid::Uuid;

/// The current `EventEnvelope` wire shape (spec §3). Bumped if the shape
/// changes in a way that existing consumers can't ignore.
pub const SCHEMA_VERSION: u32 = 1;

/// One published event (spec §3). `channel` is the routing/subscription
/// key (e.g. `"graph.runs"`); `event_type` is the semantic kind of the
/// event within that channel (e.g. `"run.started"`) — the two are
/// independent fields rather than one overloaded string. `correlation_id`
/// groups events that must preserve relative order (spec §4.8:
/// "FIFO-per-correlation-id ordering"); events with no correlation id
/// carry no ordering guarantee relative to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub channel: String,
    pub event_type: String,
    pub correlation_id: Option<String>,
    pub payload: SpiceValue,
    pub schema_version: u32,
    pub published_at: DateTime<Utc>,
    pub attempt: u32,
}

impl EventEnvelope {
    pub fn new(
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: SpiceValue,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            event_type: event_type.into(),
            correlation_id,
            payload,
            schema_version: SCHEMA_VERSION,
            published_at: Utc::now(),
            attempt: 0,
        }
    }

    fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub(crate) fn retried(&self) -> Self {
        self.clone().with_attempt(self.attempt + 1)
    }
}

/// An event that exhausted delivery retries and landed in a
/// `DeadLetterQueue` (spec §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: String,
    pub original_envelope: EventEnvelope,
    pub reason: String,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub received_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl DeadLetterMessage {
    pub fn new(original_envelope: EventEnvelope, reason: impl Into<String>, error_message: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            original_envelope,
            reason: reason.into(),
            error_message,
            stack_trace: None,
            received_at: Utc::now(),
            retry_count: 0,
            last_retry_at: None,
        }
    }
}
