//! `EventBus` (spec §4.8): FIFO-per-correlation-id publish/subscribe with
//! at-least-once delivery, falling back to the dead-letter queue when a
//! subscriber can't keep up.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::dlq::DeadLetterQueue;
use crate::envelope::EventEnvelope;
use spice_core::SpiceValue;

/// Tuning knobs for delivery retries, separate from the DLQ's own bounds.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub subscriber_capacity: usize,
    pub max_delivery_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
            max_delivery_attempts: 3,
            base_backoff: Duration::from_millis(20),
        }
    }
}

struct Subscriber {
    id: String,
    tx: mpsc::Sender<EventEnvelope>,
}

/// Publishes events to per-channel subscribers. Delivery within one
/// `publish` call walks subscribers in registration order and, within a
/// single subscriber's queue, preserves the order events were published
/// in — so events sharing a `correlation_id` (published by the same
/// caller in sequence) arrive in that order (spec §4.8).
pub struct EventBus {
    channels: DashMap<String, RwLock<Vec<Subscriber>>>,
    dlq: Arc<DeadLetterQueue>,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new(dlq: Arc<DeadLetterQueue>, config: EventBusConfig) -> Self {
        Self {
            channels: DashMap::new(),
            dlq,
            config,
        }
    }

    pub fn dlq(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    /// Register a new subscriber on `channel`, returning the receiving end
    /// of its bounded queue.
    pub fn subscribe(&self, channel: impl Into<String>, subscriber_id: impl Into<String>) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity);
        let channel = channel.into();
        let entry = self.channels.entry(channel).or_insert_with(|| RwLock::new(Vec::new()));
        entry.write().push(Subscriber { id: subscriber_id.into(), tx });
        rx
    }

    pub fn unsubscribe(&self, channel: &str, subscriber_id: &str) {
        if let Some(entry) = self.channels.get(channel) {
            entry.write().retain(|s| s.id != subscriber_id);
        }
    }

    /// Publish `payload` as an event of kind `event_type` on the
    /// subscription `channel`. Delivers at-least-once to every current
    /// subscriber: a subscriber whose queue is full is retried with
    /// backoff up to `max_delivery_attempts`, after which the event is
    /// dead-lettered for that subscriber rather than silently dropped
    /// (spec §4.9).
    pub async fn publish(
        &self,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: SpiceValue,
        correlation_id: Option<String>,
    ) {
        let channel = channel.into();
        let envelope = EventEnvelope::new(channel.clone(), event_type, payload, correlation_id);

        let Some(entry) = self.channels.get(&channel) else {
            tracing::debug!(channel = %channel, "publish with no subscribers");
            return;
        };
        let subscribers: Vec<mpsc::Sender<EventEnvelope>> = entry.read().iter().map(|s| s.tx.clone()).collect();
        drop(entry);

        for tx in subscribers {
            self.deliver(tx, envelope.clone()).await;
        }
    }

    async fn deliver(&self, tx: mpsc::Sender<EventEnvelope>, mut envelope: EventEnvelope) {
        for attempt in 0..self.config.max_delivery_attempts {
            match tx.try_send(envelope.clone()) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let backoff = self.config.base_backoff * 2u32.pow(attempt);
                    tokio::time::sleep(backoff).await;
                    envelope = envelope.retried();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.dlq.send(envelope, "subscriber channel closed", None);
                    return;
                }
            }
        }
        self.dlq.send(envelope, "delivery retries exhausted", None);
    }
}
