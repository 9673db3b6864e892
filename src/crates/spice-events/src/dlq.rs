//! Dead-letter queue with per-channel and global back-pressure bounds
//! (spec §4.9), grounded on the teacher's `ClientBackpressure`
//! (`parking_lot::Mutex<VecDeque>`, FIFO eviction, atomic dropped counter).

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::envelope::{DeadLetterMessage, EventEnvelope};

/// Snapshot of dead-letter-queue occupancy, mirroring the teacher's
/// backpressure stats shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub total_messages: usize,
    pub total_evicted: u64,
    pub per_channel: HashMap<String, usize>,
}

struct DlqInner {
    per_channel: HashMap<String, VecDeque<DeadLetterMessage>>,
    total_evicted: u64,
}

/// Holds events that exhausted delivery retries. Bounded two ways at once:
/// a `per_channel_bound` caps any single channel's backlog, and a
/// `global_bound` caps total messages across all channels. Both bounds are
/// enforced under one lock per `send`, so eviction bookkeeping (the queue
/// mutation and the `total_evicted` counter) never goes out of sync (spec
/// §4.9: "eviction bookkeeping is atomic").
pub struct DeadLetterQueue {
    inner: Mutex<DlqInner>,
    per_channel_bound: usize,
    global_bound: usize,
}

impl DeadLetterQueue {
    pub fn new(per_channel_bound: usize, global_bound: usize) -> Self {
        Self {
            inner: Mutex::new(DlqInner {
                per_channel: HashMap::new(),
                total_evicted: 0,
            }),
            per_channel_bound,
            global_bound,
        }
    }

    /// Insert a dead-lettered event, evicting the oldest entry (in the same
    /// channel, then globally) if either bound would be exceeded. Returns
    /// the id assigned to the new entry (spec §4.9 `send`).
    pub fn send(&self, envelope: EventEnvelope, reason: impl Into<String>, error_message: Option<String>) -> String {
        self.push(DeadLetterMessage::new(envelope, reason, error_message))
    }

    /// Insert an already-built `DeadLetterMessage`, applying the same
    /// eviction bounds as `send`. Returns the entry's id.
    pub fn push(&self, message: DeadLetterMessage) -> String {
        let mut inner = self.inner.lock();
        let id = message.id.clone();
        let channel = message.original_envelope.channel.clone();

        let queue = inner.per_channel.entry(channel.clone()).or_default();
        queue.push_back(message);
        if queue.len() > self.per_channel_bound {
            queue.pop_front();
            inner.total_evicted += 1;
        }

        let total: usize = inner.per_channel.values().map(|q| q.len()).sum();
        if total > self.global_bound {
            if let Some(oldest_channel) = inner
                .per_channel
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .min_by_key(|(_, q)| q.front().map(|m| m.received_at))
                .map(|(c, _)| c.clone())
            {
                if let Some(q) = inner.per_channel.get_mut(&oldest_channel) {
                    q.pop_front();
                    inner.total_evicted += 1;
                }
            }
        }

        id
    }

    /// Messages for `channel`, newest first, paginated by `offset`/`limit`
    /// (spec §4.9 `getMessages`).
    pub fn get_messages(&self, channel: &str, offset: usize, limit: usize) -> Vec<DeadLetterMessage> {
        let inner = self.inner.lock();
        inner
            .per_channel
            .get(channel)
            .map(|q| q.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Every dead-lettered message across all channels, newest first.
    pub fn get_all_messages(&self, offset: usize, limit: usize) -> Vec<DeadLetterMessage> {
        let inner = self.inner.lock();
        let mut all: Vec<DeadLetterMessage> = inner.per_channel.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        all.into_iter().skip(offset).take(limit).collect()
    }

    /// Look up a single dead-lettered message by id, regardless of channel.
    pub fn get_message(&self, id: &str) -> Option<DeadLetterMessage> {
        let inner = self.inner.lock();
        inner.per_channel.values().flatten().find(|m| m.id == id).cloned()
    }

    /// Record a retry attempt against `id`: bumps `retry_count` and sets
    /// `last_retry_at`, returning the original envelope so the caller can
    /// republish it (spec §4.9 `retry`: "republish + increment
    /// retryCount"). Republication itself is the caller's responsibility —
    /// the DLQ tracks retry bookkeeping, it doesn't own an `EventBus`.
    pub fn retry(&self, id: &str) -> Option<EventEnvelope> {
        let mut inner = self.inner.lock();
        for queue in inner.per_channel.values_mut() {
            if let Some(entry) = queue.iter_mut().find(|m| m.id == id) {
                entry.retry_count += 1;
                entry.last_retry_at = Some(chrono::Utc::now());
                return Some(entry.original_envelope.clone());
            }
        }
        None
    }

    /// Remove a single dead-lettered message by id. Returns whether it was
    /// present.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        for queue in inner.per_channel.values_mut() {
            if let Some(pos) = queue.iter().position(|m| m.id == id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drop every dead-lettered message across every channel. Does not
    /// affect `total_evicted`, which tracks bound-driven eviction, not
    /// explicit clears.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.per_channel.clear();
    }

    pub fn stats(&self) -> DlqStats {
        let inner = self.inner.lock();
        let per_channel = inner.per_channel.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        let total_messages = inner.per_channel.values().map(|q| q.len()).sum();
        DlqStats {
            total_messages,
            total_evicted: inner.total_evicted,
            per_channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(channel: &str) -> EventEnvelope {
        EventEnvelope::new(channel, "test.event", json!({"x": 1}), None)
    }

    fn dead_letter(channel: &str) -> DeadLetterMessage {
        DeadLetterMessage::new(envelope(channel), "retries exhausted", None)
    }

    #[test]
    fn per_channel_bound_evicts_oldest_in_channel() {
        let dlq = DeadLetterQueue::new(2, 100);
        dlq.push(dead_letter("a"));
        dlq.push(dead_letter("a"));
        dlq.push(dead_letter("a"));
        assert_eq!(dlq.stats().per_channel["a"], 2);
        assert_eq!(dlq.stats().total_evicted, 1);
    }

    #[test]
    fn messages_are_returned_newest_first() {
        let dlq = DeadLetterQueue::new(10, 100);
        let first_id = dlq.push(dead_letter("a"));
        let second_id = dlq.push(dead_letter("a"));

        let messages = dlq.get_messages("a", 0, 10);
        assert_eq!(messages[0].id, second_id);
        assert_eq!(messages[1].id, first_id);
    }

    #[test]
    fn get_messages_paginates_with_offset_and_limit() {
        let dlq = DeadLetterQueue::new(10, 100);
        for _ in 0..5 {
            dlq.push(dead_letter("a"));
        }
        assert_eq!(dlq.get_messages("a", 0, 2).len(), 2);
        assert_eq!(dlq.get_messages("a", 4, 2).len(), 1);
    }

    #[test]
    fn global_bound_evicts_across_channels() {
        let dlq = DeadLetterQueue::new(10, 2);
        dlq.push(dead_letter("a"));
        dlq.push(dead_letter("b"));
        dlq.push(dead_letter("c"));
        let stats = dlq.stats();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_evicted, 1);
    }

    #[test]
    fn get_message_finds_entry_by_id_across_channels() {
        let dlq = DeadLetterQueue::new(10, 100);
        let id = dlq.push(dead_letter("a"));
        let found = dlq.get_message(&id).unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn retry_bumps_retry_count_and_returns_the_envelope() {
        let dlq = DeadLetterQueue::new(10, 100);
        let id = dlq.push(dead_letter("a"));
        let envelope = dlq.retry(&id).unwrap();
        assert_eq!(envelope.channel, "a");
        let found = dlq.get_message(&id).unwrap();
        assert_eq!(found.retry_count, 1);
        assert!(found.last_retry_at.is_some());
    }

    #[test]
    fn delete_removes_a_single_message() {
        let dlq = DeadLetterQueue::new(10, 100);
        let id = dlq.push(dead_letter("a"));
        assert!(dlq.delete(&id));
        assert!(dlq.get_message(&id).is_none());
        assert!(!dlq.delete(&id));
    }

    #[test]
    fn clear_drops_every_channel() {
        let dlq = DeadLetterQueue::new(10, 100);
        dlq.push(dead_letter("a"));
        dlq.push(dead_letter("b"));
        dlq.clear();
        assert_eq!(dlq.stats().total_messages, 0);
    }

    #[test]
    fn get_all_messages_spans_channels_newest_first() {
        let dlq = DeadLetterQueue::new(10, 100);
        let first_id = dlq.push(dead_letter("a"));
        let second_id = dlq.push(dead_letter("b"));
        let all = dlq.get_all_messages(0, 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second_id);
        assert_eq!(all[1].id, first_id);
    }
}
