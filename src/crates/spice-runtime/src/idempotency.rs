//! `IdempotencyStore` (spec §3 "IdempotencyKey / Entry", §4.7)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use spice_core::Message;

/// `(run_id, node_id, intent_signature)` — the compound key a node's
/// attempted side effect is deduplicated on (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub run_id: String,
    pub node_id: String,
    pub intent_signature: String,
}

impl IdempotencyKey {
    pub fn from_message(message: &Message) -> Option<Self> {
        Some(Self {
            run_id: message.run_id.clone()?,
            node_id: message.node_id.clone()?,
            intent_signature: message.intent_signature(),
        })
    }
}

/// A recorded node execution, replayed verbatim on a duplicate attempt
/// (spec §4.7: "exactly-once step semantics").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub result: Message,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyEntry>;
    async fn put(&self, key: IdempotencyKey, entry: IdempotencyEntry);
}

/// In-process idempotency store with an optional TTL-based eviction sweep.
/// A lookup failure (e.g. a backing store timing out in a networked
/// implementation) is treated by callers as a cache miss and logged, never
/// as a reason to fail the run (spec §9 open question (iii)) — this
/// in-memory implementation simply never fails.
pub struct InMemoryIdempotencyStore {
    entries: DashMap<IdempotencyKey, IdempotencyEntry>,
    ttl: Option<Duration>,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn shared(ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self::new(ttl))
    }

    fn is_expired(&self, entry: &IdempotencyEntry) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let age = chrono::Utc::now() - entry.recorded_at;
                age.to_std().map(|d| d > ttl).unwrap_or(false)
            }
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyEntry> {
        let entry = self.entries.get(key)?;
        if self.is_expired(&entry) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    async fn put(&self, key: IdempotencyKey, entry: IdempotencyEntry) {
        self.entries.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spice_core::{ExecutionState, Role};

    fn msg() -> Message {
        Message::new("x", Role::User)
            .with_coordinates("g", "n", "r")
            .transition_to(ExecutionState::Running, "entry", None)
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryIdempotencyStore::new(None);
        let key = IdempotencyKey::from_message(&msg()).unwrap();
        store
            .put(key.clone(), IdempotencyEntry { result: msg(), recorded_at: chrono::Utc::now() })
            .await;
        assert!(store.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_a_miss() {
        let store = InMemoryIdempotencyStore::new(Some(Duration::from_millis(0)));
        let key = IdempotencyKey::from_message(&msg()).unwrap();
        let recorded_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.put(key.clone(), IdempotencyEntry { result: msg(), recorded_at }).await;
        assert!(store.get(&key).await.is_none());
    }
}
