//! In-process `CheckpointStore` implementation, grounded on the teacher's
//! `InMemoryCheckpointSaver` (thread-isolated `Arc<RwLock<HashMap>>>`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointQuery};
use crate::traits::CheckpointStore;
use spice_core::SpiceError;

/// Checkpoints keyed by `run_id`, newest last. A single `RwLock` guards
/// both the per-run vector and its implicit "latest" pointer (the vector's
/// tail) so `save` is atomic with respect to `load` (spec §3).
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), SpiceError> {
        let mut runs = self.runs.write();
        runs.entry(checkpoint.run_id.clone()).or_default().push(checkpoint);
        Ok(())
    }

    async fn load(&self, query: &CheckpointQuery) -> Result<Option<Checkpoint>, SpiceError> {
        let runs = self.runs.read();
        let Some(history) = runs.get(&query.run_id) else {
            return Ok(None);
        };
        let found = match &query.checkpoint_id {
            Some(id) => history.iter().find(|c| &c.id == id),
            None => history.last(),
        };
        Ok(found.cloned())
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, SpiceError> {
        let runs = self.runs.read();
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, run_id: &str) -> Result<(), SpiceError> {
        self.runs.write().remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spice_core::{ExecutionState, Message, Role};

    fn suspended_message(run_id: &str) -> Message {
        Message::new("x", Role::User)
            .with_coordinates("g1", "ask", run_id)
            .transition_to(ExecutionState::Running, "entry", None)
            .unwrap()
            .transition_to(ExecutionState::Waiting, "hitl", Some("ask".into()))
            .unwrap()
    }

    #[tokio::test]
    async fn load_latest_returns_most_recent_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let first = Checkpoint::from_suspended(suspended_message("run-1"), Default::default()).unwrap();
        let second = Checkpoint::from_suspended(suspended_message("run-1"), Default::default()).unwrap();
        let second_id = second.id.clone();
        store.save(first).await.unwrap();
        store.save(second).await.unwrap();

        let loaded = store.load(&CheckpointQuery::latest("run-1")).await.unwrap().unwrap();
        assert_eq!(loaded.id, second_id);
    }

    #[tokio::test]
    async fn load_unknown_run_returns_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load(&CheckpointQuery::latest("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_all_history() {
        let store = InMemoryCheckpointStore::new();
        let cp = Checkpoint::from_suspended(suspended_message("run-2"), Default::default()).unwrap();
        store.save(cp).await.unwrap();
        store.clear("run-2").await.unwrap();
        assert!(store.history("run-2").await.unwrap().is_empty());
    }
}
