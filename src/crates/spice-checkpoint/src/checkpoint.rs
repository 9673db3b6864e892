//! Checkpoint types (spec §3, §4.10)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spice_core::{Message, ValueMap};
use uuid::Uuid;

/// A durable snapshot of a suspended run, written when a `HumanNode`
/// transitions a message to `WAITING` (spec §4.10 step 1: "the runner
/// persists a `Checkpoint` before returning control to the caller").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub graph_id: String,
    pub run_id: String,
    pub node_id: String,
    pub message: Message,
    pub created_at: DateTime<Utc>,
    pub metadata: ValueMap,
}

impl Checkpoint {
    /// Build a checkpoint from the message a node suspended with. `message`
    /// must already carry `graph_id`/`node_id`/`run_id` (spec §4.2 node
    /// contract) — those are copied onto the checkpoint's own fields so a
    /// store can index by them without deserializing the message.
    pub fn from_suspended(message: Message, metadata: ValueMap) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4().to_string(),
            graph_id: message.graph_id.clone()?,
            run_id: message.run_id.clone()?,
            node_id: message.node_id.clone()?,
            message,
            created_at: Utc::now(),
            metadata,
        })
    }
}

/// Identifies a checkpoint lookup: the most recent checkpoint for a run,
/// or a specific one by id (spec §4.10 step 1 resume lookup).
#[derive(Debug, Clone)]
pub struct CheckpointQuery {
    pub run_id: String,
    pub checkpoint_id: Option<String>,
}

impl CheckpointQuery {
    pub fn latest(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            checkpoint_id: None,
        }
    }

    pub fn specific(run_id: impl Into<String>, checkpoint_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }
}
