//! The `CheckpointStore` trait (spec §4.10, §6)

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointQuery};
use spice_core::SpiceError;

/// Durable storage for suspended-run checkpoints.
///
/// Implementations must perform `save` as a single atomic operation: the
/// checkpoint write and any index update (e.g. "latest checkpoint for
/// this run_id") happen together or not at all, so a concurrent `load`
/// never observes an index pointing at a checkpoint that isn't there yet
/// (spec §3 "write and associated index updates occur in one atomic
/// operation").
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), SpiceError>;

    async fn load(&self, query: &CheckpointQuery) -> Result<Option<Checkpoint>, SpiceError>;

    /// All checkpoints recorded for a run, oldest first.
    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, SpiceError>;

    /// Remove every checkpoint for a run, e.g. once it reaches a terminal
    /// state and no further resume is possible.
    async fn clear(&self, run_id: &str) -> Result<(), SpiceError>;
}
