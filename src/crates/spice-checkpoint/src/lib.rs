//! Durable checkpoint storage for suspended spice graph runs (spec §4.10).

pub mod checkpoint;
pub mod memory;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointQuery};
pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
