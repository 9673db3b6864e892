//! Event bus and dead-letter queue for the spice orchestration engine
//! (spec §4.8, §4.9).

pub mod bus;
pub mod dlq;
pub mod envelope;

pub use bus::{EventBus, EventBusConfig};
pub use dlq::{DeadLetterQueue, DlqStats};
pub use envelope::{DeadLetterMessage, EventEnvelope};
