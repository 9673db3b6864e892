//! `GraphRunner`: the execution loop, idempotency store, and middleware
//! pipeline driving a spice graph from `READY` to a terminal state,
//! including the human-in-the-loop suspend/resume protocol (spec §4.3,
//! §4.7, §4.10).

pub mod config;
pub mod idempotency;
pub mod middleware;
pub mod retry;
pub mod runner;

pub use config::{DlqConfig, IdempotencyConfig, RunnerConfig};
pub use idempotency::{IdempotencyEntry, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore};
pub use middleware::{ErrorAction, LoggingMiddleware, Middleware, TimeoutMiddleware};
pub use retry::RetryPolicy;
pub use runner::{GraphRunner, HumanResponse};
