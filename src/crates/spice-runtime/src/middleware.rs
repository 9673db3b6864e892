//! The runner's middleware pipeline (spec §4.3 steps 7.f/7.g/7.j)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use spice_core::{Message, SpiceError};

/// What the runner should do after a node raises an error, decided by
/// `Middleware::on_error` (spec §4.3 step 7.j).
#[derive(Debug, Clone)]
pub enum ErrorAction {
    /// Treat the error as fatal: transition the message to `FAILED`,
    /// propagating the node's original error.
    Propagate,
    /// Skip this node: resolve the next edge using the input message,
    /// unchanged, and continue.
    Skip,
    /// Retry the same node, per the runner's `RetryPolicy`.
    Retry,
    /// Swallow the error and continue as if the node had produced this
    /// message instead.
    Fallback(Message),
}

/// Hooks around node execution, run in registration order for `before_node`
/// and `after_node`, and given first-handler-wins semantics for `on_error`
/// (the first middleware to return other than the default passthrough
/// decides the outcome).
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_node(&self, message: Message) -> Result<Message, SpiceError> {
        Ok(message)
    }

    async fn after_node(&self, message: Message) -> Result<Message, SpiceError> {
        Ok(message)
    }

    /// Default: recoverable errors are retried, everything else fails.
    async fn on_error(&self, error: &SpiceError, _message: &Message) -> Option<ErrorAction> {
        if error.is_recoverable() {
            Some(ErrorAction::Retry)
        } else {
            None
        }
    }
}

/// Logs node entry/exit at `tracing` `info`/`debug` level, matching the
/// teacher's instrumentation style in its executor hot paths.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn before_node(&self, message: Message) -> Result<Message, SpiceError> {
        tracing::info!(
            node_id = ?message.node_id,
            run_id = ?message.run_id,
            state = %message.state,
            "node entered"
        );
        Ok(message)
    }

    async fn after_node(&self, message: Message) -> Result<Message, SpiceError> {
        tracing::debug!(
            node_id = ?message.node_id,
            run_id = ?message.run_id,
            state = %message.state,
            "node exited"
        );
        Ok(message)
    }
}

/// Fails a node that has been in `before_node` longer than `limit` by the
/// time `after_node` runs. Tracks entry time per message id rather than
/// per node, so concurrent runs of the same node don't clobber each other.
pub struct TimeoutMiddleware {
    limit: Duration,
    started: dashmap::DashMap<String, Instant>,
}

impl TimeoutMiddleware {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: dashmap::DashMap::new(),
        }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn before_node(&self, message: Message) -> Result<Message, SpiceError> {
        self.started.insert(message.id.clone(), Instant::now());
        Ok(message)
    }

    async fn after_node(&self, message: Message) -> Result<Message, SpiceError> {
        if let Some((_, start)) = self.started.remove(&message.id) {
            if start.elapsed() > self.limit {
                return Err(SpiceError::timeout(format!(
                    "node '{}' exceeded {:?}",
                    message.node_id.as_deref().unwrap_or("?"),
                    self.limit
                )));
            }
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spice_core::Role;

    #[tokio::test]
    async fn logging_middleware_passes_message_through_unchanged() {
        let mw = LoggingMiddleware;
        let msg = Message::new("x", Role::User);
        let out = mw.before_node(msg.clone()).await.unwrap();
        assert_eq!(out.id, msg.id);
    }

    #[tokio::test]
    async fn timeout_middleware_fails_when_limit_exceeded() {
        let mw = TimeoutMiddleware::new(Duration::from_millis(1));
        let msg = Message::new("x", Role::User);
        let msg = mw.before_node(msg).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(mw.after_node(msg).await.is_err());
    }

    #[tokio::test]
    async fn default_on_error_retries_recoverable_errors() {
        struct NoOp;
        #[async_trait]
        impl Middleware for NoOp {}
        let mw = NoOp;
        let msg = Message::new("x", Role::User);
        let action = mw.on_error(&SpiceError::network("down"), &msg).await;
        assert!(matches!(action, Some(ErrorAction::Retry)));
        let action = mw.on_error(&SpiceError::validation("bad"), &msg).await;
        assert!(action.is_none());
    }
}
