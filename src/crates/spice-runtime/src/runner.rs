//! `GraphRunner` — the execution loop (spec §4.3) and HITL resume protocol
//! (spec §4.10).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spice_checkpoint::{Checkpoint, CheckpointStore};
use spice_core::{graph::END, ExecutionState, Graph, Message, SpiceError, ValueMap};
use spice_events::EventBus;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::idempotency::{IdempotencyEntry, IdempotencyKey, IdempotencyStore};
use crate::middleware::{ErrorAction, Middleware};

/// The human's answer to a `HitlRequest`, supplied back to `resume`
/// (spec §4.10 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanResponse {
    pub tool_call_id: String,
    pub content: String,
    pub metadata: ValueMap,
}

/// Drives a `Message` through a `Graph`, enforcing idempotency, running the
/// middleware pipeline around every node, publishing lifecycle events, and
/// persisting a checkpoint whenever a node suspends (spec §4.3, §4.10).
pub struct GraphRunner {
    checkpoint_store: Arc<dyn CheckpointStore>,
    idempotency_store: Arc<dyn IdempotencyStore>,
    event_bus: Arc<EventBus>,
    middlewares: Vec<Arc<dyn Middleware>>,
    config: RunnerConfig,
}

impl GraphRunner {
    pub fn new(
        checkpoint_store: Arc<dyn CheckpointStore>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        event_bus: Arc<EventBus>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            checkpoint_store,
            idempotency_store,
            event_bus,
            middlewares: Vec::new(),
            config,
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Start a run at `graph`'s entry point (spec §4.3 steps 1-4):
    /// validate the graph, reject an already-terminal message, transition
    /// `READY -> RUNNING`, publish `run.started`, then hand off to the
    /// shared node loop.
    pub async fn execute(&self, graph: &Graph, message: Message) -> Result<Message, SpiceError> {
        graph.validate()?;

        if message.state.is_terminal() {
            return Err(SpiceError::validation(format!(
                "cannot execute a message already in terminal state {}",
                message.state
            )));
        }

        let run_id = message.run_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = graph.entry_point().to_string();
        let started = message
            .with_coordinates(graph.id.clone(), entry.clone(), run_id.clone())
            .transition_to(ExecutionState::Running, "run started", Some(entry.clone()))?;

        self.publish_run_event(&run_id, "run.started", &started).await;
        self.run_loop(graph, started, entry, &run_id).await
    }

    /// Resume a suspended run with a human's response (spec §4.10, the
    /// fixed 5-step protocol): guard-validate the caller-supplied message
    /// is actually `WAITING`, merge the response's metadata into context,
    /// transition back to `RUNNING`, then continue the node loop from
    /// wherever the resumed node's edges lead.
    pub async fn resume(
        &self,
        graph: &Graph,
        message: Message,
        response: HumanResponse,
    ) -> Result<Message, SpiceError> {
        if message.state != ExecutionState::Waiting {
            return Err(SpiceError::validation(format!(
                "cannot resume a message not in WAITING state (found {})",
                message.state
            )));
        }

        let run_id = message
            .run_id
            .clone()
            .ok_or_else(|| SpiceError::validation("message has no run_id"))?;
        let node_id = message
            .node_id
            .clone()
            .ok_or_else(|| SpiceError::validation("message has no node_id"))?;

        let expected_tool_call_id = message
            .data
            .get("hitl_request")
            .and_then(|v| v.get("tool_call_id"))
            .and_then(|v| v.as_str());
        if expected_tool_call_id.is_some_and(|id| id != response.tool_call_id) {
            return Err(SpiceError::validation(format!(
                "response tool_call_id '{}' does not match the outstanding request",
                response.tool_call_id
            )));
        }

        let mut data = message.data.clone();
        data.insert("human_response".to_string(), serde_json::json!(response.content));
        let merged = message
            .with_data(data)
            .merge_context(&response.metadata)
            .transition_to(ExecutionState::Running, "resumed via human input", Some(node_id.clone()))?;

        self.publish_run_event(&run_id, "run.resumed", &merged).await;

        let next = graph.resolve_edges(&node_id, &merged).into_iter().next();
        match next {
            Some(target) if target != END => self.run_loop(graph, merged, target, &run_id).await,
            _ => {
                let done = merged.transition_to(ExecutionState::Completed, "reached end on resume", Some(node_id))?;
                self.publish_run_event(&run_id, "run.completed", &done).await;
                Ok(done)
            }
        }
    }

    async fn run_loop(
        &self,
        graph: &Graph,
        mut message: Message,
        mut current: String,
        run_id: &str,
    ) -> Result<Message, SpiceError> {
        let mut steps = 0usize;

        loop {
            if steps >= self.config.max_steps {
                let failed = message.transition_to(
                    ExecutionState::Failed,
                    format!("exceeded max_steps ({})", self.config.max_steps),
                    Some(current.clone()),
                )?;
                self.publish_run_event(run_id, "run.failed", &failed).await;
                return Ok(failed);
            }
            steps += 1;

            let node = graph
                .node(&current)
                .ok_or_else(|| SpiceError::execution(format!("node '{current}' not found in graph '{}'", graph.id)))?;

            message = message.with_coordinates(graph.id.clone(), current.clone(), run_id.to_string());

            let idempotency_key = IdempotencyKey::from_message(&message);
            let attempted = if let Some(key) = idempotency_key.clone() {
                match self.idempotency_store.get(&key).await {
                    Some(entry) => {
                        tracing::debug!(node_id = %current, "idempotent replay, skipping node execution");
                        Ok(entry.result)
                    }
                    None => self.execute_node_with_middleware(node.as_ref(), message.clone(), &current).await,
                }
            } else {
                self.execute_node_with_middleware(node.as_ref(), message.clone(), &current).await
            };

            let outcome = match attempted {
                Ok(m) => m,
                Err(err) => return self.fail_run(run_id, &message, &current, err).await,
            };

            if let Some(key) = idempotency_key {
                self.idempotency_store
                    .put(key, IdempotencyEntry { result: outcome.clone(), recorded_at: chrono::Utc::now() })
                    .await;
            }

            message = outcome;
            self.publish_run_event(run_id, "node.completed", &message).await;

            if message.state == ExecutionState::Waiting {
                if let Some(checkpoint) = Checkpoint::from_suspended(message.clone(), ValueMap::new()) {
                    self.checkpoint_store.save(checkpoint).await?;
                }
                self.publish_run_event(run_id, "run.suspended", &message).await;
                return Ok(message);
            }

            if message.state.is_terminal() {
                let event = if message.state == ExecutionState::Completed { "run.completed" } else { "run.failed" };
                self.publish_run_event(run_id, event, &message).await;
                return Ok(message);
            }

            let targets = graph.resolve_edges(&current, &message);
            match targets.into_iter().next() {
                Some(target) if target != END => current = target,
                _ => {
                    message = message.transition_to(ExecutionState::Completed, "reached end", Some(current.clone()))?;
                    self.publish_run_event(run_id, "run.completed", &message).await;
                    return Ok(message);
                }
            }
        }
    }

    async fn execute_node_with_middleware(
        &self,
        node: &dyn spice_core::Node,
        mut message: Message,
        node_id: &str,
    ) -> Result<Message, SpiceError> {
        for mw in &self.middlewares {
            message = mw.before_node(message).await?;
        }

        let mut attempt = 0u32;
        let mut result = loop {
            match node.run(message.clone()).await {
                Ok(out) => break Ok(out),
                Err(err) => {
                    let mut action = None;
                    for mw in &self.middlewares {
                        if let Some(a) = mw.on_error(&err, &message).await {
                            action = Some(a);
                            break;
                        }
                    }
                    let recoverable = err.is_recoverable();
                    let action = action.unwrap_or(if recoverable { ErrorAction::Retry } else { ErrorAction::Propagate });
                    match action {
                        ErrorAction::Retry if self.config.retry_policy.should_retry(attempt) => {
                            let delay = self.config.retry_policy.delay_for(attempt);
                            tracing::warn!(node_id, attempt, ?delay, "retrying node after recoverable error");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        ErrorAction::Retry => break Err(err),
                        ErrorAction::Propagate => break Err(err),
                        ErrorAction::Skip => break Ok(message.clone()),
                        ErrorAction::Fallback(m) => break Ok(m),
                    }
                }
            }
        };

        if let Ok(ref mut out) = result {
            for mw in &self.middlewares {
                *out = mw.after_node(out.clone()).await?;
            }
        }

        result
    }

    /// Transition `message` to `FAILED` with an `ErrorReport` attached
    /// (spec §4.3 step 7.j, §7), publish `run.failed`, and return it as a
    /// normal (non-`Err`) result — a failed run is a terminal outcome the
    /// caller inspects via `Message::state`, not a Rust-level error.
    async fn fail_run(
        &self,
        run_id: &str,
        message: &Message,
        node_id: &str,
        err: SpiceError,
    ) -> Result<Message, SpiceError> {
        let report = spice_core::ErrorReport::from(&err);
        let mut data = message.data.clone();
        data.insert("error_report".to_string(), serde_json::to_value(&report)?);
        let failed = message
            .with_data(data)
            .transition_to(ExecutionState::Failed, err.to_string(), Some(node_id.to_string()))?;
        self.publish_run_event(run_id, "run.failed", &failed).await;
        Ok(failed)
    }

    /// Publishes `event_type` (e.g. `"run.started"`) on the runner's
    /// shared `"graph.runs"` channel (spec §3: channel and event type are
    /// independent fields on the wire envelope, not one overloaded string).
    async fn publish_run_event(&self, run_id: &str, event_type: &str, message: &Message) {
        let payload = serde_json::json!({
            "run_id": run_id,
            "node_id": message.node_id,
            "state": message.state.to_string(),
            "message_id": message.id,
        });
        self.event_bus.publish("graph.runs", event_type, payload, Some(run_id.to_string())).await;
    }
}
