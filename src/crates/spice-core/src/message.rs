//! The `Message` envelope — the unit of flow through a graph (spec §3)
//!
//! A `Message` is an immutable snapshot: every mutating operation
//! (`transition_to`, `with_data`, `merge_context`, ...) takes `&self` and
//! returns a new `Message`, matching spec §3 invariant (c). Nothing in this
//! crate exposes a `&mut Message` mutator for that reason.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SpiceError;
use crate::state_machine::{ExecutionState, ExecutionStateMachine, StateTransition};
use crate::value::ValueMap;

/// Logical role of the party that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Agent,
}

/// Payload kind. `Media(String)` covers the media subtypes spec §3 lists
/// without without enumerating (`image`, `audio`, ...) — the inner string
/// names the concrete subtype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    System,
    ToolCall,
    ToolResult,
    Error,
    Data,
    Prompt,
    Result,
    Interrupt,
    Resume,
    Media(String),
}

/// A pending or completed tool invocation attached to a message (spec §3,
/// §3 invariant e).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ValueMap,
}

/// The unit of flow through a graph (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub thread: Option<String>,
    pub parent_id: Option<String>,
    pub data: ValueMap,
    pub context: Option<ValueMap>,
    pub graph_id: Option<String>,
    pub node_id: Option<String>,
    pub run_id: Option<String>,
    pub state: ExecutionState,
    pub state_history: Vec<StateTransition>,
    pub tool_calls: Vec<ToolCall>,
    pub priority: i32,
    pub ttl: Option<chrono::Duration>,
    pub expires_at: Option<DateTime<Utc>>,
    pub encrypted: bool,
}

impl Message {
    /// Build a new message in `READY` state, as an external driver would
    /// before calling `GraphRunner::execute` (spec §2).
    pub fn new(content: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            from: None,
            to: None,
            role,
            kind: MessageType::Text,
            timestamp: Utc::now(),
            conversation_id: None,
            thread: None,
            parent_id: None,
            data: HashMap::new(),
            context: None,
            graph_id: None,
            node_id: None,
            run_id: None,
            state: ExecutionState::Ready,
            state_history: Vec::new(),
            tool_calls: Vec::new(),
            priority: 0,
            ttl: None,
            expires_at: None,
            encrypted: false,
        }
    }

    /// Produce a new `Message` with `state` transitioned to `next`,
    /// appending a history entry (spec §4.1 `transitionTo`). Fails with
    /// `SpiceError::Validation` if the transition is not legal, per the
    /// machine's table.
    pub fn transition_to(
        &self,
        next: ExecutionState,
        reason: impl Into<String>,
        node_id: Option<String>,
    ) -> Result<Self, SpiceError> {
        let machine = ExecutionStateMachine::new();
        let entry = machine.transition(self.state, next, reason, node_id.clone())?;
        let mut out = self.clone();
        out.state = next;
        out.state_history.push(entry);
        if let Some(n) = node_id {
            out.node_id = Some(n);
        }
        Ok(out)
    }

    /// Merge `incoming` into `context`, additive and collision-wins-for-incoming
    /// (spec §3 invariant d, §4.10 step 3).
    pub fn merge_context(&self, incoming: &ValueMap) -> Self {
        let mut out = self.clone();
        let mut ctx = out.context.take().unwrap_or_default();
        for (k, v) in incoming {
            ctx.insert(k.clone(), v.clone());
        }
        out.context = Some(ctx);
        out
    }

    /// Replace `data`, returning a new snapshot.
    pub fn with_data(&self, data: ValueMap) -> Self {
        let mut out = self.clone();
        out.data = data;
        out
    }

    /// Attach one tool call, returning a new snapshot (spec §3 invariant e:
    /// nodes that support tool calls attach one per emitted call).
    pub fn with_tool_call(&self, call: ToolCall) -> Self {
        let mut out = self.clone();
        out.tool_calls.push(call);
        out
    }

    /// Bind graph coordinates, as the runner does on first entry (spec
    /// §4.3 step 5).
    pub fn with_coordinates(
        &self,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let mut out = self.clone();
        out.graph_id = Some(graph_id.into());
        out.node_id = Some(node_id.into());
        out.run_id = Some(run_id.into());
        out
    }

    /// The idempotency `intentSignature`: an explicit `intentSignature` or
    /// `intent` field in `data` if present, else `hash(content.take(100))`
    /// (spec §3, "IdempotencyKey / Entry").
    pub fn intent_signature(&self) -> String {
        if let Some(v) = self.data.get("intentSignature").or_else(|| self.data.get("intent")) {
            if let Some(s) = v.as_str() {
                return s.to_string();
            }
            return v.to_string();
        }
        let prefix: String = self.content.chars().take(100).collect();
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transition_to_appends_history_and_preserves_immutability() {
        let msg = Message::new("ping", Role::User);
        let next = msg.transition_to(ExecutionState::Running, "entry", Some("a".into())).unwrap();
        assert_eq!(msg.state, ExecutionState::Ready);
        assert_eq!(next.state, ExecutionState::Running);
        assert_eq!(next.state_history.len(), 1);
        assert_eq!(next.node_id.as_deref(), Some("a"));
    }

    #[test]
    fn merge_context_is_additive_and_incoming_wins() {
        let msg = Message::new("x", Role::User).merge_context(&ValueMap::from([
            ("tenantId".to_string(), json!("t1")),
            ("userId".to_string(), json!("u1")),
        ]));
        let resumed = msg.merge_context(&ValueMap::from([("selected_id".to_string(), json!("X"))]));
        let ctx = resumed.context.unwrap();
        assert_eq!(ctx["tenantId"], json!("t1"));
        assert_eq!(ctx["selected_id"], json!("X"));
    }

    #[test]
    fn intent_signature_prefers_explicit_field() {
        let msg = Message::new("hello world", Role::User)
            .with_data(ValueMap::from([("intentSignature".to_string(), json!("manual-sig"))]));
        assert_eq!(msg.intent_signature(), "manual-sig");
    }

    #[test]
    fn intent_signature_falls_back_to_content_hash() {
        let a = Message::new("same content", Role::User);
        let b = Message::new("same content", Role::User);
        assert_eq!(a.intent_signature(), b.intent_signature());
        let c = Message::new("different content", Role::User);
        assert_ne!(a.intent_signature(), c.intent_signature());
    }
}
