//! Node contract and variants (spec §3, §4.2)
//!
//! A node's sole public operation is `run(message) -> Result<Message, Error>`.
//! The contract a node must uphold (spec §4.2):
//!
//! - returns a message whose `graph_id`, `node_id`, `run_id` equal the
//!   inputs';
//! - if it suspends, the returned message has state `WAITING` and carries
//!   a `HITLRequest`; otherwise state is `RUNNING` or a terminal state;
//! - never mutates the input — `Message` is pass-by-value;
//! - on recoverable failure returns `Err`, never panics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::SpiceError;
use crate::message::{Message, ToolCall};
use crate::state_machine::ExecutionState;
use crate::value::{SpiceValue, ValueMap};

/// A boxed, `'static` future, matching the teacher's node-executor shape.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A node's processing function: takes ownership of a `Message`, returns a
/// new one. Shared via `Arc` so the same executor can be invoked across
/// concurrent runs.
pub type NodeFn = Arc<dyn Fn(Message) -> BoxFuture<Result<Message, SpiceError>> + Send + Sync>;

/// The node kinds the runner must distinguish for routing purposes (spec
/// §3, §9 "collapse to the single `Node` contract plus a tagged variant").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Agent,
    Tool,
    Human,
    Parallel,
    Conditional,
}

/// A request for human input, stored in `Message::data` under the key
/// `hitl_request` when a `HumanNode` suspends (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequest {
    pub prompt: String,
    pub options: Vec<String>,
    pub tool_call_id: String,
    pub invocation_index: u32,
    pub timeout_ms: Option<u64>,
}

/// Sole public operation every node implements (spec §4.2).
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> NodeKind;
    async fn run(&self, message: Message) -> Result<Message, SpiceError>;
}

/// Opaque processor — an LLM call or any custom transformation that
/// doesn't itself affect routing (spec §3).
pub struct AgentNode {
    id: String,
    executor: NodeFn,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, executor: NodeFn) -> Self {
        Self { id: id.into(), executor }
    }
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn run(&self, message: Message) -> Result<Message, SpiceError> {
        (self.executor)(message).await
    }
}

/// Attaches a structured tool call to the message (spec §3).
pub struct ToolNode {
    id: String,
    tool_name: String,
    build_arguments: Arc<dyn Fn(&Message) -> ValueMap + Send + Sync>,
}

impl ToolNode {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        build_arguments: Arc<dyn Fn(&Message) -> ValueMap + Send + Sync>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            build_arguments,
        }
    }
}

#[async_trait]
impl Node for ToolNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Tool
    }

    async fn run(&self, message: Message) -> Result<Message, SpiceError> {
        let arguments = (self.build_arguments)(&message);
        let call = ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.tool_name.clone(),
            arguments,
        };
        let out = message.with_tool_call(call);
        out.transition_to(ExecutionState::Running, format!("tool call via '{}'", self.id), Some(self.id.clone()))
    }
}

/// Returns the incoming message transitioned to `WAITING` carrying a
/// `HitlRequest` (spec §3, §4.10). `invocation_index` tracks repeat
/// suspensions of the same node within one run (spec §4.10, last
/// paragraph): each `(run_id, node_id)` pair starts at 0 and increments on
/// every subsequent suspension.
pub struct HumanNode {
    id: String,
    prompt: String,
    options: Vec<String>,
    timeout_ms: Option<u64>,
    invocations: DashMap<String, u32>,
}

impl HumanNode {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options,
            timeout_ms: None,
            invocations: DashMap::new(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// The stable HITL tool-call id for a run: `hitl_{run_id}_{node_id}_{invocation_index}`
    /// (spec §4.10, §6).
    pub fn tool_call_id(run_id: &str, node_id: &str, invocation_index: u32) -> String {
        format!("hitl_{run_id}_{node_id}_{invocation_index}")
    }
}

#[async_trait]
impl Node for HumanNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Human
    }

    async fn run(&self, message: Message) -> Result<Message, SpiceError> {
        let run_id = message
            .run_id
            .clone()
            .ok_or_else(|| SpiceError::execution("HumanNode requires a bound run_id"))?;
        let invocation_index = {
            let mut entry = self.invocations.entry(run_id.clone()).or_insert(0);
            let idx = *entry;
            *entry += 1;
            idx
        };
        let tool_call_id = Self::tool_call_id(&run_id, &self.id, invocation_index);
        let request = HitlRequest {
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            tool_call_id: tool_call_id.clone(),
            invocation_index,
            timeout_ms: self.timeout_ms,
        };
        let mut data = message.data.clone();
        data.insert("hitl_request".to_string(), serde_json::to_value(&request)?);
        let out = message.with_data(data);
        out.transition_to(ExecutionState::Waiting, format!("awaiting human input at '{}'", self.id), Some(self.id.clone()))
    }
}

/// How a `ParallelNode` aggregates per-branch metadata (spec §4.5).
pub enum MergePolicy {
    /// `parallel.{nodeId}.{branchId}.{k}` namespacing; `ExecutionContext`
    /// fields are excluded to preserve consistency.
    Namespace,
    /// Later branches (lexicographic branch-id order, spec §9 open
    /// question (ii)) overwrite earlier ones.
    LastWrite,
    /// First branch to set a key wins.
    FirstWrite,
    /// Per-key aggregator functions plus a fallback strategy.
    Custom {
        aggregators: HashMap<String, Arc<dyn Fn(&SpiceValue, &SpiceValue) -> SpiceValue + Send + Sync>>,
        default_strategy: CustomDefaultStrategy,
    },
}

/// Fallback behavior for `MergePolicy::Custom` when a key has no explicit
/// aggregator and appears in more than one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomDefaultStrategy {
    Fail,
    LastWrite,
    FirstWrite,
    Ignore,
}

/// Keys from `Message::context` that Namespace policy never renames, so a
/// parallel fan-out doesn't fracture execution-scoped identifiers (spec §4.5).
const CONTEXT_RESERVED_KEYS: [&str; 4] = ["tenantId", "userId", "correlationId", "agentId"];

/// Fans out to N branches concurrently and aggregates per `MergePolicy`
/// (spec §3, §4.5).
pub struct ParallelNode {
    id: String,
    branches: Vec<(String, Arc<dyn Node>)>,
    merge_policy: MergePolicy,
    fail_fast: bool,
}

impl ParallelNode {
    pub fn new(
        id: impl Into<String>,
        branches: HashMap<String, Arc<dyn Node>>,
        merge_policy: MergePolicy,
        fail_fast: bool,
    ) -> Result<Self, SpiceError> {
        if branches.is_empty() {
            return Err(SpiceError::validation("ParallelNode requires at least one branch"));
        }
        if branches.keys().any(|k| k.trim().is_empty()) {
            return Err(SpiceError::validation("ParallelNode branch ids must be non-blank"));
        }
        let mut ordered: Vec<(String, Arc<dyn Node>)> = branches.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            id: id.into(),
            branches: ordered,
            merge_policy,
            fail_fast,
        })
    }
}

#[async_trait]
impl Node for ParallelNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Parallel
    }

    async fn run(&self, message: Message) -> Result<Message, SpiceError> {
        let futures = self.branches.iter().map(|(branch_id, node)| {
            let branch_id = branch_id.clone();
            let node = Arc::clone(node);
            let input = message.clone();
            async move { (branch_id, node.run(input).await) }
        });
        let results = join_all(futures).await;

        if self.fail_fast {
            if let Some((_, Err(e))) = results.iter().find(|(_, r)| r.is_err()) {
                return Err(SpiceError::execution(format!(
                    "ParallelNode '{}' fail_fast: {e}",
                    self.id
                )));
            }
        }

        let mut merged_data = ValueMap::new();
        let mut state_snapshots = ValueMap::new();
        let mut success_count = 0usize;
        let mut failure_count = 0usize;
        let mut branch_outputs: HashMap<String, Message> = HashMap::new();

        for (branch_id, result) in results {
            match result {
                Ok(output) => {
                    success_count += 1;
                    state_snapshots.insert(
                        format!("parallel.{}.{}", self.id, branch_id),
                        serde_json::to_value(output.state)?,
                    );
                    merged_data.insert(branch_id.clone(), serde_json::Value::Object(
                        output.data.clone().into_iter().collect(),
                    ));
                    branch_outputs.insert(branch_id, output);
                }
                Err(_) => failure_count += 1,
            }
        }

        // `self.branches` is sorted lexicographically by branch id at
        // construction time; every order-sensitive policy below walks it in
        // that order rather than `branch_outputs` (a `HashMap`, whose
        // iteration order is unspecified) so `LastWrite`/`FirstWrite` are
        // deterministic (spec §9 open question (ii)).
        let ordered_outputs: Vec<(&String, &Message)> = self
            .branches
            .iter()
            .filter_map(|(branch_id, _)| branch_outputs.get(branch_id).map(|m| (branch_id, m)))
            .collect();

        let mut aggregated = ValueMap::new();
        match &self.merge_policy {
            MergePolicy::Namespace => {
                for (branch_id, output) in &ordered_outputs {
                    for (k, v) in &output.data {
                        if CONTEXT_RESERVED_KEYS.contains(&k.as_str()) {
                            aggregated.entry(k.clone()).or_insert_with(|| v.clone());
                            continue;
                        }
                        aggregated.insert(format!("parallel.{}.{}.{}", self.id, branch_id, k), v.clone());
                    }
                }
            }
            MergePolicy::LastWrite => {
                for (_, output) in &ordered_outputs {
                    for (k, v) in &output.data {
                        aggregated.insert(k.clone(), v.clone());
                    }
                }
            }
            MergePolicy::FirstWrite => {
                for (_, output) in &ordered_outputs {
                    for (k, v) in &output.data {
                        aggregated.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            MergePolicy::Custom { aggregators, default_strategy } => {
                let mut seen: HashMap<String, SpiceValue> = HashMap::new();
                for (_, output) in &ordered_outputs {
                    for (k, v) in &output.data {
                        match seen.get(k) {
                            None => {
                                seen.insert(k.clone(), v.clone());
                            }
                            Some(prev) => {
                                let combined = if let Some(agg) = aggregators.get(k) {
                                    agg(prev, v)
                                } else {
                                    match default_strategy {
                                        CustomDefaultStrategy::Fail => {
                                            if prev != v {
                                                return Err(SpiceError::execution(format!(
                                                    "ParallelNode '{}' key '{k}' diverged across branches",
                                                    self.id
                                                )));
                                            }
                                            prev.clone()
                                        }
                                        CustomDefaultStrategy::LastWrite => v.clone(),
                                        CustomDefaultStrategy::FirstWrite => prev.clone(),
                                        CustomDefaultStrategy::Ignore => prev.clone(),
                                    }
                                };
                                seen.insert(k.clone(), combined);
                            }
                        }
                    }
                }
                aggregated = seen;
            }
        }

        aggregated.extend(state_snapshots);
        aggregated.insert("parallelSuccessCount".to_string(), serde_json::json!(success_count));
        aggregated.insert("parallelFailureCount".to_string(), serde_json::json!(failure_count));
        aggregated.insert(
            "parallelBranches".to_string(),
            serde_json::json!(self.branches.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()),
        );
        for (k, v) in merged_data {
            aggregated.entry(k).or_insert(v);
        }

        let out = message.with_data(aggregated);
        out.transition_to(ExecutionState::Running, format!("fan-in at '{}'", self.id), Some(self.id.clone()))
    }
}

/// Thin wrapper used when a node must explicitly select among multiple
/// outputs rather than relying purely on edge conditions (spec §3 — actual
/// routing stays edge-driven).
pub struct ConditionalNode {
    id: String,
    executor: NodeFn,
}

impl ConditionalNode {
    pub fn new(id: impl Into<String>, executor: NodeFn) -> Self {
        Self { id: id.into(), executor }
    }
}

#[async_trait]
impl Node for ConditionalNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Conditional
    }

    async fn run(&self, message: Message) -> Result<Message, SpiceError> {
        (self.executor)(message).await
    }
}
