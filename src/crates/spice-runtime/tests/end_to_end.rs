//! End-to-end scenarios exercising `GraphRunner` against real
//! `spice-checkpoint`/`spice-events` implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spice_checkpoint::InMemoryCheckpointStore;
use spice_core::{
    AgentNode, Edge, ExecutionState, Graph, HumanNode, Message, Node, NodeFn, Role, SpiceError, END,
};
use spice_events::{DeadLetterQueue, EventBus, EventBusConfig};
use spice_runtime::{GraphRunner, HumanResponse, InMemoryIdempotencyStore, RunnerConfig};

fn new_runner() -> GraphRunner {
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let idempotency = InMemoryIdempotencyStore::shared(None);
    let dlq = Arc::new(DeadLetterQueue::new(100, 1000));
    let bus = Arc::new(EventBus::new(dlq, EventBusConfig::default()));
    GraphRunner::new(checkpoints, idempotency, bus, RunnerConfig::default())
}

fn echo_node(id: &str) -> Arc<dyn Node> {
    let f: NodeFn = Arc::new(|m: Message| {
        Box::pin(async move { m.transition_to(ExecutionState::Running, "echo", None) })
    });
    Arc::new(AgentNode::new(id, f))
}

/// Scenario A: a straight-line graph runs start-to-finish and reaches
/// `COMPLETED` with a monotonic state history.
#[tokio::test]
async fn scenario_a_linear_graph_completes() {
    let mut graph = Graph::new("linear", "a");
    graph.add_node(echo_node("a"));
    graph.add_node(echo_node("b"));
    graph.add_edge(Edge::new("a", "b"));
    graph.add_edge(Edge::new("b", END));

    let runner = new_runner();
    let msg = Message::new("hello", Role::User);
    let out = runner.execute(&graph, msg).await.unwrap();

    assert_eq!(out.state, ExecutionState::Completed);
    assert!(out.state_history.windows(2).all(|w| w[0].to == w[1].from));
}

/// Scenario B: a `HumanNode` suspends the run, a checkpoint is persisted,
/// and `resume` carries the human's answer through to completion.
#[tokio::test]
async fn scenario_b_hitl_suspend_then_resume_completes() {
    let mut graph = Graph::new("hitl", "ask");
    graph.add_node(Arc::new(HumanNode::new("ask", "pick a or b", vec!["a".into(), "b".into()])));
    graph.add_node(echo_node("after"));
    graph.add_edge(Edge::new("ask", "after"));
    graph.add_edge(Edge::new("after", END));

    let runner = new_runner();
    let msg = Message::new("start", Role::User);
    let suspended = runner.execute(&graph, msg).await.unwrap();
    assert_eq!(suspended.state, ExecutionState::Waiting);

    let request: spice_core::HitlRequest =
        serde_json::from_value(suspended.data["hitl_request"].clone()).unwrap();

    let response = HumanResponse {
        tool_call_id: request.tool_call_id,
        content: "a".to_string(),
        metadata: spice_core::ValueMap::from([("selected".to_string(), serde_json::json!("a"))]),
    };
    let completed = runner.resume(&graph, suspended.clone(), response).await.unwrap();

    assert_eq!(completed.state, ExecutionState::Completed);
    assert_eq!(completed.context.unwrap()["selected"], serde_json::json!("a"));
}

/// Scenario C: a duplicate idempotency key skips re-executing the node's
/// side effect (exactly-once step semantics, spec §4.7).
#[tokio::test]
async fn scenario_c_idempotent_replay_skips_side_effect() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    struct CountingNode {
        id: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Node for CountingNode {
        fn id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> spice_core::NodeKind {
            spice_core::NodeKind::Agent
        }
        async fn run(&self, message: Message) -> Result<Message, SpiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            message.transition_to(ExecutionState::Running, "counted", None)
        }
    }

    let mut graph = Graph::new("idem", "a");
    graph.add_node(Arc::new(CountingNode { id: "a".into(), calls: calls_clone }));
    graph.add_edge(Edge::new("a", END));

    let runner = new_runner();
    let run_id = "fixed-run".to_string();
    let msg = Message::new("same content", Role::User)
        .with_data(spice_core::ValueMap::from([(
            "intentSignature".to_string(),
            serde_json::json!("fixed-intent"),
        )]))
        .with_coordinates("idem", "a", run_id.clone())
        .transition_to(ExecutionState::Running, "seed", None)
        .unwrap();

    runner.execute(&graph, msg.clone()).await.unwrap();
    runner.execute(&graph, msg).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Scenario D: a parallel fan-out merges branch data under the Namespace
/// policy and reports branch success counts.
#[tokio::test]
async fn scenario_d_parallel_fan_out_merges_under_namespace() {
    use spice_core::MergePolicy;
    use std::collections::HashMap;

    let mut branches: HashMap<String, Arc<dyn Node>> = HashMap::new();
    branches.insert("left".into(), echo_node("left"));
    branches.insert("right".into(), echo_node("right"));
    let parallel = spice_core::ParallelNode::new("fan", branches, MergePolicy::Namespace, false).unwrap();

    let mut graph = Graph::new("par", "fan");
    graph.add_node(Arc::new(parallel));
    graph.add_edge(Edge::new("fan", END));

    let runner = new_runner();
    let msg = Message::new("go", Role::User);
    let out = runner.execute(&graph, msg).await.unwrap();

    assert_eq!(out.state, ExecutionState::Completed);
    assert_eq!(out.data["parallelSuccessCount"], serde_json::json!(2));
}

/// Scenario E: a node that fails with a recoverable error is retried and
/// eventually succeeds without the run ever entering `FAILED`.
#[tokio::test]
async fn scenario_e_recoverable_error_is_retried_then_succeeds() {
    struct FlakyNode {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Node for FlakyNode {
        fn id(&self) -> &str {
            "flaky"
        }
        fn kind(&self) -> spice_core::NodeKind {
            spice_core::NodeKind::Agent
        }
        async fn run(&self, message: Message) -> Result<Message, SpiceError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(SpiceError::network("connection reset"));
            }
            message.transition_to(ExecutionState::Running, "finally", None)
        }
    }

    let mut graph = Graph::new("retry", "flaky");
    graph.add_node(Arc::new(FlakyNode { attempts: Arc::new(AtomicUsize::new(0)) }));
    graph.add_edge(Edge::new("flaky", END));

    let mut config = RunnerConfig::default();
    config.retry_policy.max_attempts = 5;
    config.retry_policy.base_delay = std::time::Duration::from_millis(1);
    config.retry_policy.max_delay = std::time::Duration::from_millis(2);

    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let idempotency = InMemoryIdempotencyStore::shared(None);
    let dlq = Arc::new(DeadLetterQueue::new(100, 1000));
    let bus = Arc::new(EventBus::new(dlq, EventBusConfig::default()));
    let runner = GraphRunner::new(checkpoints, idempotency, bus, config);

    let msg = Message::new("go", Role::User);
    let out = runner.execute(&graph, msg).await.unwrap();
    assert_eq!(out.state, ExecutionState::Completed);
}

/// A self-looping graph run terminates (rather than spinning forever) once
/// `max_steps` is exhausted, landing in `FAILED`.
#[tokio::test]
async fn run_exceeding_max_steps_terminates_as_failed() {
    let mut graph = Graph::new("loop", "a");
    graph.add_node(echo_node("a"));
    graph.add_edge(Edge::new("a", "a"));

    let mut config = RunnerConfig::default();
    config.max_steps = 3;

    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let idempotency = InMemoryIdempotencyStore::shared(None);
    let dlq = Arc::new(DeadLetterQueue::new(100, 1000));
    let bus = Arc::new(EventBus::new(dlq, EventBusConfig::default()));
    let runner = GraphRunner::new(checkpoints, idempotency, bus, config);

    let msg = Message::new("spin", Role::User);
    let out = runner.execute(&graph, msg).await.unwrap();
    assert_eq!(out.state, ExecutionState::Failed);
}

/// Scenario F: an unrecoverable error transitions the run to `FAILED` with
/// an `ErrorReport` attached, rather than surfacing a bare Rust error.
#[tokio::test]
async fn scenario_f_unrecoverable_error_fails_the_run_with_a_report() {
    struct AlwaysInvalid;

    #[async_trait::async_trait]
    impl Node for AlwaysInvalid {
        fn id(&self) -> &str {
            "bad"
        }
        fn kind(&self) -> spice_core::NodeKind {
            spice_core::NodeKind::Agent
        }
        async fn run(&self, _message: Message) -> Result<Message, SpiceError> {
            Err(SpiceError::validation("schema mismatch"))
        }
    }

    let mut graph = Graph::new("fails", "bad");
    graph.add_node(Arc::new(AlwaysInvalid));
    graph.add_edge(Edge::new("bad", END));

    let runner = new_runner();
    let msg = Message::new("go", Role::User);
    let out = runner.execute(&graph, msg).await.unwrap();

    assert_eq!(out.state, ExecutionState::Failed);
    assert!(out.data.contains_key("error_report"));
}
