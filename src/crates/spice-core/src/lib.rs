//! Core types shared across the spice orchestration engine: the `Message`
//! envelope, its `ExecutionStateMachine`, the `Node` contract and its
//! variants, the `Graph`/`Edge` model, the closed-set `SpiceValue`, and the
//! flat `SpiceError` taxonomy.

pub mod error;
pub mod graph;
pub mod message;
pub mod node;
pub mod state_machine;
pub mod value;

pub use error::{ErrorReport, SpiceError};
pub use graph::{Edge, Graph, END, START, WILDCARD_SOURCE};
pub use message::{Message, MessageType, Role, ToolCall};
pub use node::{
    AgentNode, BoxFuture, ConditionalNode, CustomDefaultStrategy, HitlRequest, HumanNode,
    MergePolicy, Node, NodeFn, NodeKind, ParallelNode, ToolNode,
};
pub use state_machine::{ExecutionState, ExecutionStateMachine, StateTransition};
pub use value::{merge_value_maps, SpiceValue, ValueMap};
