//! Graph definition, edge resolution, and structural validation (spec §3, §4.4, §4.6)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::SpiceError;
use crate::message::Message;
use crate::node::Node;

/// Sentinel entry point, mirroring the teacher's `START`/`END` convention.
pub const START: &str = "__start__";
/// Sentinel terminal target. An edge routing to `END` tells the runner the
/// run is done rather than naming another node.
pub const END: &str = "__end__";

/// Wildcard source: an edge with `from == WILDCARD_SOURCE` matches a
/// message leaving any node (spec §3).
pub const WILDCARD_SOURCE: &str = "*";

/// A directed connection between two nodes (spec §3).
///
/// `condition` is evaluated against the message leaving `from`; an edge
/// with no condition is a wildcard that matches unconditionally.
/// `from == "*"` matches any source node. `priority` breaks ties among
/// edges that all match; edges sort **ascending** by priority, so the
/// lowest-numbered priority is tried first (spec §4.4 step 3, §8
/// invariant #3), with ties broken by insertion order. `is_fallback`
/// edges are only considered when no non-fallback edge out of the same
/// node matches (spec §4.4 steps 1-4).
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<Arc<dyn Fn(&Message) -> bool + Send + Sync>>,
    pub priority: i32,
    pub is_fallback: bool,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            priority: 0,
            is_fallback: false,
        }
    }

    pub fn with_condition(mut self, condition: Arc<dyn Fn(&Message) -> bool + Send + Sync>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }

    fn from_matches(&self, node_id: &str) -> bool {
        self.from == node_id || self.from == WILDCARD_SOURCE
    }

    fn matches(&self, message: &Message) -> bool {
        match &self.condition {
            Some(cond) => cond(message),
            None => true,
        }
    }
}

/// A directed graph of nodes, ready to be driven by a `GraphRunner` (spec
/// §3, §4.4).
pub struct Graph {
    pub id: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry_point: String,
    allow_cycles: bool,
}

impl Graph {
    pub fn new(id: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry_point: entry_point.into(),
            allow_cycles: true,
        }
    }

    /// Controls whether `validate` rejects graphs containing a cycle (spec
    /// §4.6(c), §8 invariant #8). Defaults to `true` — most graphs are
    /// expected to loop (retry edges, human-in-the-loop re-ask) and are
    /// instead bounded by the runner's `max_steps`.
    pub fn set_allow_cycles(&mut self, allow: bool) -> &mut Self {
        self.allow_cycles = allow;
        self
    }

    pub fn add_node(&mut self, node: Arc<dyn Node>) -> &mut Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Structural validation (spec §4.6): the entry point must resolve to a
    /// real node, every edge's endpoints must exist (`END` excepted on the
    /// `to` side), and every non-entry node must be reachable from the
    /// entry point. Unreachable nodes are reported as errors rather than a
    /// silent warning — a graph that can never run a node is a build-time
    /// mistake, not a runtime concern.
    pub fn validate(&self) -> Result<(), SpiceError> {
        if !self.nodes.contains_key(&self.entry_point) {
            return Err(SpiceError::validation(format!(
                "entry point '{}' does not name a node in graph '{}'",
                self.entry_point, self.id
            )));
        }

        for edge in &self.edges {
            if edge.from != WILDCARD_SOURCE && !self.nodes.contains_key(&edge.from) {
                return Err(SpiceError::validation(format!(
                    "edge references unknown source node '{}'",
                    edge.from
                )));
            }
            if edge.to != END && !self.nodes.contains_key(&edge.to) {
                return Err(SpiceError::validation(format!(
                    "edge references unknown target node '{}'",
                    edge.to
                )));
            }
        }

        let reachable = self.reachable_from(&self.entry_point);
        for id in self.nodes.keys() {
            if !reachable.contains(id) {
                return Err(SpiceError::validation(format!(
                    "node '{id}' is unreachable from entry point '{}'",
                    self.entry_point
                )));
            }
        }

        if !self.allow_cycles {
            if let Some(back_edge_at) = self.find_cycle() {
                return Err(SpiceError::validation(format!(
                    "graph '{}' does not allow cycles, but node '{back_edge_at}' reaches itself",
                    self.id
                )));
            }
        }

        Ok(())
    }

    fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in &self.edges {
                if edge.from_matches(&id) && edge.to != END && !seen.contains(&edge.to) {
                    stack.push(edge.to.clone());
                }
            }
        }
        seen
    }

    /// DFS back-edge detection over the node graph, treating wildcard
    /// (`from == "*"`) edges as an edge from every node. Returns the node
    /// at which a back-edge (a node reachable from itself) was found, or
    /// `None` if the graph is acyclic. Never invokes a node.
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<String, Mark> = HashMap::new();

        fn visit(
            graph: &Graph,
            id: &str,
            marks: &mut HashMap<String, Mark>,
        ) -> Option<String> {
            match marks.get(id) {
                Some(Mark::Visiting) => return Some(id.to_string()),
                Some(Mark::Done) => return None,
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);
            for edge in &graph.edges {
                if edge.from_matches(id) && edge.to != END {
                    if let Some(found) = visit(graph, &edge.to, marks) {
                        return Some(found);
                    }
                }
            }
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        for id in self.nodes.keys() {
            if let Some(found) = visit(self, id, &mut marks) {
                return Some(found);
            }
        }
        None
    }

    /// Resolve the next node ids to visit from `node_id` given the message
    /// it produced (spec §4.4). Edges are partitioned into non-fallback and
    /// fallback; within each partition matching edges are tried in
    /// `(priority asc, insertion order)` — the lowest-numbered priority
    /// wins (spec §8 invariant #3). Fallback edges are only consulted when
    /// no non-fallback edge matches. Returns an empty `Vec` if nothing
    /// matches and `node_id` has no outgoing edges at all — the runner
    /// treats that as reaching `END`.
    pub fn resolve_edges(&self, node_id: &str, message: &Message) -> Vec<String> {
        let matching = |fallback: bool| -> Vec<String> {
            let mut candidates: Vec<&Edge> = self
                .edges
                .iter()
                .filter(|e| e.from_matches(node_id) && e.is_fallback == fallback && e.matches(message))
                .collect();
            candidates.sort_by(|a, b| a.priority.cmp(&b.priority));
            candidates.into_iter().map(|e| e.to.clone()).collect()
        };

        let non_fallback = matching(false);
        if !non_fallback.is_empty() {
            return non_fallback;
        }
        matching(true)
    }

    pub fn has_outgoing_edges(&self, node_id: &str) -> bool {
        self.edges.iter().any(|e| e.from_matches(node_id))
    }

    /// A human-readable rendering of the graph's structure, in the spirit
    /// of the teacher's CLI graph-printing helpers. Not load-bearing for
    /// execution — a debugging/visualization aid only.
    pub fn describe(&self) -> String {
        let mut out = format!("graph '{}' (entry: {})\n", self.id, self.entry_point);
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            out.push_str(&format!("  [{id}]\n"));
            let mut outgoing: Vec<&Edge> = self.edges.iter().filter(|e| e.from_matches(id)).collect();
            outgoing.sort_by(|a, b| a.priority.cmp(&b.priority));
            for edge in outgoing {
                let cond = if edge.condition.is_some() { "?" } else { "" };
                let fallback = if edge.is_fallback { " (fallback)" } else { "" };
                out.push_str(&format!("    -{cond}-> {} (priority {}){fallback}\n", edge.to, edge.priority));
            }
        }
        out
    }
}
