//! Mutable execution state for a single graph run.
//!
//! [`GraphRuntimeState`] owns the [`VariablePool`] plus the execution
//! bookkeeping the engine needs to route, pause, and resume: node and edge
//! routing states, the completed-node set, resolved run outputs, the start
//! time, and the completion flag.
//!
//! The state is shared (`Arc`) between the engine, the workers, and the
//! caller. Writes are serialized through the dispatcher — workers only read
//! — so a single `RwLock` around the interior is sufficient; reads of
//! committed data never block each other.
//!
//! # Snapshots
//!
//! [`dumps`](GraphRuntimeState::dumps) serializes the full state into an
//! opaque, versioned byte blob; [`from_snapshot`](GraphRuntimeState::from_snapshot)
//! reconstructs a state that behaves identically for all future events.
//! Replaying the same events against a fresh state and a restored one must
//! yield the same final outputs; everything the engine consults during
//! dispatch is therefore part of the persisted shape.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::segment::Segment;
use crate::snapshot::{PersistedRuntimeState, PersistedVariable, SnapshotError, SNAPSHOT_VERSION};
use crate::types::{EdgeId, NodeId, RouteState, Selector};
use crate::variable_pool::VariablePool;

#[derive(Debug, Default)]
struct StateInner {
    variable_pool: VariablePool,
    outputs: FxHashMap<String, Value>,
    node_states: FxHashMap<NodeId, RouteState>,
    edge_states: FxHashMap<EdgeId, RouteState>,
    completed_nodes: FxHashSet<NodeId>,
    failed_nodes: FxHashSet<NodeId>,
    paused_node: Option<NodeId>,
    completed: bool,
}

/// Shared mutable state of one graph run.
#[derive(Debug)]
pub struct GraphRuntimeState {
    started_at: DateTime<Utc>,
    inner: RwLock<StateInner>,
}

impl Default for GraphRuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRuntimeState {
    /// Fresh state for a new run, started now.
    #[must_use]
    pub fn new() -> Self {
        GraphRuntimeState {
            started_at: Utc::now(),
            inner: RwLock::new(StateInner::default()),
        }
    }

    /// Fresh state seeded with initial variables (typically `sys.*` inputs
    /// and start-node parameters).
    #[must_use]
    pub fn with_variables<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (Selector, Segment)>,
    {
        let state = Self::new();
        {
            let mut inner = state.inner.write();
            for (selector, value) in variables {
                inner.variable_pool.add(selector, value);
            }
        }
        state
    }

    /// Wall-clock time the run started (restored verbatim from snapshots).
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ------------------------------------------------------------------
    // Variable pool access
    // ------------------------------------------------------------------

    /// Read a committed variable.
    pub fn get_variable(&self, selector: &Selector) -> Option<Segment> {
        self.inner.read().variable_pool.get(selector).cloned()
    }

    /// Whether a non-`None` value exists at the selector.
    pub fn variable_exists(&self, selector: &Selector) -> bool {
        self.inner.read().variable_pool.exists(selector)
    }

    /// Commit a variable. Called by the dispatcher when applying a node's
    /// terminal event.
    pub fn add_variable(&self, selector: Selector, value: Segment) {
        self.inner.write().variable_pool.add(selector, value);
    }

    /// Append to an array variable (loop/iteration indices).
    pub fn append_variable(&self, selector: Selector, value: Segment) {
        self.inner.write().variable_pool.append(selector, value);
    }

    /// Clone of the full pool contents, for inspection and tests.
    pub fn variable_snapshot(&self) -> Vec<(Selector, Segment)> {
        self.inner
            .read()
            .variable_pool
            .iter()
            .map(|(sel, seg)| (sel.clone(), seg.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Run outputs
    // ------------------------------------------------------------------

    /// Set a resolved run output, replacing any previous value.
    pub fn set_output(&self, key: impl Into<String>, value: Value) {
        self.inner.write().outputs.insert(key.into(), value);
    }

    /// Merge a response-node output: string values concatenate onto any
    /// existing string instead of overwriting, so multiple response nodes
    /// compose a single answer.
    pub fn merge_output(&self, key: &str, value: Value) {
        let mut inner = self.inner.write();
        match (inner.outputs.get_mut(key), &value) {
            (Some(Value::String(existing)), Value::String(addition)) => {
                existing.push_str(addition);
            }
            _ => {
                inner.outputs.insert(key.to_string(), value);
            }
        }
    }

    /// Clone of the resolved outputs.
    pub fn outputs(&self) -> FxHashMap<String, Value> {
        self.inner.read().outputs.clone()
    }

    // ------------------------------------------------------------------
    // Routing bookkeeping
    // ------------------------------------------------------------------

    pub fn node_state(&self, node_id: &NodeId) -> RouteState {
        self.inner
            .read()
            .node_states
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_node_state(&self, node_id: NodeId, state: RouteState) {
        self.inner.write().node_states.insert(node_id, state);
    }

    pub fn edge_state(&self, edge_id: &EdgeId) -> RouteState {
        self.inner
            .read()
            .edge_states
            .get(edge_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_edge_state(&self, edge_id: EdgeId, state: RouteState) {
        self.inner.write().edge_states.insert(edge_id, state);
    }

    pub fn mark_node_completed(&self, node_id: NodeId) {
        self.inner.write().completed_nodes.insert(node_id);
    }

    pub fn is_node_completed(&self, node_id: &NodeId) -> bool {
        self.inner.read().completed_nodes.contains(node_id)
    }

    pub fn completed_nodes(&self) -> FxHashSet<NodeId> {
        self.inner.read().completed_nodes.clone()
    }

    pub fn mark_node_failed(&self, node_id: NodeId) {
        self.inner.write().failed_nodes.insert(node_id);
    }

    pub fn is_node_failed(&self, node_id: &NodeId) -> bool {
        self.inner.read().failed_nodes.contains(node_id)
    }

    // ------------------------------------------------------------------
    // Pause / completion
    // ------------------------------------------------------------------

    /// Record the node the run paused on. The node stays un-completed so a
    /// resumed engine re-dispatches it.
    pub fn set_paused_node(&self, node_id: NodeId) {
        self.inner.write().paused_node = Some(node_id);
    }

    pub fn clear_paused_node(&self) {
        self.inner.write().paused_node = None;
    }

    pub fn paused_node(&self) -> Option<NodeId> {
        self.inner.read().paused_node.clone()
    }

    pub fn mark_completed(&self) {
        self.inner.write().completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.inner.read().completed
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize the full state into an opaque versioned blob.
    pub fn dumps(&self) -> Result<Vec<u8>, SnapshotError> {
        let inner = self.inner.read();
        let mut variables: Vec<PersistedVariable> = inner
            .variable_pool
            .iter()
            .map(|(sel, seg)| PersistedVariable {
                selector: sel.segments().to_vec(),
                value: seg.clone(),
            })
            .collect();
        // Deterministic blob for identical states.
        variables.sort_by(|a, b| a.selector.cmp(&b.selector));

        let mut completed_nodes: Vec<String> = inner.completed_nodes.iter().cloned().collect();
        completed_nodes.sort();
        let mut failed_nodes: Vec<String> = inner.failed_nodes.iter().cloned().collect();
        failed_nodes.sort();

        let persisted = PersistedRuntimeState {
            version: SNAPSHOT_VERSION,
            started_at: self.started_at.to_rfc3339(),
            completed: inner.completed,
            variables,
            outputs: inner.outputs.clone(),
            node_states: inner.node_states.clone(),
            edge_states: inner.edge_states.clone(),
            completed_nodes,
            failed_nodes,
            paused_node: inner.paused_node.clone(),
        };
        persisted.to_bytes()
    }

    /// Reconstruct a state observably identical to the one that produced
    /// the snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let persisted = PersistedRuntimeState::from_bytes(bytes)?;

        let started_at = DateTime::parse_from_rfc3339(&persisted.started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| SnapshotError::InvalidField("started_at"))?;

        let mut pool = VariablePool::new();
        for var in persisted.variables {
            pool.add(Selector::new(var.selector), var.value);
        }

        let inner = StateInner {
            variable_pool: pool,
            outputs: persisted.outputs,
            node_states: persisted.node_states,
            edge_states: persisted.edge_states,
            completed_nodes: persisted.completed_nodes.into_iter().collect(),
            failed_nodes: persisted.failed_nodes.into_iter().collect(),
            paused_node: persisted.paused_node,
            completed: persisted.completed,
        };

        Ok(GraphRuntimeState {
            started_at,
            inner: RwLock::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip_preserves_everything() {
        let state = GraphRuntimeState::new();
        state.add_variable(Selector::of("start", "query"), Segment::from("hi"));
        state.add_variable(Selector::of("llm", "text"), Segment::from("answer"));
        state.set_output("answer", serde_json::json!("answer"));
        state.set_node_state("start".into(), RouteState::Taken);
        state.set_edge_state("start->llm".into(), RouteState::Taken);
        state.mark_node_completed("start".into());
        state.set_paused_node("human".into());

        let blob = state.dumps().unwrap();
        let restored = GraphRuntimeState::from_snapshot(&blob).unwrap();

        assert_eq!(
            restored.get_variable(&Selector::of("llm", "text")),
            Some(Segment::from("answer"))
        );
        assert_eq!(restored.node_state(&"start".into()), RouteState::Taken);
        assert_eq!(restored.edge_state(&"start->llm".into()), RouteState::Taken);
        assert!(restored.is_node_completed(&"start".into()));
        assert_eq!(restored.paused_node(), Some("human".to_string()));
        assert_eq!(restored.started_at(), state.started_at());
        assert!(!restored.is_completed());

        // Identical states serialize identically.
        assert_eq!(blob, restored.dumps().unwrap());
    }

    #[test]
    fn merge_output_concatenates_strings() {
        let state = GraphRuntimeState::new();
        state.merge_output("answer", serde_json::json!("Hello, "));
        state.merge_output("answer", serde_json::json!("world"));
        assert_eq!(
            state.outputs().get("answer"),
            Some(&serde_json::json!("Hello, world"))
        );

        state.merge_output("count", serde_json::json!(1));
        state.merge_output("count", serde_json::json!(2));
        assert_eq!(state.outputs().get("count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn default_route_state_is_unknown() {
        let state = GraphRuntimeState::new();
        assert_eq!(state.node_state(&"n".into()), RouteState::Unknown);
        assert_eq!(state.edge_state(&"e".into()), RouteState::Unknown);
    }
}
