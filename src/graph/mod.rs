//! Immutable workflow graph: nodes, directed edges, topology queries.
//!
//! A [`Graph`] is built once through [`GraphBuilder`] and never mutated
//! afterwards; all per-run state (which edges were taken, which nodes
//! completed) lives in [`crate::state::GraphRuntimeState`]. The engine only
//! queries topology here.

mod builder;

pub use builder::{GraphBuildError, GraphBuilder};

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::node::Node;
use crate::types::{EdgeId, NodeId};

/// A directed edge between two nodes.
///
/// `source_handle` carries the branch selector for edges leaving branch
/// nodes: on success the branch node names a handle, and only edges whose
/// handle matches are taken. Edges without a handle are unconditional.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    /// Source node id.
    pub tail: NodeId,
    /// Target node id.
    pub head: NodeId,
    pub source_handle: Option<String>,
}

impl Edge {
    /// Whether this edge is taken for the given branch selection.
    ///
    /// Unconditional edges match any selection; handled edges require an
    /// exact match.
    #[must_use]
    pub fn matches_handle(&self, selected: Option<&str>) -> bool {
        match (&self.source_handle, selected) {
            (None, _) => true,
            (Some(handle), Some(selected)) => handle == selected,
            (Some(_), None) => false,
        }
    }
}

/// Immutable static DAG over executable nodes.
pub struct Graph {
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    /// Node ids in registration order, for deterministic iteration.
    node_order: Vec<NodeId>,
    edges: FxHashMap<EdgeId, Edge>,
    outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    root: NodeId,
}

impl Graph {
    /// Start building a graph.
    #[must_use]
    pub fn new() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Id of the root node dispatch starts from.
    #[must_use]
    pub fn root_node(&self) -> &NodeId {
        &self.root
    }

    /// Look up a node implementation.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node ids in registration order.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_order
    }

    /// Iterate over all (id, node) pairs in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Arc<dyn Node>)> {
        self.node_order
            .iter()
            .filter_map(move |id| self.nodes.get(id).map(|n| (id, n)))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up an edge by id.
    #[must_use]
    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Edges leaving a node, in registration order.
    pub fn get_outgoing_edges(&self, id: &NodeId) -> Vec<&Edge> {
        self.outgoing
            .get(id)
            .map(|ids| ids.iter().filter_map(|eid| self.edges.get(eid)).collect())
            .unwrap_or_default()
    }

    /// Edges arriving at a node, in registration order.
    pub fn get_incoming_edges(&self, id: &NodeId) -> Vec<&Edge> {
        self.incoming
            .get(id)
            .map(|ids| ids.iter().filter_map(|eid| self.edges.get(eid)).collect())
            .unwrap_or_default()
    }

    /// Out-degree of a node.
    #[must_use]
    pub fn out_degree(&self, id: &NodeId) -> usize {
        self.outgoing.get(id).map_or(0, Vec::len)
    }

    /// In-degree of a node.
    #[must_use]
    pub fn in_degree(&self, id: &NodeId) -> usize {
        self.incoming.get(id).map_or(0, Vec::len)
    }

    pub(crate) fn from_parts(
        nodes: FxHashMap<NodeId, Arc<dyn Node>>,
        node_order: Vec<NodeId>,
        edges: FxHashMap<EdgeId, Edge>,
        outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
        incoming: FxHashMap<NodeId, Vec<EdgeId>>,
        root: NodeId,
    ) -> Self {
        Graph {
            nodes,
            node_order,
            edges,
            outgoing,
            incoming,
            root,
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.root)
            .field("nodes", &self.node_order)
            .field("edges", &self.edges.len())
            .finish()
    }
}
