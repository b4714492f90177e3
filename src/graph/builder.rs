//! GraphBuilder: fluent construction and build-time validation.
//!
//! A graph is assembled by registering the root, then registering each
//! further node together with the edge that connects it to an existing
//! node. Extra edges (fan-in) are added explicitly. [`GraphBuilder::build`]
//! validates the result — every referenced source exists, every node is
//! reachable from the root — and freezes it into an immutable [`Graph`].

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use super::{Edge, Graph};
use crate::node::Node;
use crate::types::{EdgeId, NodeId};

/// Errors detected while building a graph.
///
/// All variants are fatal at build time only; a successfully built graph
/// cannot produce these at runtime.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphBuildError {
    #[error("graph has no root node")]
    #[diagnostic(
        code(flowmesh::graph::missing_root),
        help("Call add_root(..) before build().")
    )]
    MissingRoot,

    #[error("duplicate node id: {0}")]
    #[diagnostic(
        code(flowmesh::graph::duplicate_node),
        help("Node ids must be unique within a graph.")
    )]
    DuplicateNode(NodeId),

    #[error("edge references unknown source node '{from}' (target '{to}')")]
    #[diagnostic(
        code(flowmesh::graph::unknown_source),
        help("Register the source node before nodes that attach to it.")
    )]
    UnknownSource { from: NodeId, to: NodeId },

    #[error("edge references unknown target node '{to}' (source '{from}')")]
    #[diagnostic(code(flowmesh::graph::unknown_target))]
    UnknownTarget { from: NodeId, to: NodeId },

    #[error("nodes unreachable from root: {0:?}")]
    #[diagnostic(
        code(flowmesh::graph::unreachable),
        help("Every node must be connected to the root through directed edges.")
    )]
    Unreachable(Vec<NodeId>),
}

struct PendingEdge {
    from: NodeId,
    to: NodeId,
    source_handle: Option<String>,
}

/// Fluent builder for [`Graph`].
///
/// # Examples
///
/// ```rust
/// use flowmesh::graph::Graph;
/// # use flowmesh::node::{Node, NodeContext, NodeRunResult, NodeExecutionError};
/// # use flowmesh::types::NodeType;
/// # use async_trait::async_trait;
/// # struct Passthrough;
/// # #[async_trait]
/// # impl Node for Passthrough {
/// #     async fn run(&self, _: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
/// #         Ok(NodeRunResult::empty())
/// #     }
/// #     fn node_type(&self) -> NodeType { NodeType::Custom("passthrough".into()) }
/// # }
///
/// let graph = Graph::new()
///     .add_root("start", Passthrough)
///     .add_node("work", Passthrough, "start", None)
///     .add_node("end", Passthrough, "work", None)
///     .build()
///     .expect("valid graph");
///
/// assert_eq!(graph.root_node(), "start");
/// assert_eq!(graph.get_outgoing_edges(&"start".to_string()).len(), 1);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
    node_order: Vec<NodeId>,
    pending_edges: Vec<PendingEdge>,
    root: Option<NodeId>,
    duplicate: Option<NodeId>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the root node dispatch starts from.
    #[must_use]
    pub fn add_root(mut self, id: impl Into<NodeId>, node: impl Node + 'static) -> Self {
        let id = id.into();
        self.register(id.clone(), node);
        self.root = Some(id);
        self
    }

    /// Register a node together with the edge connecting it to an existing
    /// node. `source_handle` makes the edge conditional on the source's
    /// branch selection.
    #[must_use]
    pub fn add_node(
        mut self,
        id: impl Into<NodeId>,
        node: impl Node + 'static,
        from_node_id: impl Into<NodeId>,
        source_handle: Option<&str>,
    ) -> Self {
        let id = id.into();
        self.register(id.clone(), node);
        self.pending_edges.push(PendingEdge {
            from: from_node_id.into(),
            to: id,
            source_handle: source_handle.map(str::to_string),
        });
        self
    }

    /// Add an extra edge between two already-registered nodes (fan-in or
    /// additional branch arms).
    #[must_use]
    pub fn add_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        source_handle: Option<&str>,
    ) -> Self {
        self.pending_edges.push(PendingEdge {
            from: from.into(),
            to: to.into(),
            source_handle: source_handle.map(str::to_string),
        });
        self
    }

    fn register(&mut self, id: NodeId, node: impl Node + 'static) {
        if self.nodes.contains_key(&id) {
            // Reported from build(); the fluent API has nowhere to fail early.
            self.duplicate.get_or_insert(id);
            return;
        }
        self.node_order.push(id.clone());
        self.nodes.insert(id, Arc::new(node));
    }

    /// Validate the assembled topology and freeze it.
    pub fn build(self) -> Result<Graph, GraphBuildError> {
        if let Some(id) = self.duplicate {
            return Err(GraphBuildError::DuplicateNode(id));
        }
        let root = self.root.ok_or(GraphBuildError::MissingRoot)?;

        let mut edges: FxHashMap<EdgeId, Edge> = FxHashMap::default();
        let mut outgoing: FxHashMap<NodeId, Vec<EdgeId>> = FxHashMap::default();
        let mut incoming: FxHashMap<NodeId, Vec<EdgeId>> = FxHashMap::default();

        for pending in &self.pending_edges {
            if !self.nodes.contains_key(&pending.from) {
                return Err(GraphBuildError::UnknownSource {
                    from: pending.from.clone(),
                    to: pending.to.clone(),
                });
            }
            if !self.nodes.contains_key(&pending.to) {
                return Err(GraphBuildError::UnknownTarget {
                    from: pending.from.clone(),
                    to: pending.to.clone(),
                });
            }

            let id = match &pending.source_handle {
                Some(handle) => format!("{}:{}->{}", pending.from, handle, pending.to),
                None => format!("{}->{}", pending.from, pending.to),
            };
            let edge = Edge {
                id: id.clone(),
                tail: pending.from.clone(),
                head: pending.to.clone(),
                source_handle: pending.source_handle.clone(),
            };
            outgoing.entry(pending.from.clone()).or_default().push(id.clone());
            incoming.entry(pending.to.clone()).or_default().push(id.clone());
            edges.insert(id, edge);
        }

        // Full reachability from the root.
        let mut reachable: FxHashMap<&NodeId, ()> = FxHashMap::default();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();
        reachable.insert(&root, ());
        queue.push_back(&root);
        while let Some(current) = queue.pop_front() {
            if let Some(edge_ids) = outgoing.get(current) {
                for edge_id in edge_ids {
                    let head = &edges[edge_id].head;
                    if reachable.insert(head, ()).is_none() {
                        queue.push_back(head);
                    }
                }
            }
        }

        let unreachable: Vec<NodeId> = self
            .node_order
            .iter()
            .filter(|id| !reachable.contains_key(id))
            .cloned()
            .collect();
        if !unreachable.is_empty() {
            return Err(GraphBuildError::Unreachable(unreachable));
        }

        Ok(Graph::from_parts(
            self.nodes,
            self.node_order,
            edges,
            outgoing,
            incoming,
            root,
        ))
    }
}
