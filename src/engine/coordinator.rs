//! Ordered assembly of streamed response output.
//!
//! The coordinator buffers stream fragments keyed by their full selector
//! and replays them in template order for each response node. One response
//! session is active at a time; sessions for other response nodes queue
//! until the active one completes, so callers observe a single coherent
//! output stream even when branches produce concurrently.
//!
//! Activation follows deterministic reachability: for every response node
//! the coordinator records, per root-to-node path, the edges whose source
//! can still withhold output (branch/container nodes, and nodes that block
//! variable output). When all such edges on some path have been taken, the
//! node will definitely run and its session may start flushing — typically
//! while upstream streams are still being produced.
//!
//! # Object references
//!
//! A template reference may point at an object selector whose producer
//! streams into child selectors (`[n, generation]` vs
//! `[n, generation, content]`). A reference with no direct buffer fans out
//! to every discovered child, forwarding each child's own ordered stream
//! and completing once every child is closed and the producer finished.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use crate::events::StreamChunk;
use crate::graph::Graph;
use crate::state::GraphRuntimeState;
use crate::template::{Template, TemplateSegment};
use crate::types::{ChunkType, EdgeId, NodeExecutionType, NodeId, RouteState, Selector};

/// Buffered fragments for one selector, with a read cursor.
#[derive(Debug, Default)]
struct StreamBuffer {
    chunks: Vec<StreamChunk>,
    position: usize,
}

impl StreamBuffer {
    fn push(&mut self, chunk: StreamChunk) {
        self.chunks.push(chunk);
    }

    fn pop_unread(&mut self) -> Option<StreamChunk> {
        let chunk = self.chunks.get(self.position).cloned()?;
        self.position += 1;
        Some(chunk)
    }
}

/// Streaming progress of one response node.
#[derive(Debug)]
struct ResponseSession {
    node_id: NodeId,
    template: Template,
    /// Index of the segment currently being flushed.
    index: usize,
    /// Children being forwarded for the current object-reference segment.
    fanout: Option<FanoutState>,
}

impl ResponseSession {
    fn new(node_id: NodeId, template: Template) -> Self {
        ResponseSession {
            node_id,
            template,
            index: 0,
            fanout: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.index >= self.template.segments.len()
    }
}

#[derive(Debug, Default)]
struct FanoutState {
    /// Children already being forwarded, in discovery order.
    children: Vec<Selector>,
}

/// One root-to-response-node path, reduced to the edges that can still
/// withhold output.
#[derive(Debug, Clone, Default)]
struct BlockingPath {
    edges: Vec<EdgeId>,
}

impl BlockingPath {
    fn remove_edge(&mut self, edge_id: &EdgeId) {
        self.edges.retain(|e| e != edge_id);
    }

    fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Default)]
struct CoordinatorInner {
    buffers: FxHashMap<Selector, StreamBuffer>,
    /// Selectors in the order their buffers were first created.
    discovery_order: Vec<Selector>,
    closed: FxHashSet<Selector>,
    /// Nodes registered for event acceptance, with their execution ids.
    tracked_executions: FxHashMap<NodeId, String>,
    /// Response nodes in registration order.
    response_nodes: Vec<NodeId>,
    paths: FxHashMap<NodeId, Vec<BlockingPath>>,
    /// Sessions not yet activated.
    pending_sessions: FxHashMap<NodeId, ResponseSession>,
    active: Option<ResponseSession>,
    waiting: VecDeque<ResponseSession>,
}

/// Buffers and re-assembles streaming output fragments in template order.
pub struct ResponseStreamCoordinator {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    inner: Mutex<CoordinatorInner>,
}

impl ResponseStreamCoordinator {
    #[must_use]
    pub fn new(graph: Arc<Graph>, state: Arc<GraphRuntimeState>) -> Self {
        ResponseStreamCoordinator {
            graph,
            state,
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    /// Register a response node and precompute its blocking paths.
    ///
    /// Returns chunks to emit: a node with no blocking edges on some path
    /// activates immediately.
    pub fn register(&self, node_id: &NodeId, template: Template) -> Vec<StreamChunk> {
        {
            let mut inner = self.inner.lock();
            if inner.response_nodes.contains(node_id) {
                return Vec::new();
            }
            inner.response_nodes.push(node_id.clone());
            let paths = self.build_blocking_paths(node_id);
            inner.paths.insert(node_id.clone(), paths);
            inner
                .pending_sessions
                .insert(node_id.clone(), ResponseSession::new(node_id.clone(), template));
        }
        self.activate_reachable()
    }

    /// Record the execution id for a node. Required before that node's
    /// stream events are accepted.
    pub fn track_node_execution(&self, node_id: &NodeId, execution_id: &str) {
        self.inner
            .lock()
            .tracked_executions
            .insert(node_id.clone(), execution_id.to_string());
    }

    /// Accept one stream fragment. Returns chunks ready to emit, in order.
    pub fn intercept_event(&self, chunk: StreamChunk) -> Vec<StreamChunk> {
        {
            let mut inner = self.inner.lock();
            if !inner.tracked_executions.contains_key(&chunk.node_id) {
                tracing::warn!(
                    node_id = %chunk.node_id,
                    selector = %chunk.selector,
                    "dropping stream chunk from untracked node execution"
                );
                return Vec::new();
            }
            if inner.closed.contains(&chunk.selector) {
                tracing::warn!(
                    selector = %chunk.selector,
                    "dropping stream chunk for closed selector"
                );
                return Vec::new();
            }

            let selector = chunk.selector.clone();
            let is_final = chunk.is_final;
            if !inner.buffers.contains_key(&selector) {
                inner.discovery_order.push(selector.clone());
                inner.buffers.insert(selector.clone(), StreamBuffer::default());
            }
            inner
                .buffers
                .get_mut(&selector)
                .expect("buffer just ensured")
                .push(chunk);
            if is_final {
                inner.closed.insert(selector);
            }
        }
        self.try_flush()
    }

    /// A node finished and its scalar outputs are committed; re-attempt the
    /// flush.
    pub fn notify_node_succeeded(&self) -> Vec<StreamChunk> {
        self.try_flush()
    }

    /// An edge was taken. Updates blocking paths; response nodes that became
    /// deterministically reachable activate (or queue behind the active
    /// session).
    pub fn on_edge_taken(&self, edge_id: &EdgeId) -> Vec<StreamChunk> {
        {
            let mut inner = self.inner.lock();
            let response_nodes = inner.response_nodes.clone();
            for node_id in response_nodes {
                if let Some(paths) = inner.paths.get_mut(&node_id) {
                    for path in paths.iter_mut() {
                        path.remove_edge(edge_id);
                    }
                }
            }
        }
        self.activate_reachable()
    }

    /// All selectors with a buffer (open or closed) strictly longer than and
    /// starting with `prefix`, in discovery order.
    pub fn find_child_streams(&self, prefix: &Selector) -> Vec<Selector> {
        let inner = self.inner.lock();
        inner
            .discovery_order
            .iter()
            .filter(|sel| sel.len() > prefix.len() && sel.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Whether a selector's stream is closed (fully flushed upstream).
    pub fn is_stream_closed(&self, selector: &Selector) -> bool {
        self.inner.lock().closed.contains(selector)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Depth-first enumeration of root-to-node paths, keeping only edges
    /// whose source can withhold output.
    fn build_blocking_paths(&self, response_node_id: &NodeId) -> Vec<BlockingPath> {
        let root = self.graph.root_node().clone();
        if &root == response_node_id {
            return vec![BlockingPath::default()];
        }

        let mut complete_paths: Vec<Vec<EdgeId>> = Vec::new();
        let mut stack: Vec<(NodeId, Vec<EdgeId>, FxHashSet<NodeId>)> =
            vec![(root, Vec::new(), FxHashSet::default())];

        while let Some((current, path, mut visited)) = stack.pop() {
            if &current == response_node_id {
                complete_paths.push(path);
                continue;
            }
            visited.insert(current.clone());
            for edge in self.graph.get_outgoing_edges(&current) {
                if visited.contains(&edge.head) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(edge.id.clone());
                stack.push((edge.head.clone(), next_path, visited.clone()));
            }
        }

        complete_paths
            .into_iter()
            .map(|edges| {
                let blocking = edges
                    .into_iter()
                    .filter(|edge_id| {
                        let Some(edge) = self.graph.edge(edge_id) else {
                            return false;
                        };
                        let Some(source) = self.graph.node(&edge.tail) else {
                            return false;
                        };
                        matches!(
                            source.execution_type(),
                            NodeExecutionType::Branch | NodeExecutionType::Container
                        ) || source.blocks_variable_output()
                    })
                    .collect();
                BlockingPath { edges: blocking }
            })
            .collect()
    }

    /// Activate every pending session whose blocking paths allow it.
    fn activate_reachable(&self) -> Vec<StreamChunk> {
        let mut newly_active = false;
        {
            let mut inner = self.inner.lock();
            let reachable: Vec<NodeId> = inner
                .response_nodes
                .iter()
                .filter(|id| {
                    inner.pending_sessions.contains_key(*id)
                        && inner
                            .paths
                            .get(*id)
                            .is_some_and(|paths| paths.iter().any(BlockingPath::is_empty))
                })
                .cloned()
                .collect();

            for node_id in reachable {
                let session = inner
                    .pending_sessions
                    .remove(&node_id)
                    .expect("checked above");
                if inner.active.is_none() {
                    inner.active = Some(session);
                    newly_active = true;
                } else {
                    inner.waiting.push_back(session);
                }
            }
        }
        if newly_active {
            self.try_flush()
        } else {
            Vec::new()
        }
    }

    fn execution_id_for(inner: &mut CoordinatorInner, node_id: &NodeId) -> String {
        inner
            .tracked_executions
            .entry(node_id.clone())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    /// Flush as much of the active session as current buffers and committed
    /// scalars allow. Finishing a session promotes the next waiting one.
    fn try_flush(&self) -> Vec<StreamChunk> {
        let mut inner = self.inner.lock();
        let mut emitted = Vec::new();

        loop {
            let Some(session) = inner.active.as_ref() else {
                break;
            };
            let node_id = session.node_id.clone();

            while !inner.active.as_ref().expect("active checked").is_complete() {
                let session = inner.active.as_ref().expect("active checked");
                let index = session.index;
                let is_last_segment = index + 1 == session.template.segments.len();
                let segment = session.template.segments[index].clone();

                match segment {
                    TemplateSegment::Text(text) => {
                        let execution_id = Self::execution_id_for(&mut inner, &node_id);
                        emitted.push(StreamChunk {
                            node_id: node_id.clone(),
                            execution_id,
                            selector: Selector::of(node_id.clone(), "answer"),
                            chunk: text,
                            chunk_type: ChunkType::Text,
                            is_final: is_last_segment,
                        });
                        inner.active.as_mut().expect("active checked").index += 1;
                    }
                    TemplateSegment::Variable(selector) => {
                        let complete = self.flush_variable_segment(
                            &mut inner,
                            &node_id,
                            &selector,
                            is_last_segment,
                            &mut emitted,
                        );
                        if complete {
                            let session = inner.active.as_mut().expect("active checked");
                            session.index += 1;
                            session.fanout = None;
                        } else {
                            // Wait for more upstream data.
                            return emitted;
                        }
                    }
                }
            }

            // Session complete; promote the next waiting session and loop.
            inner.active = None;
            if let Some(next) = inner.waiting.pop_front() {
                inner.active = Some(next);
            } else {
                break;
            }
        }

        emitted
    }

    /// Flush one variable reference. Returns true when the segment is
    /// complete and the session may advance.
    fn flush_variable_segment(
        &self,
        inner: &mut CoordinatorInner,
        response_node_id: &NodeId,
        selector: &Selector,
        is_last_segment: bool,
        emitted: &mut Vec<StreamChunk>,
    ) -> bool {
        let source_node_id: NodeId = match selector.node_id() {
            Some(id) => id.to_string(),
            None => return true,
        };

        // References into skipped or failed branches produce nothing.
        if self.graph.contains_node(&source_node_id)
            && (self.state.node_state(&source_node_id) == RouteState::Skipped
                || self.state.is_node_failed(&source_node_id))
        {
            return true;
        }

        let has_direct_buffer = inner.buffers.contains_key(selector);

        if has_direct_buffer {
            while let Some(chunk) = inner
                .buffers
                .get_mut(selector)
                .and_then(StreamBuffer::pop_unread)
            {
                emitted.push(chunk);
            }
            return inner.closed.contains(selector);
        }

        // Object reference: fan out to child selectors, each forwarded as
        // its own ordered stream. New children may still appear while the
        // producer runs.
        let children: Vec<Selector> = inner
            .discovery_order
            .iter()
            .filter(|sel| sel.len() > selector.len() && sel.starts_with(selector))
            .cloned()
            .collect();

        if !children.is_empty() {
            {
                let session = inner.active.as_mut().expect("flush requires active session");
                let fanout = session.fanout.get_or_insert_with(FanoutState::default);
                for child in &children {
                    if !fanout.children.contains(child) {
                        fanout.children.push(child.clone());
                    }
                }
            }

            let ordered_children = inner
                .active
                .as_ref()
                .expect("flush requires active session")
                .fanout
                .as_ref()
                .map(|f| f.children.clone())
                .unwrap_or_default();

            for child in &ordered_children {
                while let Some(chunk) = inner
                    .buffers
                    .get_mut(child)
                    .and_then(StreamBuffer::pop_unread)
                {
                    emitted.push(chunk);
                }
            }

            let all_closed = ordered_children
                .iter()
                .all(|child| inner.closed.contains(child));
            // The producer may still open new child streams until it
            // completes.
            let producer_done = self.state.is_node_completed(&source_node_id);
            return all_closed && producer_done;
        }

        // Scalar committed to the pool.
        if let Some(value) = self.state.get_variable(selector) {
            if !value.is_none() {
                let execution_id = Self::execution_id_for(inner, &source_node_id);
                emitted.push(StreamChunk {
                    node_id: response_node_id.clone(),
                    execution_id,
                    selector: selector.clone(),
                    chunk: value.to_display_string(),
                    chunk_type: ChunkType::Text,
                    is_final: is_last_segment,
                });
                return true;
            }
        }

        // Nothing available yet; if the producer already completed without
        // this output, give up on the reference instead of stalling.
        self.state.is_node_completed(&source_node_id)
    }
}
