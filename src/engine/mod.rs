//! The graph execution engine.
//!
//! [`GraphEngine`] orchestrates one run: it sizes and spawns the worker
//! pool, seeds the ready queue, applies node results to the runtime state,
//! routes stream chunks through the response coordinator, honors stop
//! commands, and terminates the run by success, failure, abort, or pause.
//!
//! # Architecture
//!
//! A single dispatcher task owns all mutable routing state and is the only
//! writer of the variable pool; worker tasks pull node ids from a shared
//! MPMC ready queue and report results back over a message channel. That
//! single-committer shape is what gives per-selector FIFO ordering without
//! fine-grained locking.
//!
//! # Lifecycle
//!
//! `READY → RUNNING → {SUCCEEDED, FAILED, PAUSED, ABORTED}`. A paused run
//! resumes by building a fresh engine over
//! [`GraphRuntimeState::from_snapshot`](crate::state::GraphRuntimeState::from_snapshot)
//! and calling [`run`](GraphEngine::run) again.

pub mod commands;
pub mod coordinator;
pub mod pool;
mod worker;

pub use commands::{CommandChannel, GraphEngineCommand, InMemoryChannel};
pub use coordinator::ResponseStreamCoordinator;
pub use pool::{WorkerId, WorkerPoolManager};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::events::{GraphEngineEvent, NodeEvent, StreamChunk};
use crate::graph::Graph;
use crate::node::{NodeExecutionError, NodeRunResult, NodeRunStatus};
use crate::state::GraphRuntimeState;
use crate::types::{EdgeId, NodeExecutionType, NodeId, NodeType, RouteState, Selector};
use worker::{spawn_worker, WorkerHandle, WorkerMessage};

// ============================================================================
// Event stream
// ============================================================================

/// Ordered stream of [`GraphEngineEvent`]s produced by a running engine.
///
/// The stream ends (yields `None`) after the run's terminal event.
pub struct EventStream {
    rx: flume::Receiver<GraphEngineEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once the engine has shut down.
    pub async fn next(&self) -> Option<GraphEngineEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Drain the stream to completion, returning every event in order.
    pub async fn collect(self) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.recv_async().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    /// Adapt into a `futures_util::Stream` for combinator-style consumption.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = GraphEngineEvent> {
        self.rx.into_stream()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Orchestrator for one graph run.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flowmesh::config::EngineConfig;
/// use flowmesh::engine::{GraphEngine, InMemoryChannel};
/// use flowmesh::state::GraphRuntimeState;
/// # use flowmesh::graph::Graph;
///
/// # async fn example(graph: Arc<Graph>) {
/// let state = Arc::new(GraphRuntimeState::new());
/// let engine = GraphEngine::new(
///     graph,
///     Arc::clone(&state),
///     Arc::new(InMemoryChannel::new()),
///     EngineConfig::default(),
/// );
///
/// let events = engine.run();
/// while let Some(event) = events.next().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
pub struct GraphEngine {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    command_channel: Arc<dyn CommandChannel>,
    config: EngineConfig,
}

impl GraphEngine {
    #[must_use]
    pub fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        command_channel: Arc<dyn CommandChannel>,
        config: EngineConfig,
    ) -> Self {
        GraphEngine {
            graph,
            state,
            command_channel,
            config: config.normalize(),
        }
    }

    /// Engine with an in-memory command channel and default configuration.
    #[must_use]
    pub fn with_defaults(graph: Arc<Graph>, state: Arc<GraphRuntimeState>) -> Self {
        Self::new(
            graph,
            state,
            Arc::new(InMemoryChannel::new()),
            EngineConfig::default(),
        )
    }

    /// Shared handle on the runtime state (for `dumps()` after a pause).
    #[must_use]
    pub fn state(&self) -> Arc<GraphRuntimeState> {
        Arc::clone(&self.state)
    }

    /// Start the run. Returns the event stream; the engine itself executes
    /// on background tasks until a terminal event is emitted.
    pub fn run(self) -> EventStream {
        let (out_tx, out_rx) = flume::unbounded();
        let dispatcher = Dispatcher::new(
            self.graph,
            self.state,
            self.command_channel,
            self.config,
            out_tx,
        );
        tokio::spawn(dispatcher.run());
        EventStream { rx: out_rx }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Dispatcher {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    command_channel: Arc<dyn CommandChannel>,
    config: EngineConfig,
    coordinator: ResponseStreamCoordinator,
    pool: Arc<Mutex<WorkerPoolManager>>,
    ready_tx: flume::Sender<NodeId>,
    ready_rx: flume::Receiver<NodeId>,
    msg_tx: flume::Sender<WorkerMessage>,
    msg_rx: flume::Receiver<WorkerMessage>,
    out: flume::Sender<GraphEngineEvent>,
    workers: Vec<WorkerHandle>,
    next_worker_id: WorkerId,
    /// Nodes queued or in flight.
    executing: FxHashSet<NodeId>,
    retry_counts: FxHashMap<NodeId, u32>,
    paused: Option<(NodeId, String)>,
    aborted: Option<String>,
    failed: Option<String>,
}

impl Dispatcher {
    fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        command_channel: Arc<dyn CommandChannel>,
        config: EngineConfig,
        out: flume::Sender<GraphEngineEvent>,
    ) -> Self {
        let (ready_tx, ready_rx) = flume::unbounded();
        let (msg_tx, msg_rx) = flume::unbounded();
        let coordinator =
            ResponseStreamCoordinator::new(Arc::clone(&graph), Arc::clone(&state));
        let pool = Arc::new(Mutex::new(WorkerPoolManager::new(
            config.min_workers,
            config.max_workers,
            config.scale_up_threshold,
            config.scale_down_idle_time,
        )));

        Dispatcher {
            graph,
            state,
            command_channel,
            config,
            coordinator,
            pool,
            ready_tx,
            ready_rx,
            msg_tx,
            msg_rx,
            out,
            workers: Vec::new(),
            next_worker_id: 0,
            executing: FxHashSet::default(),
            retry_counts: FxHashMap::default(),
            paused: None,
            aborted: None,
            failed: None,
        }
    }

    async fn run(mut self) {
        self.emit(GraphEngineEvent::GraphRunStarted);
        self.register_response_nodes();
        self.seed_ready_nodes();
        self.spawn_initial_workers();
        self.dispatch_loop().await;
        self.finalize();
    }

    fn emit(&self, event: GraphEngineEvent) {
        // The caller may have dropped the stream; the run still finishes.
        let _ = self.out.send(event);
    }

    fn emit_chunks(&self, chunks: Vec<StreamChunk>) {
        for chunk in chunks {
            self.emit(GraphEngineEvent::NodeRunStreamChunk(chunk));
        }
    }

    fn register_response_nodes(&mut self) {
        let response_nodes: Vec<(NodeId, crate::template::Template)> = self
            .graph
            .nodes()
            .filter(|(_, node)| node.execution_type() == NodeExecutionType::Response)
            .map(|(id, node)| (id.clone(), node.template().unwrap_or_default()))
            .collect();
        for (node_id, template) in response_nodes {
            let chunks = self.coordinator.register(&node_id, template);
            self.emit_chunks(chunks);
        }
    }

    /// Seed the ready queue: a fresh state starts at the root, a restored
    /// state re-dispatches every node that was enqueued but never finished
    /// (the paused node included).
    fn seed_ready_nodes(&mut self) {
        let mut seeds: Vec<NodeId> = self
            .graph
            .node_ids()
            .iter()
            .filter(|id| {
                self.state.node_state(id) == RouteState::Taken
                    && !self.state.is_node_completed(id)
                    && !self.state.is_node_failed(id)
            })
            .cloned()
            .collect();

        if seeds.is_empty() && self.state.completed_nodes().is_empty() {
            seeds.push(self.graph.root_node().clone());
        }

        self.state.clear_paused_node();
        for node_id in seeds {
            self.enqueue_node(node_id);
        }
    }

    fn spawn_initial_workers(&mut self) {
        let initial = self.pool.lock().calculate_initial_workers(&self.graph);
        for _ in 0..initial {
            self.spawn_worker();
        }
        tracing::debug!(
            workers = initial,
            min = self.config.min_workers,
            max = self.config.max_workers,
            "engine initialized worker pool"
        );
    }

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let handle = spawn_worker(
            id,
            Arc::clone(&self.graph),
            Arc::clone(&self.state),
            self.ready_rx.clone(),
            self.msg_tx.clone(),
            Arc::clone(&self.pool),
        );
        self.workers.push(handle);
    }

    async fn dispatch_loop(&mut self) {
        let started = Instant::now();
        let msg_rx = self.msg_rx.clone();
        let mut scale_tick = tokio::time::interval(self.config.scale_check_interval);

        loop {
            self.poll_commands();
            if self.aborted.is_some() {
                break;
            }
            if started.elapsed() > self.config.max_execution_time {
                self.failed = Some(format!(
                    "execution exceeded maximum time of {}s",
                    self.config.max_execution_time.as_secs()
                ));
                break;
            }
            if self.is_settled() {
                break;
            }

            tokio::select! {
                msg = msg_rx.recv_async() => {
                    if let Ok(msg) = msg {
                        self.process_message(msg);
                    }
                    // Apply whatever else already arrived before re-checking
                    // completion.
                    while let Ok(msg) = msg_rx.try_recv() {
                        self.process_message(msg);
                    }
                }
                _ = scale_tick.tick() => {
                    self.scale_down_idle();
                }
                _ = tokio::time::sleep(self.config.command_poll_interval) => {}
            }
        }
    }

    /// The run has nothing left to do.
    fn is_settled(&self) -> bool {
        if !self.executing.is_empty() {
            return false;
        }
        if self.paused.is_some() {
            // In-flight executions drained; the pause can surface.
            return true;
        }
        self.ready_rx.is_empty() && self.msg_rx.is_empty()
    }

    fn poll_commands(&mut self) {
        while let Some(command) = self.command_channel.poll() {
            match command {
                GraphEngineCommand::Abort { reason } => {
                    tracing::debug!(%reason, "abort command received");
                    self.aborted = Some(reason);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Message handling
    // ------------------------------------------------------------------

    fn process_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Started {
                node_id,
                execution_id,
            } => {
                self.coordinator.track_node_execution(&node_id, &execution_id);
                let retrying = self.retry_counts.get(&node_id).copied().unwrap_or(0) > 0;
                if !retrying {
                    if let Some(node) = self.graph.node(&node_id) {
                        self.emit(GraphEngineEvent::NodeRunStarted {
                            node_id: node_id.clone(),
                            node_type: node.node_type(),
                            execution_id,
                        });
                    }
                }
            }
            WorkerMessage::Event(event) => match event {
                NodeEvent::StreamChunk(chunk) => {
                    let ready = self.coordinator.intercept_event(chunk);
                    self.emit_chunks(ready);
                }
                other => self.emit(GraphEngineEvent::from_node_event(other)),
            },
            WorkerMessage::Finished {
                node_id,
                execution_id,
                result,
            } => self.handle_finished(node_id, execution_id, result),
        }
    }

    fn handle_finished(
        &mut self,
        node_id: NodeId,
        execution_id: String,
        result: Result<NodeRunResult, NodeExecutionError>,
    ) {
        match result {
            Ok(result) if result.is_suspended() => self.handle_suspension(node_id, result),
            Ok(result) => self.apply_success(node_id, execution_id, result),
            Err(error) => self.apply_failure(node_id, error.to_string()),
        }
    }

    /// A node needs external input: park the whole run. The node stays
    /// un-completed so a resumed engine re-dispatches it.
    fn handle_suspension(&mut self, node_id: NodeId, result: NodeRunResult) {
        let reason = match result.status {
            Some(NodeRunStatus::Suspended { reason }) => reason,
            _ => String::new(),
        };
        self.executing.remove(&node_id);
        if self.paused.is_none() {
            tracing::debug!(node_id = %node_id, %reason, "run pausing");
            self.state.set_paused_node(node_id.clone());
            self.paused = Some((node_id, reason));
        }

        // Stop dispatching: nodes already queued keep their Taken routing
        // state and are re-seeded on resume.
        while let Ok(queued) = self.ready_rx.try_recv() {
            self.executing.remove(&queued);
        }
    }

    fn apply_success(&mut self, node_id: NodeId, execution_id: String, result: NodeRunResult) {
        let Some(node) = self.graph.node(&node_id).cloned() else {
            return;
        };

        // A branch node that selected nothing cannot be routed around.
        if node.execution_type() == NodeExecutionType::Branch
            && result.edge_source_handle.is_none()
        {
            self.apply_failure(node_id, "branch node selected no edge".to_string());
            return;
        }

        for (field, value) in &result.outputs {
            self.state
                .add_variable(Selector::of(node_id.clone(), field.clone()), value.clone());
        }
        self.state.mark_node_completed(node_id.clone());
        self.retry_counts.remove(&node_id);
        self.executing.remove(&node_id);

        // Resolve run outputs.
        if node.node_type() == NodeType::End {
            for (field, value) in &result.outputs {
                self.state.set_output(field.clone(), value.to_value());
            }
        } else if node.execution_type() == NodeExecutionType::Response {
            for (field, value) in &result.outputs {
                self.state.merge_output(field, value.to_value());
            }
        }

        self.emit(GraphEngineEvent::NodeRunSucceeded {
            node_id: node_id.clone(),
            node_type: node.node_type(),
            execution_id,
            outputs: result.outputs.clone(),
        });
        let chunks = self.coordinator.notify_node_succeeded();
        self.emit_chunks(chunks);

        // Route downstream.
        let outgoing: Vec<(EdgeId, bool)> = self
            .graph
            .get_outgoing_edges(&node_id)
            .iter()
            .map(|edge| {
                let taken = if node.execution_type() == NodeExecutionType::Branch {
                    edge.matches_handle(result.edge_source_handle.as_deref())
                } else {
                    true
                };
                (edge.id.clone(), taken)
            })
            .collect();

        // Skipped edges first, so fan-in readiness sees final states.
        for (edge_id, taken) in &outgoing {
            if !taken {
                self.skip_edge(edge_id.clone());
            }
        }
        for (edge_id, taken) in outgoing {
            if taken {
                self.take_edge(edge_id);
            }
        }
    }

    fn apply_failure(&mut self, node_id: NodeId, error: String) {
        let node = self.graph.node(&node_id).cloned();

        if let Some(node) = &node {
            if let Some(retry) = node.retry_config() {
                let attempts = self.retry_counts.get(&node_id).copied().unwrap_or(0);
                if attempts < retry.max_retries {
                    let next = attempts + 1;
                    self.retry_counts.insert(node_id.clone(), next);
                    self.emit(GraphEngineEvent::NodeRunRetry {
                        node_id: node_id.clone(),
                        retry_index: next,
                        error,
                    });
                    // Re-dispatch after the backoff interval; the node stays
                    // in `executing` until it terminates for real.
                    let ready_tx = self.ready_tx.clone();
                    let delay = retry.interval;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = ready_tx.send(node_id);
                    });
                    return;
                }
            }
        }

        tracing::warn!(node_id = %node_id, %error, "node failed");
        self.retry_counts.remove(&node_id);
        self.executing.remove(&node_id);
        self.state.mark_node_failed(node_id.clone());
        self.emit(GraphEngineEvent::NodeRunFailed {
            node_id: node_id.clone(),
            node_type: node
                .map(|n| n.node_type())
                .unwrap_or(NodeType::Custom("unknown".into())),
            error,
        });

        // Abandon everything solely reachable through the failed node;
        // independent branches continue.
        let outgoing: Vec<EdgeId> = self
            .graph
            .get_outgoing_edges(&node_id)
            .iter()
            .map(|e| e.id.clone())
            .collect();
        for edge_id in outgoing {
            self.skip_edge(edge_id);
        }
    }

    // ------------------------------------------------------------------
    // Edge-state propagation
    // ------------------------------------------------------------------

    fn take_edge(&mut self, edge_id: EdgeId) {
        self.state.set_edge_state(edge_id.clone(), RouteState::Taken);
        let chunks = self.coordinator.on_edge_taken(&edge_id);
        self.emit_chunks(chunks);

        if let Some(head) = self.graph.edge(&edge_id).map(|e| e.head.clone()) {
            if self.is_node_ready(&head) && !self.state.is_node_completed(&head) {
                self.enqueue_node(head);
            }
        }
    }

    fn skip_edge(&mut self, edge_id: EdgeId) {
        self.state.set_edge_state(edge_id.clone(), RouteState::Skipped);
        self.propagate_skip_from_edge(&edge_id);
    }

    /// Downstream of a skipped edge: a node with any undecided incoming
    /// edge waits; a node with a taken incoming edge may now be ready; a
    /// node whose incoming edges are all skipped is skipped itself, and the
    /// skip propagates through its outgoing edges.
    fn propagate_skip_from_edge(&mut self, edge_id: &EdgeId) {
        let Some(head) = self.graph.edge(edge_id).map(|e| e.head.clone()) else {
            return;
        };

        let mut any_unknown = false;
        let mut any_taken = false;
        for edge in self.graph.get_incoming_edges(&head) {
            match self.state.edge_state(&edge.id) {
                RouteState::Unknown => any_unknown = true,
                RouteState::Taken => any_taken = true,
                RouteState::Skipped => {}
            }
        }

        if any_unknown {
            return;
        }
        if any_taken {
            if self.is_node_ready(&head) && !self.state.is_node_completed(&head) {
                self.enqueue_node(head);
            }
            return;
        }

        // Already propagated through this node.
        if self.state.node_state(&head) == RouteState::Skipped {
            return;
        }
        self.state.set_node_state(head.clone(), RouteState::Skipped);
        let outgoing: Vec<EdgeId> = self
            .graph
            .get_outgoing_edges(&head)
            .iter()
            .map(|e| e.id.clone())
            .collect();
        for outgoing_id in outgoing {
            self.state
                .set_edge_state(outgoing_id.clone(), RouteState::Skipped);
            self.propagate_skip_from_edge(&outgoing_id);
        }
    }

    /// A node is ready when no incoming edge is undecided and at least one
    /// is taken (nodes without incoming edges are always ready).
    fn is_node_ready(&self, node_id: &NodeId) -> bool {
        let incoming = self.graph.get_incoming_edges(node_id);
        if incoming.is_empty() {
            return true;
        }
        let mut any_taken = false;
        for edge in incoming {
            match self.state.edge_state(&edge.id) {
                RouteState::Unknown => return false,
                RouteState::Taken => any_taken = true,
                RouteState::Skipped => {}
            }
        }
        any_taken
    }

    // ------------------------------------------------------------------
    // Dispatch and scaling
    // ------------------------------------------------------------------

    fn enqueue_node(&mut self, node_id: NodeId) {
        self.state.set_node_state(node_id.clone(), RouteState::Taken);
        if self.paused.is_some() {
            // Routing recorded; a resumed engine re-seeds from it.
            return;
        }
        if self.executing.contains(&node_id) || self.state.is_node_completed(&node_id) {
            return;
        }
        self.executing.insert(node_id.clone());
        let _ = self.ready_tx.send(node_id);
        self.maybe_scale_up();
    }

    fn maybe_scale_up(&mut self) {
        if self.workers.is_empty() {
            // Initial sizing has not happened yet; seeding pushes must not
            // preempt it.
            return;
        }
        let should = self.pool.lock().should_scale_up(
            self.workers.len(),
            self.ready_rx.len(),
            self.executing.len(),
        );
        if should {
            self.spawn_worker();
            tracing::debug!(
                workers = self.workers.len(),
                queue_depth = self.ready_rx.len(),
                "scaled up worker pool"
            );
        }
    }

    fn scale_down_idle(&mut self) {
        let idle = self.pool.lock().get_idle_workers(Instant::now());
        if idle.is_empty() {
            return;
        }
        let min_workers = self.pool.lock().min_workers();
        for worker_id in idle {
            if self.workers.len() <= min_workers {
                break;
            }
            if let Some(position) = self.workers.iter().position(|w| w.id == worker_id) {
                let mut handle = self.workers.remove(position);
                handle.stop();
                self.pool.lock().forget_worker(worker_id);
                tracing::debug!(
                    worker_id,
                    workers = self.workers.len(),
                    "scaled down worker pool"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    fn finalize(mut self) {
        for handle in &mut self.workers {
            handle.stop();
        }

        if let Some(reason) = self.aborted.take() {
            self.emit(GraphEngineEvent::GraphRunAborted { reason });
            return;
        }
        if let Some(error) = self.failed.take() {
            self.emit(GraphEngineEvent::GraphRunFailed { error });
            return;
        }
        if let Some((node_id, reason)) = self.paused.take() {
            self.emit(GraphEngineEvent::GraphRunPaused { node_id, reason });
            return;
        }

        let end_nodes: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|(_, node)| node.node_type() == NodeType::End)
            .map(|(id, _)| id.clone())
            .collect();

        let succeeded = if end_nodes.is_empty() {
            self.graph
                .node_ids()
                .iter()
                .all(|id| !self.state.is_node_failed(id))
        } else {
            end_nodes.iter().any(|id| self.state.is_node_completed(id))
        };

        if succeeded {
            self.state.mark_completed();
            self.emit(GraphEngineEvent::GraphRunSucceeded {
                outputs: self.state.outputs(),
            });
        } else {
            self.emit(GraphEngineEvent::GraphRunFailed {
                error: "end node dependencies cannot be satisfied".to_string(),
            });
        }
    }
}
