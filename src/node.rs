//! Node execution framework.
//!
//! This module defines the capability interface every executable node
//! implements, the context handed to a node while it runs, the result it
//! returns, and the error taxonomy for node failures.
//!
//! The engine depends only on this interface: concrete node behavior (LLM
//! calls, retrieval, tools) lives outside the crate.

// Standard library and external crates
use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Internal crate modules
use crate::events::{NodeEvent, StreamChunk};
use crate::segment::Segment;
use crate::state::GraphRuntimeState;
use crate::template::Template;
use crate::types::{ChunkType, NodeExecutionType, NodeId, NodeType, Selector};

// ============================================================================
// Core Trait
// ============================================================================

/// Capability interface for executable workflow nodes.
///
/// A node receives its configuration once through
/// [`init_node_data`](Node::init_node_data), then may be run at most once
/// per dispatch: `run` produces a lazy, finite, non-restartable sequence of
/// events through the context and finishes with a [`NodeRunResult`]. A
/// resumed run constructs fresh node instances and replays state instead of
/// resuming an exhausted execution.
///
/// # Suspension
///
/// Human-input style nodes return [`NodeRunStatus::Suspended`] when the
/// external decision they wait on has not arrived. The engine then parks the
/// whole run and leaves the node un-completed so a resumed engine
/// re-dispatches it.
#[async_trait]
pub trait Node: Send + Sync {
    /// Consume the node's configuration block. Called once, before the node
    /// is added to a graph.
    fn init_node_data(&mut self, config: &Value) -> Result<(), NodeExecutionError> {
        let _ = config;
        Ok(())
    }

    /// Execute the node.
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError>;

    /// Declared kind of this node.
    fn node_type(&self) -> NodeType;

    /// How the engine routes around this node once it finishes.
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Executable
    }

    /// Whether downstream template references through this node must wait
    /// for it to finish before its variables may be forwarded.
    fn blocks_variable_output(&self) -> bool {
        false
    }

    /// Response template, for nodes with
    /// [`NodeExecutionType::Response`].
    fn template(&self) -> Option<Template> {
        None
    }

    /// Retry policy applied by the engine when `run` fails.
    fn retry_config(&self) -> Option<RetryConfig> {
        None
    }
}

/// Retry policy for failed node executions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before each re-dispatch.
    pub interval: Duration,
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        RetryConfig {
            max_retries,
            interval,
        }
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to a node during dispatch.
///
/// Provides the node's identity for this execution, read access to the
/// shared runtime state, and the emitter for streaming events.
#[derive(Clone)]
pub struct NodeContext {
    /// Id of the node being executed.
    pub node_id: NodeId,
    /// Unique id of this execution attempt.
    pub execution_id: String,
    state: Arc<GraphRuntimeState>,
    events: flume::Sender<NodeEvent>,
}

impl NodeContext {
    pub(crate) fn new(
        node_id: NodeId,
        execution_id: String,
        state: Arc<GraphRuntimeState>,
        events: flume::Sender<NodeEvent>,
    ) -> Self {
        NodeContext {
            node_id,
            execution_id,
            state,
            events,
        }
    }

    /// Read a committed variable from the pool.
    pub fn get_variable(&self, selector: &Selector) -> Option<Segment> {
        self.state.get_variable(selector)
    }

    /// Whether a non-`None` variable exists at the selector.
    pub fn variable_exists(&self, selector: &Selector) -> bool {
        self.state.variable_exists(selector)
    }

    /// Emit an arbitrary node event.
    pub fn emit(&self, event: NodeEvent) -> Result<(), NodeContextError> {
        self.events
            .send(event)
            .map_err(|_| NodeContextError::EventQueueUnavailable)
    }

    /// Emit a stream chunk at a full selector.
    ///
    /// Tool call/result chunks must arrive atomic; `is_final` is forced for
    /// them.
    pub fn emit_chunk(
        &self,
        selector: Selector,
        chunk: impl Into<String>,
        chunk_type: ChunkType,
        is_final: bool,
    ) -> Result<(), NodeContextError> {
        self.emit(NodeEvent::StreamChunk(StreamChunk {
            node_id: self.node_id.clone(),
            execution_id: self.execution_id.clone(),
            selector,
            chunk: chunk.into(),
            chunk_type,
            is_final: is_final || chunk_type.is_atomic(),
        }))
    }

    /// Emit a text chunk for one of this node's own output fields.
    pub fn emit_text(
        &self,
        field: impl Into<String>,
        chunk: impl Into<String>,
        is_final: bool,
    ) -> Result<(), NodeContextError> {
        self.emit_chunk(
            Selector::of(self.node_id.clone(), field),
            chunk,
            ChunkType::Text,
            is_final,
        )
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Run Results
// ============================================================================

/// Terminal status of a single node execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRunStatus {
    /// The node finished; outputs are ready to commit.
    Succeeded,
    /// The node must wait for external input; the engine pauses the run.
    Suspended { reason: String },
}

/// What a node execution produced.
#[derive(Clone, Debug, Default)]
pub struct NodeRunResult {
    pub status: Option<NodeRunStatus>,
    /// Output fields, committed to the pool under `(node_id, field)`.
    pub outputs: FxHashMap<String, Segment>,
    /// Branch selector chosen by branch nodes.
    pub edge_source_handle: Option<String>,
}

impl NodeRunResult {
    /// Successful result with the given outputs.
    #[must_use]
    pub fn succeeded(outputs: FxHashMap<String, Segment>) -> Self {
        NodeRunResult {
            status: Some(NodeRunStatus::Succeeded),
            outputs,
            edge_source_handle: None,
        }
    }

    /// Successful result with no outputs.
    #[must_use]
    pub fn empty() -> Self {
        Self::succeeded(FxHashMap::default())
    }

    /// Suspension: the node needs external input before it can finish.
    #[must_use]
    pub fn suspended(reason: impl Into<String>) -> Self {
        NodeRunResult {
            status: Some(NodeRunStatus::Suspended {
                reason: reason.into(),
            }),
            outputs: FxHashMap::default(),
            edge_source_handle: None,
        }
    }

    /// Attach the branch handle selected by this execution.
    #[must_use]
    pub fn with_edge_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.edge_source_handle = Some(handle.into());
        self
    }

    /// Attach one output field.
    #[must_use]
    pub fn with_output(mut self, field: impl Into<String>, value: Segment) -> Self {
        self.outputs.insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, Some(NodeRunStatus::Suspended { .. }))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when using NodeContext emitters.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be delivered because the dispatcher is gone.
    #[error("failed to emit node event: event queue unavailable")]
    #[diagnostic(
        code(flowmesh::node::event_queue_unavailable),
        help("The engine has shut down or aborted; the node should return promptly.")
    )]
    EventQueueUnavailable,
}

/// Errors raised by a node's execution.
///
/// A `NodeExecutionError` marks that node failed. The engine then evaluates
/// remaining reachability: branches not solely dependent on the failed node
/// continue; the run fails only if the End node's dependencies can no
/// longer all be satisfied.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeExecutionError {
    /// Expected input data is missing from the variable pool.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(flowmesh::node::missing_input),
        help("Check that an upstream node produced the required variable.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(flowmesh::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Node configuration rejected by `init_node_data`.
    #[error("invalid node configuration: {0}")]
    #[diagnostic(
        code(flowmesh::node::invalid_config),
        help("Check the node's configuration block against its schema.")
    )]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(flowmesh::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Event emission failed.
    #[error("event emission failed: {0}")]
    #[diagnostic(code(flowmesh::node::event))]
    Event(#[from] NodeContextError),

    /// Catch-all execution failure.
    #[error("node execution failed: {0}")]
    #[diagnostic(code(flowmesh::node::failed))]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_result_builders() {
        let result = NodeRunResult::empty()
            .with_output("text", Segment::from("hello"))
            .with_edge_source_handle("true");
        assert_eq!(result.status, Some(NodeRunStatus::Succeeded));
        assert_eq!(result.edge_source_handle.as_deref(), Some("true"));
        assert!(!result.is_suspended());

        let paused = NodeRunResult::suspended("awaiting form submission");
        assert!(paused.is_suspended());
    }

    #[tokio::test]
    async fn atomic_chunks_are_forced_final() {
        let (tx, rx) = flume::unbounded();
        let ctx = NodeContext::new(
            "agent".into(),
            "exec-1".into(),
            Arc::new(GraphRuntimeState::new()),
            tx,
        );
        ctx.emit_chunk(
            Selector::of("agent", "tool_calls"),
            r#"{"name":"search"}"#,
            ChunkType::ToolCall,
            false,
        )
        .unwrap();

        match rx.recv().unwrap() {
            NodeEvent::StreamChunk(chunk) => {
                assert!(chunk.is_final);
                assert_eq!(chunk.chunk_type, ChunkType::ToolCall);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
