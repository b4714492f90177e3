//! Event vocabulary for node execution and engine lifecycle.
//!
//! Two layers of events exist:
//!
//! - [`NodeEvent`]: what a node's execution emits while it runs (stream
//!   chunks, iteration/loop progress, agent logs). Terminal outcomes are not
//!   node events; they come from the node's run result.
//! - [`GraphEngineEvent`]: what the engine emits to its caller — node
//!   lifecycle, re-emitted stream chunks in coordinator order, and the run's
//!   terminal event.
//!
//! Ordering guarantee: events for one node/selector are strict FIFO. The
//! dispatcher is single-threaded over the node-event queue, so no
//! interleaving is possible for the same selector; there is no cross-node
//! ordering beyond dependency edges.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::segment::Segment;
use crate::types::{ChunkType, NodeId, NodeType, Selector};

// ============================================================================
// Shared payloads
// ============================================================================

/// A streamed output fragment for one selector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub node_id: NodeId,
    pub execution_id: String,
    pub selector: Selector,
    pub chunk: String,
    pub chunk_type: ChunkType,
    /// Marks the last chunk for this selector.
    pub is_final: bool,
}

/// A structured log line emitted by agent-style nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub node_id: NodeId,
    pub label: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentLogEntry {
    pub fn new(node_id: impl Into<String>, label: impl Into<String>, data: Value) -> Self {
        AgentLogEntry {
            node_id: node_id.into(),
            label: label.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Node events
// ============================================================================

/// Events a node's execution can emit through its context while running.
///
/// The sequence a node produces is lazy, finite, and non-restartable: once
/// the node returns, no further events for it are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeEvent {
    StreamChunk(StreamChunk),
    IterationStarted { node_id: NodeId },
    IterationNext { node_id: NodeId, index: usize },
    IterationSucceeded { node_id: NodeId, outputs: Value },
    IterationFailed { node_id: NodeId, error: String },
    LoopStarted { node_id: NodeId },
    LoopNext { node_id: NodeId, index: usize },
    LoopSucceeded { node_id: NodeId, outputs: Value },
    LoopFailed { node_id: NodeId, error: String },
    AgentLog(AgentLogEntry),
}

impl NodeEvent {
    /// The node the event belongs to.
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            NodeEvent::StreamChunk(chunk) => &chunk.node_id,
            NodeEvent::IterationStarted { node_id }
            | NodeEvent::IterationNext { node_id, .. }
            | NodeEvent::IterationSucceeded { node_id, .. }
            | NodeEvent::IterationFailed { node_id, .. }
            | NodeEvent::LoopStarted { node_id }
            | NodeEvent::LoopNext { node_id, .. }
            | NodeEvent::LoopSucceeded { node_id, .. }
            | NodeEvent::LoopFailed { node_id, .. } => node_id,
            NodeEvent::AgentLog(entry) => &entry.node_id,
        }
    }
}

// ============================================================================
// Engine events
// ============================================================================

/// Lifecycle and data events emitted by the engine to its caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GraphEngineEvent {
    /// Dispatch is about to begin.
    GraphRunStarted,
    /// A worker picked up the node.
    NodeRunStarted {
        node_id: NodeId,
        node_type: NodeType,
        execution_id: String,
    },
    /// One ordered output fragment, re-emitted via the response coordinator.
    NodeRunStreamChunk(StreamChunk),
    /// The node finished and its outputs were committed to the pool.
    NodeRunSucceeded {
        node_id: NodeId,
        node_type: NodeType,
        execution_id: String,
        outputs: FxHashMap<String, Segment>,
    },
    /// The node failed after exhausting any retries.
    NodeRunFailed {
        node_id: NodeId,
        node_type: NodeType,
        error: String,
    },
    /// The node failed and will be re-dispatched.
    NodeRunRetry {
        node_id: NodeId,
        retry_index: u32,
        error: String,
    },
    /// A human-input style node suspended; the whole run is parked and the
    /// caller should persist the runtime-state snapshot.
    GraphRunPaused { node_id: NodeId, reason: String },
    /// All reachable nodes completed; carries the End-node outputs.
    GraphRunSucceeded { outputs: FxHashMap<String, Value> },
    /// The run cannot complete (End unreachable or engine-level failure).
    GraphRunFailed { error: String },
    /// A stop command was honored at a dispatch boundary.
    GraphRunAborted { reason: String },
    IterationStarted { node_id: NodeId },
    IterationNext { node_id: NodeId, index: usize },
    IterationSucceeded { node_id: NodeId, outputs: Value },
    IterationFailed { node_id: NodeId, error: String },
    LoopStarted { node_id: NodeId },
    LoopNext { node_id: NodeId, index: usize },
    LoopSucceeded { node_id: NodeId, outputs: Value },
    LoopFailed { node_id: NodeId, error: String },
    AgentLog(AgentLogEntry),
}

impl GraphEngineEvent {
    /// Whether this event terminates the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::GraphRunPaused { .. }
                | GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunFailed { .. }
                | GraphEngineEvent::GraphRunAborted { .. }
        )
    }

    /// The node this event concerns, when it concerns exactly one.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeRunStarted { node_id, .. }
            | GraphEngineEvent::NodeRunSucceeded { node_id, .. }
            | GraphEngineEvent::NodeRunFailed { node_id, .. }
            | GraphEngineEvent::NodeRunRetry { node_id, .. }
            | GraphEngineEvent::GraphRunPaused { node_id, .. }
            | GraphEngineEvent::IterationStarted { node_id }
            | GraphEngineEvent::IterationNext { node_id, .. }
            | GraphEngineEvent::IterationSucceeded { node_id, .. }
            | GraphEngineEvent::IterationFailed { node_id, .. }
            | GraphEngineEvent::LoopStarted { node_id }
            | GraphEngineEvent::LoopNext { node_id, .. }
            | GraphEngineEvent::LoopSucceeded { node_id, .. }
            | GraphEngineEvent::LoopFailed { node_id, .. } => Some(node_id),
            GraphEngineEvent::NodeRunStreamChunk(chunk) => Some(&chunk.node_id),
            GraphEngineEvent::AgentLog(entry) => Some(&entry.node_id),
            GraphEngineEvent::GraphRunStarted
            | GraphEngineEvent::GraphRunSucceeded { .. }
            | GraphEngineEvent::GraphRunFailed { .. }
            | GraphEngineEvent::GraphRunAborted { .. } => None,
        }
    }

    /// Promote a node event into the engine event it is re-emitted as.
    pub(crate) fn from_node_event(event: NodeEvent) -> Self {
        match event {
            NodeEvent::StreamChunk(chunk) => GraphEngineEvent::NodeRunStreamChunk(chunk),
            NodeEvent::IterationStarted { node_id } => {
                GraphEngineEvent::IterationStarted { node_id }
            }
            NodeEvent::IterationNext { node_id, index } => {
                GraphEngineEvent::IterationNext { node_id, index }
            }
            NodeEvent::IterationSucceeded { node_id, outputs } => {
                GraphEngineEvent::IterationSucceeded { node_id, outputs }
            }
            NodeEvent::IterationFailed { node_id, error } => {
                GraphEngineEvent::IterationFailed { node_id, error }
            }
            NodeEvent::LoopStarted { node_id } => GraphEngineEvent::LoopStarted { node_id },
            NodeEvent::LoopNext { node_id, index } => {
                GraphEngineEvent::LoopNext { node_id, index }
            }
            NodeEvent::LoopSucceeded { node_id, outputs } => {
                GraphEngineEvent::LoopSucceeded { node_id, outputs }
            }
            NodeEvent::LoopFailed { node_id, error } => {
                GraphEngineEvent::LoopFailed { node_id, error }
            }
            NodeEvent::AgentLog(entry) => GraphEngineEvent::AgentLog(entry),
        }
    }
}
