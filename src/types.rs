//! Core identifier types for the flowmesh execution engine.
//!
//! This module defines the fundamental vocabulary shared by the graph model,
//! the variable pool, and the engine: node identifiers, output selectors,
//! stream chunk classification, and the routing states tracked while a run
//! is in flight.
//!
//! # Key Types
//!
//! - [`Selector`]: an ordered path (node id + field segments) identifying an
//!   output location, possibly nested
//! - [`ChunkType`]: classification of streamed output fragments
//! - [`NodeExecutionType`]: how the engine treats a node when routing
//! - [`RouteState`]: per-node / per-edge routing state during execution

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within a graph. Unique per graph.
pub type NodeId = String;

/// Identifier of a directed edge within a graph.
pub type EdgeId = String;

/// An ordered path identifying a (possibly nested) output location.
///
/// The first segment is a node id, the remaining segments name fields inside
/// that node's output. Selectors are the keys of the variable pool and of
/// the response coordinator's stream buffers.
///
/// # Examples
///
/// ```rust
/// use flowmesh::types::Selector;
///
/// let sel = Selector::of("llm", "text");
/// assert_eq!(sel.node_id(), Some("llm"));
/// assert_eq!(sel.to_string(), "llm.text");
///
/// let nested = sel.child("tool_calls");
/// assert!(nested.starts_with(&sel));
/// assert_eq!(nested.len(), 3);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selector(Vec<String>);

impl Selector {
    /// Build a selector from raw path segments.
    pub fn new(segments: Vec<String>) -> Self {
        Selector(segments)
    }

    /// Convenience constructor for the common two-segment `(node, field)` case.
    pub fn of(node_id: impl Into<String>, field: impl Into<String>) -> Self {
        Selector(vec![node_id.into(), field.into()])
    }

    /// Build a selector from anything iterable over string-likes.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector(parts.into_iter().map(Into::into).collect())
    }

    /// The node id this selector belongs to, if the selector is non-empty.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Raw path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` begins with every segment of `prefix`.
    ///
    /// A selector is considered to start with itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Selector) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// A new selector extended by one trailing segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Selector(segments)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<Vec<String>> for Selector {
    fn from(segments: Vec<String>) -> Self {
        Selector(segments)
    }
}

impl From<&[&str]> for Selector {
    fn from(segments: &[&str]) -> Self {
        Selector(segments.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Classification of a streamed output fragment.
///
/// Text chunks may arrive incrementally with only the last one marked final;
/// tool call/result chunks are atomic and arrive already final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    ToolCall,
    ToolResult,
}

impl ChunkType {
    /// Tool call/result chunks carry a complete payload in a single event.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        matches!(self, ChunkType::ToolCall | ChunkType::ToolResult)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Text => write!(f, "text"),
            ChunkType::ToolCall => write!(f, "tool_call"),
            ChunkType::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// How the engine routes around a node once it finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionType {
    /// Ordinary node: all outgoing edges are taken on success.
    Executable,
    /// Branch node: only edges matching the selected source handle are taken.
    Branch,
    /// Container node hosting a nested graph (iteration/loop).
    Container,
    /// Response node: participates in ordered output streaming.
    Response,
}

impl fmt::Display for NodeExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeExecutionType::Executable => write!(f, "executable"),
            NodeExecutionType::Branch => write!(f, "branch"),
            NodeExecutionType::Container => write!(f, "container"),
            NodeExecutionType::Response => write!(f, "response"),
        }
    }
}

/// Kind of a node, as declared by its implementation.
///
/// The set is open: engine behavior keys off [`NodeExecutionType`] and the
/// run result, not off this label, with the exception of `End` (terminal
/// output collection). `Custom` covers application-defined kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Start,
    End,
    HumanInput,
    Llm,
    Agent,
    Custom(String),
}

impl NodeType {
    /// Stable string form used in events and snapshots.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::HumanInput => "human_input",
            NodeType::Llm => "llm",
            NodeType::Agent => "agent",
            NodeType::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s {
            "start" => NodeType::Start,
            "end" => NodeType::End,
            "human_input" => NodeType::HumanInput,
            "llm" => NodeType::Llm,
            "agent" => NodeType::Agent,
            other => NodeType::Custom(other.to_string()),
        }
    }
}

/// Routing state of a node or edge while a run is in flight.
///
/// Every node and edge starts `Unknown`. Success marks outgoing edges
/// `Taken` (or `Skipped` for unselected branch edges); skip states propagate
/// downstream until a path with a taken edge is found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    #[default]
    Unknown,
    Taken,
    Skipped,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteState::Unknown => write!(f, "unknown"),
            RouteState::Taken => write!(f, "taken"),
            RouteState::Skipped => write!(f, "skipped"),
        }
    }
}
