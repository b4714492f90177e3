//! # Flowmesh: Concurrent Graph Execution Engine
//!
//! Flowmesh runs workflow node graphs with a queue-based dispatcher, a
//! dynamically scaled worker pool, per-field streaming-output coordination,
//! cooperative cancellation, and snapshot-based pause/resume for
//! human-in-the-loop steps.
//!
//! ## Core Concepts
//!
//! - **Graph**: immutable DAG of nodes with optional branch selectors on
//!   edges, validated for full reachability at build time
//! - **Node**: capability interface for units of work; concrete node
//!   business logic lives outside the crate
//! - **GraphRuntimeState**: the variable pool plus execution bookkeeping,
//!   serializable to an opaque, versioned snapshot
//! - **GraphEngine**: the orchestrator — workers, routing, streaming,
//!   pause, terminal events
//! - **ResumeChannel**: live-session resume signaling for paused runs
//!
//! ## Building a Workflow
//!
//! ```rust
//! use async_trait::async_trait;
//! use flowmesh::graph::Graph;
//! use flowmesh::node::{Node, NodeContext, NodeExecutionError, NodeRunResult};
//! use flowmesh::segment::Segment;
//! use flowmesh::types::NodeType;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Node for Echo {
//!     async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
//!         Ok(NodeRunResult::empty().with_output("text", Segment::from("hello")))
//!     }
//!
//!     fn node_type(&self) -> NodeType {
//!         NodeType::Custom("echo".into())
//!     }
//! }
//!
//! let graph = Graph::new()
//!     .add_root("start", Echo)
//!     .add_node("end", Echo, "start", None)
//!     .build()
//!     .expect("valid graph");
//! assert_eq!(graph.node_count(), 2);
//! ```
//!
//! ## Running
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # async fn example(graph: Arc<flowmesh::graph::Graph>) {
//! use flowmesh::engine::GraphEngine;
//! use flowmesh::state::GraphRuntimeState;
//!
//! let state = Arc::new(GraphRuntimeState::new());
//! let events = GraphEngine::with_defaults(graph, Arc::clone(&state)).run();
//! while let Some(_event) = events.next().await {
//!     // React to lifecycle, stream chunks, and the terminal event.
//! }
//!
//! // After a GraphRunPaused event:
//! let blob = state.dumps().expect("snapshot");
//! // ...persist blob; later, GraphRuntimeState::from_snapshot(&blob) + run()
//! // resumes identically.
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Graph model, builder, and topology queries
//! - [`node`] - Node capability trait and execution context
//! - [`engine`] - Engine, worker pool, command channel, response coordinator
//! - [`state`] - Runtime state and snapshots
//! - [`variable_pool`] / [`segment`] - Selector-keyed value store
//! - [`events`] - Node and engine event vocabulary
//! - [`template`] - Response templates
//! - [`resume`] - Live-session resume channels and registry
//! - [`forms`] - Human-input collaborator surface

pub mod config;
pub mod engine;
pub mod events;
pub mod forms;
pub mod graph;
pub mod node;
pub mod resume;
pub mod segment;
pub mod snapshot;
pub mod state;
pub mod telemetry;
pub mod template;
pub mod types;
pub mod variable_pool;
