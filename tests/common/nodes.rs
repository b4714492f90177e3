//! Reusable node implementations for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flowmesh::node::{
    Node, NodeContext, NodeExecutionError, NodeRunResult, RetryConfig,
};
use flowmesh::segment::Segment;
use flowmesh::template::Template;
use flowmesh::types::{NodeExecutionType, NodeType, Selector};

/// Succeeds immediately, optionally with fixed outputs.
pub struct OutputNode {
    node_type: NodeType,
    outputs: Vec<(String, Segment)>,
}

impl OutputNode {
    #[allow(dead_code)]
    pub fn start() -> Self {
        OutputNode {
            node_type: NodeType::Start,
            outputs: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn plain(kind: &str) -> Self {
        OutputNode {
            node_type: NodeType::Custom(kind.into()),
            outputs: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_output(mut self, field: &str, value: Segment) -> Self {
        self.outputs.push((field.to_string(), value));
        self
    }
}

#[async_trait]
impl Node for OutputNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        let mut result = NodeRunResult::empty();
        for (field, value) in &self.outputs {
            result = result.with_output(field.clone(), value.clone());
        }
        Ok(result)
    }

    fn node_type(&self) -> NodeType {
        self.node_type.clone()
    }
}

/// Terminal node: resolves selectors from the pool into its outputs.
pub struct EndNode {
    outputs: Vec<(String, Selector)>,
}

impl EndNode {
    #[allow(dead_code)]
    pub fn new() -> Self {
        EndNode {
            outputs: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_output(mut self, field: &str, selector: Selector) -> Self {
        self.outputs.push((field.to_string(), selector));
        self
    }
}

#[async_trait]
impl Node for EndNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        let mut result = NodeRunResult::empty();
        for (field, selector) in &self.outputs {
            let value = ctx.get_variable(selector).unwrap_or(Segment::None);
            result = result.with_output(field.clone(), value);
        }
        Ok(result)
    }

    fn node_type(&self) -> NodeType {
        NodeType::End
    }
}

/// Streams text fragments for one output field, then commits the joined
/// text as a scalar output.
pub struct StreamingNode {
    field: String,
    chunks: Vec<String>,
}

impl StreamingNode {
    #[allow(dead_code)]
    pub fn new(field: &str, chunks: &[&str]) -> Self {
        StreamingNode {
            field: field.to_string(),
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

#[async_trait]
impl Node for StreamingNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        for (index, chunk) in self.chunks.iter().enumerate() {
            let is_final = index + 1 == self.chunks.len();
            ctx.emit_text(self.field.clone(), chunk.clone(), is_final)?;
        }
        Ok(NodeRunResult::empty()
            .with_output(self.field.clone(), Segment::from(self.chunks.concat())))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Llm
    }
}

/// Branch node that always selects the same handle.
pub struct BranchNode {
    handle: String,
}

impl BranchNode {
    #[allow(dead_code)]
    pub fn selecting(handle: &str) -> Self {
        BranchNode {
            handle: handle.to_string(),
        }
    }
}

#[async_trait]
impl Node for BranchNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        Ok(NodeRunResult::empty().with_edge_source_handle(self.handle.clone()))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("if_else".into())
    }

    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Branch
    }
}

/// Always fails.
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        Err(NodeExecutionError::Failed("boom".to_string()))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("failing".into())
    }
}

/// Fails the first `failures` attempts, then succeeds. Carries a retry
/// policy so the engine re-dispatches it.
pub struct FlakyNode {
    failures: u32,
    attempts: AtomicU32,
    retry: RetryConfig,
}

impl FlakyNode {
    #[allow(dead_code)]
    pub fn new(failures: u32, max_retries: u32) -> Self {
        FlakyNode {
            failures,
            attempts: AtomicU32::new(0),
            retry: RetryConfig::new(max_retries, Duration::from_millis(5)),
        }
    }
}

#[async_trait]
impl Node for FlakyNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(NodeExecutionError::Provider {
                provider: "test",
                message: format!("transient failure on attempt {attempt}"),
            });
        }
        Ok(NodeRunResult::empty().with_output("ok", Segment::from(true)))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("flaky".into())
    }

    fn retry_config(&self) -> Option<RetryConfig> {
        Some(self.retry)
    }
}

/// Sleeps before succeeding; used for cancellation tests.
pub struct SlowNode {
    delay: Duration,
}

impl SlowNode {
    #[allow(dead_code)]
    pub fn new(delay: Duration) -> Self {
        SlowNode { delay }
    }
}

#[async_trait]
impl Node for SlowNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeRunResult::empty())
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("slow".into())
    }
}

/// Container-style node that reports iteration progress and an agent log
/// while looping over its items.
pub struct IteratingNode {
    items: Vec<String>,
}

impl IteratingNode {
    #[allow(dead_code)]
    pub fn over(items: &[&str]) -> Self {
        IteratingNode {
            items: items.iter().map(|i| (*i).to_string()).collect(),
        }
    }
}

#[async_trait]
impl Node for IteratingNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        use flowmesh::events::{AgentLogEntry, NodeEvent};

        ctx.emit(NodeEvent::IterationStarted {
            node_id: ctx.node_id.clone(),
        })?;
        for (index, item) in self.items.iter().enumerate() {
            ctx.emit(NodeEvent::IterationNext {
                node_id: ctx.node_id.clone(),
                index,
            })?;
            ctx.emit(NodeEvent::AgentLog(AgentLogEntry::new(
                ctx.node_id.clone(),
                "item",
                serde_json::json!({ "value": item }),
            )))?;
        }
        ctx.emit(NodeEvent::IterationSucceeded {
            node_id: ctx.node_id.clone(),
            outputs: serde_json::json!({ "count": self.items.len() }),
        })?;

        Ok(NodeRunResult::empty()
            .with_output("count", Segment::Integer(self.items.len() as i64)))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("iteration".into())
    }

    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Container
    }
}

/// Response node carrying a template; its own run merges the rendered
/// scalar form of the template into the run outputs.
pub struct ResponseNode {
    template: Template,
}

impl ResponseNode {
    #[allow(dead_code)]
    pub fn new(raw_template: &str) -> Self {
        ResponseNode {
            template: Template::parse(raw_template),
        }
    }
}

#[async_trait]
impl Node for ResponseNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        let mut rendered = String::new();
        for segment in &self.template.segments {
            match segment {
                flowmesh::template::TemplateSegment::Text(text) => rendered.push_str(text),
                flowmesh::template::TemplateSegment::Variable(selector) => {
                    if let Some(value) = ctx.get_variable(selector) {
                        rendered.push_str(&value.to_display_string());
                    }
                }
            }
        }
        Ok(NodeRunResult::empty().with_output("answer", Segment::from(rendered)))
    }

    fn node_type(&self) -> NodeType {
        NodeType::Custom("answer".into())
    }

    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Response
    }

    fn template(&self) -> Option<Template> {
        Some(self.template.clone())
    }
}
