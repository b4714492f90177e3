mod common;

use std::sync::Arc;

use common::*;
use flowmesh::engine::ResponseStreamCoordinator;
use flowmesh::events::StreamChunk;
use flowmesh::graph::Graph;
use flowmesh::segment::Segment;
use flowmesh::state::GraphRuntimeState;
use flowmesh::template::Template;
use flowmesh::types::{ChunkType, Selector};

fn chunk(node: &str, selector: Selector, text: &str, is_final: bool) -> StreamChunk {
    StreamChunk {
        node_id: node.to_string(),
        execution_id: format!("exec-{node}"),
        selector,
        chunk: text.to_string(),
        chunk_type: ChunkType::Text,
        is_final,
    }
}

/// Graph with two producers and no response nodes, for buffer-level tests.
fn plain_setup() -> (ResponseStreamCoordinator, Arc<GraphRuntimeState>) {
    let graph = Arc::new(
        Graph::new()
            .add_root("n", OutputNode::start())
            .add_node("other", OutputNode::plain("other"), "n", None)
            .build()
            .unwrap(),
    );
    let state = Arc::new(GraphRuntimeState::new());
    let coordinator = ResponseStreamCoordinator::new(graph, Arc::clone(&state));
    coordinator.track_node_execution(&"n".to_string(), "exec-n");
    coordinator.track_node_execution(&"other".to_string(), "exec-other");
    (coordinator, state)
}

#[test]
fn find_child_streams_matches_exact_set() {
    let (coordinator, _state) = plain_setup();
    let gen = Selector::of("n", "generation");

    // Mixed open/closed, interleaved with unrelated selectors.
    coordinator.intercept_event(chunk("n", gen.child("content"), "a", false));
    coordinator.intercept_event(chunk("n", Selector::of("n", "text"), "x", false));
    coordinator.intercept_event(chunk("n", gen.child("tool_calls"), "b", true));
    coordinator.intercept_event(chunk(
        "other",
        Selector::of("other", "generation").child("content"),
        "y",
        false,
    ));
    coordinator.intercept_event(chunk("n", gen.child("tool_results"), "c", true));

    let children = coordinator.find_child_streams(&gen);
    assert_eq!(
        children,
        vec![
            gen.child("content"),
            gen.child("tool_calls"),
            gen.child("tool_results"),
        ]
    );
}

#[test]
fn chunks_from_untracked_nodes_are_dropped() {
    let graph = Arc::new(
        Graph::new()
            .add_root("n", OutputNode::start())
            .build()
            .unwrap(),
    );
    let coordinator =
        ResponseStreamCoordinator::new(graph, Arc::new(GraphRuntimeState::new()));

    // No track_node_execution call for "n".
    coordinator.intercept_event(chunk("n", Selector::of("n", "text"), "x", true));
    assert!(coordinator
        .find_child_streams(&Selector::new(vec!["n".into()]))
        .is_empty());
}

#[test]
fn closed_streams_reject_further_chunks_but_stay_queryable() {
    let (coordinator, _state) = plain_setup();
    let sel = Selector::of("n", "text");

    coordinator.intercept_event(chunk("n", sel.clone(), "done", true));
    assert!(coordinator.is_stream_closed(&sel));

    // A late chunk for the closed selector is dropped.
    coordinator.intercept_event(chunk("n", sel.clone(), "late", false));
    assert!(coordinator.is_stream_closed(&sel));

    let children = coordinator.find_child_streams(&Selector::new(vec!["n".into()]));
    assert_eq!(children, vec![sel]);
}

#[test]
fn template_flush_interleaves_text_and_streams() {
    // root(llm) -> answer(response), template: "A: {{#llm.text#}}!"
    let graph = Arc::new(
        Graph::new()
            .add_root("llm", StreamingNode::new("text", &["x"]))
            .add_node("answer", ResponseNode::new("A: {{#llm.text#}}!"), "llm", None)
            .build()
            .unwrap(),
    );
    let state = Arc::new(GraphRuntimeState::new());
    let coordinator = ResponseStreamCoordinator::new(Arc::clone(&graph), Arc::clone(&state));
    coordinator.track_node_execution(&"llm".to_string(), "exec-llm");

    // No branch edges from root to answer: registration activates the
    // session and flushes the leading literal immediately.
    let emitted = coordinator.register(&"answer".to_string(), Template::parse("A: {{#llm.text#}}!"));
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].chunk, "A: ");
    assert!(!emitted[0].is_final);

    // Streamed chunks forward as they arrive.
    let emitted = coordinator.intercept_event(chunk("llm", Selector::of("llm", "text"), "he", false));
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].chunk, "he");

    // The final chunk completes the variable segment and releases the
    // trailing literal, which ends the template.
    let emitted = coordinator.intercept_event(chunk("llm", Selector::of("llm", "text"), "llo", true));
    let texts: Vec<&str> = emitted.iter().map(|c| c.chunk.as_str()).collect();
    assert_eq!(texts, vec!["llo", "!"]);
    assert!(emitted.last().unwrap().is_final);
}

#[test]
fn scalar_reference_flushes_from_pool() {
    let graph = Arc::new(
        Graph::new()
            .add_root("calc", OutputNode::start())
            .add_node("answer", ResponseNode::new("{{#calc.total#}}"), "calc", None)
            .build()
            .unwrap(),
    );
    let state = Arc::new(GraphRuntimeState::new());
    let coordinator = ResponseStreamCoordinator::new(Arc::clone(&graph), Arc::clone(&state));

    let emitted = coordinator.register(&"answer".to_string(), Template::parse("{{#calc.total#}}"));
    assert!(emitted.is_empty());

    // Commit the scalar the way the dispatcher does, then re-flush.
    state.add_variable(Selector::of("calc", "total"), Segment::Integer(42));
    state.mark_node_completed("calc".to_string());
    let emitted = coordinator.notify_node_succeeded();

    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].chunk, "42");
    assert!(emitted[0].is_final);
    assert_eq!(emitted[0].selector, Selector::of("calc", "total"));
}

#[test]
fn object_reference_fans_out_to_children() {
    let graph = Arc::new(
        Graph::new()
            .add_root("agent", OutputNode::start())
            .add_node(
                "answer",
                ResponseNode::new("{{#agent.generation#}}"),
                "agent",
                None,
            )
            .build()
            .unwrap(),
    );
    let state = Arc::new(GraphRuntimeState::new());
    let coordinator = ResponseStreamCoordinator::new(Arc::clone(&graph), Arc::clone(&state));
    coordinator.track_node_execution(&"agent".to_string(), "exec-agent");
    coordinator.register(&"answer".to_string(), Template::parse("{{#agent.generation#}}"));

    let gen = Selector::of("agent", "generation");

    // Child streams appear while the producer runs; each forwards its own
    // ordered stream.
    let emitted =
        coordinator.intercept_event(chunk("agent", gen.child("content"), "thinking", false));
    assert_eq!(
        emitted.iter().map(|c| c.chunk.as_str()).collect::<Vec<_>>(),
        vec!["thinking"]
    );

    let emitted = coordinator.intercept_event(StreamChunk {
        node_id: "agent".into(),
        execution_id: "exec-agent".into(),
        selector: gen.child("tool_calls"),
        chunk: r#"{"name":"search"}"#.into(),
        chunk_type: ChunkType::ToolCall,
        is_final: true,
    });
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].chunk_type, ChunkType::ToolCall);

    // Parent completes only when every child is closed and the producer
    // finished.
    let emitted = coordinator.intercept_event(chunk("agent", gen.child("content"), "done", true));
    assert_eq!(emitted.len(), 1);

    state.mark_node_completed("agent".to_string());
    let emitted = coordinator.notify_node_succeeded();
    assert!(emitted.is_empty());

    // All children closed + producer complete: nothing further pends, the
    // session has ended and a new flush is a no-op.
    assert!(coordinator.notify_node_succeeded().is_empty());
}

#[test]
fn waiting_session_starts_after_active_completes() {
    // Two response nodes; sessions serialize on one output stream.
    let graph = Arc::new(
        Graph::new()
            .add_root("src", StreamingNode::new("text", &["x"]))
            .add_node("answer_a", ResponseNode::new("{{#src.text#}}"), "src", None)
            .add_node("answer_b", ResponseNode::new("done"), "answer_a", None)
            .build()
            .unwrap(),
    );
    let state = Arc::new(GraphRuntimeState::new());
    let coordinator = ResponseStreamCoordinator::new(Arc::clone(&graph), state);
    coordinator.track_node_execution(&"src".to_string(), "exec-src");

    // Both sessions activate eagerly (no blocking edges); the first stays
    // active waiting on its stream, the second queues behind it.
    let first = coordinator.register(&"answer_a".to_string(), Template::parse("{{#src.text#}}"));
    let second = coordinator.register(&"answer_b".to_string(), Template::parse("done"));
    assert!(first.is_empty());
    assert!(second.is_empty());

    // Closing the referenced stream completes the active session and hands
    // over to the queued one in the same flush.
    let emitted = coordinator.intercept_event(chunk("src", Selector::of("src", "text"), "x", true));
    let texts: Vec<&str> = emitted.iter().map(|c| c.chunk.as_str()).collect();
    assert_eq!(texts, vec!["x", "done"]);
}
