mod common;

use common::*;
use flowmesh::graph::{Graph, GraphBuildError};
use flowmesh::types::Selector;

#[test]
fn diamond_topology_queries() {
    let graph = Graph::new()
        .add_root("start", OutputNode::start())
        .add_node("left", OutputNode::plain("left"), "start", None)
        .add_node("right", OutputNode::plain("right"), "start", None)
        .add_node("join", OutputNode::plain("join"), "left", None)
        .add_edge("right", "join", None)
        .build()
        .unwrap();

    assert_eq!(graph.root_node(), "start");
    assert_eq!(graph.out_degree(&"start".into()), 2);
    assert_eq!(graph.in_degree(&"join".into()), 2);

    let incoming: Vec<&str> = graph
        .get_incoming_edges(&"join".into())
        .iter()
        .map(|e| e.tail.as_str())
        .collect();
    assert_eq!(incoming, vec!["left", "right"]);

    let outgoing: Vec<&str> = graph
        .get_outgoing_edges(&"start".into())
        .iter()
        .map(|e| e.head.as_str())
        .collect();
    assert_eq!(outgoing, vec!["left", "right"]);
}

#[test]
fn node_registration_order_is_stable() {
    let graph = Graph::new()
        .add_root("c", OutputNode::start())
        .add_node("a", OutputNode::plain("a"), "c", None)
        .add_node("b", OutputNode::plain("b"), "a", None)
        .build()
        .unwrap();
    assert_eq!(graph.node_ids().to_vec(), vec!["c", "a", "b"]);
}

#[test]
fn unknown_target_in_extra_edge_is_rejected() {
    let result = Graph::new()
        .add_root("a", OutputNode::start())
        .add_edge("a", "ghost", None)
        .build();
    assert!(matches!(result, Err(GraphBuildError::UnknownTarget { .. })));
}

#[test]
fn selector_display_and_children() {
    let sel = Selector::of("llm", "generation");
    assert_eq!(sel.to_string(), "llm.generation");
    assert_eq!(sel.child("content").to_string(), "llm.generation.content");
    assert_eq!(sel.node_id(), Some("llm"));
}
