mod common;

use std::io::{Read, Write};
use std::sync::Arc;

use common::*;
use flowmesh::engine::GraphEngine;
use flowmesh::graph::Graph;
use flowmesh::segment::Segment;
use flowmesh::snapshot::{SnapshotError, SNAPSHOT_VERSION};
use flowmesh::state::GraphRuntimeState;
use flowmesh::types::Selector;

#[test]
fn corrupt_bytes_fail_fast() {
    assert!(matches!(
        GraphRuntimeState::from_snapshot(b"definitely not a snapshot"),
        Err(SnapshotError::Serde { .. })
    ));
}

#[test]
fn newer_version_fails_fast() {
    let state = GraphRuntimeState::new();
    let blob = state.dumps().unwrap();

    let mut parsed: serde_json::Value = serde_json::from_slice(&blob).unwrap();
    parsed["version"] = serde_json::json!(SNAPSHOT_VERSION + 1);
    let tampered = serde_json::to_vec(&parsed).unwrap();

    match GraphRuntimeState::from_snapshot(&tampered) {
        Err(SnapshotError::UnsupportedVersion { found, expected }) => {
            assert_eq!(found, SNAPSHOT_VERSION + 1);
            assert_eq!(expected, SNAPSHOT_VERSION);
        }
        other => panic!("expected version error, got {other:?}"),
    }
}

#[test]
fn snapshot_survives_disk_round_trip() {
    let state = GraphRuntimeState::new();
    state.add_variable(Selector::of("llm", "text"), Segment::from("draft"));
    state.mark_node_completed("llm".to_string());

    let blob = state.dumps().unwrap();

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&blob).unwrap();
    file.flush().unwrap();

    use std::io::Seek;
    file.rewind().unwrap();
    let mut read_back = Vec::new();
    file.read_to_end(&mut read_back).unwrap();

    let restored = GraphRuntimeState::from_snapshot(&read_back).unwrap();
    assert_eq!(
        restored.get_variable(&Selector::of("llm", "text")),
        Some(Segment::from("draft"))
    );
    assert!(restored.is_node_completed(&"llm".to_string()));
}

#[tokio::test]
async fn completed_run_restores_as_completed() {
    let graph = Arc::new(
        Graph::new()
            .add_root("start", OutputNode::start())
            .add_node("end", EndNode::new(), "start", None)
            .build()
            .unwrap(),
    );

    let state = Arc::new(GraphRuntimeState::new());
    let _ = GraphEngine::with_defaults(Arc::clone(&graph), Arc::clone(&state))
        .run()
        .collect()
        .await;
    assert!(state.is_completed());

    let blob = state.dumps().unwrap();
    let restored = GraphRuntimeState::from_snapshot(&blob).unwrap();
    assert!(restored.is_completed());
    assert_eq!(restored.completed_nodes(), state.completed_nodes());
    assert_eq!(restored.started_at(), state.started_at());
}
