pub mod nodes;

#[allow(unused_imports)]
pub use nodes::*;

use flowmesh::events::GraphEngineEvent;

/// Node ids of `NodeRunSucceeded` events, in emission order.
#[allow(dead_code)]
pub fn succeeded_node_ids(events: &[GraphEngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunSucceeded { node_id, .. } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

/// The terminal event of a collected run.
#[allow(dead_code)]
pub fn terminal_event(events: &[GraphEngineEvent]) -> &GraphEngineEvent {
    events
        .last()
        .expect("collected runs always end with a terminal event")
}

/// Payload strings of `NodeRunStreamChunk` events, in emission order.
#[allow(dead_code)]
pub fn chunk_texts(events: &[GraphEngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunStreamChunk(chunk) => Some(chunk.chunk.clone()),
            _ => None,
        })
        .collect()
}
