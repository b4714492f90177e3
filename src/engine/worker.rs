//! Worker tasks: pull node ids from the ready queue, execute, report back.
//!
//! A worker owns nothing but channel ends. It marks itself active while a
//! node runs, forwards the node's streamed events to the dispatcher in
//! order, and finishes with a single terminal message carrying the run
//! result. Stopping is cooperative: a retire signal is only observed
//! between executions.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::pool::{WorkerId, WorkerPoolManager};
use crate::events::NodeEvent;
use crate::graph::Graph;
use crate::node::{NodeContext, NodeExecutionError, NodeRunResult};
use crate::state::GraphRuntimeState;
use crate::types::NodeId;

/// Messages a worker sends to the dispatcher.
pub(crate) enum WorkerMessage {
    /// A worker picked the node off the ready queue.
    Started {
        node_id: NodeId,
        execution_id: String,
    },
    /// An event the node emitted while running.
    Event(NodeEvent),
    /// The node's execution finished (successfully or not).
    Finished {
        node_id: NodeId,
        execution_id: String,
        result: Result<NodeRunResult, NodeExecutionError>,
    },
}

/// Handle the dispatcher keeps per spawned worker.
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    stop: Option<oneshot::Sender<()>>,
    _join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to retire after its current execution.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Spawn one worker task.
pub(crate) fn spawn_worker(
    id: WorkerId,
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    ready_rx: flume::Receiver<NodeId>,
    messages: flume::Sender<WorkerMessage>,
    pool: Arc<Mutex<WorkerPoolManager>>,
) -> WorkerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        tracing::debug!(worker_id = id, "worker started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                next = ready_rx.recv_async() => match next {
                    // Ready queue closed: the dispatcher is gone.
                    Err(_) => break,
                    Ok(node_id) => {
                        pool.lock().track_worker_activity(id, true);
                        execute_node(&graph, &state, &messages, node_id).await;
                        pool.lock().track_worker_activity(id, false);
                    }
                }
            }
        }
        tracing::debug!(worker_id = id, "worker retired");
    });

    WorkerHandle {
        id,
        stop: Some(stop_tx),
        _join: join,
    }
}

async fn execute_node(
    graph: &Arc<Graph>,
    state: &Arc<GraphRuntimeState>,
    messages: &flume::Sender<WorkerMessage>,
    node_id: NodeId,
) {
    let Some(node) = graph.node(&node_id).cloned() else {
        tracing::warn!(node_id = %node_id, "ready queue produced unknown node id");
        return;
    };

    let execution_id = Uuid::new_v4().to_string();
    if messages
        .send(WorkerMessage::Started {
            node_id: node_id.clone(),
            execution_id: execution_id.clone(),
        })
        .is_err()
    {
        return;
    }

    // Forward the node's events to the dispatcher as they are emitted, and
    // make sure every forwarded event precedes the terminal message.
    let (event_tx, event_rx) = flume::unbounded::<NodeEvent>();
    let forward_to = messages.clone();
    let forwarder = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            if forward_to.send(WorkerMessage::Event(event)).is_err() {
                break;
            }
        }
    });

    let ctx = NodeContext::new(
        node_id.clone(),
        execution_id.clone(),
        Arc::clone(state),
        event_tx,
    );
    let result = node.run(ctx).await;

    // All context clones are gone once run returns; the forwarder drains
    // the remaining events and exits.
    let _ = forwarder.await;

    let _ = messages.send(WorkerMessage::Finished {
        node_id,
        execution_id,
        result,
    });
}
