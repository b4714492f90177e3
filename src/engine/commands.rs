//! Out-of-band control path into a running engine.
//!
//! Commands travel independently of the node data plane. The dispatcher
//! polls the channel between dispatch cycles, so a stop is cooperative:
//! in-flight node executions finish naturally and the engine then emits an
//! aborted terminal event.
//!
//! [`InMemoryChannel`] is process-local. A distributed deployment would
//! implement the same contract over a pub/sub transport; the engine only
//! sees the trait.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A control command delivered to a running engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphEngineCommand {
    /// Stop the run at the next dispatch boundary.
    Abort { reason: String },
}

impl GraphEngineCommand {
    pub fn abort(reason: impl Into<String>) -> Self {
        GraphEngineCommand::Abort {
            reason: reason.into(),
        }
    }
}

/// Contract for delivering commands into an engine.
pub trait CommandChannel: Send + Sync {
    /// Enqueue a command for the engine.
    fn send(&self, command: GraphEngineCommand);

    /// Take the next pending command, if any. Never blocks.
    fn poll(&self) -> Option<GraphEngineCommand>;
}

/// Process-local command channel backed by a mutex-guarded queue.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    queue: Mutex<VecDeque<GraphEngineCommand>>,
}

impl InMemoryChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandChannel for InMemoryChannel {
    fn send(&self, command: GraphEngineCommand) {
        self.queue.lock().push_back(command);
    }

    fn poll(&self) -> Option<GraphEngineCommand> {
        self.queue.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_drain_in_order() {
        let channel = InMemoryChannel::new();
        channel.send(GraphEngineCommand::abort("first"));
        channel.send(GraphEngineCommand::abort("second"));

        assert_eq!(
            channel.poll(),
            Some(GraphEngineCommand::Abort {
                reason: "first".into()
            })
        );
        assert_eq!(
            channel.poll(),
            Some(GraphEngineCommand::Abort {
                reason: "second".into()
            })
        );
        assert_eq!(channel.poll(), None);
    }
}
