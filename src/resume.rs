//! Live-session resume signaling.
//!
//! Unlike snapshot-based pause/resume, this subsystem serves *active*
//! waiting connections: a transport-layer task blocks on a
//! [`ResumeChannel`] for a paused run while an external actor (a reviewer
//! in a debugger UI, typically) pushes a [`ResumeSignal`] into it through
//! the [`ResumeChannelRegistry`].
//!
//! Timeouts and closed channels are expected, frequent conditions and are
//! therefore result-coded (`None` / `false`), never errors. A hard 300 s
//! wait ceiling guarantees a debug session can never block a transport
//! thread indefinitely, and the registry time-evicts abandoned channels to
//! bound memory.
//!
//! The registry is an explicit process-scoped context: create it once at
//! startup and pass it by reference into the transport layer and the
//! engine's caller. There is no global instance and no import-time side
//! effect.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::types::NodeId;

/// Hard ceiling on a single wait, regardless of the requested timeout.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

/// Default age after which an abandoned channel is evicted.
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 3600;

/// Decision pushed into a paused run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeSignal {
    /// Action selected by the external actor (e.g. `"continue"`).
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub user_id: String,
    /// Node the run is paused on.
    pub paused_node_id: NodeId,
}

#[derive(Debug, Default)]
struct ChannelState {
    signal: Option<ResumeSignal>,
    closed: bool,
}

/// Single-shot wait/signal/close primitive for one paused run.
///
/// One waiter blocks in [`wait_for_signal`](Self::wait_for_signal); one
/// sender delivers at most one signal. Closing is idempotent and unblocks
/// the waiter with `None`.
#[derive(Debug, Default)]
pub struct ResumeChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
}

impl ResumeChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a signal arrives, the channel closes, or the timeout
    /// elapses. The effective timeout is clamped to the hard 300 s ceiling
    /// even when `None` or larger is requested.
    pub async fn wait_for_signal(&self, timeout: Option<Duration>) -> Option<ResumeSignal> {
        let effective = timeout.map_or(MAX_WAIT, |t| t.min(MAX_WAIT));
        let deadline = tokio::time::Instant::now() + effective;

        loop {
            // Register interest before inspecting state, so a signal or
            // close landing in between still wakes this waiter.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(signal) = state.signal.take() {
                    return Some(signal);
                }
                if state.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Normal wait termination, not an error.
                return None;
            }
        }
    }

    /// Deliver a signal to the waiter. Returns `false` if the channel was
    /// already closed.
    pub fn send_signal(&self, signal: ResumeSignal) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.signal = Some(signal);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Close the channel, unblocking any waiter with `None`. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

struct RegistryEntry {
    channel: Arc<ResumeChannel>,
    registered_at: DateTime<Utc>,
}

/// Per-run resume channels under one coarse lock.
pub struct ResumeChannelRegistry {
    entries: Mutex<FxHashMap<String, RegistryEntry>>,
    max_age: ChronoDuration,
}

impl Default for ResumeChannelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_SECONDS)
    }
}

impl ResumeChannelRegistry {
    /// Registry evicting entries older than `max_age_seconds`.
    #[must_use]
    pub fn new(max_age_seconds: i64) -> Self {
        ResumeChannelRegistry {
            entries: Mutex::new(FxHashMap::default()),
            max_age: ChronoDuration::seconds(max_age_seconds.max(0)),
        }
    }

    /// Register a fresh channel for a run.
    ///
    /// Evicts entries older than the registry's maximum age, then closes
    /// and replaces any existing channel for the same run id.
    pub fn register(&self, workflow_run_id: impl Into<String>) -> Arc<ResumeChannel> {
        let run_id = workflow_run_id.into();
        let mut entries = self.entries.lock();

        let cutoff = Utc::now() - self.max_age;
        entries.retain(|stale_id, entry| {
            let keep = entry.registered_at >= cutoff;
            if !keep {
                tracing::debug!(run_id = %stale_id, "evicting expired resume channel");
                entry.channel.close();
            }
            keep
        });

        if let Some(previous) = entries.remove(&run_id) {
            previous.channel.close();
        }

        let channel = Arc::new(ResumeChannel::new());
        entries.insert(
            run_id,
            RegistryEntry {
                channel: Arc::clone(&channel),
                registered_at: Utc::now(),
            },
        );
        channel
    }

    /// Deliver a signal to a registered run. Returns `false` (and logs) if
    /// the run is unknown or its channel already closed.
    pub fn send_signal(&self, workflow_run_id: &str, signal: ResumeSignal) -> bool {
        let channel = {
            let entries = self.entries.lock();
            entries
                .get(workflow_run_id)
                .map(|entry| Arc::clone(&entry.channel))
        };
        match channel {
            Some(channel) => channel.send_signal(signal),
            None => {
                tracing::warn!(
                    run_id = %workflow_run_id,
                    "resume signal for unregistered run dropped"
                );
                false
            }
        }
    }

    /// Remove and close a run's channel.
    pub fn unregister(&self, workflow_run_id: &str) {
        if let Some(entry) = self.entries.lock().remove(workflow_run_id) {
            entry.channel.close();
        }
    }

    /// The live channel for a run, if any.
    pub fn get_channel(&self, workflow_run_id: &str) -> Option<Arc<ResumeChannel>> {
        self.entries
            .lock()
            .get(workflow_run_id)
            .map(|entry| Arc::clone(&entry.channel))
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
