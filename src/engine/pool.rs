//! Worker pool sizing and scaling decisions.
//!
//! [`WorkerPoolManager`] is advisory: every method is pure computation over
//! its explicit arguments plus the bounded idle-timestamp map. The engine
//! owns actual task lifecycle and polls these decisions on every ready-queue
//! push and on a periodic idle scan.

use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

use crate::graph::Graph;

/// Identifier of one worker task within an engine.
pub type WorkerId = usize;

/// Scaling policy and idle tracking for the worker pool.
#[derive(Debug)]
pub struct WorkerPoolManager {
    min_workers: usize,
    max_workers: usize,
    scale_up_threshold: usize,
    scale_down_idle_time: Duration,
    /// Instant each currently-idle worker became idle.
    idle_since: FxHashMap<WorkerId, Instant>,
}

impl WorkerPoolManager {
    /// Create a manager with clamped bounds: `min_workers >= 1`,
    /// `max_workers >= min_workers`.
    #[must_use]
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        scale_up_threshold: usize,
        scale_down_idle_time: Duration,
    ) -> Self {
        let min_workers = min_workers.max(1);
        let max_workers = max_workers.max(min_workers);
        WorkerPoolManager {
            min_workers,
            max_workers,
            scale_up_threshold,
            scale_down_idle_time,
            idle_since: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn min_workers(&self) -> usize {
        self.min_workers
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Estimate how many workers to start with from the graph shape.
    ///
    /// Sequential chains (every node with in/out-degree <= 1) need no
    /// parallelism and return `min_workers`. Each branch point adds one
    /// worker per extra outgoing edge, so independent arms can run
    /// concurrently. The estimate is always clamped to
    /// `[min_workers, max_workers]`.
    #[must_use]
    pub fn calculate_initial_workers(&self, graph: &Graph) -> usize {
        let mut extra = 0usize;
        for id in graph.node_ids() {
            let out = graph.out_degree(id);
            if out > 1 {
                extra += out - 1;
            }
        }

        let estimate = if extra == 0 {
            self.min_workers
        } else {
            // At least two workers once any branch point exists.
            (1 + extra).max(self.min_workers)
        };
        estimate.clamp(self.min_workers, self.max_workers)
    }

    /// Whether the engine should add a worker.
    ///
    /// True iff the pool is below `max_workers` and either the backlog
    /// exceeds the scale-up threshold, or every current worker is busy
    /// while work is queued. Always false at `max_workers`.
    #[must_use]
    pub fn should_scale_up(
        &self,
        current_workers: usize,
        queue_depth: usize,
        executing_count: usize,
    ) -> bool {
        if current_workers >= self.max_workers {
            return false;
        }
        queue_depth > self.scale_up_threshold
            || (executing_count >= current_workers && queue_depth > 0)
    }

    /// Whether a specific worker should be retired.
    ///
    /// True iff the pool is above `min_workers` and the worker has been
    /// idle longer than the configured idle time.
    #[must_use]
    pub fn should_scale_down(
        &self,
        current_workers: usize,
        _worker_id: WorkerId,
        last_task_time: Instant,
    ) -> bool {
        current_workers > self.min_workers
            && last_task_time.elapsed() > self.scale_down_idle_time
    }

    /// Record a worker activity transition. Going active clears the idle
    /// timestamp; going idle records "became idle now" (the first idle
    /// report wins until the worker goes active again).
    pub fn track_worker_activity(&mut self, worker_id: WorkerId, is_active: bool) {
        if is_active {
            self.idle_since.remove(&worker_id);
        } else {
            self.idle_since.entry(worker_id).or_insert_with(Instant::now);
        }
    }

    /// Forget a worker entirely (after the engine retires it).
    pub fn forget_worker(&mut self, worker_id: WorkerId) {
        self.idle_since.remove(&worker_id);
    }

    /// Workers whose idle duration exceeds the scale-down idle time as of
    /// `now`.
    #[must_use]
    pub fn get_idle_workers(&self, now: Instant) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .idle_since
            .iter()
            .filter(|(_, since)| now.duration_since(**since) > self.scale_down_idle_time)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
