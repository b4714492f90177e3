//! Engine configuration.
//!
//! Defaults suit embedded use; every knob can also come from the
//! environment (a `.env` file is honored through `dotenvy`), using the
//! `FLOWMESH_*` variables named below.

use std::time::Duration;

/// Tunables for one engine instance.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Lower bound on pool size. Clamped to at least 1.
    pub min_workers: usize,
    /// Upper bound on pool size. Clamped to at least `min_workers`.
    pub max_workers: usize,
    /// Ready-queue depth above which the pool grows.
    pub scale_up_threshold: usize,
    /// Idle duration after which a worker may be retired.
    pub scale_down_idle_time: Duration,
    /// Cadence of the idle scan and scaling checks.
    pub scale_check_interval: Duration,
    /// How often the dispatcher polls the command channel while idle.
    pub command_poll_interval: Duration,
    /// Wall-clock ceiling for a whole run.
    pub max_execution_time: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_workers: 1,
            max_workers: 10,
            scale_up_threshold: 5,
            scale_down_idle_time: Duration::from_secs(30),
            scale_check_interval: Duration::from_secs(1),
            command_poll_interval: Duration::from_millis(100),
            max_execution_time: Duration::from_secs(600),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `FLOWMESH_MIN_WORKERS`, `FLOWMESH_MAX_WORKERS`,
    /// `FLOWMESH_SCALE_UP_THRESHOLD`, `FLOWMESH_SCALE_DOWN_IDLE_SECS`,
    /// `FLOWMESH_MAX_EXECUTION_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        // Best-effort; a missing .env file is not an error.
        let _ = dotenvy::dotenv();

        let mut config = EngineConfig::default();
        if let Some(v) = env_usize("FLOWMESH_MIN_WORKERS") {
            config.min_workers = v;
        }
        if let Some(v) = env_usize("FLOWMESH_MAX_WORKERS") {
            config.max_workers = v;
        }
        if let Some(v) = env_usize("FLOWMESH_SCALE_UP_THRESHOLD") {
            config.scale_up_threshold = v;
        }
        if let Some(v) = env_u64("FLOWMESH_SCALE_DOWN_IDLE_SECS") {
            config.scale_down_idle_time = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FLOWMESH_MAX_EXECUTION_SECS") {
            config.max_execution_time = Duration::from_secs(v);
        }
        config.normalize()
    }

    /// Clamp bounds into a usable range.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        self.min_workers = self.min_workers.max(1);
        self.max_workers = self.max_workers.max(self.min_workers);
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
