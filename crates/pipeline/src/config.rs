use std::time::Duration;

use gazer_core::env;

/// Default admission bound (active + queued).
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// | Env Var          | Default |
    /// |------------------|---------|
    /// | `QUEUE_CAPACITY` | `20`    |
    pub fn from_env() -> Self {
        Self {
            capacity: env::parse_or("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY).max(1),
        }
    }
}

/// Progress polling and retention settings.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Delay between `/progress` polls of the active job.
    pub poll_interval: Duration,
    /// Timeout of a single poll.
    pub poll_timeout: Duration,
    /// How long a record is kept after its last update.
    pub retention: Duration,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(5),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl ProgressConfig {
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `PROGRESS_POLL_INTERVAL_MS` | `500`   |
    /// | `PROGRESS_RETENTION_SECS`   | `3600`  |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                env::parse_or("PROGRESS_POLL_INTERVAL_MS", 500u64).max(10),
            ),
            retention: Duration::from_secs(env::parse_or("PROGRESS_RETENTION_SECS", 3600)),
            ..defaults
        }
    }
}
