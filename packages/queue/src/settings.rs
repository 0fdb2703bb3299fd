//! Queue settings and environment overrides.

use std::str::FromStr;

use db::DbConfig;
use queue_core::QueueConfig;

/// Storage and scheduler settings for one queue.
#[derive(Debug, Clone, Default)]
pub struct QueueSettings {
    pub db: DbConfig,
    pub queue: QueueConfig,
}

impl QueueSettings {
    /// Settings backed by in-memory storage.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Use a different database configuration.
    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    /// Use a different scheduler configuration.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Settings from the environment, falling back to defaults.
    ///
    /// - `JOB_QUEUE_DB`: storage endpoint, e.g. `mem://` or `rocksdb://./data/queue`
    /// - `JOB_QUEUE_RETRY_LIMIT`: attempts before a failure is terminal
    /// - `JOB_QUEUE_TICK_MS`: idle tick interval
    /// - `JOB_QUEUE_RETRY_DELAY_MS`: minimum time between promotion sweeps
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(endpoint) = lookup("JOB_QUEUE_DB").filter(|e| !e.is_empty()) {
            settings.db = DbConfig::endpoint(endpoint);
        }
        if let Some(retry_limit) = parse(&lookup, "JOB_QUEUE_RETRY_LIMIT") {
            settings.queue.retry_limit = retry_limit;
        }
        if let Some(tick) = parse(&lookup, "JOB_QUEUE_TICK_MS") {
            settings.queue.tick_interval_ms = tick;
        }
        if let Some(delay) = parse(&lookup, "JOB_QUEUE_RETRY_DELAY_MS") {
            settings.queue.retry_delay_ms = delay;
        }

        settings
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}: {:?}", key, raw);
            None
        }
    }
}
