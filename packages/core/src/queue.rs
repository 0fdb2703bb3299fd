//! Scheduler configuration and status types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::JobId;

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts after which a recoverable failure becomes terminal.
    pub retry_limit: u32,
    /// Idle tick interval of the scheduler (milliseconds).
    pub tick_interval_ms: u64,
    /// Minimum time between two promotion sweeps of deferred jobs (milliseconds).
    pub retry_delay_ms: u64,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_limit: 4,
            tick_interval_ms: 500,
            retry_delay_ms: 0,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Tick interval, never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Snapshot of the scheduler's control state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Whether the scheduler is reserving new jobs.
    pub running: bool,
    /// Job currently being dispatched, if any.
    pub in_flight: Option<JobId>,
    /// Current retry limit.
    pub retry_limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"retry_limit": 2}"#).unwrap_or_default();
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.retry_delay_ms, 0);
    }

    #[test]
    fn oversized_durations_saturate() {
        let config = QueueConfig::default().with_retry_delay(Duration::MAX);
        assert_eq!(config.retry_delay_ms, u64::MAX);
    }

    #[test]
    fn zero_tick_interval_is_clamped() {
        let config = QueueConfig::default().with_tick_interval(Duration::ZERO);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
