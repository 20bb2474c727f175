use super::error::ConfigError;
use crate::breaker::duration_millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on a single claim batch.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Tunables for a [`Worker`](super::Worker).
///
/// Durations (de)serialize as integer milliseconds; missing fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Time between poll cycles when the queue is idle.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Maximum candidates fetched per poll cycle.
    pub batch_size: usize,

    /// A `Processing` item older than this is considered abandoned.
    #[serde(with = "duration_millis")]
    pub stale_after: Duration,

    /// Time between stale-item sweeps.
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,

    /// Bound on a single event publish.
    #[serde(with = "duration_millis")]
    pub publish_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 16,
            stale_after: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be non-zero"));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::invalid(
                "batch_size",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        if self.stale_after.is_zero() {
            return Err(ConfigError::invalid("stale_after", "must be non-zero"));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep_interval", "must be non-zero"));
        }

        if self.publish_timeout.is_zero() {
            return Err(ConfigError::invalid("publish_timeout", "must be non-zero"));
        }

        Ok(())
    }
}
