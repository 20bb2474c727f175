// Circuit breaker configuration with validation
//
// Thresholds for tripping and recovering, plus the probe cadence used by
// the health monitor.

use crate::executor::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a circuit breaker and its health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failed probes that open the breaker. The default of 1
    /// opens it on the first failed probe.
    pub failure_threshold: u32,

    /// Consecutive successful probes needed to close it again.
    ///
    /// With `1` an open breaker closes on the first success; larger values
    /// pass through `HalfOpen`.
    pub recovery_threshold: u32,

    /// Time between health probes.
    #[serde(with = "duration_millis")]
    pub probe_interval: Duration,

    /// A probe that has not answered within this time counts as failed.
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            recovery_threshold: 1,
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.failure_threshold) {
            return Err(ConfigError::invalid(
                "failure_threshold",
                "must be between 1 and 100",
            ));
        }

        if !(1..=100).contains(&self.recovery_threshold) {
            return Err(ConfigError::invalid(
                "recovery_threshold",
                "must be between 1 and 100",
            ));
        }

        if self.probe_interval.is_zero() {
            return Err(ConfigError::invalid("probe_interval", "must be non-zero"));
        }

        if self.probe_timeout.is_zero() || self.probe_timeout > self.probe_interval {
            return Err(ConfigError::invalid(
                "probe_timeout",
                "must be non-zero and at most probe_interval",
            ));
        }

        Ok(())
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_threshold(mut self, threshold: u32) -> Self {
        self.recovery_threshold = threshold;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
