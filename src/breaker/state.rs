// Circuit breaker state machine
//
// States:
// - Closed: backend healthy, workers may claim
// - Open: backend failing, claiming suppressed
// - HalfOpen: backend recovering, claiming still suppressed until enough
//   consecutive probes succeed

use super::config::BreakerConfig;
use crate::events::{publish_best_effort, DomainEvent, EventPublisher, Severity, TracingPublisher};
use crate::executor::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on publishing a state-change event.
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Coarse breaker state, as carried by `CircuitBreakerStateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerStatus::Closed => "closed",
            BreakerStatus::Open => "open",
            BreakerStatus::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state with the evidence that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Claiming permitted. `consecutive_failures` counts the current run
    /// of failed probes, below the threshold.
    Closed {
        since: DateTime<Utc>,
        consecutive_failures: u32,
    },

    /// Claiming suppressed.
    Open {
        since: DateTime<Utc>,
        consecutive_failures: u32,
    },

    /// Claiming suppressed while recovery is confirmed.
    HalfOpen {
        since: DateTime<Utc>,
        probe_successes: u32,
    },
}

impl CircuitState {
    pub fn closed_at(since: DateTime<Utc>) -> Self {
        CircuitState::Closed {
            since,
            consecutive_failures: 0,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        match self {
            CircuitState::Closed { .. } => BreakerStatus::Closed,
            CircuitState::Open { .. } => BreakerStatus::Open,
            CircuitState::HalfOpen { .. } => BreakerStatus::HalfOpen,
        }
    }

    /// When the breaker entered its current status.
    pub fn since(&self) -> DateTime<Utc> {
        match self {
            CircuitState::Closed { since, .. }
            | CircuitState::Open { since, .. }
            | CircuitState::HalfOpen { since, .. } => *since,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CircuitState::Closed { .. })
    }

    /// State after a successful probe at `now`.
    pub fn on_success(self, config: &BreakerConfig, now: DateTime<Utc>) -> Self {
        match self {
            CircuitState::Closed { since, .. } => CircuitState::Closed {
                since,
                consecutive_failures: 0,
            },
            CircuitState::Open { .. } => {
                if config.recovery_threshold <= 1 {
                    CircuitState::closed_at(now)
                } else {
                    CircuitState::HalfOpen {
                        since: now,
                        probe_successes: 1,
                    }
                }
            }
            CircuitState::HalfOpen {
                since,
                probe_successes,
            } => {
                let probe_successes = probe_successes + 1;
                if probe_successes >= config.recovery_threshold {
                    CircuitState::closed_at(now)
                } else {
                    CircuitState::HalfOpen {
                        since,
                        probe_successes,
                    }
                }
            }
        }
    }

    /// State after a failed probe at `now`.
    pub fn on_failure(self, config: &BreakerConfig, now: DateTime<Utc>) -> Self {
        match self {
            CircuitState::Closed {
                since,
                consecutive_failures,
            } => {
                let consecutive_failures = consecutive_failures + 1;
                if consecutive_failures >= config.failure_threshold {
                    CircuitState::Open {
                        since: now,
                        consecutive_failures,
                    }
                } else {
                    CircuitState::Closed {
                        since,
                        consecutive_failures,
                    }
                }
            }
            CircuitState::Open {
                since,
                consecutive_failures,
            } => CircuitState::Open {
                since,
                consecutive_failures: consecutive_failures.saturating_add(1),
            },
            CircuitState::HalfOpen { .. } => CircuitState::Open {
                since: now,
                consecutive_failures: 1,
            },
        }
    }
}

/// Circuit breaker guarding a downstream backend.
///
/// This is the only writer of breaker state. Methods that record probe
/// outcomes take `&mut self`, so exclusive ownership (normally by a
/// [`HealthMonitor`](super::HealthMonitor)) is enforced by the compiler.
/// Workers observe the state through [`BreakerReader`]s.
///
/// Each status change publishes exactly one `CircuitBreakerStateChanged`.
pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    state: watch::Sender<CircuitState>,
    publisher: Arc<dyn EventPublisher>,
    publish_timeout: Duration,
    cancel: CancellationToken,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the backend named `target`.
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(CircuitState::closed_at(Utc::now()));

        Ok(Self {
            target: target.into(),
            config,
            state,
            publisher: Arc::new(TracingPublisher),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            cancel: CancellationToken::new(),
        })
    }

    /// Sets where state-change events go. Defaults to [`TracingPublisher`].
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub(crate) fn set_cancellation(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        *self.state.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.state.borrow().is_available()
    }

    /// Returns a read-only handle for workers.
    pub fn reader(&self) -> BreakerReader {
        BreakerReader {
            state: self.state.subscribe(),
        }
    }

    /// Records a successful probe. Returns the new status if it changed.
    pub async fn record_success(&mut self) -> Option<BreakerStatus> {
        let next = self.state().on_success(&self.config, Utc::now());
        self.apply(next, "health probe succeeded".to_string()).await
    }

    /// Records a failed probe. Returns the new status if it changed.
    pub async fn record_failure(&mut self, reason: impl Into<String>) -> Option<BreakerStatus> {
        let reason = reason.into();
        let next = self.state().on_failure(&self.config, Utc::now());
        self.apply(next, reason).await
    }

    async fn apply(&mut self, next: CircuitState, reason: String) -> Option<BreakerStatus> {
        let previous = self.state.send_replace(next);
        let (from, to) = (previous.status(), next.status());

        if from == to {
            debug!(target_system = %self.target, state = %to, reason = %reason, "Circuit breaker unchanged");
            return None;
        }

        let severity = match to {
            BreakerStatus::Open => {
                warn!(target_system = %self.target, from = %from, reason = %reason, "Circuit breaker opened");
                Severity::Warning
            }
            BreakerStatus::HalfOpen => {
                info!(target_system = %self.target, from = %from, reason = %reason, "Circuit breaker half-open");
                Severity::Info
            }
            BreakerStatus::Closed => {
                info!(target_system = %self.target, from = %from, reason = %reason, "Circuit breaker closed");
                Severity::Info
            }
        };

        let event = DomainEvent::CircuitBreakerStateChanged {
            new_state: to,
            target: self.target.clone(),
            reason,
        };
        publish_best_effort(
            self.publisher.as_ref(),
            event,
            severity,
            self.publish_timeout,
            &self.cancel,
        )
        .await;

        Some(to)
    }
}

/// Cheap, cloneable, read-only view of a breaker's state.
#[derive(Debug, Clone)]
pub struct BreakerReader {
    state: watch::Receiver<CircuitState>,
}

impl BreakerReader {
    /// A reader that is always closed, for workers with no backend guard.
    pub fn always_closed() -> Self {
        let (_, state) = watch::channel(CircuitState::closed_at(Utc::now()));
        Self { state }
    }

    /// True when claiming is permitted.
    pub fn is_available(&self) -> bool {
        self.state.borrow().is_available()
    }

    pub fn state(&self) -> CircuitState {
        *self.state.borrow()
    }

    pub fn status(&self) -> BreakerStatus {
        self.state.borrow().status()
    }

    /// Waits until the writer publishes a new state.
    ///
    /// Returns `false` once the writer has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}
