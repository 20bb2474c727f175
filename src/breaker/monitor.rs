//! Background health monitor driving a circuit breaker.

use super::state::{BreakerReader, BreakerStatus, CircuitBreaker};
use crate::core::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Health check against the downstream compute backend.
///
/// The transport (HTTP, gRPC, a database ping) is up to the implementor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl<P: HealthProbe + ?Sized> HealthProbe for Arc<P> {
    async fn check(&self) -> Result<(), BoxError> {
        (**self).check().await
    }
}

/// Periodically probes the backend and feeds the outcome into a breaker.
///
/// # Lifecycle
/// 1. Create: `HealthMonitor::new(probe, breaker)`
/// 2. Start: `.start()` returns a handle and hands out readers
/// 3. Shutdown: `handle.shutdown().await`
///
/// # Example
/// ```ignore
/// let breaker = CircuitBreaker::new("compute", BreakerConfig::default())?;
/// let monitor = HealthMonitor::new(probe, breaker).start();
///
/// let worker = Worker::new(store, dispatcher, "worker-1")
///     .with_circuit_breaker(monitor.reader());
///
/// // ... application runs ...
///
/// monitor.shutdown().await;
/// ```
pub struct HealthMonitor<P: HealthProbe> {
    probe: P,
    breaker: CircuitBreaker,
}

impl<P: HealthProbe + 'static> HealthMonitor<P> {
    pub fn new(probe: P, breaker: CircuitBreaker) -> Self {
        Self { probe, breaker }
    }

    pub fn reader(&self) -> BreakerReader {
        self.breaker.reader()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs a single probe and records its outcome.
    ///
    /// A probe that outlives `probe_timeout` counts as a failure.
    /// Returns the new breaker status if it changed.
    pub async fn probe_once(&mut self) -> Option<BreakerStatus> {
        let timeout = self.breaker.config().probe_timeout;

        match tokio::time::timeout(timeout, self.probe.check()).await {
            Ok(Ok(())) => {
                debug!(target_system = %self.breaker.target(), "Health probe succeeded");
                self.breaker.record_success().await
            }
            Ok(Err(e)) => {
                debug!(target_system = %self.breaker.target(), error = %e, "Health probe failed");
                self.breaker.record_failure(e.to_string()).await
            }
            Err(_) => {
                debug!(target_system = %self.breaker.target(), ?timeout, "Health probe timed out");
                self.breaker
                    .record_failure(format!("health probe timed out after {:?}", timeout))
                    .await
            }
        }
    }

    /// Starts probing in a background task.
    ///
    /// The first probe runs immediately, then every `probe_interval`.
    pub fn start(mut self) -> HealthMonitorHandle {
        let cancel = CancellationToken::new();
        self.breaker.set_cancellation(cancel.clone());
        let reader = self.breaker.reader();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            self.run(loop_cancel).await;
            self.breaker
        });

        HealthMonitorHandle {
            handle,
            cancel,
            reader,
        }
    }

    async fn run(&mut self, cancel: CancellationToken) {
        let interval = self.breaker.config().probe_interval;
        info!(
            target_system = %self.breaker.target(),
            ?interval,
            "Health monitor started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.probe_once() => {}
                    }
                }
            }
        }

        info!(target_system = %self.breaker.target(), "Health monitor stopped");
    }
}

/// Handle for a running [`HealthMonitor`].
///
/// Dropping the handle without calling `shutdown()` leaves the monitor
/// running until the runtime stops.
pub struct HealthMonitorHandle {
    handle: JoinHandle<CircuitBreaker>,
    cancel: CancellationToken,
    reader: BreakerReader,
}

impl HealthMonitorHandle {
    /// A read-only view of the monitored breaker, for workers.
    pub fn reader(&self) -> BreakerReader {
        self.reader.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops probing and returns the breaker, or `None` if the task panicked.
    pub async fn shutdown(self) -> Option<CircuitBreaker> {
        self.cancel.cancel();
        self.handle.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Probe whose health can be flipped from the test.
    struct SwitchProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn check(&self) -> Result<(), BoxError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("backend returned 503".into())
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn check(&self) -> Result<(), BoxError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn quick_config() -> BreakerConfig {
        BreakerConfig::default()
            .with_failure_threshold(1)
            .with_probe_interval(Duration::from_millis(10))
            .with_probe_timeout(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_probe_once_follows_probe_result() {
        let probe = Arc::new(SwitchProbe {
            healthy: AtomicBool::new(true),
        });
        let breaker = CircuitBreaker::new("compute", quick_config()).unwrap();
        let mut monitor = HealthMonitor::new(probe.clone(), breaker);
        let reader = monitor.reader();

        assert_eq!(monitor.probe_once().await, None);
        assert!(reader.is_available());

        probe.healthy.store(false, Ordering::SeqCst);
        assert_eq!(monitor.probe_once().await, Some(BreakerStatus::Open));
        assert!(!reader.is_available());

        probe.healthy.store(true, Ordering::SeqCst);
        assert_eq!(monitor.probe_once().await, Some(BreakerStatus::Closed));
        assert!(reader.is_available());
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("compute", quick_config()).unwrap();
        let mut monitor = HealthMonitor::new(HangingProbe, breaker);

        assert_eq!(monitor.probe_once().await, Some(BreakerStatus::Open));
        assert!(!monitor.breaker().is_available());
    }

    #[tokio::test]
    async fn test_background_monitor_and_shutdown() {
        let probe = Arc::new(SwitchProbe {
            healthy: AtomicBool::new(false),
        });
        let breaker = CircuitBreaker::new("compute", quick_config()).unwrap();
        let handle = HealthMonitor::new(probe.clone(), breaker).start();
        let mut reader = handle.reader();

        while reader.is_available() {
            assert!(reader.changed().await);
        }

        probe.healthy.store(true, Ordering::SeqCst);
        while !reader.is_available() {
            assert!(reader.changed().await);
        }

        assert!(handle.is_running());
        let breaker = handle.shutdown().await.unwrap();
        assert!(breaker.is_available());
    }
}
