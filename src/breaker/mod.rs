//! Circuit breaker gating work claims on downstream health.
//!
//! A [`CircuitBreaker`] is owned by exactly one writer, normally a
//! [`HealthMonitor`] probing the compute backend on a fixed cadence.
//! Workers only ever hold [`BreakerReader`]s and skip claiming while the
//! breaker is not closed. Pending items are left untouched while the
//! backend is down.
//!
//! # Example
//!
//! ```no_run
//! use simwork::breaker::{BreakerConfig, CircuitBreaker, HealthMonitor, HealthProbe};
//! use simwork::core::BoxError;
//!
//! struct ComputePing;
//!
//! #[async_trait::async_trait]
//! impl HealthProbe for ComputePing {
//!     async fn check(&self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("compute", BreakerConfig::default())?;
//! let monitor = HealthMonitor::new(ComputePing, breaker).start();
//! let reader = monitor.reader();
//! assert!(reader.is_available());
//! monitor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod monitor;
mod state;

pub use config::BreakerConfig;
pub(crate) use config::duration_millis;
pub use monitor::{HealthMonitor, HealthMonitorHandle, HealthProbe};
pub use state::{BreakerReader, BreakerStatus, CircuitBreaker, CircuitState};
