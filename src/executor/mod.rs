//! Producing, claiming and running work items.
//!
//! - [`Scheduler`]: enqueues validated work as `Pending` items
//! - [`Worker`]: polls a store, claims items and resolves them
//! - [`Dispatcher`]: routes each work type to its handler
//!
//! # Example
//!
//! ```no_run
//! use simwork::executor::{Dispatcher, Scheduler, Worker};
//! use simwork::core::WorkType;
//! use simwork::storage::InMemoryWorkItemStore;
//! use chrono::Utc;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example(dispatcher: Dispatcher) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryWorkItemStore::new());
//!
//! let scheduler = Scheduler::new(store.clone());
//! scheduler
//!     .create_work_item(WorkType::dominion_turn(Uuid::new_v4(), Utc::now())?)
//!     .await?;
//!
//! let handle = Worker::new(store, dispatcher, "worker-1").start().await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Module organization:
// - config: worker tunables and their validation
// - dispatch: the work-type to handler routing, hides handler task isolation
// - scheduler: producer side, hides item construction
// - worker: consumer side, hides the claim protocol and loop scheduling
mod config;
mod dispatch;
mod error;
mod scheduler;
mod worker;

pub use config::{WorkerConfig, MAX_BATCH_SIZE};
pub use dispatch::{
    CivicStatsHandler, DispatchError, Dispatcher, DominionTurnHandler, MarketPricingHandler,
    PersonaActionHandler,
};
pub use error::ConfigError;
pub use scheduler::Scheduler;
pub use worker::{
    CycleReport, TracingBehavior, WithStructuredTracing, WithoutStructuredTracing, Worker,
    WorkerHandle, LEASE_EXPIRED_REASON,
};
