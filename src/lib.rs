//! simwork: Durable Work Queue for Persistent-World Simulation
//!
//! `simwork` runs the deferred steps of an economy and turn simulation
//! (dominion turns, settlement civic stats, persona actions, market pricing)
//! through a persistent queue. Any number of workers, in any number of
//! processes, can share one store; optimistic concurrency guarantees each
//! attempt at an item runs on exactly one of them.
//!
//! # Features
//!
//! - **Durable queue**: Items survive restarts; SQLite and in-memory backends
//! - **Optimistic claiming**: Version-guarded compare-and-swap, no locks held across handlers
//! - **Bounded retries**: Failed items are retried up to a fixed budget, then reported
//! - **Circuit breaker**: Claiming pauses while the compute backend is unhealthy
//! - **Outcome events**: Completions and exhausted failures published through a pluggable sink
//!
//! # Quick Start
//!
//! ```no_run
//! use simwork::prelude::*;
//! use chrono::Utc;
//!
//! struct Turns;
//!
//! #[async_trait::async_trait]
//! impl DominionTurnHandler for Turns {
//!     async fn handle(&self, work: &DominionTurn) -> Result<(), BoxError> {
//!         println!("advancing {} to {}", work.government_id, work.turn_date);
//!         Ok(())
//!     }
//! }
//! # struct Rest;
//! # #[async_trait::async_trait]
//! # impl CivicStatsHandler for Rest {
//! #     async fn handle(&self, _: &CivicStatsAggregation) -> Result<(), BoxError> { Ok(()) }
//! # }
//! # #[async_trait::async_trait]
//! # impl PersonaActionHandler for Rest {
//! #     async fn handle(&self, _: &PersonaAction) -> Result<(), BoxError> { Ok(()) }
//! # }
//! # #[async_trait::async_trait]
//! # impl MarketPricingHandler for Rest {
//! #     async fn handle(&self, _: &MarketPricing) -> Result<(), BoxError> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteWorkItemStore::new("simwork.db").await?);
//!     let rest = Arc::new(Rest);
//!     let dispatcher = Dispatcher::new(Arc::new(Turns), rest.clone(), rest.clone(), rest);
//!
//!     Scheduler::new(store.clone())
//!         .create_work_item(WorkType::dominion_turn(Uuid::new_v4(), Utc::now())?)
//!         .await?;
//!
//!     let worker = Worker::new(store, dispatcher, "worker-1").start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: Work types and the item lifecycle (hides validation and versioning rules)
//! - [`storage`]: Persistence layer (hides database choice and schema)
//! - [`breaker`]: Backend health gate (hides probing and state transitions)
//! - [`events`]: Outcome notifications (hides the delivery mechanism)
//! - [`executor`]: Scheduling and workers (hides the claim protocol)

pub mod breaker;
pub mod core;
pub mod events;
pub mod executor;
pub mod storage;

// Re-export commonly used types for convenience
pub use core::{
    BoxError, Error as CoreError, Result as CoreResult, RetryPolicy, WorkItem, WorkStatus,
    WorkType, MAX_RETRIES,
};

pub use breaker::{
    BreakerConfig, BreakerReader, BreakerStatus, CircuitBreaker, HealthMonitor, HealthProbe,
};

pub use events::{DomainEvent, EventPublisher, PublishError, Severity};

pub use executor::{
    ConfigError, CycleReport, DispatchError, Dispatcher, Scheduler, Worker, WorkerConfig,
    WorkerHandle,
};

pub use storage::{
    ClaimQuery, InMemoryWorkItemStore, QueueStats, Result as StorageResult, StorageError,
    UpdateOutcome, WorkItemStore,
};

#[cfg(feature = "sqlite")]
pub use storage::SqliteWorkItemStore;

// Re-export dependencies used in public API
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```ignore
/// use simwork::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        BoxError, CivicStatsAggregation, DominionTurn, MarketPricing, PersonaAction, RetryPolicy,
        WorkItem, WorkStatus, WorkType,
    };

    pub use crate::breaker::{BreakerConfig, BreakerReader, CircuitBreaker, HealthMonitor, HealthProbe};

    pub use crate::events::{DomainEvent, EventPublisher, Severity};

    pub use crate::executor::{
        CivicStatsHandler, Dispatcher, DominionTurnHandler, MarketPricingHandler,
        PersonaActionHandler, Scheduler, Worker, WorkerConfig, WorkerHandle,
    };

    pub use crate::storage::{InMemoryWorkItemStore, StorageError, WorkItemStore};

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteWorkItemStore;

    // Re-export commonly used external types
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
