//! Storage layer for the simwork queue.
//!
//! This module provides a trait-based interface for persisting work items
//! with multiple backend implementations:
//!
//! - [`SqliteWorkItemStore`]: Persistent SQLite-based storage with connection pooling
//! - [`InMemoryWorkItemStore`]: Fast in-memory storage for testing and development
//!
//! Every mutation goes through [`WorkItemStore::update`], a compare-and-swap
//! on the item's version. That single primitive is what keeps two workers
//! from claiming the same item; no other lock exists.
//!
//! # Example
//!
//! ```no_run
//! use simwork::storage::{InMemoryWorkItemStore, UpdateOutcome, WorkItemStore};
//! use simwork::core::{WorkItem, WorkType};
//! use chrono::{TimeZone, Utc};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryWorkItemStore::new();
//! let turn_date = Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap();
//! let item = WorkItem::create(WorkType::dominion_turn(Uuid::new_v4(), turn_date)?);
//! store.insert(&item).await?;
//!
//! let mut claimed = item.clone();
//! claimed.start()?;
//! match store.update(&claimed, item.version()).await? {
//!     UpdateOutcome::Applied => println!("claimed {}", claimed.id()),
//!     UpdateOutcome::Conflict { .. } => println!("someone else got it"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::core::WorkItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

mod error;
mod params;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod memory;

// Re-export public types
pub use error::{Result, StorageError};
pub use memory::InMemoryWorkItemStore;
pub use params::{ClaimQuery, QueueStats, UpdateOutcome};

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteWorkItemStore};

/// Trait for work-item storage backends.
///
/// Implementations must be safe to share between any number of workers,
/// in-process or across processes pointed at the same database.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Persist a newly created item.
    async fn insert(&self, item: &WorkItem) -> Result<()>;

    /// Get a work item by id.
    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>>;

    /// Write `item` if and only if the stored version equals `expected_version`.
    ///
    /// `item` must carry `expected_version + 1`, i.e. exactly one lifecycle
    /// operation applied to the copy that was read.
    async fn update(&self, item: &WorkItem, expected_version: u64) -> Result<UpdateOutcome>;

    /// Fetch pending and retry-eligible failed items, oldest first.
    ///
    /// Ordered by `created_at` ascending, ties broken by `id`.
    async fn fetch_claimable(&self, query: ClaimQuery) -> Result<Vec<WorkItem>>;

    /// Fetch items stuck in `Processing` since before `started_before`.
    async fn fetch_stale(&self, started_before: DateTime<Utc>, limit: usize)
        -> Result<Vec<WorkItem>>;

    /// Count stored items per status.
    async fn stats(&self) -> Result<QueueStats>;

    /// Delete every stored item.
    async fn reset(&self) -> Result<()>;

    /// Close the store.
    async fn close(&self) -> Result<()>;

    /// Notification handle fired when new work is inserted.
    ///
    /// Workers wait on it between polls for instant wakeup. Backends that
    /// cannot observe inserts made by other processes return `None`, and
    /// workers fall back to their poll interval.
    fn work_notify(&self) -> Option<&Arc<Notify>> {
        None
    }
}

/// Rejects writes that skip or repeat a version step.
pub(crate) fn ensure_single_step(item: &WorkItem, expected_version: u64) -> Result<()> {
    if item.version() != expected_version + 1 {
        return Err(StorageError::VersionSkew {
            id: item.id(),
            expected: expected_version + 1,
            actual: item.version(),
        });
    }
    Ok(())
}

// Implement WorkItemStore for Box<dyn WorkItemStore> to allow type-erased storage
#[async_trait]
impl WorkItemStore for Box<dyn WorkItemStore> {
    async fn insert(&self, item: &WorkItem) -> Result<()> {
        (**self).insert(item).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        (**self).get(id).await
    }

    async fn update(&self, item: &WorkItem, expected_version: u64) -> Result<UpdateOutcome> {
        (**self).update(item, expected_version).await
    }

    async fn fetch_claimable(&self, query: ClaimQuery) -> Result<Vec<WorkItem>> {
        (**self).fetch_claimable(query).await
    }

    async fn fetch_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        (**self).fetch_stale(started_before, limit).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        (**self).stats().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn work_notify(&self) -> Option<&Arc<Notify>> {
        (**self).work_notify()
    }
}
