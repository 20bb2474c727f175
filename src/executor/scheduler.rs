//! Producer side of the queue.
//!
//! The scheduler turns a validated [`WorkType`] into a `Pending` work item
//! and persists it, where any worker polling the same store can pick it up.

use crate::core::{WorkItem, WorkType};
use crate::storage::{StorageError, WorkItemStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Enqueues work items for workers.
///
/// # Example
///
/// ```no_run
/// use simwork::core::WorkType;
/// use simwork::executor::Scheduler;
/// use simwork::storage::SqliteWorkItemStore;
/// use chrono::Utc;
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(SqliteWorkItemStore::new("simwork.db").await?);
/// let scheduler = Scheduler::new(store);
///
/// let work = WorkType::market_pricing(Uuid::new_v4(), Uuid::new_v4(), 1.8)?;
/// let item = scheduler.create_work_item(work).await?;
/// println!("enqueued {} at {}", item.id(), item.created_at());
/// # Ok(())
/// # }
/// ```
pub struct Scheduler<S: WorkItemStore + ?Sized> {
    store: Arc<S>,
}

impl<S: WorkItemStore + ?Sized> Scheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Creates a `Pending` item for `work_type` and persists it.
    ///
    /// Payload validation already happened when `work_type` was built, so
    /// the only failure left is the store itself.
    pub async fn create_work_item(&self, work_type: WorkType) -> Result<WorkItem, StorageError> {
        self.insert(WorkItem::create(work_type)).await
    }

    /// Like [`create_work_item`](Self::create_work_item) with a caller-chosen
    /// creation time, e.g. when replaying an external backlog in order.
    pub async fn create_work_item_at(
        &self,
        work_type: WorkType,
        created_at: DateTime<Utc>,
    ) -> Result<WorkItem, StorageError> {
        self.insert(WorkItem::create_at(work_type, created_at)).await
    }

    async fn insert(&self, item: WorkItem) -> Result<WorkItem, StorageError> {
        self.store.insert(&item).await?;
        debug!(
            work_item_id = %item.id(),
            work_type = item.work_type().name(),
            "Work item enqueued"
        );
        Ok(item)
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
