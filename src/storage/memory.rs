use super::{
    ensure_single_step, error::Result, error::StorageError, ClaimQuery, QueueStats, UpdateOutcome,
    WorkItemStore,
};
use crate::core::{WorkItem, WorkStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// In-memory work-item store using DashMap for concurrent access.
///
/// The version check and the write happen while holding the entry's shard
/// lock, which makes `update` an atomic compare-and-swap. Any number of
/// workers in the same process can share one instance behind an `Arc`.
///
/// The queue is not shared across processes; use
/// [`SqliteWorkItemStore`](super::SqliteWorkItemStore) for that.
pub struct InMemoryWorkItemStore {
    items: dashmap::DashMap<Uuid, WorkItem>,
    /// Notification mechanism to wake up workers when new work arrives
    work_notify: Arc<Notify>,
}

impl InMemoryWorkItemStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            items: dashmap::DashMap::new(),
            work_notify: Arc::new(Notify::new()),
        }
    }

    /// Returns the number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for InMemoryWorkItemStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Oldest first, ties broken by id.
fn sort_for_claiming(items: &mut [WorkItem]) {
    items.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

#[async_trait]
impl WorkItemStore for InMemoryWorkItemStore {
    async fn insert(&self, item: &WorkItem) -> Result<()> {
        match self.items.entry(item.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StorageError::DuplicateWorkItem(item.id()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(item.clone());
            }
        }

        // Wake up one waiting worker
        self.work_notify.notify_one();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        Ok(self.items.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, item: &WorkItem, expected_version: u64) -> Result<UpdateOutcome> {
        ensure_single_step(item, expected_version)?;

        let Some(mut entry) = self.items.get_mut(&item.id()) else {
            return Err(StorageError::WorkItemNotFound(item.id()));
        };

        let current_version = entry.version();
        if current_version != expected_version {
            return Ok(UpdateOutcome::Conflict { current_version });
        }

        *entry = item.clone();
        Ok(UpdateOutcome::Applied)
    }

    async fn fetch_claimable(&self, query: ClaimQuery) -> Result<Vec<WorkItem>> {
        let mut candidates: Vec<WorkItem> = self
            .items
            .iter()
            .filter(|entry| {
                let item = entry.value();
                query.admits(item.status(), item.retry_count(), item.failed_at())
            })
            .map(|entry| entry.value().clone())
            .collect();

        sort_for_claiming(&mut candidates);
        candidates.truncate(query.limit);
        Ok(candidates)
    }

    async fn fetch_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let mut stale: Vec<WorkItem> = self
            .items
            .iter()
            .filter(|entry| {
                let item = entry.value();
                item.status() == WorkStatus::Processing
                    && item.started_at().is_some_and(|at| at < started_before)
            })
            .map(|entry| entry.value().clone())
            .collect();

        sort_for_claiming(&mut stale);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for entry in self.items.iter() {
            stats.record(entry.value().status(), 1);
        }
        Ok(stats)
    }

    async fn reset(&self) -> Result<()> {
        self.items.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn work_notify(&self) -> Option<&Arc<Notify>> {
        Some(&self.work_notify)
    }
}
