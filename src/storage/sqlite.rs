use super::{
    ensure_single_step, error::Result, error::StorageError, ClaimQuery, QueueStats, UpdateOutcome,
    WorkItemStore,
};
use crate::core::{deserialize_value, serialize_value, WorkItem, WorkStatus, WorkType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default pool size for SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

const SELECT_COLUMNS: &str = "id, work_type, payload, status, created_at, started_at, \
     completed_at, failed_at, error, retry_count, version";

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection. `None` keeps connections forever.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections. `None` never closes idle connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// SQLite-backed work-item store with connection pooling.
///
/// Several processes can point at the same database file; the version
/// guard in `UPDATE ... WHERE id = ? AND version = ?` is what serializes
/// competing claims. Timestamps are stored as milliseconds since the epoch.
pub struct SqliteWorkItemStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteWorkItemStore {
    /// Opens (or creates) the database at `db_path` with the default pool.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Opens (or creates) the database at `db_path` with a custom pool.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: db_path_str,
        };

        store.initialize().await?;

        Ok(store)
    }

    /// Creates an in-memory SQLite store.
    pub async fn in_memory() -> Result<Self> {
        Self::in_memory_with_config(PoolConfig::default()).await
    }

    /// Creates an in-memory SQLite store with custom pool configuration.
    ///
    /// Each SQLite connection to `:memory:` sees its own database, so the
    /// pool is pinned to a single connection that is never reaped or
    /// recycled; closing it would drop every stored item.
    pub async fn in_memory_with_config(config: PoolConfig) -> Result<Self> {
        let mut in_memory_config = config;
        in_memory_config.max_size = 1;
        in_memory_config.min_idle = Some(1);
        in_memory_config.idle_timeout = None;
        in_memory_config.max_lifetime = None;

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &in_memory_config).await?;

        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };

        store.initialize().await?;

        Ok(store)
    }

    /// Returns the database path this store was opened with.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        // Lifetimes are always set, so `None` overrides sqlx's own defaults.
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        let pool = builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(pool)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY NOT NULL,
                work_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                status TEXT CHECK( status IN ('PENDING','PROCESSING','COMPLETED','FAILED') ) NOT NULL,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                failed_at INTEGER,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        // Claim scans filter on status and read in created_at, id order
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_work_items_claim ON work_items(status, created_at, id)",
        )
        .execute(&self.pool)
        .await?;

        info!(db_path = %self.db_path, "Initialized work item store");

        Ok(())
    }

    fn row_to_work_item(row: &sqlx::sqlite::SqliteRow) -> Result<WorkItem> {
        let id_str: String = row.try_get("id")?;
        let corrupt = |reason: String| StorageError::CorruptRow {
            id: id_str.clone(),
            reason,
        };

        let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(e.to_string()))?;

        let payload: Vec<u8> = row.try_get("payload")?;
        let work_type: WorkType = deserialize_value(&payload)?;

        let status_str: String = row.try_get("status")?;
        let status = WorkStatus::from_str(&status_str)?;

        let created_at_millis: i64 = row.try_get("created_at")?;
        let created_at = DateTime::from_timestamp_millis(created_at_millis)
            .ok_or_else(|| corrupt(format!("created_at out of range: {created_at_millis}")))?;

        let started_at = optional_timestamp(row, "started_at").map_err(&corrupt)?;
        let completed_at = optional_timestamp(row, "completed_at").map_err(&corrupt)?;
        let failed_at = optional_timestamp(row, "failed_at").map_err(&corrupt)?;

        let error: Option<String> = row.try_get("error")?;

        let retry_count: i64 = row.try_get("retry_count")?;
        let retry_count =
            u32::try_from(retry_count).map_err(|_| corrupt(format!("retry_count {retry_count}")))?;

        let version: i64 = row.try_get("version")?;
        let version = u64::try_from(version).map_err(|_| corrupt(format!("version {version}")))?;

        Ok(WorkItem::restore(
            id,
            work_type,
            status,
            created_at,
            started_at,
            completed_at,
            failed_at,
            error,
            retry_count,
            version,
        ))
    }
}

fn optional_timestamp(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> std::result::Result<Option<DateTime<Utc>>, String> {
    let millis: Option<i64> = row.try_get(column).map_err(|e| e.to_string())?;
    match millis {
        None => Ok(None),
        Some(millis) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| format!("{column} out of range: {millis}")),
    }
}

fn version_param(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| StorageError::InvalidParameter(format!("version {version} exceeds i64")))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl WorkItemStore for SqliteWorkItemStore {
    async fn insert(&self, item: &WorkItem) -> Result<()> {
        let payload = serialize_value(item.work_type())?;

        let result = sqlx::query(
            "INSERT INTO work_items (id, work_type, payload, status, created_at, started_at,
                completed_at, failed_at, error, retry_count, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id().to_string())
        .bind(item.work_type().name())
        .bind(payload)
        .bind(item.status().as_str())
        .bind(item.created_at().timestamp_millis())
        .bind(item.started_at().map(|dt| dt.timestamp_millis()))
        .bind(item.completed_at().map(|dt| dt.timestamp_millis()))
        .bind(item.failed_at().map(|dt| dt.timestamp_millis()))
        .bind(item.error())
        .bind(i64::from(item.retry_count()))
        .bind(version_param(item.version())?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(work_item_id = %item.id(), work_type = item.work_type().name(), "Inserted work item");
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StorageError::DuplicateWorkItem(item.id()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_work_item).transpose()
    }

    async fn update(&self, item: &WorkItem, expected_version: u64) -> Result<UpdateOutcome> {
        ensure_single_step(item, expected_version)?;

        // The payload is immutable after insert, so only lifecycle columns move.
        let result = sqlx::query(
            "UPDATE work_items
             SET status = ?, started_at = ?, completed_at = ?, failed_at = ?, error = ?,
                 retry_count = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(item.status().as_str())
        .bind(item.started_at().map(|dt| dt.timestamp_millis()))
        .bind(item.completed_at().map(|dt| dt.timestamp_millis()))
        .bind(item.failed_at().map(|dt| dt.timestamp_millis()))
        .bind(item.error())
        .bind(i64::from(item.retry_count()))
        .bind(version_param(item.version())?)
        .bind(item.id().to_string())
        .bind(version_param(expected_version)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(UpdateOutcome::Applied);
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM work_items WHERE id = ?")
            .bind(item.id().to_string())
            .fetch_optional(&self.pool)
            .await?;

        match current {
            Some(version) => Ok(UpdateOutcome::Conflict {
                current_version: u64::try_from(version).unwrap_or_default(),
            }),
            None => Err(StorageError::WorkItemNotFound(item.id())),
        }
    }

    async fn fetch_claimable(&self, query: ClaimQuery) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items
             WHERE status = 'PENDING'
                OR (status = 'FAILED' AND retry_count < ? AND failed_at <= ?)
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(i64::from(query.max_retries))
        .bind(query.retry_ready_before.timestamp_millis())
        .bind(limit_param(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_work_item).collect()
    }

    async fn fetch_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items
             WHERE status = 'PROCESSING' AND started_at < ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(started_before.timestamp_millis())
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_work_item).collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM work_items GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            stats.record(
                WorkStatus::from_str(&status)?,
                u64::try_from(count).unwrap_or_default(),
            );
        }
        Ok(stats)
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM work_items")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use chrono::TimeZone;

    fn persona_action() -> WorkItem {
        let work = WorkType::persona_action(Uuid::new_v4(), "bribe_official", 12).unwrap();
        WorkItem::create(work)
    }

    fn dominion_turn_at(created_at: DateTime<Utc>) -> WorkItem {
        let turn_date = Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap();
        let work = WorkType::dominion_turn(Uuid::new_v4(), turn_date).unwrap();
        WorkItem::create_at(work, created_at)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let item = persona_action();

        store.insert(&item).await.unwrap();

        let loaded = store.get(item.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), item.id());
        assert_eq!(loaded.work_type(), item.work_type());
        assert_eq!(loaded.status(), WorkStatus::Pending);
        assert_eq!(loaded.version(), 0);
        assert_eq!(
            loaded.created_at().timestamp_millis(),
            item.created_at().timestamp_millis()
        );

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_survives_idle_period() {
        let config = PoolConfig {
            idle_timeout: Some(Duration::from_millis(200)),
            max_lifetime: Some(Duration::from_millis(200)),
            ..PoolConfig::default()
        };
        let store = SqliteWorkItemStore::in_memory_with_config(config)
            .await
            .unwrap();
        let item = persona_action();
        store.insert(&item).await.unwrap();

        // Well past both limits; the single connection must not be reaped.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let loaded = store.get(item.id()).await.unwrap();
        assert_eq!(loaded.map(|i| i.id()), Some(item.id()));
    }

    #[tokio::test]
    async fn test_insert_duplicate_rejected() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let item = persona_action();

        store.insert(&item).await.unwrap();
        let err = store.insert(&item).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateWorkItem(id) if id == item.id()));
    }

    #[tokio::test]
    async fn test_update_compare_and_swap() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let item = persona_action();
        store.insert(&item).await.unwrap();

        let mut winner = item.clone();
        winner.start().unwrap();
        let mut loser = item.clone();
        loser.start().unwrap();

        assert_eq!(store.update(&winner, 0).await.unwrap(), UpdateOutcome::Applied);
        assert_eq!(
            store.update(&loser, 0).await.unwrap(),
            UpdateOutcome::Conflict { current_version: 1 }
        );

        winner.fail("market closed").unwrap();
        assert_eq!(store.update(&winner, 1).await.unwrap(), UpdateOutcome::Applied);

        let loaded = store.get(item.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), WorkStatus::Failed);
        assert_eq!(loaded.error(), Some("market closed"));
        assert_eq!(loaded.retry_count(), 1);
        assert_eq!(loaded.version(), 2);
        assert!(loaded.failed_at().is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_item() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let mut item = persona_action();
        item.start().unwrap();

        let err = store.update(&item, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::WorkItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_claimable_order_and_eligibility() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let base = Utc::now() - chrono::Duration::minutes(10);

        let older = dominion_turn_at(base);
        let newer = dominion_turn_at(base + chrono::Duration::seconds(30));
        let mut running = dominion_turn_at(base - chrono::Duration::seconds(30));
        for item in [&newer, &older, &running] {
            store.insert(item).await.unwrap();
        }

        running.start().unwrap();
        store.update(&running, 0).await.unwrap();

        let query = ClaimQuery::new(10, &RetryPolicy::IMMEDIATE, Utc::now());
        let ids: Vec<Uuid> = store
            .fetch_claimable(query)
            .await
            .unwrap()
            .iter()
            .map(|item| item.id())
            .collect();
        assert_eq!(ids, vec![older.id(), newer.id()]);

        // Fail it three times; it then drops out under the default budget.
        for round in 0..3u64 {
            running.fail("boom").unwrap();
            store.update(&running, 1 + round * 2).await.unwrap();
            if round < 2 {
                running.start().unwrap();
                store.update(&running, 2 + round * 2).await.unwrap();
            }
        }
        assert_eq!(running.retry_count(), 3);

        let query = ClaimQuery::new(10, &RetryPolicy::IMMEDIATE, Utc::now());
        let claimable = store.fetch_claimable(query).await.unwrap();
        assert!(claimable.iter().all(|item| item.id() != running.id()));
    }

    #[tokio::test]
    async fn test_fetch_stale_and_stats() {
        let store = SqliteWorkItemStore::in_memory().await.unwrap();
        let mut item = persona_action();
        store.insert(&item).await.unwrap();
        store.insert(&persona_action()).await.unwrap();

        item.start().unwrap();
        store.update(&item, 0).await.unwrap();

        let stale = store
            .fetch_stale(Utc::now() + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), item.id());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.completed, 0);

        store.reset().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total(), 0);
    }
}
