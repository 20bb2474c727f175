//! Polling worker that claims and runs work items.
//!
//! A worker repeatedly asks the store for claimable items, claims each one
//! with a version-guarded write, dispatches it to its handler and records
//! the outcome. Any number of workers, in one process or many, can share a
//! store; the compare-and-swap in [`WorkItemStore::update`] guarantees at
//! most one of them runs a given attempt.

use super::config::{WorkerConfig, MAX_BATCH_SIZE};
use super::dispatch::Dispatcher;
use super::error::ConfigError;
use crate::breaker::BreakerReader;
use crate::core::{RetryPolicy, WorkItem};
use crate::events::{publish_best_effort, DomainEvent, EventPublisher, Severity, TracingPublisher};
use crate::storage::{ClaimQuery, StorageError, UpdateOutcome, WorkItemStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Failure reason recorded on items recovered by the stale sweep.
pub const LEASE_EXPIRED_REASON: &str = "processing lease expired";

// ============================================================================
// Tracing Typestates
// ============================================================================

/// Typestate: Worker without structured tracing (uses basic log-style tracing only).
///
/// This is the default state. Plain `info!`, `debug!`, `warn!` and `error!`
/// events are still emitted, but no spans are created.
#[derive(Clone, Copy)]
pub struct WithoutStructuredTracing;

/// Typestate: Worker with structured tracing enabled.
///
/// Wraps each poll cycle in a `worker_loop` span and each claimed item in a
/// `work_item` span.
#[derive(Clone, Copy)]
pub struct WithStructuredTracing;

/// Trait that defines tracing behavior based on type state.
pub trait TracingBehavior: Send + Sync {
    /// Creates a span for one poll cycle.
    fn worker_loop_span(&self, worker_id: &str) -> Option<tracing::Span>;

    /// Creates a span for one attempt at a claimed work item.
    fn work_item_span(
        &self,
        worker_id: &str,
        work_item_id: Uuid,
        work_type: &str,
        attempt: u32,
    ) -> Option<tracing::Span>;
}

impl TracingBehavior for WithoutStructuredTracing {
    fn worker_loop_span(&self, _worker_id: &str) -> Option<tracing::Span> {
        None
    }

    fn work_item_span(
        &self,
        _worker_id: &str,
        _work_item_id: Uuid,
        _work_type: &str,
        _attempt: u32,
    ) -> Option<tracing::Span> {
        None
    }
}

impl TracingBehavior for WithStructuredTracing {
    fn worker_loop_span(&self, worker_id: &str) -> Option<tracing::Span> {
        Some(tracing::debug_span!("worker_loop", worker.id = worker_id))
    }

    fn work_item_span(
        &self,
        worker_id: &str,
        work_item_id: Uuid,
        work_type: &str,
        attempt: u32,
    ) -> Option<tracing::Span> {
        Some(tracing::info_span!(
            "work_item",
            worker.id = worker_id,
            work_item.id = %work_item_id,
            work_item.type = work_type,
            attempt,
        ))
    }
}

async fn maybe_instrument<F: std::future::Future>(span: Option<tracing::Span>, fut: F) -> F::Output {
    match span {
        Some(span) => fut.instrument(span).await,
        None => fut.await,
    }
}

// ============================================================================
// Cycle Report
// ============================================================================

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The breaker was not closed, so claiming stopped (or never started).
    pub breaker_open: bool,
    /// Claimable items returned by the store.
    pub candidates: usize,
    /// Items this worker won the claim for.
    pub claimed: usize,
    pub completed: usize,
    /// Items left `Failed`, including exhausted ones.
    pub failed: usize,
    /// Failed items whose retry budget is now spent.
    pub exhausted: usize,
    /// Lost compare-and-swap races, on claim or on the final write.
    pub conflicts: usize,
    /// Claims or outcome writes the store rejected with an error.
    pub store_errors: usize,
}

enum ItemOutcome {
    Completed,
    Failed { exhausted: bool },
    Conflict,
}

// ============================================================================
// Worker
// ============================================================================

/// Polls a [`WorkItemStore`] and runs claimed items through a [`Dispatcher`].
///
/// Collaborators are injected:
///
/// - the store, shared with producers and other workers
/// - a [`BreakerReader`]; claiming is skipped while it is not closed
/// - an [`EventPublisher`] for outcome events (default: [`TracingPublisher`])
///
/// # Example
///
/// ```no_run
/// use simwork::executor::{Dispatcher, Worker};
/// use simwork::storage::SqliteWorkItemStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(dispatcher: Dispatcher) -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(SqliteWorkItemStore::new("simwork.db").await?);
///
/// let handle = Worker::new(store, dispatcher, "worker-1")
///     .with_poll_interval(Duration::from_millis(250))
///     .with_structured_tracing()
///     .start()
///     .await?;
///
/// // Later, to stop:
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Worker<S: WorkItemStore + ?Sized + 'static, Tr = WithoutStructuredTracing> {
    store: Arc<S>,
    dispatcher: Dispatcher,
    worker_id: String,
    breaker: BreakerReader,
    publisher: Arc<dyn EventPublisher>,
    retry_policy: RetryPolicy,
    config: WorkerConfig,
    tracing_state: Tr,
    /// Notification handle for event-driven worker wakeup
    work_notify: Arc<Notify>,
}

impl<S: WorkItemStore + ?Sized + 'static> Worker<S, WithoutStructuredTracing> {
    /// Creates a worker with default configuration, an always-closed breaker
    /// and a [`TracingPublisher`].
    pub fn new(store: Arc<S>, dispatcher: Dispatcher, worker_id: impl Into<String>) -> Self {
        // Get the work notify from storage, or create a new one as fallback
        let work_notify = store
            .work_notify()
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()));

        Self {
            store,
            dispatcher,
            worker_id: worker_id.into(),
            breaker: BreakerReader::always_closed(),
            publisher: Arc::new(TracingPublisher),
            retry_policy: RetryPolicy::default(),
            config: WorkerConfig::default(),
            tracing_state: WithoutStructuredTracing,
            work_notify,
        }
    }

    /// Enables `worker_loop` and `work_item` spans.
    pub fn with_structured_tracing(self) -> Worker<S, WithStructuredTracing> {
        Worker {
            store: self.store,
            dispatcher: self.dispatcher,
            worker_id: self.worker_id,
            breaker: self.breaker,
            publisher: self.publisher,
            retry_policy: self.retry_policy,
            config: self.config,
            tracing_state: WithStructuredTracing,
            work_notify: self.work_notify,
        }
    }
}

impl<S, Tr> Worker<S, Tr>
where
    S: WorkItemStore + ?Sized + 'static,
    Tr: TracingBehavior + 'static,
{
    /// Gates claiming on `breaker`.
    pub fn with_circuit_breaker(mut self, breaker: BreakerReader) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the idle poll interval. Default is 1 second.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the claim batch size, clamped to `1..=MAX_BATCH_SIZE`. Default is 16.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Sets how long an item may stay `Processing` before the sweep fails it.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.config.stale_after = stale_after;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.config.publish_timeout = timeout;
        self
    }

    /// Replaces the whole configuration after validating it.
    pub fn with_config(mut self, config: WorkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Runs exactly one poll cycle.
    ///
    /// Lost claim races are counted, never returned as errors. Neither is a
    /// store error on a single claim or outcome write: it is logged, counted,
    /// and the cycle moves on to the next candidate. Only a failed fetch
    /// aborts the cycle. Cancellation is checked before each claim; an item
    /// already claimed runs to the end.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<CycleReport, StorageError> {
        let mut report = CycleReport::default();

        if !self.breaker.is_available() {
            report.breaker_open = true;
            debug!(
                worker_id = %self.worker_id,
                breaker = %self.breaker.status(),
                "Circuit breaker not closed, skipping claims"
            );
            return Ok(report);
        }

        let query = ClaimQuery::new(self.config.batch_size, &self.retry_policy, Utc::now());
        let candidates = self.store.fetch_claimable(query).await?;
        report.candidates = candidates.len();

        for candidate in candidates {
            if cancel.is_cancelled() {
                debug!(worker_id = %self.worker_id, "Shutdown requested, stopping claims");
                break;
            }

            if !self.breaker.is_available() {
                report.breaker_open = true;
                debug!(worker_id = %self.worker_id, "Circuit breaker opened mid-cycle");
                break;
            }

            let work_item_id = candidate.id();
            let item = match self.claim(candidate).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        worker_id = %self.worker_id,
                        %work_item_id,
                        error = %e,
                        "Failed to claim work item"
                    );
                    report.store_errors += 1;
                    continue;
                }
            };
            report.claimed += 1;

            let span = self.tracing_state.work_item_span(
                &self.worker_id,
                item.id(),
                item.work_type().name(),
                item.retry_count() + 1,
            );
            match maybe_instrument(span, self.run_claimed(item, cancel)).await {
                Ok(ItemOutcome::Completed) => report.completed += 1,
                Ok(ItemOutcome::Failed { exhausted }) => {
                    report.failed += 1;
                    if exhausted {
                        report.exhausted += 1;
                    }
                }
                Ok(ItemOutcome::Conflict) => report.conflicts += 1,
                Err(e) => {
                    // Still Processing; the stale sweep will fail it.
                    error!(
                        worker_id = %self.worker_id,
                        %work_item_id,
                        error = %e,
                        "Failed to record work item outcome"
                    );
                    report.store_errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Fails `Processing` items older than `stale_after`, making them
    /// retry-eligible. Returns how many were recovered.
    pub async fn sweep_stale(&self, cancel: &CancellationToken) -> Result<usize, StorageError> {
        let cutoff = chrono::Duration::from_std(self.config.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let stale = self
            .store
            .fetch_stale(cutoff, self.config.batch_size)
            .await?;

        let mut recovered = 0;
        for candidate in stale {
            if cancel.is_cancelled() {
                break;
            }

            let expected = candidate.version();
            let mut item = candidate;
            item.fail(LEASE_EXPIRED_REASON)?;

            match self.store.update(&item, expected).await? {
                UpdateOutcome::Applied => {
                    recovered += 1;
                    info!(
                        worker_id = %self.worker_id,
                        work_item_id = %item.id(),
                        started_at = ?item.started_at(),
                        "Recovered abandoned work item"
                    );
                    self.report_failure(&item, cancel).await;
                }
                UpdateOutcome::Conflict { current_version } => {
                    debug!(
                        worker_id = %self.worker_id,
                        work_item_id = %item.id(),
                        current_version,
                        "Stale work item resolved concurrently"
                    );
                }
            }
        }

        Ok(recovered)
    }

    /// Attempts to move `candidate` to `Processing`.
    ///
    /// Returns `None` if another worker got there first.
    async fn claim(&self, candidate: WorkItem) -> Result<Option<WorkItem>, StorageError> {
        let expected = candidate.version();
        let mut item = candidate;
        item.start()?;

        match self.store.update(&item, expected).await? {
            UpdateOutcome::Applied => Ok(Some(item)),
            UpdateOutcome::Conflict { current_version } => {
                debug!(
                    worker_id = %self.worker_id,
                    work_item_id = %item.id(),
                    expected,
                    current_version,
                    "Work item already claimed"
                );
                Ok(None)
            }
        }
    }

    async fn run_claimed(
        &self,
        mut item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, StorageError> {
        debug!(
            worker_id = %self.worker_id,
            work_item_id = %item.id(),
            work_type = item.work_type().name(),
            attempt = item.retry_count() + 1,
            "Dispatching work item"
        );

        let result = self.dispatcher.dispatch(item.work_type()).await;
        let expected = item.version();

        match result {
            Ok(()) => {
                item.complete()?;
                if !self.persist_outcome(&item, expected).await? {
                    return Ok(ItemOutcome::Conflict);
                }

                info!(
                    worker_id = %self.worker_id,
                    work_item_id = %item.id(),
                    work_type = item.work_type().name(),
                    "Work item completed"
                );
                self.publish(
                    DomainEvent::completed(item.id(), item.work_type()),
                    Severity::Info,
                    cancel,
                )
                .await;
                Ok(ItemOutcome::Completed)
            }
            Err(e) => {
                item.fail(e.to_string())?;
                if !self.persist_outcome(&item, expected).await? {
                    return Ok(ItemOutcome::Conflict);
                }

                let exhausted = self.report_failure(&item, cancel).await;
                Ok(ItemOutcome::Failed { exhausted })
            }
        }
    }

    /// Writes a completed or failed item. Returns false if the item changed
    /// underneath us (e.g. the stale sweep failed it), in which case the
    /// outcome is dropped.
    async fn persist_outcome(&self, item: &WorkItem, expected: u64) -> Result<bool, StorageError> {
        match self.store.update(item, expected).await? {
            UpdateOutcome::Applied => Ok(true),
            UpdateOutcome::Conflict { current_version } => {
                warn!(
                    worker_id = %self.worker_id,
                    work_item_id = %item.id(),
                    outcome = %item.status(),
                    expected,
                    current_version,
                    "Work item changed while processing, outcome discarded"
                );
                Ok(false)
            }
        }
    }

    /// Logs a persisted failure and, once retries are spent, publishes
    /// `WorkItemFailed`. Returns whether the item is exhausted.
    async fn report_failure(&self, item: &WorkItem, cancel: &CancellationToken) -> bool {
        let error_text = item.error().unwrap_or_default().to_string();
        let exhausted = !item.can_retry_under(&self.retry_policy);

        if !exhausted {
            warn!(
                worker_id = %self.worker_id,
                work_item_id = %item.id(),
                work_type = item.work_type().name(),
                retry_count = item.retry_count(),
                error = %error_text,
                "Work item failed, will retry"
            );
            return false;
        }

        error!(
            worker_id = %self.worker_id,
            work_item_id = %item.id(),
            work_type = item.work_type().name(),
            retry_count = item.retry_count(),
            error = %error_text,
            "Work item exhausted its retries"
        );
        self.publish(
            DomainEvent::WorkItemFailed {
                work_item_id: item.id(),
                work_type: item.work_type().name().to_string(),
                error: error_text,
                retry_count: item.retry_count(),
                retry_exhausted: true,
            },
            Severity::Critical,
            cancel,
        )
        .await;
        true
    }

    async fn publish(&self, event: DomainEvent, severity: Severity, cancel: &CancellationToken) {
        publish_best_effort(
            self.publisher.as_ref(),
            event,
            severity,
            self.config.publish_timeout,
            cancel,
        )
        .await;
    }

    async fn poll_and_log(&self, cancel: &CancellationToken) -> Option<CycleReport> {
        let span = self.tracing_state.worker_loop_span(&self.worker_id);
        match maybe_instrument(span, self.poll_once(cancel)).await {
            Ok(report) => {
                if report.claimed > 0 {
                    debug!(worker_id = %self.worker_id, ?report, "Poll cycle finished");
                }
                Some(report)
            }
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "Poll cycle failed");
                None
            }
        }
    }

    /// Starts the worker in the background.
    ///
    /// Returns a [`WorkerHandle`] that can be used to control the worker, or
    /// a [`ConfigError`] if the configuration assembled through the `with_*`
    /// setters is invalid (e.g. a zero poll interval).
    pub async fn start(self) -> Result<WorkerHandle, ConfigError> {
        self.config.validate()?;

        let cancellation_token = CancellationToken::new();
        let worker_token = cancellation_token.clone();
        let worker_id_for_handle = self.worker_id.clone();

        info!(worker_id = %self.worker_id, "Starting worker");

        let handle = tokio::spawn(async move {
            self.run(worker_token).await;
        });

        Ok(WorkerHandle {
            worker_id: worker_id_for_handle,
            handle,
            cancellation_token,
        })
    }

    async fn run(self, token: CancellationToken) {
        let mut poll_ticker = tokio::time::interval(self.config.poll_interval);
        let mut sweep_ticker = tokio::time::interval(self.config.sweep_interval);
        poll_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let work_notify = Arc::clone(&self.work_notify);

        loop {
            // biased; shutdown and maintenance win over accepting new work.
            // Branch bodies are not raced against cancellation, so an item
            // that was claimed always gets its outcome written.
            let report = tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!(worker_id = %self.worker_id, "Worker received shutdown signal");
                    break;
                }

                _ = sweep_ticker.tick() => {
                    match self.sweep_stale(&token).await {
                        Ok(count) if count > 0 => {
                            info!(worker_id = %self.worker_id, count, "Stale sweep recovered work items");
                        }
                        Err(e) => {
                            warn!(worker_id = %self.worker_id, error = %e, "Stale sweep failed");
                        }
                        _ => {}
                    }
                    None
                }

                _ = poll_ticker.tick() => self.poll_and_log(&token).await,

                _ = work_notify.notified() => self.poll_and_log(&token).await,
            };

            // A full batch means there is probably more; don't wait a tick.
            if report.is_some_and(|r| r.claimed >= self.config.batch_size) {
                poll_ticker.reset_immediately();
            }
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
    }
}

/// Handle for controlling a running worker.
///
/// Uses `CancellationToken` for hierarchical cancellation support.
pub struct WorkerHandle {
    worker_id: String,
    handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl WorkerHandle {
    /// Returns the worker ID.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Returns a reference to the cancellation token.
    ///
    /// ```ignore
    /// let child_token = handle.cancellation_token().child_token();
    /// // Child token will be cancelled when parent is cancelled
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Stops claiming and waits for the in-flight item, if any, to finish.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.handle.await;
    }

    /// Like [`shutdown`](Self::shutdown), but abandons the in-flight item
    /// once `deadline` passes.
    ///
    /// An abandoned item stays `Processing` until a stale sweep fails it.
    /// Returns true if the worker stopped before the deadline.
    pub async fn shutdown_with_deadline(mut self, deadline: Duration) -> bool {
        self.cancellation_token.cancel();
        match tokio::time::timeout(deadline, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(worker_id = %self.worker_id, ?deadline, "Shutdown deadline passed, aborting worker");
                self.handle.abort();
                let _ = self.handle.await;
                false
            }
        }
    }

    /// Returns true if the worker task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Aborts the worker immediately without waiting for completion.
    ///
    /// Prefer `shutdown()`; an aborted item is only recovered by a later
    /// stale sweep.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use crate::core::{
        BoxError, CivicStatsAggregation, DominionTurn, MarketPricing, PersonaAction, WorkStatus,
        WorkType,
    };
    use crate::events::RecordingPublisher;
    use crate::executor::{
        CivicStatsHandler, DominionTurnHandler, MarketPricingHandler, PersonaActionHandler,
    };
    use crate::storage::InMemoryWorkItemStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Handles every work type; fails while `failing` is set.
    #[derive(Default)]
    struct TestHandler {
        failing: AtomicBool,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl TestHandler {
        async fn run(&self) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                Err("simulation backend rejected the request".into())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl DominionTurnHandler for TestHandler {
        async fn handle(&self, _work: &DominionTurn) -> Result<(), BoxError> {
            self.run().await
        }
    }

    #[async_trait]
    impl CivicStatsHandler for TestHandler {
        async fn handle(&self, _work: &CivicStatsAggregation) -> Result<(), BoxError> {
            self.run().await
        }
    }

    #[async_trait]
    impl PersonaActionHandler for TestHandler {
        async fn handle(&self, _work: &PersonaAction) -> Result<(), BoxError> {
            self.run().await
        }
    }

    #[async_trait]
    impl MarketPricingHandler for TestHandler {
        async fn handle(&self, _work: &MarketPricing) -> Result<(), BoxError> {
            self.run().await
        }
    }

    struct Fixture {
        store: Arc<InMemoryWorkItemStore>,
        handler: Arc<TestHandler>,
        publisher: Arc<RecordingPublisher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_handler(TestHandler::default())
        }

        fn with_handler(handler: TestHandler) -> Self {
            Self {
                store: Arc::new(InMemoryWorkItemStore::new()),
                handler: Arc::new(handler),
                publisher: Arc::new(RecordingPublisher::new()),
            }
        }

        fn worker(&self) -> Worker<InMemoryWorkItemStore> {
            let h = &self.handler;
            let dispatcher = Dispatcher::new(h.clone(), h.clone(), h.clone(), h.clone());
            Worker::new(self.store.clone(), dispatcher, "test-worker")
                .with_publisher(self.publisher.clone())
                .with_retry_policy(RetryPolicy::IMMEDIATE)
        }

        async fn enqueue(&self) -> WorkItem {
            let turn_date = Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap();
            let work = WorkType::dominion_turn(Uuid::new_v4(), turn_date).unwrap();
            let item = WorkItem::create(work);
            self.store.insert(&item).await.unwrap();
            item
        }

        async fn stored(&self, item: &WorkItem) -> WorkItem {
            self.store.get(item.id()).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_poll_once_completes_and_publishes() {
        let fx = Fixture::new();
        let item = fx.enqueue().await;

        let report = fx.worker().poll_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        let stored = fx.stored(&item).await;
        assert_eq!(stored.status(), WorkStatus::Completed);
        assert_eq!(stored.version(), 2);

        let events = fx.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name(), "DominionTurnCompleted");
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_failure_is_retried_then_exhausted() {
        let fx = Fixture::new();
        fx.handler.failing.store(true, Ordering::SeqCst);
        let item = fx.enqueue().await;
        let worker = fx.worker();
        let cancel = CancellationToken::new();

        for attempt in 1..=2 {
            let report = worker.poll_once(&cancel).await.unwrap();
            assert_eq!(report.failed, 1);
            assert_eq!(report.exhausted, 0);
            assert_eq!(fx.stored(&item).await.retry_count(), attempt);
            assert!(fx.publisher.is_empty());
        }

        let report = worker.poll_once(&cancel).await.unwrap();
        assert_eq!(report.exhausted, 1);

        let stored = fx.stored(&item).await;
        assert_eq!(stored.status(), WorkStatus::Failed);
        assert_eq!(stored.retry_count(), 3);
        assert!(!stored.can_retry());

        let failed = fx.publisher.named("WorkItemFailed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].severity, Severity::Critical);
        match &failed[0].event {
            DomainEvent::WorkItemFailed {
                retry_exhausted,
                retry_count,
                error,
                ..
            } => {
                assert!(*retry_exhausted);
                assert_eq!(*retry_count, 3);
                assert_eq!(error, "simulation backend rejected the request");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Exhausted items are no longer claimable.
        let report = worker.poll_once(&cancel).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(fx.handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_breaker_suppresses_claims() {
        let fx = Fixture::new();
        let item = fx.enqueue().await;

        let config = BreakerConfig::default().with_failure_threshold(1);
        let mut breaker = CircuitBreaker::new("compute", config).unwrap();
        breaker.record_failure("connection refused").await;

        let worker = fx.worker().with_circuit_breaker(breaker.reader());
        let report = worker.poll_once(&CancellationToken::new()).await.unwrap();

        assert!(report.breaker_open);
        assert_eq!(report.claimed, 0);
        assert_eq!(fx.stored(&item).await.status(), WorkStatus::Pending);
        assert!(fx.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_claims() {
        let fx = Fixture::new();
        fx.enqueue().await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = fx.worker().poll_once(&cancel).await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.claimed, 0);
    }

    #[tokio::test]
    async fn test_sweep_stale_fails_abandoned_items() {
        let fx = Fixture::new();
        let mut item = fx.enqueue().await;
        item.start().unwrap();
        fx.store.update(&item, 0).await.unwrap();

        let worker = fx.worker().with_stale_after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let recovered = worker.sweep_stale(&CancellationToken::new()).await.unwrap();
        assert_eq!(recovered, 1);

        let stored = fx.stored(&item).await;
        assert_eq!(stored.status(), WorkStatus::Failed);
        assert_eq!(stored.error(), Some(LEASE_EXPIRED_REASON));
        assert_eq!(stored.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let fx = Fixture::new();
        let item = fx.enqueue().await;

        let handle = fx
            .worker()
            .with_poll_interval(Duration::from_millis(10))
            .with_structured_tracing()
            .start()
            .await
            .unwrap();
        assert_eq!(handle.worker_id(), "test-worker");

        for _ in 0..200 {
            if fx.stored(&item).await.status() == WorkStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fx.stored(&item).await.status(), WorkStatus::Completed);

        assert!(handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_deadline_abandons_slow_handler() {
        let fx = Fixture::with_handler(TestHandler {
            delay: Some(Duration::from_secs(30)),
            ..TestHandler::default()
        });
        let item = fx.enqueue().await;

        let handle = fx
            .worker()
            .with_poll_interval(Duration::from_millis(10))
            .start()
            .await
            .unwrap();

        for _ in 0..200 {
            if fx.stored(&item).await.status() == WorkStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!handle.shutdown_with_deadline(Duration::from_millis(50)).await);
        // Left for the stale sweep.
        assert_eq!(fx.stored(&item).await.status(), WorkStatus::Processing);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let fx = Fixture::new();
        assert_eq!(fx.worker().with_batch_size(0).config().batch_size, 1);
        assert!(fx
            .worker()
            .with_config(WorkerConfig {
                batch_size: 0,
                ..WorkerConfig::default()
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_setter_values() {
        let fx = Fixture::new();

        let result = fx
            .worker()
            .with_poll_interval(Duration::ZERO)
            .start()
            .await;
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "poll_interval", .. })
        ));

        let result = fx.worker().with_stale_after(Duration::ZERO).start().await;
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "stale_after", .. })
        ));

        let result = fx
            .worker()
            .with_structured_tracing()
            .with_sweep_interval(Duration::ZERO)
            .start()
            .await;
        assert!(result.is_err());
    }

    /// Delegates to an in-memory store but rejects the next `n` writes of a
    /// completed item.
    struct FlakyStore {
        inner: InMemoryWorkItemStore,
        failing_completions: AtomicUsize,
    }

    #[async_trait]
    impl WorkItemStore for FlakyStore {
        async fn insert(&self, item: &WorkItem) -> crate::storage::Result<()> {
            self.inner.insert(item).await
        }

        async fn get(&self, id: Uuid) -> crate::storage::Result<Option<WorkItem>> {
            self.inner.get(id).await
        }

        async fn update(
            &self,
            item: &WorkItem,
            expected_version: u64,
        ) -> crate::storage::Result<UpdateOutcome> {
            if item.status() == WorkStatus::Completed
                && self
                    .failing_completions
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StorageError::Connection("connection reset".to_string()));
            }
            self.inner.update(item, expected_version).await
        }

        async fn fetch_claimable(&self, query: ClaimQuery) -> crate::storage::Result<Vec<WorkItem>> {
            self.inner.fetch_claimable(query).await
        }

        async fn fetch_stale(
            &self,
            started_before: chrono::DateTime<Utc>,
            limit: usize,
        ) -> crate::storage::Result<Vec<WorkItem>> {
            self.inner.fetch_stale(started_before, limit).await
        }

        async fn stats(&self) -> crate::storage::Result<crate::storage::QueueStats> {
            self.inner.stats().await
        }

        async fn reset(&self) -> crate::storage::Result<()> {
            self.inner.reset().await
        }

        async fn close(&self) -> crate::storage::Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_outcome_write_error_does_not_abort_cycle() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryWorkItemStore::new(),
            failing_completions: AtomicUsize::new(1),
        });
        let base = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        let mut ids = Vec::new();
        for minute in 0..2 {
            let work = WorkType::dominion_turn(Uuid::new_v4(), base).unwrap();
            let item = WorkItem::create_at(work, base + chrono::Duration::minutes(minute));
            store.insert(&item).await.unwrap();
            ids.push(item.id());
        }

        let handler = Arc::new(TestHandler::default());
        let h = &handler;
        let dispatcher = Dispatcher::new(h.clone(), h.clone(), h.clone(), h.clone());
        let publisher = Arc::new(RecordingPublisher::new());
        let worker = Worker::new(store.clone(), dispatcher, "test-worker")
            .with_publisher(publisher.clone());

        let report = worker.poll_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.store_errors, 1);
        assert_eq!(report.completed, 1);

        // The oldest item's outcome was lost and is left for the stale sweep;
        // the next one still ran.
        let first = store.get(ids[0]).await.unwrap().unwrap();
        let second = store.get(ids[1]).await.unwrap().unwrap();
        assert_eq!(first.status(), WorkStatus::Processing);
        assert_eq!(second.status(), WorkStatus::Completed);
        assert_eq!(publisher.len(), 1);
    }
}
