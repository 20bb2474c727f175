use super::{DomainEvent, EventPublisher, PublishError, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An event together with its delivery metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub event: DomainEvent,
    pub severity: Severity,
    pub published_at: DateTime<Utc>,
}

impl PublishedEvent {
    fn now(event: DomainEvent, severity: Severity) -> Self {
        Self {
            event,
            severity,
            published_at: Utc::now(),
        }
    }
}

/// Writes each event as a structured log line.
///
/// `Info` maps to `info!`, `Warning` to `warn!`, and both `Error` and
/// `Critical` to `error!`. This is the default publisher for workers and
/// breakers that were not given one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
        severity: Severity,
        _cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| PublishError::Transport(Box::new(e)))?;
        let name = event.name();

        match severity {
            Severity::Info => info!(event = name, %severity, %payload, "Domain event"),
            Severity::Warning => warn!(event = name, %severity, %payload, "Domain event"),
            Severity::Error | Severity::Critical => {
                error!(event = name, %severity, %payload, "Domain event")
            }
        }

        Ok(())
    }
}

/// Keeps every published event in memory.
///
/// Used by tests to assert on exactly what a worker or breaker reported.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, in publish order.
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.lock().clone()
    }

    /// Events whose name equals `name`.
    pub fn named(&self, name: &str) -> Vec<PublishedEvent> {
        self.lock()
            .iter()
            .filter(|published| published.event.name() == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PublishedEvent>> {
        // A panicking test thread must not hide events from the others.
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
        severity: Severity,
        _cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        self.lock().push(PublishedEvent::now(event, severity));
        Ok(())
    }
}

/// Fans events out to in-process subscribers over a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error. Slow subscribers that
/// fall more than `capacity` events behind observe a `Lagged` error on
/// their receiver and skip ahead.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    /// Creates a publisher buffering up to `capacity` events per subscriber.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
        severity: Severity,
        _cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        let name = event.name();
        if self.sender.send(PublishedEvent::now(event, severity)).is_err() {
            debug!(event = name, "No subscribers for domain event");
        }
        Ok(())
    }
}
