//! Outcome notifications.
//!
//! Workers and the circuit breaker report what happened through an
//! [`EventPublisher`]. Events are a notification stream layered on top of
//! the store; the store stays the system of record, so a lost event never
//! loses work.
//!
//! Publishers shipped with the crate:
//!
//! - [`TracingPublisher`]: one structured log line per event
//! - [`RecordingPublisher`]: in-memory capture for tests and inspection
//! - [`BroadcastPublisher`]: fan-out to in-process subscribers

mod publishers;

pub use publishers::{BroadcastPublisher, PublishedEvent, RecordingPublisher, TracingPublisher};

use crate::breaker::BreakerStatus;
use crate::core::{BoxError, WorkType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Something that happened to a work item or to the backend guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A handler failed. Only published once the retry budget is spent.
    WorkItemFailed {
        work_item_id: Uuid,
        work_type: String,
        error: String,
        retry_count: u32,
        retry_exhausted: bool,
    },
    DominionTurnCompleted {
        work_item_id: Uuid,
        government_id: Uuid,
        turn_date: DateTime<Utc>,
    },
    SettlementCivicStatsUpdated {
        work_item_id: Uuid,
        settlement_id: Uuid,
        since: DateTime<Utc>,
    },
    PersonaActionResolved {
        work_item_id: Uuid,
        persona_id: Uuid,
        action_type: String,
        influence_cost: u32,
    },
    MarketPricesUpdated {
        work_item_id: Uuid,
        market_id: Uuid,
        item_id: Uuid,
        demand_signal: f64,
    },
    CircuitBreakerStateChanged {
        new_state: BreakerStatus,
        target: String,
        reason: String,
    },
}

impl DomainEvent {
    /// The completion event for a work item that ran `work_type` successfully.
    pub fn completed(work_item_id: Uuid, work_type: &WorkType) -> Self {
        match work_type {
            WorkType::DominionTurn(turn) => DomainEvent::DominionTurnCompleted {
                work_item_id,
                government_id: turn.government_id.as_uuid(),
                turn_date: turn.turn_date.as_datetime(),
            },
            WorkType::CivicStatsAggregation(stats) => DomainEvent::SettlementCivicStatsUpdated {
                work_item_id,
                settlement_id: stats.settlement_id.as_uuid(),
                since: stats.since.as_datetime(),
            },
            WorkType::PersonaAction(action) => DomainEvent::PersonaActionResolved {
                work_item_id,
                persona_id: action.persona_id.as_uuid(),
                action_type: action.action_type.as_str().to_string(),
                influence_cost: action.influence_cost.get(),
            },
            WorkType::MarketPricing(pricing) => DomainEvent::MarketPricesUpdated {
                work_item_id,
                market_id: pricing.market_id.as_uuid(),
                item_id: pricing.item_id.as_uuid(),
                demand_signal: pricing.demand_signal.get(),
            },
        }
    }

    /// Stable event name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::WorkItemFailed { .. } => "WorkItemFailed",
            DomainEvent::DominionTurnCompleted { .. } => "DominionTurnCompleted",
            DomainEvent::SettlementCivicStatsUpdated { .. } => "SettlementCivicStatsUpdated",
            DomainEvent::PersonaActionResolved { .. } => "PersonaActionResolved",
            DomainEvent::MarketPricesUpdated { .. } => "MarketPricesUpdated",
            DomainEvent::CircuitBreakerStateChanged { .. } => "CircuitBreakerStateChanged",
        }
    }

    /// The work item this event is about, if any.
    pub fn work_item_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::WorkItemFailed { work_item_id, .. }
            | DomainEvent::DominionTurnCompleted { work_item_id, .. }
            | DomainEvent::SettlementCivicStatsUpdated { work_item_id, .. }
            | DomainEvent::PersonaActionResolved { work_item_id, .. }
            | DomainEvent::MarketPricesUpdated { work_item_id, .. } => Some(*work_item_id),
            DomainEvent::CircuitBreakerStateChanged { .. } => None,
        }
    }
}

/// How urgently an event needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an event could not be delivered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PublishError {
    /// The caller's cancellation token fired before delivery.
    #[error("publish cancelled")]
    Cancelled,

    /// Delivery did not finish within the allotted time.
    #[error("publish timed out after {0:?}")]
    TimedOut(Duration),

    /// The sink rejected or failed to deliver the event.
    #[error("publish failed: {0}")]
    Transport(#[source] BoxError),
}

/// Sink for domain events.
///
/// Implementations that can block (network sinks, bounded queues) should
/// abandon delivery when `cancel` fires and return [`PublishError::Cancelled`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        event: DomainEvent,
        severity: Severity,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError>;
}

/// Publishes `event`, bounding the call by `timeout` and swallowing failures.
///
/// Event delivery never decides the fate of a work item: by the time an
/// event is published the outcome is already durable in the store.
pub async fn publish_best_effort(
    publisher: &dyn EventPublisher,
    event: DomainEvent,
    severity: Severity,
    timeout: Duration,
    cancel: &CancellationToken,
) {
    let name = event.name();
    let result = match tokio::time::timeout(timeout, publisher.publish(event, severity, cancel))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(PublishError::TimedOut(timeout)),
    };

    if let Err(e) = result {
        warn!(event = name, severity = %severity, error = %e, "Failed to publish event");
    }
}
