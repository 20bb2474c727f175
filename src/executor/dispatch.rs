//! Routing of work types to their handlers.
//!
//! Each variant of [`WorkType`] has its own handler trait. The queue does not
//! care what a handler does, only whether it finished: `Ok` completes the
//! item, an error or a panic fails it.

use crate::core::{
    BoxError, CivicStatsAggregation, DominionTurn, MarketPricing, PersonaAction, WorkType,
};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[async_trait]
pub trait DominionTurnHandler: Send + Sync {
    async fn handle(&self, work: &DominionTurn) -> Result<(), BoxError>;
}

#[async_trait]
pub trait CivicStatsHandler: Send + Sync {
    async fn handle(&self, work: &CivicStatsAggregation) -> Result<(), BoxError>;
}

#[async_trait]
pub trait PersonaActionHandler: Send + Sync {
    async fn handle(&self, work: &PersonaAction) -> Result<(), BoxError>;
}

#[async_trait]
pub trait MarketPricingHandler: Send + Sync {
    async fn handle(&self, work: &MarketPricing) -> Result<(), BoxError>;
}

/// Why a dispatched work type did not complete.
///
/// The `Display` output becomes the failed item's `error` text.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The handler returned an error.
    #[error("{0}")]
    Handler(#[source] BoxError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler task was cancelled before it finished.
    #[error("handler cancelled")]
    Cancelled,
}

/// Aborts the handler task if the dispatch future is dropped, e.g. when a
/// worker's shutdown deadline passes.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Exhaustive dispatcher over the four work types.
///
/// Cheap to clone; handlers are shared behind `Arc`s.
#[derive(Clone)]
pub struct Dispatcher {
    dominion_turns: Arc<dyn DominionTurnHandler>,
    civic_stats: Arc<dyn CivicStatsHandler>,
    persona_actions: Arc<dyn PersonaActionHandler>,
    market_pricing: Arc<dyn MarketPricingHandler>,
}

impl Dispatcher {
    pub fn new(
        dominion_turns: Arc<dyn DominionTurnHandler>,
        civic_stats: Arc<dyn CivicStatsHandler>,
        persona_actions: Arc<dyn PersonaActionHandler>,
        market_pricing: Arc<dyn MarketPricingHandler>,
    ) -> Self {
        Self {
            dominion_turns,
            civic_stats,
            persona_actions,
            market_pricing,
        }
    }

    /// Runs the handler for `work_type` to completion.
    ///
    /// The handler runs on its own task so that a panic is reported as
    /// [`DispatchError::Panicked`] instead of tearing down the worker.
    pub async fn dispatch(&self, work_type: &WorkType) -> Result<(), DispatchError> {
        let task = match work_type.clone() {
            WorkType::DominionTurn(work) => {
                let handler = Arc::clone(&self.dominion_turns);
                tokio::spawn(async move { handler.handle(&work).await })
            }
            WorkType::CivicStatsAggregation(work) => {
                let handler = Arc::clone(&self.civic_stats);
                tokio::spawn(async move { handler.handle(&work).await })
            }
            WorkType::PersonaAction(work) => {
                let handler = Arc::clone(&self.persona_actions);
                tokio::spawn(async move { handler.handle(&work).await })
            }
            WorkType::MarketPricing(work) => {
                let handler = Arc::clone(&self.market_pricing);
                tokio::spawn(async move { handler.handle(&work).await })
            }
        };

        let mut guard = AbortOnDrop(task);
        match (&mut guard.0).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DispatchError::Handler(e)),
            Err(e) if e.is_panic() => Err(DispatchError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(DispatchError::Cancelled),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
