//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use simwork::core::{BoxError, CivicStatsAggregation, DominionTurn, MarketPricing, PersonaAction};
use simwork::executor::{
    CivicStatsHandler, Dispatcher, DominionTurnHandler, MarketPricingHandler, PersonaActionHandler,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Handler for every work type that records which subject it ran for.
///
/// The subject is the payload's primary id (government, settlement,
/// persona or market). Subjects in `failing` make the handler error.
#[derive(Default)]
pub struct SimHandler {
    seen: Mutex<Vec<Uuid>>,
    failing: Mutex<HashSet<Uuid>>,
    delay: Option<Duration>,
}

impl SimHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn fail_for(&self, subject: Uuid) {
        self.failing.lock().unwrap().insert(subject);
    }

    pub fn heal(&self, subject: Uuid) {
        self.failing.lock().unwrap().remove(&subject);
    }

    /// Subjects in the order their handlers ran.
    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap().clone()
    }

    pub fn runs_per_subject(&self) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for subject in self.seen() {
            *counts.entry(subject).or_insert(0) += 1;
        }
        counts
    }

    async fn run(&self, subject: Uuid) -> Result<(), BoxError> {
        self.seen.lock().unwrap().push(subject);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&subject) {
            return Err(format!("simulation rejected {subject}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl DominionTurnHandler for SimHandler {
    async fn handle(&self, work: &DominionTurn) -> Result<(), BoxError> {
        self.run(work.government_id.as_uuid()).await
    }
}

#[async_trait]
impl CivicStatsHandler for SimHandler {
    async fn handle(&self, work: &CivicStatsAggregation) -> Result<(), BoxError> {
        self.run(work.settlement_id.as_uuid()).await
    }
}

#[async_trait]
impl PersonaActionHandler for SimHandler {
    async fn handle(&self, work: &PersonaAction) -> Result<(), BoxError> {
        self.run(work.persona_id.as_uuid()).await
    }
}

#[async_trait]
impl MarketPricingHandler for SimHandler {
    async fn handle(&self, work: &MarketPricing) -> Result<(), BoxError> {
        self.run(work.market_id.as_uuid()).await
    }
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn dispatcher(handler: &Arc<SimHandler>) -> Dispatcher {
    Dispatcher::new(
        handler.clone(),
        handler.clone(),
        handler.clone(),
        handler.clone(),
    )
}

/// Polls `check` every 10ms until it returns true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
