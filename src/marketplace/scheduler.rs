//! Periodic sync worker.
//!
//! Runs a products sync and then an orders sync every interval until the
//! shutdown token fires. A failing cycle is logged and the next tick retries.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::marketplace::{ReconciliationEngine, SyncOutcome, SyncRequest};
use crate::{MarketplaceError, Result};

pub struct SyncScheduler {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self { engine, interval, shutdown }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), channel = self.engine.channel(), "Sync scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for result in self.run_cycle().await {
                        match result {
                            Ok(outcome) => tracing::debug!(sync_type = %outcome.sync_type, processed = outcome.processed, errors = outcome.errors, "Scheduled sync done"),
                            Err(MarketplaceError::SyncInProgress(kind)) => tracing::info!("Skipping scheduled {} sync, one is already running", kind),
                            Err(e) => tracing::error!("Scheduled sync failed: {}", e),
                        }
                    }
                }
            }
        }
        tracing::info!("Sync scheduler stopped");
    }

    /// One products pass followed by one orders pass. The orders pass is
    /// skipped when shutdown was requested in between.
    pub async fn run_cycle(&self) -> Vec<Result<SyncOutcome>> {
        let mut results = vec![self.engine.run(SyncRequest::products(), &self.shutdown).await];
        if !self.shutdown.is_cancelled() {
            results.push(self.engine.run(SyncRequest::orders(vec![]), &self.shutdown).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketplaceConfig;
    use crate::events::EventPublisher;
    use crate::marketplace::{Credentials, EnvironmentCredentials, MarketplaceApi, MarketplacePage, SyncType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct OnePerResource;

    #[async_trait]
    impl MarketplaceApi for OnePerResource {
        async fn fetch_products(&self, _: &Credentials, _: u32, _: u32) -> Result<MarketplacePage> {
            Ok(MarketplacePage { content: vec![json!({"id": "p1"})], total_pages: Some(1) })
        }
        async fn fetch_orders(&self, _: &Credentials, _: &str, _: u32, _: u32) -> Result<MarketplacePage> {
            Ok(MarketplacePage { content: vec![json!({"id": "o1"})], total_pages: Some(1) })
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> Arc<ReconciliationEngine> {
        let config = MarketplaceConfig {
            env_credentials: EnvironmentCredentials(Credentials::new(Some("k"), Some("s"), Some("1"))),
            ..MarketplaceConfig::default()
        };
        Arc::new(ReconciliationEngine::new(store.clone(), Arc::new(OnePerResource), config, EventPublisher::disabled()))
    }

    #[tokio::test]
    async fn test_cycle_runs_products_then_orders() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = SyncScheduler::new(engine(&store), Duration::from_secs(60), CancellationToken::new());
        let results = scheduler.run_cycle().await;
        let kinds: Vec<SyncType> = results.into_iter().map(|r| r.unwrap().sync_type).collect();
        assert_eq!(kinds, vec![SyncType::Products, SyncType::Orders]);
        assert_eq!(store.products().await.len(), 1);
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(SyncScheduler::new(engine(&store), Duration::from_millis(10), shutdown.clone()).run());
        while store.sync_runs().await.len() < 2 { tokio::task::yield_now().await; }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(store.sync_runs().await.iter().all(|r| r.is_finished()));
    }
}
