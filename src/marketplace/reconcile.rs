//! Reconciliation engine.
//!
//! One run handles one sync type and walks the marketplace pages strictly in
//! order. Transport failures end the run as `failed`; a store failure only
//! costs the rows of the batch it hit, and the loop moves on to the next page.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MarketplaceConfig;
use crate::domain::events::{DomainEvent, SyncEvent};
use crate::events::EventPublisher;
use crate::marketplace::client::clamp_page_size;
use crate::marketplace::ledger::Tally;
use crate::marketplace::mapping::{map_order, map_order_lines, map_product, order_line_skus, product_skus, MarketplaceOrderItemRow};
use crate::marketplace::{resolve_credentials, CredentialSource, Credentials, MarketplaceApi, SyncLedger, SyncRun, SyncRunStatus, SyncType};
use crate::store::SyncStore;
use crate::{MarketplaceError, Result};

/// Hard stop for runaway pagination.
const MAX_PAGES: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "type")]
    pub sync_type: SyncType,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub statuses: Vec<String>,
}

impl SyncRequest {
    pub fn products() -> Self { Self { sync_type: SyncType::Products, size: None, statuses: vec![] } }
    pub fn orders(statuses: Vec<String>) -> Self { Self { sync_type: SyncType::Orders, size: None, statuses } }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub run_id: Uuid,
    pub sync_type: SyncType,
    pub processed: i32,
    pub errors: i32,
}

type InFlight = Arc<Mutex<HashSet<(String, SyncType)>>>;

/// Holds the `(channel, sync type)` slot for the lifetime of a run.
struct RunGuard {
    in_flight: InFlight,
    key: (String, SyncType),
}

impl RunGuard {
    fn acquire(in_flight: &InFlight, channel: &str, sync_type: SyncType) -> Result<Self> {
        let key = (channel.to_string(), sync_type);
        let mut running = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.clone()) {
            return Err(MarketplaceError::SyncInProgress(sync_type.to_string()));
        }
        Ok(Self { in_flight: in_flight.clone(), key })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn SyncStore>,
    api: Arc<dyn MarketplaceApi>,
    config: MarketplaceConfig,
    publisher: EventPublisher,
    in_flight: InFlight,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn SyncStore>, api: Arc<dyn MarketplaceApi>, config: MarketplaceConfig, publisher: EventPublisher) -> Self {
        Self { store, api, config, publisher, in_flight: InFlight::default() }
    }

    pub fn channel(&self) -> &str { &self.config.channel }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        self.store.recent_sync_runs(limit.clamp(1, 200)).await
    }

    pub async fn run(&self, request: SyncRequest, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let channel = self.config.channel.as_str();
        let sync_type = request.sync_type;
        let _guard = RunGuard::acquire(&self.in_flight, channel, sync_type)?;

        let integration = self.store.find_integration(channel).await?;
        let ledger = SyncLedger::open(self.store.as_ref(), integration.as_ref().map(|i| i.id), channel, sync_type).await?;
        let run_id = ledger.run().id;
        info!(%run_id, %sync_type, channel, "sync run started");

        let mut sources: Vec<&dyn CredentialSource> = Vec::with_capacity(2);
        if let Some(integration) = &integration { sources.push(integration); }
        sources.push(&self.config.env_credentials);
        let Some((creds, origin)) = resolve_credentials(&sources) else {
            let message = format!(
                "{channel} credentials incomplete: set api key, api secret and supplier id on the integration or via MARKETPLACE_API_KEY, MARKETPLACE_API_SECRET and MARKETPLACE_SUPPLIER_ID"
            );
            warn!(%run_id, "{}", message);
            let run = ledger.finish(SyncRunStatus::Failed, Tally::default(), Some(message.clone())).await?;
            self.announce(&run).await;
            return Err(MarketplaceError::NotConfigured(message));
        };
        debug!(%run_id, %origin, supplier_id = %creds.supplier_id, "credentials resolved");

        let size = clamp_page_size(request.size.unwrap_or(self.config.page_size));
        let mut tally = Tally::default();
        let result = match sync_type {
            SyncType::Products => self.sync_products(&creds, size, &mut tally, cancel).await,
            SyncType::Orders => {
                let statuses = if request.statuses.is_empty() { self.config.order_statuses.clone() } else { request.statuses };
                let mut result = Ok(());
                for status in &statuses {
                    result = self.sync_orders(&creds, status, size, &mut tally, cancel).await;
                    if result.is_err() { break; }
                }
                result
            }
        };

        match result {
            Ok(()) => {
                let run = ledger.finish(SyncRunStatus::Success, tally, None).await?;
                if let Some(integration) = &integration {
                    if let Err(e) = self.store.touch_integration(integration.id, Utc::now()).await {
                        warn!(%run_id, "failed to record last sync time: {}", e);
                    }
                }
                info!(%run_id, %sync_type, processed = run.processed, errors = run.errors, "sync run finished");
                self.announce(&run).await;
                Ok(SyncOutcome { run_id, sync_type, processed: run.processed, errors: run.errors })
            }
            Err(e) => {
                let message = match &e {
                    MarketplaceError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                error!(%run_id, %sync_type, processed = tally.processed, errors = tally.errors, "sync run failed: {}", message);
                let run = ledger.finish(SyncRunStatus::Failed, tally, Some(message)).await?;
                self.announce(&run).await;
                Err(e)
            }
        }
    }

    async fn sync_products(&self, creds: &Credentials, size: u32, tally: &mut Tally, cancel: &CancellationToken) -> Result<()> {
        let mut page = 0;
        loop {
            if cancel.is_cancelled() { return Err(MarketplaceError::Cancelled); }
            let batch = self.api.fetch_products(creds, page, size).await?;
            if batch.content.is_empty() { break; }
            self.write_products(&batch.content, page, tally).await;
            debug!(page, processed = tally.processed, errors = tally.errors, "product page done");
            if !batch.has_more(page, size) || page + 1 >= MAX_PAGES { break; }
            page += 1;
        }
        Ok(())
    }

    async fn sync_orders(&self, creds: &Credentials, status: &str, size: u32, tally: &mut Tally, cancel: &CancellationToken) -> Result<()> {
        let mut page = 0;
        loop {
            if cancel.is_cancelled() { return Err(MarketplaceError::Cancelled); }
            let batch = self.api.fetch_orders(creds, status, page, size).await?;
            if batch.content.is_empty() { break; }
            self.write_orders(&batch.content, page, tally).await;
            debug!(page, status, processed = tally.processed, errors = tally.errors, "order page done");
            if !batch.has_more(page, size) || page + 1 >= MAX_PAGES { break; }
            page += 1;
        }
        Ok(())
    }

    async fn write_products(&self, items: &[Value], page: u32, tally: &mut Tally) {
        let ids = match self.store.product_ids_by_sku(&product_skus(items)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(page, items = items.len(), "catalog lookup failed, skipping page: {}", e);
                tally.record_failed(items.len());
                return;
            }
        };
        let synced_at = Utc::now();
        let mut rows = Vec::with_capacity(items.len());
        for raw in items {
            match map_product(raw, &ids, synced_at) {
                Some(row) => rows.push(row),
                None => tally.record_failed(1),
            }
        }
        let rows = last_per_key(rows, |r| r.marketplace_product_id.clone());
        if rows.is_empty() { return; }
        match self.store.upsert_products(&rows).await {
            Ok(_) => tally.record_written(rows.len()),
            Err(e) => {
                warn!(page, rows = rows.len(), "product upsert failed: {}", e);
                tally.record_failed(rows.len());
            }
        }
    }

    async fn write_orders(&self, items: &[Value], page: u32, tally: &mut Tally) {
        let ids = match self.store.product_ids_by_sku(&order_line_skus(items)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(page, items = items.len(), "catalog lookup failed, skipping page: {}", e);
                tally.record_failed(items.len());
                return;
            }
        };
        let synced_at = Utc::now();
        let mut rows = Vec::with_capacity(items.len());
        let mut lines: HashMap<String, Vec<MarketplaceOrderItemRow>> = HashMap::new();
        for raw in items {
            match map_order(raw, synced_at) {
                Some(row) => {
                    lines.insert(row.marketplace_order_id.clone(), map_order_lines(raw, &ids));
                    rows.push(row);
                }
                None => tally.record_failed(1),
            }
        }
        let rows = last_per_key(rows, |r| r.marketplace_order_id.clone());
        if rows.is_empty() { return; }
        let written = match self.store.upsert_orders(&rows).await {
            Ok(written) => written,
            Err(e) => {
                warn!(page, rows = rows.len(), "order upsert failed: {}", e);
                tally.record_failed(rows.len());
                return;
            }
        };
        tally.record_written(written.len());
        for (external_id, order_id) in written {
            let items = lines.remove(&external_id).unwrap_or_default();
            if let Err(e) = self.store.replace_order_items(order_id, &items).await {
                warn!(page, %order_id, "order item replacement failed: {}", e);
                tally.record_failed(1);
            }
        }
    }

    async fn announce(&self, run: &SyncRun) {
        self.publisher
            .publish(&DomainEvent::Sync(SyncEvent::Finished {
                run_id: run.id, channel: run.channel.clone(), sync_type: run.sync_type, status: run.status,
                processed: run.processed, errors: run.errors,
            }))
            .await;
    }
}

/// Keeps the last row per key, in first-seen order. A single upsert
/// statement cannot touch the same conflict key twice.
fn last_per_key<T>(rows: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.get(&key(&row)) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(key(&row), out.len());
                out.push(row);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{EnvironmentCredentials, MarketplaceIntegration, MarketplacePage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Semaphore;

    enum Scripted {
        Page(MarketplacePage),
        Fail(u16),
    }

    /// Serves canned pages keyed by resource and page number. Unscripted pages are empty.
    #[derive(Default)]
    struct ScriptedMarketplace {
        pages: HashMap<(String, u32), Scripted>,
        calls: Mutex<Vec<(String, u32, u32)>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedMarketplace {
        fn page(mut self, resource: &str, page: u32, content: Vec<Value>, total_pages: Option<u32>) -> Self {
            self.pages.insert((resource.to_string(), page), Scripted::Page(MarketplacePage { content, total_pages }));
            self
        }

        fn fail(mut self, resource: &str, page: u32, status: u16) -> Self {
            self.pages.insert((resource.to_string(), page), Scripted::Fail(status));
            self
        }

        fn calls(&self) -> Vec<(String, u32, u32)> { self.calls.lock().unwrap().clone() }

        async fn serve(&self, resource: String, page: u32, size: u32) -> Result<MarketplacePage> {
            self.calls.lock().unwrap().push((resource.clone(), page, size));
            if let Some(gate) = &self.gate { let _permit = gate.acquire().await.unwrap(); }
            match self.pages.get(&(resource, page)) {
                Some(Scripted::Page(p)) => Ok(p.clone()),
                Some(Scripted::Fail(status)) => Err(MarketplaceError::api(*status, "upstream unavailable")),
                None => Ok(MarketplacePage::default()),
            }
        }
    }

    #[async_trait]
    impl MarketplaceApi for ScriptedMarketplace {
        async fn fetch_products(&self, _creds: &Credentials, page: u32, size: u32) -> Result<MarketplacePage> {
            self.serve("products".into(), page, size).await
        }
        async fn fetch_orders(&self, _creds: &Credentials, status: &str, page: u32, size: u32) -> Result<MarketplacePage> {
            self.serve(format!("orders:{status}"), page, size).await
        }
    }

    fn integration() -> MarketplaceIntegration {
        let now = Utc::now();
        MarketplaceIntegration {
            id: Uuid::now_v7(), channel: "trendyol".into(), api_key: Some("key".into()), api_secret: Some("secret".into()),
            supplier_id: Some("1001".into()), warehouse_id: None, metadata: json!({}), last_sync_at: None, created_at: now, updated_at: now,
        }
    }

    fn engine(store: &Arc<MemoryStore>, api: ScriptedMarketplace) -> (ReconciliationEngine, Arc<ScriptedMarketplace>) {
        let api = Arc::new(api);
        let engine = ReconciliationEngine::new(store.clone(), api.clone(), MarketplaceConfig::default(), EventPublisher::disabled());
        (engine, api)
    }

    async fn seeded_store() -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let integration = integration();
        let id = integration.id;
        store.add_integration(integration).await;
        (store, id)
    }

    fn product(id: &str, sku: &str) -> Value { json!({"id": id, "stockCode": sku, "title": format!("Product {id}"), "listPrice": 100, "quantity": 5}) }

    #[tokio::test]
    async fn test_product_sync_is_idempotent() {
        let (store, integration_id) = seeded_store().await;
        let catalog_id = store.add_catalog_product("SKU-1").await;
        let api = ScriptedMarketplace::default().page("products", 0, vec![product("p1", "SKU-1"), product("p2", "SKU-X")], Some(1));
        let (engine, _) = engine(&store, api);

        let first = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap();
        let second = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap();
        assert_eq!((first.processed, first.errors), (2, 0));
        assert_eq!((second.processed, second.errors), (2, 0));

        let products = store.products().await;
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product_id, Some(catalog_id));
        assert_eq!(products[1].product_id, None);
        assert_eq!(store.sync_runs().await.len(), 2);
        assert!(store.integration(integration_id).await.unwrap().last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_order_items_replaced_on_resync() {
        let (store, _) = seeded_store().await;
        let lines = |n: usize| (0..n).map(|i| json!({"id": i, "merchantSku": format!("MS-{i}"), "quantity": 1, "price": 10})).collect::<Vec<_>>();
        let three = ScriptedMarketplace::default().page("orders:Created", 0, vec![json!({"id": "o1", "status": "Created", "lines": lines(3)})], Some(1));
        let (engine, _) = engine(&store, three);
        engine.run(SyncRequest::orders(vec![]), &CancellationToken::new()).await.unwrap();

        let order_id = store.orders().await[0].id;
        assert_eq!(store.order_items(order_id).await.unwrap().len(), 3);

        let two = ScriptedMarketplace::default().page("orders:Created", 0, vec![json!({"id": "o1", "status": "Picking", "lines": lines(2)})], Some(1));
        let (engine, _) = self::engine(&store, two);
        let outcome = engine.run(SyncRequest::orders(vec![]), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 1);

        let orders = store.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, order_id);
        assert_eq!(orders[0].order.marketplace_status.as_deref(), Some("Picking"));
        let items = store.order_items(order_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items.iter().filter_map(|i| i.sku.clone()).collect::<Vec<_>>(), vec!["MS-0", "MS-1"]);
    }

    #[tokio::test]
    async fn test_orders_walk_every_requested_status() {
        let (store, _) = seeded_store().await;
        let api = ScriptedMarketplace::default()
            .page("orders:Created", 0, vec![json!({"id": "a"})], Some(1))
            .page("orders:Shipped", 0, vec![json!({"id": "b"}), json!({"id": "c"})], Some(1));
        let (engine, api) = engine(&store, api);
        let outcome = engine.run(SyncRequest::orders(vec!["Created".into(), "Shipped".into()]), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 3);
        let resources: Vec<String> = api.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(resources, vec!["orders:Created", "orders:Shipped"]);
    }

    #[tokio::test]
    async fn test_failed_batch_counts_errors_and_continues() {
        let (store, _) = seeded_store().await;
        store.poison("bad").await;
        let api = ScriptedMarketplace::default()
            .page("products", 0, vec![product("ok-1", "A"), product("bad", "B")], Some(2))
            .page("products", 1, vec![product("ok-2", "C"), json!({"title": "no id"})], Some(2));
        let (engine, api) = engine(&store, api);

        let outcome = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.errors, 3);
        assert_eq!(api.calls().len(), 2);

        let ids: Vec<String> = store.products().await.into_iter().map(|p| p.marketplace_product_id).collect();
        assert_eq!(ids, vec!["ok-2"]);
        let run = &store.sync_runs().await[0];
        assert_eq!(run.status, SyncRunStatus::Success);
        assert_eq!(run.errors, 3);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_run() {
        let (store, integration_id) = seeded_store().await;
        let api = ScriptedMarketplace::default()
            .page("products", 0, vec![product("p1", "A"), product("p2", "B")], Some(3))
            .fail("products", 1, 503)
            .page("products", 2, vec![product("p3", "C")], Some(3));
        let (engine, api) = engine(&store, api);

        let err = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(api.calls().len(), 2);
        assert_eq!(store.products().await.len(), 2);

        let run = &store.sync_runs().await[0];
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.processed, 2);
        assert!(run.error_message.as_deref().unwrap().contains("503"));
        assert!(run.finished_at.is_some());
        assert!(store.integration(integration_id).await.unwrap().last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_finalize_failed() {
        let store = Arc::new(MemoryStore::new());
        let (engine, api) = engine(&store, ScriptedMarketplace::default());
        let err = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::NotConfigured(_)));
        assert!(api.calls().is_empty());

        let runs = store.sync_runs().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SyncRunStatus::Failed);
        assert!(runs[0].error_message.as_deref().unwrap().contains("credentials"));
    }

    #[tokio::test]
    async fn test_environment_credentials_fallback() {
        let store = Arc::new(MemoryStore::new());
        let config = MarketplaceConfig {
            env_credentials: EnvironmentCredentials(Credentials::new(Some("k"), Some("s"), Some("7"))),
            ..MarketplaceConfig::default()
        };
        let api = Arc::new(ScriptedMarketplace::default().page("products", 0, vec![product("p1", "A")], None));
        let engine = ReconciliationEngine::new(store.clone(), api, config, EventPublisher::disabled());
        let outcome = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(store.sync_runs().await[0].integration_id, None);
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination() {
        let (store, _) = seeded_store().await;
        let api = ScriptedMarketplace::default()
            .page("products", 0, vec![product("p1", "A"), product("p2", "B")], None)
            .page("products", 1, vec![product("p3", "C")], None)
            .page("products", 2, vec![product("never", "D")], None);
        let (engine, api) = engine(&store, api);
        let request = SyncRequest { size: Some(2), ..SyncRequest::products() };
        let outcome = engine.run(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 3);
        assert_eq!(api.calls(), vec![("products".to_string(), 0, 2), ("products".to_string(), 1, 2)]);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_finalized() {
        let (store, _) = seeded_store().await;
        let (engine, api) = engine(&store, ScriptedMarketplace::default().page("products", 0, vec![product("p1", "A")], Some(5)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.run(SyncRequest::products(), &cancel).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::Cancelled));
        assert!(api.calls().is_empty());
        let run = &store.sync_runs().await[0];
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_concurrent_run_rejected() {
        let (store, _) = seeded_store().await;
        let gate = Arc::new(Semaphore::new(0));
        let api = ScriptedMarketplace { gate: Some(gate.clone()), ..Default::default() };
        let (engine, api) = engine(&store, api);
        let engine = Arc::new(engine);

        let background = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(SyncRequest::products(), &CancellationToken::new()).await })
        };
        while api.calls().is_empty() { tokio::task::yield_now().await; }

        let err = engine.run(SyncRequest::products(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::SyncInProgress(_)));
        assert_eq!(store.sync_runs().await.len(), 1);

        gate.add_permits(1);
        assert!(background.await.unwrap().is_ok());
        assert!(engine.run(SyncRequest::products(), &CancellationToken::new()).await.is_ok());
    }

    #[test]
    fn test_last_per_key() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        assert_eq!(last_per_key(rows, |r| r.0.to_string()), vec![("a", 3), ("b", 2)]);
    }
}
