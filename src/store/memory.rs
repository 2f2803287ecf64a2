//! In-memory store.
//!
//! Mirrors the upsert and replace semantics of [`super::PgStore`]. External
//! ids can be poisoned so that any batch containing them fails the way a
//! constraint violation would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderStore, SyncStore};
use crate::domain::aggregates::{NativeOrder, NotificationStatus, OrderDocument, OrderNotification, ReturnRequest};
use crate::marketplace::mapping::{MarketplaceOrderItemRow, MarketplaceOrderRecord, MarketplaceOrderRow, MarketplaceProductRow};
use crate::marketplace::{MarketplaceIntegration, SyncRun};
use crate::{MarketplaceError, Result};

#[derive(Default)]
struct State {
    integrations: Vec<MarketplaceIntegration>,
    sync_runs: Vec<SyncRun>,
    catalog: HashMap<String, Uuid>,
    products: BTreeMap<String, MarketplaceProductRow>,
    orders: BTreeMap<String, MarketplaceOrderRecord>,
    items: HashMap<Uuid, Vec<MarketplaceOrderItemRow>>,
    native_orders: Vec<NativeOrder>,
    returns: HashMap<Uuid, ReturnRequest>,
    documents: Vec<OrderDocument>,
    notifications: Vec<OrderNotification>,
    poisoned: HashSet<String>,
}

impl State {
    fn check_poison<'a>(&self, mut keys: impl Iterator<Item = &'a String>) -> Result<()> {
        match keys.find(|k| self.poisoned.contains(*k)) {
            Some(key) => Err(MarketplaceError::StorageError(format!("constraint violation on {key}"))),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn add_integration(&self, integration: MarketplaceIntegration) {
        self.state.write().await.integrations.push(integration);
    }

    /// Registers a catalog product and returns its id.
    pub async fn add_catalog_product(&self, sku: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.state.write().await.catalog.insert(sku.to_string(), id);
        id
    }

    pub async fn add_native_order(&self, order: NativeOrder) {
        self.state.write().await.native_orders.push(order);
    }

    /// Make every upsert batch containing `external_id` fail.
    pub async fn poison(&self, external_id: &str) {
        self.state.write().await.poisoned.insert(external_id.to_string());
    }

    pub async fn products(&self) -> Vec<MarketplaceProductRow> {
        self.state.read().await.products.values().cloned().collect()
    }

    pub async fn orders(&self) -> Vec<MarketplaceOrderRecord> {
        self.state.read().await.orders.values().cloned().collect()
    }

    pub async fn sync_runs(&self) -> Vec<SyncRun> {
        self.state.read().await.sync_runs.clone()
    }

    pub async fn integration(&self, id: Uuid) -> Option<MarketplaceIntegration> {
        self.state.read().await.integrations.iter().find(|i| i.id == id).cloned()
    }

    pub async fn notifications(&self) -> Vec<OrderNotification> {
        self.state.read().await.notifications.clone()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn find_integration(&self, channel: &str) -> Result<Option<MarketplaceIntegration>> {
        Ok(self.state.read().await.integrations.iter().find(|i| i.channel == channel).cloned())
    }

    async fn touch_integration(&self, integration_id: Uuid, synced_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let integration = state.integrations.iter_mut().find(|i| i.id == integration_id).ok_or(MarketplaceError::NotFound("Integration"))?;
        integration.last_sync_at = Some(synced_at);
        integration.updated_at = synced_at;
        Ok(())
    }

    async fn insert_sync_run(&self, run: &SyncRun) -> Result<()> {
        self.state.write().await.sync_runs.push(run.clone());
        Ok(())
    }

    async fn finish_sync_run(&self, run: &SyncRun) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.sync_runs.iter_mut().find(|r| r.id == run.id).ok_or(MarketplaceError::NotFound("Sync run"))?;
        if stored.is_finished() {
            return Err(MarketplaceError::StorageError(format!("sync run {} already finalized", run.id)));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let state = self.state.read().await;
        let mut runs = state.sync_runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn product_ids_by_sku(&self, skus: &[String]) -> Result<HashMap<String, Uuid>> {
        let state = self.state.read().await;
        Ok(skus.iter().filter_map(|s| state.catalog.get(s).map(|id| (s.clone(), *id))).collect())
    }

    async fn upsert_products(&self, rows: &[MarketplaceProductRow]) -> Result<u64> {
        let mut state = self.state.write().await;
        state.check_poison(rows.iter().map(|r| &r.marketplace_product_id))?;
        for row in rows {
            state.products.insert(row.marketplace_product_id.clone(), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_orders(&self, rows: &[MarketplaceOrderRow]) -> Result<Vec<(String, Uuid)>> {
        let mut state = self.state.write().await;
        state.check_poison(rows.iter().map(|r| &r.marketplace_order_id))?;
        let now = Utc::now();
        let mut written = Vec::with_capacity(rows.len());
        for row in rows {
            let record = state
                .orders
                .entry(row.marketplace_order_id.clone())
                .and_modify(|existing| {
                    existing.order = row.clone();
                    existing.updated_at = now;
                })
                .or_insert_with(|| MarketplaceOrderRecord { id: Uuid::now_v7(), order: row.clone(), created_at: now, updated_at: now });
            written.push((row.marketplace_order_id.clone(), record.id));
        }
        Ok(written)
    }

    async fn replace_order_items(&self, order_id: Uuid, items: &[MarketplaceOrderItemRow]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_poison(items.iter().filter_map(|i| i.line_id.as_ref()))?;
        state.items.insert(order_id, items.to_vec());
        Ok(())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<MarketplaceOrderItemRow>> {
        Ok(self.state.read().await.items.get(&order_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn list_native_orders(&self, limit: i64, offset: i64) -> Result<Vec<NativeOrder>> {
        let mut orders = self.state.read().await.native_orders.clone();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(orders.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn get_native_order(&self, id: Uuid) -> Result<Option<NativeOrder>> {
        Ok(self.state.read().await.native_orders.iter().find(|o| o.id == id).cloned())
    }

    async fn save_native_order_status(&self, order: &NativeOrder) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.native_orders.iter_mut().find(|o| o.id == order.id).ok_or(MarketplaceError::NotFound("Order"))?;
        stored.status = order.status.clone();
        stored.payment_status = order.payment_status.clone();
        stored.fulfillment_status = order.fulfillment_status.clone();
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn list_marketplace_orders(&self, limit: i64, offset: i64) -> Result<Vec<MarketplaceOrderRecord>> {
        let mut orders: Vec<_> = self.state.read().await.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            let (a_at, b_at) = (a.order.order_date.unwrap_or(a.created_at), b.order.order_date.unwrap_or(b.created_at));
            b_at.cmp(&a_at).then_with(|| b.id.cmp(&a.id))
        });
        Ok(orders.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn insert_return_request(&self, request: &ReturnRequest) -> Result<()> {
        self.state.write().await.returns.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_return_request(&self, id: Uuid) -> Result<Option<ReturnRequest>> {
        Ok(self.state.read().await.returns.get(&id).cloned())
    }

    async fn save_return_request(&self, request: &ReturnRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.returns.contains_key(&request.id) { return Err(MarketplaceError::NotFound("Return request")); }
        state.returns.insert(request.id, request.clone());
        Ok(())
    }

    async fn insert_document(&self, document: &OrderDocument) -> Result<()> {
        self.state.write().await.documents.push(document.clone());
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<OrderDocument>> {
        Ok(self.state.read().await.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn save_document(&self, document: &OrderDocument) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.documents.iter_mut().find(|d| d.id == document.id).ok_or(MarketplaceError::NotFound("Document"))?;
        *stored = document.clone();
        Ok(())
    }

    async fn list_documents(&self, order_id: Uuid) -> Result<Vec<OrderDocument>> {
        Ok(self.state.read().await.documents.iter().filter(|d| d.order_id == order_id).cloned().collect())
    }

    async fn insert_notification(&self, notification: &OrderNotification) -> Result<()> {
        self.state.write().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn queued_notifications(&self, limit: i64) -> Result<Vec<OrderNotification>> {
        let state = self.state.read().await;
        let mut queued: Vec<_> = state.notifications.iter().filter(|n| n.status == NotificationStatus::Queued).cloned().collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        queued.truncate(limit.max(0) as usize);
        Ok(queued)
    }

    async fn save_notification(&self, notification: &OrderNotification) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.notifications.iter_mut().find(|n| n.id == notification.id).ok_or(MarketplaceError::NotFound("Notification"))?;
        *stored = notification.clone();
        Ok(())
    }
}
