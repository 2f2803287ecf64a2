//! Storage interfaces and implementations.
//!
//! [`SyncStore`] covers what the reconciliation engine reads and writes,
//! [`OrderStore`] what order operations need. [`PgStore`] backs both in
//! production; [`MemoryStore`] is the in-process implementation used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{NativeOrder, OrderDocument, OrderNotification, ReturnRequest};
use crate::marketplace::mapping::{MarketplaceOrderItemRow, MarketplaceOrderRecord, MarketplaceOrderRow, MarketplaceProductRow};
use crate::marketplace::{MarketplaceIntegration, SyncRun};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn find_integration(&self, channel: &str) -> Result<Option<MarketplaceIntegration>>;
    async fn touch_integration(&self, integration_id: Uuid, synced_at: DateTime<Utc>) -> Result<()>;

    async fn insert_sync_run(&self, run: &SyncRun) -> Result<()>;
    /// Writes the terminal state of a run that is still open.
    async fn finish_sync_run(&self, run: &SyncRun) -> Result<()>;
    async fn recent_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>>;

    /// Catalog product ids for the given SKUs, in one query.
    async fn product_ids_by_sku(&self, skus: &[String]) -> Result<HashMap<String, Uuid>>;

    /// Insert-or-update keyed on marketplace product id. Returns rows written.
    async fn upsert_products(&self, rows: &[MarketplaceProductRow]) -> Result<u64>;
    /// Insert-or-update keyed on marketplace order id. Returns
    /// `(marketplace_order_id, store id)` for every row written.
    async fn upsert_orders(&self, rows: &[MarketplaceOrderRow]) -> Result<Vec<(String, Uuid)>>;
    /// Delete every item of the order, then insert `items`.
    async fn replace_order_items(&self, order_id: Uuid, items: &[MarketplaceOrderItemRow]) -> Result<()>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<MarketplaceOrderItemRow>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn list_native_orders(&self, limit: i64, offset: i64) -> Result<Vec<NativeOrder>>;
    async fn get_native_order(&self, id: Uuid) -> Result<Option<NativeOrder>>;
    async fn save_native_order_status(&self, order: &NativeOrder) -> Result<()>;
    async fn list_marketplace_orders(&self, limit: i64, offset: i64) -> Result<Vec<MarketplaceOrderRecord>>;

    async fn insert_return_request(&self, request: &ReturnRequest) -> Result<()>;
    async fn get_return_request(&self, id: Uuid) -> Result<Option<ReturnRequest>>;
    async fn save_return_request(&self, request: &ReturnRequest) -> Result<()>;

    async fn insert_document(&self, document: &OrderDocument) -> Result<()>;
    async fn get_document(&self, id: Uuid) -> Result<Option<OrderDocument>>;
    async fn save_document(&self, document: &OrderDocument) -> Result<()>;
    async fn list_documents(&self, order_id: Uuid) -> Result<Vec<OrderDocument>>;

    async fn insert_notification(&self, notification: &OrderNotification) -> Result<()>;
    /// Oldest queued notifications first.
    async fn queued_notifications(&self, limit: i64) -> Result<Vec<OrderNotification>>;
    async fn save_notification(&self, notification: &OrderNotification) -> Result<()>;
}
