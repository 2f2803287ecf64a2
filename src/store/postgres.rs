//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{OrderStore, SyncStore};
use crate::domain::aggregates::{NativeOrder, OrderDocument, OrderNotification, ReturnRequest};
use crate::marketplace::mapping::{MarketplaceOrderItemRow, MarketplaceOrderRecord, MarketplaceOrderRow, MarketplaceProductRow};
use crate::marketplace::{MarketplaceIntegration, SyncRun};
use crate::Result;

const ORDER_COLUMNS: &str = "id, marketplace_order_id, order_number, marketplace_status, order_date, shipment_package_id, buyer_name, buyer_email, total_price, currency, shipping_address, billing_address, last_synced_at, metadata, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl SyncStore for PgStore {
    async fn find_integration(&self, channel: &str) -> Result<Option<MarketplaceIntegration>> {
        let row = sqlx::query_as::<_, MarketplaceIntegration>("SELECT * FROM marketplace_integrations WHERE channel = $1")
            .bind(channel).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn touch_integration(&self, integration_id: Uuid, synced_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE marketplace_integrations SET last_sync_at = $2, updated_at = $2 WHERE id = $1")
            .bind(integration_id).bind(synced_at).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_sync_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query("INSERT INTO trendyol_sync_runs (id, integration_id, channel, sync_type, status, started_at, processed, errors) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(run.id).bind(run.integration_id).bind(&run.channel).bind(run.sync_type.as_str()).bind(run.status.as_str())
            .bind(run.started_at).bind(run.processed).bind(run.errors)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn finish_sync_run(&self, run: &SyncRun) -> Result<()> {
        let result = sqlx::query("UPDATE trendyol_sync_runs SET status = $2, finished_at = $3, processed = $4, errors = $5, error_message = $6 WHERE id = $1 AND finished_at IS NULL")
            .bind(run.id).bind(run.status.as_str()).bind(run.finished_at).bind(run.processed).bind(run.errors).bind(&run.error_message)
            .execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(crate::MarketplaceError::StorageError(format!("sync run {} missing or already finalized", run.id)));
        }
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let runs = sqlx::query_as::<_, SyncRun>("SELECT * FROM trendyol_sync_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit).fetch_all(&self.pool).await?;
        Ok(runs)
    }

    async fn product_ids_by_sku(&self, skus: &[String]) -> Result<HashMap<String, Uuid>> {
        if skus.is_empty() { return Ok(HashMap::new()); }
        let rows: Vec<(String, Uuid)> = sqlx::query_as("SELECT sku, id FROM products WHERE sku = ANY($1) AND status <> 'deleted'")
            .bind(skus).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn upsert_products(&self, rows: &[MarketplaceProductRow]) -> Result<u64> {
        if rows.is_empty() { return Ok(0); }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO trendyol_products (id, marketplace_product_id, product_id, sku, barcode, title, currency, price, discounted_price, stock_quantity, marketplace_status, last_synced_at, metadata) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(Uuid::now_v7()).push_bind(&r.marketplace_product_id).push_bind(r.product_id).push_bind(&r.sku)
                .push_bind(&r.barcode).push_bind(&r.title).push_bind(&r.currency).push_bind(r.price).push_bind(r.discounted_price)
                .push_bind(r.stock_quantity).push_bind(&r.marketplace_status).push_bind(r.last_synced_at).push_bind(&r.metadata);
        });
        qb.push(
            " ON CONFLICT (marketplace_product_id) DO UPDATE SET product_id = EXCLUDED.product_id, sku = EXCLUDED.sku, barcode = EXCLUDED.barcode, \
             title = EXCLUDED.title, currency = EXCLUDED.currency, price = EXCLUDED.price, discounted_price = EXCLUDED.discounted_price, \
             stock_quantity = EXCLUDED.stock_quantity, marketplace_status = EXCLUDED.marketplace_status, last_synced_at = EXCLUDED.last_synced_at, \
             metadata = EXCLUDED.metadata, updated_at = NOW()",
        );
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_orders(&self, rows: &[MarketplaceOrderRow]) -> Result<Vec<(String, Uuid)>> {
        if rows.is_empty() { return Ok(vec![]); }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO trendyol_orders (id, marketplace_order_id, order_number, marketplace_status, order_date, shipment_package_id, buyer_name, buyer_email, total_price, currency, shipping_address, billing_address, last_synced_at, metadata) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(Uuid::now_v7()).push_bind(&r.marketplace_order_id).push_bind(&r.order_number).push_bind(&r.marketplace_status)
                .push_bind(r.order_date).push_bind(&r.shipment_package_id).push_bind(&r.buyer_name).push_bind(&r.buyer_email)
                .push_bind(r.total_price).push_bind(&r.currency).push_bind(&r.shipping_address).push_bind(&r.billing_address)
                .push_bind(r.last_synced_at).push_bind(&r.metadata);
        });
        qb.push(
            " ON CONFLICT (marketplace_order_id) DO UPDATE SET order_number = EXCLUDED.order_number, marketplace_status = EXCLUDED.marketplace_status, \
             order_date = EXCLUDED.order_date, shipment_package_id = EXCLUDED.shipment_package_id, buyer_name = EXCLUDED.buyer_name, \
             buyer_email = EXCLUDED.buyer_email, total_price = EXCLUDED.total_price, currency = EXCLUDED.currency, \
             shipping_address = EXCLUDED.shipping_address, billing_address = EXCLUDED.billing_address, \
             last_synced_at = EXCLUDED.last_synced_at, metadata = EXCLUDED.metadata, updated_at = NOW() \
             RETURNING marketplace_order_id, id",
        );
        let written: Vec<(String, Uuid)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(written)
    }

    async fn replace_order_items(&self, order_id: Uuid, items: &[MarketplaceOrderItemRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM trendyol_order_items WHERE order_id = $1").bind(order_id).execute(&mut *tx).await?;
        if !items.is_empty() {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO trendyol_order_items (id, order_id, line_id, marketplace_product_id, product_id, sku, quantity, unit_price, vat_rate, discount, line_status, metadata) ",
            );
            qb.push_values(items, |mut b, i| {
                b.push_bind(Uuid::now_v7()).push_bind(order_id).push_bind(&i.line_id).push_bind(&i.marketplace_product_id)
                    .push_bind(i.product_id).push_bind(&i.sku).push_bind(i.quantity).push_bind(i.unit_price).push_bind(i.vat_rate)
                    .push_bind(i.discount).push_bind(&i.line_status).push_bind(&i.metadata);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<MarketplaceOrderItemRow>> {
        let items = sqlx::query_as::<_, MarketplaceOrderItemRow>(
            "SELECT line_id, marketplace_product_id, product_id, sku, quantity, unit_price, vat_rate, discount, line_status, metadata FROM trendyol_order_items WHERE order_id = $1 ORDER BY line_id",
        )
        .bind(order_id).fetch_all(&self.pool).await?;
        Ok(items)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn list_native_orders(&self, limit: i64, offset: i64) -> Result<Vec<NativeOrder>> {
        let orders = sqlx::query_as::<_, NativeOrder>("SELECT * FROM orders ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2")
            .bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(orders)
    }

    async fn get_native_order(&self, id: Uuid) -> Result<Option<NativeOrder>> {
        let order = sqlx::query_as::<_, NativeOrder>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(order)
    }

    async fn save_native_order_status(&self, order: &NativeOrder) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, payment_status = $3, fulfillment_status = $4, updated_at = $5 WHERE id = $1")
            .bind(order.id).bind(&order.status).bind(&order.payment_status).bind(&order.fulfillment_status).bind(order.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn list_marketplace_orders(&self, limit: i64, offset: i64) -> Result<Vec<MarketplaceOrderRecord>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM trendyol_orders ORDER BY COALESCE(order_date, created_at) DESC, id DESC LIMIT $1 OFFSET $2");
        let orders = sqlx::query_as::<_, MarketplaceOrderRecord>(&sql).bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(orders)
    }

    async fn insert_return_request(&self, r: &ReturnRequest) -> Result<()> {
        sqlx::query("INSERT INTO return_requests (id, order_id, user_id, status, reason_code, notes, metadata, refund_amount, requested_at, processed_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
            .bind(r.id).bind(r.order_id).bind(r.user_id).bind(r.status.as_str()).bind(&r.reason_code).bind(&r.notes).bind(&r.metadata)
            .bind(r.refund_amount).bind(r.requested_at).bind(r.processed_at).bind(r.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_return_request(&self, id: Uuid) -> Result<Option<ReturnRequest>> {
        let request = sqlx::query_as::<_, ReturnRequest>("SELECT * FROM return_requests WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(request)
    }

    async fn save_return_request(&self, r: &ReturnRequest) -> Result<()> {
        sqlx::query("UPDATE return_requests SET status = $2, notes = $3, refund_amount = $4, processed_at = $5, updated_at = $6 WHERE id = $1")
            .bind(r.id).bind(r.status.as_str()).bind(&r.notes).bind(r.refund_amount).bind(r.processed_at).bind(r.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_document(&self, d: &OrderDocument) -> Result<()> {
        sqlx::query("INSERT INTO order_documents (id, order_id, document_type, document_number, status, file_url, notes, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(d.id).bind(d.order_id).bind(d.document_type.as_str()).bind(&d.document_number).bind(d.status.as_str())
            .bind(&d.file_url).bind(&d.notes).bind(d.created_at).bind(d.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<OrderDocument>> {
        let doc = sqlx::query_as::<_, OrderDocument>("SELECT * FROM order_documents WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(doc)
    }

    async fn save_document(&self, d: &OrderDocument) -> Result<()> {
        sqlx::query("UPDATE order_documents SET status = $2, file_url = $3, notes = $4, updated_at = $5 WHERE id = $1")
            .bind(d.id).bind(d.status.as_str()).bind(&d.file_url).bind(&d.notes).bind(d.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn list_documents(&self, order_id: Uuid) -> Result<Vec<OrderDocument>> {
        let docs = sqlx::query_as::<_, OrderDocument>("SELECT * FROM order_documents WHERE order_id = $1 ORDER BY created_at")
            .bind(order_id).fetch_all(&self.pool).await?;
        Ok(docs)
    }

    async fn insert_notification(&self, n: &OrderNotification) -> Result<()> {
        sqlx::query("INSERT INTO order_notifications (id, order_id, notification_type, recipient_email, subject, body, status, error_message, created_at, sent_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(n.id).bind(n.order_id).bind(&n.notification_type).bind(&n.recipient_email).bind(&n.subject).bind(&n.body)
            .bind(n.status.as_str()).bind(&n.error_message).bind(n.created_at).bind(n.sent_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn queued_notifications(&self, limit: i64) -> Result<Vec<OrderNotification>> {
        let queued = sqlx::query_as::<_, OrderNotification>("SELECT * FROM order_notifications WHERE status = 'queued' ORDER BY created_at LIMIT $1")
            .bind(limit).fetch_all(&self.pool).await?;
        Ok(queued)
    }

    async fn save_notification(&self, n: &OrderNotification) -> Result<()> {
        sqlx::query("UPDATE order_notifications SET status = $2, error_message = $3, sent_at = $4 WHERE id = $1")
            .bind(n.id).bind(n.status.as_str()).bind(&n.error_message).bind(n.sent_at)
            .execute(&self.pool).await?;
        Ok(())
    }
}
