//! Order operations: unified listing, status updates, returns, documents and
//! notifications.

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    DocumentStatus, NewDocument, NewNotification, NewReturnRequest, OrderDocument, OrderNotification, OrderStatusUpdate, ReturnRequest,
    ReturnUpdate,
};
use crate::events::EventPublisher;
use crate::orders::notifier::{DispatchReport, NotificationSender};
use crate::orders::unified::{merge, OrderSource, UnifiedOrder, UnifiedOrderFilter, MAX_LIMIT, WEB_CHANNEL};
use crate::store::OrderStore;
use crate::{MarketplaceError, Result};

pub const RETURN_STATUS_NOTIFICATION: &str = "return_status";

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    publisher: EventPublisher,
    marketplace_channel: String,
    default_currency: String,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, publisher: EventPublisher, marketplace_channel: &str, default_currency: &str) -> Self {
        Self { store, publisher, marketplace_channel: marketplace_channel.into(), default_currency: default_currency.into() }
    }

    fn view(&self, source: &OrderSource) -> UnifiedOrder { source.to_unified_view(&self.marketplace_channel, &self.default_currency) }

    /// Each source is paged newest first until it yields `limit` matching
    /// orders or runs out, then the merged list is sorted and cut.
    pub async fn unified_orders(&self, filter: &UnifiedOrderFilter) -> Result<Vec<UnifiedOrder>> {
        let limit = filter.limit();
        // Status is derived per row, so a status filter has to scan past non-matching rows.
        let page_size = if filter.status.is_some() { MAX_LIMIT } else { limit };
        let mut views = Vec::new();

        if filter.wants_channel(WEB_CHANNEL) {
            let (mut offset, mut found) = (0, 0);
            loop {
                let page = self.store.list_native_orders(page_size, offset).await?;
                let fetched = page.len() as i64;
                for order in page {
                    let view = self.view(&OrderSource::Native(order));
                    if filter.matches(&view) { views.push(view); found += 1; }
                }
                offset += fetched;
                if found >= limit || fetched < page_size { break; }
            }
        }
        if filter.wants_channel(&self.marketplace_channel) {
            let (mut offset, mut found) = (0, 0);
            loop {
                let page = self.store.list_marketplace_orders(page_size, offset).await?;
                let fetched = page.len() as i64;
                for record in page {
                    let view = self.view(&OrderSource::Marketplace(record));
                    if filter.matches(&view) { views.push(view); found += 1; }
                }
                offset += fetched;
                if found >= limit || fetched < page_size { break; }
            }
        }
        Ok(merge(views, filter))
    }

    pub async fn update_order_status(&self, id: Uuid, update: OrderStatusUpdate) -> Result<UnifiedOrder> {
        if update.is_empty() { return Err(MarketplaceError::Validation("no status given".into())); }
        let mut order = self.store.get_native_order(id).await?.ok_or(MarketplaceError::NotFound("Order"))?;
        order.apply_status(&update);
        self.store.save_native_order_status(&order).await?;
        tracing::info!(order_id = %id, status = %order.status, payment = %order.payment_status, fulfillment = %order.fulfillment_status, "order status updated");
        Ok(self.view(&OrderSource::Native(order)))
    }

    pub async fn create_return(&self, form: NewReturnRequest) -> Result<ReturnRequest> {
        form.validate()?;
        let mut request = ReturnRequest::open(form);
        self.store.insert_return_request(&request).await?;
        tracing::info!(return_id = %request.id, order_id = %request.order_id, reason = %request.reason_code, "return requested");
        self.publisher.publish_all(request.take_events()).await;
        Ok(request)
    }

    /// A status change queues a customer notification when the request carries an email.
    pub async fn update_return(&self, id: Uuid, update: ReturnUpdate) -> Result<ReturnRequest> {
        let mut request = self.store.get_return_request(id).await?.ok_or(MarketplaceError::NotFound("Return request"))?;
        let before = request.status;
        request.apply(update)?;
        self.store.save_return_request(&request).await?;

        if request.status != before {
            tracing::info!(return_id = %id, from = %before, to = %request.status, "return status changed");
            if let Some(email) = request.customer_email() {
                let reference = request.order_number().map(str::to_string).unwrap_or_else(|| request.order_id.to_string());
                let form = NewNotification {
                    order_id: Some(request.order_id),
                    notification_type: RETURN_STATUS_NOTIFICATION.into(),
                    recipient_email: email.to_string(),
                    subject: format!("Return request for order {reference}"),
                    body: format!("Your return request for order {reference} is now {}.", request.status),
                };
                if let Err(e) = self.queue_notification(form).await {
                    tracing::warn!(return_id = %id, "failed to queue return notification: {}", e);
                }
            }
        }
        self.publisher.publish_all(request.take_events()).await;
        Ok(request)
    }

    /// Documents are appended; the order itself is not looked up.
    pub async fn create_document(&self, order_id: Uuid, form: NewDocument) -> Result<OrderDocument> {
        form.validate()?;
        let mut doc = OrderDocument::draft(order_id, form);
        self.store.insert_document(&doc).await?;
        self.publisher.publish_all(doc.take_events()).await;
        Ok(doc)
    }

    pub async fn advance_document(&self, id: Uuid, status: DocumentStatus) -> Result<OrderDocument> {
        let mut doc = self.store.get_document(id).await?.ok_or(MarketplaceError::NotFound("Document"))?;
        if doc.status == status { return Ok(doc); }
        doc.advance(status)?;
        self.store.save_document(&doc).await?;
        self.publisher.publish_all(doc.take_events()).await;
        Ok(doc)
    }

    pub async fn documents(&self, order_id: Uuid) -> Result<Vec<OrderDocument>> {
        self.store.list_documents(order_id).await
    }

    pub async fn queue_notification(&self, form: NewNotification) -> Result<OrderNotification> {
        form.validate()?;
        let mut notification = OrderNotification::queue(form);
        self.store.insert_notification(&notification).await?;
        self.publisher.publish_all(notification.take_events()).await;
        Ok(notification)
    }

    /// One pass over the queue, oldest first.
    pub async fn dispatch_notifications(&self, sender: &dyn NotificationSender, limit: i64) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for mut notification in self.store.queued_notifications(limit.clamp(1, 500)).await? {
            match sender.send(&notification).await {
                Ok(()) => {
                    notification.mark_sent()?;
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(notification_id = %notification.id, "notification delivery failed: {}", e);
                    notification.mark_failed(e.to_string())?;
                    report.failed += 1;
                }
            }
            self.store.save_notification(&notification).await?;
            self.publisher.publish_all(notification.take_events()).await;
        }
        if report.sent + report.failed > 0 {
            tracing::info!(sent = report.sent, failed = report.failed, "notification dispatch pass done");
        }
        Ok(report)
    }
}
