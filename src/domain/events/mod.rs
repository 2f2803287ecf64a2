//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{DocumentStatus, DocumentType, NotificationStatus, ReturnStatus};
use crate::marketplace::ledger::SyncRunStatus;
use crate::marketplace::SyncType;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Return(ReturnEvent),
    Document(DocumentEvent),
    Notification(NotificationEvent),
    Sync(SyncEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnEvent {
    Requested { return_id: Uuid, order_id: Uuid },
    StatusChanged { return_id: Uuid, order_id: Uuid, from: ReturnStatus, to: ReturnStatus, refund_amount: Option<Decimal> },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    Created { document_id: Uuid, order_id: Uuid, document_type: DocumentType, document_number: String },
    StatusChanged { document_id: Uuid, from: DocumentStatus, to: DocumentStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    Queued { notification_id: Uuid, order_id: Option<Uuid>, notification_type: String },
    Delivered { notification_id: Uuid, status: NotificationStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Finished { run_id: Uuid, channel: String, sync_type: SyncType, status: SyncRunStatus, processed: i32, errors: i32 },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> String {
        let name = match self {
            Self::Return(ReturnEvent::Requested { .. }) => "returns.requested",
            Self::Return(ReturnEvent::StatusChanged { .. }) => "returns.status_changed",
            Self::Document(DocumentEvent::Created { .. }) => "documents.created",
            Self::Document(DocumentEvent::StatusChanged { .. }) => "documents.status_changed",
            Self::Notification(NotificationEvent::Queued { .. }) => "notifications.queued",
            Self::Notification(NotificationEvent::Delivered { .. }) => "notifications.delivered",
            Self::Sync(SyncEvent::Finished { .. }) => "sync.finished",
        };
        format!("opensase.marketplace.{name}")
    }
}
