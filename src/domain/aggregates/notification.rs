//! Order Notification Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::{DomainEvent, NotificationEvent};
use crate::domain::value_objects::string_enum;

string_enum!(NotificationStatus {
    Queued => "queued",
    Sent => "sent",
    Failed => "failed",
});

/// Queued outbound message. Rows are kept after delivery as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderNotification {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub notification_type: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    #[sqlx(try_from = "String")]
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewNotification {
    pub order_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub notification_type: String,
    #[validate(email)]
    pub recipient_email: String,
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    pub body: String,
}

impl OrderNotification {
    pub fn queue(form: NewNotification) -> Self {
        let mut n = Self {
            id: Uuid::now_v7(), order_id: form.order_id, notification_type: form.notification_type,
            recipient_email: form.recipient_email, subject: form.subject, body: form.body,
            status: NotificationStatus::Queued, error_message: None, created_at: Utc::now(), sent_at: None, events: vec![],
        };
        n.raise_event(DomainEvent::Notification(NotificationEvent::Queued {
            notification_id: n.id, order_id: n.order_id, notification_type: n.notification_type.clone(),
        }));
        n
    }

    pub fn mark_sent(&mut self) -> Result<(), NotificationError> {
        self.ensure_queued()?;
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(Utc::now());
        self.raise_event(DomainEvent::Notification(NotificationEvent::Delivered { notification_id: self.id, status: self.status }));
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), NotificationError> {
        self.ensure_queued()?;
        self.status = NotificationStatus::Failed;
        self.error_message = Some(reason.into());
        self.raise_event(DomainEvent::Notification(NotificationEvent::Delivered { notification_id: self.id, status: self.status }));
        Ok(())
    }

    fn ensure_queued(&self) -> Result<(), NotificationError> {
        if self.status != NotificationStatus::Queued { return Err(NotificationError::NotQueued(self.status)); }
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone)] pub enum NotificationError { NotQueued(NotificationStatus) }
impl std::error::Error for NotificationError {}
impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::NotQueued(s) => write!(f, "Notification already {s}") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> NewNotification {
        NewNotification { order_id: None, notification_type: "shipping_update".into(), recipient_email: "buyer@example.com".into(), subject: "Your order shipped".into(), body: "Tracking: 123".into() }
    }

    #[test]
    fn test_notification_delivery() {
        let mut n = OrderNotification::queue(form());
        assert_eq!(n.status, NotificationStatus::Queued);
        n.mark_sent().unwrap();
        assert!(n.sent_at.is_some());
        assert!(n.mark_failed("late bounce").is_err());
        assert_eq!(n.take_events().len(), 2);
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mut f = form();
        f.recipient_email = "not-an-email".into();
        assert!(f.validate().is_err());
        assert!(form().validate().is_ok());
    }
}
