//! Notification delivery.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::aggregates::OrderNotification;
use crate::Result;

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &OrderNotification) -> Result<()>;
}

/// Writes each notification to the log. Stands in until a mail provider is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, n: &OrderNotification) -> Result<()> {
        tracing::info!(notification_id = %n.id, to = %n.recipient_email, kind = %n.notification_type, "notification: {}", n.subject);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}
