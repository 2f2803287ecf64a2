//! Return Request Aggregate (RMA)
//!
//! `pending -> approved -> in_transit -> inspection -> refunded`, with
//! `rejected` reachable from any open state. `refunded` and `rejected` are
//! terminal. Forward skips are allowed, reverting is not.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::{DomainEvent, ReturnEvent};
use crate::domain::value_objects::string_enum;

string_enum!(ReturnStatus {
    Pending => "pending",
    Approved => "approved",
    InTransit => "in_transit",
    Inspection => "inspection",
    Refunded => "refunded",
    Rejected => "rejected",
});

impl ReturnStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Refunded | Self::Rejected) }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Approved => Some(1),
            Self::InTransit => Some(2),
            Self::Inspection => Some(3),
            Self::Refunded => Some(4),
            Self::Rejected => None,
        }
    }

    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        if self.is_terminal() { return false; }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: ReturnStatus,
    pub reason_code: String,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub refund_amount: Option<Decimal>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Customer-facing return form.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewReturnRequest {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub reason_code: String,
    #[validate(length(max = 2000))]
    pub customer_note: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub order_number: Option<String>,
}

/// Operator update. Refund amount and notes are saved even when the status
/// does not change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReturnUpdate {
    pub status: Option<ReturnStatus>,
    pub refund_amount: Option<Decimal>,
    pub notes: Option<String>,
}

impl ReturnRequest {
    pub fn open(form: NewReturnRequest) -> Self {
        let now = Utc::now();
        let metadata = serde_json::json!({
            "customer_note": form.customer_note,
            "email": form.email,
            "order_number": form.order_number,
        });
        let mut request = Self {
            id: Uuid::now_v7(), order_id: form.order_id, user_id: form.user_id, status: ReturnStatus::Pending,
            reason_code: form.reason_code, notes: None, metadata, refund_amount: None,
            requested_at: now, processed_at: None, updated_at: now, events: vec![],
        };
        request.raise_event(DomainEvent::Return(ReturnEvent::Requested { return_id: request.id, order_id: request.order_id }));
        request
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.metadata.get("email").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    pub fn order_number(&self) -> Option<&str> {
        self.metadata.get("order_number").and_then(|v| v.as_str())
    }

    /// Apply an operator update. Nothing is modified when the update is rejected.
    pub fn apply(&mut self, update: ReturnUpdate) -> Result<(), ReturnError> {
        if matches!(update.refund_amount, Some(a) if a.is_sign_negative()) { return Err(ReturnError::NegativeRefund); }
        let next = update.status.filter(|s| *s != self.status);
        if let Some(next) = next {
            if !self.status.can_transition_to(next) {
                return Err(ReturnError::InvalidTransition { from: self.status, to: next });
            }
        }

        if let Some(amount) = update.refund_amount { self.refund_amount = Some(amount); }
        if let Some(notes) = update.notes { self.notes = Some(notes); }
        let now = Utc::now();
        if let Some(next) = next {
            let from = self.status;
            self.status = next;
            if next.is_terminal() { self.processed_at = Some(now); }
            self.raise_event(DomainEvent::Return(ReturnEvent::StatusChanged {
                return_id: self.id, order_id: self.order_id, from, to: next, refund_amount: self.refund_amount,
            }));
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone)] pub enum ReturnError { InvalidTransition { from: ReturnStatus, to: ReturnStatus }, NegativeRefund }
impl std::error::Error for ReturnError {}
impl std::fmt::Display for ReturnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => write!(f, "Cannot move return from {from} to {to}"),
            Self::NegativeRefund => write!(f, "Refund amount cannot be negative"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> ReturnRequest {
        ReturnRequest::open(NewReturnRequest {
            order_id: Uuid::new_v4(), user_id: None, reason_code: "damaged".into(),
            customer_note: Some("box was crushed".into()), email: Some("buyer@example.com".into()), order_number: Some("ORD-1".into()),
        })
    }

    fn to(status: ReturnStatus) -> ReturnUpdate { ReturnUpdate { status: Some(status), ..Default::default() } }

    #[test]
    fn test_return_happy_path() {
        let mut r = request();
        assert_eq!(r.take_events().len(), 1);
        for s in [ReturnStatus::Approved, ReturnStatus::InTransit, ReturnStatus::Inspection] {
            r.apply(to(s)).unwrap();
            assert!(r.processed_at.is_none());
        }
        r.apply(ReturnUpdate { status: Some(ReturnStatus::Refunded), refund_amount: Some(dec!(249.90)), notes: None }).unwrap();
        assert_eq!(r.status, ReturnStatus::Refunded);
        assert!(r.processed_at.is_some());
        assert_eq!(r.take_events().len(), 4);
        assert_eq!(r.customer_email(), Some("buyer@example.com"));
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        for terminal in [ReturnStatus::Refunded, ReturnStatus::Rejected] {
            let mut r = request();
            r.apply(to(terminal)).unwrap();
            for next in ReturnStatus::ALL.iter().copied().filter(|s| *s != terminal) {
                let err = r.apply(ReturnUpdate { status: Some(next), refund_amount: Some(dec!(1)), notes: Some("x".into()) }).unwrap_err();
                assert!(matches!(err, ReturnError::InvalidTransition { .. }));
                assert_eq!(r.status, terminal);
                assert_eq!(r.refund_amount, None);
                assert_eq!(r.notes, None);
            }
        }
    }

    #[test]
    fn test_no_reverting() {
        let mut r = request();
        r.apply(to(ReturnStatus::Inspection)).unwrap();
        assert!(r.apply(to(ReturnStatus::Approved)).is_err());
        assert!(r.apply(to(ReturnStatus::Pending)).is_err());
        r.apply(to(ReturnStatus::Rejected)).unwrap();
    }

    #[test]
    fn test_fields_saved_without_status_change() {
        let mut r = request();
        r.take_events();
        r.apply(ReturnUpdate { status: Some(ReturnStatus::Pending), refund_amount: Some(dec!(50)), notes: Some("waiting on courier".into()) }).unwrap();
        assert_eq!(r.status, ReturnStatus::Pending);
        assert_eq!(r.refund_amount, Some(dec!(50)));
        assert_eq!(r.notes.as_deref(), Some("waiting on courier"));
        assert!(r.take_events().is_empty());
    }

    #[test]
    fn test_negative_refund_rejected() {
        let mut r = request();
        let err = r.apply(ReturnUpdate { status: Some(ReturnStatus::Approved), refund_amount: Some(dec!(-5)), notes: None }).unwrap_err();
        assert!(matches!(err, ReturnError::NegativeRefund));
        assert_eq!(r.status, ReturnStatus::Pending);
    }
}
