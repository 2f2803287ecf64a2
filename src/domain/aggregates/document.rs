//! Order Document Aggregate
//!
//! Records for generated e-invoice, e-archive and dispatch documents. Rendering
//! happens elsewhere; this only tracks number, status and file location.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::{DocumentEvent, DomainEvent};
use crate::domain::value_objects::string_enum;

string_enum!(DocumentType {
    EInvoice => "e_invoice",
    EArchive => "e_archive",
    Dispatch => "dispatch",
});

string_enum!(DocumentStatus {
    Draft => "draft",
    Issued => "issued",
    Sent => "sent",
    Cancelled => "cancelled",
});

impl DocumentStatus {
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Issued) | (Self::Issued, Self::Sent) | (Self::Draft | Self::Issued, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderDocument {
    pub id: Uuid,
    pub order_id: Uuid,
    #[sqlx(try_from = "String")]
    pub document_type: DocumentType,
    pub document_number: String,
    #[sqlx(try_from = "String")]
    pub status: DocumentStatus,
    pub file_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Numbers come from an external numbering scheme and are not checked for uniqueness.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDocument {
    pub document_type: DocumentType,
    #[validate(length(min = 1, max = 64))]
    pub document_number: String,
    #[validate(url)]
    pub file_url: Option<String>,
    pub notes: Option<String>,
}

impl OrderDocument {
    pub fn draft(order_id: Uuid, form: NewDocument) -> Self {
        let now = Utc::now();
        let mut doc = Self {
            id: Uuid::now_v7(), order_id, document_type: form.document_type, document_number: form.document_number,
            status: DocumentStatus::Draft, file_url: form.file_url, notes: form.notes,
            created_at: now, updated_at: now, events: vec![],
        };
        doc.raise_event(DomainEvent::Document(DocumentEvent::Created {
            document_id: doc.id, order_id, document_type: doc.document_type, document_number: doc.document_number.clone(),
        }));
        doc
    }

    pub fn advance(&mut self, next: DocumentStatus) -> Result<(), DocumentError> {
        if !self.status.can_transition_to(next) {
            return Err(DocumentError::InvalidTransition { from: self.status, to: next });
        }
        let from = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        self.raise_event(DomainEvent::Document(DocumentEvent::StatusChanged { document_id: self.id, from, to: next }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone)] pub enum DocumentError { InvalidTransition { from: DocumentStatus, to: DocumentStatus } }
impl std::error::Error for DocumentError {}
impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InvalidTransition { from, to } => write!(f, "Cannot move document from {from} to {to}") }
    }
}
