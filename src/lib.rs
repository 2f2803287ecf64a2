//! OpenSASE Marketplace
//!
//! Marketplace channel reconciliation and order operations for OpenSASE e-commerce.
//!
//! ## Features
//! - Paginated, idempotent product and order sync from a supplier marketplace API
//! - Sync run ledger
//! - Unified order view across web and marketplace channels
//! - Returns (RMA) workflow
//! - Order documents and notification queue

pub mod api;
pub mod config;
pub mod domain;
pub mod events;
pub mod marketplace;
pub mod orders;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::{DocumentError, NotificationError, ReturnError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("Marketplace not configured: {0}")]
    NotConfigured(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Marketplace API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("A {0} sync is already running")]
    SyncInProgress(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl MarketplaceError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api { status, message: message.into() }
    }

    /// Failures talking to the marketplace. These abort a sync run.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::Http(_) | Self::Json(_))
    }
}

impl From<ReturnError> for MarketplaceError {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::InvalidTransition { from, to } => Self::InvalidTransition { from: from.to_string(), to: to.to_string() },
            ReturnError::NegativeRefund => Self::Validation(e.to_string()),
        }
    }
}

impl From<DocumentError> for MarketplaceError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidTransition { from, to } => Self::InvalidTransition { from: from.to_string(), to: to.to_string() },
        }
    }
}

impl From<NotificationError> for MarketplaceError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::NotQueued(status) => Self::InvalidTransition { from: status.to_string(), to: "sent/failed".into() },
        }
    }
}

impl From<validator::ValidationErrors> for MarketplaceError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, MarketplaceError>;
