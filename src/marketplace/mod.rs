//! Marketplace channel synchronisation
//!
//! The [`reconcile::ReconciliationEngine`] pulls catalog and order pages from
//! the supplier API ([`client`]), maps them into store rows ([`mapping`]),
//! upserts them and records every invocation in the sync run [`ledger`].

pub mod client;
pub mod integration;
pub mod ledger;
pub mod mapping;
pub mod reconcile;
pub mod scheduler;

pub use client::{HttpMarketplaceClient, MarketplaceApi, MarketplacePage, MAX_PAGE_SIZE};
pub use integration::{resolve_credentials, CredentialOrigin, CredentialSource, Credentials, EnvironmentCredentials, MarketplaceIntegration};
pub use ledger::{SyncLedger, SyncRun, SyncRunStatus};
pub use reconcile::{ReconciliationEngine, SyncOutcome, SyncRequest};
pub use scheduler::SyncScheduler;

use crate::domain::value_objects::string_enum;

string_enum!(SyncType {
    Products => "products",
    Orders => "orders",
});
