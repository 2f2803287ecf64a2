//! Marketplace integration rows and credential resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One row per marketplace channel, created during channel onboarding.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketplaceIntegration {
    pub id: Uuid,
    pub channel: String,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub supplier_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub metadata: serde_json::Value,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub supplier_id: String,
}

impl Credentials {
    /// Complete credentials or nothing. Blank values count as missing.
    pub fn new(api_key: Option<&str>, api_secret: Option<&str>, supplier_id: Option<&str>) -> Option<Self> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Some(Self { api_key: present(api_key)?, api_secret: present(api_secret)?, supplier_id: present(supplier_id)? })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("supplier_id", &self.supplier_id)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOrigin { Integration, Environment }

impl fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Integration => write!(f, "integration"), Self::Environment => write!(f, "environment") }
    }
}

pub trait CredentialSource: Send + Sync {
    fn origin(&self) -> CredentialOrigin;
    fn credentials(&self) -> Option<Credentials>;
}

impl CredentialSource for MarketplaceIntegration {
    fn origin(&self) -> CredentialOrigin { CredentialOrigin::Integration }
    fn credentials(&self) -> Option<Credentials> {
        Credentials::new(self.api_key.as_deref(), self.api_secret.as_deref(), self.supplier_id.as_deref())
    }
}

/// Credentials read from `MARKETPLACE_*` variables at startup.
#[derive(Clone, Debug, Default)]
pub struct EnvironmentCredentials(pub Option<Credentials>);

impl CredentialSource for EnvironmentCredentials {
    fn origin(&self) -> CredentialOrigin { CredentialOrigin::Environment }
    fn credentials(&self) -> Option<Credentials> { self.0.clone() }
}

/// First source with a complete credential set wins.
pub fn resolve_credentials(sources: &[&dyn CredentialSource]) -> Option<(Credentials, CredentialOrigin)> {
    sources.iter().find_map(|s| s.credentials().map(|c| (c, s.origin())))
}
