//! Service configuration from environment variables.

use std::time::Duration;

use crate::marketplace::client::{clamp_page_size, DEFAULT_TIMEOUT};
use crate::marketplace::{Credentials, EnvironmentCredentials};
use crate::{MarketplaceError, Result};

pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_CHANNEL: &str = "trendyol";
pub const DEFAULT_BASE_URL: &str = "https://api.trendyol.com/sapigw";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_ORDER_STATUS: &str = "Created";
pub const DEFAULT_CURRENCY: &str = "TRY";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub marketplace: MarketplaceConfig,
    /// `None` disables the background scheduler.
    pub sync_interval: Option<Duration>,
    pub default_currency: String,
    pub nats_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub channel: String,
    pub base_url: String,
    pub timeout: Duration,
    pub page_size: u32,
    pub order_statuses: Vec<String>,
    pub env_credentials: EnvironmentCredentials,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.into(), base_url: DEFAULT_BASE_URL.into(), timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE, order_statuses: vec![DEFAULT_ORDER_STATUS.into()],
            env_credentials: EnvironmentCredentials::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let database_url = get("DATABASE_URL").ok_or_else(|| MarketplaceError::Config("DATABASE_URL is required".into()))?;

        let env_credentials = EnvironmentCredentials(Credentials::new(
            get("MARKETPLACE_API_KEY").as_deref(),
            get("MARKETPLACE_API_SECRET").as_deref(),
            get("MARKETPLACE_SUPPLIER_ID").as_deref(),
        ));
        let order_statuses = get("SYNC_ORDER_STATUSES").map(|v| split_list(&v)).filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_ORDER_STATUS.into()]);

        let marketplace = MarketplaceConfig {
            channel: get("MARKETPLACE_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.into()),
            base_url: get("MARKETPLACE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            timeout: match parse::<u64>("MARKETPLACE_TIMEOUT_SECS", get("MARKETPLACE_TIMEOUT_SECS"))? {
                Some(0) => return Err(MarketplaceError::Config("MARKETPLACE_TIMEOUT_SECS must be positive".into())),
                Some(secs) => Duration::from_secs(secs),
                None => DEFAULT_TIMEOUT,
            },
            page_size: clamp_page_size(parse("MARKETPLACE_PAGE_SIZE", get("MARKETPLACE_PAGE_SIZE"))?.unwrap_or(DEFAULT_PAGE_SIZE)),
            order_statuses,
            env_credentials,
        };

        Ok(Self {
            database_url,
            port: parse("PORT", get("PORT"))?.unwrap_or(DEFAULT_PORT),
            marketplace,
            sync_interval: parse::<u64>("SYNC_INTERVAL_SECS", get("SYNC_INTERVAL_SECS"))?.filter(|s| *s > 0).map(Duration::from_secs),
            default_currency: get("DEFAULT_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.into()),
            nats_url: get("NATS_URL"),
        })
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| v.parse::<T>().map_err(|_| MarketplaceError::Config(format!("{key} has an invalid value: {v}"))))
        .transpose()
}

pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}
