//! Supplier marketplace API client.
//!
//! `GET {base}/suppliers/{supplierId}/products` and `.../orders`, Basic auth,
//! `page`/`size` pagination. Any non-2xx answer is returned as
//! [`MarketplaceError::Api`]; the reconciliation engine treats it as fatal.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::marketplace::Credentials;
use crate::{MarketplaceError, Result};

/// Largest page the marketplace accepts.
pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LOG_BODY_CHARS: usize = 512;

/// One page of raw marketplace records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketplacePage {
    pub content: Vec<Value>,
    pub total_pages: Option<u32>,
}

impl MarketplacePage {
    /// Accepts `{content, page: {totalPages}}` as well as the flat
    /// `{content, totalPages}` shape. A missing `content` array is an empty page.
    pub fn from_json(body: Value) -> Self {
        let total_pages = body
            .get("page")
            .and_then(|p| p.get("totalPages"))
            .or_else(|| body.get("totalPages"))
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32);
        let content = match body {
            Value::Object(mut map) => match map.remove("content") {
                Some(Value::Array(items)) => items,
                _ => vec![],
            },
            _ => vec![],
        };
        Self { content, total_pages }
    }

    /// Explicit pagination metadata wins; otherwise a short page is the last one.
    pub fn has_more(&self, page: u32, size: u32) -> bool {
        match self.total_pages {
            Some(total) => page.saturating_add(1) < total,
            None => self.content.len() as u64 >= size as u64,
        }
    }
}

pub fn clamp_page_size(size: u32) -> u32 { size.clamp(1, MAX_PAGE_SIZE) }

pub fn basic_auth_header(creds: &Credentials) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", creds.api_key, creds.api_secret)))
}

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn fetch_products(&self, creds: &Credentials, page: u32, size: u32) -> Result<MarketplacePage>;
    async fn fetch_orders(&self, creds: &Credentials, status: &str, page: u32, size: u32) -> Result<MarketplacePage>;
}

#[derive(Debug, Clone)]
pub struct HttpMarketplaceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketplaceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn get_page(&self, creds: &Credentials, resource: &str, query: &[(&str, String)]) -> Result<MarketplacePage> {
        let url = format!("{}/suppliers/{}/{}", self.base_url, creds.supplier_id, resource);
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, basic_auth_header(creds))
            .header(USER_AGENT, format!("{} - SelfIntegration", creds.supplier_id))
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
            if body.chars().count() > MAX_LOG_BODY_CHARS { preview.push_str("..."); }
            debug!(%url, %status, "marketplace request failed: {}", preview);
            return Err(MarketplaceError::api(status.as_u16(), format!("GET {resource} failed: {preview}")));
        }

        let page = MarketplacePage::from_json(serde_json::from_str(&body)?);
        debug!(%url, items = page.content.len(), total_pages = ?page.total_pages, "marketplace page fetched");
        Ok(page)
    }
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceClient {
    async fn fetch_products(&self, creds: &Credentials, page: u32, size: u32) -> Result<MarketplacePage> {
        let query = [("page", page.to_string()), ("size", clamp_page_size(size).to_string())];
        self.get_page(creds, "products", &query).await
    }

    async fn fetch_orders(&self, creds: &Credentials, status: &str, page: u32, size: u32) -> Result<MarketplacePage> {
        let query = [("page", page.to_string()), ("size", clamp_page_size(size).to_string()), ("status", status.to_string())];
        self.get_page(creds, "orders", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_auth_header() {
        let creds = Credentials::new(Some("key"), Some("secret"), Some("1")).unwrap();
        assert_eq!(basic_auth_header(&creds), "Basic a2V5OnNlY3JldA==");
    }

    #[test]
    fn test_page_shapes() {
        let nested = MarketplacePage::from_json(json!({"content": [{"id": 1}], "page": {"totalPages": 3}}));
        assert_eq!(nested.total_pages, Some(3));
        assert_eq!(nested.content.len(), 1);

        let flat = MarketplacePage::from_json(json!({"content": [], "totalPages": 7, "page": 0}));
        assert_eq!(flat.total_pages, Some(7));

        let broken = MarketplacePage::from_json(json!({"content": "nope"}));
        assert!(broken.content.is_empty());
        assert_eq!(broken.total_pages, None);
    }

    #[test]
    fn test_has_more() {
        let with_meta = MarketplacePage { content: vec![json!({})], total_pages: Some(2) };
        assert!(with_meta.has_more(0, 50));
        assert!(!with_meta.has_more(1, 50));

        let full = MarketplacePage { content: vec![json!({}); 2], total_pages: None };
        assert!(full.has_more(0, 2));
        assert!(!full.has_more(0, 3));
    }

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(50), 50);
        assert_eq!(clamp_page_size(1000), MAX_PAGE_SIZE);
    }
}
