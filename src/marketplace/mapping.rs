//! Marketplace payload → store row mapping.
//!
//! Every function here is total over arbitrary JSON: missing or mistyped
//! fields become `None`, never an error, so one odd record cannot abort a page.
//! The only record that cannot be mapped is one without an external id, since
//! it has no upsert key; those come back as `None` and are counted by the caller.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::value_objects::Sku;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketplaceProductRow {
    pub marketplace_product_id: String,
    pub product_id: Option<Uuid>,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub title: Option<String>,
    pub currency: Option<String>,
    pub price: Option<Decimal>,
    pub discounted_price: Option<Decimal>,
    pub stock_quantity: Option<i32>,
    pub marketplace_status: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketplaceOrderRow {
    pub marketplace_order_id: String,
    pub order_number: Option<String>,
    pub marketplace_status: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    pub shipment_package_id: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    pub total_price: Option<Decimal>,
    pub currency: Option<String>,
    pub shipping_address: Option<Value>,
    pub billing_address: Option<Value>,
    pub last_synced_at: DateTime<Utc>,
    pub metadata: Value,
}

/// A stored marketplace order: the mapped row plus its store identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketplaceOrderRecord {
    pub id: Uuid,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: MarketplaceOrderRow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketplaceOrderItemRow {
    pub line_id: Option<String>,
    pub marketplace_product_id: Option<String>,
    pub product_id: Option<Uuid>,
    pub sku: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub line_status: Option<String>,
    pub metadata: Value,
}

// =============================================================================
// Products
// =============================================================================

/// Price precedence is `salePrice`, then `listPrice`, then `price`.
/// `discounted_price` is the sale price when it undercuts the reference
/// (`listPrice`, else `price`).
pub fn map_product(raw: &Value, internal_ids: &HashMap<String, Uuid>, synced_at: DateTime<Utc>) -> Option<MarketplaceProductRow> {
    let marketplace_product_id = first_text(raw, &["id", "productContentId"])?;
    let sku = first_sku(raw, &["stockCode", "sku"]);
    let sale = decimal(raw, "salePrice");
    let reference = first_decimal(raw, &["listPrice", "price"]);
    let discounted_price = match (sale, reference) {
        (Some(s), Some(r)) if s < r => Some(s),
        _ => None,
    };
    let stock_quantity = integer(raw, "quantity")
        .or_else(|| raw.get("quantityInfo").and_then(|q| integer(q, "quantity")))
        .and_then(|q| i32::try_from(q).ok());

    Some(MarketplaceProductRow {
        marketplace_product_id,
        product_id: sku.as_ref().and_then(|s| internal_ids.get(s).copied()),
        sku,
        barcode: text(raw, "barcode"),
        title: text(raw, "title"),
        currency: text(raw, "currencyType"),
        price: sale.or(reference),
        discounted_price,
        stock_quantity,
        marketplace_status: Some(product_status(raw)),
        last_synced_at: synced_at,
        metadata: raw.clone(),
    })
}

fn product_status(raw: &Value) -> String {
    if let Some(status) = text(raw, "status") { return status; }
    let flag = |key: &str| boolean(raw, key).unwrap_or(false);
    let status = if flag("archived") {
        "archived"
    } else if flag("locked") {
        "locked"
    } else if flag("onSale") {
        "on_sale"
    } else if flag("approved") {
        "approved"
    } else {
        "pending"
    };
    status.to_string()
}

/// Distinct SKUs of a product page, for the single batched catalog lookup.
pub fn product_skus(items: &[Value]) -> Vec<String> {
    distinct(items.iter().filter_map(|raw| first_sku(raw, &["stockCode", "sku"])))
}

// =============================================================================
// Orders
// =============================================================================

pub fn map_order(raw: &Value, synced_at: DateTime<Utc>) -> Option<MarketplaceOrderRow> {
    let marketplace_order_id = first_text(raw, &["id", "orderNumber"])?;
    let buyer_name = [text(raw, "customerFirstName"), text(raw, "customerLastName")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Some(MarketplaceOrderRow {
        order_number: text(raw, "orderNumber"),
        marketplace_status: first_text(raw, &["status", "shipmentPackageStatus"]),
        order_date: timestamp(raw, "orderDate"),
        shipment_package_id: first_text(raw, &["shipmentPackageId", "id"]),
        buyer_name: Some(buyer_name).filter(|n| !n.is_empty()),
        buyer_email: text(raw, "customerEmail"),
        total_price: first_decimal(raw, &["totalPrice", "grossAmount"]),
        currency: text(raw, "currencyCode"),
        shipping_address: object(raw, "shipmentAddress"),
        billing_address: object(raw, "invoiceAddress"),
        last_synced_at: synced_at,
        metadata: raw.clone(),
        marketplace_order_id,
    })
}

pub fn map_order_lines(raw: &Value, internal_ids: &HashMap<String, Uuid>) -> Vec<MarketplaceOrderItemRow> {
    order_lines(raw)
        .map(|line| {
            let sku = first_sku(line, &["merchantSku", "sku"]);
            MarketplaceOrderItemRow {
                line_id: first_text(line, &["id", "lineId"]),
                marketplace_product_id: first_text(line, &["productId", "productCode"]),
                product_id: sku.as_ref().and_then(|s| internal_ids.get(s).copied()),
                sku,
                quantity: Some(integer(line, "quantity").and_then(|q| i32::try_from(q).ok()).unwrap_or(1)),
                unit_price: first_decimal(line, &["price", "amount"]),
                vat_rate: first_decimal(line, &["vatRate", "vatBaseAmount"]),
                discount: decimal(line, "discount"),
                line_status: first_text(line, &["orderLineItemStatusName", "status"]),
                metadata: line.clone(),
            }
        })
        .collect()
}

/// Distinct line SKUs across an order page.
pub fn order_line_skus(orders: &[Value]) -> Vec<String> {
    distinct(orders.iter().flat_map(order_lines).filter_map(|line| first_sku(line, &["merchantSku", "sku"])))
}

fn order_lines(raw: &Value) -> impl Iterator<Item = &Value> {
    raw.get("lines").and_then(Value::as_array).into_iter().flatten().filter(|l| l.is_object())
}

// =============================================================================
// JSON accessors
// =============================================================================

fn field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn text(raw: &Value, key: &str) -> Option<String> {
    match field(raw, key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| text(raw, k))
}

fn first_sku(raw: &Value, keys: &[&str]) -> Option<String> {
    first_text(raw, keys).and_then(|s| Sku::new(s).ok()).map(Sku::into_inner)
}

fn decimal(raw: &Value, key: &str) -> Option<Decimal> {
    let repr = match field(raw, key)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    repr.parse::<Decimal>().ok().or_else(|| Decimal::from_scientific(&repr).ok())
}

fn first_decimal(raw: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| decimal(raw, k))
}

fn integer(raw: &Value, key: &str) -> Option<i64> {
    match field(raw, key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(raw: &Value, key: &str) -> Option<bool> {
    field(raw, key)?.as_bool()
}

fn object(raw: &Value, key: &str) -> Option<Value> {
    field(raw, key).filter(|v| v.is_object()).cloned()
}

/// Epoch milliseconds (number or numeric string) or an RFC 3339 string.
fn timestamp(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
    let from_millis = |ms: i64| Utc.timestamp_millis_opt(ms).single();
    match field(raw, key)? {
        Value::Number(n) => n.as_i64().and_then(from_millis),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .and_then(from_millis)
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)))
        }
        _ => None,
    }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn no_ids() -> HashMap<String, Uuid> { HashMap::new() }

    #[test]
    fn test_price_fallback_chain() {
        let now = Utc::now();
        let list_only = map_product(&json!({"id": "p1", "listPrice": 120}), &no_ids(), now).unwrap();
        assert_eq!(list_only.price, Some(dec!(120)));
        assert_eq!(list_only.discounted_price, None);

        let sale_and_list = map_product(&json!({"id": "p2", "salePrice": 99.9, "listPrice": 120}), &no_ids(), now).unwrap();
        assert_eq!(sale_and_list.price, Some(dec!(99.9)));
        assert_eq!(sale_and_list.discounted_price, Some(dec!(99.9)));

        let price_only = map_product(&json!({"id": "p3", "price": "45.50"}), &no_ids(), now).unwrap();
        assert_eq!(price_only.price, Some(dec!(45.50)));

        let sale_and_price = map_product(&json!({"id": "p4", "salePrice": 100, "price": 150}), &no_ids(), now).unwrap();
        assert_eq!(sale_and_price.price, Some(dec!(100)));
    }

    #[test]
    fn test_stock_fallback() {
        let now = Utc::now();
        let direct = map_product(&json!({"id": 1, "quantity": 7, "quantityInfo": {"quantity": 3}}), &no_ids(), now).unwrap();
        assert_eq!(direct.stock_quantity, Some(7));
        let nested = map_product(&json!({"id": 1, "quantityInfo": {"quantity": 3}}), &no_ids(), now).unwrap();
        assert_eq!(nested.stock_quantity, Some(3));
        let none = map_product(&json!({"id": 1}), &no_ids(), now).unwrap();
        assert_eq!(none.stock_quantity, None);
    }

    #[test]
    fn test_product_resolves_internal_id_by_sku() {
        let internal = Uuid::new_v4();
        let ids = HashMap::from([("SKU-1".to_string(), internal)]);
        let linked = map_product(&json!({"id": "a", "stockCode": " SKU-1 "}), &ids, Utc::now()).unwrap();
        assert_eq!(linked.product_id, Some(internal));
        let unlinked = map_product(&json!({"id": "b", "stockCode": "SKU-2"}), &ids, Utc::now()).unwrap();
        assert_eq!(unlinked.product_id, None);
    }

    #[test]
    fn test_malformed_product_degrades() {
        let raw = json!({"id": 42, "title": ["not", "a", "string"], "salePrice": {"x": 1}, "quantity": "many", "archived": true});
        let row = map_product(&raw, &no_ids(), Utc::now()).unwrap();
        assert_eq!(row.marketplace_product_id, "42");
        assert_eq!(row.title, None);
        assert_eq!(row.price, None);
        assert_eq!(row.stock_quantity, None);
        assert_eq!(row.marketplace_status.as_deref(), Some("archived"));
        assert_eq!(row.metadata, raw);

        assert!(map_product(&json!({"title": "no id"}), &no_ids(), Utc::now()).is_none());
        assert!(map_product(&json!("garbage"), &no_ids(), Utc::now()).is_none());
    }

    #[test]
    fn test_map_order() {
        let raw = json!({
            "id": 3344556677u64, "orderNumber": "10912345", "status": "Invoiced", "orderDate": 1_700_000_000_000i64,
            "customerFirstName": "Ayşe", "customerLastName": "Yılmaz", "customerEmail": "pf+abc@trendyolmail.com",
            "totalPrice": 349.9, "currencyCode": "TRY", "shipmentAddress": {"city": "İstanbul"}, "invoiceAddress": "n/a"
        });
        let row = map_order(&raw, Utc::now()).unwrap();
        assert_eq!(row.marketplace_order_id, "3344556677");
        assert_eq!(row.shipment_package_id.as_deref(), Some("3344556677"));
        assert_eq!(row.order_number.as_deref(), Some("10912345"));
        assert_eq!(row.buyer_name.as_deref(), Some("Ayşe Yılmaz"));
        assert_eq!(row.order_date, Utc.timestamp_millis_opt(1_700_000_000_000).single());
        assert_eq!(row.total_price, Some(dec!(349.9)));
        assert!(row.shipping_address.is_some());
        assert_eq!(row.billing_address, None);
    }

    #[test]
    fn test_order_date_formats() {
        let rfc = map_order(&json!({"id": 1, "orderDate": "2024-03-01T10:00:00+03:00"}), Utc::now()).unwrap();
        assert_eq!(rfc.order_date.unwrap().to_rfc3339(), "2024-03-01T07:00:00+00:00");
        let bad = map_order(&json!({"id": 1, "orderDate": "yesterday"}), Utc::now()).unwrap();
        assert_eq!(bad.order_date, None);
    }

    #[test]
    fn test_map_order_lines() {
        let internal = Uuid::new_v4();
        let ids = HashMap::from([("MS-1".to_string(), internal)]);
        let raw = json!({"id": 1, "lines": [
            {"id": 11, "productId": 501, "merchantSku": "MS-1", "quantity": 2, "price": 100, "vatBaseAmount": 20, "discount": 0, "orderLineItemStatusName": "Created"},
            "junk",
            {"id": 12, "sku": "OTHER", "amount": "12.5"}
        ]});
        let lines = map_order_lines(&raw, &ids);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].product_id, Some(internal));
        assert_eq!(lines[0].quantity, Some(2));
        assert_eq!(lines[0].vat_rate, Some(dec!(20)));
        assert_eq!(lines[0].line_status.as_deref(), Some("Created"));
        assert_eq!(lines[1].product_id, None);
        assert_eq!(lines[1].unit_price, Some(dec!(12.5)));
        assert_eq!(lines[1].quantity, Some(1));

        assert!(map_order_lines(&json!({"id": 2, "lines": null}), &ids).is_empty());
        assert_eq!(order_line_skus(&[raw.clone(), raw]), vec!["MS-1".to_string(), "OTHER".to_string()]);
    }
}
