//! Unified order view over web and marketplace orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::aggregates::{FulfillmentStatus, NativeOrder, OrderStatus, PaymentStatus, StatusAxes};
use crate::domain::value_objects::Money;
use crate::marketplace::mapping::MarketplaceOrderRecord;

/// Channel name of orders placed on the storefront.
pub const WEB_CHANNEL: &str = "web";
pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Customer {
    User { id: Uuid, email: String },
    Guest { email: Option<String>, name: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedOrder {
    pub id: Uuid,
    pub code: String,
    pub channel: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    /// Raw channel status, kept for operators.
    pub marketplace_status: Option<String>,
    pub total: Money,
    pub customer: Customer,
    pub shipping_address: Option<Value>,
    pub billing_address: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub enum OrderSource {
    Native(NativeOrder),
    Marketplace(MarketplaceOrderRecord),
}

impl OrderSource {
    pub fn to_unified_view(&self, marketplace_channel: &str, default_currency: &str) -> UnifiedOrder {
        match self {
            Self::Native(o) => {
                let axes = o.axes();
                let customer = match o.customer_id {
                    Some(id) => Customer::User { id, email: o.customer_email.clone() },
                    None => Customer::Guest { email: Some(o.customer_email.clone()), name: None },
                };
                let currency = if o.currency.is_empty() { default_currency } else { o.currency.as_str() };
                UnifiedOrder {
                    id: o.id, code: o.order_number.clone(), channel: WEB_CHANNEL.into(),
                    status: axes.status, payment_status: axes.payment, fulfillment_status: axes.fulfillment, marketplace_status: None,
                    total: Money::from_minor(o.total, currency), customer,
                    shipping_address: address(&o.shipping_address), billing_address: address(&o.billing_address),
                    created_at: o.created_at, updated_at: o.updated_at,
                }
            }
            Self::Marketplace(r) => {
                let o = &r.order;
                let axes = StatusAxes::from_marketplace(o.marketplace_status.as_deref().unwrap_or_default());
                let currency = o.currency.as_deref().unwrap_or(default_currency);
                UnifiedOrder {
                    id: r.id, code: o.order_number.clone().unwrap_or_else(|| o.marketplace_order_id.clone()), channel: marketplace_channel.into(),
                    status: axes.status, payment_status: axes.payment, fulfillment_status: axes.fulfillment,
                    marketplace_status: o.marketplace_status.clone(),
                    total: o.total_price.map(|t| Money::new(t, currency)).unwrap_or_else(|| Money::zero(currency)),
                    customer: Customer::Guest { email: o.buyer_email.clone(), name: o.buyer_name.clone() },
                    shipping_address: o.shipping_address.as_ref().and_then(address), billing_address: o.billing_address.as_ref().and_then(address),
                    created_at: o.order_date.unwrap_or(r.created_at), updated_at: r.updated_at,
                }
            }
        }
    }
}

fn address(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) if !map.is_empty() => Some(value.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnifiedOrderFilter {
    pub channel: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

impl UnifiedOrderFilter {
    pub fn limit(&self) -> i64 { self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) }

    pub fn wants_channel(&self, channel: &str) -> bool {
        self.channel.as_deref().map_or(true, |c| c.eq_ignore_ascii_case(channel))
    }

    pub fn matches(&self, order: &UnifiedOrder) -> bool {
        self.wants_channel(&order.channel) && self.status.map_or(true, |s| s == order.status)
    }
}

/// Filter, then sort newest first and cut to the filter's limit.
pub fn merge(mut orders: Vec<UnifiedOrder>, filter: &UnifiedOrderFilter) -> Vec<UnifiedOrder> {
    orders.retain(|o| filter.matches(o));
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    orders.truncate(filter.limit() as usize);
    orders
}
