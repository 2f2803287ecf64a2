//! Order Aggregate
//!
//! Orders move along three independent axes: order status, payment status and
//! fulfillment status. Web orders carry all three explicitly. Marketplace
//! orders carry a single channel status string which is projected onto the
//! three axes through a fixed lookup table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::string_enum;

string_enum!(OrderStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

string_enum!(PaymentStatus {
    Pending => "pending",
    Authorized => "authorized",
    Paid => "paid",
    Refunded => "refunded",
    Voided => "voided",
});

string_enum!(FulfillmentStatus {
    Preparing => "preparing",
    Packed => "packed",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

/// The three status axes of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusAxes {
    pub status: OrderStatus,
    pub payment: PaymentStatus,
    pub fulfillment: FulfillmentStatus,
}

impl StatusAxes {
    /// Project a marketplace package status onto the store vocabulary.
    ///
    /// Matching ignores ASCII case. Unknown strings land on `pending`/`preparing`.
    /// Marketplace orders are pre-paid by the channel, so payment is `paid`
    /// unless the package was cancelled.
    pub fn from_marketplace(status: &str) -> Self {
        let status = status.trim();
        let is = |name: &str| status.eq_ignore_ascii_case(name);
        let (order, fulfillment) = if is("Picking") {
            (OrderStatus::Processing, FulfillmentStatus::Preparing)
        } else if is("Invoiced") {
            (OrderStatus::Processing, FulfillmentStatus::Packed)
        } else if is("Shipped") {
            (OrderStatus::Shipped, FulfillmentStatus::Shipped)
        } else if is("Delivered") {
            (OrderStatus::Delivered, FulfillmentStatus::Delivered)
        } else if is("Cancelled") {
            (OrderStatus::Cancelled, FulfillmentStatus::Cancelled)
        } else {
            // Created, Awaiting and anything unrecognised
            (OrderStatus::Pending, FulfillmentStatus::Preparing)
        };
        let payment = if is("Cancelled") { PaymentStatus::Refunded } else { PaymentStatus::Paid };
        Self { status: order, payment, fulfillment }
    }

    /// Read the stored columns of a web order. Older rows may still carry the
    /// `unfulfilled`/`fulfilled` fulfillment values.
    pub fn from_native(status: &str, payment: &str, fulfillment: &str) -> Self {
        let fulfillment = match fulfillment {
            "unfulfilled" | "partial" => FulfillmentStatus::Preparing,
            "fulfilled" => FulfillmentStatus::Shipped,
            other => other.parse().unwrap_or(FulfillmentStatus::Preparing),
        };
        Self {
            status: status.parse().unwrap_or(OrderStatus::Pending),
            payment: payment.parse().unwrap_or(PaymentStatus::Pending),
            fulfillment,
        }
    }
}

/// A web storefront order row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NativeOrder {
    pub id: Uuid, pub order_number: String, pub customer_id: Option<Uuid>, pub customer_email: String,
    pub status: String, pub subtotal: i64, pub tax: i64, pub shipping: i64, pub total: i64, pub currency: String,
    pub shipping_address: serde_json::Value, pub billing_address: serde_json::Value,
    pub payment_status: String, pub fulfillment_status: String,
    pub created_at: DateTime<Utc>, pub updated_at: DateTime<Utc>,
}

/// Operator form submission for a web order. Each axis is set directly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub fulfillment_status: Option<FulfillmentStatus>,
}

impl OrderStatusUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.payment_status.is_none() && self.fulfillment_status.is_none()
    }
}

impl NativeOrder {
    pub fn axes(&self) -> StatusAxes { StatusAxes::from_native(&self.status, &self.payment_status, &self.fulfillment_status) }

    pub fn apply_status(&mut self, update: &OrderStatusUpdate) {
        if let Some(s) = update.status { self.status = s.as_str().to_string(); }
        if let Some(p) = update.payment_status { self.payment_status = p.as_str().to_string(); }
        if let Some(f) = update.fulfillment_status { self.fulfillment_status = f.as_str().to_string(); }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> NativeOrder {
        let now = Utc::now();
        NativeOrder {
            id: Uuid::new_v4(), order_number: "ORD-00000001".into(), customer_id: None, customer_email: "a@b.com".into(),
            status: "pending".into(), subtotal: 1000, tax: 0, shipping: 0, total: 1000, currency: "TRY".into(),
            shipping_address: serde_json::json!({}), billing_address: serde_json::json!({}),
            payment_status: "pending".into(), fulfillment_status: "unfulfilled".into(), created_at: now, updated_at: now,
        }
    }

    #[test]
    fn test_marketplace_status_table() {
        let cases = [
            ("Created", OrderStatus::Pending, FulfillmentStatus::Preparing),
            ("Picking", OrderStatus::Processing, FulfillmentStatus::Preparing),
            ("Invoiced", OrderStatus::Processing, FulfillmentStatus::Packed),
            ("Shipped", OrderStatus::Shipped, FulfillmentStatus::Shipped),
            ("Delivered", OrderStatus::Delivered, FulfillmentStatus::Delivered),
            ("Cancelled", OrderStatus::Cancelled, FulfillmentStatus::Cancelled),
        ];
        for (input, status, fulfillment) in cases {
            for _ in 0..3 {
                let axes = StatusAxes::from_marketplace(input);
                assert_eq!((axes.status, axes.fulfillment), (status, fulfillment), "{input}");
            }
        }
    }

    #[test]
    fn test_unknown_marketplace_status_defaults() {
        for input in ["", "UnSupplied", "whatever", "Returned"] {
            let axes = StatusAxes::from_marketplace(input);
            assert_eq!((axes.status, axes.fulfillment), (OrderStatus::Pending, FulfillmentStatus::Preparing));
            assert_eq!(axes.payment, PaymentStatus::Paid);
        }
    }

    #[test]
    fn test_marketplace_payment_inference() {
        assert_eq!(StatusAxes::from_marketplace("Cancelled").payment, PaymentStatus::Refunded);
        assert_eq!(StatusAxes::from_marketplace("cancelled").payment, PaymentStatus::Refunded);
        assert_eq!(StatusAxes::from_marketplace("Shipped").payment, PaymentStatus::Paid);
    }

    #[test]
    fn test_native_order_status_update() {
        let mut order = native();
        assert_eq!(order.axes().fulfillment, FulfillmentStatus::Preparing);
        order.apply_status(&OrderStatusUpdate { status: Some(OrderStatus::Shipped), payment_status: Some(PaymentStatus::Paid), fulfillment_status: None });
        let axes = order.axes();
        assert_eq!(axes.status, OrderStatus::Shipped);
        assert_eq!(axes.payment, PaymentStatus::Paid);
        assert_eq!(axes.fulfillment, FulfillmentStatus::Preparing);
    }
}
