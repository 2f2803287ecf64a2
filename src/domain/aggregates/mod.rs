//! Aggregates module
pub mod order;
pub mod return_request;
pub mod document;
pub mod notification;

pub use order::{FulfillmentStatus, NativeOrder, OrderStatus, OrderStatusUpdate, PaymentStatus, StatusAxes};
pub use return_request::{NewReturnRequest, ReturnError, ReturnRequest, ReturnStatus, ReturnUpdate};
pub use document::{DocumentError, DocumentStatus, DocumentType, NewDocument, OrderDocument};
pub use notification::{NewNotification, NotificationError, NotificationStatus, OrderNotification};
