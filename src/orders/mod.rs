//! Order operations across channels.

pub mod notifier;
pub mod service;
pub mod unified;

pub use notifier::{DispatchReport, LogSender, NotificationSender};
pub use service::OrderService;
pub use unified::{Customer, OrderSource, UnifiedOrder, UnifiedOrderFilter};
