//! Domain model: order status vocabularies, returns, documents and notifications
pub mod aggregates;
pub mod events;
pub mod value_objects;
