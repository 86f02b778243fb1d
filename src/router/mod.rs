//! Subscription routing
//!
//! Reference-counted streaming subscriptions over a transport and typed
//! fan-out of inbound events to registered observers.

mod client;
mod table;
mod types;

pub use client::SubscriptionRouter;
pub use table::{Release, SubscriptionTable};
pub use types::{
    canonicalize, EventClass, Observer, RoutedEvent, SubscriptionKey, SubscriptionKind,
    SubscriptionRecord,
};
