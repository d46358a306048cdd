//! The `ingress` module is the broker-facing half of the bridge.
//!
//! It validates topic filters, keeps the MQTT connection and its
//! subscriptions alive, and produces one `IngressEvent` per received
//! message.

pub mod event;
pub mod filter;
pub mod subscriber;

pub use event::IngressEvent;
pub use filter::TopicFilter;
pub use subscriber::{Connectivity, IngressHandle, IngressSubscriber, connect};
