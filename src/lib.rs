//! # mqtt-ws-bridge
//!
//! `mqtt-ws-bridge` subscribes to a set of MQTT topic filters and re-publishes
//! every message it receives to all connected WebSocket clients, so that
//! browsers can watch broker traffic in near real time.
//!
//! ## Core Modules
//!
//! - `ingress`: MQTT connection, topic subscriptions and ingress events.
//! - `broadcast`: envelope construction and fan-out to the client set.
//! - `client`: Represents a connected WebSocket client.
//! - `transport`: Manages the WebSocket server and per-client writers.
//! - `config`: Handles loading and managing configuration.
//! - `bridge`: Runs ingress and transport together.
//! - `utils`: Error type and logging.

pub mod bridge;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod ingress;
pub mod transport;
pub mod utils;

pub use broadcast::{Broadcaster, Envelope};
pub use utils::BridgeError;
