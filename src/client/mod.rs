//! The `client` module defines the representation of a connected WebSocket
//! peer.
//!
//! It provides the `Client` struct, which encapsulates the identity of a
//! single connection and the bounded channel used to push envelopes to it.

pub mod bridge_client;
pub use bridge_client::{Client, ClientId, ClientState, Delivery};
