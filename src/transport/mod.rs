//! The `transport` module is responsible for network communication with
//! clients via WebSockets.
//!
//! It implements the WebSocket server itself: accepting connections,
//! registering each one with the broadcaster and pumping envelopes out.

pub mod websocket;

pub use websocket::{bind, serve};

#[cfg(test)]
mod tests;
