//! The `broadcast` module is the client-facing half of the bridge.
//!
//! Turns ingress events into `Envelope`s and pushes them to every connected
//! client through the `Broadcaster`, which also owns the client set.

pub mod engine;
pub mod envelope;
pub mod stats;

pub use engine::{BroadcastReport, Broadcaster};
pub use envelope::Envelope;
pub use stats::StatsSnapshot;
