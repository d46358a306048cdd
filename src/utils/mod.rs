//! The `utils` module provides definitions shared across the bridge:
//! the crate error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::BridgeError;
