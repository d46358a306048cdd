//! The `error` module defines the error type used across the bridge.
//!
//! Only startup failures (configuration, binding the listener) are meant to
//! leave `main`; everything raised while the bridge runs is logged where it
//! is detected and never aborts the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("invalid configuration value for `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("invalid topic filter `{filter}`: {reason}")]
    InvalidTopicFilter { filter: String, reason: &'static str },

    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT client request failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl BridgeError {
    /// Convenience for `InvalidSetting`.
    pub fn invalid_setting(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key,
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error raised while binding `addr`.
    pub fn bind(addr: impl ToString, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

