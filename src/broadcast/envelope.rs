use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::ingress::IngressEvent;
use crate::utils::BridgeError;

/// The message every WebSocket client receives for one broker message.
///
/// Serialized as `{"topic": ..., "data": ..., "timestamp": ...}`. `data` is
/// the payload decoded as UTF-8 (invalid sequences become U+FFFD) and is
/// never parsed further. `timestamp` is epoch milliseconds taken when the
/// bridge processed the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub data: String,
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: &[u8], timestamp: i64) -> Self {
        Self {
            topic: topic.into(),
            data: String::from_utf8_lossy(payload).into_owned(),
            timestamp,
        }
    }

    /// Stamps the event with the current time.
    pub fn from_event(event: &IngressEvent) -> Self {
        Self::new(
            event.topic.as_str(),
            &event.raw_payload,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Serializes once; clones of the returned message share the same bytes.
    pub fn to_message(&self) -> Result<WsMessage, BridgeError> {
        let json = serde_json::to_string(self)?;
        Ok(WsMessage::text(json))
    }

    /// First `max_chars` characters of `data`, for log lines.
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.data.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.data[..idx],
            None => &self.data,
        }
    }
}
