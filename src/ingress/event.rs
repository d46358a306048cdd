use std::time::Instant;

use bytes::Bytes;

/// One message received from the broker, before it becomes an envelope.
///
/// The payload is kept as raw bytes; the bridge never interprets it.
#[derive(Debug, Clone)]
pub struct IngressEvent {
    pub topic: String,
    pub raw_payload: Bytes,
    pub received_at: Instant,
}

impl IngressEvent {
    pub fn new(topic: impl Into<String>, raw_payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            raw_payload: raw_payload.into(),
            received_at: Instant::now(),
        }
    }
}
