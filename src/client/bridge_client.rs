//! Client representation
//!
//! `Client` models one accepted WebSocket peer. It holds the sending side of
//! a bounded per-client queue; the transport's writer task owns the receiving
//! side together with the socket sink. Dropping the `Client` closes the queue,
//! which makes the writer close the socket.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

pub type ClientId = String;

/// Connection state as seen by the broadcaster.
///
/// A client only exists once its handshake has completed, so there is no
/// connecting state here. `Closed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Open,
    Closed,
}

/// Result of handing one message to a client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the message was discarded for this client only.
    Dropped,
    Closed,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    sender: mpsc::Sender<WsMessage>,
    drops: AtomicU64,
}

impl Client {
    /// Create a new client with a sender channel. The `id` is a UUID used
    /// to identify the client in the client set and in logs.
    pub fn new(sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            drops: AtomicU64::new(0),
        }
    }

    /// Creates a client together with the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn state(&self) -> ClientState {
        if self.sender.is_closed() {
            ClientState::Closed
        } else {
            ClientState::Open
        }
    }

    /// Never waits: a full queue drops the message instead.
    pub fn try_deliver(&self, message: WsMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.drops.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Messages discarded for this client because its queue was full.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}
