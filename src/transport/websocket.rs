//! WebSocket transport
//!
//! This file implements the client-facing WebSocket server. Responsibilities:
//! - Accept TCP/WebSocket connections, one task per connection
//! - Create a `Client` for each connection and register it with the `Broadcaster`
//! - Run a writer task that drains the client's queue into the socket
//! - Read (and ignore) whatever the client sends until it closes or errors,
//!   then remove the client
//!
//! Clients never talk back to the bridge: inbound data frames are discarded.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, trace, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broadcast::Broadcaster;
use crate::client::{Client, ClientId};
use crate::utils::BridgeError;

/// Upper bound on a single socket write. A peer that stalls longer is
/// treated as gone.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Binds the listening socket. Failing here is fatal for the bridge.
pub async fn bind(addr: &str) -> Result<TcpListener, BridgeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::bind(addr, e))
}

/// Accept loop. Accept errors are logged and the loop keeps going.
pub async fn serve(listener: TcpListener, broadcaster: Arc<Broadcaster>, client_buffer: usize) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
        Err(e) => warn!(error = %e, "WebSocket server listening, local address unknown"),
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let broadcaster = broadcaster.clone();
                tokio::spawn(handle_connection(stream, peer, broadcaster, client_buffer));
            }
            Err(e) => {
                error!(error = %e, "failed to accept TCP connection");
                // Usually fd exhaustion; give it a moment
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: Arc<Broadcaster>,
    client_buffer: usize,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (ws_sender, ws_receiver) = ws_stream.split();

    let (client, rx) = Client::channel(client_buffer);
    let client_id = client.id.clone();
    if !broadcaster.add_client(client) {
        return;
    }
    info!(%client_id, %peer, "client connected");

    let mut writer = tokio::spawn(send_loop(ws_sender, rx, client_id.clone()));

    tokio::select! {
        _ = read_loop(ws_receiver, &client_id) => {}
        _ = &mut writer => {
            debug!(%client_id, "send loop ended before the peer closed");
        }
    }

    // Dropping the client closes its queue, which ends the send loop
    broadcaster.remove_client(&client_id);
    info!(%client_id, "client disconnected");
}

/// Drains the client's queue into the socket, then closes the socket.
///
/// The queue is closed as soon as the loop ends, so the broadcaster sees the
/// client as closed while the close handshake is still pending.
pub(super) async fn send_loop<S>(mut ws_sender: S, mut rx: mpsc::Receiver<WsMessage>, client_id: ClientId)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(msg) = rx.recv().await {
        match time::timeout(SEND_TIMEOUT, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%client_id, error = %e, "failed to send message");
                break;
            }
            Err(_) => {
                warn!(%client_id, timeout = ?SEND_TIMEOUT, "send timed out");
                break;
            }
        }
    }
    drop(rx);

    let _ = time::timeout(SEND_TIMEOUT, ws_sender.close()).await;
    debug!(%client_id, "send loop closed");
}

/// Consumes inbound frames until close or error.
async fn read_loop(mut ws_receiver: WsSource, client_id: &str) {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Close(frame)) => {
                debug!(client_id, ?frame, "close frame received");
                break;
            }
            Ok(msg) => trace!(client_id, len = msg.len(), "ignoring inbound frame"),
            Err(e) => {
                warn!(client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}
