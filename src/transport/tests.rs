use super::websocket::send_loop;
use super::{bind, serve};
use crate::broadcast::Broadcaster;
use crate::client::{Client, ClientState};
use crate::ingress::IngressEvent;
use crate::utils::BridgeError;
use futures_util::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

type TestClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server() -> (String, Arc<Broadcaster>) {
    let broadcaster = Arc::new(Broadcaster::default());
    let listener = bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broadcaster.clone(), 16));
    (format!("ws://{addr}"), broadcaster)
}

async fn wait_for_clients(broadcaster: &Broadcaster, expected: usize) {
    for _ in 0..100 {
        if broadcaster.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} clients, found {}",
        broadcaster.client_count()
    );
}

async fn next_text(ws: &mut TestClient) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("WebSocket error");
    match msg {
        WsMessage::Text(text) => text.as_str().to_string(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connected_clients_receive_envelope() {
    let (url, broadcaster) = setup_server().await;
    let (mut ws_a, _) = connect_async(url.as_str()).await.expect("client A connect");
    let (mut ws_b, _) = connect_async(url.as_str()).await.expect("client B connect");
    wait_for_clients(&broadcaster, 2).await;

    broadcaster.on_ingress_event(IngressEvent::new("classroom/room7/telemetry", "23.5"));

    let a = next_text(&mut ws_a).await;
    let b = next_text(&mut ws_b).await;
    assert_eq!(a, b);

    let parsed: serde_json::Value = serde_json::from_str(&a).unwrap();
    assert_eq!(parsed["topic"], "classroom/room7/telemetry");
    assert_eq!(parsed["data"], "23.5");
    assert!(parsed["timestamp"].is_i64());
}

#[tokio::test]
async fn test_client_close_removes_it_from_set() {
    let (url, broadcaster) = setup_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");
    wait_for_clients(&broadcaster, 1).await;

    ws.close(None).await.expect("Failed to close WebSocket");
    wait_for_clients(&broadcaster, 0).await;
    assert_eq!(broadcaster.stats().removed_total, 1);
}

#[tokio::test]
async fn test_inbound_messages_are_ignored() {
    let (url, broadcaster) = setup_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");
    wait_for_clients(&broadcaster, 1).await;

    ws.send(WsMessage::text(r#"{"type":"subscribe","topic":"x"}"#))
        .await
        .expect("send failed");
    ws.send(WsMessage::binary(vec![1u8, 2, 3]))
        .await
        .expect("send failed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broadcaster.client_count(), 1);

    broadcaster.on_ingress_event(IngressEvent::new("flipper/a/b", "still here"));
    let parsed: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(parsed["data"], "still here");
}

#[tokio::test]
async fn test_removed_client_is_closed_by_server() {
    let (url, broadcaster) = setup_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");
    wait_for_clients(&broadcaster, 1).await;

    let ids = broadcaster.client_ids();
    assert!(broadcaster.remove_client(&ids[0]));

    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server did not close the connection");
    match next {
        Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("Expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let listener = bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap().to_string();

    match bind(&addr).await {
        Err(BridgeError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
        other => panic!("Expected Bind error, got {other:?}"),
    }
}

/// Writes fail immediately; the close handshake never completes.
struct BrokenSink;

impl Sink<WsMessage> for BrokenSink {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> Result<(), Self::Error> {
        Err(tungstenite::Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

#[tokio::test]
async fn test_failed_send_closes_queue_before_socket_close() {
    let broadcaster = Broadcaster::default();
    let (client, rx) = Client::channel(4);
    let client_id = client.id.clone();
    assert!(broadcaster.add_client(client));

    let writer = tokio::spawn(send_loop(BrokenSink, rx, client_id.clone()));
    let first = broadcaster.on_ingress_event(IngressEvent::new("t", "fails to send"));
    assert_eq!(first.delivered, 1);

    let mut removed = Vec::new();
    for _ in 0..100 {
        let report = broadcaster.on_ingress_event(IngressEvent::new("t", "after failure"));
        if !report.removed.is_empty() {
            removed = report.removed;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(removed, vec![client_id.clone()]);
    assert!(!broadcaster.contains(&client_id));
    // The close attempt is still waiting on the peer
    assert!(!writer.is_finished());
    writer.abort();
}

#[tokio::test]
async fn test_failed_send_marks_client_closed() {
    let (client, rx) = Client::channel(4);
    let client_id = client.id.clone();
    let writer = tokio::spawn(send_loop(BrokenSink, rx, client_id));

    client.try_deliver(WsMessage::text("fails to send"));
    for _ in 0..100 {
        if client.state() == ClientState::Closed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(client.state(), ClientState::Closed);
    writer.abort();
}
