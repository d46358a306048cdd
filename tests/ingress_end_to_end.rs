use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use mqtt_ws_bridge::config::Settings;
use mqtt_ws_bridge::{Broadcaster, Envelope, ingress, transport};
use rumqttc::mqttbytes::v4::{
    self, ConnAck, ConnectReturnCode, Packet, PingResp, Publish, SubAck, SubscribeReasonCode,
};
use rumqttc::mqttbytes::{self, QoS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// What the broker saw from the bridge.
#[derive(Debug, PartialEq)]
enum BrokerEvent {
    Connected(String),
    Subscribed(Vec<String>),
    Disconnected,
}

/// Single-connection MQTT 3.1.1 broker. Acks CONNECT and SUBSCRIBE, answers
/// pings and writes whatever PUBLISH packets the test hands it.
async fn run_broker(
    listener: TcpListener,
    mut publishes: mpsc::UnboundedReceiver<Publish>,
    events: mpsc::UnboundedSender<BrokerEvent>,
) {
    let (mut stream, _) = listener.accept().await.expect("broker accept failed");
    let mut read_buf = BytesMut::with_capacity(4096);

    loop {
        loop {
            match v4::read(&mut read_buf, 1024 * 1024) {
                Ok(packet) => {
                    if !handle_packet(&mut stream, packet, &events).await {
                        return;
                    }
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => break,
                Err(e) => panic!("malformed packet from bridge: {e:?}"),
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut read_buf) => {
                if read.expect("broker read failed") == 0 {
                    return;
                }
            }
            Some(publish) = publishes.recv() => {
                write_packet(&mut stream, |buf| publish.write(buf)).await;
            }
        }
    }
}

/// Returns `false` once the bridge has disconnected.
async fn handle_packet(
    stream: &mut TcpStream,
    packet: Packet,
    events: &mpsc::UnboundedSender<BrokerEvent>,
) -> bool {
    match packet {
        Packet::Connect(connect) => {
            write_packet(stream, |buf| {
                ConnAck::new(ConnectReturnCode::Success, false).write(buf)
            })
            .await;
            let _ = events.send(BrokerEvent::Connected(connect.client_id));
        }
        Packet::Subscribe(subscribe) => {
            let codes = vec![SubscribeReasonCode::Success(QoS::AtMostOnce); subscribe.filters.len()];
            let pkid = subscribe.pkid;
            write_packet(stream, |buf| SubAck::new(pkid, codes).write(buf)).await;
            let paths = subscribe.filters.into_iter().map(|f| f.path).collect();
            let _ = events.send(BrokerEvent::Subscribed(paths));
        }
        Packet::PingReq => write_packet(stream, |buf| PingResp.write(buf)).await,
        Packet::Disconnect => {
            let _ = events.send(BrokerEvent::Disconnected);
            return false;
        }
        _ => {}
    }
    true
}

async fn write_packet(
    stream: &mut TcpStream,
    encode: impl FnOnce(&mut BytesMut) -> Result<usize, mqttbytes::Error>,
) {
    let mut buf = BytesMut::new();
    encode(&mut buf).expect("failed to encode packet");
    stream.write_all(&buf).await.expect("broker write failed");
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<BrokerEvent>) -> BrokerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for the bridge")
        .expect("broker stopped")
}

async fn wait_for_clients(broadcaster: &Broadcaster, expected: usize) {
    for _ in 0..200 {
        if broadcaster.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client set never reached {expected}");
}

#[tokio::test]
async fn broker_messages_reach_websocket_clients_until_disconnect() {
    let broker = TcpListener::bind("127.0.0.1:0").await.expect("broker bind failed");
    let (publish_tx, publish_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut settings = Settings::default();
    settings.mqtt.host = "127.0.0.1".to_string();
    settings.mqtt.port = broker.local_addr().unwrap().port();
    tokio::spawn(run_broker(broker, publish_rx, event_tx));

    let broadcaster = Arc::new(Broadcaster::new(&settings.bridge));
    let listener = transport::bind("127.0.0.1:0").await.expect("bind failed");
    let ws_url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(transport::serve(
        listener,
        broadcaster.clone(),
        settings.bridge.client_buffer,
    ));
    let (mut ws, _) = connect_async(ws_url.as_str()).await.expect("connect failed");
    wait_for_clients(&broadcaster, 1).await;

    let handle = ingress::connect(&settings.mqtt, broadcaster.clone()).expect("invalid settings");

    assert_eq!(
        next_event(&mut event_rx).await,
        BrokerEvent::Connected(settings.mqtt.client_id.clone())
    );
    let mut subscribed = Vec::new();
    while subscribed.len() < settings.mqtt.topics.len() {
        match next_event(&mut event_rx).await {
            BrokerEvent::Subscribed(paths) => subscribed.extend(paths),
            other => panic!("Expected a subscription, got {other:?}"),
        }
    }
    let mut expected = settings.mqtt.topics.clone();
    subscribed.sort();
    expected.sort();
    assert_eq!(subscribed, expected);

    let connectivity = handle.connectivity();
    assert!(connectivity.is_connected());

    publish_tx
        .send(Publish::new("classroom/room7/telemetry", QoS::AtMostOnce, "21.5"))
        .expect("broker stopped");

    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for an envelope")
        .expect("stream ended")
        .expect("WebSocket error");
    let WsMessage::Text(text) = msg else {
        panic!("Expected a text message, got {msg:?}");
    };
    let envelope: Envelope = serde_json::from_str(text.as_str()).expect("not an envelope");
    assert_eq!(envelope.topic, "classroom/room7/telemetry");
    assert_eq!(envelope.data, "21.5");

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("ingress did not stop after DISCONNECT");
    assert_eq!(next_event(&mut event_rx).await, BrokerEvent::Disconnected);
    assert!(!connectivity.is_connected());
    assert_eq!(broadcaster.stats().received, 1);
}
