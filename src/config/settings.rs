use serde::Deserialize;
use uuid::Uuid;

/// Top-level configuration settings for the bridge.
///
/// Includes settings for the WebSocket server, the MQTT broker connection
/// and the fan-out behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub bridge: BridgeSettings,
}

/// Configuration settings for the WebSocket server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration settings for the upstream MQTT broker.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Topic filters subscribed on every (re)connect.
    pub topics: Vec<String>,
    /// Capacity of the rumqttc request channel.
    pub event_loop_capacity: usize,
}

/// Fan-out settings.
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeSettings {
    /// Bound of each client's outbound queue.
    pub client_buffer: usize,
    /// Dropped envelopes after which a lagging client is disconnected.
    pub max_client_drops: u64,
    /// Log one message in `log_every` at info level; 0 disables it.
    pub log_every: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub mqtt: Option<PartialMqttSettings>,
    pub bridge: Option<PartialBridgeSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialMqttSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub topics: Option<Vec<String>>,
    pub event_loop_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBridgeSettings {
    pub client_buffer: Option<usize>,
    pub max_client_drops: Option<u64>,
    pub log_every: Option<u64>,
}

/// Provides default values for `Settings`.
///
/// The default topic filters are the classroom telemetry and flipper feeds.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            mqtt: MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                client_id: format!("mqtt-ws-bridge-{}", Uuid::new_v4().simple()),
                keep_alive_secs: 30,
                topics: vec![
                    "classroom/+/telemetry".to_string(),
                    "flipper/+/+".to_string(),
                ],
                event_loop_capacity: 64,
            },
            bridge: BridgeSettings {
                client_buffer: 256,
                max_client_drops: 100,
                log_every: 50,
            },
        }
    }
}
