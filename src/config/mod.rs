mod settings;

use config::{Config, Environment, File};

use crate::ingress::TopicFilter;
use crate::utils::BridgeError;
use settings::PartialSettings;

pub use settings::{BridgeSettings, MqttSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default` and `BRIDGE__*` environment
/// variables, merged over `Settings::default()`.
///
/// Lists (`mqtt.topics`) may be given in the environment as a comma separated
/// string, e.g. `BRIDGE__MQTT__TOPICS="a/+/b,c/#"`.
pub fn load_config() -> Result<Settings, BridgeError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("BRIDGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("mqtt.topics"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = merge(partial, Settings::default());
    validate(&settings)?;
    Ok(settings)
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let mqtt = partial.mqtt;
    let bridge = partial.bridge;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        mqtt: MqttSettings {
            host: mqtt
                .as_ref()
                .and_then(|m| m.host.clone())
                .unwrap_or(default.mqtt.host),
            port: mqtt
                .as_ref()
                .and_then(|m| m.port)
                .unwrap_or(default.mqtt.port),
            client_id: mqtt
                .as_ref()
                .and_then(|m| m.client_id.clone())
                .unwrap_or(default.mqtt.client_id),
            keep_alive_secs: mqtt
                .as_ref()
                .and_then(|m| m.keep_alive_secs)
                .unwrap_or(default.mqtt.keep_alive_secs),
            topics: mqtt
                .as_ref()
                .and_then(|m| m.topics.clone())
                .unwrap_or(default.mqtt.topics),
            event_loop_capacity: mqtt
                .as_ref()
                .and_then(|m| m.event_loop_capacity)
                .unwrap_or(default.mqtt.event_loop_capacity),
        },
        bridge: BridgeSettings {
            client_buffer: bridge
                .as_ref()
                .and_then(|b| b.client_buffer)
                .unwrap_or(default.bridge.client_buffer),
            max_client_drops: bridge
                .as_ref()
                .and_then(|b| b.max_client_drops)
                .unwrap_or(default.bridge.max_client_drops),
            log_every: bridge
                .as_ref()
                .and_then(|b| b.log_every)
                .unwrap_or(default.bridge.log_every),
        },
    }
}

/// Rejects settings the bridge cannot run with.
pub fn validate(settings: &Settings) -> Result<(), BridgeError> {
    if settings.mqtt.topics.is_empty() {
        return Err(BridgeError::invalid_setting(
            "mqtt.topics",
            "at least one topic filter is required",
        ));
    }
    for filter in &settings.mqtt.topics {
        TopicFilter::new(filter)?;
    }
    // CONNECT carries the keep-alive as a 16-bit number of seconds
    if settings.mqtt.keep_alive_secs > u64::from(u16::MAX) {
        return Err(BridgeError::invalid_setting(
            "mqtt.keep_alive_secs",
            format!("must be at most {}", u16::MAX),
        ));
    }
    if settings.bridge.client_buffer == 0 {
        return Err(BridgeError::invalid_setting(
            "bridge.client_buffer",
            "must be greater than 0",
        ));
    }
    if settings.mqtt.event_loop_capacity == 0 {
        return Err(BridgeError::invalid_setting(
            "mqtt.event_loop_capacity",
            "must be greater than 0",
        ));
    }
    Ok(())
}
