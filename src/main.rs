//! CLI for mqtt-ws-bridge
//!
//! Subcommands:
//! - `serve`: run the bridge
//! - `watch`: connect to a running bridge and print what it broadcasts

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use mqtt_ws_bridge::config::load_config;
use mqtt_ws_bridge::utils::logging;
use mqtt_ws_bridge::{BridgeError, Envelope, bridge};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mqtt-ws-bridge", version, about)]
struct Cli {
    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge (default)
    Serve,
    /// Print envelopes received from a running bridge
    Watch {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "loaded environment file");
    }

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server().await,
        Command::Watch { url } => run_watch(&url).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), BridgeError> {
    let config = load_config()?;
    info!(
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        topics = ?config.mqtt.topics,
        listen = %config.server.addr(),
        "starting bridge"
    );
    bridge::run(config).await
}

async fn run_watch(url: &str) -> Result<(), BridgeError> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    info!(url, "connected");

    while let Some(msg) = ws_stream.next().await {
        match msg? {
            WsMessage::Text(text) => match serde_json::from_str::<Envelope>(text.as_str()) {
                Ok(envelope) => println!(
                    "{} [{}] {}",
                    envelope.timestamp, envelope.topic, envelope.data
                ),
                Err(e) => warn!(error = %e, "unexpected message: {}", text.as_str()),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    info!("connection closed");
    Ok(())
}
