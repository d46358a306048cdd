//! Wires the two halves of the bridge together.
//!
//! The broker ingress and the WebSocket acceptance loop run as independent
//! tasks; the only state they share is the `Broadcaster`.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::config::Settings;
use crate::utils::BridgeError;
use crate::{ingress, transport};

/// Runs the bridge until Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), BridgeError> {
    run_until(settings, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received. Exiting gracefully.");
    })
    .await
}

/// Runs the bridge until `shutdown` completes.
///
/// Fails only if the listener cannot be bound or the settings are unusable;
/// broker and client errors are handled inside the running tasks.
pub async fn run_until(
    settings: Settings,
    shutdown: impl Future<Output = ()>,
) -> Result<(), BridgeError> {
    let broadcaster = Arc::new(Broadcaster::new(&settings.bridge));
    let listener = transport::bind(&settings.server.addr()).await?;
    let ingress = ingress::connect(&settings.mqtt, broadcaster.clone())?;

    let mut server = tokio::spawn(transport::serve(
        listener,
        broadcaster.clone(),
        settings.bridge.client_buffer,
    ));

    tokio::select! {
        _ = shutdown => {}
        _ = &mut server => {
            error!("WebSocket server exited unexpectedly.");
        }
    }

    server.abort();
    let broker_connected = ingress.connectivity().is_connected();
    ingress.shutdown().await;

    let stats = broadcaster.stats();
    info!(
        received = stats.received,
        deliveries = stats.deliveries,
        drops = stats.drops,
        clients_served = stats.connected_total,
        clients_connected = stats.connected_now,
        broker_connected,
        "bridge stopped"
    );
    Ok(())
}
