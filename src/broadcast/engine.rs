//! Fan-out engine
//!
//! `Broadcaster` owns the live client set and delivers every ingress event to
//! all of its members:
//! - each event becomes one `Envelope`, serialized exactly once
//! - delivery is a non-blocking `try_send` into each client's bounded queue,
//!   so a slow or broken client never holds up the others
//! - clients whose queue is closed, or who keep overflowing it, are removed
//!   after the pass
//!
//! Concurrency notes: the set sits behind a `RwLock`. A broadcast pass holds
//! the read lock for its iteration only; adds and removals take the write
//! lock. No lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broadcast::envelope::Envelope;
use crate::broadcast::stats::{BridgeStats, StatsSnapshot};
use crate::client::{Client, ClientId, ClientState, Delivery};
use crate::config::BridgeSettings;
use crate::ingress::IngressEvent;

/// Characters of payload shown in throttled message logs.
const LOG_PREVIEW_CHARS: usize = 60;

/// Outcome of one broadcast pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients that were open and got a send attempt.
    pub attempted: usize,
    pub delivered: usize,
    pub dropped: usize,
    /// Clients taken out of the set by this pass.
    pub removed: Vec<ClientId>,
}

#[derive(Debug)]
pub struct Broadcaster {
    clients: RwLock<HashMap<ClientId, Client>>,
    stats: BridgeStats,
    max_client_drops: u64,
    log_every: u64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        let defaults = crate::config::Settings::default().bridge;
        Self::new(&defaults)
    }
}

impl Broadcaster {
    pub fn new(settings: &BridgeSettings) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            stats: BridgeStats::default(),
            max_client_drops: settings.max_client_drops,
            log_every: settings.log_every,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Client>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, Client>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a freshly accepted client. Returns `false`, leaving the set
    /// untouched, if a client with the same id is already present.
    pub fn add_client(&self, client: Client) -> bool {
        let mut clients = self.write();
        if clients.contains_key(&client.id) {
            warn!(client_id = %client.id, "client already registered");
            return false;
        }
        debug!(client_id = %client.id, "client added");
        clients.insert(client.id.clone(), client);
        drop(clients);
        self.stats.record_connected();
        true
    }

    /// Removes a client. Removing an absent client is a no-op that returns
    /// `false`.
    pub fn remove_client(&self, client_id: &str) -> bool {
        let removed = self.write().remove(client_id).is_some();
        if removed {
            self.stats.record_removed(1);
            debug!(client_id, "client removed");
        }
        removed
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.read().contains_key(client_id)
    }

    /// Ids of the clients currently in the set, in no particular order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.read().keys().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.read().len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.client_count())
    }

    /// Builds the envelope for `event` and sends it to every open client.
    pub fn on_ingress_event(&self, event: IngressEvent) -> BroadcastReport {
        let envelope = Envelope::from_event(&event);
        let count = self.stats.record_received();

        debug!(
            topic = %envelope.topic,
            bytes = event.raw_payload.len(),
            "broker message"
        );
        if self.log_every > 0 && count % self.log_every == 0 {
            info!(
                "[{}] {} - {}...",
                count,
                envelope.topic,
                envelope.preview(LOG_PREVIEW_CHARS)
            );
        }

        let message = match envelope.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!(topic = %envelope.topic, error = %e, "failed to serialize envelope");
                return BroadcastReport::default();
            }
        };

        let report = self.broadcast(message);
        debug!(
            topic = %envelope.topic,
            recipients = report.delivered,
            latency = ?event.received_at.elapsed(),
            "broadcast done"
        );
        report
    }

    /// Hands `message` to every open client in the current set.
    ///
    /// Every client gets a clone of the same message. Clients found closed,
    /// or whose drop count reaches the limit, are removed once iteration is
    /// over.
    pub fn broadcast(&self, message: WsMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut to_remove = Vec::new();
        {
            let clients = self.read();
            for client in clients.values() {
                if client.state() != ClientState::Open {
                    to_remove.push(client.id.clone());
                    continue;
                }
                report.attempted += 1;
                match client.try_deliver(message.clone()) {
                    Delivery::Queued => report.delivered += 1,
                    Delivery::Dropped => {
                        report.dropped += 1;
                        let drops = client.drop_count();
                        if self.max_client_drops > 0 && drops >= self.max_client_drops {
                            warn!(client_id = %client.id, drops, "disconnecting slow client");
                            to_remove.push(client.id.clone());
                        } else {
                            debug!(client_id = %client.id, drops, "client queue full, message dropped");
                        }
                    }
                    Delivery::Closed => {
                        debug!(client_id = %client.id, "client closed during broadcast");
                        to_remove.push(client.id.clone());
                    }
                }
            }
        }
        self.stats.record_pass(report.delivered, report.dropped);

        if !to_remove.is_empty() {
            let mut clients = self.write();
            for id in to_remove {
                if clients.remove(&id).is_some() {
                    report.removed.push(id);
                }
            }
            drop(clients);
            self.stats.record_removed(report.removed.len());
        }
        report
    }
}
