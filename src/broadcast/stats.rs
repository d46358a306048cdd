use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for the fan-out path. Updated without locks.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    deliveries: AtomicU64,
    drops: AtomicU64,
    connected: AtomicU64,
    removed: AtomicU64,
}

/// Point-in-time copy of `BridgeStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Ingress events processed.
    pub received: u64,
    /// Envelopes queued to a client.
    pub deliveries: u64,
    /// Envelopes discarded because a client's queue was full.
    pub drops: u64,
    /// Clients ever added.
    pub connected_total: u64,
    /// Clients removed for any reason.
    pub removed_total: u64,
    /// Clients in the set when the snapshot was taken.
    pub connected_now: u64,
}

impl BridgeStats {
    /// Returns the running total including this event.
    pub fn record_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_pass(&self, deliveries: usize, drops: usize) {
        self.deliveries
            .fetch_add(deliveries as u64, Ordering::Relaxed);
        self.drops.fetch_add(drops as u64, Ordering::Relaxed);
    }

    pub fn record_connected(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed(&self, count: usize) {
        self.removed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connected_now: usize) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            connected_total: self.connected.load(Ordering::Relaxed),
            removed_total: self.removed.load(Ordering::Relaxed),
            connected_now: connected_now as u64,
        }
    }
}
