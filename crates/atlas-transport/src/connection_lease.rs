use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::identity::NetworkIdentity;

/// Tracks per-peer activity and reaps idle links. The optional anti-dupe
/// leasing mode described alongside this type (a set-if-not-exists-or-owned
/// key per shard pair, preventing two shards from racing to open the same
/// outbound link) is not implemented here — it belongs to whichever shared
/// key-value store the caller already holds (`atlas-manifest`'s election
/// store follows the same set-if-absent-or-stale pattern). This registry only
/// tracks local activity timestamps and reaps on inactivity.
pub struct ConnectionLeaseRegistry {
    last_activity: DashMap<NetworkIdentity, Instant>,
    inactivity_timeout: Duration,
}

impl ConnectionLeaseRegistry {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self { last_activity: DashMap::new(), inactivity_timeout }
    }

    pub fn mark_activity(&self, peer: NetworkIdentity) {
        self.last_activity.insert(peer, Instant::now());
    }

    /// Calls `on_idle(peer, elapsed)` for every peer whose activity is older
    /// than the configured timeout, then removes that peer from tracking
    /// (the caller's reaper is expected to tear the link down).
    pub fn tick<F>(&self, now: Instant, mut on_idle: F)
    where
        F: FnMut(NetworkIdentity, Duration),
    {
        let idle: Vec<NetworkIdentity> = self
            .last_activity
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > self.inactivity_timeout)
            .map(|entry| *entry.key())
            .collect();
        for peer in idle {
            if let Some((_, last)) = self.last_activity.remove(&peer) {
                on_idle(peer, now.saturating_duration_since(last));
            }
        }
    }

    pub fn is_tracked(&self, peer: &NetworkIdentity) -> bool {
        self.last_activity.contains_key(peer)
    }

    pub fn tracked_count(&self) -> usize {
        self.last_activity.len()
    }
}
