use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use parking_lot::Mutex;

use crate::packet::{GenericEntityPacket, PacketTypeId, GENERIC_ENTITY_PACKET_TYPE};

type Callback = Arc<dyn Fn(&GenericEntityPacket) + Send + Sync>;

const MALFORMED_WARNING_INTERVAL: Duration = Duration::from_secs(60);

struct Subscription {
    alive: Arc<AtomicBool>,
    callback: Callback,
}

/// Handle returned by `subscribe`. Dropping it deactivates the subscription
/// (RAII, matching `PacketManager::Subscription`'s destructor in the original
/// implementation); `cancel` does the same thing explicitly, for callers that
/// want to unwire before the handle goes out of scope. The next `cleanup`
/// pass compacts dead entries out.
pub struct SubscriptionHandle {
    alive: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Process-wide publish/subscribe fan-out keyed by packet type.
///
/// `dispatch` snapshots the live callback list under a short-lived mutex,
/// releases the lock, then invokes each one in registration order. The mutex
/// is never held across callback execution — see §5 of the design notes
/// (snapshot-then-invoke, never callback-under-lock).
pub struct PacketBus {
    subscriptions: Mutex<HashMap<PacketTypeId, Vec<Subscription>>>,
    malformed_warnings: Mutex<HashMap<String, Instant>>,
}

impl Default for PacketBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBus {
    pub fn new() -> Self {
        Self { subscriptions: Mutex::new(HashMap::new()), malformed_warnings: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe<F>(&self, type_id: PacketTypeId, callback: F) -> SubscriptionHandle
    where
        F: Fn(&GenericEntityPacket) + Send + Sync + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let sub = Subscription { alive: alive.clone(), callback: Arc::new(callback) };
        self.subscriptions.lock().entry(type_id).or_default().push(sub);
        SubscriptionHandle { alive }
    }

    /// A subscription cancelled before this snapshot is taken is skipped; one
    /// cancelled concurrently during dispatch may or may not receive this
    /// packet (unspecified but harmless — cancellation only ever narrows
    /// delivery, never widens it).
    pub fn dispatch(&self, type_id: PacketTypeId, packet: &GenericEntityPacket) {
        let snapshot: Vec<Callback> = {
            let guard = self.subscriptions.lock();
            match guard.get(&type_id) {
                Some(subs) => subs
                    .iter()
                    .filter(|s| s.alive.load(Ordering::SeqCst))
                    .map(|s| s.callback.clone())
                    .collect(),
                None => return,
            }
        };
        for cb in snapshot {
            cb(packet);
        }
    }

    /// Removes dead subscriptions for every packet type. Call periodically
    /// (e.g. once per tick) rather than on every cancellation.
    pub fn cleanup(&self) {
        let mut guard = self.subscriptions.lock();
        for subs in guard.values_mut() {
            subs.retain(|s| s.alive.load(Ordering::SeqCst));
        }
        guard.retain(|_, subs| !subs.is_empty());
    }

    pub fn subscriber_count(&self, type_id: PacketTypeId) -> usize {
        self.subscriptions.lock().get(&type_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Decodes a raw wire frame and dispatches it to `GenericEntityPacket`
    /// subscribers on success. A decode failure is dropped and logged at
    /// most once per peer per minute (§7: malformed packets are dropped,
    /// logged once per peer per minute).
    pub fn decode_and_dispatch(&self, frame: &[u8], peer: &str) {
        match GenericEntityPacket::decode_frame(frame) {
            Ok(packet) => self.dispatch(GENERIC_ENTITY_PACKET_TYPE, &packet),
            Err(err) => self.warn_once_malformed(peer, &err.to_string()),
        }
    }

    fn warn_once_malformed(&self, peer: &str, reason: &str) {
        let now = Instant::now();
        let mut guard = self.malformed_warnings.lock();
        let should_log = match guard.get(peer) {
            Some(last) => now.saturating_duration_since(*last) >= MALFORMED_WARNING_INTERVAL,
            None => true,
        };
        if should_log {
            warn!("dropping malformed packet from {peer}: {reason}");
            guard.insert(peer.to_string(), now);
        }
    }
}
