use std::collections::HashMap;

use atlas_transport::{AtlasEntity, NetworkIdentity};
use log::info;

use crate::authority::AuthorityTracker;
use crate::error::AtlasResult;
use crate::simulator::DebugEntitySimulator;
use crate::watchdog::TransferWatchdog;

#[derive(Debug, Clone)]
pub struct PendingIncomingHandoff {
    pub entity: AtlasEntity,
    pub sender: NetworkIdentity,
    pub transfer_time_us: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingOutgoingHandoff {
    pub entity_id: u64,
    pub target: NetworkIdentity,
    pub transfer_time_us: u64,
}

/// Holds pending incoming and outgoing handoffs until their agreed transfer
/// time, then atomically commits them: adopt on the target, drop on the
/// source. Grounded on `SH_TransferMailbox` / `NH_TransferMailbox` in the
/// original implementation.
#[derive(Default)]
pub struct TransferMailbox {
    pending_incoming: HashMap<u64, PendingIncomingHandoff>,
    pending_outgoing: HashMap<u64, PendingOutgoingHandoff>,
}

impl TransferMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.pending_incoming.clear();
        self.pending_outgoing.clear();
    }

    pub fn has_pending_incoming(&self) -> bool {
        !self.pending_incoming.is_empty()
    }

    pub fn has_pending_outgoing(&self) -> bool {
        !self.pending_outgoing.is_empty()
    }

    /// Overwrites any prior pending incoming for this entity — the latest
    /// handoff packet supersedes earlier ones, since the transport delivers
    /// reliably in send order per peer pair (Testable Property 5).
    pub fn queue_incoming(&mut self, entity: AtlasEntity, sender: NetworkIdentity, transfer_time_us: u64) {
        self.pending_incoming
            .insert(entity.entity_id, PendingIncomingHandoff { entity, sender, transfer_time_us });
    }

    pub fn add_pending_outgoing(&mut self, handoff: PendingOutgoingHandoff) {
        self.pending_outgoing.insert(handoff.entity_id, handoff);
    }

    pub fn clear_pending_outgoing(&mut self) {
        self.pending_outgoing.clear();
    }

    /// Adopts every incoming entry due at or before `now_us`, in
    /// (transfer_time_us, entity_id) order so multiple due-in-one-tick
    /// adoptions happen in a deterministic sequence.
    pub fn adopt_incoming_if_due(
        &mut self,
        now_us: u64,
        simulator: &mut dyn DebugEntitySimulator,
        watchdog: &TransferWatchdog,
        self_id: NetworkIdentity,
    ) -> AtlasResult<usize> {
        let mut due: Vec<PendingIncomingHandoff> = self
            .pending_incoming
            .iter()
            .filter(|(_, h)| h.transfer_time_us <= now_us)
            .map(|(_, h)| h.clone())
            .collect();
        due.sort_by_key(|h| (h.transfer_time_us, h.entity.entity_id));
        for h in &due {
            self.pending_incoming.remove(&h.entity.entity_id);
        }
        for h in &due {
            simulator.adopt_single_entity(h.entity.clone());
            watchdog.mark_incoming_adopted(h.entity.entity_id, h.sender, self_id, h.transfer_time_us, now_us)?;
            info!("adopted entity {} from {}", h.entity.entity_id, h.sender);
        }
        Ok(due.len())
    }

    /// Commits every outgoing entry due at or before `now_us`: if the tracker
    /// no longer reports Passing to the recorded target, the transfer was
    /// canceled externally and is dropped without touching the simulator;
    /// otherwise the entity is removed from both simulator and tracker and
    /// marked committed in the watchdog. Publishes telemetry once if at least
    /// one entry committed.
    pub fn commit_outgoing_if_due(
        &mut self,
        now_us: u64,
        simulator: &mut dyn DebugEntitySimulator,
        tracker: &mut AuthorityTracker,
        watchdog: &TransferWatchdog,
        self_id: NetworkIdentity,
        mut publish_telemetry: impl FnMut(&AuthorityTracker),
    ) -> AtlasResult<usize> {
        let due: Vec<PendingOutgoingHandoff> = self
            .pending_outgoing
            .iter()
            .filter(|(_, h)| h.transfer_time_us <= now_us)
            .map(|(_, h)| *h)
            .collect();
        for h in &due {
            self.pending_outgoing.remove(&h.entity_id);
        }
        let mut committed = 0usize;
        for h in due {
            if !tracker.is_passing_to(h.entity_id, h.target) {
                watchdog.mark_transfer_canceled(h.entity_id)?;
                info!("transfer of entity {} to {} canceled before commit", h.entity_id, h.target);
                continue;
            }
            simulator.remove_entity(h.entity_id);
            tracker.remove_entity(h.entity_id);
            watchdog.mark_outgoing_committed(h.entity_id, self_id, h.target, now_us)?;
            committed += 1;
        }
        if committed > 0 {
            publish_telemetry(tracker);
        }
        Ok(committed)
    }
}
