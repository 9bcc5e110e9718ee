use atlas_transport::{GenericEntityPacket, NetworkIdentity};
use log::{info, warn};

use crate::authority::AuthorityTracker;
use crate::error::AtlasError;
use crate::geometry::Bound;
use crate::mailbox::PendingOutgoingHandoff;
use crate::watchdog::TransferWatchdog;

/// Default handoff delay: the agreed transfer instant is `now + this`, giving
/// the target time to receive and queue the packet before the source commits.
pub const DEFAULT_HANDOFF_DELAY_US: u64 = 60_000;

/// Detects entities that have crossed out of this shard's claimed bound and
/// emits a scheduled transfer intent to the receiving shard. Grounded on
/// `SH_BorderHandoffPlanner` in the original implementation.
pub struct BorderHandoffPlanner {
    self_id: NetworkIdentity,
    handoff_delay_us: u64,
}

impl BorderHandoffPlanner {
    pub fn new(self_id: NetworkIdentity, handoff_delay_us: u64) -> Self {
        Self { self_id, handoff_delay_us }
    }

    /// For every entity this shard authoritatively owns: if it's already
    /// passing, skip (one-way once initiated). If it's still inside this
    /// shard's own claimed bound(s), mark authoritative and continue. If it's
    /// inside another shard's claimed bound, mark passing and emit a packet
    /// (idempotent — `mark_passing` returning `false` means a packet was
    /// already sent for this crossing, so nothing is resent). If it's
    /// outside every known bound, skip — the perimeter reflection is
    /// expected to bring it back in eventually.
    pub fn plan_and_send_all(
        &self,
        tracker: &mut AuthorityTracker,
        claimed_bounds: &[(NetworkIdentity, Bound)],
        now_us: u64,
        sent_at_ms: u64,
        watchdog: &TransferWatchdog,
        mut send_packet: impl FnMut(NetworkIdentity, &GenericEntityPacket),
    ) -> Vec<PendingOutgoingHandoff> {
        let self_bounds: Vec<&Bound> =
            claimed_bounds.iter().filter(|(owner, _)| *owner == self.self_id).map(|(_, b)| b).collect();
        let entity_ids: Vec<u64> = tracker.snapshots().map(|e| e.snapshot.entity_id).collect();

        let mut outgoing = Vec::new();
        for entity_id in entity_ids {
            if tracker.is_passing(entity_id) {
                continue;
            }
            let position = match tracker.get(entity_id) {
                Some(e) => e.snapshot.position,
                None => continue,
            };
            if self_bounds.iter().any(|b| b.contains(position)) {
                tracker.mark_authoritative(entity_id);
                continue;
            }
            let target_bound = claimed_bounds.iter().find(|(owner, b)| *owner != self.self_id && b.contains(position));
            let (target, _bound) = match target_bound {
                Some((owner, b)) => (*owner, b),
                None => continue,
            };
            if target == self.self_id {
                continue;
            }
            if target.is_invalid() {
                warn!("{}: entity {entity_id} stays authoritative, retrying next tick", AtlasError::UnknownPeer);
                continue;
            }
            if !tracker.mark_passing(entity_id, target) {
                continue;
            }
            let transfer_time_us = now_us + self.handoff_delay_us;
            let entity_snapshot = tracker.get(entity_id).expect("just marked passing above").snapshot.clone();
            let packet = GenericEntityPacket::new(self.self_id, entity_snapshot, transfer_time_us, sent_at_ms);
            send_packet(target, &packet);
            if let Err(err) = watchdog.mark_transfer_started(entity_id, self.self_id, target, transfer_time_us, now_us) {
                info!("failed to record transfer start for entity {entity_id}: {err}");
            }
            info!("entity {entity_id} crossing to {target}, transfer_time_us={transfer_time_us}");
            outgoing.push(PendingOutgoingHandoff { entity_id, target, transfer_time_us });
        }
        outgoing
    }
}
