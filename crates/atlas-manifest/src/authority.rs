use std::collections::HashMap;

use atlas_transport::{AtlasEntity, NetworkIdentity, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    Authoritative,
    Passing,
}

#[derive(Debug, Clone)]
pub struct AuthorityEntry {
    pub snapshot: AtlasEntity,
    pub state: OwnershipState,
    pub passing_to: Option<NetworkIdentity>,
}

impl AuthorityEntry {
    fn new_authoritative(snapshot: AtlasEntity) -> Self {
        Self { snapshot, state: OwnershipState::Authoritative, passing_to: None }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryRow {
    pub entity_id: u64,
    pub owner: NetworkIdentity,
    pub world: u16,
    pub position: Vec3,
    pub is_client: bool,
    pub client_id: uuid::Uuid,
}

/// Local table of entities this shard owns, tagged {Authoritative, Passing}.
/// No entry is created by the tracker itself — only `SetOwnedEntities`
/// (driven by simulator snapshots) introduces entries (§4.4 invariant).
#[derive(Default)]
pub struct AuthorityTracker {
    entries: HashMap<u64, AuthorityEntry>,
}

impl AuthorityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Replaces the map to exactly reflect `snapshot`. New entities default
    /// to Authoritative; entities already present retain their state and
    /// `passing_to` (the source's choice, retained here per SPEC_FULL.md §9's
    /// open question — a simulator-reset gap could otherwise drop a
    /// mid-flight Passing state).
    pub fn set_owned_entities(&mut self, snapshot: Vec<AtlasEntity>) {
        let mut next = HashMap::with_capacity(snapshot.len());
        for entity in snapshot {
            let entry = match self.entries.remove(&entity.entity_id) {
                Some(mut existing) => {
                    existing.snapshot = entity;
                    existing
                }
                None => AuthorityEntry::new_authoritative(entity),
            };
            next.insert(entry.snapshot.entity_id, entry);
        }
        self.entries = next;
    }

    /// Transitions to Passing if not already passing to `target`. Returns
    /// `false` (idempotent no-op) if already passing to the same target, so
    /// the planner never resends a handoff packet for the same crossing.
    pub fn mark_passing(&mut self, entity_id: u64, target: NetworkIdentity) -> bool {
        let Some(entry) = self.entries.get_mut(&entity_id) else { return false };
        if entry.state == OwnershipState::Passing && entry.passing_to == Some(target) {
            return false;
        }
        entry.state = OwnershipState::Passing;
        entry.passing_to = Some(target);
        true
    }

    pub fn mark_authoritative(&mut self, entity_id: u64) {
        if let Some(entry) = self.entries.get_mut(&entity_id) {
            entry.state = OwnershipState::Authoritative;
            entry.passing_to = None;
        }
    }

    pub fn is_passing_to(&self, entity_id: u64, target: NetworkIdentity) -> bool {
        self.entries.get(&entity_id).map(|e| e.state == OwnershipState::Passing && e.passing_to == Some(target)).unwrap_or(false)
    }

    pub fn is_passing(&self, entity_id: u64) -> bool {
        self.entries.get(&entity_id).map(|e| e.state == OwnershipState::Passing).unwrap_or(false)
    }

    pub fn remove_entity(&mut self, entity_id: u64) {
        self.entries.remove(&entity_id);
    }

    pub fn get(&self, entity_id: u64) -> Option<&AuthorityEntry> {
        self.entries.get(&entity_id)
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &AuthorityEntry> {
        self.entries.values()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn collect_telemetry_rows(&self, self_id: NetworkIdentity) -> Vec<TelemetryRow> {
        self.entries
            .values()
            .map(|e| TelemetryRow {
                entity_id: e.snapshot.entity_id,
                owner: self_id,
                world: e.snapshot.world,
                position: e.snapshot.position,
                is_client: e.snapshot.is_client,
                client_id: e.snapshot.client_id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_transport::Aabb;
    use uuid::Uuid;

    fn entity(id: u64) -> AtlasEntity {
        AtlasEntity {
            entity_id: id,
            client_id: Uuid::new_v4(),
            is_client: false,
            world: 0,
            position: Vec3::ZERO,
            bounding_box: Aabb::centered(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)),
            metadata: vec![],
        }
    }

    #[test]
    fn new_entities_default_to_authoritative() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1)]);
        assert_eq!(t.get(1).unwrap().state, OwnershipState::Authoritative);
    }

    #[test]
    fn set_owned_entities_preserves_passing_state_across_snapshots() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1)]);
        let target = NetworkIdentity::make_shard(Uuid::new_v4());
        t.mark_passing(1, target);
        t.set_owned_entities(vec![entity(1)]);
        assert!(t.is_passing_to(1, target));
    }

    #[test]
    fn set_owned_entities_drops_entities_no_longer_present() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1), entity(2)]);
        t.set_owned_entities(vec![entity(1)]);
        assert!(t.get(2).is_none());
    }

    #[test]
    fn mark_passing_is_idempotent_for_the_same_target() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1)]);
        let target = NetworkIdentity::make_shard(Uuid::new_v4());
        assert!(t.mark_passing(1, target));
        assert!(!t.mark_passing(1, target));
    }

    #[test]
    fn mark_passing_to_a_new_target_is_not_idempotent() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1)]);
        let t1 = NetworkIdentity::make_shard(Uuid::new_v4());
        let t2 = NetworkIdentity::make_shard(Uuid::new_v4());
        assert!(t.mark_passing(1, t1));
        assert!(t.mark_passing(1, t2));
    }

    #[test]
    fn mark_authoritative_clears_passing_to() {
        let mut t = AuthorityTracker::new();
        t.set_owned_entities(vec![entity(1)]);
        t.mark_passing(1, NetworkIdentity::make_shard(Uuid::new_v4()));
        t.mark_authoritative(1);
        assert!(!t.is_passing(1));
        assert!(t.get(1).unwrap().passing_to.is_none());
    }
}
