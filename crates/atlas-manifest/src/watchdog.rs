use std::collections::{HashMap, HashSet};
use std::time::Duration;

use atlas_transport::NetworkIdentity;
use log::warn;
use parking_lot::Mutex;

use crate::error::{AtlasError, AtlasResult};

const TRANSFER_ACTIVE_HASH: &str = "EntityHandoff:TransferActive";
const HOLDER_SET_PREFIX: &str = "EntityHandoff:TransferHolders:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Started,
    Adopted,
    Committed,
}

impl TransferState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Adopted => "adopted",
            Self::Committed => "committed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "adopted" => Some(Self::Adopted),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

/// Global record of an in-flight handoff. Serialized as a tab-separated
/// string with exactly six fields (§4.8); records that fail to parse into
/// six fields are ignored by the discrepancy probe rather than treated as a
/// fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTransferRecord {
    pub source: NetworkIdentity,
    pub target: NetworkIdentity,
    pub transfer_time_us: u64,
    pub last_authority: NetworkIdentity,
    pub state: TransferState,
    pub updated_at_us: u64,
}

impl ActiveTransferRecord {
    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.source,
            self.target,
            self.transfer_time_us,
            self.last_authority,
            self.state.as_str(),
            self.updated_at_us
        )
    }

    fn from_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 6 {
            return None;
        }
        Some(Self {
            source: parse_identity(fields[0])?,
            target: parse_identity(fields[1])?,
            transfer_time_us: fields[2].parse().ok()?,
            last_authority: parse_identity(fields[3])?,
            state: TransferState::parse(fields[4])?,
            updated_at_us: fields[5].parse().ok()?,
        })
    }
}

/// `NetworkIdentity::to_string()` is `"{label}:{uuid}"`; parsing it back is
/// only ever needed for watchdog records this process itself wrote, but is
/// implemented defensively rather than assumed.
fn parse_identity(s: &str) -> Option<NetworkIdentity> {
    let (label, uuid_part) = s.split_once(':')?;
    let id = uuid::Uuid::parse_str(uuid_part).ok()?;
    let kind = match label {
        "invalid" => atlas_transport::NetworkIdentityType::Invalid,
        "shard" => atlas_transport::NetworkIdentityType::Shard,
        "watchdog" => atlas_transport::NetworkIdentityType::WatchDog,
        "client" => atlas_transport::NetworkIdentityType::GameClient,
        "gateway" => atlas_transport::NetworkIdentityType::GameServer,
        "cartograph" => atlas_transport::NetworkIdentityType::Cartograph,
        _ => return None,
    };
    Some(match kind {
        atlas_transport::NetworkIdentityType::Invalid => NetworkIdentity::invalid(),
        atlas_transport::NetworkIdentityType::Shard => NetworkIdentity::make_shard(id),
        atlas_transport::NetworkIdentityType::WatchDog => NetworkIdentity::make_watchdog(),
        atlas_transport::NetworkIdentityType::GameClient => NetworkIdentity::make_game_client(id),
        atlas_transport::NetworkIdentityType::GameServer => NetworkIdentity::make_game_server(id),
        atlas_transport::NetworkIdentityType::Cartograph => NetworkIdentity::make_cartograph(),
    })
}

/// Backing storage for watchdog records and holder sets. Kept separate from
/// `PartitionStore` since it has a different key shape (TTL'd sets) and is
/// queried by an external probe process, not only by shards.
pub trait WatchdogStore: Send + Sync {
    fn upsert_record(&self, entity_id: u64, record: &ActiveTransferRecord) -> AtlasResult<()>;
    fn get_record(&self, entity_id: u64) -> AtlasResult<Option<ActiveTransferRecord>>;
    fn remove_record(&self, entity_id: u64) -> AtlasResult<()>;
    fn add_holder(&self, entity_id: u64, holder: NetworkIdentity, ttl: Duration) -> AtlasResult<()>;
    fn remove_holder(&self, entity_id: u64, holder: NetworkIdentity) -> AtlasResult<()>;
    fn get_holders(&self, entity_id: u64) -> AtlasResult<HashSet<NetworkIdentity>>;
    fn clear_holders(&self, entity_id: u64) -> AtlasResult<()>;
    fn all_records(&self) -> AtlasResult<Vec<(u64, ActiveTransferRecord)>>;
}

#[derive(Default)]
pub struct InMemoryWatchdogStore {
    inner: Mutex<InMemoryWatchdogState>,
}

#[derive(Default)]
struct InMemoryWatchdogState {
    records: HashMap<u64, ActiveTransferRecord>,
    holders: HashMap<u64, HashSet<NetworkIdentity>>,
}

impl InMemoryWatchdogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchdogStore for InMemoryWatchdogStore {
    fn upsert_record(&self, entity_id: u64, record: &ActiveTransferRecord) -> AtlasResult<()> {
        self.inner.lock().records.insert(entity_id, record.clone());
        Ok(())
    }

    fn get_record(&self, entity_id: u64) -> AtlasResult<Option<ActiveTransferRecord>> {
        Ok(self.inner.lock().records.get(&entity_id).cloned())
    }

    fn remove_record(&self, entity_id: u64) -> AtlasResult<()> {
        self.inner.lock().records.remove(&entity_id);
        Ok(())
    }

    fn add_holder(&self, entity_id: u64, holder: NetworkIdentity, _ttl: Duration) -> AtlasResult<()> {
        self.inner.lock().holders.entry(entity_id).or_default().insert(holder);
        Ok(())
    }

    fn remove_holder(&self, entity_id: u64, holder: NetworkIdentity) -> AtlasResult<()> {
        if let Some(set) = self.inner.lock().holders.get_mut(&entity_id) {
            set.remove(&holder);
        }
        Ok(())
    }

    fn get_holders(&self, entity_id: u64) -> AtlasResult<HashSet<NetworkIdentity>> {
        Ok(self.inner.lock().holders.get(&entity_id).cloned().unwrap_or_default())
    }

    fn clear_holders(&self, entity_id: u64) -> AtlasResult<()> {
        self.inner.lock().holders.remove(&entity_id);
        Ok(())
    }

    fn all_records(&self) -> AtlasResult<Vec<(u64, ActiveTransferRecord)>> {
        Ok(self.inner.lock().records.iter().map(|(k, v)| (*k, v.clone())).collect())
    }
}

/// A flagged discrepancy: two shards both claim an entity, or a commit was
/// lost (the external probe's job, per §4.8 — observe-only, no auto-repair).
#[derive(Debug, Clone)]
pub struct Discrepancy {
    pub entity_id: u64,
    pub record: ActiveTransferRecord,
}

pub struct TransferWatchdog {
    store: std::sync::Arc<dyn WatchdogStore>,
    holder_ttl: Duration,
}

impl TransferWatchdog {
    pub fn new(store: std::sync::Arc<dyn WatchdogStore>, holder_ttl: Duration) -> Self {
        Self { store, holder_ttl }
    }

    pub fn mark_transfer_started(
        &self,
        entity_id: u64,
        source: NetworkIdentity,
        target: NetworkIdentity,
        transfer_time_us: u64,
        now_us: u64,
    ) -> AtlasResult<()> {
        self.store.upsert_record(
            entity_id,
            &ActiveTransferRecord {
                source,
                target,
                transfer_time_us,
                last_authority: source,
                state: TransferState::Started,
                updated_at_us: now_us,
            },
        )?;
        self.store.add_holder(entity_id, source, self.holder_ttl)?;
        Ok(())
    }

    pub fn mark_incoming_adopted(
        &self,
        entity_id: u64,
        source: NetworkIdentity,
        target: NetworkIdentity,
        transfer_time_us: u64,
        now_us: u64,
    ) -> AtlasResult<()> {
        self.store.upsert_record(
            entity_id,
            &ActiveTransferRecord {
                source,
                target,
                transfer_time_us,
                last_authority: target,
                state: TransferState::Adopted,
                updated_at_us: now_us,
            },
        )?;
        self.store.add_holder(entity_id, target, self.holder_ttl)?;
        let holders = self.store.get_holders(entity_id)?;
        if holders.len() == 1 && holders.contains(&target) {
            self.clear_transfer(entity_id)?;
        }
        Ok(())
    }

    pub fn mark_outgoing_committed(
        &self,
        entity_id: u64,
        source: NetworkIdentity,
        target: NetworkIdentity,
        now_us: u64,
    ) -> AtlasResult<()> {
        if let Some(mut record) = self.store.get_record(entity_id)? {
            record.last_authority = target;
            record.state = TransferState::Committed;
            record.updated_at_us = now_us;
            self.store.upsert_record(entity_id, &record)?;
        }
        self.store.remove_holder(entity_id, source)?;
        let holders = self.store.get_holders(entity_id)?;
        if holders.len() == 1 && holders.contains(&target) {
            self.clear_transfer(entity_id)?;
        }
        Ok(())
    }

    pub fn mark_transfer_canceled(&self, entity_id: u64) -> AtlasResult<()> {
        self.clear_transfer(entity_id)
    }

    pub fn clear_transfer(&self, entity_id: u64) -> AtlasResult<()> {
        self.store.remove_record(entity_id)?;
        self.store.clear_holders(entity_id)
    }

    pub fn holders(&self, entity_id: u64) -> AtlasResult<HashSet<NetworkIdentity>> {
        self.store.get_holders(entity_id)
    }

    /// External-probe entry point: flags any active record whose
    /// `updated_at_us` is older than `threshold_us` relative to `now_us`.
    pub fn detect_discrepancies(&self, now_us: u64, threshold_us: u64) -> AtlasResult<Vec<Discrepancy>> {
        let mut out = Vec::new();
        for (entity_id, record) in self.store.all_records()? {
            if now_us.saturating_sub(record.updated_at_us) > threshold_us {
                warn!("entity {entity_id} transfer record stale by more than {threshold_us}us");
                out.push(Discrepancy { entity_id, record });
            }
        }
        Ok(out)
    }
}

pub fn parse_record_line(line: &str) -> AtlasResult<ActiveTransferRecord> {
    ActiveTransferRecord::from_line(line)
        .ok_or_else(|| AtlasError::MalformedRecord { reason: format!("expected 6 tab-separated fields: {line}") })
}

pub fn record_to_line(record: &ActiveTransferRecord) -> String {
    record.to_line()
}

pub const TRANSFER_ACTIVE_HASH_KEY: &str = TRANSFER_ACTIVE_HASH;
pub const HOLDER_SET_KEY_PREFIX: &str = HOLDER_SET_PREFIX;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn watchdog() -> TransferWatchdog {
        TransferWatchdog::new(Arc::new(InMemoryWatchdogStore::new()), Duration::from_secs(30))
    }

    #[test]
    fn started_then_adopted_clears_once_source_drops_out() {
        let wd = watchdog();
        let source = NetworkIdentity::make_shard(Uuid::new_v4());
        let target = NetworkIdentity::make_shard(Uuid::new_v4());
        wd.mark_transfer_started(1, source, target, 1_000, 0).unwrap();
        assert_eq!(wd.holders(1).unwrap().len(), 1);
        wd.mark_incoming_adopted(1, source, target, 1_000, 500).unwrap();
        assert_eq!(wd.holders(1).unwrap().len(), 2);
        wd.mark_outgoing_committed(1, source, target, 1_000).unwrap();
        assert!(wd.holders(1).unwrap().is_empty());
        assert!(wd.store.get_record(1).is_ok());
    }

    #[test]
    fn record_line_round_trips() {
        let record = ActiveTransferRecord {
            source: NetworkIdentity::make_shard(Uuid::new_v4()),
            target: NetworkIdentity::make_shard(Uuid::new_v4()),
            transfer_time_us: 42,
            last_authority: NetworkIdentity::make_shard(Uuid::new_v4()),
            state: TransferState::Started,
            updated_at_us: 100,
        };
        let line = record_to_line(&record);
        assert_eq!(parse_record_line(&line).unwrap(), record);
    }

    #[test]
    fn malformed_record_line_is_rejected_not_panicked() {
        assert!(parse_record_line("too\tfew\tfields").is_err());
    }

    #[test]
    fn stale_record_is_flagged_as_discrepancy() {
        let wd = watchdog();
        let source = NetworkIdentity::make_shard(Uuid::new_v4());
        let target = NetworkIdentity::make_shard(Uuid::new_v4());
        wd.mark_transfer_started(1, source, target, 1_000, 0).unwrap();
        wd.mark_incoming_adopted(1, source, target, 1_000, 0).unwrap();
        let discrepancies = wd.detect_discrepancies(10_000_000, 5_000_000).unwrap();
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].entity_id, 1);
    }
}
