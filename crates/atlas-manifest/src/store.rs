use std::collections::HashMap;

use atlas_transport::NetworkIdentity;
use parking_lot::Mutex;

use crate::error::{AtlasError, AtlasResult};

const PENDING_HASH: &str = "{Heuristic_Bounds}:Pending";
const CLAIMED_NID2BOUND: &str = "{Heuristic_Bounds}:Claimed_NID2BID";
const HEURISTIC_TYPE_KEY: &str = "Heuristic_Type";
const HEURISTIC_DATA_KEY: &str = "Heuristic_Data";

/// Storage operations the PartitionManifest needs from the shared key-value
/// store. `claim_next_pending` and `requeue_claimed` are the two operations
/// that must be atomic across both the pending and claimed tables; everything
/// else is a plain read or single-key write.
///
/// Grounded on `AtlasNet/lib/Native/Heuristic/Database/HeuristicManifest.cpp`
/// from the original implementation: the pending table, claimed table, and
/// owner-reverse-lookup table are the same three key spaces that file
/// maintains, expressed here as three flat hashes instead of nested RedisJSON
/// paths (see SPEC_FULL.md §10.5).
pub trait PartitionStore: Send + Sync {
    fn heuristic_type_get(&self) -> AtlasResult<Option<String>>;
    fn heuristic_type_set(&self, kind: &str) -> AtlasResult<()>;
    fn heuristic_data_get(&self) -> AtlasResult<Option<Vec<u8>>>;
    fn heuristic_data_set(&self, bytes: &[u8]) -> AtlasResult<()>;

    /// Overwrites Pending with exactly `entries` and clears Claimed. Not
    /// required to be atomic with reads that race it (callers drain claims
    /// first, per §9's open question on generation swaps).
    fn push_pending_and_clear_claimed(&self, entries: Vec<(u32, Vec<u8>)>) -> AtlasResult<()>;

    fn claimed_count(&self) -> AtlasResult<usize>;
    fn pending_get_all(&self) -> AtlasResult<Vec<(u32, Vec<u8>)>>;
    fn claimed_get_all(&self) -> AtlasResult<Vec<(NetworkIdentity, Vec<u8>)>>;

    /// Atomically: if `self_id` already owns a claim, returns it unchanged
    /// (idempotent reclaim). Otherwise picks one pending entry, moves it to
    /// Claimed under `self_id`, and returns it. `None` iff Pending was empty
    /// and `self_id` held no claim.
    fn claim_next_pending(&self, self_id: &NetworkIdentity) -> AtlasResult<Option<Vec<u8>>>;

    /// Atomically moves `owner`'s claim back to Pending keyed by the
    /// BoundsID recovered from the claim's own bytes. Returns `false` if
    /// `owner` held no claim.
    fn requeue_claimed(&self, owner: &NetworkIdentity) -> AtlasResult<bool>;
}

/// In-memory fake used by unit and property tests. Atomicity is provided by
/// a single mutex guarding both tables, which is sufficient to test the
/// claim/requeue *semantics* without standing up a real Redis instance.
#[derive(Default)]
pub struct InMemoryPartitionStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    heuristic_type: Option<String>,
    heuristic_data: Option<Vec<u8>>,
    pending: HashMap<u32, Vec<u8>>,
    claimed: HashMap<NetworkIdentity, Vec<u8>>,
}

impl InMemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartitionStore for InMemoryPartitionStore {
    fn heuristic_type_get(&self) -> AtlasResult<Option<String>> {
        Ok(self.inner.lock().heuristic_type.clone())
    }

    fn heuristic_type_set(&self, kind: &str) -> AtlasResult<()> {
        self.inner.lock().heuristic_type = Some(kind.to_string());
        Ok(())
    }

    fn heuristic_data_get(&self) -> AtlasResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().heuristic_data.clone())
    }

    fn heuristic_data_set(&self, bytes: &[u8]) -> AtlasResult<()> {
        self.inner.lock().heuristic_data = Some(bytes.to_vec());
        Ok(())
    }

    fn push_pending_and_clear_claimed(&self, entries: Vec<(u32, Vec<u8>)>) -> AtlasResult<()> {
        let mut guard = self.inner.lock();
        guard.pending = entries.into_iter().collect();
        guard.claimed.clear();
        Ok(())
    }

    fn claimed_count(&self) -> AtlasResult<usize> {
        Ok(self.inner.lock().claimed.len())
    }

    fn pending_get_all(&self) -> AtlasResult<Vec<(u32, Vec<u8>)>> {
        Ok(self.inner.lock().pending.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn claimed_get_all(&self) -> AtlasResult<Vec<(NetworkIdentity, Vec<u8>)>> {
        Ok(self.inner.lock().claimed.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn claim_next_pending(&self, self_id: &NetworkIdentity) -> AtlasResult<Option<Vec<u8>>> {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.claimed.get(self_id) {
            return Ok(Some(existing.clone()));
        }
        let next_key = match guard.pending.keys().min().copied() {
            Some(k) => k,
            None => return Ok(None),
        };
        let bound_bytes = guard.pending.remove(&next_key).expect("key just read from the map");
        guard.claimed.insert(*self_id, bound_bytes.clone());
        Ok(Some(bound_bytes))
    }

    fn requeue_claimed(&self, owner: &NetworkIdentity) -> AtlasResult<bool> {
        let mut guard = self.inner.lock();
        let bound_bytes = match guard.claimed.remove(owner) {
            Some(b) => b,
            None => return Ok(false),
        };
        let id = crate::geometry::Bound::id_from_canonical_bytes(&bound_bytes)?;
        guard.pending.insert(id.0, bound_bytes);
        Ok(true)
    }
}

/// Redis-backed store. Uses plain hash commands plus a Lua `EVAL` script for
/// the two cross-table atomic operations, matching the technology (though
/// not the RedisJSON document layout) of the original implementation's
/// `HeuristicManifest.cpp`.
#[cfg(feature = "redis-backend")]
const MAX_STORE_ATTEMPTS: u32 = 3;
#[cfg(feature = "redis-backend")]
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(20);

#[cfg(feature = "redis-backend")]
pub struct RedisPartitionStore {
    client: redis::Client,
}

#[cfg(feature = "redis-backend")]
impl RedisPartitionStore {
    pub fn connect(url: &str) -> AtlasResult<Self> {
        let client = redis::Client::open(url).map_err(|e| AtlasError::Store(e.to_string()))?;
        Ok(Self { client })
    }

    fn conn(&self) -> AtlasResult<redis::Connection> {
        self.client.get_connection().map_err(|e| AtlasError::Store(e.to_string()))
    }

    /// Retries `op` up to `MAX_STORE_ATTEMPTS` times when the underlying
    /// redis error looks transient (timeout, dropped connection, I/O), with
    /// a fixed backoff between attempts. Exhausting retries on a transient
    /// error raises `StoreTimeout` instead of the raw redis message, since by
    /// then the specific message is less useful than the attempt count.
    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T, redis::RedisError>) -> AtlasResult<T> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempts < MAX_STORE_ATTEMPTS && is_transient(&err) => {
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(err) if is_transient(&err) => return Err(AtlasError::StoreTimeout { attempts }),
                Err(err) => return Err(AtlasError::Store(err.to_string())),
            }
        }
    }
}

#[cfg(feature = "redis-backend")]
fn is_transient(err: &redis::RedisError) -> bool {
    err.is_timeout() || err.is_connection_dropped() || err.is_io_error()
}

/// Lua script for `claim_next_pending`. `KEYS[1]` = pending hash, `KEYS[2]` =
/// claimed hash. `ARGV[1]` = canonical owner identity string.
///
/// Unlike the original `ClaimNextPendingBound` script, this one checks for an
/// existing claim by the caller first (idempotent reclaim), per the
/// distilled spec's explicit invariant — see SPEC_FULL.md §10.5 for why this
/// diverges from the original source.
#[cfg(feature = "redis-backend")]
const CLAIM_NEXT_PENDING_SCRIPT: &str = r#"
local existing = redis.call('HGET', KEYS[2], ARGV[1])
if existing then
    return existing
end
local keys = redis.call('HKEYS', KEYS[1])
if #keys == 0 then
    return false
end
table.sort(keys)
local field = keys[1]
local value = redis.call('HGET', KEYS[1], field)
redis.call('HSET', KEYS[2], ARGV[1], value)
redis.call('HDEL', KEYS[1], field)
return value
"#;

/// Lua script for `requeue_claimed`. `KEYS[1]` = claimed hash, `KEYS[2]` =
/// pending hash. `ARGV[1]` = canonical owner identity string, `ARGV[2]` =
/// BoundsID recovered client-side from the claimed bytes (passed in rather
/// than parsed in Lua, since the id is already known before the call).
#[cfg(feature = "redis-backend")]
const REQUEUE_CLAIMED_SCRIPT: &str = r#"
local value = redis.call('HGET', KEYS[1], ARGV[1])
if not value then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[2], value)
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
"#;

#[cfg(feature = "redis-backend")]
impl PartitionStore for RedisPartitionStore {
    fn heuristic_type_get(&self) -> AtlasResult<Option<String>> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry(|| conn.get(HEURISTIC_TYPE_KEY))
    }

    fn heuristic_type_set(&self, kind: &str) -> AtlasResult<()> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry(|| conn.set(HEURISTIC_TYPE_KEY, kind))
    }

    fn heuristic_data_get(&self) -> AtlasResult<Option<Vec<u8>>> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry(|| conn.get(HEURISTIC_DATA_KEY))
    }

    fn heuristic_data_set(&self, bytes: &[u8]) -> AtlasResult<()> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry(|| conn.set(HEURISTIC_DATA_KEY, bytes))
    }

    fn push_pending_and_clear_claimed(&self, entries: Vec<(u32, Vec<u8>)>) -> AtlasResult<()> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry::<()>(|| redis::pipe().del(PENDING_HASH).del(CLAIMED_NID2BOUND).query(&mut conn))?;
        for (id, bytes) in entries {
            self.with_retry::<()>(|| conn.hset(PENDING_HASH, id, &bytes))?;
        }
        Ok(())
    }

    fn claimed_count(&self) -> AtlasResult<usize> {
        use redis::Commands;
        let mut conn = self.conn()?;
        self.with_retry(|| conn.hlen(CLAIMED_NID2BOUND))
    }

    fn pending_get_all(&self) -> AtlasResult<Vec<(u32, Vec<u8>)>> {
        use redis::Commands;
        let mut conn = self.conn()?;
        let map: HashMap<u32, Vec<u8>> = self.with_retry(|| conn.hgetall(PENDING_HASH))?;
        Ok(map.into_iter().collect())
    }

    fn claimed_get_all(&self) -> AtlasResult<Vec<(NetworkIdentity, Vec<u8>)>> {
        use redis::Commands;
        let mut conn = self.conn()?;
        let map: HashMap<String, Vec<u8>> = self.with_retry(|| conn.hgetall(CLAIMED_NID2BOUND))?;
        let mut out = Vec::with_capacity(map.len());
        for (hex_key, bytes) in map {
            if let Some(identity) = decode_identity_field(&hex_key) {
                out.push((identity, bytes));
            }
        }
        Ok(out)
    }

    fn claim_next_pending(&self, self_id: &NetworkIdentity) -> AtlasResult<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        let script = redis::Script::new(CLAIM_NEXT_PENDING_SCRIPT);
        let owner_field = encode_identity_field(self_id);
        self.with_retry(|| {
            script.key(PENDING_HASH).key(CLAIMED_NID2BOUND).arg(&owner_field).invoke(&mut conn)
        })
    }

    fn requeue_claimed(&self, owner: &NetworkIdentity) -> AtlasResult<bool> {
        let mut conn = self.conn()?;
        let owner_field = encode_identity_field(owner);
        let existing: Option<Vec<u8>> = {
            use redis::Commands;
            self.with_retry(|| conn.hget(CLAIMED_NID2BOUND, &owner_field))?
        };
        let id = match &existing {
            Some(bytes) => crate::geometry::Bound::id_from_canonical_bytes(bytes)?.0,
            None => return Ok(false),
        };
        let script = redis::Script::new(REQUEUE_CLAIMED_SCRIPT);
        let applied: i64 = self.with_retry(|| {
            script.key(CLAIMED_NID2BOUND).key(PENDING_HASH).arg(&owner_field).arg(id).invoke(&mut conn)
        })?;
        Ok(applied == 1)
    }
}

/// Claimed-table keys are hex-encoded `NetworkIdentity::serialize` bytes
/// rather than the canonical display string, so the reverse lookup needs no
/// string parser — just the existing wire codec.
#[cfg(feature = "redis-backend")]
fn encode_identity_field(id: &NetworkIdentity) -> String {
    let mut buf = Vec::new();
    id.serialize(&mut buf);
    hex::encode(buf)
}

#[cfg(feature = "redis-backend")]
fn decode_identity_field(field: &str) -> Option<NetworkIdentity> {
    let bytes = hex::decode(field).ok()?;
    let mut cursor = 0;
    NetworkIdentity::deserialize(&bytes, &mut cursor).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn identity() -> NetworkIdentity {
        NetworkIdentity::make_shard(Uuid::new_v4())
    }

    #[test]
    fn claim_is_idempotent_for_the_same_owner() {
        let store = InMemoryPartitionStore::new();
        store.push_pending_and_clear_claimed(vec![(1, vec![1, 0, 0, 0])]).unwrap();
        let id = identity();
        let first = store.claim_next_pending(&id).unwrap();
        let second = store.claim_next_pending(&id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn claim_returns_none_when_pending_is_empty() {
        let store = InMemoryPartitionStore::new();
        assert!(store.claim_next_pending(&identity()).unwrap().is_none());
    }

    #[test]
    fn requeue_moves_claim_back_to_pending_by_recovered_id() {
        let store = InMemoryPartitionStore::new();
        let bound = crate::geometry::Bound {
            id: crate::geometry::BoundsID(3),
            min: atlas_transport::Vec3::ZERO,
            max: atlas_transport::Vec3::ZERO,
            cells: vec![],
        };
        store
            .push_pending_and_clear_claimed(vec![(3, bound.to_canonical_bytes())])
            .unwrap();
        let id = identity();
        store.claim_next_pending(&id).unwrap();
        assert_eq!(store.claimed_count().unwrap(), 1);
        assert!(store.requeue_claimed(&id).unwrap());
        assert_eq!(store.claimed_count().unwrap(), 0);
        let pending = store.pending_get_all().unwrap();
        assert_eq!(pending[0].0, 3);
    }

    #[test]
    fn requeue_is_false_when_owner_has_no_claim() {
        let store = InMemoryPartitionStore::new();
        assert!(!store.requeue_claimed(&identity()).unwrap());
    }

    proptest! {
        /// Property 4: claiming repeatedly for the same owner, interleaved
        /// with claims from other owners, always returns the exact bytes
        /// first handed to that owner — reclaiming never mutates or drops it.
        #[test]
        fn claim_next_pending_is_idempotent_per_owner(pending_count in 1u32..12, reclaim_rounds in 1u32..6) {
            let store = InMemoryPartitionStore::new();
            let entries: Vec<(u32, Vec<u8>)> = (0..pending_count).map(|i| (i, i.to_le_bytes().to_vec())).collect();
            store.push_pending_and_clear_claimed(entries).unwrap();
            let owner = identity();
            let first = store.claim_next_pending(&owner).unwrap();
            for _ in 0..reclaim_rounds {
                let other = identity();
                let _ = store.claim_next_pending(&other).unwrap();
                let again = store.claim_next_pending(&owner).unwrap();
                prop_assert_eq!(&again, &first);
            }
        }
    }
}
