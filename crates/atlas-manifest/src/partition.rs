use std::sync::Arc;

use atlas_transport::{NetworkIdentity, Vec3};
use log::info;

use crate::error::{AtlasError, AtlasResult};
use crate::geometry::{Bound, BoundsID, Heuristic, HeuristicKind};
use crate::store::PartitionStore;

/// Persists the active partition heuristic, the pending bounds awaiting a
/// claim, and the claimed-bound-to-owner map. Every read hits the store
/// directly — the manifest never caches across calls, so multi-shard
/// agreement is entirely the store's consistency model (§4.1).
pub struct PartitionManifest {
    store: Arc<dyn PartitionStore>,
}

impl PartitionManifest {
    pub fn new(store: Arc<dyn PartitionStore>) -> Self {
        Self { store }
    }

    /// Overwrites the active heuristic and repopulates Pending from
    /// `heuristic.enumerate_bounds()`, clearing Claimed. Fails if any shard
    /// still holds a claim from the prior generation — callers must requeue
    /// everything first (§9's open question on generation swaps: undefined
    /// behavior otherwise, so this manifest refuses rather than guesses).
    pub fn push_heuristic(&self, heuristic: &dyn Heuristic) -> AtlasResult<()> {
        let outstanding = self.store.claimed_count()?;
        if outstanding > 0 {
            return Err(AtlasError::StaleClaimsOutstanding { stale_claims: outstanding });
        }
        let entries: Vec<(u32, Vec<u8>)> =
            heuristic.enumerate_bounds().iter().map(|b| (b.id.0, b.to_canonical_bytes())).collect();
        self.store.heuristic_type_set(heuristic.kind().as_str())?;
        self.store.heuristic_data_set(&heuristic.serialize())?;
        self.store.push_pending_and_clear_claimed(entries.clone())?;
        info!("published heuristic {:?} with {} pending bounds", heuristic.kind(), entries.len());
        Ok(())
    }

    /// Atomically claims a pending bound for `self_id`, or returns the claim
    /// `self_id` already holds (idempotent reclaim — Testable Property 4).
    pub fn claim_next_pending(&self, self_id: &NetworkIdentity) -> AtlasResult<Option<Bound>> {
        match self.store.claim_next_pending(self_id)? {
            Some(bytes) => {
                let bound = Bound::from_canonical_bytes(&bytes)?;
                info!("{self_id} claimed bound {}", bound.id.0);
                Ok(Some(bound))
            }
            None => Ok(None),
        }
    }

    /// Atomically moves `owner`'s claim back to Pending. `false` if `owner`
    /// held no claim.
    pub fn requeue_claimed(&self, owner: &NetworkIdentity) -> AtlasResult<bool> {
        let requeued = self.store.requeue_claimed(owner)?;
        if requeued {
            info!("{owner} requeued its claim back to pending");
        }
        Ok(requeued)
    }

    pub fn get_all_pending_bounds(&self) -> AtlasResult<Vec<Bound>> {
        self.store.pending_get_all()?.into_iter().map(|(_, bytes)| Bound::from_canonical_bytes(&bytes)).collect()
    }

    pub fn get_all_claimed_bounds(&self) -> AtlasResult<Vec<(NetworkIdentity, Bound)>> {
        self.store
            .claimed_get_all()?
            .into_iter()
            .map(|(identity, bytes)| Bound::from_canonical_bytes(&bytes).map(|b| (identity, b)))
            .collect()
    }

    /// Resolves a world position to the shard that currently owns the
    /// claimed bound containing it. `None` if the position lies in a pending
    /// (unclaimed) bound, outside all bounds, or the heuristic hasn't been
    /// published yet.
    pub fn shard_from_position(&self, heuristic: &dyn Heuristic, p: Vec3) -> AtlasResult<Option<NetworkIdentity>> {
        let bound = match heuristic.query_position(p) {
            Some(b) => b,
            None => return Ok(None),
        };
        self.shard_from_bound_id(bound.id)
    }

    pub fn shard_from_bound_id(&self, id: BoundsID) -> AtlasResult<Option<NetworkIdentity>> {
        for (owner, bound) in self.get_all_claimed_bounds()? {
            if bound.id == id {
                return Ok(Some(owner));
            }
        }
        Ok(None)
    }

    pub fn active_heuristic_kind(&self) -> AtlasResult<HeuristicKind> {
        match self.store.heuristic_type_get()? {
            Some(s) => Ok(HeuristicKind::from_str(&s)),
            None => Ok(HeuristicKind::None),
        }
    }

    pub fn active_heuristic_data(&self) -> AtlasResult<Vec<u8>> {
        self.store.heuristic_data_get()?.ok_or(AtlasError::NoActiveHeuristic)
    }
}
