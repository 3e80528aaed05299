/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Memoized reconstruction of [`Snapshot`]s.
//!
//! The snapshot after a block is reconstructed by walking back from the block to the nearest block
//! whose snapshot is already known, and then replaying the headers in between. A snapshot is known if:
//! 1. It is in the in-memory cache of recent snapshots, or
//! 2. Its block is a checkpoint (including genesis), since checkpoint headers list the full validator
//!    set and no votes survive a checkpoint.
//!
//! Every reconstructed snapshot is added to the cache, so that repeated queries for the same block
//! (e.g., from RPC polling) do not replay any headers.

use std::sync::Arc;

use crate::{
    chain::Chain,
    networking::recent_cache::RecentCache,
    types::{
        data_types::{BlockNumber, CryptoHash, EpochLength},
        validator_set::{ProposerPolicy, ValidatorSet},
    },
};

use super::snapshot::{Snapshot, SnapshotError};

pub struct SnapshotStore {
    epoch: EpochLength,
    proposer_policy: ProposerPolicy,
    recents: RecentCache<CryptoHash, Arc<Snapshot>>,
}

impl SnapshotStore {
    /// Create a store that caches at most `inmemory_snapshots` snapshots.
    pub fn new(
        epoch: EpochLength,
        proposer_policy: ProposerPolicy,
        inmemory_snapshots: usize,
    ) -> Self {
        Self {
            epoch,
            proposer_policy,
            recents: RecentCache::new(inmemory_snapshots),
        }
    }

    pub fn epoch(&self) -> EpochLength {
        self.epoch
    }

    /// Get the snapshot after the block with `number` and `hash`.
    pub fn snapshot<C: Chain>(
        &self,
        chain: &C,
        number: BlockNumber,
        hash: CryptoHash,
    ) -> Result<Arc<Snapshot>, SnapshotError> {
        let mut headers = Vec::new();
        let (mut number, mut hash) = (number, hash);

        let base = loop {
            if let Some(snap) = self.recents.get(&hash) {
                break snap;
            }

            let header = chain
                .header_by_hash(&hash)
                .ok_or(SnapshotError::UnknownAncestor)?;
            if header.number != number {
                return Err(SnapshotError::UnknownAncestor);
            }

            if self.epoch.is_checkpoint(number) {
                if header.extra.validators.is_empty() {
                    return Err(SnapshotError::EmptyCheckpointValidators(number));
                }
                let validator_set =
                    ValidatorSet::new(header.extra.validators.iter().copied(), self.proposer_policy);
                break Arc::new(Snapshot::new(self.epoch, number, hash, validator_set));
            }

            let parent = number.parent().ok_or(SnapshotError::UnknownAncestor)?;
            hash = header.parent_hash;
            number = parent;
            headers.push(header);
        };

        headers.reverse();
        let snap = if headers.is_empty() {
            base
        } else {
            log::trace!(
                "Replaying {} headers on top of the snapshot at block {}",
                headers.len(),
                base.number
            );
            Arc::new(base.apply(&headers)?)
        };

        self.recents.put(snap.hash, snap.clone());
        Ok(snap)
    }

    /// Get the snapshot after the parent of a block with `parent_hash` and `number`.
    pub fn parent_snapshot<C: Chain>(
        &self,
        chain: &C,
        number: BlockNumber,
        parent_hash: CryptoHash,
    ) -> Result<Arc<Snapshot>, SnapshotError> {
        let parent = number.parent().ok_or(SnapshotError::UnknownAncestor)?;
        self.snapshot(chain, parent, parent_hash)
    }

    /// Check whether the snapshot after the block with `hash` is in the cache.
    pub fn is_cached(&self, hash: &CryptoHash) -> bool {
        self.recents.contains(hash)
    }
}
