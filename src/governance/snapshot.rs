/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Point-in-time reconstruction of the validator set and of the governance votes pending on it.
//!
//! ## Voting
//!
//! Every non-checkpoint header may carry one [`HeaderVote`], cast by the header's author, to add a
//! validator (`authorize = true`) or to remove one (`authorize = false`). Applying a header to a
//! snapshot:
//! 1. Resets every tally, if the header is a checkpoint.
//! 2. Replaces the author's earlier vote on the same target, if any, with the new vote.
//! 3. Counts the vote, if it is meaningful: authorizing a non-member, or removing a member.
//! 4. Applies the vote, if its target's tally has reached the validator set's quorum: the target is
//!    added or removed, votes on the target are discarded, and if the target was removed, so are the
//!    votes it cast.

use std::collections::HashMap;

use crate::types::{
    block::Header,
    data_types::{Address, BlockNumber, CryptoHash, EpochLength},
    validator_set::ValidatorSet,
};

/// A counted vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vote {
    /// The author of the header that carried the vote.
    pub signer: Address,
    /// The number of the header that carried the vote.
    pub block: BlockNumber,
    pub target: Address,
    pub authorize: bool,
}

/// Votes counted so far on one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    pub authorize: bool,
    pub votes: usize,
}

/// The validator set and pending votes after the block with `number` and `hash`.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub epoch: EpochLength,
    pub number: BlockNumber,
    pub hash: CryptoHash,
    /// Counted votes, in chronological order.
    pub votes: Vec<Vote>,
    pub tally: HashMap<Address, Tally>,
    pub validator_set: ValidatorSet,
}

impl Snapshot {
    /// Create a snapshot with no pending votes.
    pub fn new(
        epoch: EpochLength,
        number: BlockNumber,
        hash: CryptoHash,
        validator_set: ValidatorSet,
    ) -> Self {
        Self {
            epoch,
            number,
            hash,
            votes: Vec::new(),
            tally: HashMap::new(),
            validator_set,
        }
    }

    /// Get the validators' addresses in ascending order.
    pub fn validators(&self) -> Vec<Address> {
        self.validator_set.to_vec()
    }

    /// Check whether a vote on `target` would change anything: authorizing a non-member, or removing a
    /// member.
    pub fn check_vote(&self, target: &Address, authorize: bool) -> bool {
        self.validator_set.contains(target) != authorize
    }

    /// Get the number of votes currently counted for `target`.
    pub fn tally_of(&self, target: &Address) -> usize {
        self.tally.get(target).map_or(0, |tally| tally.votes)
    }

    // Count a vote. Returns false if the vote is not meaningful.
    fn cast(&mut self, target: Address, authorize: bool) -> bool {
        if !self.check_vote(&target, authorize) {
            return false;
        }
        self.tally
            .entry(target)
            .and_modify(|tally| tally.votes += 1)
            .or_insert(Tally {
                authorize,
                votes: 1,
            });
        true
    }

    // Stop counting a vote.
    fn uncast(&mut self, target: &Address, authorize: bool) -> bool {
        match self.tally.get_mut(target) {
            Some(tally) if tally.authorize == authorize => {
                if tally.votes > 1 {
                    tally.votes -= 1;
                } else {
                    self.tally.remove(target);
                }
                true
            }
            _ => false,
        }
    }

    /// Create a new snapshot by applying `headers` on top of this one. `headers` must be the
    /// consecutive blocks that follow this snapshot's block, in ascending order.
    pub(crate) fn apply(&self, headers: &[Header]) -> Result<Snapshot, SnapshotError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }

        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 || pair[1].parent_hash != pair[0].hash() {
                return Err(SnapshotError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 || headers[0].parent_hash != self.hash {
            return Err(SnapshotError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;
            if snap.epoch.is_checkpoint(number) {
                snap.votes.clear();
                snap.tally.clear();
            }

            let signer = header
                .author()
                .map_err(|_| SnapshotError::InvalidSignature(number))?;
            if !snap.validator_set.contains(&signer) {
                return Err(SnapshotError::UnauthorizedValidator(signer));
            }

            let vote = match header.vote {
                Some(vote) if !snap.epoch.is_checkpoint(number) => vote,
                _ => continue,
            };

            // Only one vote per signer and target is counted.
            if let Some(pos) = snap
                .votes
                .iter()
                .position(|v| v.signer == signer && v.target == vote.target)
            {
                let old = snap.votes.remove(pos);
                snap.uncast(&old.target, old.authorize);
            }

            if snap.cast(vote.target, vote.authorize) {
                snap.votes.push(Vote {
                    signer,
                    block: number,
                    target: vote.target,
                    authorize: vote.authorize,
                });
            }

            let passed = snap
                .tally
                .get(&vote.target)
                .filter(|tally| tally.votes >= snap.validator_set.quorum())
                .copied();
            if let Some(tally) = passed {
                if tally.authorize {
                    snap.validator_set.add(vote.target);
                } else {
                    snap.validator_set.remove(&vote.target);

                    let removed_votes: Vec<Vote> = snap
                        .votes
                        .iter()
                        .filter(|v| v.signer == vote.target)
                        .copied()
                        .collect();
                    for removed_vote in removed_votes {
                        snap.uncast(&removed_vote.target, removed_vote.authorize);
                    }
                    snap.votes.retain(|v| v.signer != vote.target);
                }

                snap.votes.retain(|v| v.target != vote.target);
                snap.tally.remove(&vote.target);
            }
        }

        if let Some(last) = headers.last() {
            snap.number = last.number;
            snap.hash = last.hash();
        }
        Ok(snap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// A header needed to reconstruct the snapshot is not in the chain.
    UnknownAncestor,
    /// A header was sealed by someone who was not a validator at the time.
    UnauthorizedValidator(Address),
    /// The headers to apply are not consecutive, or do not follow the snapshot.
    InvalidVotingChain,
    /// The proposer seal of the header with this number is missing or malformed.
    InvalidSignature(BlockNumber),
    /// A checkpoint header does not list any validators.
    EmptyCheckpointValidators(BlockNumber),
}
