/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Engine`] trait, the contract that every consensus engine of a node satisfies, and the header
//! verification rules of this engine.
//!
//! A node drives its consensus engine through a small number of calls: it asks the engine to
//! [`prepare`](Engine::prepare) a header for a block it is about to build, to [`seal`](Engine::seal)
//! the built block, to [`verify_header`](Engine::verify_header)s of blocks received from block sync, and
//! to [`author`](Engine::author) headers. [`Backend`](crate::backend::Backend) is this crate's
//! implementation.
//!
//! ## Header verification
//!
//! A header is valid if:
//! 1. It carries the [`ISTANBUL_DIGEST`] marker.
//! 2. Its parent is in the chain, its number is the parent's plus one, and its timestamp is not earlier
//!    than the parent's.
//! 3. If it is a checkpoint, it carries no vote and lists exactly the validators of the parent's
//!    snapshot. Otherwise, it lists no validators.
//! 4. It is sealed by a validator of the parent's snapshot.
//! 5. If committed seals are checked, it carries committed seals from at least a quorum of distinct
//!    validators of the parent's snapshot, and from no one else.

use std::collections::HashSet;

use crate::{
    chain::Chain,
    governance::{snapshot::SnapshotError, snapshot_store::SnapshotStore},
    types::{
        block::{Block, Header, ISTANBUL_DIGEST},
        data_types::Address,
    },
};

/// Methods a consensus engine exposes to the node that runs it.
pub trait Engine {
    /// The query surface that the engine exposes to the node's RPC layer.
    type Api;

    /// Get the address of the validator that sealed `header`.
    fn author(&self, header: &Header) -> Result<Address, EngineError>;

    /// Check that `header`, including its committed seals, is valid.
    fn verify_header(&self, header: &Header) -> Result<(), EngineError>;

    /// Fill in the consensus fields of a header that the node is about to build a block on: the
    /// marker, the vote or the checkpoint validator list, and empty seals. `header.number` and
    /// `header.parent_hash` must already be set.
    fn prepare(&self, header: &mut Header) -> Result<(), EngineError>;

    /// Seal `block` with this replica's proposer seal and hand it to consensus. The block is appended
    /// to the chain once consensus finalizes it.
    fn seal(&self, block: Block) -> Result<(), EngineError>;

    /// Get the engine's query surface.
    fn apis(&self) -> Self::Api;

    /// Stop the engine. Subsequent calls that need a running engine fail with
    /// [`EngineError::StoppedEngine`].
    fn close(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The header lists validators but is not a checkpoint.
    InvalidExtra,
    /// The header does not carry [`ISTANBUL_DIGEST`].
    MissingMarker,
    /// The header has no proposer seal, or its proposer seal is malformed.
    InvalidProposerSeal,
    /// The header was sealed by someone who is not a validator.
    UnauthorizedProposer(Address),
    InsufficientCommittedSeals { required: usize, found: usize },
    /// A committed seal is malformed, duplicated, or from someone who is not a validator.
    InvalidCommittedSeal,
    /// A checkpoint header carries a vote.
    InvalidCheckpointVote,
    /// A checkpoint header does not list the validators of its parent's snapshot.
    MismatchingCheckpointValidators,
    /// The parent of the header is not in the chain.
    UnknownAncestor,
    /// The header's timestamp is earlier than its parent's.
    InvalidTimestamp,
    /// The block's data does not hash to the header's `data_hash`.
    InvalidDataHash,
    StoppedEngine,
    Snapshot(SnapshotError),
    /// Signing a header with this replica's key failed.
    Signing,
}

impl From<SnapshotError> for EngineError {
    fn from(value: SnapshotError) -> Self {
        EngineError::Snapshot(value)
    }
}

/// Check `header` against the rules in the [module docs](self).
pub(crate) fn verify_header<C: Chain>(
    chain: &C,
    snapshots: &SnapshotStore,
    header: &Header,
    check_committed_seals: bool,
) -> Result<(), EngineError> {
    if header.mix_digest != ISTANBUL_DIGEST {
        return Err(EngineError::MissingMarker);
    }

    // Genesis is trusted as is.
    let number = header.number;
    if number.int() == 0 {
        return Ok(());
    }

    let parent = chain
        .header_by_hash(&header.parent_hash)
        .ok_or(EngineError::UnknownAncestor)?;
    if parent.number + 1 != number {
        return Err(EngineError::UnknownAncestor);
    }
    if header.timestamp < parent.timestamp {
        return Err(EngineError::InvalidTimestamp);
    }

    let snap = snapshots.parent_snapshot(chain, number, header.parent_hash)?;

    if snapshots.epoch().is_checkpoint(number) {
        if header.vote.is_some() {
            return Err(EngineError::InvalidCheckpointVote);
        }
        if header.extra.validators != snap.validators() {
            return Err(EngineError::MismatchingCheckpointValidators);
        }
    } else if !header.extra.validators.is_empty() {
        return Err(EngineError::InvalidExtra);
    }

    let author = header
        .author()
        .map_err(|_| EngineError::InvalidProposerSeal)?;
    if !snap.validator_set.contains(&author) {
        return Err(EngineError::UnauthorizedProposer(author));
    }

    if check_committed_seals {
        let committers = header
            .committers()
            .map_err(|_| EngineError::InvalidCommittedSeal)?;
        let mut distinct = HashSet::new();
        for committer in committers {
            if !snap.validator_set.contains(&committer) || !distinct.insert(committer) {
                return Err(EngineError::InvalidCommittedSeal);
            }
        }

        let required = snap.validator_set.quorum();
        if distinct.len() < required {
            return Err(EngineError::InsufficientCommittedSeals {
                required,
                found: distinct.len(),
            });
        }
    }

    Ok(())
}

/// Check that `block` is a valid proposal on top of the chain: its data matches its header, and its
/// header is valid apart from the committed seals, which a proposal does not carry yet.
pub(crate) fn verify_proposal<C: Chain>(
    chain: &C,
    snapshots: &SnapshotStore,
    block: &Block,
) -> Result<(), EngineError> {
    if !block.is_correct() {
        return Err(EngineError::InvalidDataHash);
    }
    verify_header(chain, snapshots, &block.header, false)
}
