/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-only queries and governance calls, for the node's RPC layer.
//!
//! Block-scoped queries take an optional block number, where `None` stands for the head of the chain,
//! or a block hash. Queries about blocks that are not in the chain fail with
//! [`ApiError::UnknownBlock`].

use std::{collections::HashMap, sync::Arc};

use crate::{
    chain::Chain,
    engine::EngineError,
    governance::{
        candidates::Candidates,
        snapshot::{Snapshot, SnapshotError},
        snapshot_store::SnapshotStore,
    },
    types::{
        block::Header,
        data_types::{Address, BlockNumber, CryptoHash},
    },
};

/// The query surface of a running engine. Cheap to clone.
#[derive(Clone)]
pub struct Api<C: Chain> {
    address: Address,
    chain: C,
    snapshots: Arc<SnapshotStore>,
    candidates: Candidates,
}

/// Who sealed and who committed a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSigners {
    pub number: BlockNumber,
    pub hash: CryptoHash,
    /// `None` for blocks without a proposer seal, i.e., genesis.
    pub author: Option<Address>,
    /// The validators whose committed seals the block carries, in the order the seals appear.
    pub committers: Vec<Address>,
}

impl<C: Chain> Api<C> {
    pub(crate) fn new(
        address: Address,
        chain: C,
        snapshots: Arc<SnapshotStore>,
        candidates: Candidates,
    ) -> Self {
        Self {
            address,
            chain,
            snapshots,
            candidates,
        }
    }

    /// Get the address that this replica signs consensus messages and seals blocks with.
    pub fn node_address(&self) -> Address {
        self.address
    }

    /// Get the signers of the block with `number`, or of the head of the chain if `number` is `None`.
    pub fn signers_from_block(
        &self,
        number: Option<BlockNumber>,
    ) -> Result<BlockSigners, ApiError> {
        let header = self.header_by_number(number)?;
        signers_of(&header)
    }

    /// Get the signers of the block with `hash`.
    pub fn signers_from_block_by_hash(&self, hash: &CryptoHash) -> Result<BlockSigners, ApiError> {
        let header = self
            .chain
            .header_by_hash(hash)
            .ok_or(ApiError::UnknownBlock)?;
        signers_of(&header)
    }

    /// Get the snapshot after the block with `number`, or after the head of the chain if `number` is
    /// `None`.
    pub fn snapshot(&self, number: Option<BlockNumber>) -> Result<Arc<Snapshot>, ApiError> {
        let header = self.header_by_number(number)?;
        Ok(self
            .snapshots
            .snapshot(&self.chain, header.number, header.hash())?)
    }

    /// Get the snapshot after the block with `hash`.
    pub fn snapshot_at_hash(&self, hash: &CryptoHash) -> Result<Arc<Snapshot>, ApiError> {
        let header = self
            .chain
            .header_by_hash(hash)
            .ok_or(ApiError::UnknownBlock)?;
        Ok(self
            .snapshots
            .snapshot(&self.chain, header.number, *hash)?)
    }

    /// Get the validators after the block with `number`, or after the head of the chain if `number` is
    /// `None`.
    pub fn validators(&self, number: Option<BlockNumber>) -> Result<Vec<Address>, ApiError> {
        Ok(self.snapshot(number)?.validators())
    }

    /// Get the validators after the block with `hash`.
    pub fn validators_at_hash(&self, hash: &CryptoHash) -> Result<Vec<Address>, ApiError> {
        Ok(self.snapshot_at_hash(hash)?.validators())
    }

    /// Get the validators this replica currently votes to add (`true`) or remove (`false`).
    pub fn candidates(&self) -> HashMap<Address, bool> {
        self.candidates.get_all()
    }

    /// Start voting to add (`authorize = true`) or remove `address` in the headers this replica seals.
    pub fn propose(&self, address: Address, authorize: bool) {
        self.candidates.propose(address, authorize)
    }

    /// Stop voting on `address`.
    pub fn discard(&self, address: &Address) {
        self.candidates.discard(address)
    }

    fn header_by_number(&self, number: Option<BlockNumber>) -> Result<Header, ApiError> {
        match number {
            None => Ok(self.chain.current_header()),
            Some(number) => self
                .chain
                .header_by_number(number)
                .ok_or(ApiError::UnknownBlock),
        }
    }
}

fn signers_of(header: &Header) -> Result<BlockSigners, ApiError> {
    let author = match header.extra.proposer_seal {
        None => None,
        Some(_) => Some(
            header
                .author()
                .map_err(|_| EngineError::InvalidProposerSeal)?,
        ),
    };
    let committers = header
        .committers()
        .map_err(|_| EngineError::InvalidCommittedSeal)?;

    Ok(BlockSigners {
        number: header.number,
        hash: header.hash(),
        author,
        committers,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The chain contains no block with the requested number or hash.
    UnknownBlock,
    Snapshot(SnapshotError),
    Engine(EngineError),
}

impl From<SnapshotError> for ApiError {
    fn from(value: SnapshotError) -> Self {
        ApiError::Snapshot(value)
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        ApiError::Engine(value)
    }
}
