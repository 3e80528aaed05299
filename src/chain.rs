/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Chain`] trait, through which the engine reads the chain and appends finalized blocks to it.
//!
//! Block execution and chain persistence are the library user's concern. The engine only needs to:
//! 1. Read headers, to replay governance votes and to find the last proposal and its proposer.
//! 2. Hand over blocks that have collected a quorum of committed seals.
//!
//! `Chain` is cloned into every thread that needs it, so implementations will usually be a handle to
//! storage that is shared between clones.

use crate::types::{
    block::{Block, Header},
    data_types::{BlockNumber, CryptoHash},
};

pub trait Chain: Clone + Send + Sync + 'static {
    /// Get the header of the head of the chain. The chain always contains at least the genesis block.
    fn current_header(&self) -> Header;

    /// Get the header of the block with `number`, if the chain contains one.
    fn header_by_number(&self, number: BlockNumber) -> Option<Header>;

    /// Get the header with `hash`, if the chain contains one.
    fn header_by_hash(&self, hash: &CryptoHash) -> Option<Header>;

    /// Append a finalized `block`, carrying its committed seals, to the chain.
    fn commit(&mut self, block: Block) -> Result<(), ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The block does not extend the head of the chain.
    NotExtendingHead,
    /// The block was rejected by block execution.
    Rejected(String),
}
