/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the block and block header types, and the hashes that are computed from them.
//!
//! ## Seals
//!
//! A block produced by this engine carries two kinds of signatures in its [`IstanbulExtra`]:
//! 1. The **proposer seal**: the proposer's signature over [`Header::seal_hash`], which excludes all
//!    seals. The author of a block is recovered from it.
//! 2. The **committed seals**: every committing validator's signature over
//!    [`committed_seal_digest`]`(header.hash())`. A block is final when it carries a quorum of them.
//!
//! [`Header::hash`] includes the proposer seal but excludes the committed seals, so the hash that
//! validators agree on does not change when the committed seals are attached.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{keccak256, recover_address, SignatureError},
    data_types::{Address, BlockNumber, CryptoHash, SignatureBytes},
};

/// Marker placed in [`Header::mix_digest`] to identify blocks sealed by this engine.
pub const ISTANBUL_DIGEST: CryptoHash = CryptoHash::new(*b"ctical byzantine fault tolerance");

/// Byte appended to a block hash before signing it as a committed seal. Equal to the wire code of
/// a Commit message.
pub const COMMIT_SEAL_CODE: u8 = 2;

/// A governance vote carried by a header, cast by the header's author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct HeaderVote {
    /// The validator to be added or removed.
    pub target: Address,
    /// `true` to add `target` to the validator set, `false` to remove it.
    pub authorize: bool,
}

/// Consensus-specific data carried by every header.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IstanbulExtra {
    /// The full validator set. Only non-empty in checkpoint headers (including genesis).
    pub validators: Vec<Address>,
    pub proposer_seal: Option<SignatureBytes>,
    pub committed_seals: Vec<SignatureBytes>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub parent_hash: CryptoHash,
    pub number: BlockNumber,
    pub timestamp: u64,
    /// Must be [`ISTANBUL_DIGEST`].
    pub mix_digest: CryptoHash,
    pub data_hash: CryptoHash,
    /// Must be `None` in checkpoint headers.
    pub vote: Option<HeaderVote>,
    pub extra: IstanbulExtra,
}

impl Header {
    /// Create the genesis header, which lists `validators` and carries no seals.
    pub fn genesis(validators: Vec<Address>, timestamp: u64) -> Header {
        Header {
            parent_hash: CryptoHash::zero(),
            number: BlockNumber::new(0),
            timestamp,
            mix_digest: ISTANBUL_DIGEST,
            data_hash: keccak256(&[]),
            vote: None,
            extra: IstanbulExtra {
                validators,
                proposer_seal: None,
                committed_seals: Vec::new(),
            },
        }
    }

    /// Get the hash that identifies this header. Includes the proposer seal but not the committed
    /// seals.
    pub fn hash(&self) -> CryptoHash {
        let mut filtered = self.clone();
        filtered.extra.committed_seals.clear();
        hash_of(&filtered)
    }

    /// Get the digest that the proposer signs to produce the proposer seal. Excludes every seal.
    pub fn seal_hash(&self) -> CryptoHash {
        let mut filtered = self.clone();
        filtered.extra.proposer_seal = None;
        filtered.extra.committed_seals.clear();
        hash_of(&filtered)
    }

    /// Recover the address of the proposer that sealed this header. Fails if the header carries no
    /// proposer seal, or if the seal is malformed.
    pub fn author(&self) -> Result<Address, SignatureError> {
        let proposer_seal = self.extra.proposer_seal.ok_or_else(SignatureError::new)?;
        recover_address(&self.seal_hash(), &proposer_seal)
    }

    /// Recover the addresses of the validators whose committed seals this header carries, in the order
    /// the seals appear.
    pub fn committers(&self) -> Result<Vec<Address>, SignatureError> {
        let digest = committed_seal_digest(&self.hash());
        self.extra
            .committed_seals
            .iter()
            .map(|seal| recover_address(&digest, seal))
            .collect()
    }

    /// Check whether this header carries the marker of this engine.
    pub fn is_istanbul(&self) -> bool {
        self.mix_digest == ISTANBUL_DIGEST
    }
}

/// A proposal: a header and the opaque payload it commits to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Block {
    /// Create a block, filling `header.data_hash` with the hash of `data`.
    pub fn new(mut header: Header, data: Vec<u8>) -> Block {
        header.data_hash = keccak256(&data);
        Block { header, data }
    }

    pub fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Checks that `header.data_hash` matches `data`.
    pub fn is_correct(&self) -> bool {
        self.header.data_hash == keccak256(&self.data)
    }
}

/// Get the digest that a validator signs to produce a committed seal for the block with `hash`.
pub fn committed_seal_digest(hash: &CryptoHash) -> CryptoHash {
    let mut bytes = hash.bytes().to_vec();
    bytes.push(COMMIT_SEAL_CODE);
    keccak256(&bytes)
}

/// Keccak-256 of the Borsh serialization of `value`.
pub(crate) fn hash_of<T: BorshSerialize>(value: &T) -> CryptoHash {
    let mut bytes = Vec::new();
    // Writing into a `Vec` cannot fail.
    let _ = value.serialize(&mut bytes);
    keccak256(&bytes)
}
