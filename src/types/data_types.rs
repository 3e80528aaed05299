/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::Add,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// 20-byte identity of a validator or any other signer.
///
/// An `Address` is the last 20 bytes of the Keccak-256 hash of the signer's uncompressed secp256k1
/// public key (without its `0x04` prefix). See
/// [`address_of`](super::crypto_primitives::address_of).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Address([u8; 20]);

impl Address {
    /// Create a new `Address` wrapping `bytes`.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 20]` value of this `Address`.
    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD.encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// 32-byte cryptographic hash.
///
/// Within this crate, every `CryptoHash` is a Keccak-256 digest, produced by
/// [`keccak256`](super::crypto_primitives::keccak256).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Recoverable secp256k1 signature.
///
/// The first 64 bytes are the `r || s` scalars, and the last byte is the recovery id, which allows the
/// signer's [`Address`] to be recovered from the signature and the signed digest alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes {
    rs: [u8; 64],
    recovery_id: u8,
}

impl SignatureBytes {
    /// Create a new `SignatureBytes` from its `r || s` bytes and its recovery id.
    pub const fn new(rs: [u8; 64], recovery_id: u8) -> Self {
        Self { rs, recovery_id }
    }

    /// The empty signature. Messages are signed with this in place of their real signature.
    pub const fn empty() -> Self {
        Self {
            rs: [0u8; 64],
            recovery_id: 0,
        }
    }

    /// Get the `r || s` bytes of this signature.
    pub const fn rs(&self) -> [u8; 64] {
        self.rs
    }

    /// Get the recovery id of this signature.
    pub const fn recovery_id(&self) -> u8 {
        self.recovery_id
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", STANDARD.encode(self.rs), self.recovery_id)
    }
}

/// Height of a block in the chain. The genesis block has number 0.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct BlockNumber(u64);

impl BlockNumber {
    /// Create a new `BlockNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the number of the parent of the block with this number, if it is not the genesis block.
    pub fn parent(&self) -> Option<BlockNumber> {
        self.0.checked_sub(1).map(BlockNumber)
    }
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockNumber {
    type Output = BlockNumber;

    fn add(self, rhs: u64) -> Self::Output {
        BlockNumber(self.0.add(rhs))
    }
}

/// Height of the block that is currently being agreed upon.
///
/// The sequence of a view is always the number of the chain's current head plus one.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Sequence(u64);

impl Sequence {
    /// Create a new `Sequence` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Sequence`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl From<BlockNumber> for Sequence {
    fn from(number: BlockNumber) -> Self {
        Sequence(number.int())
    }
}

impl From<Sequence> for BlockNumber {
    fn from(sequence: Sequence) -> Self {
        BlockNumber::new(sequence.int())
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Sequence {
    type Output = Sequence;

    fn add(self, rhs: u64) -> Self::Output {
        Sequence(self.0.add(rhs))
    }
}

/// Round number within a sequence. Starts at 0 and increases every time a round change happens.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `Round`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` value of this `Round`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the round after this one, or `None` if this is the last representable round.
    pub fn checked_next(&self) -> Option<Round> {
        self.0.checked_add(1).map(Round)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// One attempt to agree on one block height.
///
/// Views are ordered by sequence first and round second.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct View {
    pub sequence: Sequence,
    pub round: Round,
}

impl View {
    pub const fn new(sequence: Sequence, round: Round) -> Self {
        Self { sequence, round }
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.sequence, self.round)
    }
}

/// Number of blocks between two checkpoints.
///
/// A block whose number is a multiple of the epoch length is a checkpoint. Governance tallies are reset
/// at checkpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct EpochLength(u64);

impl EpochLength {
    /// Create a new `EpochLength` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `EpochLength`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Check whether the block with `number` is a checkpoint block.
    ///
    /// An epoch length of 0 is rejected at startup, but is treated here as "only genesis is a
    /// checkpoint".
    pub fn is_checkpoint(&self, number: BlockNumber) -> bool {
        if self.0 == 0 {
            return number.int() == 0;
        }
        number.int() % self.0 == 0
    }
}

impl Default for EpochLength {
    fn default() -> Self {
        Self(30000)
    }
}
