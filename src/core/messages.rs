/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the signed messages that validators exchange to agree on a block.
//!
//! ## Wire format
//!
//! Every consensus message travels as a [`ConsensusMessage`]: a [`MessageCode`], the Borsh encoding of
//! its inner payload ([`Preprepare`] or [`Subject`]), the sender's [`Address`], the sender's signature,
//! and, for Commit messages only, the sender's committed seal. The whole `ConsensusMessage` is in turn
//! Borsh-encoded to become the payload of an [`ISTANBUL_MSG`](crate::networking::messages::ISTANBUL_MSG)
//! peer-to-peer message.
//!
//! ## Signatures
//!
//! A message is signed by encoding it with [`SignatureBytes::empty`] in place of its signature, hashing
//! the encoding with Keccak-256, and signing the hash. Because signatures are recoverable, verifying a
//! message amounts to recovering the signer's address and comparing it with `address`.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::{committed_seal_digest, hash_of, Block},
    crypto_primitives::{recover_address, Keypair, SignatureError},
    data_types::{Address, CryptoHash, SignatureBytes, View},
};

/// Identifies the phase a [`ConsensusMessage`] belongs to.
///
/// The Borsh encoding of a `MessageCode` is its index in declaration order, so `Commit` is encoded as
/// [`COMMIT_SEAL_CODE`](crate::types::block::COMMIT_SEAL_CODE).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum MessageCode {
    Preprepare,
    Prepare,
    Commit,
    RoundChange,
}

/// Sent by the proposer of a view to propose a block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Preprepare {
    pub view: View,
    pub proposal: Block,
}

/// The payload of Prepare, Commit, and RoundChange messages.
///
/// In a RoundChange message, `view` is the view that the sender wants to move to and `digest` is
/// [`CryptoHash::zero`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Subject {
    pub view: View,
    pub digest: CryptoHash,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ConsensusMessage {
    pub code: MessageCode,
    /// Borsh encoding of a [`Preprepare`] if `code` is `Preprepare`, or of a [`Subject`] otherwise.
    pub msg: Vec<u8>,
    pub address: Address,
    pub signature: SignatureBytes,
    /// Only set in Commit messages.
    pub committed_seal: Option<SignatureBytes>,
}

impl ConsensusMessage {
    /// Create a Preprepare message signed by `me`.
    pub fn preprepare(me: &Keypair, preprepare: &Preprepare) -> Result<Self, SignatureError> {
        Self::new_signed(me, MessageCode::Preprepare, encode(preprepare), None)
    }

    /// Create a Prepare message signed by `me`.
    pub fn prepare(me: &Keypair, subject: &Subject) -> Result<Self, SignatureError> {
        Self::new_signed(me, MessageCode::Prepare, encode(subject), None)
    }

    /// Create a Commit message signed by `me`, carrying `me`'s committed seal over `subject.digest`.
    pub fn commit(me: &Keypair, subject: &Subject) -> Result<Self, SignatureError> {
        let committed_seal = me.sign(&committed_seal_digest(&subject.digest))?;
        Self::new_signed(me, MessageCode::Commit, encode(subject), Some(committed_seal))
    }

    /// Create a RoundChange message for `view` signed by `me`.
    pub fn round_change(me: &Keypair, view: View) -> Result<Self, SignatureError> {
        let subject = Subject {
            view,
            digest: CryptoHash::zero(),
        };
        Self::new_signed(me, MessageCode::RoundChange, encode(&subject), None)
    }

    fn new_signed(
        me: &Keypair,
        code: MessageCode,
        msg: Vec<u8>,
        committed_seal: Option<SignatureBytes>,
    ) -> Result<Self, SignatureError> {
        let mut message = ConsensusMessage {
            code,
            msg,
            address: me.address(),
            signature: SignatureBytes::empty(),
            committed_seal,
        };
        message.signature = me.sign(&message.signing_digest())?;
        Ok(message)
    }

    /// Decode a message from the payload of a peer-to-peer message.
    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        Self::try_from_slice(bytes)
    }

    /// Encode this message into the payload of a peer-to-peer message.
    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    /// The digest that the sender signs.
    pub fn signing_digest(&self) -> CryptoHash {
        let mut unsigned = self.clone();
        unsigned.signature = SignatureBytes::empty();
        hash_of(&unsigned)
    }

    /// Check that `signature` was produced by `address`.
    pub fn verify(&self) -> Result<(), MessageVerificationError> {
        let signer = recover_address(&self.signing_digest(), &self.signature)?;
        if signer != self.address {
            return Err(MessageVerificationError::SignerMismatch);
        }
        Ok(())
    }

    /// Check that `committed_seal` is `address`'s committed seal over `digest`.
    pub fn verify_committed_seal(&self, digest: &CryptoHash) -> Result<(), MessageVerificationError> {
        let committed_seal = self
            .committed_seal
            .ok_or(MessageVerificationError::MissingCommittedSeal)?;
        let signer = recover_address(&committed_seal_digest(digest), &committed_seal)?;
        if signer != self.address {
            return Err(MessageVerificationError::SignerMismatch);
        }
        Ok(())
    }

    /// Get the view of the inner payload. Both [`Preprepare`] and [`Subject`] start with their view, so
    /// this only decodes the first few bytes of `msg`.
    pub fn view(&self) -> io::Result<View> {
        View::deserialize(&mut &self.msg[..])
    }

    /// Decode the inner payload as a [`Preprepare`].
    pub fn decode_preprepare(&self) -> io::Result<Preprepare> {
        Preprepare::try_from_slice(&self.msg)
    }

    /// Decode the inner payload as a [`Subject`].
    pub fn decode_subject(&self) -> io::Result<Subject> {
        Subject::try_from_slice(&self.msg)
    }
}

#[derive(Debug)]
pub enum MessageVerificationError {
    InvalidSignature(SignatureError),
    SignerMismatch,
    MissingCommittedSeal,
}

impl From<SignatureError> for MessageVerificationError {
    fn from(value: SignatureError) -> Self {
        MessageVerificationError::InvalidSignature(value)
    }
}

pub(crate) fn encode<T: BorshSerialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writing into a `Vec` cannot fail.
    let _ = value.serialize(&mut bytes);
    bytes
}
