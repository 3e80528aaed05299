/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: Keccak-256, provided by the [`sha3`] crate.
//! 2. **Digital Signatures**: recoverable ECDSA over secp256k1, provided by the [`k256`] crate.
//!
//! Signatures are always computed over a 32-byte Keccak-256 digest ("prehash"), and carry a recovery
//! id so that the signer's [`Address`] can be recovered without knowing its public key in advance.

use super::data_types::{Address, CryptoHash, SignatureBytes};

// re-exports below.
pub use sha3::Digest;
pub use sha3::Keccak256 as CryptoHasher;

pub use k256::ecdsa::{Error as SignatureError, RecoveryId, Signature, SigningKey, VerifyingKey};

/// Compute the Keccak-256 digest of `bytes`.
pub fn keccak256(bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    CryptoHash::new(hash)
}

/// Derive the [`Address`] of `verifying_key`: the last 20 bytes of the Keccak-256 digest of its
/// uncompressed encoding, without the `0x04` prefix.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let encoded_point = verifying_key.to_encoded_point(false);
    let hash = keccak256(&encoded_point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.bytes()[12..]);
    Address::new(address)
}

/// Recover the [`Address`] of whoever produced `signature` over `digest`.
pub fn recover_address(
    digest: &CryptoHash,
    signature: &SignatureBytes,
) -> Result<Address, SignatureError> {
    let sig = Signature::from_slice(&signature.rs())?;
    let recovery_id =
        RecoveryId::from_byte(signature.recovery_id()).ok_or_else(SignatureError::new)?;
    let verifying_key = VerifyingKey::recover_from_prehash(&digest.bytes(), &sig, recovery_id)?;
    Ok(address_of(&verifying_key))
}

/// Sign a 32-byte `digest` with `signing_key`, producing a recoverable signature.
pub fn sign_digest(
    signing_key: &SigningKey,
    digest: &CryptoHash,
) -> Result<SignatureBytes, SignatureError> {
    let (signature, recovery_id) = signing_key.sign_prehash_recoverable(&digest.bytes())?;
    let mut rs = [0u8; 64];
    rs.copy_from_slice(&signature.to_bytes());
    Ok(SignatureBytes::new(rs, recovery_id.to_byte()))
}

/// A facade around [`SigningKey`] that implements a method for [`sign`](Self::sign)-ing digests as
/// well as a getter for the [`address`](Self::address) associated with the signing key.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: Address,
}

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        let address = address_of(signing_key.verifying_key());
        Keypair {
            signing_key,
            address,
        }
    }

    /// Sign a 32-byte `digest` with the `Keypair`.
    pub fn sign(&self, digest: &CryptoHash) -> Result<SignatureBytes, SignatureError> {
        sign_digest(&self.signing_key, digest)
    }

    /// Get the `Address` of this `Keypair`.
    pub fn address(&self) -> Address {
        self.address
    }
}
