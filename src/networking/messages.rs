/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Peer-to-peer messages, as exchanged with the [`Network`](super::network::Network).
//!
//! The engine shares its peer connections with other subprotocols of the node. Every message on a
//! connection carries a protocol code: consensus messages use [`ISTANBUL_MSG`], and full block
//! announcements, which belong to the block sync subprotocol, use [`NEW_BLOCK_MSG`].
//!
//! ## Payload streams
//!
//! The payload of a [`P2PMessage`] is a byte stream that is consumed by reading it. The engine only
//! consumes the payloads of consensus messages. It may also inspect block announcements, but it always
//! restores their payload stream afterwards so that the block sync subprotocol can still decode them.

use std::io::{self, Cursor, Read};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::block::Block;

/// Protocol code of consensus messages.
pub const ISTANBUL_MSG: u64 = 0x11;

/// Protocol code of full block announcements.
pub const NEW_BLOCK_MSG: u64 = 0x07;

/// A message received from or sent to a peer.
#[derive(Clone, Debug)]
pub struct P2PMessage {
    code: u64,
    payload: Cursor<Vec<u8>>,
}

impl P2PMessage {
    /// Create a message with protocol code `code` whose payload stream yields `payload`.
    pub fn new(code: u64, payload: Vec<u8>) -> Self {
        Self {
            code,
            payload: Cursor::new(payload),
        }
    }

    /// Create a block announcement for `block`.
    pub fn new_block(block: Block, total_difficulty: u128) -> Self {
        let announcement = NewBlockData {
            block,
            total_difficulty,
        };
        let mut payload = Vec::new();
        // Writing into a `Vec` cannot fail.
        let _ = announcement.serialize(&mut payload);
        Self::new(NEW_BLOCK_MSG, payload)
    }

    pub fn code(&self) -> u64 {
        self.code
    }

    /// Read the rest of the payload stream, consuming it.
    pub fn read_payload(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.payload.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Read the rest of the payload stream, then restore the stream to where it was, so that the next
    /// reader sees the same bytes.
    pub fn peek_payload(&mut self) -> io::Result<Vec<u8>> {
        let position = self.payload.position();
        let bytes = self.read_payload();
        self.payload.set_position(position);
        bytes
    }

    /// Read the rest of the payload stream and decode it as a `T`, consuming the stream.
    pub fn decode<T: BorshDeserialize>(&mut self) -> io::Result<T> {
        let bytes = self.read_payload()?;
        T::try_from_slice(&bytes)
    }
}

/// Payload of a [`NEW_BLOCK_MSG`] message.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewBlockData {
    pub block: Block,
    pub total_difficulty: u128,
}
