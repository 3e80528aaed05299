/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait, through which the engine talks to its peers.

use crate::types::data_types::Address;

use super::messages::P2PMessage;

/// Peer-to-peer transport, provided by the library user.
///
/// Peers are identified by the [`Address`] of the signing key they run consensus with. The engine only
/// sends to validators, and relies on the network provider to deliver messages from any connected peer.
pub trait Network: Clone + Send + Sync {
    /// Send a message to the specified peer without blocking. Messages to peers that are not connected
    /// may be dropped.
    fn send(&mut self, peer: Address, message: P2PMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(Address, P2PMessage)>;
}
