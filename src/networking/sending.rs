/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending consensus messages to the P2P network.

use std::sync::Arc;

use crate::types::{
    crypto_primitives::keccak256,
    data_types::Address,
    validator_set::ValidatorSet,
};

use super::{
    messages::{P2PMessage, ISTANBUL_MSG},
    network::Network,
    recent_cache::MessageCaches,
};

/// Handle for gossiping consensus message payloads to validators.
///
/// A payload is sent to every validator except this replica, skipping validators that are already
/// known to have it according to their [recent messages cache](super::recent_cache). Every validator
/// a payload is sent to is marked as having it.
#[derive(Clone)]
pub(crate) struct Gossiper<N: Network> {
    network: N,
    me: Address,
    caches: Arc<MessageCaches>,
}

impl<N: Network> Gossiper<N> {
    pub(crate) fn new(network: N, me: Address, caches: Arc<MessageCaches>) -> Self {
        Self {
            network,
            me,
            caches,
        }
    }

    /// Send `payload` to the validators in `validator_set` that do not have it yet.
    pub(crate) fn gossip(&mut self, validator_set: &ValidatorSet, payload: &[u8]) {
        let hash = keccak256(payload);
        self.caches.mark_known(hash);

        for validator in validator_set.validators() {
            if *validator == self.me {
                continue;
            }
            if self.caches.mark_peer(*validator, hash) {
                continue;
            }
            self.network
                .send(*validator, P2PMessage::new(ISTANBUL_MSG, payload.to_vec()));
        }
    }
}
