/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-view collection of consensus messages, with at most one message per sender.

use std::collections::HashMap;

use crate::types::{
    data_types::{Address, View},
    validator_set::ValidatorSet,
};

use super::messages::ConsensusMessage;

/// Collects the messages of one phase of one [`View`], keeping at most one message per sender.
///
/// ## First message wins
///
/// Adding a message from a sender that already has a message in the set is a no-op, even if the two
/// messages differ. Equivocating senders therefore count at most once towards a quorum.
///
/// ## Ordering
///
/// [`values`](Self::values) returns messages in the order their senders were first added. Committed
/// seals are collected in this order.
#[derive(Clone, Debug)]
pub struct MessageSet {
    view: View,
    validator_set: ValidatorSet,
    messages: HashMap<Address, ConsensusMessage>,
    order: Vec<Address>,
}

impl MessageSet {
    /// Create an empty set for `view`, accepting messages only from members of `validator_set`.
    pub fn new(view: View, validator_set: ValidatorSet) -> Self {
        Self {
            view,
            validator_set,
            messages: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Record `msg`. Fails only if the sender is not a member of the set's validator set.
    pub fn add(&mut self, msg: ConsensusMessage) -> Result<(), MessageSetError> {
        if !self.validator_set.contains(&msg.address) {
            return Err(MessageSetError::UnauthorizedAddress(msg.address));
        }

        if !self.messages.contains_key(&msg.address) {
            self.order.push(msg.address);
            self.messages.insert(msg.address, msg);
        }
        Ok(())
    }

    /// Get the number of distinct senders.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, sender: &Address) -> Option<&ConsensusMessage> {
        self.messages.get(sender)
    }

    pub fn contains(&self, sender: &Address) -> bool {
        self.messages.contains_key(sender)
    }

    /// Iterate through the senders, in the order they were first added.
    pub fn senders(&self) -> impl Iterator<Item = &Address> {
        self.order.iter()
    }

    /// Iterate through the messages, in the order their senders were first added.
    pub fn values(&self) -> impl Iterator<Item = &ConsensusMessage> {
        self.order.iter().filter_map(|sender| self.messages.get(sender))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum MessageSetError {
    UnauthorizedAddress(Address),
}
