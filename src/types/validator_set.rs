/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordered set of validators that take part in consensus, and the rules for choosing a proposer
//! and computing quorums from it.

use std::slice;

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Address, Round};

/// How the proposer of a round is chosen given the proposer of the last block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProposerPolicy {
    /// The proposer rotates to the next validator every block and every round.
    RoundRobin,
    /// The proposer of the last block keeps proposing until a round change happens.
    Sticky,
}

impl Default for ProposerPolicy {
    fn default() -> Self {
        ProposerPolicy::RoundRobin
    }
}

/// Stores the addresses of validators, and the current proposer among them.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// [`Address`]es. The order defines proposer rotation, so every replica that knows the same members
/// derives the same proposer for the same round.
///
/// ## Quorum
///
/// With `N = len()`, the set tolerates `F = (N - 1) / 3` faulty validators, and a quorum is
/// `Q = (N + F) / 2 + 1` matching messages. Both are computed from the current membership every time
/// they are asked for, so they always reflect additions and removals.
///
/// ## Copying
///
/// `ValidatorSet` owns all of its state, so a `clone` is a deep copy: mutating the copy never affects
/// the original.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorSet {
    // The addresses of validators are included here in ascending order.
    validators: Vec<Address>,
    policy: ProposerPolicy,
    proposer: Option<Address>,
}

impl ValidatorSet {
    /// Create a validator set containing `validators`, with duplicates removed. The initial proposer
    /// is the first validator in ascending order.
    pub fn new(validators: impl IntoIterator<Item = Address>, policy: ProposerPolicy) -> Self {
        let mut validators: Vec<Address> = validators.into_iter().collect();
        validators.sort();
        validators.dedup();
        let proposer = validators.first().copied();
        Self {
            validators,
            policy,
            proposer,
        }
    }

    /// Put `validator` into the set at the position that preserves the
    /// [ordering of validators](Self#ordering-of-validators).
    ///
    /// Returns `false` and leaves the set unchanged if `validator` is already a member.
    pub fn add(&mut self, validator: Address) -> bool {
        match self.validators.binary_search(&validator) {
            Ok(_) => false,
            Err(insert_pos) => {
                self.validators.insert(insert_pos, validator);
                true
            }
        }
    }

    /// Remove `validator` from the set. Returns `false` if `validator` is not a member.
    pub fn remove(&mut self, validator: &Address) -> bool {
        match self.validators.binary_search(validator) {
            Ok(pos) => {
                self.validators.remove(pos);
                if self.proposer.as_ref() == Some(validator) {
                    self.proposer = None;
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Get the number of validators currently in the set (`N`).
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the maximum number of faulty validators the set tolerates (`F`).
    pub fn f(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Get the number of matching messages that make a quorum (`Q`).
    ///
    /// `Q` is the smallest integer with `2Q > N + F`.
    pub fn quorum(&self) -> usize {
        (self.len() + self.f()) / 2 + 1
    }

    /// Check whether the set contains `validator`.
    pub fn contains(&self, validator: &Address) -> bool {
        self.validators.binary_search(validator).is_ok()
    }

    /// Get the index of `validator` in the [sorted order](Self#ordering-of-validators), if it is a
    /// member.
    pub fn position(&self, validator: &Address) -> Option<usize> {
        self.validators.binary_search(validator).ok()
    }

    /// Get the validator at position `index` in the sorted order.
    pub fn get(&self, index: usize) -> Option<&Address> {
        self.validators.get(index)
    }

    /// Get an iterator through validators' addresses which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<Address> {
        self.validators.iter()
    }

    /// Get the validators' addresses in ascending order.
    pub fn to_vec(&self) -> Vec<Address> {
        self.validators.clone()
    }

    /// Get the current proposer, as last computed by [`calc_proposer`](Self::calc_proposer).
    pub fn proposer(&self) -> Option<Address> {
        self.proposer
    }

    /// Check whether `validator` is the current proposer.
    pub fn is_proposer(&self, validator: &Address) -> bool {
        self.proposer.as_ref() == Some(validator)
    }

    /// Compute the proposer for `round`, given the proposer of the last block, and store it as the
    /// current proposer.
    ///
    /// `last_proposer` is `None` for the block after genesis, which has no author. The proposer is
    /// the validator at index `seed % N`, where `seed` depends on the policy:
    /// - [`RoundRobin`](ProposerPolicy::RoundRobin): `position(last_proposer) + round + 1`.
    /// - [`Sticky`](ProposerPolicy::Sticky): `position(last_proposer) + round`.
    ///
    /// If there is no last proposer, `seed = round` under both policies. If the last proposer is no
    /// longer a member, its position counts as 0.
    pub fn calc_proposer(&mut self, last_proposer: Option<Address>, round: Round) -> Option<Address> {
        if self.is_empty() {
            self.proposer = None;
            return None;
        }

        // Reduce the round first so that the seed cannot overflow.
        let len = self.len() as u64;
        let round = round.int() % len;
        let seed = match last_proposer {
            None => round,
            Some(last_proposer) => {
                let offset = self.position(&last_proposer).unwrap_or(0) as u64;
                match self.policy {
                    ProposerPolicy::RoundRobin => offset + round + 1,
                    ProposerPolicy::Sticky => offset + round,
                }
            }
        };

        let pick = (seed % len) as usize;
        self.proposer = self.validators.get(pick).copied();
        self.proposer
    }
}
