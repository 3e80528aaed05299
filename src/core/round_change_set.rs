/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! RoundChange messages of the current sequence, grouped by the round they ask for.

use std::collections::BTreeMap;

use crate::types::{
    data_types::{Round, Sequence, View},
    validator_set::ValidatorSet,
};

use super::{
    message_set::{MessageSet, MessageSetError},
    messages::ConsensusMessage,
};

pub(crate) struct RoundChangeSet {
    sequence: Sequence,
    validator_set: ValidatorSet,
    round_changes: BTreeMap<Round, MessageSet>,
}

impl RoundChangeSet {
    pub(crate) fn new(sequence: Sequence, validator_set: ValidatorSet) -> Self {
        Self {
            sequence,
            validator_set,
            round_changes: BTreeMap::new(),
        }
    }

    /// Record a RoundChange `msg` asking for `round`, and return how many distinct validators have
    /// asked for `round` so far.
    pub(crate) fn add(
        &mut self,
        round: Round,
        msg: ConsensusMessage,
    ) -> Result<usize, MessageSetError> {
        let sequence = self.sequence;
        let validator_set = &self.validator_set;
        let message_set = self
            .round_changes
            .entry(round)
            .or_insert_with(|| MessageSet::new(View::new(sequence, round), validator_set.clone()));
        message_set.add(msg)?;
        Ok(message_set.len())
    }

    /// Remove the messages for every round lower than `round`, and every empty round.
    pub(crate) fn clear(&mut self, round: Round) {
        self.round_changes
            .retain(|r, message_set| *r >= round && !message_set.is_empty());
    }

    /// Get the highest round that at least `threshold` validators have asked for.
    pub(crate) fn max_round(&self, threshold: usize) -> Option<Round> {
        self.round_changes
            .iter()
            .rev()
            .find(|(_, message_set)| message_set.len() >= threshold)
            .map(|(round, _)| *round)
    }
}
