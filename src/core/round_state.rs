/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The phase of the state machine, and everything a validator has seen in its current view.

use std::collections::HashSet;

use crate::types::{
    block::Block,
    data_types::{Address, CryptoHash, Round, Sequence, View},
    validator_set::ValidatorSet,
};

use super::{
    message_set::MessageSet,
    messages::{Preprepare, Subject},
};

/// Phases of a view, in the order they are reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Waiting for a proposal, either from the local block builder or from the proposer.
    NewRound,
    /// Accepted a Preprepare and sent Prepare.
    Preprepared,
    /// Saw a quorum of Prepares (or a Prepare for the locked hash) and sent Commit.
    Prepared,
    /// Saw a quorum of Commits and handed the block to the chain.
    Committed,
}

/// State of the current view.
///
/// When a round change happens within a sequence, the new `RoundState` inherits the locked hash (and
/// with it the Preprepare that carried the locked proposal) and the pending request of the old one.
pub(crate) struct RoundState {
    view: View,
    pub(crate) preprepare: Option<Preprepare>,
    pub(crate) prepares: MessageSet,
    pub(crate) commits: MessageSet,
    locked_hash: Option<CryptoHash>,
    pub(crate) pending_request: Option<Block>,
}

impl RoundState {
    pub(crate) fn new(
        view: View,
        validator_set: &ValidatorSet,
        locked_hash: Option<CryptoHash>,
        preprepare: Option<Preprepare>,
        pending_request: Option<Block>,
    ) -> Self {
        Self {
            view,
            preprepare,
            prepares: MessageSet::new(view, validator_set.clone()),
            commits: MessageSet::new(view, validator_set.clone()),
            locked_hash,
            pending_request,
        }
    }

    pub(crate) fn view(&self) -> View {
        self.view
    }

    pub(crate) fn sequence(&self) -> Sequence {
        self.view.sequence
    }

    pub(crate) fn round(&self) -> Round {
        self.view.round
    }

    /// The proposal accepted in this view, or carried over with the lock.
    pub(crate) fn proposal(&self) -> Option<&Block> {
        self.preprepare.as_ref().map(|preprepare| &preprepare.proposal)
    }

    /// The subject that Prepare and Commit messages of this view must match.
    pub(crate) fn subject(&self) -> Option<Subject> {
        self.proposal().map(|proposal| Subject {
            view: self.view,
            digest: proposal.hash(),
        })
    }

    /// Lock the hash of the current proposal.
    pub(crate) fn lock_hash(&mut self) {
        if let Some(proposal) = self.proposal() {
            self.locked_hash = Some(proposal.hash());
        }
    }

    pub(crate) fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub(crate) fn locked_hash(&self) -> Option<CryptoHash> {
        self.locked_hash
    }

    pub(crate) fn is_hash_locked(&self) -> bool {
        self.locked_hash.is_some()
    }

    /// Number of distinct validators that sent either a Prepare or a Commit in this view.
    pub(crate) fn prepare_or_commit_len(&self) -> usize {
        let senders: HashSet<&Address> = self
            .prepares
            .senders()
            .chain(self.commits.senders())
            .collect();
        senders.len()
    }
}
