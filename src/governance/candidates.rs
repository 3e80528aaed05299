/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! This replica's own voting stance: the validators it wants added or removed.
//!
//! Candidates are only read and written by API calls and by header preparation, never by the consensus
//! state machine, so they are guarded by their own lock.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use rand::seq::SliceRandom;

use crate::types::{block::HeaderVote, data_types::Address};

use super::snapshot::Snapshot;

#[derive(Clone, Default)]
pub struct Candidates(Arc<RwLock<HashMap<Address, bool>>>);

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start voting to add (`authorize = true`) or remove `target`, replacing any earlier stance on it.
    pub fn propose(&self, target: Address, authorize: bool) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, authorize);
    }

    /// Stop voting on `target`.
    pub fn discard(&self, target: &Address) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }

    /// Get a copy of every candidate and its stance.
    pub fn get_all(&self) -> HashMap<Address, bool> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Pick, uniformly at random, one candidate whose vote is still meaningful under `snapshot`.
    pub(crate) fn pick_vote(&self, snapshot: &Snapshot) -> Option<HeaderVote> {
        let candidates = self.0.read().unwrap_or_else(PoisonError::into_inner);
        let meaningful: Vec<HeaderVote> = candidates
            .iter()
            .filter(|(target, authorize)| snapshot.check_vote(target, **authorize))
            .map(|(target, authorize)| HeaderVote {
                target: *target,
                authorize: *authorize,
            })
            .collect();
        meaningful.choose(&mut rand::thread_rng()).copied()
    }
}
