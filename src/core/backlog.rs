/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded buffer for consensus messages that arrived too early to be processed.
//!
//! Messages for a future view, and Prepares and Commits that arrive before the Preprepare of the
//! current view, are stored here and replayed after every state or view transition.
//!
//! ## Replay order
//!
//! Messages are replayed in ascending order of view. Within a view, Preprepares come first, then
//! Commits, then Prepares, so that a replayed Preprepare sets the subject that the other messages are
//! checked against.
//!
//! ## Buffer management
//!
//! The backlog holds at most `capacity` messages. If it is full, inserting a message removes the
//! highest-viewed message to make space, unless the new message is itself for the highest view, in
//! which case the new message is dropped.

use std::collections::{BTreeMap, VecDeque};

use crate::types::data_types::View;

use super::messages::{ConsensusMessage, MessageCode};

/// What to do with a backlogged message when the backlog is replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Still for the future. Keep it.
    Keep,
    /// Now too old to matter. Remove it.
    Discard,
    /// Remove it and process it now.
    Process,
}

/// A message waiting in the backlog, with the payload it was received as so that it can be relayed
/// once processed.
pub(crate) struct BacklogEntry {
    pub(crate) msg: ConsensusMessage,
    pub(crate) payload: Vec<u8>,
}

pub(crate) struct Backlog {
    capacity: usize,
    buffer: BTreeMap<(View, u8), VecDeque<BacklogEntry>>,
    len: usize,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: BTreeMap::new(),
            len: 0,
        }
    }

    /// Try inserting `msg` for `view` into the backlog. Returns whether the message was stored.
    pub(crate) fn insert(&mut self, view: View, msg: ConsensusMessage, payload: Vec<u8>) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let key = (view, priority(msg.code));
        if self.len >= self.capacity {
            match self.buffer.keys().next_back() {
                Some(highest) if key < *highest => self.remove_highest_viewed_msg(),
                _ => return false,
            }
        }

        self.buffer
            .entry(key)
            .or_insert_with(VecDeque::new)
            .push_back(BacklogEntry { msg, payload });
        self.len += 1;
        true
    }

    /// Remove and return every message that `classify` says should be processed now, in
    /// [replay order](self#replay-order), and remove every message that it says should be discarded.
    pub(crate) fn drain(
        &mut self,
        mut classify: impl FnMut(View, MessageCode) -> Disposition,
    ) -> Vec<BacklogEntry> {
        let mut ready = Vec::new();
        let mut kept = BTreeMap::new();
        let mut kept_len = 0;

        for ((view, prio), queue) in std::mem::take(&mut self.buffer) {
            let mut kept_queue = VecDeque::new();
            for entry in queue {
                match classify(view, entry.msg.code) {
                    Disposition::Keep => kept_queue.push_back(entry),
                    Disposition::Discard => (),
                    Disposition::Process => ready.push(entry),
                }
            }
            if !kept_queue.is_empty() {
                kept_len += kept_queue.len();
                kept.insert((view, prio), kept_queue);
            }
        }

        self.buffer = kept;
        self.len = kept_len;
        ready
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn remove_highest_viewed_msg(&mut self) {
        if let Some(mut entry) = self.buffer.last_entry() {
            let queue = entry.get_mut();
            if queue.pop_back().is_some() {
                self.len -= 1;
            }
            if queue.is_empty() {
                entry.remove();
            }
        }
    }
}

fn priority(code: MessageCode) -> u8 {
    match code {
        MessageCode::Preprepare => 0,
        MessageCode::Commit => 1,
        MessageCode::Prepare => 2,
        MessageCode::RoundChange => 3,
    }
}
