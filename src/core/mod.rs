/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for agreeing on one block per sequence.
//!
//! ## Views and quorums
//!
//! Agreement on the block at height `h` happens in **sequence** `h`. Each sequence proceeds in one or
//! more **rounds**, and the pair `(sequence, round)` is called a [`View`](crate::types::data_types::View).
//! Every view has exactly one proposer, computed from the validator set, the author of the previous
//! block, and the round (see [`ValidatorSet::calc_proposer`](crate::types::validator_set::ValidatorSet::calc_proposer)).
//!
//! With `N` validators, the protocol tolerates `F = (N - 1) / 3` faulty validators, and a phase advances
//! once a quorum of `Q = (N + F) / 2 + 1` distinct validators agree. Any two quorums intersect in at least
//! one honest validator.
//!
//! ## Phases
//!
//! A view proceeds through the [`State`]s `NewRound`, `Preprepared`, `Prepared`, and `Committed` by
//! exchanging [`Preprepare`](messages::Preprepare), Prepare, and Commit messages. If a view makes no
//! progress before its timer expires, validators exchange RoundChange messages to move to a higher
//! round of the same sequence. The details are in [`implementation`].
//!
//! ## Inputs
//!
//! The state machine consumes [`CoreEvent`](event_queue::CoreEvent)s from a bounded
//! [event queue](event_queue), one at a time. Messages that arrive too early are kept in the
//! [`backlog`] and replayed later.

pub mod messages;

pub mod message_set;

pub(crate) mod round_state;
pub use round_state::State;

pub(crate) mod round_change_set;

pub(crate) mod backlog;

pub(crate) mod timer;

pub mod event_queue;

pub(crate) mod implementation;
pub use implementation::CoreError;
