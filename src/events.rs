/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that a running [`Backend`](crate::backend::Backend) emits, for event
//! handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published onto
//! a channel by the thread that performed the action, and handlers registered through
//! [`BackendSpec`](crate::backend::BackendSpec) are fired on a separate [event bus](crate::event_bus)
//! thread, so slow handlers never slow consensus down.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    core::messages::{MessageCode, Subject},
    types::data_types::{Address, BlockNumber, CryptoHash, View},
};

pub enum Event {
    // Events that change the view.
    StartRound(StartRoundEvent),
    ViewTimeout(ViewTimeoutEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    RoundChange(RoundChangeEvent),
    // Events that involve receiving a consensus message.
    ReceiveMessage(ReceiveMessageEvent),
    DropMessage(DropMessageEvent),
    // Events that change the chain or the validator set.
    FinalCommitted(FinalCommittedEvent),
    UpdateValidatorSet(UpdateValidatorSetEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already be gone while the backend is being dropped.
            let _ = event_publisher.send(self);
        }
    }
}

/// The replica entered a new view.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposer: Option<Address>,
    pub timeout: Duration,
}

/// The round change timer of `view` expired.
pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

/// The replica, as proposer, broadcast a Preprepare for `block`.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub block: CryptoHash,
    pub number: BlockNumber,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub subject: Subject,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub subject: Subject,
}

/// The replica broadcast a RoundChange asking for `view`.
pub struct RoundChangeEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

/// A consensus message from `origin` passed replay suppression and was posted to the core.
pub struct ReceiveMessageEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub code: MessageCode,
}

/// The core dropped a consensus message from `origin` without acting on it.
pub struct DropMessageEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub code: MessageCode,
    pub reason: String,
}

/// A block was finalized and appended to the chain.
pub struct FinalCommittedEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub number: BlockNumber,
    pub committed_seals: usize,
}

/// The validator set that the replica runs consensus with changed as of the block with `number`.
pub struct UpdateValidatorSetEvent {
    pub timestamp: SystemTime,
    pub number: BlockNumber,
    pub validators: Vec<Address>,
}
