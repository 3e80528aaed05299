/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bounded queue through which every input reaches the [`Core`](super::implementation::Core).
//!
//! Network receive threads, the round change timer, the block sealer, and chain head notifications all
//! post [`CoreEvent`]s onto this queue without touching the core's state, and a single thread consumes
//! them in order. This serializes every state transition.
//!
//! ## Overflow policy
//!
//! The queue holds at most `capacity` events. What happens when a network receive thread posts a
//! message onto a full queue is configured by [`OverflowPolicy`]:
//! - [`Block`](OverflowPolicy::Block): the producer waits until the core thread makes space. No event
//!   is ever lost, but a stalled core thread stalls network receive threads.
//! - [`DropIncoming`](OverflowPolicy::DropIncoming): the message is dropped, and a debug line is
//!   logged. Consensus messages lost this way are recovered through gossip relays or round changes.
//!
//! Events produced locally (timeouts, proposal requests, and chain head notifications) are
//! [delivered](EventQueueSender::deliver) under either policy, waiting for space if needed. Losing a
//! timeout would leave the round change timer disarmed until some other event arrived.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::types::{block::Block, data_types::View};

use super::messages::ConsensusMessage;

/// Inputs to the [`Core`](super::implementation::Core).
pub(crate) enum CoreEvent {
    /// A sealed block that the local block builder wants proposed.
    Request(Block),
    /// A consensus message received from a peer, with the payload it was received as.
    Message {
        msg: ConsensusMessage,
        payload: Vec<u8>,
    },
    /// The round change timer armed for `view` expired.
    Timeout(View),
    /// A new block was appended to the chain by someone other than the core.
    FinalCommitted,
}

impl CoreEvent {
    fn name(&self) -> &'static str {
        match self {
            CoreEvent::Request(_) => "Request",
            CoreEvent::Message { .. } => "Message",
            CoreEvent::Timeout(_) => "Timeout",
            CoreEvent::FinalCommitted => "FinalCommitted",
        }
    }
}

/// What a producer does when the event queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    Block,
    DropIncoming,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block
    }
}

/// Producing end of the event queue.
#[derive(Clone)]
pub(crate) struct EventQueueSender {
    sender: SyncSender<CoreEvent>,
    overflow_policy: OverflowPolicy,
}

impl EventQueueSender {
    /// Post `event` onto the queue, following the overflow policy. Returns whether the event was
    /// enqueued.
    pub(crate) fn post(&self, event: CoreEvent) -> bool {
        match self.overflow_policy {
            OverflowPolicy::Block => self.sender.send(event).is_ok(),
            OverflowPolicy::DropIncoming => match self.sender.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(event)) => {
                    log::debug!("Core event queue is full, dropping {} event", event.name());
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }

    /// Put `event` onto the queue, waiting for space if the queue is full. Returns `false` only if
    /// the core thread has stopped.
    ///
    /// Must not be called from the core thread.
    pub(crate) fn deliver(&self, event: CoreEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Create an event queue holding at most `capacity` events.
pub(crate) fn event_queue(
    capacity: usize,
    overflow_policy: OverflowPolicy,
) -> (EventQueueSender, Receiver<CoreEvent>) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (
        EventQueueSender {
            sender,
            overflow_policy,
        },
        receiver,
    )
}
