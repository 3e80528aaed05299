/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.
//!
//! ## Handling a message
//!
//! [`GossipHandler::handle_msg`] decides whether a peer-to-peer message belongs to this engine, and
//! returns `Ok(true)` if it consumed the message, or `Ok(false)` if another subprotocol of the node
//! should handle it. An `Err` always means that the message was consumed.
//!
//! 1. **Consensus messages** ([`ISTANBUL_MSG`]) are decoded, and their payload hash is recorded in the
//!    sending peer's recent messages cache. If this replica has already processed a message with the
//!    same hash, the message is dropped. Otherwise it is posted onto the core's event queue, and
//!    recorded as known once the queue accepts it. A message that the queue drops can be processed
//!    when a peer relays it again. The handler never waits for the core to process the message.
//! 2. **Block announcements** ([`NEW_BLOCK_MSG`]) are only inspected while this replica is the
//!    proposer. If the announced block is this replica's own pending proposal, the announcement is
//!    consumed so that the block is not imported twice. Either way, the payload stream is restored, so
//!    the block sync subprotocol can decode it.
//! 3. **Everything else** is left alone.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::SystemTime,
};

use borsh::BorshDeserialize;

use crate::{
    chain::Chain,
    core::{
        event_queue::{CoreEvent, EventQueueSender},
        implementation::Core,
        messages::ConsensusMessage,
    },
    events::{Event, ReceiveMessageEvent},
    types::{crypto_primitives::keccak256, data_types::Address},
};

use super::{
    messages::{NewBlockData, P2PMessage, ISTANBUL_MSG, NEW_BLOCK_MSG},
    network::Network,
    recent_cache::MessageCaches,
};

/// Receiving end of the engine: turns peer-to-peer messages into core events.
pub(crate) struct GossipHandler<N: Network, C: Chain> {
    started: Arc<AtomicBool>,
    core: Arc<RwLock<Core<N, C>>>,
    queue: EventQueueSender,
    caches: Arc<MessageCaches>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, C: Chain> Clone for GossipHandler<N, C> {
    fn clone(&self) -> Self {
        Self {
            started: self.started.clone(),
            core: self.core.clone(),
            queue: self.queue.clone(),
            caches: self.caches.clone(),
            event_publisher: self.event_publisher.clone(),
        }
    }
}

impl<N: Network, C: Chain> GossipHandler<N, C> {
    pub(crate) fn new(
        started: Arc<AtomicBool>,
        core: Arc<RwLock<Core<N, C>>>,
        queue: EventQueueSender,
        caches: Arc<MessageCaches>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            started,
            core,
            queue,
            caches,
            event_publisher,
        }
    }

    /// Handle `message` from `peer` as described in the [module docs](self).
    pub(crate) fn handle_msg(
        &self,
        peer: Address,
        message: &mut P2PMessage,
    ) -> Result<bool, HandleMsgError> {
        match message.code() {
            ISTANBUL_MSG => self.handle_consensus_msg(peer, message),
            NEW_BLOCK_MSG => self.handle_new_block_msg(message),
            _ => Ok(false),
        }
    }

    fn handle_consensus_msg(
        &self,
        peer: Address,
        message: &mut P2PMessage,
    ) -> Result<bool, HandleMsgError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(HandleMsgError::StoppedEngine);
        }

        let payload = message
            .read_payload()
            .map_err(|_| HandleMsgError::DecodeFailed)?;
        let msg = ConsensusMessage::decode(&payload).map_err(|_| HandleMsgError::DecodeFailed)?;
        let hash = keccak256(&payload);

        // 1. Remember that the peer has the message, so it is not gossiped back to it.
        self.caches.mark_peer(peer, hash);

        // 2. Process every message at most once.
        if self.caches.is_known(&hash) {
            return Ok(true);
        }

        let origin = msg.address;
        let code = msg.code;
        if self.queue.post(CoreEvent::Message { msg, payload }) {
            self.caches.mark_known(hash);
            Event::ReceiveMessage(ReceiveMessageEvent {
                timestamp: SystemTime::now(),
                origin,
                code,
            })
            .publish(&self.event_publisher);
        }

        Ok(true)
    }

    fn handle_new_block_msg(&self, message: &mut P2PMessage) -> Result<bool, HandleMsgError> {
        let core = self.core.read().unwrap_or_else(PoisonError::into_inner);
        if !core.is_proposer() {
            return Ok(false);
        }

        let payload = message
            .peek_payload()
            .map_err(|_| HandleMsgError::ReadPayload)?;
        let Ok(announcement) = NewBlockData::try_from_slice(&payload) else {
            return Ok(false);
        };

        let block = announcement.block;
        Ok(block.header.is_istanbul() && core.is_current_proposal(&block.hash()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleMsgError {
    /// The engine is not running.
    StoppedEngine,
    /// The payload is not a valid consensus message.
    DecodeFailed,
    /// The payload of a block announcement could not be read.
    ReadPayload,
}

/// Spawn the poller thread, which polls the [`Network`] for messages and hands them to `handler`.
///
/// Messages that the engine does not handle are forwarded onto the returned receiver, for the node's
/// other subprotocols.
pub(crate) fn start_polling<N: Network + 'static, C: Chain>(
    mut network: N,
    handler: GossipHandler<N, C>,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Receiver<(Address, P2PMessage)>) {
    let (to_unhandled_receiver, unhandled_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, mut msg)) = network.recv() {
            match handler.handle_msg(origin, &mut msg) {
                Ok(true) => (),
                Ok(false) => {
                    let _ = to_unhandled_receiver.send((origin, msg));
                }
                Err(err) => log::debug!("Dropping message from {}: {:?}", origin, err),
            }
        } else {
            thread::yield_now()
        }
    });

    (poller_thread, unhandled_receiver)
}
