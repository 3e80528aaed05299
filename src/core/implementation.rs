/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the consensus state machine.
//!
//! Main type: [`Core`].
//!
//! ## Flow of a view
//!
//! 1. **Start round**: the replica enters view `(sequence, round)`, computes the proposer, arms the
//!    round change timer, and enters [`State::NewRound`]. If it is the proposer and has a proposal (a
//!    locked proposal, or a pending request from the local block builder), it broadcasts a Preprepare.
//! 2. **Preprepare**: on accepting a valid Preprepare from the proposer, the replica enters
//!    [`State::Preprepared`] and broadcasts a Prepare for the proposal's hash. A replica that is locked
//!    on the proposal's hash skips straight to step 3, and a replica that is locked on a different hash
//!    asks for a round change instead.
//! 3. **Prepare**: once a quorum of distinct validators have sent a Prepare or a Commit for the
//!    proposal, the replica locks the proposal's hash, enters [`State::Prepared`], and broadcasts a
//!    Commit carrying its committed seal.
//! 4. **Commit**: once a quorum of Commits has been collected, the replica enters
//!    [`State::Committed`], attaches the committed seals to the proposal, appends it to the chain, and
//!    starts round 0 of the next sequence.
//!
//! ## Round changes
//!
//! If the timer of a view expires, the replica broadcasts a RoundChange for `round + 1` (or for a
//! higher round that at least `F + 1` validators already asked for) and waits for round change. A
//! quorum of RoundChanges for a round higher than the current one, or any quorum while waiting, moves
//! the replica directly to that round.
//!
//! ## Self-delivery
//!
//! Every message the replica broadcasts is also processed by the replica itself. Own messages, and
//! messages replayed from the [`Backlog`], are placed on an internal queue that is drained after every
//! event, so that processing a message never recursively processes another one.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    chain::{Chain, ChainError},
    engine::{verify_proposal, EngineError},
    events::{
        CommitEvent, DropMessageEvent, Event, FinalCommittedEvent, PrepareEvent, ProposeEvent,
        RoundChangeEvent, StartRoundEvent, UpdateValidatorSetEvent, ViewTimeoutEvent,
    },
    governance::snapshot_store::SnapshotStore,
    networking::{network::Network, sending::Gossiper},
    types::{
        block::{Block, Header},
        crypto_primitives::{Keypair, SignatureError},
        data_types::{CryptoHash, Round, Sequence, View},
        validator_set::ValidatorSet,
    },
};

use super::{
    backlog::{Backlog, BacklogEntry, Disposition},
    event_queue::{CoreEvent, EventQueueSender},
    message_set::MessageSetError,
    messages::{ConsensusMessage, MessageCode, Preprepare, Subject},
    round_change_set::RoundChangeSet,
    round_state::{RoundState, State},
    timer::RoundChangeTimer,
};

/// A single validator's consensus state machine.
///
/// `Core` is only ever driven by [`handle_event`](Self::handle_event), called by the single core thread
/// with the write lock held, so every state transition happens in isolation.
pub(crate) struct Core<N: Network, C: Chain> {
    keypair: Keypair,
    chain: C,
    snapshots: Arc<SnapshotStore>,
    gossiper: Gossiper<N>,
    queue: EventQueueSender,
    event_publisher: Option<Sender<Event>>,

    started: bool,
    state: State,
    current: Option<RoundState>,
    validator_set: ValidatorSet,
    round_change_set: RoundChangeSet,
    waiting_for_round_change: bool,

    backlog: Backlog,
    pending_requests: BTreeMap<Sequence, Block>,
    ready: VecDeque<BacklogEntry>,
    timer: RoundChangeTimer,
}

impl<N: Network, C: Chain> Core<N, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        keypair: Keypair,
        chain: C,
        snapshots: Arc<SnapshotStore>,
        gossiper: Gossiper<N>,
        queue: EventQueueSender,
        event_publisher: Option<Sender<Event>>,
        timer: RoundChangeTimer,
        backlog_capacity: usize,
    ) -> Result<Self, EngineError> {
        let head = chain.current_header();
        let snap = snapshots.snapshot(&chain, head.number, head.hash())?;
        let validator_set = snap.validator_set.clone();
        let round_change_set =
            RoundChangeSet::new(Sequence::from(head.number) + 1, validator_set.clone());

        Ok(Self {
            keypair,
            chain,
            snapshots,
            gossiper,
            queue,
            event_publisher,
            started: false,
            state: State::NewRound,
            current: None,
            validator_set,
            round_change_set,
            waiting_for_round_change: false,
            backlog: Backlog::new(backlog_capacity),
            pending_requests: BTreeMap::new(),
            ready: VecDeque::new(),
            timer,
        })
    }

    /// Enter round 0 of the sequence after the head of the chain, and start accepting events.
    pub(crate) fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.start_new_round(Round::init());
        self.process_ready();
    }

    /// Stop accepting events and cancel the round change timer.
    pub(crate) fn stop(&mut self) {
        self.started = false;
        self.timer.stop();
        self.ready.clear();
    }

    /// Process one input, then every message it caused to become ready.
    pub(crate) fn handle_event(&mut self, event: CoreEvent) {
        if !self.started {
            if let CoreEvent::Message { msg, .. } = event {
                self.drop_message(&msg, &CoreError::StoppedEngine);
            }
            return;
        }

        match event {
            CoreEvent::Request(block) => {
                if let Err(err) = self.handle_request(block) {
                    log::debug!("Ignoring proposal request: {:?}", err);
                }
            }
            CoreEvent::Message { msg, payload } => self.handle_inbound(msg, payload),
            CoreEvent::Timeout(view) => self.handle_timeout(view),
            CoreEvent::FinalCommitted => self.start_new_round(Round::init()),
        }

        self.process_ready();
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// Check whether this replica is the proposer of the current view.
    pub(crate) fn is_proposer(&self) -> bool {
        self.validator_set.is_proposer(&self.keypair.address())
    }

    /// Check whether the block with `hash` is the request this replica wants to propose in the current
    /// view.
    pub(crate) fn is_current_proposal(&self, hash: &CryptoHash) -> bool {
        self.current
            .as_ref()
            .and_then(|current| current.pending_request.as_ref())
            .is_some_and(|request| request.hash() == *hash)
    }

    pub(crate) fn current_view(&self) -> Option<View> {
        self.current.as_ref().map(|current| current.view())
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn is_waiting_for_round_change(&self) -> bool {
        self.waiting_for_round_change
    }

    pub(crate) fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /* ↓↓↓ Views ↓↓↓ */

    /// Enter `round` of the current sequence, or round 0 of the sequence after the head of the chain
    /// if the head has moved past the current sequence.
    fn start_new_round(&mut self, round: Round) {
        let last = self.chain.current_header();
        let last_sequence = Sequence::from(last.number);
        let last_proposer = if last.number.int() == 0 {
            None
        } else {
            last.author().ok()
        };

        // 1. Decide whether this is a round change within the current sequence, or a move to a new
        //    sequence.
        let mut round_change = false;
        if let Some(current) = &self.current {
            if last_sequence >= current.sequence() {
                log::trace!(
                    "Catching up to block {} from sequence {}",
                    last.number,
                    current.sequence()
                );
            } else if last_sequence + 1 == current.sequence() {
                if round.int() == 0 || round < current.round() {
                    return;
                }
                round_change = true;
            } else {
                log::warn!(
                    "Head of the chain ({}) is behind the current sequence ({})",
                    last.number,
                    current.sequence()
                );
                return;
            }
        }

        // 2. Compute the new view. A new sequence runs on the validator set after the head.
        let current_sequence = self.current.as_ref().map(|current| current.sequence());
        let new_view = match current_sequence {
            Some(sequence) if round_change => View::new(sequence, round),
            _ => {
                self.update_validator_set(&last);
                View::new(last_sequence + 1, Round::init())
            }
        };

        // 3. Reset the per-view state, keeping the lock across round changes.
        self.round_change_set = RoundChangeSet::new(new_view.sequence, self.validator_set.clone());
        self.update_round_state(new_view, round_change);
        let proposer = self.validator_set.calc_proposer(last_proposer, new_view.round);
        self.waiting_for_round_change = false;
        self.set_state(State::NewRound);

        // 4. After a round change, the new proposer proposes the locked proposal or its own request.
        if round_change && self.is_proposer() {
            let proposal = self.current.as_ref().and_then(|current| {
                if current.is_hash_locked() {
                    current.proposal().cloned()
                } else {
                    current.pending_request.clone()
                }
            });
            if let Some(proposal) = proposal {
                self.send_preprepare(proposal);
            }
        }

        let timeout = self.timer.arm(new_view, self.queue.clone());

        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            view: new_view,
            proposer,
            timeout,
        })
        .publish(&self.event_publisher);
    }

    /// Move to `view` of the current sequence and wait for round change, without entering
    /// [`State::NewRound`].
    fn catch_up_round(&mut self, view: View) {
        self.waiting_for_round_change = true;
        self.update_round_state(view, true);
        self.round_change_set.clear(view.round);
        self.timer.arm(view, self.queue.clone());
    }

    fn update_round_state(&mut self, view: View, round_change: bool) {
        let previous = self.current.take();
        self.current = Some(match previous {
            Some(previous) if round_change => {
                if previous.is_hash_locked() {
                    let locked_hash = previous.locked_hash();
                    RoundState::new(
                        view,
                        &self.validator_set,
                        locked_hash,
                        previous.preprepare,
                        previous.pending_request,
                    )
                } else {
                    RoundState::new(
                        view,
                        &self.validator_set,
                        None,
                        None,
                        previous.pending_request,
                    )
                }
            }
            _ => RoundState::new(view, &self.validator_set, None, None, None),
        });
    }

    fn update_validator_set(&mut self, head: &Header) {
        let snap = match self.snapshots.snapshot(&self.chain, head.number, head.hash()) {
            Ok(snap) => snap,
            Err(err) => {
                log::warn!(
                    "Keeping the current validator set, snapshot after block {} failed: {:?}",
                    head.number,
                    err
                );
                return;
            }
        };

        if snap.validator_set.to_vec() != self.validator_set.to_vec() {
            Event::UpdateValidatorSet(UpdateValidatorSetEvent {
                timestamp: SystemTime::now(),
                number: head.number,
                validators: snap.validators(),
            })
            .publish(&self.event_publisher);
        }
        self.validator_set = snap.validator_set.clone();
    }

    fn set_state(&mut self, state: State) {
        let advanced = state > self.state;
        self.state = state;

        // Progress within a view pushes the round change deadline back.
        if advanced && state < State::Committed {
            if let Some(view) = self.current_view() {
                self.timer.arm(view, self.queue.clone());
            }
        }

        if state == State::NewRound {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    fn handle_timeout(&mut self, view: View) {
        let Some(current_view) = self.current_view() else {
            return;
        };
        if view != current_view {
            return;
        }

        Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
        })
        .publish(&self.event_publisher);

        // Join a higher round that a weak certificate already asks for.
        if !self.waiting_for_round_change {
            if let Some(max_round) = self.round_change_set.max_round(self.validator_set.f() + 1) {
                if max_round > current_view.round {
                    self.send_round_change(max_round);
                    return;
                }
            }
        }

        let last = self.chain.current_header();
        if Sequence::from(last.number) >= current_view.sequence {
            self.start_new_round(Round::init());
        } else {
            self.send_next_round_change();
        }
    }

    /* ↓↓↓ Requests ↓↓↓ */

    fn handle_request(&mut self, block: Block) -> Result<(), CoreError> {
        let current = self.current.as_mut().ok_or(CoreError::StoppedEngine)?;
        let sequence = Sequence::from(block.number());
        if sequence > current.sequence() {
            log::trace!("Holding proposal request for future sequence {}", sequence);
            self.pending_requests.insert(sequence, block);
            return Err(CoreError::FutureMessage);
        }
        if sequence < current.sequence() {
            return Err(CoreError::OldMessage);
        }

        current.pending_request = Some(block.clone());
        if self.state == State::NewRound {
            self.send_preprepare(block);
        }
        Ok(())
    }

    fn process_pending_requests(&mut self) {
        let Some(sequence) = self.current.as_ref().map(|current| current.sequence()) else {
            return;
        };

        // Drop requests for sequences that are already past.
        self.pending_requests = self.pending_requests.split_off(&sequence);
        if let Some(block) = self.pending_requests.remove(&sequence) {
            if let Err(err) = self.handle_request(block) {
                log::debug!("Ignoring pending proposal request: {:?}", err);
            }
        }
    }

    /* ↓↓↓ Inbound messages ↓↓↓ */

    // Process a message from a peer, from the backlog, or from this replica itself.
    fn handle_inbound(&mut self, msg: ConsensusMessage, payload: Vec<u8>) {
        let from_me = msg.address == self.keypair.address();
        match self.handle_msg(&msg) {
            Ok(()) => {
                if !from_me {
                    self.gossiper.gossip(&self.validator_set, &payload);
                }
            }
            Err(CoreError::FutureMessage) if !from_me => {
                let stored = msg
                    .view()
                    .map_or(false, |view| self.backlog.insert(view, msg.clone(), payload));
                if !stored {
                    self.drop_message(&msg, &CoreError::FutureMessage);
                }
            }
            Err(err) => self.drop_message(&msg, &err),
        }
    }

    fn handle_msg(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        msg.verify().map_err(|_| CoreError::InvalidMessage)?;
        if !self.validator_set.contains(&msg.address) {
            return Err(CoreError::UnauthorizedAddress);
        }

        match msg.code {
            MessageCode::Preprepare => self.handle_preprepare(msg),
            MessageCode::Prepare => self.handle_prepare(msg),
            MessageCode::Commit => self.handle_commit(msg),
            MessageCode::RoundChange => self.handle_round_change(msg),
        }
    }

    fn check_message(&self, code: MessageCode, view: View) -> Result<(), CoreError> {
        let current_view = self.current_view().ok_or(CoreError::StoppedEngine)?;
        check_view(
            current_view,
            self.waiting_for_round_change,
            self.state,
            code,
            view,
        )
    }

    fn handle_preprepare(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        let preprepare = msg
            .decode_preprepare()
            .map_err(|_| CoreError::InvalidMessage)?;

        // 1. Check the view. An old Preprepare for a block that is already in the chain is answered with
        //    a Commit, so that a lagging proposer can still collect committed seals for it.
        if let Err(err) = self.check_message(MessageCode::Preprepare, preprepare.view) {
            if err == CoreError::OldMessage && self.is_committed_proposal_of(msg, &preprepare) {
                self.send_commit_for_old_block(Subject {
                    view: preprepare.view,
                    digest: preprepare.proposal.hash(),
                });
                return Ok(());
            }
            return Err(err);
        }

        // 2. Check that the Preprepare comes from the proposer and carries a valid proposal.
        if !self.validator_set.is_proposer(&msg.address) {
            return Err(CoreError::NotFromProposer);
        }
        if let Err(err) = self.verify_proposal(&preprepare.proposal) {
            self.send_next_round_change();
            return Err(CoreError::InvalidProposal(err));
        }

        // 3. Accept the proposal, unless it conflicts with the lock.
        if self.state == State::NewRound {
            let locked_hash = self.current.as_ref().and_then(|current| current.locked_hash());
            match locked_hash {
                Some(locked_hash) if locked_hash == preprepare.proposal.hash() => {
                    self.accept_preprepare(preprepare);
                    self.set_state(State::Prepared);
                    self.send_commit();
                }
                Some(_) => self.send_next_round_change(),
                None => {
                    self.accept_preprepare(preprepare);
                    self.set_state(State::Preprepared);
                    self.send_prepare();
                }
            }
        }

        Ok(())
    }

    fn handle_prepare(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        let prepare = msg.decode_subject().map_err(|_| CoreError::InvalidMessage)?;
        self.check_message(MessageCode::Prepare, prepare.view)?;
        self.verify_subject(&prepare)?;

        let quorum = self.validator_set.quorum();
        let current = self.current.as_mut().ok_or(CoreError::StoppedEngine)?;
        current.prepares.add(msg.clone())?;

        let matches_lock = current.locked_hash() == Some(prepare.digest);
        if (matches_lock || current.prepare_or_commit_len() >= quorum)
            && self.state < State::Prepared
        {
            current.lock_hash();
            self.set_state(State::Prepared);
            self.send_commit();
        }

        Ok(())
    }

    fn handle_commit(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        let commit = msg.decode_subject().map_err(|_| CoreError::InvalidMessage)?;
        self.check_message(MessageCode::Commit, commit.view)?;
        self.verify_subject(&commit)?;
        msg.verify_committed_seal(&commit.digest)
            .map_err(|_| CoreError::InvalidMessage)?;

        let quorum = self.validator_set.quorum();
        let current = self.current.as_mut().ok_or(CoreError::StoppedEngine)?;
        current.commits.add(msg.clone())?;

        if current.commits.len() >= quorum && self.state < State::Committed {
            current.lock_hash();
            self.commit()?;
        }

        Ok(())
    }

    fn handle_round_change(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        let round_change = msg.decode_subject().map_err(|_| CoreError::InvalidMessage)?;
        self.check_message(MessageCode::RoundChange, round_change.view)?;

        let current_view = self.current_view().ok_or(CoreError::StoppedEngine)?;
        let round = round_change.view.round;
        // A round without a successor could never be timed out of.
        if round.checked_next().is_none() {
            return Err(CoreError::InvalidMessage);
        }
        let num = self.round_change_set.add(round, msg.clone())?;

        // The quorum is checked first, since with F = 0 a single RoundChange is both a quorum and a
        // weak certificate.
        if num == self.validator_set.quorum()
            && (self.waiting_for_round_change || current_view.round < round)
        {
            self.start_new_round(round);
            Ok(())
        } else if self.waiting_for_round_change && num == self.validator_set.f() + 1 {
            // F + 1 RoundChanges form a weak certificate: at least one honest validator is already
            // there.
            if current_view.round < round {
                self.send_round_change(round);
            }
            Ok(())
        } else if current_view.round < round {
            Err(CoreError::FutureRound)
        } else {
            Ok(())
        }
    }

    fn accept_preprepare(&mut self, preprepare: Preprepare) {
        if let Some(current) = self.current.as_mut() {
            current.preprepare = Some(preprepare);
        }
    }

    // Check that a Prepare or Commit is about the proposal accepted in the current view.
    fn verify_subject(&self, subject: &Subject) -> Result<(), CoreError> {
        let expected = self
            .current
            .as_ref()
            .and_then(|current| current.subject())
            .ok_or(CoreError::InconsistentSubject)?;
        if expected != *subject {
            return Err(CoreError::InconsistentSubject);
        }
        Ok(())
    }

    fn verify_proposal(&self, proposal: &Block) -> Result<(), EngineError> {
        let head = self.chain.current_header();
        let sequence = self
            .current
            .as_ref()
            .map(|current| current.sequence())
            .ok_or(EngineError::StoppedEngine)?;
        if Sequence::from(proposal.number()) != sequence || proposal.header.parent_hash != head.hash()
        {
            return Err(EngineError::UnknownAncestor);
        }
        verify_proposal(&self.chain, &self.snapshots, proposal)
    }

    // Check whether an old Preprepare proposes a block that is in the chain, and was sent by the
    // proposer of the Preprepare's view.
    fn is_committed_proposal_of(&self, msg: &ConsensusMessage, preprepare: &Preprepare) -> bool {
        let proposal = &preprepare.proposal;
        let in_chain = self
            .chain
            .header_by_hash(&proposal.hash())
            .is_some_and(|header| header.number == proposal.number());
        if !in_chain {
            return false;
        }

        let Ok(snap) = self.snapshots.parent_snapshot(
            &self.chain,
            proposal.number(),
            proposal.header.parent_hash,
        ) else {
            return false;
        };
        let previous_proposer = proposal
            .number()
            .parent()
            .filter(|parent| parent.int() > 0)
            .and_then(|parent| self.chain.header_by_number(parent))
            .and_then(|header| header.author().ok());

        let mut validator_set = snap.validator_set.clone();
        validator_set.calc_proposer(previous_proposer, preprepare.view.round);
        validator_set.is_proposer(&msg.address)
    }

    /* ↓↓↓ Commit ↓↓↓ */

    fn commit(&mut self) -> Result<(), CoreError> {
        self.set_state(State::Committed);

        let current = self.current.as_mut().ok_or(CoreError::StoppedEngine)?;
        let Some(mut block) = current.proposal().cloned() else {
            return Ok(());
        };
        block.header.extra.committed_seals = current
            .commits
            .values()
            .filter_map(|msg| msg.committed_seal)
            .collect();

        let hash = block.hash();
        let number = block.number();
        let committed_seals = block.header.extra.committed_seals.len();

        if let Err(err) = self.chain.commit(block) {
            if let Some(current) = self.current.as_mut() {
                current.unlock_hash();
            }
            self.send_next_round_change();
            return Err(CoreError::Chain(err));
        }

        Event::FinalCommitted(FinalCommittedEvent {
            timestamp: SystemTime::now(),
            block: hash,
            number,
            committed_seals,
        })
        .publish(&self.event_publisher);

        self.start_new_round(Round::init());
        Ok(())
    }

    /* ↓↓↓ Outbound messages ↓↓↓ */

    fn send_preprepare(&mut self, block: Block) {
        let Some(view) = self.current_view() else {
            return;
        };
        if Sequence::from(block.number()) != view.sequence || !self.is_proposer() {
            return;
        }

        let hash = block.hash();
        let number = block.number();
        let preprepare = Preprepare {
            view,
            proposal: block,
        };
        if self.broadcast(ConsensusMessage::preprepare(&self.keypair, &preprepare)) {
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                view,
                block: hash,
                number,
            })
            .publish(&self.event_publisher);
        }
    }

    fn send_prepare(&mut self) {
        let Some(subject) = self.current.as_ref().and_then(|current| current.subject()) else {
            return;
        };
        if self.broadcast(ConsensusMessage::prepare(&self.keypair, &subject)) {
            Event::Prepare(PrepareEvent {
                timestamp: SystemTime::now(),
                subject,
            })
            .publish(&self.event_publisher);
        }
    }

    fn send_commit(&mut self) {
        let Some(subject) = self.current.as_ref().and_then(|current| current.subject()) else {
            return;
        };
        self.send_commit_for(subject);
    }

    fn send_commit_for_old_block(&mut self, subject: Subject) {
        self.send_commit_for(subject);
    }

    fn send_commit_for(&mut self, subject: Subject) {
        if self.broadcast(ConsensusMessage::commit(&self.keypair, &subject)) {
            Event::Commit(CommitEvent {
                timestamp: SystemTime::now(),
                subject,
            })
            .publish(&self.event_publisher);
        }
    }

    fn send_next_round_change(&mut self) {
        let Some(view) = self.current_view() else {
            return;
        };
        match view.round.checked_next() {
            Some(round) => self.send_round_change(round),
            None => log::warn!("No round follows round {} of sequence {}", view.round, view.sequence),
        }
    }

    fn send_round_change(&mut self, round: Round) {
        let Some(current_view) = self.current_view() else {
            return;
        };
        if current_view.round >= round {
            log::trace!(
                "Not sending RoundChange for round {}, already in round {}",
                round,
                current_view.round
            );
            return;
        }

        let view = View::new(current_view.sequence, round);
        self.catch_up_round(view);

        if self.broadcast(ConsensusMessage::round_change(&self.keypair, view)) {
            Event::RoundChange(RoundChangeEvent {
                timestamp: SystemTime::now(),
                view,
            })
            .publish(&self.event_publisher);
        }
    }

    // Gossip a signed message to the other validators and queue it for processing by this replica.
    // Returns whether the message was sent.
    fn broadcast(&mut self, msg: Result<ConsensusMessage, SignatureError>) -> bool {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("Failed to sign consensus message: {}", err);
                return false;
            }
        };

        let payload = msg.encode();
        self.gossiper.gossip(&self.validator_set, &payload);
        self.ready.push_back(BacklogEntry { msg, payload });
        true
    }

    /* ↓↓↓ Queues ↓↓↓ */

    fn process_backlog(&mut self) {
        let Some(current_view) = self.current_view() else {
            return;
        };
        let waiting = self.waiting_for_round_change;
        let state = self.state;

        let ready = self.backlog.drain(|view, code| {
            match check_view(current_view, waiting, state, code, view) {
                Ok(()) => Disposition::Process,
                Err(CoreError::FutureMessage) => Disposition::Keep,
                Err(_) => Disposition::Discard,
            }
        });
        self.ready.extend(ready);
    }

    fn process_ready(&mut self) {
        while self.started {
            let Some(BacklogEntry { msg, payload }) = self.ready.pop_front() else {
                return;
            };
            self.handle_inbound(msg, payload);
        }
    }

    fn drop_message(&self, msg: &ConsensusMessage, reason: &CoreError) {
        log::debug!(
            "Dropping {:?} from {}: {:?}",
            msg.code,
            msg.address,
            reason
        );
        Event::DropMessage(DropMessageEvent {
            timestamp: SystemTime::now(),
            origin: msg.address,
            code: msg.code,
            reason: format!("{:?}", reason),
        })
        .publish(&self.event_publisher);
    }
}

/// Classify a message with `code` for `view`, received in `current_view` and `state`:
/// - RoundChanges are future if they are for a later sequence, and old if they are for an earlier
///   view.
/// - Other messages are future if they are for a later view, if the replica is waiting for round
///   change, or if they are a Prepare or Commit arriving before the Preprepare. They are old if they
///   are for an earlier view.
fn check_view(
    current_view: View,
    waiting_for_round_change: bool,
    state: State,
    code: MessageCode,
    view: View,
) -> Result<(), CoreError> {
    if code == MessageCode::RoundChange {
        if view.sequence > current_view.sequence {
            return Err(CoreError::FutureMessage);
        }
        if view < current_view {
            return Err(CoreError::OldMessage);
        }
        return Ok(());
    }

    if view > current_view {
        return Err(CoreError::FutureMessage);
    }
    if view < current_view {
        return Err(CoreError::OldMessage);
    }
    if waiting_for_round_change {
        return Err(CoreError::FutureMessage);
    }
    if state == State::NewRound && code != MessageCode::Preprepare {
        return Err(CoreError::FutureMessage);
    }
    Ok(())
}

/// Reasons why the core did not act on an input. None of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The message is for a view that the replica has already left.
    OldMessage,
    /// The message cannot be processed yet. Messages from peers are kept in the backlog.
    FutureMessage,
    /// A RoundChange for a future round that has not reached a quorum yet. It is counted, but not
    /// relayed.
    FutureRound,
    /// A Prepare or Commit does not match the proposal accepted in the current view.
    InconsistentSubject,
    /// A Preprepare was not sent by the proposer of its view.
    NotFromProposer,
    /// The message is malformed, or its signature or committed seal does not verify.
    InvalidMessage,
    InvalidProposal(EngineError),
    /// The sender is not a validator.
    UnauthorizedAddress,
    StoppedEngine,
    /// The chain rejected a block that collected a quorum of Commits.
    Chain(ChainError),
}

impl From<MessageSetError> for CoreError {
    fn from(value: MessageSetError) -> Self {
        match value {
            MessageSetError::UnauthorizedAddress(_) => CoreError::UnauthorizedAddress,
        }
    }
}
