/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a validator's consensus engine.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the backend](BackendSpec) with:
//!   1. `BackendSpec::builder` to construct a `BackendSpecBuilder`,
//!   2. The setters of the `BackendSpecBuilder`, and
//!   3. The `BackendSpecBuilder::build` method to construct a [`BackendSpec`],
//! - The function to [start](BackendSpec::start) a [`Backend`] given its specification,
//! - [The type](Backend) which keeps the engine's threads alive, and implements [`Engine`].
//!
//! ## Threads
//!
//! A running backend owns up to three threads:
//! 1. The **core thread**, which takes [`CoreEvent`]s off the event queue one at a time and applies
//!    each to the consensus state machine while holding the state machine's write lock.
//! 2. The **poller thread**, which receives messages from the [`Network`] and hands them to the gossip
//!    handler. Messages the engine does not handle can be taken with
//!    [`recv_unhandled`](Backend::recv_unhandled).
//! 3. The **event bus thread**, if any event handler is registered or `log_events` is set.
//!
//! The state machine's lock is only held for reading by queries such as
//! [`is_proposer`](Backend::is_proposer), and never while posting onto the event queue.
//!
//! ## Starting a backend
//!
//! ```ignore
//! let backend =
//!     BackendSpec::builder()
//!     .network(network)
//!     .chain(chain)
//!     .configuration(configuration)
//!     .on_final_committed(final_committed_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.chain(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_start_round(...)`
//! - `.on_view_timeout(...)`
//! - `.on_propose(...)`
//! - `.on_prepare(...)`
//! - `.on_commit(...)`
//! - `.on_round_change(...)`
//! - `.on_receive_message(...)`
//! - `.on_drop_message(...)`
//! - `.on_final_committed(...)`
//! - `.on_update_validator_set(...)`
//!
//! The backend's [configuration](Configuration) is also defined using the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .epoch_length(EpochLength::new(30000))
//!     .proposer_policy(ProposerPolicy::RoundRobin)
//!     .request_timeout(Duration::from_secs(10))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    api::Api,
    chain::Chain,
    core::{
        event_queue::{event_queue, CoreEvent, EventQueueSender, OverflowPolicy},
        implementation::Core,
        round_state::State,
        timer::RoundChangeTimer,
    },
    engine::{self, Engine, EngineError},
    event_bus::*,
    events::*,
    governance::{candidates::Candidates, snapshot_store::SnapshotStore},
    networking::{
        messages::P2PMessage,
        network::Network,
        receiving::{start_polling, GossipHandler, HandleMsgError},
        recent_cache::MessageCaches,
        sending::Gossiper,
    },
    types::{
        block::{Block, Header, IstanbulExtra, ISTANBUL_DIGEST},
        crypto_primitives::{Keypair, SigningKey},
        data_types::{Address, BlockNumber, CryptoHash, EpochLength, View},
        validator_set::{ProposerPolicy, ValidatorSet},
    },
};

// How long the core thread waits for an event before checking for a shutdown signal.
const CORE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stores the user-defined parameters required to start the backend.
///
/// ## Round timeouts
///
/// Round `r` of every sequence times out after `request_timeout * 2^r`, but never after more than
/// `max_request_timeout`.
///
/// ## Event queue
///
/// Every input of the consensus state machine goes through a queue that holds at most
/// `event_queue_capacity` events. `event_queue_overflow` decides whether messages from the network
/// wait for space ([`OverflowPolicy::Block`]) or are dropped ([`OverflowPolicy::DropIncoming`]) when it
/// is full. Round timeouts, proposal requests, and chain head notifications always wait.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`

    Optional:
    - `.epoch_length(...)`
    - `.proposer_policy(...)`
    - `.request_timeout(...)`
    - `.max_request_timeout(...)`
    - `.event_queue_capacity(...)`
    - `.event_queue_overflow(...)`
    - `.backlog_capacity(...)`
    - `.recent_messages_capacity(...)`
    - `.inmemory_messages(...)`
    - `.inmemory_snapshots(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the validator's secp256k1 signing key, used to sign messages and seal blocks. Required."))]
    pub me: SigningKey,
    #[builder(default, setter(doc = "Set the number of blocks between checkpoints, at which pending votes are discarded. Optional, defaults to 30000."))]
    pub epoch_length: EpochLength,
    #[builder(default, setter(doc = "Set how the proposer of each view is chosen. Optional, defaults to round robin."))]
    pub proposer_policy: ProposerPolicy,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the timeout of round 0. Optional, defaults to 10 seconds."))]
    pub request_timeout: Duration,
    #[builder(default = Duration::from_secs(120), setter(doc = "Set the cap on round timeouts. Optional, defaults to 120 seconds."))]
    pub max_request_timeout: Duration,
    #[builder(default = 1024, setter(doc = "Set the maximum number of events waiting for the consensus state machine. Optional, defaults to 1024."))]
    pub event_queue_capacity: usize,
    #[builder(default, setter(doc = "Set what happens when the event queue is full. Optional, defaults to blocking the producer."))]
    pub event_queue_overflow: OverflowPolicy,
    #[builder(default = 1024, setter(doc = "Set the maximum number of early messages kept for later processing. Optional, defaults to 1024."))]
    pub backlog_capacity: usize,
    #[builder(default = 64, setter(doc = "Set the number of peers whose recently seen messages are remembered. Optional, defaults to 64."))]
    pub recent_messages_capacity: usize,
    #[builder(default = 1024, setter(doc = "Set the number of message hashes remembered per peer and for this validator. Optional, defaults to 1024."))]
    pub inmemory_messages: usize,
    #[builder(default = 128, setter(doc = "Set the number of validator set snapshots kept in memory. Optional, defaults to 128."))]
    pub inmemory_snapshots: usize,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional, defaults to false."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [`Backend`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [BackendSpec]. On the builder call the following methods to construct a valid [BackendSpec].

    Required:
    - `.network(...)`
    - `.chain(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start_round(...)`
    - `.on_view_timeout(...)`
    - `.on_propose(...)`
    - `.on_prepare(...)`
    - `.on_commit(...)`
    - `.on_round_change(...)`
    - `.on_receive_message(...)`
    - `.on_drop_message(...)`
    - `.on_final_committed(...)`
    - `.on_update_validator_set(...)`
"))]
pub struct BackendSpec<N: Network + 'static, C: Chain> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the chain that finalized blocks are appended to. The argument must implement the [Chain](crate::chain::Chain) trait. Required."))]
    chain: C,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run the backend. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the validator enters a new view. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the round change timer of the current view expires. Optional."))]
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the validator broadcasts a Preprepare. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after the validator broadcasts a Prepare. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitEvent>),
    doc = "Register a handler closure to be invoked after the validator broadcasts a Commit. Optional."))]
    on_commit: Option<HandlerPtr<CommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundChangeEvent>),
    doc = "Register a handler closure to be invoked after the validator broadcasts a RoundChange. Optional."))]
    on_round_change: Option<HandlerPtr<RoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveMessageEvent>),
    doc = "Register a handler closure to be invoked after a new consensus message is received. Optional."))]
    on_receive_message: Option<HandlerPtr<ReceiveMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DropMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DropMessageEvent>),
    doc = "Register a handler closure to be invoked after a consensus message is dropped. Optional."))]
    on_drop_message: Option<HandlerPtr<DropMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalCommittedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalCommittedEvent>),
    doc = "Register a handler closure to be invoked after a block is finalized and appended to the chain. Optional."))]
    on_final_committed: Option<HandlerPtr<FinalCommittedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateValidatorSetEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateValidatorSetEvent>),
    doc = "Register a handler closure to be invoked after the validator set changes. Optional."))]
    on_update_validator_set: Option<HandlerPtr<UpdateValidatorSetEvent>>,
}

impl<N: Network + 'static, C: Chain> BackendSpec<N, C> {
    /// Check the configuration and the genesis block, then start all threads and channels associated
    /// with running the backend, and return the handles to them in a [`Backend`] struct.
    pub fn start(self) -> Result<Backend<N, C>, StartupError> {
        let config = self.configuration;
        validate(&config)?;

        let genesis = self
            .chain
            .header_by_number(BlockNumber::new(0))
            .ok_or(StartupError::GenesisNotIstanbul)?;
        if !genesis.is_istanbul() {
            return Err(StartupError::GenesisNotIstanbul);
        }
        if genesis.extra.validators.is_empty() {
            return Err(StartupError::EmptyGenesisValidatorSet);
        }

        let keypair = Keypair::new(config.me);
        let snapshots = Arc::new(SnapshotStore::new(
            config.epoch_length,
            config.proposer_policy,
            config.inmemory_snapshots,
        ));
        let caches = Arc::new(MessageCaches::new(
            config.recent_messages_capacity,
            config.inmemory_messages,
        ));

        let event_handlers = EventHandlers::new(
            config.log_events,
            self.on_start_round,
            self.on_view_timeout,
            self.on_propose,
            self.on_prepare,
            self.on_commit,
            self.on_round_change,
            self.on_receive_message,
            self.on_drop_message,
            self.on_final_committed,
            self.on_update_validator_set,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (queue, events) = event_queue(config.event_queue_capacity, config.event_queue_overflow);

        let mut core = Core::new(
            keypair.clone(),
            self.chain.clone(),
            snapshots.clone(),
            Gossiper::new(self.network.clone(), keypair.address(), caches.clone()),
            queue.clone(),
            event_publisher.clone(),
            RoundChangeTimer::new(config.request_timeout, config.max_request_timeout),
            config.backlog_capacity,
        )?;
        core.start();
        let core = Arc::new(RwLock::new(core));
        let started = Arc::new(AtomicBool::new(true));

        let handler = GossipHandler::new(
            started.clone(),
            core.clone(),
            queue.clone(),
            caches.clone(),
            event_publisher,
        );

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        let (core_shutdown, core_shutdown_receiver) = mpsc::channel();
        let core_thread = start_core_thread(core.clone(), events, core_shutdown_receiver);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, unhandled) =
            start_polling(self.network, handler.clone(), poller_shutdown_receiver);

        Ok(Backend {
            keypair,
            chain: self.chain,
            snapshots,
            candidates: Candidates::new(),
            caches,
            started,
            core,
            queue,
            handler,
            unhandled: Mutex::new(unhandled),
            poller: Some(poller),
            poller_shutdown,
            core_thread: Some(core_thread),
            core_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

fn validate(config: &Configuration) -> Result<(), StartupError> {
    if config.epoch_length.int() == 0 {
        return Err(StartupError::InvalidEpochLength);
    }
    if config.event_queue_capacity == 0 {
        return Err(StartupError::InvalidQueueCapacity);
    }
    if config.recent_messages_capacity == 0
        || config.inmemory_messages == 0
        || config.inmemory_snapshots == 0
    {
        return Err(StartupError::InvalidCacheCapacity);
    }
    if config.request_timeout.is_zero() || config.max_request_timeout < config.request_timeout {
        return Err(StartupError::InvalidRequestTimeout);
    }
    Ok(())
}

fn start_core_thread<N: Network + 'static, C: Chain>(
    core: Arc<RwLock<Core<N, C>>>,
    events: Receiver<CoreEvent>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match events.recv_timeout(CORE_POLL_INTERVAL) {
            Ok(event) => core
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .handle_event(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

/// A handle to a running consensus engine. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Backend<N: Network + 'static, C: Chain> {
    keypair: Keypair,
    chain: C,
    snapshots: Arc<SnapshotStore>,
    candidates: Candidates,
    caches: Arc<MessageCaches>,
    started: Arc<AtomicBool>,
    core: Arc<RwLock<Core<N, C>>>,
    queue: EventQueueSender,
    handler: GossipHandler<N, C>,
    unhandled: Mutex<Receiver<(Address, P2PMessage)>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    core_thread: Option<JoinHandle<()>>,
    core_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network + 'static, C: Chain> Backend<N, C> {
    /// Get the address that this validator signs with.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Handle a message received from `peer`. Returns `Ok(false)` if the message belongs to another
    /// subprotocol of the node. See [`receiving`](crate::networking::receiving) for details.
    pub fn handle_msg(&self, peer: Address, message: &mut P2PMessage) -> Result<bool, HandleMsgError> {
        self.handler.handle_msg(peer, message)
    }

    /// Notify the engine that a block was appended to the chain by someone else, e.g., by block sync.
    pub fn new_chain_head(&self) -> Result<(), EngineError> {
        let started = self.read_core().is_started();
        if !started {
            return Err(EngineError::StoppedEngine);
        }
        self.queue.deliver(CoreEvent::FinalCommitted);
        Ok(())
    }

    /// Take a message that the engine received but did not handle, if there is one.
    pub fn recv_unhandled(&self) -> Option<(Address, P2PMessage)> {
        self.unhandled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    /// Check whether this validator is the proposer of its current view.
    pub fn is_proposer(&self) -> bool {
        self.read_core().is_proposer()
    }

    /// Check whether the block with `hash` is the block this validator wants to propose in its current
    /// view.
    pub fn is_current_proposal(&self, hash: &CryptoHash) -> bool {
        self.read_core().is_current_proposal(hash)
    }

    /// Get the view this validator is in, or `None` if it never started.
    pub fn current_view(&self) -> Option<View> {
        self.read_core().current_view()
    }

    pub fn state(&self) -> State {
        self.read_core().state()
    }

    pub fn is_waiting_for_round_change(&self) -> bool {
        self.read_core().is_waiting_for_round_change()
    }

    /// Get the validator set this validator currently runs consensus with.
    pub fn validator_set(&self) -> ValidatorSet {
        self.read_core().validator_set().clone()
    }

    /// Get the number of messages waiting in the backlog.
    pub fn backlog_len(&self) -> usize {
        self.read_core().backlog_len()
    }

    /// Check whether this validator has processed a consensus message whose payload hashes to `hash`.
    pub fn is_known_message(&self, hash: &CryptoHash) -> bool {
        self.caches.is_known(hash)
    }

    /// Check whether `peer` is known to have a consensus message whose payload hashes to `hash`.
    pub fn peer_has_message(&self, peer: &Address, hash: &CryptoHash) -> bool {
        self.caches.peer_has(peer, hash)
    }

    /// Get a handle on the candidates this validator votes on.
    pub fn candidates(&self) -> Candidates {
        self.candidates.clone()
    }

    fn read_core(&self) -> std::sync::RwLockReadGuard<'_, Core<N, C>> {
        self.core.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<N: Network + 'static, C: Chain> Engine for Backend<N, C> {
    type Api = Api<C>;

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        header.author().map_err(|_| EngineError::InvalidProposerSeal)
    }

    fn verify_header(&self, header: &Header) -> Result<(), EngineError> {
        engine::verify_header(&self.chain, &self.snapshots, header, true)
    }

    fn prepare(&self, header: &mut Header) -> Result<(), EngineError> {
        let parent = self
            .chain
            .header_by_hash(&header.parent_hash)
            .ok_or(EngineError::UnknownAncestor)?;
        if parent.number + 1 != header.number {
            return Err(EngineError::UnknownAncestor);
        }
        let snap = self
            .snapshots
            .parent_snapshot(&self.chain, header.number, header.parent_hash)?;

        header.mix_digest = ISTANBUL_DIGEST;
        header.extra = IstanbulExtra::default();
        if self.snapshots.epoch().is_checkpoint(header.number) {
            header.vote = None;
            header.extra.validators = snap.validators();
        } else {
            header.vote = self.candidates.pick_vote(&snap);
        }

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs());
        header.timestamp = now.max(parent.timestamp);
        Ok(())
    }

    fn seal(&self, mut block: Block) -> Result<(), EngineError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(EngineError::StoppedEngine);
        }

        let snap = self.snapshots.parent_snapshot(
            &self.chain,
            block.number(),
            block.header.parent_hash,
        )?;
        if !snap.validator_set.contains(&self.keypair.address()) {
            return Err(EngineError::UnauthorizedProposer(self.keypair.address()));
        }

        let proposer_seal = self
            .keypair
            .sign(&block.header.seal_hash())
            .map_err(|_| EngineError::Signing)?;
        block.header.extra.proposer_seal = Some(proposer_seal);
        block.header.extra.committed_seals.clear();

        self.queue.deliver(CoreEvent::Request(block));
        Ok(())
    }

    fn apis(&self) -> Api<C> {
        Api::new(
            self.keypair.address(),
            self.chain.clone(),
            self.snapshots.clone(),
            self.candidates.clone(),
        )
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Err(EngineError::StoppedEngine);
        }
        self.core
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
        Ok(())
    }
}

impl<N: Network + 'static, C: Chain> Drop for Backend<N, C> {
    fn drop(&mut self) {
        let _ = self.close();

        // The poller is stopped first, since it may be waiting for the core thread to make space in
        // the event queue.
        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }

        let _ = self.core_shutdown.send(());
        if let Some(core_thread) = self.core_thread.take() {
            let _ = core_thread.join();
        }

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// The chain has no genesis block, or its genesis block was not made for this engine.
    GenesisNotIstanbul,
    EmptyGenesisValidatorSet,
    InvalidEpochLength,
    InvalidQueueCapacity,
    InvalidCacheCapacity,
    InvalidRequestTimeout,
    /// The validator set after the head of the chain could not be reconstructed.
    Engine(EngineError),
}

impl From<EngineError> for StartupError {
    fn from(value: EngineError) -> Self {
        StartupError::Engine(value)
    }
}
