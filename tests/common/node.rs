use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant, SystemTime},
};

use istanbul_bft::{
    backend::{Backend, BackendSpec, Configuration},
    chain::Chain,
    engine::Engine,
    events::{FinalCommittedEvent, StartRoundEvent},
    types::{
        block::{Block, Header, IstanbulExtra},
        crypto_primitives::SigningKey,
        data_types::{Address, BlockNumber, CryptoHash, EpochLength, View},
        validator_set::ProposerPolicy,
    },
};

use crate::common::{keys::address, mem_chain::MemChain, network::NetworkStub};

/// A validator running on an in-memory chain, connected to its peers through a [`NetworkStub`].
pub(crate) struct Node {
    address: Address,
    chain: MemChain,
    backend: Backend<NetworkStub, MemChain>,
    last_sealed: Option<BlockNumber>,
    start_rounds: Arc<Mutex<Vec<View>>>,
    final_committed: Arc<Mutex<Vec<CryptoHash>>>,
}

impl Node {
    pub(crate) fn new(
        key: SigningKey,
        network: NetworkStub,
        genesis: Header,
        proposer_policy: ProposerPolicy,
        request_timeout: Duration,
    ) -> Node {
        let address = address(&key);
        let chain = MemChain::new(genesis);
        let start_rounds = Arc::new(Mutex::new(Vec::new()));
        let final_committed = Arc::new(Mutex::new(Vec::new()));

        let configuration = Configuration::builder()
            .me(key)
            .epoch_length(EpochLength::new(30000))
            .proposer_policy(proposer_policy)
            .request_timeout(request_timeout)
            .max_request_timeout(request_timeout * 8)
            .log_events(true)
            .build();

        let backend = BackendSpec::builder()
            .network(network)
            .chain(chain.clone())
            .configuration(configuration)
            .on_start_round(start_round_handler(start_rounds.clone()))
            .on_final_committed(final_committed_handler(final_committed.clone()))
            .build()
            .start()
            .unwrap();

        Node {
            address,
            chain,
            backend,
            last_sealed: None,
            start_rounds,
            final_committed,
        }
    }

    /// Prepare and seal a block on top of the head of the chain, unless one was already sealed for
    /// the same height.
    pub(crate) fn seal_next_block(&mut self) {
        let head = self.chain.current_header();
        let number = head.number + 1;
        if self.last_sealed == Some(number) {
            return;
        }

        let mut header = Header {
            parent_hash: head.hash(),
            number,
            timestamp: 0,
            mix_digest: CryptoHash::zero(),
            data_hash: CryptoHash::zero(),
            vote: None,
            extra: IstanbulExtra::default(),
        };
        self.backend.prepare(&mut header).unwrap();
        let block = Block::new(header, number.int().to_le_bytes().to_vec());
        self.backend.seal(block).unwrap();
        self.last_sealed = Some(number);
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn height(&self) -> BlockNumber {
        self.chain.height()
    }

    pub(crate) fn chain(&self) -> &MemChain {
        &self.chain
    }

    pub(crate) fn backend(&self) -> &Backend<NetworkStub, MemChain> {
        &self.backend
    }

    /// Get the views this node has started, in order.
    pub(crate) fn start_rounds(&self) -> Vec<View> {
        self.start_rounds.lock().unwrap().clone()
    }

    /// Get the hashes of the blocks this node has finalized, in order.
    pub(crate) fn final_committed(&self) -> Vec<CryptoHash> {
        self.final_committed.lock().unwrap().clone()
    }
}

fn start_round_handler(
    start_rounds: Arc<Mutex<Vec<View>>>,
) -> impl Fn(&StartRoundEvent) + Send + 'static {
    move |start_round_event| start_rounds.lock().unwrap().push(start_round_event.view)
}

fn final_committed_handler(
    final_committed: Arc<Mutex<Vec<CryptoHash>>>,
) -> impl Fn(&FinalCommittedEvent) + Send + 'static {
    move |final_committed_event| {
        log::debug!(
            "Finalized block {} at {:?}",
            final_committed_event.number,
            SystemTime::now()
        );
        final_committed.lock().unwrap().push(final_committed_event.block)
    }
}

/// Poll `condition` every 50 milliseconds until it holds, panicking if it does not within `timeout`.
pub(crate) fn wait_until(timeout: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("Timed out waiting until {}", what);
        }
        thread::sleep(Duration::from_millis(50));
    }
}
