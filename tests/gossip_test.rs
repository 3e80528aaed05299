use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::Duration,
};

use istanbul_bft::{
    backend::{Backend, BackendSpec, Configuration},
    chain::{Chain, ChainError},
    core::{
        event_queue::OverflowPolicy,
        messages::{ConsensusMessage, Subject},
    },
    engine::Engine,
    networking::{
        messages::{NewBlockData, P2PMessage, ISTANBUL_MSG, NEW_BLOCK_MSG},
        network::Network,
        receiving::HandleMsgError,
    },
    types::{
        block::{Block, Header, IstanbulExtra},
        crypto_primitives::{keccak256, Keypair, SigningKey},
        data_types::{BlockNumber, CryptoHash, Round, Sequence, View},
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    keys::{address, genesis, seal, signing_keys},
    logging::setup_logger,
    mem_chain::MemChain,
    network::{mock_network, NetworkStub},
    node::wait_until,
};

fn start_backend(
    key: SigningKey,
    network: NetworkStub,
    genesis: Header,
    received: Arc<AtomicUsize>,
) -> Backend<NetworkStub, MemChain> {
    let configuration = Configuration::builder()
        .me(key)
        .request_timeout(Duration::from_secs(60))
        .max_request_timeout(Duration::from_secs(60))
        .build();

    BackendSpec::builder()
        .network(network)
        .chain(MemChain::new(genesis))
        .configuration(configuration)
        .on_receive_message(move |_| {
            received.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .start()
        .unwrap()
}

#[test]
fn replayed_consensus_messages_are_processed_once_test() {
    setup_logger(LevelFilter::Debug);

    let keys = signing_keys(4);
    let network_stubs = mock_network(keys.iter().map(address));
    let received = Arc::new(AtomicUsize::new(0));
    let mut backend = start_backend(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        received.clone(),
    );

    // 1. A RoundChange from validator 1 for a future round is accepted once.
    let round_change = ConsensusMessage::round_change(
        &Keypair::new(keys[1].clone()),
        View::new(Sequence::new(1), Round::new(1)),
    )
    .unwrap();
    let payload = round_change.encode();
    let hash = keccak256(&payload);

    let mut message = P2PMessage::new(ISTANBUL_MSG, payload.clone());
    assert_eq!(backend.handle_msg(address(&keys[1]), &mut message), Ok(true));
    assert!(backend.is_known_message(&hash));
    assert!(backend.peer_has_message(&address(&keys[1]), &hash));
    assert!(!backend.peer_has_message(&address(&keys[2]), &hash));

    wait_until(Duration::from_secs(5), "the message is received", || {
        received.load(Ordering::SeqCst) == 1
    });

    // 2. The same payload relayed by validator 2 is consumed, but not processed again.
    let mut replay = P2PMessage::new(ISTANBUL_MSG, payload);
    assert_eq!(backend.handle_msg(address(&keys[2]), &mut replay), Ok(true));
    assert!(backend.peer_has_message(&address(&keys[2]), &hash));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(received.load(Ordering::SeqCst), 1);

    // 3. Messages of other subprotocols are left alone, and malformed consensus messages are
    //    rejected.
    let mut other = P2PMessage::new(0x42, vec![1, 2, 3]);
    assert_eq!(backend.handle_msg(address(&keys[1]), &mut other), Ok(false));

    let mut malformed = P2PMessage::new(ISTANBUL_MSG, vec![0xff; 3]);
    assert_eq!(
        backend.handle_msg(address(&keys[1]), &mut malformed),
        Err(HandleMsgError::DecodeFailed)
    );

    // 4. A Prepare that arrives before any Preprepare waits in the backlog.
    let prepare = ConsensusMessage::prepare(
        &Keypair::new(keys[2].clone()),
        &Subject {
            view: View::new(Sequence::new(1), Round::init()),
            digest: keccak256(b"proposal"),
        },
    )
    .unwrap();
    let mut message = P2PMessage::new(ISTANBUL_MSG, prepare.encode());
    assert_eq!(backend.handle_msg(address(&keys[2]), &mut message), Ok(true));
    wait_until(Duration::from_secs(5), "the Prepare is backlogged", || {
        backend.backlog_len() == 1
    });

    // 5. Messages of other subprotocols that arrive through the network are kept for the node.
    let mut peer = network_stubs[3].clone();
    peer.send(address(&keys[0]), P2PMessage::new(0x42, vec![4, 5, 6]));
    let mut unhandled = None;
    wait_until(Duration::from_secs(5), "the message is set aside", || {
        unhandled = backend.recv_unhandled();
        unhandled.is_some()
    });
    let (origin, mut unhandled) = unhandled.unwrap();
    assert_eq!(origin, address(&keys[3]));
    assert_eq!(unhandled.read_payload().unwrap(), vec![4, 5, 6]);

    // 6. A stopped engine refuses consensus messages.
    backend.close().unwrap();
    let mut late = P2PMessage::new(
        ISTANBUL_MSG,
        ConsensusMessage::round_change(
            &Keypair::new(keys[3].clone()),
            View::new(Sequence::new(1), Round::new(1)),
        )
        .unwrap()
        .encode(),
    );
    assert_eq!(
        backend.handle_msg(address(&keys[3]), &mut late),
        Err(HandleMsgError::StoppedEngine)
    );
}

#[test]
fn accepted_messages_are_relayed_to_peers_that_lack_them_test() {
    setup_logger(LevelFilter::Debug);

    let keys = signing_keys(4);
    let mut network_stubs = mock_network(keys.iter().map(address));
    let backend = start_backend(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        Arc::new(AtomicUsize::new(0)),
    );

    // A RoundChange for the current view is accepted, and so relayed to the validators other than
    // its sender.
    let payload = ConsensusMessage::round_change(
        &Keypair::new(keys[1].clone()),
        View::new(Sequence::new(1), Round::init()),
    )
    .unwrap()
    .encode();
    let mut message = P2PMessage::new(ISTANBUL_MSG, payload.clone());
    assert_eq!(
        backend.handle_msg(address(&keys[1]), &mut message),
        Ok(true)
    );

    for stub in network_stubs[2..].iter_mut() {
        let mut relayed = None;
        wait_until(Duration::from_secs(5), "the message is relayed", || {
            relayed = stub.recv();
            relayed.is_some()
        });
        let (origin, mut relayed) = relayed.unwrap();
        assert_eq!(origin, address(&keys[0]));
        assert_eq!(relayed.code(), ISTANBUL_MSG);
        assert_eq!(relayed.read_payload().unwrap(), payload);
    }

    thread::sleep(Duration::from_millis(300));
    assert!(network_stubs[1].recv().is_none());
}

#[test]
fn own_block_announcements_are_consumed_by_the_proposer_test() {
    setup_logger(LevelFilter::Debug);

    let keys = signing_keys(4);
    let genesis = genesis(&keys);

    // 1. The first validator proposes in view (1, 0). It is kept from making progress by running
    //    without its peers.
    let proposer_stubs = mock_network(keys.iter().map(address));
    let proposer = start_backend(
        keys[0].clone(),
        proposer_stubs[0].clone(),
        genesis.clone(),
        Arc::new(AtomicUsize::new(0)),
    );
    wait_until(Duration::from_secs(5), "the proposer starts", || {
        proposer.is_proposer()
    });

    let mut header = Header {
        parent_hash: genesis.hash(),
        number: BlockNumber::new(1),
        timestamp: 0,
        mix_digest: CryptoHash::zero(),
        data_hash: CryptoHash::zero(),
        vote: None,
        extra: IstanbulExtra::default(),
    };
    proposer.prepare(&mut header).unwrap();
    let block = Block::new(header, b"proposal".to_vec());
    proposer.seal(block.clone()).unwrap();

    // Proposer seals are deterministic, so sealing the same header again yields the same block.
    let sealed = Block {
        header: seal(&keys[0], block.header.clone()),
        data: block.data.clone(),
    };
    wait_until(Duration::from_secs(5), "the proposal is pending", || {
        proposer.is_current_proposal(&sealed.hash())
    });

    // 2. The announcement of its own pending proposal is consumed by the proposer.
    let mut own = P2PMessage::new_block(sealed.clone(), 1);
    assert_eq!(proposer.handle_msg(address(&keys[1]), &mut own), Ok(true));
    let decoded: NewBlockData = own.decode().unwrap();
    assert_eq!(decoded.block, sealed);

    // 3. Announcements of other blocks are left for block sync, with their payload intact.
    let other = Block::new(sealed.header.clone(), b"another proposal".to_vec());
    let mut announcement = P2PMessage::new_block(other.clone(), 1);
    assert_eq!(
        proposer.handle_msg(address(&keys[1]), &mut announcement),
        Ok(false)
    );
    assert_eq!(announcement.code(), NEW_BLOCK_MSG);
    let decoded: NewBlockData = announcement.decode().unwrap();
    assert_eq!(decoded.block, other);

    // 4. A validator that is not the proposer leaves every announcement alone.
    let follower_stubs = mock_network(keys.iter().map(address));
    let follower = start_backend(
        keys[1].clone(),
        follower_stubs[1].clone(),
        genesis,
        Arc::new(AtomicUsize::new(0)),
    );
    wait_until(Duration::from_secs(5), "the follower starts", || {
        follower.current_view().is_some()
    });
    assert!(!follower.is_proposer());
    let mut own = P2PMessage::new_block(sealed.clone(), 1);
    assert_eq!(follower.handle_msg(address(&keys[0]), &mut own), Ok(false));
    let decoded: NewBlockData = own.decode().unwrap();
    assert_eq!(decoded.block, sealed);
}

/// A [`MemChain`] whose `commit` holds the calling thread until the chain is opened.
#[derive(Clone)]
struct GatedChain {
    inner: MemChain,
    entered: Arc<AtomicBool>,
    open: Arc<(Mutex<bool>, Condvar)>,
}

impl GatedChain {
    fn new(genesis: Header) -> GatedChain {
        GatedChain {
            inner: MemChain::new(genesis),
            entered: Arc::new(AtomicBool::new(false)),
            open: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn open(&self) {
        let (open, opened) = &*self.open;
        *open.lock().unwrap() = true;
        opened.notify_all();
    }
}

impl Chain for GatedChain {
    fn current_header(&self) -> Header {
        self.inner.current_header()
    }

    fn header_by_number(&self, number: BlockNumber) -> Option<Header> {
        self.inner.header_by_number(number)
    }

    fn header_by_hash(&self, hash: &CryptoHash) -> Option<Header> {
        self.inner.header_by_hash(hash)
    }

    fn commit(&mut self, block: Block) -> Result<(), ChainError> {
        self.entered.store(true, Ordering::SeqCst);
        let (open, opened) = &*self.open;
        let mut is_open = open.lock().unwrap();
        while !*is_open {
            is_open = opened.wait(is_open).unwrap();
        }
        drop(is_open);
        self.inner.commit(block)
    }
}

#[test]
fn messages_dropped_by_a_full_queue_are_not_remembered_test() {
    setup_logger(LevelFilter::Debug);

    // 1. A lone validator with room for a single event, dropping messages that do not fit.
    let keys = signing_keys(3);
    let network_stubs = mock_network(keys.iter().map(address));
    let chain = GatedChain::new(genesis(&keys[..1]));
    let configuration = Configuration::builder()
        .me(keys[0].clone())
        .request_timeout(Duration::from_secs(60))
        .max_request_timeout(Duration::from_secs(60))
        .event_queue_capacity(1)
        .event_queue_overflow(OverflowPolicy::DropIncoming)
        .build();
    let backend = BackendSpec::builder()
        .network(network_stubs[0].clone())
        .chain(chain.clone())
        .configuration(configuration)
        .build()
        .start()
        .unwrap();
    wait_until(Duration::from_secs(5), "the first view starts", || {
        backend.is_proposer()
    });

    // 2. Its proposal is committed at once, and the chain holds the core thread in the commit.
    let mut header = Header {
        parent_hash: chain.current_header().hash(),
        number: BlockNumber::new(1),
        timestamp: 0,
        mix_digest: CryptoHash::zero(),
        data_hash: CryptoHash::zero(),
        vote: None,
        extra: IstanbulExtra::default(),
    };
    backend.prepare(&mut header).unwrap();
    backend.seal(Block::new(header, b"proposal".to_vec())).unwrap();
    wait_until(Duration::from_secs(5), "the core thread commits", || {
        chain.entered.load(Ordering::SeqCst)
    });

    // 3. The first message fills the queue. The second is dropped, and so is not remembered as
    //    processed.
    let message_from = |index: usize, round: u64| {
        ConsensusMessage::round_change(
            &Keypair::new(keys[index].clone()),
            View::new(Sequence::new(1), Round::new(round)),
        )
        .unwrap()
        .encode()
    };
    let queued = message_from(1, 1);
    let dropped = message_from(2, 1);

    let mut message = P2PMessage::new(ISTANBUL_MSG, queued.clone());
    assert_eq!(backend.handle_msg(address(&keys[1]), &mut message), Ok(true));
    assert!(backend.is_known_message(&keccak256(&queued)));

    let mut message = P2PMessage::new(ISTANBUL_MSG, dropped.clone());
    assert_eq!(backend.handle_msg(address(&keys[2]), &mut message), Ok(true));
    assert!(!backend.is_known_message(&keccak256(&dropped)));
    assert!(backend.peer_has_message(&address(&keys[2]), &keccak256(&dropped)));

    // 4. Once the core thread drains the queue, a relayed copy of the dropped message gets through.
    chain.open();
    wait_until(Duration::from_secs(5), "the relayed copy is queued", || {
        let mut relayed = P2PMessage::new(ISTANBUL_MSG, dropped.clone());
        assert_eq!(backend.handle_msg(address(&keys[1]), &mut relayed), Ok(true));
        backend.is_known_message(&keccak256(&dropped))
    });
    wait_until(Duration::from_secs(5), "block 1 is committed", || {
        chain.inner.height() == BlockNumber::new(1)
    });
}
