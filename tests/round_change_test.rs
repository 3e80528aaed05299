use std::{thread, time::Duration};

use istanbul_bft::{
    chain::Chain,
    core::{messages::ConsensusMessage, State},
    networking::{
        messages::{P2PMessage, ISTANBUL_MSG},
        network::Network,
    },
    types::{
        crypto_primitives::Keypair,
        data_types::{Round, Sequence, View},
        validator_set::ProposerPolicy,
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    keys::{address, child, commit, genesis, seal, signing_keys},
    logging::setup_logger,
    network::mock_network,
    node::{wait_until, Node},
};

#[test]
fn quorum_of_round_changes_moves_to_higher_round_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start only the first of 4 validators, so that it cannot make progress on its own.
    let keys = signing_keys(4);
    let network_stubs = mock_network(keys.iter().map(address));
    let node = Node::new(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        ProposerPolicy::RoundRobin,
        Duration::from_secs(60),
    );
    let start = View::new(Sequence::new(1), Round::init());
    wait_until(Duration::from_secs(5), "the first view starts", || {
        node.backend().current_view() == Some(start)
    });

    // 2. The other 3 validators, a quorum, ask for round 3.
    let target = View::new(Sequence::new(1), Round::new(3));
    for key in &keys[1..] {
        let payload = ConsensusMessage::round_change(&Keypair::new(key.clone()), target)
            .unwrap()
            .encode();
        let mut message = P2PMessage::new(ISTANBUL_MSG, payload);
        assert_eq!(node.backend().handle_msg(address(key), &mut message), Ok(true));
    }

    // 3. The validator jumps straight to round 3, whose proposer is the fourth validator.
    wait_until(Duration::from_secs(5), "round 3 starts", || {
        node.backend().current_view() == Some(target)
    });
    assert_eq!(node.backend().state(), State::NewRound);
    assert!(!node.backend().is_waiting_for_round_change());
    assert!(!node.backend().is_proposer());

    wait_until(Duration::from_secs(5), "StartRound events are handled", || {
        node.start_rounds().len() >= 2
    });
    assert_eq!(node.start_rounds(), vec![start, target]);
}

#[test]
fn expired_round_asks_for_next_round_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start only the first of 4 validators, with a short round timeout.
    let keys = signing_keys(4);
    let mut network_stubs = mock_network(keys.iter().map(address));
    let node = Node::new(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        ProposerPolicy::RoundRobin,
        Duration::from_millis(300),
    );

    // 2. Nothing happens in round 0, so the validator gives up on it and waits for its peers to
    //    agree on round 1.
    wait_until(Duration::from_secs(5), "round 0 expires", || {
        node.backend().is_waiting_for_round_change()
    });
    assert!(node
        .backend()
        .current_view()
        .is_some_and(|view| view.round >= Round::new(1)));

    // 3. Its peers are asked to move to round 1.
    let mut round_change = None;
    wait_until(Duration::from_secs(5), "a RoundChange arrives", || {
        round_change = network_stubs[1].recv();
        round_change.is_some()
    });
    let (origin, mut message) = round_change.unwrap();
    assert_eq!(origin, address(&keys[0]));

    let msg = ConsensusMessage::decode(&message.read_payload().unwrap()).unwrap();
    msg.verify().unwrap();
    assert_eq!(msg.address, address(&keys[0]));
    assert_eq!(
        msg.view().unwrap(),
        View::new(Sequence::new(1), Round::new(1))
    );
}

#[test]
fn imported_block_moves_to_next_sequence_test() {
    setup_logger(LevelFilter::Debug);

    let keys = signing_keys(4);
    let network_stubs = mock_network(keys.iter().map(address));
    let node = Node::new(
        keys[1].clone(),
        network_stubs[1].clone(),
        genesis(&keys),
        ProposerPolicy::RoundRobin,
        Duration::from_secs(60),
    );
    wait_until(Duration::from_secs(5), "the first view starts", || {
        node.backend().current_view() == Some(View::new(Sequence::new(1), Round::init()))
    });

    // A block finalized by the other validators arrives through block sync.
    let head = node.chain().current_header();
    let imported = commit(&keys[..3], seal(&keys[0], child(&head, None)));
    node.chain().push(imported);
    node.backend().new_chain_head().unwrap();

    // The proposer of sequence 2 follows the author of block 1 under round robin.
    wait_until(Duration::from_secs(5), "sequence 2 starts", || {
        node.backend().current_view() == Some(View::new(Sequence::new(2), Round::init()))
    });
    assert!(node.backend().is_proposer());
    assert_eq!(node.backend().validator_set().len(), 4);
}

#[test]
fn single_validator_keeps_committing_after_round_changes_test() {
    setup_logger(LevelFilter::Debug);

    // 1. A lone validator is its own quorum, and is left idle for a few rounds.
    let keys = signing_keys(1);
    let network_stubs = mock_network(keys.iter().map(address));
    let mut node = Node::new(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        ProposerPolicy::RoundRobin,
        Duration::from_millis(100),
    );
    wait_until(Duration::from_secs(5), "a round change completes", || {
        node.start_rounds()
            .iter()
            .any(|view| view.round >= Round::new(1))
    });

    // 2. Every round change starts the next round right away, so the validator never stays waiting
    //    and goes on committing blocks.
    wait_until(Duration::from_secs(10), "2 blocks are committed", || {
        node.seal_next_block();
        node.height().int() >= 2
    });
    assert!(!node.backend().is_waiting_for_round_change());
    wait_until(Duration::from_secs(5), "FinalCommitted events are handled", || {
        node.final_committed().len() >= 2
    });
}

#[test]
fn round_changes_for_last_round_are_dropped_test() {
    setup_logger(LevelFilter::Debug);

    let keys = signing_keys(4);
    let network_stubs = mock_network(keys.iter().map(address));
    let node = Node::new(
        keys[0].clone(),
        network_stubs[0].clone(),
        genesis(&keys),
        ProposerPolicy::RoundRobin,
        Duration::from_secs(60),
    );
    let start = View::new(Sequence::new(1), Round::init());
    wait_until(Duration::from_secs(5), "the first view starts", || {
        node.backend().current_view() == Some(start)
    });

    let send_round_changes = |view: View| {
        for key in &keys[1..] {
            let payload = ConsensusMessage::round_change(&Keypair::new(key.clone()), view)
                .unwrap()
                .encode();
            let mut message = P2PMessage::new(ISTANBUL_MSG, payload);
            assert_eq!(node.backend().handle_msg(address(key), &mut message), Ok(true));
        }
    };

    // 1. A quorum asking for a round that no round can follow is ignored.
    send_round_changes(View::new(Sequence::new(1), Round::new(u64::MAX)));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(node.backend().current_view(), Some(start));

    // 2. The validator still follows a quorum asking for an ordinary round.
    let target = View::new(Sequence::new(1), Round::new(2));
    send_round_changes(target);
    wait_until(Duration::from_secs(5), "round 2 starts", || {
        node.backend().current_view() == Some(target)
    });
}
