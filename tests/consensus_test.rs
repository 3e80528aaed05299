use std::{thread, time::Duration};

use istanbul_bft::{
    chain::Chain,
    engine::Engine,
    types::{
        data_types::{BlockNumber, Round},
        validator_set::ProposerPolicy,
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    keys::{address, genesis, signing_keys},
    logging::setup_logger,
    network::mock_network,
    node::{wait_until, Node},
};

#[test]
fn round_robin_consensus_test() {
    consensus_with_four_validators(ProposerPolicy::RoundRobin);
}

#[test]
fn sticky_proposer_consensus_test() {
    consensus_with_four_validators(ProposerPolicy::Sticky);
}

fn consensus_with_four_validators(policy: ProposerPolicy) {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 4 validators, and a genesis block that lists all of them.
    let keys = signing_keys(4);
    let validators: Vec<_> = keys.iter().map(address).collect();
    let genesis = genesis(&keys);

    // 1.2. Create a mock network connecting the 4 validators.
    let network_stubs = mock_network(validators.iter().copied());

    // 1.3. Simultaneously start all validators.
    let mut nodes: Vec<Node> = keys
        .into_iter()
        .zip(network_stubs)
        .map(|(key, network)| {
            Node::new(key, network, genesis.clone(), policy, Duration::from_secs(3))
        })
        .collect();

    // 2. Keep every validator sealing a block on top of its head until all of them have finalized 2
    //    blocks.
    log::debug!("Sealing blocks until every validator has finalized 2 blocks.");
    let mut attempts = 0;
    while nodes.iter().any(|node| node.height() < BlockNumber::new(2)) {
        attempts += 1;
        assert!(attempts < 2400, "Validators did not finalize 2 blocks in time.");
        for node in nodes.iter_mut() {
            node.seal_next_block();
        }
        thread::sleep(Duration::from_millis(50));
    }

    // 3. Every validator finalized the same blocks, each carrying a quorum of committed seals.
    for number in 1..=2 {
        let number = BlockNumber::new(number);
        let reference = nodes[0].chain().block(number).unwrap();
        for node in &nodes {
            let block = node.chain().block(number).unwrap();
            assert_eq!(block.hash(), reference.hash());
            assert!(block.is_correct());
            node.backend().verify_header(&block.header).unwrap();

            let author = node.backend().author(&block.header).unwrap();
            assert!(validators.contains(&author));

            let committers = block.header.committers().unwrap();
            assert!(committers.len() >= 3);
            assert!(committers.iter().all(|committer| validators.contains(committer)));
        }
    }

    // 4. Every validator reports finalizing both blocks.
    for node in &nodes {
        let expected = vec![
            node.chain().block(BlockNumber::new(1)).unwrap().hash(),
            node.chain().block(BlockNumber::new(2)).unwrap().hash(),
        ];
        wait_until(Duration::from_secs(5), "FinalCommitted events are handled", || {
            node.final_committed().len() >= 2
        });
        assert_eq!(node.final_committed()[0..2].to_vec(), expected);
    }

    // 5. If nobody needed a round change, the proposers are exactly the ones the policy picks.
    let no_round_changes = nodes.iter().all(|node| {
        node.start_rounds()
            .iter()
            .all(|view| view.round == Round::init())
    });
    if no_round_changes {
        let first_author = nodes[0]
            .chain()
            .header_by_number(BlockNumber::new(1))
            .unwrap()
            .author()
            .unwrap();
        let second_author = nodes[0]
            .chain()
            .header_by_number(BlockNumber::new(2))
            .unwrap()
            .author()
            .unwrap();

        // The block after genesis has no last proposer, so its proposer is the first validator.
        assert_eq!(first_author, validators[0]);
        match policy {
            ProposerPolicy::RoundRobin => assert_eq!(second_author, validators[1]),
            ProposerPolicy::Sticky => assert_eq!(second_author, validators[0]),
        }
    }

    // 6. Every validator has moved on to the sequence after its head.
    for node in &nodes {
        let height = node.height();
        wait_until(Duration::from_secs(5), "the next sequence starts", || {
            node.backend()
                .current_view()
                .is_some_and(|view| view.sequence.int() >= height.int() + 1)
        });
        assert_eq!(node.backend().address(), node.address());
    }
}
