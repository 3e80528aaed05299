use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use istanbul_bft::{
    chain::{Chain, ChainError},
    types::{
        block::{Block, Header},
        data_types::{BlockNumber, CryptoHash},
    },
};

/// A chain that lives in memory. Clones share the same blocks.
#[derive(Clone)]
pub(crate) struct MemChain(Arc<Mutex<MemChainInner>>);

struct MemChainInner {
    blocks: Vec<Block>,
    by_hash: HashMap<CryptoHash, usize>,
}

impl MemChain {
    pub(crate) fn new(genesis: Header) -> MemChain {
        let genesis = Block::new(genesis, Vec::new());
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash(), 0);
        MemChain(Arc::new(Mutex::new(MemChainInner {
            blocks: vec![genesis],
            by_hash,
        })))
    }

    /// Append a block with `header` and no data, without checking anything, for setting up a chain
    /// by hand.
    pub(crate) fn push(&self, header: Header) {
        let block = Block {
            header,
            data: Vec::new(),
        };
        let mut inner = self.0.lock().unwrap();
        let index = inner.blocks.len();
        inner.by_hash.insert(block.hash(), index);
        inner.blocks.push(block);
    }

    pub(crate) fn height(&self) -> BlockNumber {
        self.current_header().number
    }

    pub(crate) fn block(&self, number: BlockNumber) -> Option<Block> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(number.int() as usize)
            .cloned()
    }
}

impl Chain for MemChain {
    fn current_header(&self) -> Header {
        let inner = self.0.lock().unwrap();
        inner.blocks[inner.blocks.len() - 1].header.clone()
    }

    fn header_by_number(&self, number: BlockNumber) -> Option<Header> {
        self.block(number).map(|block| block.header)
    }

    fn header_by_hash(&self, hash: &CryptoHash) -> Option<Header> {
        let inner = self.0.lock().unwrap();
        inner
            .by_hash
            .get(hash)
            .map(|index| inner.blocks[*index].header.clone())
    }

    fn commit(&mut self, block: Block) -> Result<(), ChainError> {
        let mut inner = self.0.lock().unwrap();
        let head = &inner.blocks[inner.blocks.len() - 1];
        if block.header.parent_hash != head.hash() || block.number() != head.number() + 1 {
            return Err(ChainError::NotExtendingHead);
        }
        let index = inner.blocks.len();
        inner.by_hash.insert(block.hash(), index);
        inner.blocks.push(block);
        Ok(())
    }
}
