pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod mem_chain;

pub(crate) mod network;

pub(crate) mod node;
