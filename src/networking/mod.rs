/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bridge between the consensus state machine and the peer-to-peer network.
//!
//! Inbound messages are handled by [`receiving`], which decodes them, suppresses replays using the
//! caches in [`recent_cache`], and posts them onto the core's event queue. Outbound messages are gossiped
//! to validators by [`sending`]. The transport itself is provided by the library user as an
//! implementation of [`Network`](network::Network).

pub mod messages;

pub mod network;

pub mod receiving;

pub mod recent_cache;

pub(crate) mod sending;
