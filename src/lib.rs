/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Istanbul Byzantine fault tolerant consensus engine, for permissioned
//! blockchains whose blocks are sealed by a set of known validators.
//!
//! ## Overview
//!
//! A network of `N` validators agrees on one block per height, and tolerates up to `F = (N - 1) / 3`
//! of them being Byzantine. Every finalized block carries the signatures ("committed seals") of a
//! quorum of validators, so any node can check its finality from the chain alone. The validator set
//! itself changes through votes that validators cast in the headers they propose.
//!
//! The crate is organized as follows:
//! - [`types`]: blocks, headers, addresses, signatures, and the validator set.
//! - [`core`]: the three-phase agreement protocol and its round change subprotocol.
//! - [`governance`]: replaying header votes into [snapshots](governance::snapshot::Snapshot) of the
//!   validator set.
//! - [`networking`]: the [`Network`](networking::network::Network) trait and gossip with replay
//!   suppression.
//! - [`engine`]: header verification and the [`Engine`](engine::Engine) trait that the node calls.
//! - [`backend`]: starting and stopping a validator.
//! - [`api`]: read-only queries and governance calls for an RPC layer.
//! - [`events`] and [`logging`]: what a running validator reports.
//!
//! ## Getting started
//!
//! Implement [`Network`](networking::network::Network) on top of the node's peer-to-peer stack and
//! [`Chain`](chain::Chain) on top of its block storage, then build a
//! [`Configuration`](backend::Configuration) and a [`BackendSpec`](backend::BackendSpec), and call
//! [`start`](backend::BackendSpec::start).

pub mod types;

pub mod core;

pub mod governance;

pub mod networking;

pub mod chain;

pub mod engine;

pub mod backend;

pub mod api;

pub mod events;

pub mod logging;

pub(crate) mod event_bus;
