/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validator set governance through on-chain votes.
//!
//! Validators vote to add or remove validators by placing a vote in the headers they seal (see
//! [`snapshot`]). Which votes a replica places is decided by its [`candidates`], which are set through
//! the [API](crate::api). The validator set at any block is reconstructed, and memoized, by the
//! [`snapshot_store`].

pub mod candidates;

pub mod snapshot;

pub mod snapshot_store;
