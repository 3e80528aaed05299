/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the engine.
//!
//! Other types, specific to single components, can be found in the modules of their components, e.g.,
//! [`crate::core::messages`].

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod validator_set;
