/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fixed-capacity, least-recently-used caches that can be shared between threads.
//!
//! The gossip layer uses two kinds of these caches to avoid flooding the network:
//! 1. One global cache of the hashes of every consensus message this replica has already processed
//!    ("known messages").
//! 2. For each peer, a cache of the hashes of the consensus messages that the peer is known to have,
//!    either because it sent them to us or because we sent them to it ("recent messages"). The
//!    per-peer caches are themselves kept in a cache keyed by peer address, so that the number of
//!    tracked peers is bounded too.

use std::{
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use lru::LruCache;

use crate::types::data_types::{Address, CryptoHash};

/// A least-recently-used map holding at most `capacity` entries, guarded by its own lock.
pub struct RecentCache<K: Hash + Eq, V> {
    capacity: usize,
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> RecentCache<K, V> {
    /// Create an empty cache that holds at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Check whether the cache contains `key`, without updating its recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Insert `value` under `key`, evicting the least recently used entry if the cache is full.
    pub fn put(&self, key: K, value: V) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Hash + Eq, V: Clone> RecentCache<K, V> {
    /// Get a clone of the value under `key`, making it the most recently used entry.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Get a clone of the value under `key`, or insert and return the value produced by `default`.
    /// Either way, `key` becomes the most recently used entry.
    pub fn get_or_insert_with(&self, key: K, default: impl FnOnce() -> V) -> V {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = inner.get(&key) {
            return value.clone();
        }
        let value = default();
        inner.put(key, value.clone());
        value
    }
}

impl<K: Hash + Eq> RecentCache<K, ()> {
    /// Insert `key`. Returns whether `key` was already in the cache.
    pub fn mark(&self, key: K) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, ())
            .is_some()
    }
}

/// The "recent messages" and "known messages" caches described in the [module docs](self).
pub struct MessageCaches {
    inmemory_messages: usize,
    recent_messages: RecentCache<Address, Arc<RecentCache<CryptoHash, ()>>>,
    known_messages: RecentCache<CryptoHash, ()>,
}

impl MessageCaches {
    /// Create empty caches tracking at most `recent_messages_capacity` peers, and at most
    /// `inmemory_messages` hashes per peer and globally.
    pub fn new(recent_messages_capacity: usize, inmemory_messages: usize) -> Self {
        Self {
            inmemory_messages,
            recent_messages: RecentCache::new(recent_messages_capacity),
            known_messages: RecentCache::new(inmemory_messages),
        }
    }

    /// Record that `peer` has the message with `hash`. Returns whether this was already known.
    pub fn mark_peer(&self, peer: Address, hash: CryptoHash) -> bool {
        let inmemory_messages = self.inmemory_messages;
        self.recent_messages
            .get_or_insert_with(peer, || Arc::new(RecentCache::new(inmemory_messages)))
            .mark(hash)
    }

    /// Check whether `peer` is known to have the message with `hash`.
    pub fn peer_has(&self, peer: &Address, hash: &CryptoHash) -> bool {
        let inner = self
            .recent_messages
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner
            .peek(peer)
            .map_or(false, |peer_messages| peer_messages.contains(hash))
    }

    /// Record that this replica has processed the message with `hash`. Returns whether it already had.
    pub fn mark_known(&self, hash: CryptoHash) -> bool {
        self.known_messages.mark(hash)
    }

    /// Check whether this replica has processed the message with `hash`.
    pub fn is_known(&self, hash: &CryptoHash) -> bool {
        self.known_messages.contains(hash)
    }
}
