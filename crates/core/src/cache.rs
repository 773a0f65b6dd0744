// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded TTL cache used for authorization and collaborator lookups.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    inserted_ms: u64,
}

/// An LRU cache whose entries also expire after a fixed TTL.
///
/// Reads evict expired entries lazily. Safe for multi-reader access; the
/// critical section is a single LRU operation.
pub struct TtlCache<K: Hash + Eq, V: Clone, C: Clock> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    clock: C,
}

impl<K: Hash + Eq, V: Clone, C: Clock> TtlCache<K, V, C> {
    pub fn new(capacity: usize, ttl: Duration, clock: C) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl, clock }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.epoch_ms();
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) if now.saturating_sub(entry.inserted_ms) < self.ttl.as_millis() as u64 => {
                Some(entry.value.clone())
            }
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let entry = Entry { value, inserted_ms: self.clock.epoch_ms() };
        self.inner.lock().put(key, entry);
    }

    pub fn remove(&self, key: &K) {
        self.inner.lock().pop(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
