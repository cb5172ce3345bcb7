// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded, approximate index of which replicas hold which prefix blocks.
//!
//! # Structure
//!
//! - `recency`: replica -> LRU of block hashes, capped at
//!   `capacity` entries. Each replica's KV cache is physically independent,
//!   so recency and eviction are tracked per replica; a global LRU would
//!   cross-evict between replicas and skew scoring.
//! - `replicas_by_hash`: hash -> set of replicas. The reverse index serving
//!   lookups in expected O(1), sharded by hash so readers never contend
//!   with each other.
//!
//! The index is an approximation of remote KV-cache state and is allowed to
//! be stale the moment it is read. Eviction errs toward undercounting:
//! a false negative costs one cold route, a false positive routes to a
//! replica that already dropped the prefix.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lru::LruCache;

use crate::protocols::{BlockHash, ReplicaId};

pub struct PrefixCacheIndexer {
    capacity: NonZeroUsize,
    recency: DashMap<ReplicaId, LruCache<BlockHash, ()>>,
    replicas_by_hash: DashMap<BlockHash, HashSet<ReplicaId>>,
}

impl PrefixCacheIndexer {
    /// `capacity` bounds how many block hashes may reference a single
    /// replica at once.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: NonZeroUsize::new(capacity.max(1)).unwrap(),
            recency: DashMap::new(),
            replicas_by_hash: DashMap::new(),
        }
    }

    /// Replicas believed to hold `hash`. Returns an owned snapshot that may
    /// be stale by the time the caller iterates it.
    pub fn get(&self, hash: BlockHash) -> HashSet<ReplicaId> {
        self.replicas_by_hash
            .get(&hash)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Record that `replica` now holds `hashes`, refreshing recency for
    /// pairs already present and evicting the replica's least-recently
    /// touched hashes beyond capacity. Best-effort: never fails.
    pub fn add(&self, hashes: &[BlockHash], replica: &ReplicaId) {
        if hashes.is_empty() {
            return;
        }

        let mut cache = self
            .recency
            .entry(replica.clone())
            .or_insert_with(|| LruCache::new(self.capacity));

        for &hash in hashes {
            match cache.push(hash, ()) {
                // Re-add of a present pair: recency touched, membership
                // already recorded.
                Some((old, ())) if old == hash => continue,
                // Capacity eviction: the evicted hash no longer counts for
                // this replica.
                Some((evicted, ())) => self.forget(evicted, replica),
                None => {}
            }
            self.replicas_by_hash
                .entry(hash)
                .or_default()
                .insert(replica.clone());
        }
    }

    /// Drop `replica` from `hash`'s membership set, removing the entry
    /// entirely once the set is empty.
    fn forget(&self, hash: BlockHash, replica: &ReplicaId) {
        if let Entry::Occupied(mut entry) = self.replicas_by_hash.entry(hash) {
            entry.get_mut().remove(replica);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}
