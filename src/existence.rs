//! # Existence Cache
//!
//! Bounded, sharded set of document ids known to exist in the store.
//!
//! Each shard owns its own `LruCache` behind a `parking_lot::RwLock`, so
//! concurrent workers only contend when their ids hash to the same shard.
//! Shard capacities are split so they sum exactly to the configured total;
//! the cache therefore never holds more ids than that total.
//!
//! A miss is never wrong, only slower: the caller falls back to a direct
//! existence probe against the store.

use lru::LruCache;
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which entry makes room when a shard is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest recorded id goes first; lookups do not reorder.
    #[default]
    Fifo,
    /// Least recently looked-up id goes first.
    Lru,
}

#[derive(Debug, Default)]
struct ShardStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

struct CacheShard {
    ids: RwLock<LruCache<String, ()>>,
    stats: ShardStats,
}

impl CacheShard {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ids: RwLock::new(LruCache::new(capacity)),
            stats: ShardStats::default(),
        }
    }

    fn contains(&self, id: &str, policy: EvictionPolicy) -> bool {
        let found = match policy {
            EvictionPolicy::Fifo => self.ids.read().contains(id),
            EvictionPolicy::Lru => self.ids.write().get(id).is_some(),
        };
        let counter = if found {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn record(&self, id: &str, policy: EvictionPolicy) {
        let mut ids = self.ids.write();
        if ids.contains(id) {
            if policy == EvictionPolicy::Lru {
                ids.promote(id);
            }
            return;
        }
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        if ids.push(id.to_string(), ()).is_some() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn len(&self) -> usize {
        self.ids.read().len()
    }
}

/// Aggregate statistics for the existence cache
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExistenceStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub num_shards: usize,
    pub capacity: usize,
    pub len: usize,
}

impl ExistenceStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ExistenceCache {
    shards: Vec<CacheShard>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl ExistenceCache {
    /// Cache of at most `capacity` ids over up to `2^shard_bits` shards.
    pub fn new(capacity: usize, shard_bits: u32, policy: EvictionPolicy) -> Self {
        let requested = 1usize.checked_shl(shard_bits).unwrap_or(usize::MAX);
        let num_shards = requested.min(capacity);
        let shards = shard_capacities(capacity, num_shards)
            .filter_map(NonZeroUsize::new)
            .map(CacheShard::new)
            .collect();
        Self {
            shards,
            capacity,
            policy,
        }
    }

    #[inline]
    fn shard(&self, id: &str) -> Option<&CacheShard> {
        if self.shards.is_empty() {
            return None;
        }
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards.get(idx)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shard(id)
            .is_some_and(|shard| shard.contains(id, self.policy))
    }

    /// Remember that `id` exists. Recording a known id is a no-op.
    pub fn record(&self, id: &str) {
        if let Some(shard) = self.shard(id) {
            shard.record(id, self.policy);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(CacheShard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn stats(&self) -> ExistenceStats {
        let mut stats = ExistenceStats::default();
        for shard in &self.shards {
            stats.hits += shard.stats.hits.load(Ordering::Relaxed);
            stats.misses += shard.stats.misses.load(Ordering::Relaxed);
            stats.insertions += shard.stats.insertions.load(Ordering::Relaxed);
            stats.evictions += shard.stats.evictions.load(Ordering::Relaxed);
        }
        stats.num_shards = self.shards.len();
        stats.capacity = self.capacity;
        stats.len = self.len();
        stats
    }
}

/// Split `total` over `shards` so the parts differ by at most one and sum to `total`.
fn shard_capacities(total: usize, shards: usize) -> impl Iterator<Item = usize> {
    let base = total.checked_div(shards).unwrap_or(0);
    let remainder = total.checked_rem(shards).unwrap_or(0);
    (0..shards).map(move |i| base + usize::from(i < remainder))
}
