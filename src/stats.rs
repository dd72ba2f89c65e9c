//! Ingestion counters.
//!
//! Each counter sits on its own cache line so workers bumping different
//! counters do not invalidate each other's lines.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size in bytes (64 for modern x86_64 and ARM64)
pub const CACHE_LINE_SIZE: usize = 64;

/// A single atomic counter aligned to its own cache line.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - 8],
}

impl AlignedCounter {
    #[inline]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _pad: [0u8; CACHE_LINE_SIZE - 8],
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Atomically add to the counter, returning the new value
    #[inline]
    pub fn add(&self, val: u64) -> u64 {
        self.value.fetch_add(val, Ordering::Relaxed) + val
    }

    #[inline]
    pub fn increment(&self) -> u64 {
        self.add(1)
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide ingestion counters shared by every worker.
#[repr(C)]
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Skeleton inserts attempted
    pub preallocations: AlignedCounter,
    /// Leaves written
    pub updates: AlignedCounter,
    /// Records that failed to decode or store
    pub errors: AlignedCounter,
}

impl IngestStats {
    pub const fn new() -> Self {
        Self {
            preallocations: AlignedCounter::new(),
            updates: AlignedCounter::new(),
            errors: AlignedCounter::new(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            preallocations: self.preallocations.get(),
            updates: self.updates.get(),
            errors: self.errors.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub preallocations: u64,
    pub updates: u64,
    pub errors: u64,
}

/// Whether an update counter moving from `before` to `after` crossed a
/// multiple of `every`.
pub fn crossed_multiple(before: u64, after: u64, every: u64) -> bool {
    every != 0 && before / every != after / every
}
