//! Default constants for onedoc configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Default write buffer size in MB
/// Larger values batch more writes before flushing to disk.
pub const DEFAULT_WRITE_BUFFER_MB: usize = 128;

/// Default number of background compaction jobs
pub const DEFAULT_BACKGROUND_JOBS: usize = 4;

/// Number of striped locks guarding per-document read-modify-write.
/// Two ids that hash to the same stripe serialize; raise for many workers.
pub const DEFAULT_LOCK_STRIPES: usize = 256;

// =============================================================================
// Pipeline Defaults
// =============================================================================

/// Default number of ingest worker threads
/// Uses number of CPU cores.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(8)
}

/// Intake queue capacity; producers block once it is full.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Existence cache capacity, sized to the distinct monitor-point cardinality.
pub const DEFAULT_EXISTENCE_CAPACITY: usize = 250_000;

/// log2 of the number of existence cache shards
pub const DEFAULT_EXISTENCE_SHARD_BITS: u32 = 6;

/// Nominal interval between readings of a monitor point (seconds)
pub const DEFAULT_SAMPLE_TIME_SECS: u32 = 1;

/// Offset between the legacy source clock and UTC (hours)
pub const DEFAULT_CLOCK_SHIFT_HOURS: i64 = 3;

/// Log a progress line every this many leaf updates
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;
