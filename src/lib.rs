//! # Onedoc
//!
//! Telemetry ingestion into a document store with one document per monitor
//! point per calendar day.
//!
//! Each document is preallocated as a full-day skeleton of placeholder leaves
//! before its first reading is written, so subsequent writes only overwrite
//! leaves in place. Documents are partitioned into monthly collections that
//! are provisioned lazily, and a pool of worker threads drains a bounded
//! intake queue of legacy flat records.

pub mod config;
pub mod existence;
pub mod ingest;
pub mod legacy;
pub mod model;
pub mod persistence;
pub mod prealloc;
pub mod router;
pub mod skeleton;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, IngestConfig};
pub use existence::{EvictionPolicy, ExistenceCache};
pub use ingest::{IngestContext, IngestError, IngestPipeline, IngestSettings, PipelineSummary};
pub use legacy::{DecodeError, LegacyRecord};
pub use model::{DocumentId, LeafPath, Metadata, Sample};
pub use persistence::RocksStore;
pub use router::{CollectionHandle, CollectionRouter, PartitionKey};
pub use skeleton::{SkeletonDocument, SkeletonError, SkeletonTemplates};
pub use stats::StatsSnapshot;
pub use store::{DocumentStore, MemoryStore, StoreError};
