//! Unified configuration for the ingestion engine.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (onedoc.toml)
//! ```toml
//! [store]
//! data_dir = "/var/lib/onedoc"
//! write_buffer_mb = 256
//!
//! [pipeline]
//! workers = 16
//! existence_capacity = 500000
//! eviction = "lru"
//! ```
//!
//! Environment variables use the `ONEDOC_` prefix with `__` between section
//! and key, e.g. `ONEDOC_PIPELINE__WORKERS=8`.

mod defaults;

pub use defaults::*;

use crate::existence::EvictionPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the ingestion engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Document store configuration
    pub store: StoreConfig,
    /// Worker pool and upsert protocol configuration
    pub pipeline: PipelineConfig,
}

impl IngestConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        Self::figment(config_path, overrides)
            .extract()
            .map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn figment(config_path: Option<&str>, overrides: ConfigOverrides) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(IngestConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("ONEDOC_").split("__"));

        figment.merge(Serialized::defaults(overrides))
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Data directory for the RocksDB store; `None` keeps documents in memory
    pub data_dir: Option<PathBuf>,
    /// Run repair on startup
    pub repair: bool,
    /// Write buffer size in MB
    pub write_buffer_mb: usize,
    /// Maximum number of background compaction threads
    pub max_background_jobs: usize,
    /// Striped per-document locks
    pub lock_stripes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            repair: false,
            write_buffer_mb: DEFAULT_WRITE_BUFFER_MB,
            max_background_jobs: DEFAULT_BACKGROUND_JOBS,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}

/// Worker pool and upsert protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Intake queue capacity
    pub queue_capacity: usize,
    /// Maximum number of ids held by the existence cache
    pub existence_capacity: usize,
    /// log2 of the existence cache shard count
    pub existence_shard_bits: u32,
    /// Existence cache eviction policy
    pub eviction: EvictionPolicy,
    /// Insert a full-day skeleton before the first write to a document
    pub preallocate: bool,
    /// Sample time attached to decoded metadata (seconds)
    pub sample_time_secs: u32,
    /// Shift applied to legacy timestamps (hours)
    pub clock_shift_hours: i64,
    /// Progress log interval in leaf updates
    pub progress_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            existence_capacity: DEFAULT_EXISTENCE_CAPACITY,
            existence_shard_bits: DEFAULT_EXISTENCE_SHARD_BITS,
            eviction: EvictionPolicy::default(),
            preallocate: true,
            sample_time_secs: DEFAULT_SAMPLE_TIME_SECS,
            clock_shift_hours: DEFAULT_CLOCK_SHIFT_HOURS,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preallocate: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
