//! # Collection Router
//!
//! Maps a document id to its monthly collection, provisioning the index and
//! shard key the first time a partition is seen. Handles are cached for the
//! life of the process, so every worker resolving the same month shares one
//! `Arc<CollectionHandle>`.

use crate::model::DocumentId;
use crate::store::{DocumentStore, IndexSpec, ShardKey, StoreError, StoreResult};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const COLLECTION_PREFIX: &str = "monitorData";
pub const INDEX_NAME: &str = "dateMonitorPointAntennaComponent";

const INDEX_FIELDS: [&str; 4] = [
    "metadata.date",
    "metadata.antenna",
    "metadata.component",
    "metadata.monitorPoint",
];
const SHARD_FIELDS: [&str; 2] = ["metadata.date", "metadata.antenna"];

/// One collection per calendar month. `month` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub month: u8,
    pub year: i32,
}

impl PartitionKey {
    pub fn of(id: &DocumentId) -> Self {
        Self {
            month: id.month(),
            year: id.year(),
        }
    }

    pub fn collection_name(&self) -> String {
        format!("{COLLECTION_PREFIX}_{}_{}", self.month, self.year)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

/// A provisioned collection.
pub struct CollectionHandle {
    name: String,
    store: Arc<dyn DocumentStore>,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("name", &self.name)
            .finish()
    }
}

pub fn partition_index() -> IndexSpec {
    IndexSpec {
        name: INDEX_NAME.to_string(),
        fields: INDEX_FIELDS.iter().map(|f| f.to_string()).collect(),
    }
}

pub fn partition_shard_key() -> ShardKey {
    ShardKey {
        fields: SHARD_FIELDS.iter().map(|f| f.to_string()).collect(),
    }
}

pub struct CollectionRouter {
    store: Arc<dyn DocumentStore>,
    handles: DashMap<PartitionKey, Arc<CollectionHandle>>,
}

impl CollectionRouter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            handles: DashMap::new(),
        }
    }

    /// The collection holding `id`, provisioning it on first use.
    pub fn resolve(&self, id: &DocumentId) -> StoreResult<Arc<CollectionHandle>> {
        let key = PartitionKey::of(id);
        if let Some(handle) = self.handles.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let name = key.collection_name();
        self.provision(&name)?;

        // Racing resolvers converge on whichever handle landed first.
        let handle = self
            .handles
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CollectionHandle {
                    name,
                    store: Arc::clone(&self.store),
                })
            })
            .value()
            .clone();
        Ok(handle)
    }

    fn provision(&self, name: &str) -> StoreResult<()> {
        if self.store.collection_exists(name)? {
            debug!(collection = name, "collection already provisioned");
            return Ok(());
        }
        self.store.create_index(name, &partition_index())?;
        match self.store.shard_collection(name, &partition_shard_key()) {
            Ok(()) => info!(collection = name, "provisioned collection"),
            Err(StoreError::AlreadySharded { .. }) => {
                debug!(collection = name, "collection sharded concurrently");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.handles.len()
    }

    pub fn cached(&self, key: PartitionKey) -> Option<Arc<CollectionHandle>> {
        self.handles.get(&key).map(|handle| Arc::clone(handle.value()))
    }
}
