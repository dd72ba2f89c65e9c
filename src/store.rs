//! # Store Module
//!
//! The document-store contract the ingestion engine writes through, and an
//! in-memory implementation of it.
//!
//! Every method is one synchronous round trip from the caller's point of view.
//! `insert` is create-if-absent: a second insert of the same id fails with
//! [`StoreError::DuplicateKey`], which callers racing to create a skeleton
//! treat as benign.

use crate::model::{DocumentMetadata, LeafPath};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A stored document.
pub type Document = Value;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key {id:?} in collection {collection}")]
    DuplicateKey { collection: String, id: String },
    #[error("collection {collection} is already sharded")]
    AlreadySharded { collection: String },
    #[error("document {id:?} in collection {collection} has a non-object node on {path}")]
    Corrupt {
        collection: String,
        id: String,
        path: String,
    },
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

/// A named compound index over dotted field paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
}

/// The fields a collection is distributed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardKey {
    pub fields: Vec<String>,
}

/// Leaf-level `$set` on one document, optionally creating it when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub id: String,
    /// Written only when the update creates the document.
    pub metadata: DocumentMetadata,
    pub sets: Vec<(LeafPath, String)>,
    pub upsert: bool,
}

impl FieldUpdate {
    /// The document an upsert starts from before its leaves are applied.
    pub fn new_document(&self) -> StoreResult<Document> {
        let mut document = Map::new();
        document.insert("id".to_string(), Value::String(self.id.clone()));
        document.insert("metadata".to_string(), serde_json::to_value(&self.metadata)?);
        document.insert("hourly".to_string(), Value::Object(Map::new()));
        Ok(Value::Object(document))
    }

    /// Set every leaf on `document`, creating intermediate buckets as needed.
    pub fn apply_to(&self, collection: &str, document: &mut Document) -> StoreResult<()> {
        for (leaf, value) in &self.sets {
            set_leaf(document, leaf, value).map_err(|path| StoreError::Corrupt {
                collection: collection.to_string(),
                id: self.id.clone(),
                path,
            })?;
        }
        Ok(())
    }
}

fn set_leaf(document: &mut Document, leaf: &LeafPath, value: &str) -> Result<(), String> {
    let [root, hour, minute, second] = leaf.segments();
    let mut node = document;
    for key in [root, hour, minute] {
        node = node
            .as_object_mut()
            .ok_or_else(|| leaf.to_string())?
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    node.as_object_mut()
        .ok_or_else(|| leaf.to_string())?
        .insert(second, Value::String(value.to_string()));
    Ok(())
}

/// What an update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// An existing document was modified.
    Matched,
    /// The document was absent and has been created.
    Upserted,
    /// The document was absent and `upsert` was off.
    NotFound,
}

/// Document store used by the ingestion engine.
pub trait DocumentStore: Send + Sync {
    /// Whether the collection has been created or declared.
    fn collection_exists(&self, collection: &str) -> StoreResult<bool>;

    /// Declare an index. Declaring an index with an existing name is a no-op.
    fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    /// Declare the shard key. Fails with [`StoreError::AlreadySharded`] when one is set.
    fn shard_collection(&self, collection: &str, key: &ShardKey) -> StoreResult<()>;

    /// Direct existence probe by primary key.
    fn contains(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Create-if-absent insert.
    fn insert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()>;

    fn update(&self, collection: &str, update: &FieldUpdate) -> StoreResult<UpdateOutcome>;
}

/// Per-operation round-trip counts of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOpCounts {
    pub existence_checks: u64,
    pub index_declarations: u64,
    pub shard_declarations: u64,
    pub probes: u64,
    pub inserts: u64,
    pub updates: u64,
}

#[derive(Debug, Default)]
struct OpCounters {
    existence_checks: AtomicU64,
    index_declarations: AtomicU64,
    shard_declarations: AtomicU64,
    probes: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: DashMap<String, Document>,
    indexes: Mutex<Vec<IndexSpec>>,
    shard_key: Mutex<Option<ShardKey>>,
}

/// Concurrent in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Arc<MemoryCollection>>,
    ops: OpCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<MemoryCollection> {
        if let Some(existing) = self.collections.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.collections.entry(name.to_string()).or_default().value())
    }

    /// A copy of a stored document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let collection = self.collections.get(collection)?;
        let document = collection.documents.get(id)?;
        Some(document.value().clone())
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .get(collection)
            .map(|c| c.indexes.lock().clone())
            .unwrap_or_default()
    }

    pub fn shard_key(&self, collection: &str) -> Option<ShardKey> {
        self.collections
            .get(collection)
            .and_then(|c| c.shard_key.lock().clone())
    }

    pub fn op_counts(&self) -> StoreOpCounts {
        StoreOpCounts {
            existence_checks: self.ops.existence_checks.load(Ordering::Relaxed),
            index_declarations: self.ops.index_declarations.load(Ordering::Relaxed),
            shard_declarations: self.ops.shard_declarations.load(Ordering::Relaxed),
            probes: self.ops.probes.load(Ordering::Relaxed),
            inserts: self.ops.inserts.load(Ordering::Relaxed),
            updates: self.ops.updates.load(Ordering::Relaxed),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        self.ops.existence_checks.fetch_add(1, Ordering::Relaxed);
        Ok(self.collections.contains_key(collection))
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.ops.index_declarations.fetch_add(1, Ordering::Relaxed);
        let collection = self.collection(collection);
        let mut indexes = collection.indexes.lock();
        if !indexes.iter().any(|existing| existing.name == index.name) {
            indexes.push(index.clone());
        }
        Ok(())
    }

    fn shard_collection(&self, collection: &str, key: &ShardKey) -> StoreResult<()> {
        self.ops.shard_declarations.fetch_add(1, Ordering::Relaxed);
        let handle = self.collection(collection);
        let mut shard_key = handle.shard_key.lock();
        if shard_key.is_some() {
            return Err(StoreError::AlreadySharded {
                collection: collection.to_string(),
            });
        }
        *shard_key = Some(key.clone());
        Ok(())
    }

    fn contains(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.ops.probes.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .collections
            .get(collection)
            .is_some_and(|c| c.documents.contains_key(id)))
    }

    fn insert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()> {
        self.ops.inserts.fetch_add(1, Ordering::Relaxed);
        let handle = self.collection(collection);
        let result = match handle.documents.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(document);
                Ok(())
            }
        };
        result
    }

    fn update(&self, collection: &str, update: &FieldUpdate) -> StoreResult<UpdateOutcome> {
        self.ops.updates.fetch_add(1, Ordering::Relaxed);
        let handle = self.collection(collection);
        let result = match handle.documents.entry(update.id.clone()) {
            Entry::Occupied(mut existing) => {
                update.apply_to(collection, existing.get_mut())?;
                Ok(UpdateOutcome::Matched)
            }
            Entry::Vacant(slot) if update.upsert => {
                let mut document = update.new_document()?;
                update.apply_to(collection, &mut document)?;
                slot.insert(document);
                Ok(UpdateOutcome::Upserted)
            }
            Entry::Vacant(_) => Ok(UpdateOutcome::NotFound),
        };
        result
    }
}
