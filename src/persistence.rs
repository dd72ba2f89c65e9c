//! RocksDB-backed [`DocumentStore`].
//!
//! Documents are stored as JSON under `collection \0 id` in the `documents`
//! column family. Index and shard declarations live in the `catalog` column
//! family, one bincode entry per collection, mirrored in memory. Inserts and
//! updates are read-modify-write under a striped per-key lock.

use crate::config::{
    StoreConfig, DEFAULT_BACKGROUND_JOBS, DEFAULT_LOCK_STRIPES, DEFAULT_WRITE_BUFFER_MB,
};
use crate::store::{
    Document, DocumentStore, FieldUpdate, IndexSpec, ShardKey, StoreError, StoreResult,
    UpdateOutcome,
};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::Path;

const CF_DOCUMENTS: &str = "documents";
const CF_CATALOG: &str = "catalog";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;

const KEY_SEPARATOR: u8 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

/// Declarations recorded for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCatalog {
    pub indexes: Vec<IndexSpec>,
    pub shard_key: Option<ShardKey>,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub repair: bool,
    pub write_buffer_mb: usize,
    pub max_background_jobs: usize,
    pub lock_stripes: usize,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self {
            repair: false,
            write_buffer_mb: DEFAULT_WRITE_BUFFER_MB,
            max_background_jobs: DEFAULT_BACKGROUND_JOBS,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}

impl From<&StoreConfig> for PersistentOpenOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            repair: config.repair,
            write_buffer_mb: config.write_buffer_mb,
            max_background_jobs: config.max_background_jobs,
            lock_stripes: config.lock_stripes,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub struct RocksStore {
    db: DB,
    catalog: DashMap<String, CollectionCatalog>,
    catalog_lock: Mutex<()>,
    stripes: Vec<Mutex<()>>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path, &options)?;
        validate_or_init_manifest(&db)?;
        let catalog = load_catalog(&db)?;

        let stripes = (0..options.lock_stripes.max(1))
            .map(|_| Mutex::new(()))
            .collect();
        Ok(Self {
            db,
            catalog,
            catalog_lock: Mutex::new(()),
            stripes,
        })
    }

    /// Read back a stored document.
    pub fn load(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_pinned_cf(cf, document_key(collection, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn catalog(&self, collection: &str) -> Option<CollectionCatalog> {
        self.catalog.get(collection).map(|entry| entry.value().clone())
    }

    /// Number of documents stored in `collection`.
    pub fn document_count(&self, collection: &str) -> StoreResult<usize> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let prefix = collection_prefix(collection);
        let mut count = 0;
        for entry in self.db.prefix_iterator_cf(cf, &prefix) {
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing {name} column family")))
    }

    fn stripe(&self, collection: &str, id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = FxHasher::default();
        collection.hash(&mut hasher);
        id.hash(&mut hasher);
        let slot = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[slot].lock()
    }

    /// Apply `change` to a collection's catalog entry, persisting it when
    /// `change` reports a modification.
    fn modify_catalog(
        &self,
        collection: &str,
        change: impl FnOnce(&mut CollectionCatalog) -> StoreResult<bool>,
    ) -> StoreResult<()> {
        let _guard = self.catalog_lock.lock();
        let existing = self.catalog.get(collection).map(|e| e.value().clone());
        let is_new = existing.is_none();
        let mut entry = existing.unwrap_or_default();
        if !change(&mut entry)? && !is_new {
            return Ok(());
        }
        let bytes = bincode::serialize(&entry).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.db.put_cf(self.cf(CF_CATALOG)?, collection.as_bytes(), bytes)?;
        self.catalog.insert(collection.to_string(), entry);
        Ok(())
    }

    fn register_collection(&self, collection: &str) -> StoreResult<()> {
        if self.catalog.contains_key(collection) {
            return Ok(());
        }
        self.modify_catalog(collection, |_| Ok(false))
    }

    fn put_document(&self, collection: &str, id: &str, document: &Document) -> StoreResult<()> {
        let bytes = serde_json::to_vec(document)?;
        self.db
            .put_cf(self.cf(CF_DOCUMENTS)?, document_key(collection, id), bytes)?;
        Ok(())
    }
}

impl DocumentStore for RocksStore {
    fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        Ok(self.catalog.contains_key(collection))
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.modify_catalog(collection, |entry| {
            if entry.indexes.iter().any(|existing| existing.name == index.name) {
                return Ok(false);
            }
            entry.indexes.push(index.clone());
            Ok(true)
        })
    }

    fn shard_collection(&self, collection: &str, key: &ShardKey) -> StoreResult<()> {
        self.modify_catalog(collection, |entry| {
            if entry.shard_key.is_some() {
                return Err(StoreError::AlreadySharded {
                    collection: collection.to_string(),
                });
            }
            entry.shard_key = Some(key.clone());
            Ok(true)
        })
    }

    fn contains(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self
            .db
            .get_pinned_cf(cf, document_key(collection, id))?
            .is_some())
    }

    fn insert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()> {
        self.register_collection(collection)?;
        let _guard = self.stripe(collection, id);
        if self.contains(collection, id)? {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.put_document(collection, id, &document)
    }

    fn update(&self, collection: &str, update: &FieldUpdate) -> StoreResult<UpdateOutcome> {
        let _guard = self.stripe(collection, &update.id);
        match self.load(collection, &update.id)? {
            Some(mut document) => {
                update.apply_to(collection, &mut document)?;
                self.put_document(collection, &update.id, &document)?;
                Ok(UpdateOutcome::Matched)
            }
            None if update.upsert => {
                self.register_collection(collection)?;
                let mut document = update.new_document()?;
                update.apply_to(collection, &mut document)?;
                self.put_document(collection, &update.id, &document)?;
                Ok(UpdateOutcome::Upserted)
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }
}

impl Drop for RocksStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 1);
    key.extend_from_slice(collection.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

fn document_key(collection: &str, id: &str) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(id.as_bytes());
    key
}

fn open_db(path: impl AsRef<Path>, open: &PersistentOpenOptions) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    options.set_max_background_jobs(open.max_background_jobs as i32);

    let mut documents = Options::default();
    documents.set_write_buffer_size(open.write_buffer_mb * 1024 * 1024);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, documents),
        ColumnFamilyDescriptor::new(CF_CATALOG, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| anyhow!("missing metadata column family"))?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(anyhow!(
                "storage format version mismatch: expected {}, found {}",
                STORAGE_FORMAT_VERSION,
                manifest.format_version
            ));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let bytes = bincode::serialize(&manifest)?;
    db.put_cf(metadata_cf, KEY_MANIFEST, bytes)?;
    Ok(())
}

fn load_catalog(db: &DB) -> Result<DashMap<String, CollectionCatalog>> {
    let catalog_cf = db
        .cf_handle(CF_CATALOG)
        .ok_or_else(|| anyhow!("missing catalog column family"))?;
    let catalog = DashMap::new();
    for entry in db.iterator_cf(catalog_cf, IteratorMode::Start) {
        let (key, value) = entry?;
        let name = String::from_utf8(key.to_vec())?;
        let entry: CollectionCatalog = bincode::deserialize(&value)?;
        catalog.insert(name, entry);
    }
    Ok(catalog)
}
