//! # Ingestion Pipeline
//!
//! [`IngestContext`] owns everything workers share: the store, the collection
//! router, the existence cache, the skeleton templates and the counters.
//! [`IngestPipeline`] runs N worker threads that drain a bounded intake queue
//! of legacy records, decode them and upsert the resulting samples.
//!
//! The upsert protocol for one document:
//! 1. resolve the monthly collection;
//! 2. when preallocating, make sure a skeleton exists (existence cache, then a
//!    direct probe, then a create-if-absent insert);
//! 3. set every leaf of the batch in a single update.
//!
//! Losing the skeleton insert race is harmless: the loser's insert fails with
//! a duplicate key and its update lands on the winner's skeleton.

use crate::config::PipelineConfig;
use crate::existence::ExistenceCache;
use crate::legacy::{DecodeError, DecodeSettings, LegacyRecord};
use crate::model::{Metadata, Sample};
use crate::prealloc;
use crate::router::CollectionRouter;
use crate::skeleton::{SkeletonDocument, SkeletonError, SkeletonTemplates, MAX_SIZE};
use crate::stats::{crossed_multiple, IngestStats, StatsSnapshot};
use crate::store::{DocumentStore, FieldUpdate, StoreError};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Skeleton(#[from] SkeletonError),
    #[error("upsert called with an empty batch")]
    EmptyBatch,
    #[error("batch mixes documents {expected} and {found}")]
    MixedDocuments { expected: String, found: String },
    #[error("pipeline intake is closed")]
    Closed,
}

/// Knobs of the upsert protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub preallocate: bool,
    pub progress_every: u64,
    pub decode: DecodeSettings,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for IngestSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            preallocate: config.preallocate,
            progress_every: config.progress_every,
            decode: DecodeSettings {
                sample_time_secs: config.sample_time_secs,
                clock_shift_hours: config.clock_shift_hours,
            },
        }
    }
}

/// What a single upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// A skeleton insert was attempted for this document.
    pub preallocated: bool,
    /// Leaves written.
    pub leaves: usize,
}

pub struct IngestContext {
    router: CollectionRouter,
    existence: ExistenceCache,
    templates: SkeletonTemplates,
    stats: IngestStats,
    settings: IngestSettings,
}

impl IngestContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        existence: ExistenceCache,
        settings: IngestSettings,
    ) -> Self {
        Self {
            router: CollectionRouter::new(store),
            existence,
            templates: SkeletonTemplates::build(),
            stats: IngestStats::new(),
            settings,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &PipelineConfig) -> Self {
        let existence = ExistenceCache::new(
            config.existence_capacity,
            config.existence_shard_bits,
            config.eviction,
        );
        Self::new(store, existence, IngestSettings::from(config))
    }

    pub fn router(&self) -> &CollectionRouter {
        &self.router
    }

    pub fn existence(&self) -> &ExistenceCache {
        &self.existence
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Decode one legacy record and upsert it with the configured settings.
    pub fn ingest_record(&self, record: &LegacyRecord) -> Result<UpsertOutcome, IngestError> {
        let sample = record.decode(&self.settings.decode)?;
        self.upsert(std::slice::from_ref(&sample), self.settings.preallocate)
    }

    /// Write a batch of samples that all belong to the same document.
    pub fn upsert(&self, batch: &[Sample], preallocate: bool) -> Result<UpsertOutcome, IngestError> {
        let first = batch.first().ok_or(IngestError::EmptyBatch)?;
        let id = first.document_id();
        if let Some(other) = batch.iter().find(|s| s.document_id() != id) {
            return Err(IngestError::MixedDocuments {
                expected: id.to_string(),
                found: other.document_id().to_string(),
            });
        }

        let collection = self.router.resolve(id)?;
        let store = collection.store();
        let key = id.to_string();

        let mut preallocated = false;
        if preallocate && !self.existence.contains(&key) {
            if store.contains(collection.name(), &key)? {
                self.existence.record(&key);
            } else {
                let skeleton = self.skeleton(&first.metadata, first.value_size())?;
                let document = serde_json::to_value(&skeleton).map_err(StoreError::from)?;
                let inserted = store.insert(collection.name(), &key, document);
                self.stats.preallocations.increment();
                preallocated = true;
                match inserted {
                    Ok(()) => debug!(collection = collection.name(), id = %key, "inserted skeleton"),
                    Err(err) if err.is_duplicate_key() => {
                        debug!(collection = collection.name(), id = %key, "skeleton created concurrently");
                    }
                    Err(err) => return Err(err.into()),
                }
                self.existence.record(&key);
            }
        }

        let update = FieldUpdate {
            id: key,
            metadata: first.metadata.document_fields(),
            sets: batch
                .iter()
                .map(|sample| (sample.leaf(), sample.value.clone()))
                .collect(),
            upsert: true,
        };
        store.update(collection.name(), &update)?;

        let leaves = batch.len() as u64;
        let total = self.stats.updates.add(leaves);
        if crossed_multiple(total - leaves, total, self.settings.progress_every) {
            info!(
                updates = total,
                preallocations = self.stats.preallocations.get(),
                errors = self.stats.errors.get(),
                partitions = self.router.partition_count(),
                "ingest progress"
            );
        }

        Ok(UpsertOutcome {
            preallocated,
            leaves: batch.len(),
        })
    }

    /// Full-day skeleton sized for `size`-character values.
    fn skeleton(&self, metadata: &Metadata, size: usize) -> Result<SkeletonDocument, SkeletonError> {
        if size < MAX_SIZE {
            prealloc::full_day(&self.templates, metadata, size)
        } else {
            Ok(prealloc::full_day_uncached(metadata, size))
        }
    }

    fn record_failure(&self, worker: usize, err: &IngestError) {
        self.stats.errors.increment();
        warn!(worker, error = %err, "record skipped");
    }
}

/// Counters of one worker thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub stats: StatsSnapshot,
    pub workers: Vec<WorkerReport>,
}

impl PipelineSummary {
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }
}

/// Worker pool draining a bounded intake queue.
pub struct IngestPipeline {
    context: Arc<IngestContext>,
    intake: Option<Sender<LegacyRecord>>,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<WorkerReport>>,
}

impl IngestPipeline {
    pub fn start(
        context: Arc<IngestContext>,
        workers: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let (intake_tx, intake_rx) = bounded(queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let mut pipeline = Self {
            context,
            intake: Some(intake_tx),
            shutdown: Some(shutdown_tx),
            workers: Vec::with_capacity(workers),
        };
        for worker in 0..workers.max(1) {
            let context = Arc::clone(&pipeline.context);
            let intake = intake_rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ingest-worker-{worker}"))
                .spawn(move || worker_loop(worker, context, intake, shutdown))?;
            pipeline.workers.push(handle);
        }
        info!(workers = pipeline.workers.len(), queue_capacity, "ingest pipeline started");
        Ok(pipeline)
    }

    pub fn from_config(context: Arc<IngestContext>, config: &PipelineConfig) -> std::io::Result<Self> {
        Self::start(context, config.workers, config.queue_capacity)
    }

    pub fn context(&self) -> &Arc<IngestContext> {
        &self.context
    }

    /// Enqueue a record, blocking while the queue is full.
    pub fn submit(&self, record: LegacyRecord) -> Result<(), IngestError> {
        let intake = self.intake.as_ref().ok_or(IngestError::Closed)?;
        intake.send(record).map_err(|_| IngestError::Closed)
    }

    /// Records waiting in the intake queue.
    pub fn queued(&self) -> usize {
        self.intake.as_ref().map_or(0, Sender::len)
    }

    /// Wake every worker and make it stop after its current record.
    /// Queued records are left unprocessed.
    pub fn request_shutdown(&mut self) {
        self.shutdown.take();
    }

    /// Stop accepting records and wait until the queue has been drained.
    pub fn finish(mut self) -> PipelineSummary {
        self.intake.take();
        self.join_workers()
    }

    /// Stop the workers without draining the queue and wait for them.
    pub fn shutdown(mut self) -> PipelineSummary {
        self.request_shutdown();
        self.intake.take();
        self.join_workers()
    }

    fn join_workers(&mut self) -> PipelineSummary {
        let workers = self
            .workers
            .drain(..)
            .filter_map(|handle| match handle.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    error!("ingest worker panicked");
                    None
                }
            })
            .collect();
        let stats = self.context.stats();
        info!(
            updates = stats.updates,
            preallocations = stats.preallocations,
            errors = stats.errors,
            "ingest pipeline stopped"
        );
        PipelineSummary { stats, workers }
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.request_shutdown();
        self.intake.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker: usize,
    context: Arc<IngestContext>,
    intake: Receiver<LegacyRecord>,
    shutdown: Receiver<()>,
) -> WorkerReport {
    let mut report = WorkerReport {
        worker,
        ..WorkerReport::default()
    };
    loop {
        if let Err(TryRecvError::Disconnected) = shutdown.try_recv() {
            break;
        }
        let next = select! {
            recv(shutdown) -> _ => None,
            recv(intake) -> msg => msg.ok(),
        };
        // Shutdown signalled, or intake closed and empty.
        let Some(record) = next else {
            break;
        };
        match context.ingest_record(&record) {
            Ok(_) => report.processed += 1,
            Err(err) => {
                report.failed += 1;
                context.record_failure(worker, &err);
            }
        }
    }
    let stats = context.stats();
    info!(
        worker,
        processed = report.processed,
        failed = report.failed,
        updates = stats.updates,
        preallocations = stats.preallocations,
        errors = stats.errors,
        "ingest worker stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::existence::EvictionPolicy;
    use crate::model::DocumentId;
    use crate::store::MemoryStore;

    fn context(store: Arc<MemoryStore>) -> IngestContext {
        IngestContext::new(
            store,
            ExistenceCache::new(1_000, 2, EvictionPolicy::Fifo),
            IngestSettings::default(),
        )
    }

    fn sample(monitor_point: &str, hour: u8, minute: u8, second: u8, value: &str) -> Sample {
        Sample {
            metadata: Metadata {
                document_id: DocumentId::new(2024, 5, 1, "DV10", "C", monitor_point).unwrap(),
                property: "P".into(),
                location: "L".into(),
                serial_number: "SN".into(),
                index: 0,
                sample_time_secs: 1,
            },
            hour,
            minute,
            second,
            value: value.into(),
        }
    }

    #[test]
    fn test_empty_and_mixed_batches_are_rejected() {
        let ctx = context(Arc::new(MemoryStore::new()));
        assert!(matches!(ctx.upsert(&[], true), Err(IngestError::EmptyBatch)));
        let batch = [sample("A", 0, 0, 0, "1"), sample("B", 0, 0, 1, "2")];
        assert!(matches!(
            ctx.upsert(&batch, true),
            Err(IngestError::MixedDocuments { .. })
        ));
        assert_eq!(ctx.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_skeleton_size_follows_first_value() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        ctx.upsert(&[sample("A", 1, 2, 3, "1234")], true).unwrap();
        let doc = store
            .document("monitorData_5_2024", "2024-05-01:DV10:C:A")
            .unwrap();
        assert_eq!(doc["hourly"]["1"]["2"]["3"], "1234");
        assert_eq!(doc["hourly"]["0"]["0"]["0"], "naaa");
    }

    #[test]
    fn test_long_value_uses_exact_size_skeleton() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        ctx.upsert(&[sample("A", 0, 0, 0, "123456789")], true).unwrap();
        let doc = store
            .document("monitorData_5_2024", "2024-05-01:DV10:C:A")
            .unwrap();
        assert_eq!(doc["hourly"]["23"]["59"]["59"], "naaaaaaaa");
    }

    #[test]
    fn test_without_preallocation_document_is_upserted() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let outcome = ctx.upsert(&[sample("A", 5, 6, 7, "x")], false).unwrap();
        assert!(!outcome.preallocated);
        assert_eq!(store.op_counts().inserts, 0);
        let doc = store
            .document("monitorData_5_2024", "2024-05-01:DV10:C:A")
            .unwrap();
        assert_eq!(doc["hourly"]["5"]["6"]["7"], "x");
        assert_eq!(doc["hourly"].as_object().unwrap().len(), 1);
        assert_eq!(doc["metadata"]["date"], "2024-05-01");
    }

    #[test]
    fn test_probe_hit_is_recorded_in_cache() {
        let store = Arc::new(MemoryStore::new());
        let first = context(store.clone());
        first.upsert(&[sample("A", 0, 0, 0, "1")], true).unwrap();

        // A fresh context has a cold cache but the store already holds the document.
        let second = context(store.clone());
        let outcome = second.upsert(&[sample("A", 0, 0, 1, "2")], true).unwrap();
        assert!(!outcome.preallocated);
        assert!(second.existence().contains("2024-05-01:DV10:C:A"));
        assert_eq!(store.op_counts().inserts, 1);
    }

    #[test]
    fn test_progress_crossing_does_not_disturb_counts() {
        let store = Arc::new(MemoryStore::new());
        let ctx = IngestContext::new(
            store,
            ExistenceCache::new(10, 0, EvictionPolicy::Fifo),
            IngestSettings {
                progress_every: 2,
                ..IngestSettings::default()
            },
        );
        let batch: Vec<Sample> = (0..5).map(|s| sample("A", 0, 0, s, "v")).collect();
        ctx.upsert(&batch, true).unwrap();
        ctx.upsert(&batch[..1], true).unwrap();
        let stats = ctx.stats();
        assert_eq!(stats.updates, 6);
        assert_eq!(stats.preallocations, 1);
        assert_eq!(stats.errors, 0);
    }
}
