//! Benchmarks for skeleton construction and the upsert hot path.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use onedoc_rs::existence::{EvictionPolicy, ExistenceCache};
use onedoc_rs::ingest::{IngestContext, IngestSettings};
use onedoc_rs::model::{DocumentId, Metadata, Sample};
use onedoc_rs::prealloc;
use onedoc_rs::skeleton::SkeletonTemplates;
use onedoc_rs::store::MemoryStore;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use time::macros::time;

fn metadata(sample_time_secs: u32) -> Metadata {
    Metadata {
        document_id: DocumentId::new(2024, 5, 1, "DV10", "FrontEnd/Cryostat", "MP1")
            .expect("valid date"),
        property: "P1".into(),
        location: "L".into(),
        serial_number: "SN1".into(),
        index: 3,
        sample_time_secs,
    }
}

// =============================================================================
// SKELETON BENCHMARKS
// =============================================================================

/// Cached template copy vs. building the tree from a simulated clock.
fn bench_skeleton(c: &mut Criterion) {
    let mut group = c.benchmark_group("skeleton");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));
    group.throughput(Throughput::Elements(86_400));

    let templates = SkeletonTemplates::build();
    let meta = metadata(1);

    group.bench_function("full_day_cached", |b| {
        b.iter(|| black_box(prealloc::full_day(&templates, &meta, 4).expect("cached size")))
    });
    group.bench_function("full_day_uncached", |b| {
        b.iter(|| black_box(prealloc::full_day_uncached(&meta, 4)))
    });
    group.bench_function("from_time_midnight", |b| {
        b.iter(|| black_box(prealloc::from_time(&meta, time!(00:00:00), 4).expect("non-zero step")))
    });
    group.bench_function("serialize_full_day", |b| {
        let doc = prealloc::full_day(&templates, &meta, 4).expect("cached size");
        b.iter(|| black_box(serde_json::to_vec(&doc).expect("serializable")))
    });
    group.finish();
}

/// Upserts against an in-memory store once every skeleton exists.
fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert");
    group.sample_size(30);

    for &batch_len in &[1usize, 60, 600] {
        group.throughput(Throughput::Elements(batch_len as u64));
        group.bench_with_input(BenchmarkId::new("warm", batch_len), &batch_len, |b, &len| {
            let store = Arc::new(MemoryStore::new());
            let ctx = IngestContext::new(
                store,
                ExistenceCache::new(1_000, 4, EvictionPolicy::Fifo),
                IngestSettings::default(),
            );
            let batch: Vec<Sample> = (0..len)
                .map(|i| Sample {
                    metadata: metadata(1),
                    hour: (i / 3600) as u8,
                    minute: ((i / 60) % 60) as u8,
                    second: (i % 60) as u8,
                    value: "12.5".into(),
                })
                .collect();
            ctx.upsert(&batch, true).expect("warm-up upsert");
            b.iter(|| black_box(ctx.upsert(&batch, true).expect("upsert")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_skeleton, bench_upsert);
criterion_main!(benches);
