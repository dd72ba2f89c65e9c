#[path = "../src/test_support.rs"]
mod test_support;

use std::sync::{Arc, Barrier};
use std::thread;

use onedoc_rs::existence::{EvictionPolicy, ExistenceCache};
use onedoc_rs::ingest::{IngestContext, IngestSettings};
use onedoc_rs::legacy::{LegacyIndex, LegacyRecord, LegacyTimestamp};
use onedoc_rs::model::{DocumentId, Metadata, Sample};
use onedoc_rs::store::MemoryStore;
use test_support::legacy_record;

fn context(store: &Arc<MemoryStore>) -> IngestContext {
    IngestContext::new(
        store.clone(),
        ExistenceCache::new(1_000, 4, EvictionPolicy::Fifo),
        IngestSettings::default(),
    )
}

fn sample(second: u8, value: &str) -> Sample {
    Sample {
        metadata: Metadata {
            document_id: DocumentId::new(2024, 5, 1, "DV10", "FrontEnd/Cryostat", "MP1").unwrap(),
            property: "P1".into(),
            location: "L".into(),
            serial_number: "SN1".into(),
            index: 3,
            sample_time_secs: 1,
        },
        hour: 13,
        minute: 0,
        second,
        value: value.into(),
    }
}

#[test]
fn scenario_a_four_segment_record_lands_on_shifted_leaf() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store);
    let record = LegacyRecord {
        component_name: Some("CONTROL/DV10/FrontEnd/Cryostat".into()),
        property_name: Some("P1".into()),
        monitor_point_name: Some("MP1".into()),
        location: Some("L".into()),
        serial_number: Some("SN1".into()),
        monitor_value: Some("7.2".into()),
        index: Some(LegacyIndex::Number(3)),
        date: Some(LegacyTimestamp::Text("2024-05-01T10:00:00Z".into())),
    };
    ctx.ingest_record(&record).unwrap();

    let doc = store
        .document("monitorData_5_2024", "2024-05-01:DV10:FrontEnd/Cryostat:MP1")
        .unwrap();
    assert_eq!(doc["hourly"]["13"]["0"]["0"], "7.2");
    assert_eq!(doc["hourly"]["13"]["0"]["1"], "naa");
    assert_eq!(doc["metadata"]["antenna"], "DV10");
    assert_eq!(doc["metadata"]["component"], "FrontEnd/Cryostat");
    assert_eq!(doc["metadata"]["monitorPoint"], "MP1");
    assert_eq!(doc["metadata"]["property"], "P1");
    assert_eq!(doc["metadata"]["index"], 3);
    assert_eq!(doc["metadata"]["date"], "2024-05-01");
}

#[test]
fn scenario_b_two_segment_record() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store);
    let record = legacy_record("ACACORR/CCC_MONITOR", "MP1", "2024-05-01T10:00:00Z", "1");
    ctx.ingest_record(&record).unwrap();

    let doc = store
        .document("monitorData_5_2024", "2024-05-01:ACACORR:CCC_MONITOR:MP1")
        .unwrap();
    assert_eq!(doc["metadata"]["antenna"], "ACACORR");
    assert_eq!(doc["metadata"]["component"], "CCC_MONITOR");
    assert_eq!(doc["hourly"]["13"]["0"]["0"], "1");
}

#[test]
fn scenario_c_second_sample_skips_skeleton() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store);

    let first = ctx.upsert(&[sample(0, "7.2")], true).unwrap();
    assert!(first.preallocated);
    let after_first = store.op_counts();
    assert_eq!(after_first.inserts, 1);
    assert_eq!(after_first.updates, 1);

    let second = ctx.upsert(&[sample(1, "7.3")], true).unwrap();
    assert!(!second.preallocated);
    let after_second = store.op_counts();
    assert_eq!(after_second.inserts, 1);
    assert_eq!(after_second.updates, 2);
    // Existence cache answered; no second probe.
    assert_eq!(after_second.probes, 1);

    let stats = ctx.stats();
    assert_eq!(stats.preallocations, 1);
    assert_eq!(stats.updates, 2);
}

#[test]
fn batch_upsert_is_one_update_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store);
    let batch: Vec<Sample> = (0..10).map(|s| sample(s, "12")).collect();

    let outcome = ctx.upsert(&batch, true).unwrap();
    assert_eq!(outcome.leaves, 10);
    assert_eq!(store.op_counts().updates, 1);

    let doc = store
        .document("monitorData_5_2024", "2024-05-01:DV10:FrontEnd/Cryostat:MP1")
        .unwrap();
    for second in 0..10 {
        assert_eq!(doc["hourly"]["13"]["0"][second.to_string()], "12");
    }
    assert_eq!(doc["hourly"]["13"]["0"]["10"], "na");
    assert_eq!(ctx.stats().updates, 10);
}

#[test]
fn concurrent_first_writes_create_one_skeleton() {
    for _ in 0..20 {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(context(&store));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [(0u8, "a1"), (1u8, "b2")]
            .into_iter()
            .map(|(second, value)| {
                let ctx = Arc::clone(&ctx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ctx.upsert(&[sample(second, value)], true).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.document_count("monitorData_5_2024"), 1);
        let doc = store
            .document("monitorData_5_2024", "2024-05-01:DV10:FrontEnd/Cryostat:MP1")
            .unwrap();
        assert_eq!(doc["hourly"]["13"]["0"]["0"], "a1");
        assert_eq!(doc["hourly"]["13"]["0"]["1"], "b2");
        assert_eq!(doc["hourly"].as_object().unwrap().len(), 24);
        assert_eq!(ctx.stats().errors, 0);
    }
}

#[test]
fn days_and_months_route_to_separate_documents() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store);
    for date in [
        "2024-05-01T10:00:00Z",
        "2024-05-01T11:00:00Z",
        "2024-05-02T10:00:00Z",
        "2024-05-31T22:00:00Z",
    ] {
        ctx.ingest_record(&legacy_record("CONTROL/DV10/LLC", "MP", date, "1"))
            .unwrap();
    }
    // 2024-05-31T22:00Z shifts into June.
    assert_eq!(store.document_count("monitorData_5_2024"), 2);
    assert_eq!(store.document_count("monitorData_6_2024"), 1);
    assert!(store
        .document("monitorData_6_2024", "2024-06-01:DV10:LLC:MP")
        .is_some());
    assert_eq!(ctx.router().partition_count(), 2);
    assert_eq!(ctx.stats().preallocations, 3);
}
