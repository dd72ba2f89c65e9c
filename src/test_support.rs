use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use onedoc_rs::legacy::{LegacyIndex, LegacyRecord, LegacyTimestamp};

#[allow(dead_code)]
pub const COMPONENT_PATHS: [&str; 4] = [
    "CONTROL/DV10/FrontEnd/Cryostat",
    "CONTROL/DA41/LLC",
    "CONTROL/PM03/FrontEnd/ColdCart3",
    "ACACORR/CCC_MONITOR",
];

#[allow(dead_code)]
pub const MONITOR_POINTS: [&str; 3] = ["GATE_VALVE_STATE", "CRYO_TEMP", "VACUUM"];

/// A well-formed legacy record.
#[allow(dead_code)]
pub fn legacy_record(component_name: &str, monitor_point: &str, date: &str, value: &str) -> LegacyRecord {
    LegacyRecord {
        component_name: Some(component_name.to_string()),
        property_name: Some("prop".to_string()),
        monitor_point_name: Some(monitor_point.to_string()),
        location: Some("AOS".to_string()),
        serial_number: Some("SN-0001".to_string()),
        monitor_value: Some(value.to_string()),
        index: Some(LegacyIndex::Number(0)),
        date: Some(LegacyTimestamp::Text(date.to_string())),
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct GeneratedStream {
    pub records: Vec<LegacyRecord>,
    /// Distinct `(component path, monitor point)` pairs, i.e. documents.
    pub documents: usize,
}

/// Readings spread over a few monitor points during one source-clock day.
///
/// Every record falls between 00:00 and 20:59 source time, so with the default
/// three-hour shift all of them land on the same UTC day. No two records share
/// a leaf.
#[allow(dead_code)]
pub fn generate_stream(count: usize, seed: u64) -> GeneratedStream {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::with_capacity(count);

    while records.len() < count {
        let path = COMPONENT_PATHS[rng.random_range(0..COMPONENT_PATHS.len())];
        let point = MONITOR_POINTS[rng.random_range(0..MONITOR_POINTS.len())];
        let hour = rng.random_range(0..21u32);
        let minute = rng.random_range(0..60u32);
        let second = rng.random_range(0..60u32);
        if !seen.insert((path, point, hour, minute, second)) {
            continue;
        }
        let date = format!("2024-05-01T{hour:02}:{minute:02}:{second:02}Z");
        let value = format!("{:.1}", rng.random_range(0.0..99.0f64));
        records.push(legacy_record(path, point, &date, &value));
    }

    let documents = seen
        .iter()
        .map(|(path, point, ..)| (*path, *point))
        .collect::<std::collections::HashSet<_>>()
        .len();
    GeneratedStream { records, documents }
}
