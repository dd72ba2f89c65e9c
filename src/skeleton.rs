//! # Skeleton Documents
//!
//! A skeleton is a fully-shaped placeholder document inserted before any real
//! value is written, so later writes only overwrite existing leaves and the
//! stored document never grows.
//!
//! The generic full-day trees are built once per size class and kept
//! immutable; callers get fresh copies overlaid with their own `id` and
//! `metadata` (template + overlay).

use crate::model::{DocumentMetadata, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Number of cached size classes; valid sizes are `0..MAX_SIZE`.
pub const MAX_SIZE: usize = 7;

/// Marker written into every unset leaf.
pub const NOT_ASSIGNED: &str = "na";

/// Padding used to grow the marker up to the requested size.
pub const FILLER: char = 'a';

pub const HOURS_PER_DAY: u8 = 24;
pub const MINUTES_PER_HOUR: u8 = 60;
pub const SECONDS_PER_MINUTE: u8 = 60;

/// Leaves of one minute, keyed by second.
pub type SecondBucket = BTreeMap<u8, String>;
/// Second buckets of one hour, keyed by minute.
pub type MinuteBucket = BTreeMap<u8, SecondBucket>;
/// The whole `hourly` tree, keyed by hour.
pub type Hourly = BTreeMap<u8, MinuteBucket>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkeletonError {
    #[error("value size {size} outside cached size classes [0, {max})", max = MAX_SIZE)]
    InvalidSize { size: usize },
    #[error("sample time must be at least one second")]
    ZeroSampleTime,
}

/// Persisted skeleton: `{id, metadata, hourly}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonDocument {
    pub id: String,
    pub metadata: DocumentMetadata,
    pub hourly: Hourly,
}

impl SkeletonDocument {
    pub fn new(metadata: &Metadata, hourly: Hourly) -> Self {
        Self {
            id: metadata.document_id.to_string(),
            metadata: metadata.document_fields(),
            hourly,
        }
    }

    /// Total number of second-level leaves.
    pub fn leaf_count(&self) -> usize {
        leaf_count(&self.hourly)
    }
}

/// Placeholder value for a size class.
///
/// Sizes up to two use the bare marker; larger sizes pad the marker with
/// [`FILLER`] until the placeholder is exactly `size` characters long.
pub fn placeholder(size: usize) -> String {
    let mut value = String::from(NOT_ASSIGNED);
    value.extend(std::iter::repeat(FILLER).take(size.saturating_sub(NOT_ASSIGNED.len())));
    value
}

/// A full day of leaves, all set to `value`.
pub fn full_day_tree(value: &str) -> Hourly {
    (0..HOURS_PER_DAY)
        .map(|hour| {
            let minutes = (0..MINUTES_PER_HOUR)
                .map(|minute| {
                    let seconds = (0..SECONDS_PER_MINUTE)
                        .map(|second| (second, value.to_string()))
                        .collect();
                    (minute, seconds)
                })
                .collect();
            (hour, minutes)
        })
        .collect()
}

pub fn leaf_count(hourly: &Hourly) -> usize {
    hourly
        .values()
        .flat_map(|minutes| minutes.values())
        .map(|seconds| seconds.len())
        .sum()
}

/// Precomputed generic full-day skeletons, one per size class.
#[derive(Debug)]
pub struct SkeletonTemplates {
    templates: Vec<Hourly>,
}

impl SkeletonTemplates {
    /// Build every size class. Done once at startup.
    pub fn build() -> Self {
        let templates = (0..MAX_SIZE)
            .map(|size| full_day_tree(&placeholder(size)))
            .collect();
        Self { templates }
    }

    /// The cached generic tree for `size`.
    pub fn template(&self, size: usize) -> Result<&Hourly, SkeletonError> {
        self.templates
            .get(size)
            .ok_or(SkeletonError::InvalidSize { size })
    }

    /// A fresh skeleton for `metadata`, copied from the cached template.
    pub fn materialize(
        &self,
        metadata: &Metadata,
        size: usize,
    ) -> Result<SkeletonDocument, SkeletonError> {
        let hourly = self.template(size)?.clone();
        Ok(SkeletonDocument::new(metadata, hourly))
    }
}

impl Default for SkeletonTemplates {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentId;

    fn metadata() -> Metadata {
        Metadata {
            document_id: DocumentId::new(2024, 5, 1, "DV10", "FrontEnd/Cryostat", "MP1")
                .unwrap(),
            property: "P1".into(),
            location: "L".into(),
            serial_number: "SN1".into(),
            index: 3,
            sample_time_secs: 1,
        }
    }

    #[test]
    fn test_placeholder_lengths() {
        assert_eq!(placeholder(0), "na");
        assert_eq!(placeholder(1), "na");
        assert_eq!(placeholder(2), "na");
        assert_eq!(placeholder(3), "naa");
        assert_eq!(placeholder(6), "naaaaa");
        for size in 3..MAX_SIZE {
            assert_eq!(placeholder(size).len(), size);
        }
    }

    #[test]
    fn test_template_rejects_out_of_range() {
        let templates = SkeletonTemplates::build();
        assert!(templates.template(MAX_SIZE - 1).is_ok());
        assert_eq!(
            templates.template(MAX_SIZE).unwrap_err(),
            SkeletonError::InvalidSize { size: MAX_SIZE }
        );
        assert!(templates.materialize(&metadata(), 42).is_err());
    }

    #[test]
    fn test_template_shape() {
        let templates = SkeletonTemplates::build();
        let hourly = templates.template(4).unwrap();
        assert_eq!(hourly.len(), 24);
        assert!(hourly.values().all(|minutes| minutes.len() == 60));
        assert_eq!(leaf_count(hourly), 86_400);
        assert!(hourly
            .values()
            .flat_map(|minutes| minutes.values())
            .flat_map(|seconds| seconds.values())
            .all(|leaf| leaf == "naaa"));
    }

    #[test]
    fn test_materialize_does_not_touch_template() {
        let templates = SkeletonTemplates::build();
        let mut doc = templates.materialize(&metadata(), 3).unwrap();
        assert_eq!(doc.id, "2024-05-01:DV10:FrontEnd/Cryostat:MP1");
        assert_eq!(doc.metadata.antenna, "DV10");

        doc.hourly
            .get_mut(&13)
            .and_then(|minutes| minutes.get_mut(&0))
            .and_then(|seconds| seconds.insert(0, "7.2".to_string()));

        let fresh = templates.template(3).unwrap();
        assert_eq!(fresh[&13][&0][&0], "naa");
        assert_eq!(doc.hourly[&13][&0][&0], "7.2");
    }

    #[test]
    fn test_skeleton_serializes_string_keys() {
        let templates = SkeletonTemplates::build();
        let doc = templates.materialize(&metadata(), 2).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["hourly"]["23"]["59"]["59"], "na");
        assert_eq!(json["metadata"]["monitorPoint"], "MP1");
        assert_eq!(json["id"], doc.id.as_str());
    }
}
