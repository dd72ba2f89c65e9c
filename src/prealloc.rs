//! # Preallocation Engine
//!
//! Builds skeleton documents either for a whole day (straight from the
//! template cache) or from a start time to the end of the document's day,
//! stepping a simulated clock by the monitor point's sample time.

use crate::model::{LeafPath, Metadata};
use crate::skeleton::{
    full_day_tree, placeholder, Hourly, MinuteBucket, SkeletonDocument, SkeletonError,
    SkeletonTemplates,
};
use time::{Date, Duration, PrimitiveDateTime, Time};

/// Full-day skeleton from the cached template for `size`.
pub fn full_day(
    templates: &SkeletonTemplates,
    metadata: &Metadata,
    size: usize,
) -> Result<SkeletonDocument, SkeletonError> {
    templates.materialize(metadata, size)
}

/// Full-day skeleton for a size the template cache does not hold.
pub fn full_day_uncached(metadata: &Metadata, size: usize) -> SkeletonDocument {
    SkeletonDocument::new(metadata, full_day_tree(&placeholder(size)))
}

/// Skeleton covering `start` through the end of the document's day.
///
/// One leaf is produced per simulated tick. Leaves are grouped into minute
/// buckets, minute buckets into hour buckets; whatever the last tick before
/// the day rolls over accumulated forms the trailing bucket.
pub fn from_time(
    metadata: &Metadata,
    start: Time,
    size: usize,
) -> Result<SkeletonDocument, SkeletonError> {
    let ticks = simulated_ticks(
        metadata.document_id.date(),
        start,
        metadata.sample_time_secs,
    )?;
    let hourly = assemble(&ticks, &placeholder(size));
    Ok(SkeletonDocument::new(metadata, hourly))
}

/// Every clock reading from `start` until the day changes.
fn simulated_ticks(day: Date, start: Time, step_secs: u32) -> Result<Vec<LeafPath>, SkeletonError> {
    if step_secs == 0 {
        return Err(SkeletonError::ZeroSampleTime);
    }
    let step = Duration::seconds(i64::from(step_secs));
    let first = PrimitiveDateTime::new(day, start);

    Ok(std::iter::successors(Some(first), |tick| tick.checked_add(step))
        .take_while(|tick| tick.date() == day)
        .map(|tick| LeafPath::new(tick.hour(), tick.minute(), tick.second()))
        .collect())
}

/// Group monotonic ticks into the nested hour/minute/second tree.
fn assemble(ticks: &[LeafPath], value: &str) -> Hourly {
    ticks
        .chunk_by(|a, b| a.hour == b.hour)
        .map(|hour| (hour[0].hour, minute_buckets(hour, value)))
        .collect()
}

fn minute_buckets(ticks: &[LeafPath], value: &str) -> MinuteBucket {
    ticks
        .chunk_by(|a, b| a.minute == b.minute)
        .map(|minute| {
            let seconds = minute
                .iter()
                .map(|tick| (tick.second, value.to_string()))
                .collect();
            (minute[0].minute, seconds)
        })
        .collect()
}
