//! Legacy flat telemetry records and their translation into [`Sample`]s.
//!
//! A legacy record carries the whole hierarchy in one `componentName` such as
//! `CONTROL/DV10/FrontEnd/Cryostat`, and a timestamp in the source system's
//! clock domain.

use crate::config::{DEFAULT_CLOCK_SHIFT_HOURS, DEFAULT_SAMPLE_TIME_SECS};
use crate::model::{DocumentId, Metadata, Sample};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported component path {0:?}")]
    ComponentPath(String),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid index {0:?}")]
    Index(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// Record index as found in exports: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyIndex {
    Number(i64),
    Text(String),
}

impl LegacyIndex {
    fn value(&self) -> Result<i64, DecodeError> {
        match self {
            LegacyIndex::Number(n) => Ok(*n),
            LegacyIndex::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| DecodeError::Index(text.clone())),
        }
    }
}

/// Record timestamp: epoch milliseconds, an RFC 3339 string, or an
/// extended-JSON `{"$date": ...}` wrapper around either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyTimestamp {
    EpochMillis(i64),
    Text(String),
    Extended {
        #[serde(rename = "$date")]
        date: Box<LegacyTimestamp>,
    },
}

impl LegacyTimestamp {
    fn instant(&self) -> Result<OffsetDateTime, DecodeError> {
        match self {
            LegacyTimestamp::EpochMillis(millis) => {
                let nanos = i128::from(*millis) * 1_000_000;
                OffsetDateTime::from_unix_timestamp_nanos(nanos)
                    .map_err(|e| DecodeError::Timestamp(e.to_string()))
            }
            LegacyTimestamp::Text(text) => OffsetDateTime::parse(text, &Rfc3339)
                .map_err(|e| DecodeError::Timestamp(format!("{text:?}: {e}"))),
            LegacyTimestamp::Extended { date } => date.instant(),
        }
    }
}

/// How decoded samples are stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSettings {
    pub sample_time_secs: u32,
    pub clock_shift_hours: i64,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            sample_time_secs: DEFAULT_SAMPLE_TIME_SECS,
            clock_shift_hours: DEFAULT_CLOCK_SHIFT_HOURS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecord {
    pub component_name: Option<String>,
    pub property_name: Option<String>,
    pub monitor_point_name: Option<String>,
    pub location: Option<String>,
    pub serial_number: Option<String>,
    pub monitor_value: Option<String>,
    pub index: Option<LegacyIndex>,
    pub date: Option<LegacyTimestamp>,
}

impl LegacyRecord {
    pub fn decode(&self, settings: &DecodeSettings) -> Result<Sample, DecodeError> {
        let component_name = required(&self.component_name, "componentName")?;
        let (antenna, component) = split_component_path(component_name)?;

        let timestamp = self
            .date
            .as_ref()
            .ok_or(DecodeError::MissingField("date"))?
            .instant()?;
        let shifted = timestamp
            .checked_add(Duration::hours(settings.clock_shift_hours))
            .ok_or_else(|| DecodeError::Timestamp("clock shift out of range".to_string()))?
            .to_offset(UtcOffset::UTC);

        let monitor_point = required(&self.monitor_point_name, "monitorPointName")?;
        let document_id = DocumentId::from_date(shifted.date(), antenna, component, monitor_point);
        let index = self
            .index
            .as_ref()
            .ok_or(DecodeError::MissingField("index"))?
            .value()?;

        let metadata = Metadata {
            document_id,
            property: required(&self.property_name, "propertyName")?.to_string(),
            location: required(&self.location, "location")?.to_string(),
            serial_number: required(&self.serial_number, "serialNumber")?.to_string(),
            index,
            sample_time_secs: settings.sample_time_secs,
        };
        Ok(Sample {
            metadata,
            hour: shifted.hour(),
            minute: shifted.minute(),
            second: shifted.second(),
            value: required(&self.monitor_value, "monitorValue")?.to_string(),
        })
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, DecodeError> {
    field.as_deref().ok_or(DecodeError::MissingField(name))
}

/// `(antenna, component)` from a slash-separated component path.
fn split_component_path(path: &str) -> Result<(String, String), DecodeError> {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        [antenna, component] => Ok((antenna.to_string(), component.to_string())),
        [_, antenna, component] => Ok((antenna.to_string(), component.to_string())),
        [_, antenna, component, sub] => Ok((antenna.to_string(), format!("{component}/{sub}"))),
        _ => Err(DecodeError::ComponentPath(path.to_string())),
    }
}
