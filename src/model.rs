//! # Data Model
//!
//! Identity and metadata value types for the one-document-per-monitor-point-per-day
//! layout. Months are 1-based everywhere (January = 1).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::{Date, Month};

/// Separator between the segments of a canonical document id.
const ID_SEPARATOR: char = ':';

/// Errors produced while building or parsing a [`DocumentId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentIdError {
    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u8, day: u8 },
    #[error("malformed document id {0:?}")]
    Malformed(String),
}

/// Canonical identity of one monitor point's document for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    date: Date,
    antenna: String,
    component: String,
    monitor_point: String,
}

impl DocumentId {
    /// Build an id, validating the calendar date.
    pub fn new(
        year: i32,
        month: u8,
        day: u8,
        antenna: impl Into<String>,
        component: impl Into<String>,
        monitor_point: impl Into<String>,
    ) -> Result<Self, DocumentIdError> {
        let invalid = || DocumentIdError::InvalidDate { year, month, day };
        let month_value = Month::try_from(month).map_err(|_| invalid())?;
        let date = Date::from_calendar_date(year, month_value, day).map_err(|_| invalid())?;
        Ok(Self::from_date(date, antenna, component, monitor_point))
    }

    pub fn from_date(
        date: Date,
        antenna: impl Into<String>,
        component: impl Into<String>,
        monitor_point: impl Into<String>,
    ) -> Self {
        Self {
            date,
            antenna: antenna.into(),
            component: component.into(),
            monitor_point: monitor_point.into(),
        }
    }

    pub fn date(&self) -> Date {
        self.date
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Calendar month, 1-based.
    pub fn month(&self) -> u8 {
        self.date.month() as u8
    }

    pub fn day(&self) -> u8 {
        self.date.day()
    }

    pub fn antenna(&self) -> &str {
        &self.antenna
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn monitor_point(&self) -> &str {
        &self.monitor_point
    }

    /// The `YYYY-MM-DD` form stored in `metadata.date`.
    pub fn date_string(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year(), self.month(), self.day())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.date_string(),
            escape_segment(&self.antenna),
            escape_segment(&self.component),
            escape_segment(&self.monitor_point),
            sep = ID_SEPARATOR,
        )
    }
}

impl FromStr for DocumentId {
    type Err = DocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DocumentIdError::Malformed(s.to_string());
        let parts: Vec<&str> = s.split(ID_SEPARATOR).collect();
        let [date, antenna, component, monitor_point] = parts.as_slice() else {
            return Err(malformed());
        };

        let mut fields = date.splitn(3, '-');
        let (Some(year), Some(month), Some(day)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u8 = month.parse().map_err(|_| malformed())?;
        let day: u8 = day.parse().map_err(|_| malformed())?;

        let id = DocumentId::new(
            year,
            month,
            day,
            unescape_segment(antenna).ok_or_else(malformed)?,
            unescape_segment(component).ok_or_else(malformed)?,
            unescape_segment(monitor_point).ok_or_else(malformed)?,
        )?;
        // Reject non-canonical spellings such as unpadded dates.
        if id.date_string() != *date {
            return Err(malformed());
        }
        Ok(id)
    }
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ID_SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_segment(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(ID_SEPARATOR),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// Descriptive fields attached to every document of a monitor point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub document_id: DocumentId,
    pub property: String,
    pub location: String,
    pub serial_number: String,
    pub index: i64,
    /// Nominal interval between readings, in seconds.
    pub sample_time_secs: u32,
}

impl Metadata {
    /// The `metadata` sub-document as persisted.
    pub fn document_fields(&self) -> DocumentMetadata {
        let id = &self.document_id;
        DocumentMetadata {
            date: id.date_string(),
            antenna: id.antenna.clone(),
            component: id.component.clone(),
            property: self.property.clone(),
            monitor_point: id.monitor_point.clone(),
            location: self.location.clone(),
            serial_number: self.serial_number.clone(),
            index: self.index,
            sample_time: self.sample_time_secs,
        }
    }
}

/// Persisted shape of the `metadata` sub-document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub date: String,
    pub antenna: String,
    pub component: String,
    pub property: String,
    pub monitor_point: String,
    pub location: String,
    pub serial_number: String,
    pub index: i64,
    pub sample_time: u32,
}

/// Position of a single reading inside the `hourly` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafPath {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl LeafPath {
    pub fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Path segments below the document root, e.g. `["hourly", "13", "0", "0"]`.
    pub fn segments(&self) -> [String; 4] {
        [
            "hourly".to_string(),
            self.hour.to_string(),
            self.minute.to_string(),
            self.second.to_string(),
        ]
    }
}

impl fmt::Display for LeafPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hourly.{}.{}.{}", self.hour, self.minute, self.second)
    }
}

/// A single timestamped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub metadata: Metadata,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub value: String,
}

impl Sample {
    pub fn document_id(&self) -> &DocumentId {
        &self.metadata.document_id
    }

    pub fn leaf(&self) -> LeafPath {
        LeafPath::new(self.hour, self.minute, self.second)
    }

    /// Size class requested by this sample's value.
    pub fn value_size(&self) -> usize {
        self.value.chars().count()
    }
}
