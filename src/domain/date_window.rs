// Date windows, availability metadata and timestamp parsing
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,
    #[error("unparsable timestamp: {0}")]
    Unparsable(String),
}

/// Accepts RFC 3339, naive date-times (taken as UTC) and bare dates (midnight UTC).
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TimestampError::Empty);
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Ok(time.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimestampError::Unparsable(raw.to_string()))
}

/// What the data source knows about the stored history of a set of entities.
/// Timestamps stay raw; they are only trusted after `parse_instant`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityInfo {
    #[serde(rename = "earliest_timestamp")]
    pub earliest: Option<String>,
    #[serde(rename = "latest_timestamp")]
    pub latest: Option<String>,
    pub has_recent_data: bool,
}

impl AvailabilityInfo {
    pub fn latest_instant(&self) -> Option<DateTime<Utc>> {
        self.latest.as_deref().and_then(|raw| parse_instant(raw).ok())
    }

    pub fn earliest_instant(&self) -> Option<DateTime<Utc>> {
        self.earliest.as_deref().and_then(|raw| parse_instant(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_fallback: bool,
}

impl DateWindow {
    /// Builds a window, swapping the ends if they arrive reversed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, is_fallback: bool) -> Self {
        if start <= end {
            Self { start, end, is_fallback }
        } else {
            Self { start: end, end: start, is_fallback }
        }
    }

    pub fn fallback_notice(&self) -> Option<FallbackNotice> {
        self.is_fallback.then(|| FallbackNotice::new(self.start, self.end))
    }
}

/// Data for the dismissible "showing most recent available data" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackNotice {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub message: String,
}

impl FallbackNotice {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let message = format!(
            "No recent data. Showing most recent available data from {} to {}.",
            start.format("%Y-%m-%d %H:%M UTC"),
            end.format("%Y-%m-%d %H:%M UTC")
        );
        Self { start, end, message }
    }
}
