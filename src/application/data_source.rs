// Data source capability consumed by the chart engine
use crate::domain::date_window::AvailabilityInfo;
use crate::domain::series::Series;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resampling granularity handed through to the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resample {
    #[default]
    None,
    Hour,
    Day,
}

impl Resample {
    /// InfluxQL `GROUP BY time(..)` interval, if any.
    pub fn interval(&self) -> Option<&'static str> {
        match self {
            Resample::None => None,
            Resample::Hour => Some("1h"),
            Resample::Day => Some("1d"),
        }
    }
}

impl FromStr for Resample {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "raw" => Ok(Resample::None),
            "hour" | "hourly" => Ok(Resample::Hour),
            "day" | "daily" => Ok(Resample::Day),
            other => anyhow::bail!("unknown resample granularity: {}", other),
        }
    }
}

impl fmt::Display for Resample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resample::None => "none",
            Resample::Hour => "hour",
            Resample::Day => "day",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Earliest/latest stored timestamps across the given entities
    async fn get_availability(&self, entity_ids: &[String]) -> anyhow::Result<AvailabilityInfo>;

    /// Historical series for one entity and measurement within `[start, end]`
    async fn get_series(
        &self,
        entity_id: &str,
        measurement: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resample: Resample,
    ) -> anyhow::Result<Series>;

    /// Short-window poll: samples newer than `since`
    async fn stream_series(
        &self,
        entity_id: &str,
        measurement: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Series>;
}
