// InfluxDB data source implementation
use crate::application::data_source::{DataSource, Resample};
use crate::domain::date_window::{AvailabilityInfo, parse_instant};
use crate::domain::series::{Series, SeriesPoint, merge_incoming};
use crate::infrastructure::config::{InfluxSettings, MeasurementConfig, prepare_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashMap;

const SERIES_QUERY: &str = "SELECT \"${field}\" AS value FROM \"${measurement}\" \
     WHERE \"${tag}\" = '${entity}' AND time >= '${start}' AND time <= '${end}' ORDER BY time ASC";

const RESAMPLED_SERIES_QUERY: &str = "SELECT mean(\"${field}\") AS value FROM \"${measurement}\" \
     WHERE \"${tag}\" = '${entity}' AND time >= '${start}' AND time <= '${end}' \
     GROUP BY time(${interval}) fill(none) ORDER BY time ASC";

const STREAM_QUERY: &str = "SELECT \"${field}\" AS value FROM \"${measurement}\" \
     WHERE \"${tag}\" = '${entity}' AND time > '${since}' ORDER BY time ASC";

const AVAILABILITY_QUERY: &str = "SELECT ${selector}(\"${field}\") FROM \"${measurement}\" \
     WHERE \"${tag}\" =~ /^(${entities})$/";

#[derive(Debug, Clone)]
pub struct InfluxDataSource {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    entity_tag: String,
    availability_measurement: String,
    availability_field: String,
    recent_window: TimeDelta,
    measurements: HashMap<String, MeasurementConfig>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxDataSource {
    pub fn new(settings: InfluxSettings, measurements: &[MeasurementConfig]) -> Self {
        Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token,
            database: settings.database,
            retention_policy: settings.retention_policy,
            entity_tag: settings.entity_tag,
            availability_measurement: settings.availability_measurement,
            availability_field: settings.availability_field,
            recent_window: TimeDelta::hours(settings.recent_data_hours.max(1)),
            measurements: measurements
                .iter()
                .map(|m| (m.name.clone(), m.clone()))
                .collect(),
            client: reqwest::Client::new(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);
        tracing::debug!("Executing InfluxQL: {}", query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.first().and_then(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    fn measurement(&self, name: &str) -> Result<&MeasurementConfig> {
        self.measurements
            .get(name)
            .with_context(|| format!("Unknown measurement: {}", name))
    }

    fn query_vars(&self, measurement: &MeasurementConfig, entity_id: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("field".to_string(), escape_identifier(&measurement.field));
        vars.insert(
            "measurement".to_string(),
            escape_identifier(measurement.influx_measurement()),
        );
        vars.insert("tag".to_string(), escape_identifier(&self.entity_tag));
        vars.insert("entity".to_string(), escape_literal(entity_id));
        vars
    }

    fn series_query(
        &self,
        measurement: &MeasurementConfig,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resample: Resample,
    ) -> String {
        let mut vars = self.query_vars(measurement, entity_id);
        vars.insert("start".to_string(), influx_time(start));
        vars.insert("end".to_string(), influx_time(end));
        match resample.interval() {
            Some(interval) => {
                vars.insert("interval".to_string(), interval.to_string());
                prepare_query(RESAMPLED_SERIES_QUERY, &vars)
            }
            None => prepare_query(SERIES_QUERY, &vars),
        }
    }

    fn stream_query(
        &self,
        measurement: &MeasurementConfig,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> String {
        let mut vars = self.query_vars(measurement, entity_id);
        vars.insert("since".to_string(), influx_time(since));
        prepare_query(STREAM_QUERY, &vars)
    }

    fn availability_query(&self, selector: &str, entity_ids: &[String]) -> String {
        let mut vars = HashMap::new();
        vars.insert("selector".to_string(), selector.to_string());
        vars.insert("field".to_string(), escape_identifier(&self.availability_field));
        vars.insert(
            "measurement".to_string(),
            escape_identifier(&self.availability_measurement),
        );
        vars.insert("tag".to_string(), escape_identifier(&self.entity_tag));
        vars.insert("entities".to_string(), entity_regex(entity_ids));
        prepare_query(AVAILABILITY_QUERY, &vars)
    }

    /// Queries for the earliest and latest samples, in that order.
    fn availability_queries(&self, entity_ids: &[String]) -> (String, String) {
        (
            self.availability_query("first", entity_ids),
            self.availability_query("last", entity_ids),
        )
    }

    fn is_recent(&self, latest: Option<&str>, now: DateTime<Utc>) -> bool {
        latest
            .and_then(|raw| parse_instant(raw).ok())
            .is_some_and(|latest| latest >= now - self.recent_window)
    }
}

#[async_trait]
impl DataSource for InfluxDataSource {
    async fn get_availability(&self, entity_ids: &[String]) -> Result<AvailabilityInfo> {
        if entity_ids.is_empty() {
            return Ok(AvailabilityInfo::default());
        }

        let (first_query, last_query) = self.availability_queries(entity_ids);
        let (earliest, latest) = tokio::try_join!(
            self.execute_query(&first_query),
            self.execute_query(&last_query),
        )?;

        let earliest = first_time(&earliest);
        let latest = first_time(&latest);
        let has_recent_data = self.is_recent(latest.as_deref(), Utc::now());

        tracing::debug!(
            "Availability for {:?}: {:?} .. {:?} (recent: {})",
            entity_ids,
            earliest,
            latest,
            has_recent_data
        );

        Ok(AvailabilityInfo {
            earliest,
            latest,
            has_recent_data,
        })
    }

    async fn get_series(
        &self,
        entity_id: &str,
        measurement: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resample: Resample,
    ) -> Result<Series> {
        let config = self.measurement(measurement)?;
        let query = self.series_query(config, entity_id, start, end, resample);
        let response = self.execute_query(&query).await?;
        Ok(series_from_response(&response))
    }

    async fn stream_series(
        &self,
        entity_id: &str,
        measurement: &str,
        since: DateTime<Utc>,
    ) -> Result<Series> {
        let config = self.measurement(measurement)?;
        let query = self.stream_query(config, entity_id, since);
        let response = self.execute_query(&query).await?;
        Ok(series_from_response(&response))
    }
}

fn influx_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_identifier(identifier: &str) -> String {
    identifier.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_literal(literal: &str) -> String {
    literal.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Anchored alternation of the entity ids with regex metacharacters escaped.
fn entity_regex(entity_ids: &[String]) -> String {
    entity_ids
        .iter()
        .map(|id| {
            id.chars().fold(String::with_capacity(id.len()), |mut out, c| {
                if "\\.^$|?*+()[]{}/".contains(c) {
                    out.push('\\');
                }
                out.push(c);
                out
            })
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Time of the first row, left raw for the resolver to parse.
fn first_time(response: &InfluxQLResponse) -> Option<String> {
    let series = response.results.first()?.series.as_ref()?.first()?;
    let time_idx = series.columns.iter().position(|c| c == "time").unwrap_or(0);
    series
        .values
        .first()?
        .get(time_idx)?
        .as_str()
        .map(str::to_string)
}

/// Rows with unparsable times or non-numeric values are skipped; repeated
/// timestamps collapse to their first sample.
fn series_from_response(response: &InfluxQLResponse) -> Series {
    let mut points = Vec::new();
    if let Some(series) = response.results.first().and_then(|r| r.series.as_ref()) {
        for s in series {
            let time_idx = s.columns.iter().position(|c| c == "time").unwrap_or(0);
            let value_idx = s.columns.iter().position(|c| c == "value").unwrap_or(1);

            for row in &s.values {
                let (Some(time), Some(value)) = (
                    row.get(time_idx).and_then(|v| v.as_str()),
                    row.get(value_idx).and_then(|v| v.as_f64()),
                ) else {
                    continue;
                };
                match parse_instant(time) {
                    Ok(time) => points.push(SeriesPoint::new(time.timestamp_millis(), value)),
                    Err(e) => tracing::debug!("Skipping row: {}", e),
                }
            }
        }
    }
    merge_incoming(Series::new(), Series::from_points(points))
}
