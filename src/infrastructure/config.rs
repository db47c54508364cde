use crate::application::chart_surface::{MeasurementSpec, SurfaceSettings};
use crate::domain::axis::{AxisConfig, AxisId};
use anyhow::Context;
use chrono::TimeDelta;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "SENSOR_CHARTS";

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxConfig {
    pub influx: InfluxSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_entity_tag")]
    pub entity_tag: String,
    pub availability_measurement: String,
    #[serde(default = "default_value_field")]
    pub availability_field: String,
    /// Latest data older than this counts as "not recent".
    #[serde(default = "default_recent_data_hours")]
    pub recent_data_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartsConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub chart: ChartSettings,
    #[serde(default)]
    pub measurements: Vec<MeasurementConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartSettings {
    #[serde(default = "default_tick_count")]
    pub tick_count: usize,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub min_floor: Option<f64>,
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stream_backfill_minutes")]
    pub stream_backfill_minutes: i64,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            tick_count: default_tick_count(),
            factor: default_factor(),
            min_floor: None,
            default_window_days: default_window_days(),
            poll_interval_secs: default_poll_interval_secs(),
            stream_backfill_minutes: default_stream_backfill_minutes(),
        }
    }
}

impl ChartSettings {
    pub fn surface_settings(&self) -> SurfaceSettings {
        SurfaceSettings {
            axis: AxisConfig {
                tick_count: self.tick_count.max(1),
                factor: self.factor,
                min_floor: self.min_floor,
                ..AxisConfig::default()
            },
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            stream_backfill: TimeDelta::minutes(self.stream_backfill_minutes.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeasurementConfig {
    pub name: String,
    /// Influx measurement holding the samples; defaults to `name`.
    #[serde(default)]
    pub influx_measurement: Option<String>,
    #[serde(default = "default_value_field")]
    pub field: String,
    pub unit: Option<String>,
    #[serde(default = "default_axis")]
    pub axis: String,
    #[serde(default)]
    pub percentage: bool,
    #[serde(default)]
    pub style: Option<serde_json::Value>,
}

impl MeasurementConfig {
    pub fn influx_measurement(&self) -> &str {
        self.influx_measurement.as_deref().unwrap_or(&self.name)
    }

    pub fn to_spec(&self) -> MeasurementSpec {
        MeasurementSpec {
            name: self.name.clone(),
            axis: AxisId::new(self.axis.clone()),
            unit: self.unit.clone(),
            percentage: self.percentage,
            style: self.style.clone().unwrap_or(serde_json::Value::Null),
        }
    }
}

fn default_entity_tag() -> String {
    "device".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

fn default_recent_data_hours() -> i64 {
    24
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_tick_count() -> usize {
    8
}

fn default_factor() -> f64 {
    0.2
}

fn default_window_days() -> i64 {
    14
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_stream_backfill_minutes() -> i64 {
    60
}

fn default_axis() -> String {
    AxisId::LEFT.to_string()
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}

pub fn load_influx_config() -> anyhow::Result<InfluxConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/influx"))
        .add_source(environment())
        .build()
        .context("Failed to load config/influx")?;

    Ok(settings.try_deserialize()?)
}

pub fn load_charts_config() -> anyhow::Result<ChartsConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/charts").required(false))
        .add_source(environment())
        .build()
        .context("Failed to load config/charts")?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
