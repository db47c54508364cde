// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::data_source::DataSource;
use crate::application::date_range_resolver::DateRangeResolver;
use crate::infrastructure::config::{load_charts_config, load_influx_config};
use crate::infrastructure::influx_data_source::InfluxDataSource;
use crate::presentation::app_state::{AppState, SessionRegistry};
use crate::presentation::handlers::{
    availability, export_chart, health_check, post_command, post_gesture, stream_chart,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sensor_charts=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let influx_config = load_influx_config()?;
    let charts_config = load_charts_config()?;

    // Create data source (infrastructure layer)
    let data_source: Arc<dyn DataSource> = Arc::new(InfluxDataSource::new(
        influx_config.influx,
        &charts_config.measurements,
    ));

    // Create chart engine collaborators (application layer)
    let resolver = DateRangeResolver::new(data_source.clone())
        .with_window_days(charts_config.chart.default_window_days);

    let state = Arc::new(AppState {
        data_source,
        resolver,
        settings: charts_config.chart.surface_settings(),
        measurements: charts_config
            .measurements
            .iter()
            .map(|m| (m.name.clone(), m.to_spec()))
            .collect(),
        sessions: SessionRegistry::default(),
    });

    // Build router (presentation layer)
    // Responses are compressed by hand per payload, so no CompressionLayer here.
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/availability", get(availability))
        .route("/charts/stream", get(stream_chart))
        .route("/charts/:session/gestures", post(post_gesture))
        .route("/charts/:session/commands", post(post_command))
        .route("/charts/:session/export", get(export_chart))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = charts_config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", charts_config.server.bind))?;
    tracing::info!("Starting sensor-charts service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router).await?;

    Ok(())
}
