// HTTP request handlers
use crate::application::chart_surface::{ChartParams, ChartSurface, SurfaceCommand};
use crate::application::data_source::Resample;
use crate::application::renderer::RenderError;
use crate::domain::date_window::{DateWindow, parse_instant};
use crate::domain::viewport::GestureEvent;
use crate::infrastructure::chunked_stream::stream_from_receiver;
use crate::infrastructure::frame_renderer::{FrameRenderer, StreamMessage};
use crate::infrastructure::http_response::{accepts_brotli, bytes_response, json_response};
use crate::presentation::app_state::{AppState, Session};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const FRAME_BUFFER: usize = 32;
const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub entities: Option<String>,
    pub measurements: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    pub resample: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub entities: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandBody {
    Reset,
    ToggleZoom,
    TogglePan,
    DismissNotice,
    SetStreaming {
        streaming: bool,
    },
    SetEntities {
        entities: Vec<String>,
    },
    SetMeasurements {
        measurements: Vec<String>,
    },
    SetResample {
        resample: String,
    },
    SetWindow {
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
    },
}

impl CommandBody {
    fn into_command(self, state: &AppState) -> Result<SurfaceCommand, String> {
        let command = match self {
            CommandBody::Reset => SurfaceCommand::ResetView,
            CommandBody::ToggleZoom => SurfaceCommand::ToggleZoom,
            CommandBody::TogglePan => SurfaceCommand::TogglePan,
            CommandBody::DismissNotice => SurfaceCommand::DismissNotice,
            CommandBody::SetStreaming { streaming } => SurfaceCommand::SetStreaming(streaming),
            CommandBody::SetEntities { entities } => SurfaceCommand::SetEntities(entities),
            CommandBody::SetMeasurements { measurements } => {
                SurfaceCommand::SetMeasurements(state.measurement_specs(&measurements)?)
            }
            CommandBody::SetResample { resample } => {
                SurfaceCommand::SetResample(parse_resample(Some(&resample))?)
            }
            CommandBody::SetWindow { start, end } => {
                SurfaceCommand::SetWindow(parse_window(start.as_deref(), end.as_deref())?)
            }
        };
        Ok(command)
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_resample(raw: Option<&str>) -> Result<Resample, String> {
    match raw {
        Some(raw) => raw.parse().map_err(|e: anyhow::Error| e.to_string()),
        None => Ok(Resample::None),
    }
}

/// Both ends or neither; a missing window means "resolve from availability".
fn parse_window(start: Option<&str>, end: Option<&str>) -> Result<Option<DateWindow>, String> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = parse_instant(start).map_err(|e| e.to_string())?;
            let end = parse_instant(end).map_err(|e| e.to_string())?;
            Ok(Some(DateWindow::new(start, end, false)))
        }
        _ => Err("start and end must be given together".to_string()),
    }
}

fn chart_params(state: &AppState, query: &StreamQuery) -> Result<ChartParams, String> {
    let measurements = split_list(query.measurements.as_deref());
    let measurements = if measurements.is_empty() {
        let mut all: Vec<_> = state.measurements.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    } else {
        state.measurement_specs(&measurements)?
    };

    Ok(ChartParams {
        entity_ids: split_list(query.entities.as_deref()),
        measurements,
        streaming: query.streaming,
        window_override: parse_window(query.start.as_deref(), query.end.as_deref())?,
        resample: parse_resample(query.resample.as_deref())?,
    })
}

async fn session_or_404(state: &AppState, session_id: u64) -> Result<Session, Response> {
    state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Unknown chart session").into_response())
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Raw availability metadata for a set of entities
pub async fn availability(
    Query(query): Query<AvailabilityQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let entities = split_list(query.entities.as_deref());

    match state.data_source.get_availability(&entities).await {
        Ok(info) => match json_response(&info, compress).await {
            Ok(response) => response,
            Err(status) => status.into_response(),
        },
        Err(e) => {
            tracing::warn!("Error fetching availability for {:?}: {:#}", entities, e);
            (StatusCode::BAD_GATEWAY, "Availability lookup failed").into_response()
        }
    }
}

/// Mount a chart session and stream its frames until the client goes away
pub async fn stream_chart(
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let params = match chart_params(&state, &query) {
        Ok(params) => params,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (renderer, gestures) = FrameRenderer::new(frames_tx.clone());

    let session_id = state
        .sessions
        .insert(Session {
            commands: commands_tx,
            gestures,
        })
        .await;
    // Fresh channel, so the session message always fits.
    let _ = frames_tx.try_send(StreamMessage::Session { session_id });

    tracing::info!(
        "Chart session {} for {:?} (streaming: {})",
        session_id,
        params.entity_ids,
        params.streaming
    );

    let surface = ChartSurface::new(
        state.data_source.clone(),
        state.resolver.clone(),
        renderer,
        state.settings.clone(),
        params,
    );

    let task_state = state.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = surface.run(commands_rx) => {}
            _ = frames_tx.closed() => {
                tracing::debug!("Chart session {} client disconnected", session_id);
            }
        }
        task_state.sessions.remove(session_id).await;
        tracing::info!(
            "Chart session {} ended ({} active)",
            session_id,
            task_state.sessions.len().await
        );
    });

    stream_from_receiver(frames_rx, compress).into_response()
}

/// Forward a finished zoom or pan gesture to the session's renderer
pub async fn post_gesture(
    Path(session_id): Path<u64>,
    State(state): State<Arc<AppState>>,
    Json(event): Json<GestureEvent>,
) -> Response {
    let session = match session_or_404(&state, session_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    if session
        .gestures
        .dispatch(event.kind, event.axis, event.min, event.max)
    {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::CONFLICT, "No gesture handler registered").into_response()
    }
}

pub async fn post_command(
    Path(session_id): Path<u64>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommandBody>,
) -> Response {
    let session = match session_or_404(&state, session_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let command = match body.into_command(&state) {
        Ok(command) => command,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    match session.commands.send(command).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (StatusCode::GONE, "Chart session has ended").into_response(),
    }
}

/// Last rendered frame of a session
pub async fn export_chart(
    Path(session_id): Path<u64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let session = match session_or_404(&state, session_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if session
        .commands
        .send(SurfaceCommand::Export(reply_tx))
        .await
        .is_err()
    {
        return (StatusCode::GONE, "Chart session has ended").into_response();
    }

    match reply_rx.await {
        Ok(Ok(image)) => match bytes_response(image, "application/json", compress).await {
            Ok(response) => response,
            Err(status) => status.into_response(),
        },
        Ok(Err(e @ (RenderError::NothingRendered | RenderError::UnknownHandle(_)))) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Ok(Err(e)) => {
            tracing::warn!("Export failed for session {}: {}", session_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(_) => (StatusCode::GONE, "Chart session has ended").into_response(),
    }
}
