// Test doubles for the data source and renderer capabilities
use crate::application::data_source::{DataSource, Resample};
use crate::application::renderer::{GestureCallback, RenderError, RenderHandle, Renderer};
use crate::domain::axis::AxisId;
use crate::domain::date_window::AvailabilityInfo;
use crate::domain::series::{Dataset, Series, SeriesPoint};
use crate::domain::viewport::RenderOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

type SeriesKey = (String, String);

#[derive(Default)]
struct StubState {
    availability: Option<AvailabilityInfo>,
    fail_availability: bool,
    series: HashMap<SeriesKey, Vec<SeriesPoint>>,
    stream_batches: HashMap<SeriesKey, VecDeque<Vec<SeriesPoint>>>,
    failing_entities: HashSet<String>,
    stalling_entities: HashSet<String>,
    stalled_fetches: usize,
    cancelled_fetches: usize,
    availability_calls: usize,
    series_calls: Vec<(String, String, DateTime<Utc>, DateTime<Utc>, Resample)>,
    stream_calls: Vec<(String, String, DateTime<Utc>)>,
}

/// Counts a stalled fetch until the future holding it is dropped.
struct StallGuard {
    state: Arc<Mutex<StubState>>,
}

impl StallGuard {
    fn new(state: Arc<Mutex<StubState>>) -> Self {
        state.lock().unwrap().stalled_fetches += 1;
        Self { state }
    }
}

impl Drop for StallGuard {
    fn drop(&mut self) {
        self.state.lock().unwrap().cancelled_fetches += 1;
    }
}

/// In-memory data source with canned responses and a call log.
#[derive(Clone, Default)]
pub struct StubDataSource {
    state: Arc<Mutex<StubState>>,
}

impl StubDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_availability(self, info: AvailabilityInfo) -> Self {
        self.state.lock().unwrap().availability = Some(info);
        self
    }

    pub fn failing_availability(self) -> Self {
        self.state.lock().unwrap().fail_availability = true;
        self
    }

    pub fn with_series(self, entity: &str, measurement: &str, points: &[(i64, f64)]) -> Self {
        self.state.lock().unwrap().series.insert(
            (entity.to_string(), measurement.to_string()),
            points.iter().map(|&(t, v)| SeriesPoint::new(t, v)).collect(),
        );
        self
    }

    pub fn failing_entity(self, entity: &str) -> Self {
        self.state.lock().unwrap().failing_entities.insert(entity.to_string());
        self
    }

    /// Series and stream fetches for this entity never complete.
    pub fn stalling_entity(self, entity: &str) -> Self {
        self.state.lock().unwrap().stalling_entities.insert(entity.to_string());
        self
    }

    /// Fetches that started stalling.
    pub fn stalled_fetches(&self) -> usize {
        self.state.lock().unwrap().stalled_fetches
    }

    /// Stalled fetches whose future has since been dropped.
    pub fn cancelled_fetches(&self) -> usize {
        self.state.lock().unwrap().cancelled_fetches
    }

    async fn stall_if_configured(&self, entity_id: &str) {
        let stalling = self.state.lock().unwrap().stalling_entities.contains(entity_id);
        if stalling {
            let _guard = StallGuard::new(self.state.clone());
            std::future::pending::<()>().await;
        }
    }

    /// Queue one batch for the next `stream_series` call on this key.
    pub fn push_stream_batch(&self, entity: &str, measurement: &str, points: &[(i64, f64)]) {
        self.state
            .lock()
            .unwrap()
            .stream_batches
            .entry((entity.to_string(), measurement.to_string()))
            .or_default()
            .push_back(points.iter().map(|&(t, v)| SeriesPoint::new(t, v)).collect());
    }

    pub fn availability_calls(&self) -> usize {
        self.state.lock().unwrap().availability_calls
    }

    pub fn series_calls(&self) -> Vec<(String, String, DateTime<Utc>, DateTime<Utc>, Resample)> {
        self.state.lock().unwrap().series_calls.clone()
    }

    pub fn stream_calls(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.state.lock().unwrap().stream_calls.clone()
    }
}

#[async_trait]
impl DataSource for StubDataSource {
    async fn get_availability(&self, _entity_ids: &[String]) -> anyhow::Result<AvailabilityInfo> {
        let mut state = self.state.lock().unwrap();
        state.availability_calls += 1;
        if state.fail_availability {
            anyhow::bail!("availability endpoint unreachable");
        }
        Ok(state.availability.clone().unwrap_or_default())
    }

    async fn get_series(
        &self,
        entity_id: &str,
        measurement: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resample: Resample,
    ) -> anyhow::Result<Series> {
        self.stall_if_configured(entity_id).await;
        let mut state = self.state.lock().unwrap();
        state.series_calls.push((
            entity_id.to_string(),
            measurement.to_string(),
            start,
            end,
            resample,
        ));
        if state.failing_entities.contains(entity_id) {
            anyhow::bail!("series request for {} timed out", entity_id);
        }
        let key = (entity_id.to_string(), measurement.to_string());
        Ok(Series::from_points(state.series.get(&key).cloned().unwrap_or_default()))
    }

    async fn stream_series(
        &self,
        entity_id: &str,
        measurement: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Series> {
        self.stall_if_configured(entity_id).await;
        let mut state = self.state.lock().unwrap();
        state
            .stream_calls
            .push((entity_id.to_string(), measurement.to_string(), since));
        if state.failing_entities.contains(entity_id) {
            anyhow::bail!("stream request for {} timed out", entity_id);
        }
        let key = (entity_id.to_string(), measurement.to_string());
        let batch = state
            .stream_batches
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        Ok(Series::from_points(batch))
    }
}

#[derive(Default)]
struct RecorderState {
    frames: Vec<(Vec<Dataset>, RenderOptions)>,
    zoom: Option<GestureCallback>,
    pan: Option<GestureCallback>,
    resets: Vec<RenderHandle>,
    closed: bool,
}

/// Renderer that records every frame and lets tests fire gesture callbacks.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn last_options(&self) -> Option<RenderOptions> {
        self.state.lock().unwrap().frames.last().map(|(_, o)| o.clone())
    }

    pub fn last_datasets(&self) -> Option<Vec<Dataset>> {
        self.state.lock().unwrap().frames.last().map(|(d, _)| d.clone())
    }

    pub fn resets(&self) -> Vec<RenderHandle> {
        self.state.lock().unwrap().resets.clone()
    }

    pub fn fire_zoom(&self, axis: &str, min: f64, max: f64) {
        if let Some(callback) = self.state.lock().unwrap().zoom.as_mut() {
            callback(AxisId::new(axis), min, max);
        }
    }

    pub fn fire_pan(&self, axis: &str, min: f64, max: f64) {
        if let Some(callback) = self.state.lock().unwrap().pan.as_mut() {
            callback(AxisId::new(axis), min, max);
        }
    }

    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

impl Renderer for RecordingRenderer {
    fn render(
        &mut self,
        datasets: &[Dataset],
        options: &RenderOptions,
    ) -> Result<RenderHandle, RenderError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(RenderError::Closed);
        }
        state.frames.push((datasets.to_vec(), options.clone()));
        Ok(RenderHandle(state.frames.len() as u64))
    }

    fn on_zoom_complete(&mut self, callback: GestureCallback) {
        self.state.lock().unwrap().zoom = Some(callback);
    }

    fn on_pan_complete(&mut self, callback: GestureCallback) {
        self.state.lock().unwrap().pan = Some(callback);
    }

    fn reset_view(&mut self, handle: RenderHandle) -> Result<(), RenderError> {
        self.state.lock().unwrap().resets.push(handle);
        Ok(())
    }

    fn export_image(&self, handle: RenderHandle) -> Result<Vec<u8>, RenderError> {
        let state = self.state.lock().unwrap();
        let index = handle.0.checked_sub(1).ok_or(RenderError::UnknownHandle(handle))?;
        let (_, options) = state
            .frames
            .get(index as usize)
            .ok_or(RenderError::UnknownHandle(handle))?;
        Ok(serde_json::to_vec(options)?)
    }
}
