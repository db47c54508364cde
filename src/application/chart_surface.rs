// Chart surface - Drives one chart from window resolution to rendered frames
use crate::application::data_source::{DataSource, Resample};
use crate::application::date_range_resolver::DateRangeResolver;
use crate::application::renderer::{RenderError, RenderHandle, Renderer};
use crate::domain::axis::{AxisConfig, AxisId};
use crate::domain::date_window::{DateWindow, FallbackNotice};
use crate::domain::series::{Dataset, Series, merge_incoming};
use crate::domain::viewport::{
    ChartMode, GestureEvent, GestureKind, ScaleRange, ViewportController,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STREAM_BACKFILL_MINUTES: i64 = 60;

/// One measurement plotted for every selected entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSpec {
    pub name: String,
    pub axis: AxisId,
    pub unit: Option<String>,
    pub percentage: bool,
    pub style: serde_json::Value,
}

impl MeasurementSpec {
    pub fn new(name: impl Into<String>, axis: AxisId) -> Self {
        Self {
            name: name.into(),
            axis,
            unit: None,
            percentage: false,
            style: serde_json::Value::Null,
        }
    }
}

/// Parameters supplied by the UI; the surface re-fetches when they change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartParams {
    pub entity_ids: Vec<String>,
    pub measurements: Vec<MeasurementSpec>,
    pub streaming: bool,
    pub window_override: Option<DateWindow>,
    pub resample: Resample,
}

impl ChartParams {
    pub fn mode(&self) -> ChartMode {
        if self.streaming {
            ChartMode::Streaming
        } else {
            ChartMode::Static
        }
    }

    fn axis_config(&self, base: &AxisConfig) -> AxisConfig {
        let mut config = base.clone();
        config.percentage_axes = self
            .measurements
            .iter()
            .filter(|m| m.percentage)
            .map(|m| m.axis.clone())
            .collect();
        config
    }

    fn series_keys(&self) -> Vec<(String, MeasurementSpec)> {
        self.entity_ids
            .iter()
            .flat_map(|entity| {
                self.measurements
                    .iter()
                    .map(move |m| (entity.clone(), m.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceSettings {
    pub axis: AxisConfig,
    pub poll_interval: Duration,
    pub stream_backfill: TimeDelta,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            axis: AxisConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_backfill: TimeDelta::minutes(DEFAULT_STREAM_BACKFILL_MINUTES),
        }
    }
}

#[derive(Debug)]
pub enum SurfaceCommand {
    SetEntities(Vec<String>),
    SetMeasurements(Vec<MeasurementSpec>),
    SetWindow(Option<DateWindow>),
    SetResample(Resample),
    SetStreaming(bool),
    ToggleZoom,
    TogglePan,
    ResetView,
    DismissNotice,
    Export(oneshot::Sender<Result<Vec<u8>, RenderError>>),
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    None,
    Rerender,
    Refresh,
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
}

#[derive(Debug, Clone)]
pub struct RefreshTicket {
    pub generation: u64,
    params: ChartParams,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub generation: u64,
    window: Option<DateWindow>,
    datasets: Vec<Dataset>,
    cursor: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PollTicket {
    pub generation: u64,
    since: DateTime<Utc>,
    keys: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub generation: u64,
    batches: Vec<((String, String), Series)>,
}

enum TaskResult {
    Refresh(RefreshOutcome),
    Poll(PollOutcome),
}

fn newest_instant(datasets: &[Dataset]) -> Option<DateTime<Utc>> {
    datasets
        .iter()
        .filter_map(|d| d.series.last_time_ms())
        .max()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// The fetching half of a surface. Cheap to clone and free of surface
/// borrows, so loads can run as spawned tasks.
#[derive(Clone)]
pub struct SurfaceLoader {
    data_source: Arc<dyn DataSource>,
    resolver: DateRangeResolver,
    stream_backfill: TimeDelta,
}

impl SurfaceLoader {
    pub async fn load(self, ticket: RefreshTicket) -> RefreshOutcome {
        let params = ticket.params;
        // Streaming charts follow the live tail, never a fixed window.
        let window = match (params.streaming, params.window_override) {
            (true, _) => None,
            (false, Some(window)) => Some(window),
            (false, None) => Some(self.resolver.resolve(&params.entity_ids).await),
        };
        let since = self.resolver.now() - self.stream_backfill;

        let fetches = params.series_keys().into_iter().map(|(entity, spec)| {
            let source = self.data_source.clone();
            let resample = params.resample;
            async move {
                let result = match window {
                    Some(w) => {
                        source
                            .get_series(&entity, &spec.name, w.start, w.end, resample)
                            .await
                    }
                    None => source.stream_series(&entity, &spec.name, since).await,
                };
                let series = result.unwrap_or_else(|e| {
                    tracing::warn!("Failed to fetch {} for {}: {:#}", spec.name, entity, e);
                    Series::new()
                });
                Dataset::new(entity, spec.name, spec.axis, spec.unit, spec.style, series)
            }
        });
        let datasets = futures::future::join_all(fetches).await;

        let cursor = if params.streaming {
            Some(newest_instant(&datasets).unwrap_or(since))
        } else {
            None
        };

        RefreshOutcome {
            generation: ticket.generation,
            window,
            datasets,
            cursor,
        }
    }

    pub async fn poll(self, ticket: PollTicket) -> PollOutcome {
        let since = ticket.since;
        let fetches = ticket.keys.into_iter().map(|(entity, measurement)| {
            let source = self.data_source.clone();
            async move {
                let batch = source
                    .stream_series(&entity, &measurement, since)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!("Poll of {} for {} failed: {:#}", measurement, entity, e);
                        Series::new()
                    });
                ((entity, measurement), batch)
            }
        });

        PollOutcome {
            generation: ticket.generation,
            batches: futures::future::join_all(fetches).await,
        }
    }
}

pub struct ChartSurface<R: Renderer> {
    loader: SurfaceLoader,
    renderer: R,
    settings: SurfaceSettings,
    params: ChartParams,
    viewport: ViewportController,
    generation: u64,
    refresh_pending: bool,
    mounted: bool,
    datasets: Vec<Dataset>,
    window: Option<DateWindow>,
    notice: Option<FallbackNotice>,
    poll_cursor: Option<DateTime<Utc>>,
    handle: Option<RenderHandle>,
    gestures_rx: Option<mpsc::UnboundedReceiver<GestureEvent>>,
    in_flight: Vec<JoinHandle<()>>,
}

impl<R: Renderer + 'static> ChartSurface<R> {
    pub fn new(
        data_source: Arc<dyn DataSource>,
        resolver: DateRangeResolver,
        mut renderer: R,
        settings: SurfaceSettings,
        params: ChartParams,
    ) -> Self {
        let (gestures_tx, gestures_rx) = mpsc::unbounded_channel();

        for kind in [GestureKind::Zoom, GestureKind::Pan] {
            let tx = gestures_tx.clone();
            let callback = Box::new(move |axis: AxisId, min: f64, max: f64| {
                let _ = tx.send(GestureEvent { kind, axis, min, max });
            });
            match kind {
                GestureKind::Zoom => renderer.on_zoom_complete(callback),
                GestureKind::Pan => renderer.on_pan_complete(callback),
            }
        }

        let viewport = ViewportController::new(params.axis_config(&settings.axis), params.mode());
        let loader = SurfaceLoader {
            data_source,
            resolver,
            stream_backfill: settings.stream_backfill,
        };

        Self {
            loader,
            renderer,
            settings,
            params,
            viewport,
            generation: 0,
            refresh_pending: false,
            mounted: false,
            datasets: Vec::new(),
            window: None,
            notice: None,
            poll_cursor: None,
            handle: None,
            gestures_rx: Some(gestures_rx),
            in_flight: Vec::new(),
        }
    }

    pub fn loader(&self) -> SurfaceLoader {
        self.loader.clone()
    }

    /// Starts a new generation; anything issued under an older one is stale.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        self.refresh_pending = true;
        RefreshTicket {
            generation: self.generation,
            params: self.params.clone(),
        }
    }

    pub fn complete_refresh(&mut self, outcome: RefreshOutcome) -> Result<Completion, RenderError> {
        if !self.is_current(outcome.generation) {
            return Ok(Completion::Stale);
        }

        self.refresh_pending = false;
        self.window = outcome.window;
        self.notice = outcome.window.and_then(|w| w.fallback_notice());
        self.datasets = outcome.datasets;
        self.poll_cursor = outcome.cursor;

        let domain = match self.params.mode() {
            ChartMode::Static => self.window.map(|w| {
                ScaleRange::new(w.start.timestamp_millis() as f64, w.end.timestamp_millis() as f64)
            }),
            ChartMode::Streaming => None,
        };
        self.viewport.set_time_domain(domain);

        self.render()?;
        Ok(Completion::Applied)
    }

    /// Polls only while streaming, mounted and with no refresh outstanding;
    /// the datasets still describe the previous selection until it lands.
    pub fn begin_poll(&self) -> Option<PollTicket> {
        if !self.mounted || !self.params.streaming || self.refresh_pending {
            return None;
        }
        let since = self.poll_cursor?;
        let keys = self
            .datasets
            .iter()
            .map(|d| (d.entity_id.clone(), d.measurement.clone()))
            .collect();
        Some(PollTicket {
            generation: self.generation,
            since,
            keys,
        })
    }

    pub fn complete_poll(&mut self, outcome: PollOutcome) -> Result<Completion, RenderError> {
        if !self.is_current(outcome.generation) {
            return Ok(Completion::Stale);
        }

        let mut appended = 0;
        for ((entity, measurement), batch) in outcome.batches {
            let Some(dataset) = self
                .datasets
                .iter_mut()
                .find(|d| d.entity_id == entity && d.measurement == measurement)
            else {
                continue;
            };
            let before = dataset.series.len();
            dataset.series = merge_incoming(std::mem::take(&mut dataset.series), batch);
            appended += dataset.series.len() - before;
        }

        if let Some(newest) = newest_instant(&self.datasets) {
            self.poll_cursor = Some(self.poll_cursor.map_or(newest, |c| c.max(newest)));
        }

        if appended > 0 {
            tracing::debug!("Merged {} streamed points", appended);
            self.render()?;
        }
        Ok(Completion::Applied)
    }

    fn is_current(&self, generation: u64) -> bool {
        if !self.mounted || generation != self.generation {
            tracing::debug!(
                "Dropping stale result (generation {}, current {})",
                generation,
                self.generation
            );
            return false;
        }
        true
    }

    pub fn render(&mut self) -> Result<(), RenderError> {
        let mut options = self.viewport.on_data_changed(&self.datasets);
        options.notice = self.notice.clone();
        self.handle = Some(self.renderer.render(&self.datasets, &options)?);
        Ok(())
    }

    pub fn apply_gesture(&mut self, event: GestureEvent) -> bool {
        self.viewport
            .on_viewport_gesture_completed(event.axis, event.min, event.max)
    }

    pub fn apply_command(&mut self, command: SurfaceCommand) -> Result<CommandEffect, RenderError> {
        let effect = match command {
            SurfaceCommand::SetEntities(ids) => {
                self.params.entity_ids = ids;
                CommandEffect::Refresh
            }
            SurfaceCommand::SetMeasurements(measurements) => {
                self.params.measurements = measurements;
                self.viewport
                    .set_axis_config(self.params.axis_config(&self.settings.axis));
                CommandEffect::Refresh
            }
            SurfaceCommand::SetWindow(window) => {
                self.params.window_override = window;
                CommandEffect::Refresh
            }
            SurfaceCommand::SetResample(resample) => {
                self.params.resample = resample;
                CommandEffect::Refresh
            }
            SurfaceCommand::SetStreaming(streaming) => {
                if self.params.streaming == streaming {
                    CommandEffect::None
                } else {
                    self.params.streaming = streaming;
                    self.viewport.set_mode(self.params.mode());
                    self.poll_cursor = None;
                    CommandEffect::Refresh
                }
            }
            SurfaceCommand::ToggleZoom => {
                self.viewport.toggle_zoom();
                CommandEffect::Rerender
            }
            SurfaceCommand::TogglePan => {
                self.viewport.toggle_pan();
                CommandEffect::Rerender
            }
            SurfaceCommand::ResetView => {
                self.viewport.reset();
                if let Some(handle) = self.handle {
                    self.renderer.reset_view(handle)?;
                }
                CommandEffect::Rerender
            }
            SurfaceCommand::DismissNotice => {
                self.notice = None;
                CommandEffect::Rerender
            }
            SurfaceCommand::Export(reply) => {
                let image = self
                    .handle
                    .ok_or(RenderError::NothingRendered)
                    .and_then(|handle| self.renderer.export_image(handle));
                let _ = reply.send(image);
                CommandEffect::None
            }
            SurfaceCommand::Unmount => CommandEffect::Unmount,
        };
        Ok(effect)
    }

    /// Invalidates in-flight work and stops everything the surface started.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.generation += 1;
        self.poll_cursor = None;
        for task in self.in_flight.drain(..) {
            task.abort();
        }
        tracing::debug!("Chart surface unmounted");
    }

    fn spawn_task<F>(&mut self, results: &mpsc::UnboundedSender<TaskResult>, task: F)
    where
        F: std::future::Future<Output = TaskResult> + Send + 'static,
    {
        self.in_flight.retain(|handle| !handle.is_finished());
        let results = results.clone();
        self.in_flight.push(tokio::spawn(async move {
            let _ = results.send(task.await);
        }));
    }

    fn spawn_refresh(&mut self, results: &mpsc::UnboundedSender<TaskResult>) {
        let ticket = self.begin_refresh();
        let loader = self.loader();
        self.spawn_task(results, async move {
            TaskResult::Refresh(loader.load(ticket).await)
        });
    }

    /// Event loop for one mounted chart. Commands, gestures, fetch results and
    /// poll ticks are handled one at a time; returns after unmounting.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SurfaceCommand>) {
        let Some(mut gestures) = self.gestures_rx.take() else {
            return;
        };
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        self.mounted = true;
        self.spawn_refresh(&results_tx);

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll_pending = false;

        loop {
            let step = tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    match self.apply_command(command) {
                        Ok(CommandEffect::Unmount) => break,
                        Ok(CommandEffect::Refresh) => {
                            self.spawn_refresh(&results_tx);
                            Ok(())
                        }
                        Ok(CommandEffect::Rerender) => self.render(),
                        Ok(CommandEffect::None) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                Some(event) = gestures.recv() => {
                    self.apply_gesture(event);
                    Ok(())
                }
                Some(result) = results_rx.recv() => match result {
                    TaskResult::Refresh(outcome) => self.complete_refresh(outcome).map(|_| ()),
                    TaskResult::Poll(outcome) => {
                        poll_pending = false;
                        self.complete_poll(outcome).map(|_| ())
                    }
                },
                _ = ticker.tick(), if self.params.streaming && !poll_pending => {
                    if let Some(ticket) = self.begin_poll() {
                        poll_pending = true;
                        let loader = self.loader();
                        self.spawn_task(&results_tx, async move {
                            TaskResult::Poll(loader.poll(ticket).await)
                        });
                    }
                    Ok(())
                }
            };

            if let Err(e) = step {
                tracing::info!("Stopping chart surface: {}", e);
                break;
            }
        }

        self.unmount();
    }
}

impl<R: Renderer> Drop for ChartSurface<R> {
    fn drop(&mut self) {
        for task in self.in_flight.drain(..) {
            task.abort();
        }
    }
}

/// Direct drivers and accessors for exercising a surface without its event loop.
#[cfg(test)]
impl<R: Renderer + 'static> ChartSurface<R> {
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn window(&self) -> Option<DateWindow> {
        self.window
    }

    pub fn poll_cursor(&self) -> Option<DateTime<Utc>> {
        self.poll_cursor
    }

    pub async fn mount(&mut self) -> Result<Completion, RenderError> {
        self.mounted = true;
        self.refresh().await
    }

    pub async fn refresh(&mut self) -> Result<Completion, RenderError> {
        let ticket = self.begin_refresh();
        let outcome = self.loader().load(ticket).await;
        self.complete_refresh(outcome)
    }

    pub async fn poll(&mut self) -> Result<Completion, RenderError> {
        let Some(ticket) = self.begin_poll() else {
            return Ok(Completion::Stale);
        };
        let outcome = self.loader().poll(ticket).await;
        self.complete_poll(outcome)
    }

    /// Applies every gesture reported by the renderer since the last drain.
    pub fn drain_gestures(&mut self) -> usize {
        let mut events = Vec::new();
        if let Some(rx) = self.gestures_rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
            .into_iter()
            .filter(|event| self.apply_gesture(event.clone()))
            .count()
    }
}
