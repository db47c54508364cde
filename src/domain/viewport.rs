// Viewport state and the policy deciding what each render shows
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::axis::{AxisBounds, AxisConfig, AxisId, DEFAULT_PERCENTAGE_TICKS};
use super::axis::{align_dual, align_percentage_axis, align_single};
use super::date_window::FallbackNotice;
use super::series::Dataset;

/// Fraction of the visible span added around live data in streaming mode.
pub const STREAMING_GRACE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    Static,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportPhase {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureKind {
    Zoom,
    Pan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub kind: GestureKind,
    pub axis: AxisId,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
}

impl ScaleRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewportState {
    pub zoom_enabled: bool,
    pub pan_enabled: bool,
    pub scales: BTreeMap<AxisId, ScaleRange>,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom_enabled: false,
            pan_enabled: true,
            scales: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeSource {
    Aligned,
    Snapshot,
    AutoFit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    pub source: RangeSource,
}

impl AxisRange {
    fn aligned(bounds: AxisBounds) -> Self {
        Self {
            min: bounds.min,
            max: bounds.max,
            step: Some(bounds.step),
            source: RangeSource::Aligned,
        }
    }

    fn auto_fit(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: None,
            source: RangeSource::AutoFit,
        }
    }
}

/// Everything the renderer needs besides the datasets themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOptions {
    pub mode: ChartMode,
    pub axes: BTreeMap<AxisId, AxisRange>,
    pub zoom_enabled: bool,
    pub pan_enabled: bool,
    pub interactions_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<FallbackNotice>,
}

impl RenderOptions {
    pub fn axis(&self, axis: &str) -> Option<&AxisRange> {
        self.axes.get(&AxisId::new(axis))
    }
}

/// Inputs for one render besides the viewport.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub datasets: &'a [Dataset],
    /// Requested time window in epoch milliseconds; static charts span it.
    pub time_domain: Option<ScaleRange>,
    pub config: &'a AxisConfig,
    pub mode: ChartMode,
}

fn values_by_axis(datasets: &[Dataset]) -> BTreeMap<AxisId, Vec<f64>> {
    let mut grouped: BTreeMap<AxisId, Vec<f64>> = BTreeMap::new();
    for dataset in datasets.iter().filter(|d| !d.axis.is_time_axis()) {
        grouped
            .entry(dataset.axis.clone())
            .or_default()
            .extend(dataset.series.finite_values());
    }
    grouped
}

fn time_extent(datasets: &[Dataset]) -> Option<ScaleRange> {
    let first = datasets.iter().filter_map(|d| d.series.first_time_ms()).min()?;
    let last = datasets.iter().filter_map(|d| d.series.last_time_ms()).max()?;
    Some(ScaleRange::new(first as f64, last as f64))
}

fn live_tail_range(values: &[f64]) -> AxisRange {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        let bounds = align_single(&[], 1, 1.0, None);
        return AxisRange::auto_fit(bounds.min, bounds.max);
    }

    let span = max - min;
    let span = if span > 0.0 { span } else { max.abs().max(1.0) };
    let grace = span * STREAMING_GRACE;
    AxisRange::auto_fit(min - grace, max + grace)
}

fn aligned_y_axes(
    grouped: &BTreeMap<AxisId, Vec<f64>>,
    config: &AxisConfig,
) -> BTreeMap<AxisId, AxisRange> {
    let mut axes = BTreeMap::new();
    let left = AxisId::left();
    let right = AxisId::right();

    // Left/right pairs share a tick grid.
    if let (Some(lv), Some(rv)) = (grouped.get(&left), grouped.get(&right)) {
        if !config.is_percentage(&left) && !config.is_percentage(&right) {
            let dual = align_dual(lv, rv, config.tick_count, config.factor, config.min_floor);
            axes.insert(left.clone(), AxisRange::aligned(dual.left));
            axes.insert(right.clone(), AxisRange::aligned(dual.right));
        }
    }

    for (axis, values) in grouped {
        if axes.contains_key(axis) {
            continue;
        }
        let bounds = if config.is_percentage(axis) {
            align_percentage_axis(values, DEFAULT_PERCENTAGE_TICKS)
        } else {
            align_single(values, config.tick_count, config.factor, config.min_floor)
        };
        axes.insert(axis.clone(), AxisRange::aligned(bounds));
    }
    axes
}

/// Pure viewport policy: fresh bounds for the data, overridden by the stored
/// scales in static mode. Streaming renders ignore the stored scales.
pub fn compute_render_options(ctx: RenderContext<'_>, viewport: &ViewportState) -> RenderOptions {
    let grouped = values_by_axis(ctx.datasets);
    let mut axes = match ctx.mode {
        ChartMode::Static => aligned_y_axes(&grouped, ctx.config),
        ChartMode::Streaming => grouped
            .iter()
            .map(|(axis, values)| (axis.clone(), live_tail_range(values)))
            .collect(),
    };

    let time_range = match ctx.mode {
        ChartMode::Static => ctx.time_domain.or_else(|| time_extent(ctx.datasets)),
        ChartMode::Streaming => time_extent(ctx.datasets).or(ctx.time_domain),
    };
    if let Some(range) = time_range {
        axes.insert(AxisId::x(), AxisRange::auto_fit(range.min, range.max));
    }

    match ctx.mode {
        ChartMode::Static => {
            for (axis, scale) in &viewport.scales {
                if let Some(range) = axes.get_mut(axis) {
                    *range = AxisRange {
                        min: scale.min,
                        max: scale.max,
                        step: None,
                        source: RangeSource::Snapshot,
                    };
                }
            }
            RenderOptions {
                mode: ctx.mode,
                axes,
                zoom_enabled: viewport.zoom_enabled,
                pan_enabled: viewport.pan_enabled,
                interactions_enabled: true,
                notice: None,
            }
        }
        ChartMode::Streaming => RenderOptions {
            mode: ctx.mode,
            axes,
            zoom_enabled: false,
            pan_enabled: false,
            interactions_enabled: false,
            notice: None,
        },
    }
}

/// Owns one chart's zoom/pan state across refreshes and mode changes.
#[derive(Debug, Clone)]
pub struct ViewportController {
    phase: ViewportPhase,
    mode: ChartMode,
    config: AxisConfig,
    state: ViewportState,
    known_axes: BTreeSet<AxisId>,
    time_domain: Option<ScaleRange>,
}

impl ViewportController {
    pub fn new(config: AxisConfig, mode: ChartMode) -> Self {
        Self {
            phase: ViewportPhase::Idle,
            mode,
            config,
            state: ViewportState::default(),
            known_axes: BTreeSet::new(),
            time_domain: None,
        }
    }

    pub fn phase(&self) -> ViewportPhase {
        self.phase
    }

    pub fn mode(&self) -> ChartMode {
        self.mode
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn activate(&mut self) {
        if self.phase == ViewportPhase::Idle {
            tracing::debug!("Viewport activated in {:?} mode", self.mode);
            self.phase = ViewportPhase::Active;
        }
    }

    pub fn set_mode(&mut self, mode: ChartMode) {
        self.mode = mode;
    }

    pub fn set_axis_config(&mut self, config: AxisConfig) {
        self.config = config;
    }

    pub fn set_time_domain(&mut self, domain: Option<ScaleRange>) {
        self.time_domain = domain;
    }

    /// Box-zoom and pan exclude each other; switching one on switches the other off.
    pub fn set_zoom_enabled(&mut self, enabled: bool) {
        self.state.zoom_enabled = enabled;
        if enabled {
            self.state.pan_enabled = false;
        }
    }

    pub fn set_pan_enabled(&mut self, enabled: bool) {
        self.state.pan_enabled = enabled;
        if enabled {
            self.state.zoom_enabled = false;
        }
    }

    pub fn toggle_zoom(&mut self) {
        self.set_zoom_enabled(!self.state.zoom_enabled);
    }

    pub fn toggle_pan(&mut self) {
        self.set_pan_enabled(!self.state.pan_enabled);
    }

    pub fn reset(&mut self) {
        self.state = ViewportState::default();
    }

    pub fn on_data_changed(&mut self, datasets: &[Dataset]) -> RenderOptions {
        self.activate();
        self.known_axes = std::iter::once(AxisId::x())
            .chain(datasets.iter().map(|d| d.axis.clone()))
            .collect();

        let ctx = RenderContext {
            datasets,
            time_domain: self.time_domain,
            config: &self.config,
            mode: self.mode,
        };
        compute_render_options(ctx, &self.state)
    }

    /// Stores the finished zoom/pan window for one axis. Events for axes the
    /// chart no longer has, or arriving while streaming, are dropped.
    pub fn on_viewport_gesture_completed(&mut self, axis: AxisId, min: f64, max: f64) -> bool {
        if self.mode == ChartMode::Streaming {
            tracing::debug!("Ignoring gesture on {} while streaming", axis);
            return false;
        }
        if !self.known_axes.contains(&axis) {
            tracing::debug!("Ignoring gesture for unknown axis {}", axis);
            return false;
        }
        if !min.is_finite() || !max.is_finite() || min == max {
            tracing::debug!("Ignoring degenerate gesture range {}..{} on {}", min, max, axis);
            return false;
        }

        let range = ScaleRange::new(min.min(max), min.max(max));
        self.state.scales.insert(axis, range);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::{Series, SeriesPoint};
    use serde_json::Value;

    fn dataset(axis: &str, points: &[(i64, f64)]) -> Dataset {
        Dataset::new(
            "teros-1".to_string(),
            "temperature".to_string(),
            AxisId::new(axis),
            Some("C".to_string()),
            Value::Null,
            Series::from_points(points.iter().map(|&(t, v)| SeriesPoint::new(t, v)).collect()),
        )
    }

    fn sample() -> Vec<Dataset> {
        vec![
            dataset("left", &[(1_000, 3.0), (2_000, 7.3)]),
            dataset("right", &[(1_000, 120.0), (3_000, 400.0)]),
        ]
    }

    #[test]
    fn test_default_state_pans_without_zoom() {
        let controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        assert_eq!(controller.phase(), ViewportPhase::Idle);
        assert!(controller.state().pan_enabled);
        assert!(!controller.state().zoom_enabled);
    }

    #[test]
    fn test_zoom_and_pan_are_exclusive() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.toggle_zoom();
        assert!(controller.state().zoom_enabled);
        assert!(!controller.state().pan_enabled);

        controller.toggle_pan();
        assert!(controller.state().pan_enabled);
        assert!(!controller.state().zoom_enabled);

        controller.set_pan_enabled(false);
        assert!(!controller.state().pan_enabled && !controller.state().zoom_enabled);
    }

    #[test]
    fn test_fresh_render_uses_aligned_bounds() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        let options = controller.on_data_changed(&sample());

        assert_eq!(controller.phase(), ViewportPhase::Active);
        let left = options.axis("left").unwrap();
        assert_eq!(left.source, RangeSource::Aligned);
        assert!((left.max - 8.0).abs() < 1e-9);
        assert_eq!(options.axis("right").unwrap().max, 400.0);

        let x = options.axis("x").unwrap();
        assert_eq!((x.min, x.max), (1_000.0, 3_000.0));
        assert!(options.interactions_enabled);
    }

    #[test]
    fn test_snapshot_survives_data_refresh() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.on_data_changed(&sample());

        assert!(controller.on_viewport_gesture_completed(AxisId::x(), 100.0, 200.0));

        let mut refreshed = sample();
        refreshed[0] = dataset("left", &[(1_000, 3.0), (2_000, 7.3), (9_000, 30.0)]);
        let options = controller.on_data_changed(&refreshed);

        let x = options.axis("x").unwrap();
        assert_eq!((x.min, x.max), (100.0, 200.0));
        assert_eq!(x.source, RangeSource::Snapshot);
        // untouched axes still follow the data
        assert_eq!(options.axis("left").unwrap().source, RangeSource::Aligned);
    }

    #[test]
    fn test_gesture_replaces_only_its_axis() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.on_data_changed(&sample());

        controller.on_viewport_gesture_completed(AxisId::x(), 100.0, 200.0);
        controller.on_viewport_gesture_completed(AxisId::left(), 6.0, 2.0);
        controller.on_viewport_gesture_completed(AxisId::x(), 150.0, 250.0);

        let scales = &controller.state().scales;
        assert_eq!(scales[&AxisId::x()], ScaleRange::new(150.0, 250.0));
        assert_eq!(scales[&AxisId::left()], ScaleRange::new(2.0, 6.0));
    }

    #[test]
    fn test_gesture_for_unknown_axis_is_dropped() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.on_data_changed(&sample());

        assert!(!controller.on_viewport_gesture_completed(AxisId::new("humidity"), 1.0, 2.0));
        assert!(!controller.on_viewport_gesture_completed(AxisId::x(), f64::NAN, 2.0));
        assert!(controller.state().scales.is_empty());
    }

    #[test]
    fn test_reset_clears_snapshot_and_flags() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.on_data_changed(&sample());
        controller.toggle_zoom();
        controller.on_viewport_gesture_completed(AxisId::x(), 100.0, 200.0);

        controller.reset();
        assert_eq!(controller.state(), &ViewportState::default());

        let options = controller.on_data_changed(&sample());
        assert_eq!(options.axis("x").unwrap().source, RangeSource::AutoFit);
    }

    #[test]
    fn test_streaming_ignores_stored_snapshot() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.on_data_changed(&sample());
        controller.on_viewport_gesture_completed(AxisId::x(), 100.0, 200.0);

        controller.set_mode(ChartMode::Streaming);
        let options = controller.on_data_changed(&sample());

        let x = options.axis("x").unwrap();
        assert_eq!((x.min, x.max), (1_000.0, 3_000.0));
        assert_eq!(x.source, RangeSource::AutoFit);
        assert!(!options.interactions_enabled && !options.zoom_enabled && !options.pan_enabled);

        // streaming neither reads nor writes the snapshot
        assert!(!controller.on_viewport_gesture_completed(AxisId::x(), 5.0, 6.0));
        assert_eq!(controller.state().scales[&AxisId::x()], ScaleRange::new(100.0, 200.0));
    }

    #[test]
    fn test_streaming_auto_fit_has_grace_margin() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Streaming);
        let options = controller.on_data_changed(&[dataset("left", &[(1, 10.0), (2, 20.0)])]);

        let left = options.axis("left").unwrap();
        assert!((left.min - 9.5).abs() < 1e-9);
        assert!((left.max - 20.5).abs() < 1e-9);
        assert_eq!(left.step, None);
    }

    #[test]
    fn test_static_chart_spans_requested_window() {
        let mut controller = ViewportController::new(AxisConfig::default(), ChartMode::Static);
        controller.set_time_domain(Some(ScaleRange::new(0.0, 10_000.0)));
        let options = controller.on_data_changed(&[dataset("left", &[])]);

        let x = options.axis("x").unwrap();
        assert_eq!((x.min, x.max), (0.0, 10_000.0));
        assert_eq!(options.axis("left").unwrap().max, 10.0);
    }

    #[test]
    fn test_percentage_axis_uses_band() {
        let mut config = AxisConfig::default();
        config.percentage_axes.insert(AxisId::left());
        let mut controller = ViewportController::new(config, ChartMode::Static);

        let options = controller.on_data_changed(&[
            dataset("left", &[(1, 22.0), (2, 61.4)]),
            dataset("right", &[(1, 5.0)]),
        ]);
        let left = options.axis("left").unwrap();
        assert_eq!((left.min, left.max, left.step), (0.0, 64.0, Some(7.0)));
        // 5.0 rises to the next multiple of 8 * 0.2
        assert!((options.axis("right").unwrap().max - 6.4).abs() < 1e-9);
    }
}
