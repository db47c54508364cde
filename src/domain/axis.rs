// Axis identifiers and tick-aligned bounds
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Bounds used when an axis has nothing to show.
pub const DEFAULT_AXIS_MAX: f64 = 10.0;
pub const DEFAULT_AXIS_STEP: f64 = 2.0;

/// Volumetric water content and similar quantities live in a 0-50 band.
pub const PERCENTAGE_BAND_MAX: f64 = 50.0;
pub const PERCENTAGE_BAND_STEP: f64 = 5.0;
pub const DEFAULT_PERCENTAGE_TICKS: usize = 10;

// Absorbs float noise when the raised maximum is already a multiple of the unit.
const ALIGN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(String);

impl AxisId {
    pub const X: &'static str = "x";
    pub const LEFT: &'static str = "left";
    pub const RIGHT: &'static str = "right";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn x() -> Self {
        Self::new(Self::X)
    }

    pub fn left() -> Self {
        Self::new(Self::LEFT)
    }

    pub fn right() -> Self {
        Self::new(Self::RIGHT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_time_axis(&self) -> bool {
        self.0 == Self::X
    }
}

impl From<&str> for AxisId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl AxisBounds {
    fn fallback(min: f64) -> Self {
        Self {
            min,
            max: min + DEFAULT_AXIS_MAX,
            step: DEFAULT_AXIS_STEP,
        }
    }

    pub fn percentage_default() -> Self {
        Self {
            min: 0.0,
            max: PERCENTAGE_BAND_MAX,
            step: PERCENTAGE_BAND_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DualAxisBounds {
    pub left: AxisBounds,
    pub right: AxisBounds,
}

/// Per-chart tuning for the aligner. `factor` is a tunable constant; not every
/// factor/tick combination yields human-friendly labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub tick_count: usize,
    pub factor: f64,
    pub min_floor: Option<f64>,
    pub percentage_axes: BTreeSet<AxisId>,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            tick_count: 8,
            factor: 0.2,
            min_floor: None,
            percentage_axes: BTreeSet::new(),
        }
    }
}

impl AxisConfig {
    pub fn is_percentage(&self, axis: &AxisId) -> bool {
        self.percentage_axes.contains(axis)
    }
}

fn finite_max(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

/// Raise the observed maximum to the next multiple of `tick_count * factor`
/// and split the axis into `tick_count` steps from `min_floor` (or zero).
pub fn align_single(
    values: &[f64],
    tick_count: usize,
    factor: f64,
    min_floor: Option<f64>,
) -> AxisBounds {
    let min = min_floor.filter(|m| m.is_finite()).unwrap_or(0.0);
    let Some(observed_max) = finite_max(values) else {
        return AxisBounds::fallback(min);
    };

    let ticks = tick_count.max(1) as f64;
    let factor = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
    let unit = ticks * factor;

    let max = if observed_max % ticks == 0.0 {
        observed_max
    } else {
        let raised = observed_max + (unit - observed_max.rem_euclid(unit));
        ((raised / unit) - ALIGN_EPSILON).ceil() * unit
    };
    let step = (max / ticks).abs();

    if !max.is_finite() || max <= min || step <= 0.0 {
        return AxisBounds::fallback(min);
    }

    AxisBounds { min, max, step }
}

/// Left and right axes scale independently but share the tick count, so
/// gridlines land on the same rows.
pub fn align_dual(
    left: &[f64],
    right: &[f64],
    tick_count: usize,
    factor: f64,
    min_floor: Option<f64>,
) -> DualAxisBounds {
    DualAxisBounds {
        left: align_single(left, tick_count, factor, min_floor),
        right: align_single(right, tick_count, factor, min_floor),
    }
}

pub fn align_percentage_axis(values: &[f64], tick_count: usize) -> AxisBounds {
    match finite_max(values) {
        Some(observed_max) if observed_max > PERCENTAGE_BAND_MAX => {
            let headroom = (observed_max * 0.03).max(1.0);
            let max = (observed_max + headroom).ceil();
            let step = (max / tick_count.max(1) as f64).ceil().max(1.0);
            AxisBounds { min: 0.0, max, step }
        }
        _ => AxisBounds::percentage_default(),
    }
}
