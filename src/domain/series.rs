// Time series domain models and the incremental merger
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::axis::AxisId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// Ordered, timestamp-unique sequence of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_time_ms(&self) -> Option<i64> {
        self.points.first().map(|p| p.time_ms)
    }

    pub fn last_time_ms(&self) -> Option<i64> {
        self.points.last().map(|p| p.time_ms)
    }

    /// Finite values only; NaN and infinities never reach the axis aligner.
    pub fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value).filter(|v| v.is_finite())
    }
}

impl From<Vec<SeriesPoint>> for Series {
    fn from(points: Vec<SeriesPoint>) -> Self {
        Self::from_points(points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotPoint {
    pub x: f64,
    pub y: f64,
}

/// A named series bound to a display axis. `style` is passed to the renderer untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub entity_id: String,
    pub measurement: String,
    pub axis: AxisId,
    pub unit: Option<String>,
    pub style: serde_json::Value,
    pub series: Series,
}

impl Dataset {
    pub fn new(
        entity_id: String,
        measurement: String,
        axis: AxisId,
        unit: Option<String>,
        style: serde_json::Value,
        series: Series,
    ) -> Self {
        let name = format!("{} {}", entity_id, measurement);
        Self {
            name,
            entity_id,
            measurement,
            axis,
            unit,
            style,
            series,
        }
    }
}

/// Append `incoming` to `existing`, dropping every point whose timestamp is
/// already present. Ordering is kept only if `incoming` postdates `existing`;
/// streaming sources are expected to deliver increasing timestamps.
///
/// Returns `existing` untouched (same allocation) when nothing survives.
pub fn merge_incoming(existing: Series, incoming: Series) -> Series {
    if incoming.is_empty() {
        return existing;
    }

    let mut seen: HashSet<i64> = existing.points.iter().map(|p| p.time_ms).collect();
    let survivors: Vec<SeriesPoint> = incoming
        .points
        .into_iter()
        .filter(|p| seen.insert(p.time_ms))
        .collect();

    if survivors.is_empty() {
        return existing;
    }

    let mut merged = existing;
    merged.points.extend(survivors);
    merged
}

pub fn to_plottable_points(series: &Series) -> Vec<PlotPoint> {
    series
        .points
        .iter()
        .map(|p| PlotPoint {
            x: p.time_ms as f64,
            y: p.value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(times: &[i64]) -> Series {
        Series::from_points(times.iter().map(|&t| SeriesPoint::new(t, t as f64 * 0.5)).collect())
    }

    #[test]
    fn test_merge_appends_new_points() {
        let merged = merge_incoming(series(&[1, 2, 3]), series(&[4, 5]));
        let times: Vec<i64> = merged.points().iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_drops_duplicate_timestamps() {
        let merged = merge_incoming(series(&[1, 2, 3]), series(&[3, 4]));
        let times: Vec<i64> = merged.points().iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_merge_drops_duplicates_within_batch() {
        let incoming = Series::from_points(vec![
            SeriesPoint::new(7, 1.0),
            SeriesPoint::new(7, 2.0),
            SeriesPoint::new(8, 3.0),
        ]);
        let merged = merge_incoming(series(&[1]), incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.points()[1], SeriesPoint::new(7, 1.0));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = series(&[10, 20, 30]);
        let incoming = series(&[30, 40, 50]);

        let once = merge_incoming(existing.clone(), incoming.clone());
        let twice = merge_incoming(once.clone(), incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_noop_keeps_allocation() {
        let existing = series(&[1, 2, 3]);
        let ptr = existing.points().as_ptr();

        let merged = merge_incoming(existing, series(&[2, 3]));
        assert_eq!(merged.points().as_ptr(), ptr);

        let merged = merge_incoming(merged, Series::new());
        assert_eq!(merged.points().as_ptr(), ptr);
    }

    #[test]
    fn test_plottable_points_projection() {
        let points = to_plottable_points(&Series::from_points(vec![
            SeriesPoint::new(1_000, 2.5),
            SeriesPoint::new(2_000, f64::NAN),
        ]));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], PlotPoint { x: 1_000.0, y: 2.5 });
        assert!(points[1].y.is_nan());
    }
}
