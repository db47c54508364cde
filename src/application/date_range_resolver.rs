// Date range resolver - Picks the initial chart window from availability metadata
use crate::application::data_source::DataSource;
use crate::domain::date_window::DateWindow;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

pub const DEFAULT_WINDOW_DAYS: i64 = 14;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct DateRangeResolver {
    data_source: Arc<dyn DataSource>,
    span: TimeDelta,
    clock: Clock,
}

impl DateRangeResolver {
    pub fn new(data_source: Arc<dyn DataSource>) -> Self {
        Self {
            data_source,
            span: TimeDelta::days(DEFAULT_WINDOW_DAYS),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.span = TimeDelta::days(days.max(1));
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// The window ending now; used whenever availability cannot be trusted.
    pub fn default_window(&self) -> DateWindow {
        let now = self.now();
        DateWindow::new(now - self.span, now, false)
    }

    /// Never fails: transport errors and malformed timestamps fall back to
    /// the default window so the chart always renders.
    pub async fn resolve(&self, entity_ids: &[String]) -> DateWindow {
        if entity_ids.is_empty() {
            return self.default_window();
        }

        let availability = match self.data_source.get_availability(entity_ids).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Availability lookup failed for {:?}: {:#}", entity_ids, e);
                return self.default_window();
            }
        };

        let Some(latest) = availability.latest_instant() else {
            tracing::debug!(
                "No usable latest timestamp for {:?} (raw: {:?})",
                entity_ids,
                availability.latest
            );
            return self.default_window();
        };

        let candidate = latest - self.span;
        let start = match availability.earliest_instant() {
            Some(earliest) if candidate < earliest => earliest,
            _ => candidate,
        };

        if availability.has_recent_data {
            DateWindow::new(start, latest, false)
        } else {
            tracing::info!(
                "No recent data for {:?}; falling back to {} .. {}",
                entity_ids,
                start,
                latest
            );
            DateWindow::new(start, latest, true)
        }
    }
}
