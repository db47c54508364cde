// Application state for HTTP handlers
use crate::application::chart_surface::{MeasurementSpec, SurfaceCommand, SurfaceSettings};
use crate::application::data_source::DataSource;
use crate::application::date_range_resolver::DateRangeResolver;
use crate::infrastructure::frame_renderer::GestureInlet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};

pub struct AppState {
    pub data_source: Arc<dyn DataSource>,
    pub resolver: DateRangeResolver,
    pub settings: SurfaceSettings,
    pub measurements: HashMap<String, MeasurementSpec>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Resolves measurement names against the configured catalogue.
    pub fn measurement_specs(&self, names: &[String]) -> Result<Vec<MeasurementSpec>, String> {
        names
            .iter()
            .map(|name| {
                self.measurements
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("Unknown measurement: {}", name))
            })
            .collect()
    }
}

/// Handles for talking to one running chart surface.
#[derive(Clone)]
pub struct Session {
    pub commands: mpsc::Sender<SurfaceCommand>,
    pub gestures: GestureInlet,
}

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<u64, Session>>,
}

impl SessionRegistry {
    pub async fn insert(&self, session: Session) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.write().await.insert(id, session);
        id
    }

    pub async fn get(&self, id: u64) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
