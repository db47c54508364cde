// Renderer that ships chart frames to a streaming HTTP client
use crate::application::renderer::{GestureCallback, RenderError, RenderHandle, Renderer};
use crate::domain::axis::AxisId;
use crate::domain::series::{Dataset, PlotPoint, to_plottable_points};
use crate::domain::viewport::{GestureKind, RenderOptions};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameDataset {
    pub name: String,
    pub entity_id: String,
    pub measurement: String,
    pub axis: AxisId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub style: serde_json::Value,
    pub points: Vec<PlotPoint>,
}

impl From<&Dataset> for FrameDataset {
    fn from(dataset: &Dataset) -> Self {
        Self {
            name: dataset.name.clone(),
            entity_id: dataset.entity_id.clone(),
            measurement: dataset.measurement.clone(),
            axis: dataset.axis.clone(),
            unit: dataset.unit.clone(),
            style: dataset.style.clone(),
            points: to_plottable_points(&dataset.series),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFrame {
    pub handle: RenderHandle,
    pub datasets: Vec<FrameDataset>,
    pub options: RenderOptions,
}

/// Messages written to the chunked chart stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Session { session_id: u64 },
    Frame(ChartFrame),
    ResetView { handle: RenderHandle },
}

#[derive(Default)]
struct GestureCallbacks {
    zoom: Option<GestureCallback>,
    pan: Option<GestureCallback>,
}

/// Entry point for gestures finished on the client side.
#[derive(Clone)]
pub struct GestureInlet {
    callbacks: Arc<Mutex<GestureCallbacks>>,
}

impl GestureInlet {
    /// Returns false when no callback is registered for the gesture kind.
    pub fn dispatch(&self, kind: GestureKind, axis: AxisId, min: f64, max: f64) -> bool {
        let Ok(mut callbacks) = self.callbacks.lock() else {
            return false;
        };
        let callback = match kind {
            GestureKind::Zoom => callbacks.zoom.as_mut(),
            GestureKind::Pan => callbacks.pan.as_mut(),
        };
        match callback {
            Some(callback) => {
                callback(axis, min, max);
                true
            }
            None => false,
        }
    }
}

pub struct FrameRenderer {
    tx: mpsc::Sender<StreamMessage>,
    callbacks: Arc<Mutex<GestureCallbacks>>,
    next_handle: u64,
    last_frame: Option<ChartFrame>,
}

impl FrameRenderer {
    pub fn new(tx: mpsc::Sender<StreamMessage>) -> (Self, GestureInlet) {
        let callbacks = Arc::new(Mutex::new(GestureCallbacks::default()));
        let inlet = GestureInlet {
            callbacks: callbacks.clone(),
        };
        let renderer = Self {
            tx,
            callbacks,
            next_handle: 0,
            last_frame: None,
        };
        (renderer, inlet)
    }

    fn send(&self, message: StreamMessage) -> Result<(), RenderError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(RenderError::Closed),
            Err(TrySendError::Full(_)) => {
                // Slow client; the next frame supersedes this one.
                tracing::warn!("Chart stream is backed up, skipping message");
                Ok(())
            }
        }
    }

    fn set_callback(&mut self, kind: GestureKind, callback: GestureCallback) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            match kind {
                GestureKind::Zoom => callbacks.zoom = Some(callback),
                GestureKind::Pan => callbacks.pan = Some(callback),
            }
        }
    }
}

impl Renderer for FrameRenderer {
    fn render(
        &mut self,
        datasets: &[Dataset],
        options: &RenderOptions,
    ) -> Result<RenderHandle, RenderError> {
        self.next_handle += 1;
        let frame = ChartFrame {
            handle: RenderHandle(self.next_handle),
            datasets: datasets.iter().map(FrameDataset::from).collect(),
            options: options.clone(),
        };
        let handle = frame.handle;

        tracing::debug!(
            "Rendering frame {} with {} datasets",
            handle.0,
            frame.datasets.len()
        );
        self.send(StreamMessage::Frame(frame.clone()))?;
        self.last_frame = Some(frame);
        Ok(handle)
    }

    fn on_zoom_complete(&mut self, callback: GestureCallback) {
        self.set_callback(GestureKind::Zoom, callback);
    }

    fn on_pan_complete(&mut self, callback: GestureCallback) {
        self.set_callback(GestureKind::Pan, callback);
    }

    fn reset_view(&mut self, handle: RenderHandle) -> Result<(), RenderError> {
        self.send(StreamMessage::ResetView { handle })
    }

    /// The "image" is the last frame encoded as JSON; clients draw it themselves.
    fn export_image(&self, handle: RenderHandle) -> Result<Vec<u8>, RenderError> {
        let frame = self.last_frame.as_ref().ok_or(RenderError::NothingRendered)?;
        if frame.handle != handle {
            return Err(RenderError::UnknownHandle(handle));
        }
        Ok(serde_json::to_vec(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::{Series, SeriesPoint};
    use crate::domain::viewport::ChartMode;
    use std::collections::BTreeMap;

    fn options() -> RenderOptions {
        RenderOptions {
            mode: ChartMode::Static,
            axes: BTreeMap::new(),
            zoom_enabled: false,
            pan_enabled: true,
            interactions_enabled: true,
            notice: None,
        }
    }

    fn dataset() -> Dataset {
        Dataset::new(
            "teros-1".to_string(),
            "vwc".to_string(),
            AxisId::left(),
            Some("%".to_string()),
            serde_json::Value::Null,
            Series::from_points(vec![SeriesPoint::new(1_000, 21.5)]),
        )
    }

    #[tokio::test]
    async fn test_render_sends_frames_with_increasing_handles() {
        let (tx, mut rx) = mpsc::channel(8);
        let (mut renderer, _inlet) = FrameRenderer::new(tx);

        let first = renderer.render(&[dataset()], &options()).unwrap();
        let second = renderer.render(&[dataset()], &options()).unwrap();
        assert!(second.0 > first.0);

        let Some(StreamMessage::Frame(frame)) = rx.recv().await else {
            panic!("expected a frame");
        };
        assert_eq!(frame.handle, first);
        assert_eq!(frame.datasets[0].name, "teros-1 vwc");
        assert_eq!(frame.datasets[0].points, vec![PlotPoint { x: 1_000.0, y: 21.5 }]);
    }

    #[test]
    fn test_frame_json_shape() {
        let (tx, _rx) = mpsc::channel(8);
        let (mut renderer, _inlet) = FrameRenderer::new(tx);
        let handle = renderer.render(&[dataset()], &options()).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&renderer.export_image(handle).unwrap()).unwrap();
        assert_eq!(json["handle"], 1);
        assert_eq!(json["datasets"][0]["unit"], "%");
        assert!(json["datasets"][0].get("style").is_none());
        assert_eq!(json["options"]["mode"], "static");

        let message = serde_json::to_value(StreamMessage::ResetView { handle }).unwrap();
        assert_eq!(message, serde_json::json!({"type": "reset_view", "handle": 1}));
    }

    #[test]
    fn test_closed_stream_reports_closed() {
        let (tx, rx) = mpsc::channel(8);
        let (mut renderer, _inlet) = FrameRenderer::new(tx);
        drop(rx);

        assert!(matches!(
            renderer.render(&[], &options()),
            Err(RenderError::Closed)
        ));
        assert!(matches!(
            renderer.reset_view(RenderHandle(1)),
            Err(RenderError::Closed)
        ));
    }

    #[test]
    fn test_full_stream_skips_frame() {
        let (tx, _rx) = mpsc::channel(1);
        let (mut renderer, _inlet) = FrameRenderer::new(tx);

        renderer.render(&[], &options()).unwrap();
        let handle = renderer.render(&[], &options()).unwrap();
        assert!(renderer.export_image(handle).is_ok());
    }

    #[test]
    fn test_export_errors() {
        let (tx, _rx) = mpsc::channel(8);
        let (mut renderer, _inlet) = FrameRenderer::new(tx);
        assert!(matches!(
            renderer.export_image(RenderHandle(1)),
            Err(RenderError::NothingRendered)
        ));

        renderer.render(&[], &options()).unwrap();
        assert!(matches!(
            renderer.export_image(RenderHandle(7)),
            Err(RenderError::UnknownHandle(RenderHandle(7)))
        ));
    }

    #[test]
    fn test_inlet_dispatches_to_registered_callbacks() {
        let (tx, _rx) = mpsc::channel(8);
        let (mut renderer, inlet) = FrameRenderer::new(tx);
        assert!(!inlet.dispatch(GestureKind::Zoom, AxisId::left(), 0.0, 1.0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        renderer.on_zoom_complete(Box::new(move |axis, min, max| {
            sink.lock().unwrap().push((axis, min, max));
        }));

        assert!(inlet.dispatch(GestureKind::Zoom, AxisId::left(), 2.0, 8.0));
        assert!(!inlet.dispatch(GestureKind::Pan, AxisId::left(), 2.0, 8.0));
        assert_eq!(*seen.lock().unwrap(), vec![(AxisId::left(), 2.0, 8.0)]);
    }
}
