// Renderer capability: draws frames and reports finished gestures
use crate::domain::axis::AxisId;
use crate::domain::series::Dataset;
use crate::domain::viewport::RenderOptions;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RenderHandle(pub u64);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target closed")]
    Closed,
    #[error("unknown render handle {0:?}")]
    UnknownHandle(RenderHandle),
    #[error("nothing has been rendered yet")]
    NothingRendered,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invoked with the axis and its final `(min, max)` once a gesture ends.
pub type GestureCallback = Box<dyn FnMut(AxisId, f64, f64) + Send>;

pub trait Renderer: Send {
    fn render(
        &mut self,
        datasets: &[Dataset],
        options: &RenderOptions,
    ) -> Result<RenderHandle, RenderError>;

    fn on_zoom_complete(&mut self, callback: GestureCallback);

    fn on_pan_complete(&mut self, callback: GestureCallback);

    fn reset_view(&mut self, handle: RenderHandle) -> Result<(), RenderError>;

    fn export_image(&self, handle: RenderHandle) -> Result<Vec<u8>, RenderError>;
}
