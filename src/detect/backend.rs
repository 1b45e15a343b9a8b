use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::RgbFrame;
use crate::params::DetectionParams;

/// Detection capability: runs a model on one frame and renders its boxes.
///
/// Implementations own whatever model state they need and are driven through
/// `&mut self`, so a shared instance must be wrapped in a mutex (see
/// [`ModelCache`](crate::detect::ModelCache)). Rendering belongs to the
/// backend; callers never draw boxes themselves.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// The returned `annotated` frame must have the input's dimensions and the
    /// boxes must already be filtered by `params.confidence` and suppressed at
    /// `params.overlap`.
    fn detect(&mut self, frame: &RgbFrame, params: &DetectionParams) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
