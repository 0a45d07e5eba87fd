use anyhow::Result;

use crate::detect::result::RelativeBox;
use crate::frame::Frame;

/// Face detector backend.
///
/// Implementations wrap a pretrained model. They receive RGB frames and report
/// faces as relative boxes, unordered, with detections under
/// [`CONFIDENCE_THRESHOLD`](super::CONFIDENCE_THRESHOLD) already dropped.
///
/// A detector instance is driven by one stream at a time (`&mut self`); the
/// trait only requires `Send` so it can move onto a request worker.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Model failures propagate unchanged.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RelativeBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RelativeBox>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
