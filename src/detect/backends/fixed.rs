use anyhow::Result;

use crate::detect::backend::FaceDetector;
use crate::detect::result::RelativeBox;
use crate::frame::Frame;

/// Backend that reports the same boxes on every frame.
///
/// With no boxes it is a pass-through detector (`none`); with boxes it blurs
/// fixed regions, which is handy for privacy masks and for tests.
#[derive(Clone, Debug, Default)]
pub struct FixedBackend {
    boxes: Vec<RelativeBox>,
    calls: u64,
}

impl FixedBackend {
    pub fn new(boxes: Vec<RelativeBox>) -> Self {
        Self { boxes, calls: 0 }
    }

    /// Backend that never finds a face.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of frames seen so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceDetector for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RelativeBox>> {
        self.calls += 1;
        Ok(self.boxes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backend_repeats_boxes() -> Result<()> {
        let boxes = vec![RelativeBox::new(0.1, 0.2, 0.3, 0.4)];
        let mut backend = FixedBackend::new(boxes.clone());
        let frame = Frame::filled(8, 8, [0, 0, 0]);

        assert_eq!(backend.detect(&frame)?, boxes);
        assert_eq!(backend.detect(&frame)?, boxes);
        assert_eq!(backend.calls(), 2);
        Ok(())
    }

    #[test]
    fn empty_backend_finds_nothing() -> Result<()> {
        let mut backend = FixedBackend::empty();
        assert!(backend.detect(&Frame::filled(2, 2, [9, 9, 9]))?.is_empty());
        Ok(())
    }
}
