#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::FaceDetector;
use crate::detect::result::RelativeBox;
use crate::detect::CONFIDENCE_THRESHOLD;
use crate::frame::Frame;

/// Model input size for the RFB-320 variant.
pub const INPUT_WIDTH: u32 = 320;
pub const INPUT_HEIGHT: u32 = 240;

const NMS_IOU_THRESHOLD: f32 = 0.3;

/// Ultra-Light-Fast-Generic-Face-Detector (UltraFace) run through tract.
///
/// The model emits `scores` (`[1, N, 2]`, background/face) and `boxes`
/// (`[1, N, 4]`, relative corner coordinates). Boxes are thresholded and
/// reduced with greedy non-maximum suppression.
pub struct UltraFaceBackend {
    model: TypedRunnableModel<TypedModel>,
    confidence_threshold: f32,
}

impl UltraFaceBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            confidence_threshold: CONFIDENCE_THRESHOLD,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!(
                "cannot run detection on empty {}x{} frame",
                frame.width(),
                frame.height()
            ));
        }
        let resized = image::imageops::resize(
            &frame.to_rgb_image(),
            INPUT_WIDTH,
            INPUT_HEIGHT,
            FilterType::Triangle,
        );

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
            |(_, channel, y, x)| {
                let p = resized.get_pixel(x as u32, y as u32)[channel];
                (p as f32 - 127.0) / 128.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_boxes(&self, outputs: TVec<TValue>) -> Result<Vec<RelativeBox>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;
        let boxes = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;

        let (score_rows, box_rows) = (scores.len() / 2, boxes.len() / 4);
        let scores = scores
            .into_shape((score_rows, 2))
            .context("unexpected score tensor shape")?;
        let boxes = boxes
            .into_shape((box_rows, 4))
            .context("unexpected box tensor shape")?;
        if scores.nrows() != boxes.nrows() {
            return Err(anyhow!(
                "model produced {} scores for {} boxes",
                scores.nrows(),
                boxes.nrows()
            ));
        }

        let candidates = scores
            .outer_iter()
            .zip(boxes.outer_iter())
            .filter(|(score, _)| score[1] >= self.confidence_threshold)
            .map(|(score, b)| RelativeBox::from_corners(b[0], b[1], b[2], b[3]).with_score(score[1]))
            .collect();

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl FaceDetector for UltraFaceBackend {
    fn name(&self) -> &'static str {
        "ultraface"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RelativeBox>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.detect(&Frame::filled(INPUT_WIDTH, INPUT_HEIGHT, [0, 0, 0]))
            .map(|_| ())
    }
}

/// Greedy NMS: keep the best-scoring box, drop everything overlapping it.
pub(crate) fn non_max_suppression(mut boxes: Vec<RelativeBox>, iou: f32) -> Vec<RelativeBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RelativeBox> = Vec::with_capacity(boxes.len().min(16));
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_highest_scoring_overlap() {
        let boxes = vec![
            RelativeBox::new(0.10, 0.10, 0.20, 0.20).with_score(0.6),
            RelativeBox::new(0.11, 0.11, 0.20, 0.20).with_score(0.9),
            RelativeBox::new(0.60, 0.60, 0.10, 0.10).with_score(0.7),
        ];
        let kept = non_max_suppression(boxes, NMS_IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn missing_model_fails_to_load() {
        assert!(UltraFaceBackend::new("/nonexistent/ultraface.onnx").is_err());
    }
}
