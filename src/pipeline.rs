//! Frame processing pipeline.
//!
//! Every source (image, video file, camera) hands one RGB frame at a time to
//! the same steps: detect faces, blur them in place, pass the frame on. The
//! helpers here wire a source, a detector and a sink together and own the
//! cleanup of partially written output.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::anonymize::anonymize;
use crate::detect::FaceDetector;
use crate::frame::Frame;
use crate::ingest::{load_image, VideoConfig, VideoSource};
use crate::sink::{save_image, FrameSink, VideoWriter};

/// Detect faces in `frame` and blur them. Returns the number of detections.
pub fn anonymize_frame(frame: &mut Frame, detector: &mut dyn FaceDetector) -> Result<usize> {
    let boxes = detector
        .detect(frame)
        .with_context(|| format!("face detection ({})", detector.name()))?;
    anonymize(frame, &boxes);
    Ok(boxes.len())
}

/// Load an image, anonymize it and write the result. Returns the number of
/// detections.
pub fn process_image_file(
    input: &Path,
    output: &Path,
    detector: &mut dyn FaceDetector,
) -> Result<usize> {
    let mut frame = load_image(input)?;
    let faces = anonymize_frame(&mut frame, detector)?;
    save_image(&frame, output)?;
    log::info!(
        "anonymized {} -> {} ({} faces)",
        input.display(),
        output.display(),
        faces
    );
    Ok(faces)
}

/// Summary of a processed video.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VideoReport {
    pub frames: u64,
    pub faces: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// The frame callback asked to stop before the source ran out.
    pub stopped_early: bool,
}

/// Feed every frame of `source` through the detector into `sink`, then
/// finish the sink.
///
/// `on_frame` sees the running frame count and each anonymized frame once it
/// has been written; returning `Break` ends the run early and the sink is
/// finished with the frames written so far. The first failing frame aborts
/// the run and leaves the sink unfinished.
pub fn run_video<I, S>(
    source: I,
    sink: &mut S,
    detector: &mut dyn FaceDetector,
    mut on_frame: impl FnMut(u64, &Frame) -> ControlFlow<()>,
) -> Result<VideoReport>
where
    I: IntoIterator<Item = Result<Frame>>,
    S: FrameSink + ?Sized,
{
    let mut report = VideoReport::default();
    for frame in source {
        let mut frame = frame.with_context(|| format!("decode frame {}", report.frames))?;
        if report.frames == 0 {
            report.width = frame.width();
            report.height = frame.height();
        }
        report.faces += anonymize_frame(&mut frame, detector)? as u64;
        sink.write_frame(&frame)
            .with_context(|| format!("write frame {}", report.frames))?;
        report.frames += 1;
        if on_frame(report.frames, &frame).is_break() {
            log::info!("video run stopped after {} frames", report.frames);
            report.stopped_early = true;
            break;
        }
    }
    sink.finish()?;
    Ok(report)
}

/// Anonymize a local video file into a new MP4 at `output`.
///
/// The output keeps the source frame rate and dimensions. On any failure the
/// partially written output is removed; a run stopped by `on_frame` keeps the
/// frames written so far.
pub fn transcode_file(
    input: &Path,
    output: &Path,
    detector: &mut dyn FaceDetector,
    on_frame: impl FnMut(u64, &Frame) -> ControlFlow<()>,
) -> Result<VideoReport> {
    let source = VideoSource::open(VideoConfig::new(input.to_string_lossy()))?;
    let (width, height, fps) = (source.width(), source.height(), source.fps());

    let guard = OutputGuard::new(output);
    let mut writer = VideoWriter::create(output, width, height, fps)?;
    let mut report = run_video(source, &mut writer, detector, on_frame)?;
    guard.keep();

    report.fps = fps;
    log::info!(
        "anonymized {} -> {} ({} frames, {} faces)",
        input.display(),
        output.display(),
        report.frames,
        report.faces
    );
    Ok(report)
}

/// Removes the file at `path` on drop unless `keep` was called.
pub struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::warn!("removed partial output {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::error!(
                "failed to remove partial output {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{FixedBackend, RelativeBox};
    use crate::error::{kind_of, Error, ErrorKind};
    use anyhow::anyhow;

    #[derive(Default)]
    struct VecSink {
        frames: Vec<Frame>,
        finished: bool,
    }

    impl FrameSink for VecSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    struct FailOnCall {
        remaining: usize,
    }

    impl FaceDetector for FailOnCall {
        fn name(&self) -> &'static str {
            "fail-on-call"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RelativeBox>> {
            if self.remaining == 0 {
                return Err(anyhow!("inference failed"));
            }
            self.remaining -= 1;
            Ok(Vec::new())
        }
    }

    fn keep_going(_: u64, _: &Frame) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn checkerboard(width: u32, height: u32) -> Frame {
        let mut frame = Frame::filled(width, height, [0, 0, 0]);
        for y in 0..height {
            for x in 0..width {
                if (x + y) % 2 == 0 {
                    frame.set_pixel(x, y, [255, 255, 255]);
                }
            }
        }
        frame
    }

    #[test]
    fn anonymize_frame_counts_detections() -> Result<()> {
        let mut frame = checkerboard(30, 30);
        let original = frame.clone();
        let mut detector = FixedBackend::new(vec![
            RelativeBox::new(0.0, 0.0, 0.5, 0.5),
            RelativeBox::new(0.5, 0.5, 0.5, 0.5),
        ]);
        assert_eq!(anonymize_frame(&mut frame, &mut detector)?, 2);
        assert_ne!(frame, original);
        Ok(())
    }

    #[test]
    fn no_faces_leaves_image_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        let frame = checkerboard(20, 12);
        save_image(&frame, &input)?;

        let faces = process_image_file(&input, &output, &mut FixedBackend::empty())?;
        assert_eq!(faces, 0);
        assert_eq!(load_image(&output)?, frame);
        Ok(())
    }

    #[test]
    fn missing_image_is_a_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = process_image_file(
            &dir.path().join("absent.jpg"),
            &dir.path().join("out.jpg"),
            &mut FixedBackend::empty(),
        )
        .unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::Decode);
        assert!(!dir.path().join("out.jpg").exists());
    }

    #[test]
    fn run_video_processes_every_frame_in_order() -> Result<()> {
        let frames: Vec<Result<Frame>> = (0..4u8)
            .map(|i| Ok(Frame::filled(8, 6, [i, i, i])))
            .collect();
        let mut sink = VecSink::default();
        let mut seen = Vec::new();
        let report = run_video(frames, &mut sink, &mut FixedBackend::empty(), |n, _| {
            seen.push(n);
            ControlFlow::Continue(())
        })?;

        assert_eq!(report.frames, 4);
        assert_eq!((report.width, report.height), (8, 6));
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(sink.finished);
        let shades: Vec<u8> = sink.frames.iter().map(|f| f.pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn run_video_break_finishes_with_frames_so_far() -> Result<()> {
        let frames: Vec<Result<Frame>> = (0..10u8)
            .map(|i| Ok(Frame::filled(6, 6, [i, 0, 0])))
            .collect();
        let mut sink = VecSink::default();
        let mut detector = FixedBackend::new(vec![RelativeBox::new(0.0, 0.0, 1.0, 1.0)]);
        let mut shown = Vec::new();
        let report = run_video(frames, &mut sink, &mut detector, |n, frame| {
            shown.push(frame.pixel(0, 0)[0]);
            if n == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        assert_eq!(report.frames, 3);
        assert!(report.stopped_early);
        assert_eq!(shown, vec![0, 1, 2]);
        assert_eq!(sink.frames.len(), 3);
        assert!(sink.finished);
        assert_eq!(detector.calls(), 3);
        Ok(())
    }

    #[test]
    fn run_video_stops_at_first_detector_failure() {
        let frames: Vec<Result<Frame>> =
            (0..5).map(|_| Ok(Frame::filled(4, 4, [9, 9, 9]))).collect();
        let mut sink = VecSink::default();
        let err = run_video(frames, &mut sink, &mut FailOnCall { remaining: 2 }, keep_going)
            .unwrap_err();
        assert!(format!("{err:#}").contains("inference failed"));
        assert_eq!(sink.frames.len(), 2);
        assert!(!sink.finished);
    }

    #[test]
    fn run_video_propagates_decode_errors() {
        let frames: Vec<Result<Frame>> = vec![
            Ok(Frame::filled(4, 4, [0, 0, 0])),
            Err(Error::Processing("corrupt packet".into()).into()),
        ];
        let mut sink = VecSink::default();
        let err = run_video(frames, &mut sink, &mut FixedBackend::empty(), keep_going).unwrap_err();
        assert!(format!("{err:#}").contains("decode frame 1"));
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn run_video_over_synthetic_clip() -> Result<()> {
        let source = VideoSource::open(VideoConfig::new("stub://clip"))?;
        let mut sink = VecSink::default();
        let mut detector = FixedBackend::new(vec![RelativeBox::new(0.25, 0.25, 0.5, 0.5)]);
        let report = run_video(source, &mut sink, &mut detector, keep_going)?;
        assert_eq!(report.frames, sink.frames.len() as u64);
        assert_eq!(report.faces, report.frames);
        assert_eq!(detector.calls(), report.frames);
        Ok(())
    }

    #[test]
    fn empty_video_leaves_no_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("Output.mp4");
        let err = transcode_file(
            Path::new("stub://empty"),
            &output,
            &mut FixedBackend::empty(),
            keep_going,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmptyStream(_))
        ));
        assert!(!output.exists());
    }

    #[test]
    fn output_guard_removes_file_unless_kept() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dropped = dir.path().join("dropped.mp4");
        let kept = dir.path().join("kept.mp4");
        std::fs::write(&dropped, b"partial")?;
        std::fs::write(&kept, b"complete")?;

        drop(OutputGuard::new(&dropped));
        OutputGuard::new(&kept).keep();

        assert!(!dropped.exists());
        assert!(kept.exists());
        Ok(())
    }
}
