//! Multipart JPEG (MJPEG) streaming.
//!
//! `MjpegStream` is a pull-based producer: every `next()` waits for a camera
//! frame newer than the last one sent, optionally anonymizes it, and returns
//! one complete multipart part. The HTTP layer writes parts until the client
//! goes away, then drops the stream. Dropping or closing a stream never stops
//! the shared camera.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::anonymize::anonymize;
use crate::camera::CameraFeed;
use crate::detect::FaceDetector;
use crate::error::Error;
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};

pub const MJPEG_BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Polling and encoding knobs shared by all streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Sleep between polls when no new frame is available.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    /// Longest wait for a new frame before the stream fails.
    pub frame_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_timeout: Duration::from_secs(10),
        }
    }
}

/// Live camera stream producing multipart JPEG parts.
pub struct MjpegStream {
    feed: Arc<CameraFeed>,
    detector: Option<Box<dyn FaceDetector>>,
    options: StreamOptions,
    last_seq: u64,
    parts_sent: u64,
    closed: bool,
}

impl MjpegStream {
    /// Pass-through stream: frames are sent as captured.
    pub fn raw(feed: Arc<CameraFeed>, options: StreamOptions) -> Self {
        Self::with_detector(feed, None, options)
    }

    /// Anonymizing stream. The detector belongs to this stream alone.
    pub fn processed(
        feed: Arc<CameraFeed>,
        detector: Box<dyn FaceDetector>,
        options: StreamOptions,
    ) -> Self {
        Self::with_detector(feed, Some(detector), options)
    }

    fn with_detector(
        feed: Arc<CameraFeed>,
        detector: Option<Box<dyn FaceDetector>>,
        options: StreamOptions,
    ) -> Self {
        Self {
            feed,
            detector,
            options,
            last_seq: 0,
            parts_sent: 0,
            closed: false,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.detector.is_some()
    }

    pub fn parts_sent(&self) -> u64 {
        self.parts_sent
    }

    /// Stop producing parts. The camera keeps running for other viewers.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn render(&mut self, mut frame: Frame) -> Result<Vec<u8>> {
        if let Some(detector) = self.detector.as_mut() {
            let boxes = detector
                .detect(&frame)
                .with_context(|| format!("face detection ({})", detector.name()))?;
            anonymize(&mut frame, &boxes);
        }
        let jpeg = frame.encode_jpeg(self.options.jpeg_quality)?;
        Ok(multipart_part(&jpeg))
    }
}

impl Iterator for MjpegStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let waiting_since = Instant::now();
        loop {
            if self.closed {
                return None;
            }
            if self.feed.is_stopped() {
                log::info!("camera stopped, ending stream after {} parts", self.parts_sent);
                self.closed = true;
                return None;
            }
            let Some((seq, frame)) = self.feed.frame_after(self.last_seq) else {
                if waiting_since.elapsed() >= self.options.frame_timeout {
                    self.closed = true;
                    log::warn!(
                        "no frame from {} for {:?}, ending stream after {} parts",
                        self.feed.device_name(),
                        self.options.frame_timeout,
                        self.parts_sent
                    );
                    return Some(Err(Error::CameraUnavailable(format!(
                        "{} delivered no frame for {:?}",
                        self.feed.device_name(),
                        self.options.frame_timeout
                    ))
                    .into()));
                }
                std::thread::sleep(self.options.poll_interval);
                continue;
            };
            self.last_seq = seq;
            return match self.render(frame) {
                Ok(part) => {
                    self.parts_sent += 1;
                    Some(Ok(part))
                }
                Err(err) => {
                    // The stream ends so the client sees the failure instead of a frozen feed.
                    self.closed = true;
                    Some(Err(err))
                }
            };
        }
    }
}

impl std::iter::FusedIterator for MjpegStream {}

/// Wrap one JPEG image as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraManager;
    use crate::detect::{FixedBackend, RelativeBox};
    use crate::ingest::{CameraSettings, CaptureDevice, SyntheticDevice};
    use anyhow::anyhow;

    fn stub_manager() -> CameraManager {
        CameraManager::new(Arc::new(|| {
            Ok(Box::new(SyntheticDevice::new(CameraSettings {
                device: "stub://camera".to_string(),
                width: 32,
                height: 24,
                target_fps: 100,
            })) as Box<dyn CaptureDevice>)
        }))
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RelativeBox>> {
            Err(anyhow!("model rejected input"))
        }
    }

    fn split_part(part: &[u8]) -> (String, &[u8]) {
        let pos = part
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("part header terminator");
        let header = String::from_utf8_lossy(&part[..pos]).to_string();
        (header, &part[pos + 4..part.len() - 2])
    }

    #[test]
    fn raw_stream_yields_jpeg_parts() -> Result<()> {
        let manager = stub_manager();
        let feed = manager.start()?;
        let mut stream = MjpegStream::raw(feed, StreamOptions::default());

        let part = stream.next().expect("stream ended early")?;
        let (header, body) = split_part(&part);
        assert!(header.starts_with("--frame\r\nContent-Type: image/jpeg"));
        assert!(header.contains(&format!("Content-Length: {}", body.len())));
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
        assert!(part.ends_with(b"\r\n"));
        assert!(!stream.is_processed());
        Ok(())
    }

    #[test]
    fn processed_stream_blurs_frames() -> Result<()> {
        let manager = stub_manager();
        let feed = manager.start()?;
        let detector = FixedBackend::new(vec![RelativeBox::new(0.0, 0.0, 1.0, 1.0)]);
        let mut stream = MjpegStream::processed(feed, Box::new(detector), StreamOptions::default());

        assert!(stream.next().expect("part")?.len() > 0);
        assert!(stream.next().expect("part")?.len() > 0);
        assert_eq!(stream.parts_sent(), 2);
        assert!(stream.is_processed());
        Ok(())
    }

    #[test]
    fn stream_ends_when_camera_stops() -> Result<()> {
        let manager = stub_manager();
        let feed = manager.start()?;
        let mut stream = MjpegStream::raw(feed, StreamOptions::default());
        stream.next().expect("part")?;

        manager.stop();
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn detector_failure_ends_stream_with_one_error() -> Result<()> {
        let manager = stub_manager();
        let feed = manager.start()?;
        let mut stream =
            MjpegStream::processed(feed, Box::new(FailingDetector), StreamOptions::default());

        let err = stream.next().expect("error item").unwrap_err();
        assert!(format!("{err:#}").contains("model rejected input"));
        assert!(stream.next().is_none());
        assert!(manager.is_running(), "camera must survive a stream failure");
        Ok(())
    }

    struct SilentDevice;

    impl CaptureDevice for SilentDevice {
        fn name(&self) -> &str {
            "silent"
        }

        fn read_frame(&mut self) -> Result<Frame> {
            std::thread::sleep(Duration::from_millis(5));
            Err(anyhow!("no signal"))
        }
    }

    #[test]
    fn silent_camera_ends_stream_after_timeout() -> Result<()> {
        let manager =
            CameraManager::new(Arc::new(|| Ok(Box::new(SilentDevice) as Box<dyn CaptureDevice>)));
        let options = StreamOptions {
            frame_timeout: Duration::from_millis(100),
            ..StreamOptions::default()
        };
        let mut stream = MjpegStream::raw(manager.start()?, options);

        let started = Instant::now();
        let err = stream.next().expect("timeout error").unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CameraUnavailable(_))
        ));
        assert!(stream.next().is_none());
        assert!(manager.is_running(), "camera stays up for other viewers");
        Ok(())
    }

    #[test]
    fn closing_one_stream_leaves_others_running() -> Result<()> {
        let manager = stub_manager();
        let mut a = MjpegStream::raw(manager.start()?, StreamOptions::default());
        let mut b = MjpegStream::raw(manager.start()?, StreamOptions::default());
        a.close();
        assert!(a.next().is_none());
        assert!(b.next().expect("part").is_ok());
        Ok(())
    }
}
