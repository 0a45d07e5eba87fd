//! Local video file source.
//!
//! `VideoSource` decodes a local video container frame by frame. It is
//! responsible for:
//! - Opening the container (no URL schemes, no network access)
//! - Reporting the frame rate, falling back to [`DEFAULT_FPS`]
//! - Reporting dimensions taken from the first decoded frame
//! - Yielding RGB frames lazily until the stream ends
//!
//! A source cannot be rewound; open it again to re-read the file.

use anyhow::Result;

#[cfg(feature = "video-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::error::Error;
use crate::frame::Frame;

/// Frame rate assumed when the container does not report one.
pub const DEFAULT_FPS: f64 = 25.0;

const SYNTHETIC_FRAMES: u64 = 12;
const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;

/// Configuration for a video file source.
#[derive(Clone, Debug)]
pub struct VideoConfig {
    /// Local file path (e.g., "input/clip.mp4"), or `stub://<name>` for a
    /// synthetic clip. `stub://empty` yields no frames.
    pub path: String,
}

impl VideoConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Video file frame source.
pub struct VideoSource {
    backend: VideoBackend,
    fps: f64,
    width: u32,
    height: u32,
    pending: Option<Frame>,
    frames_read: u64,
    finished: bool,
}

enum VideoBackend {
    Synthetic(SyntheticVideo),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
}

impl VideoBackend {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self {
            VideoBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

impl VideoSource {
    /// Open the container and decode the first frame.
    ///
    /// Fails with [`Error::Open`] when the file cannot be opened as video and
    /// with [`Error::EmptyStream`] when no frame can be decoded.
    pub fn open(config: VideoConfig) -> Result<Self> {
        let open_error = |reason: &str| Error::Open {
            path: config.path.clone(),
            reason: reason.to_string(),
        };
        if !is_local_file_path(&config.path) {
            return Err(open_error("only local paths are supported (no URL schemes)").into());
        }

        let (mut backend, reported_fps) = if let Some(name) = config.path.strip_prefix("stub://") {
            let source = SyntheticVideo::new(name);
            let fps = source.reported_fps();
            (VideoBackend::Synthetic(source), fps)
        } else {
            #[cfg(feature = "video-ffmpeg")]
            {
                let source = FfmpegFileSource::new(&config.path)?;
                let fps = source.reported_fps();
                (VideoBackend::Ffmpeg(Box::new(source)), fps)
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                return Err(Error::Unsupported("video decoding", "video-ffmpeg").into());
            }
        };

        let first = backend
            .next_frame()
            .map_err(|e| Error::Open {
                path: config.path.clone(),
                reason: format!("{e:#}"),
            })?
            .ok_or_else(|| Error::EmptyStream(config.path.clone()))?;

        let fps = match reported_fps {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            _ => DEFAULT_FPS,
        };
        log::info!(
            "VideoSource: opened {} ({}x{} @ {:.2} fps)",
            config.path,
            first.width(),
            first.height(),
            fps
        );

        Ok(Self {
            backend,
            fps,
            width: first.width(),
            height: first.height(),
            pending: Some(first),
            frames_read: 0,
            finished: false,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames handed out so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl Iterator for VideoSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(frame) = self.pending.take() {
            self.frames_read += 1;
            return Some(Ok(frame));
        }
        if self.finished {
            return None;
        }
        match self.backend.next_frame() {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Some(Ok(frame))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticVideo {
    remaining: u64,
    frame_count: u64,
}

impl SyntheticVideo {
    fn new(name: &str) -> Self {
        let remaining = if name == "empty" { 0 } else { SYNTHETIC_FRAMES };
        Self {
            remaining,
            frame_count: 0,
        }
    }

    /// Synthetic clips carry no rate metadata, like many raw AVI captures.
    fn reported_fps(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.frame_count += 1;

        let mut frame = Frame::filled(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, [0, 0, 0]);
        for (i, pixel) in frame.as_bytes_mut().iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count * 7) % 256) as u8;
        }
        Some(frame)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kind_of, ErrorKind};

    #[test]
    fn synthetic_source_reports_fallback_fps_and_first_frame_size() -> Result<()> {
        let source = VideoSource::open(VideoConfig::new("stub://clip"))?;
        assert_eq!(source.fps(), DEFAULT_FPS);
        assert_eq!(source.width(), SYNTHETIC_WIDTH);
        assert_eq!(source.height(), SYNTHETIC_HEIGHT);
        Ok(())
    }

    #[test]
    fn synthetic_source_is_finite_and_counts_frames() -> Result<()> {
        let mut source = VideoSource::open(VideoConfig::new("stub://clip"))?;
        let frames: Vec<Frame> = source.by_ref().collect::<Result<_>>()?;
        assert_eq!(frames.len() as u64, SYNTHETIC_FRAMES);
        assert_eq!(source.frames_read(), SYNTHETIC_FRAMES);
        assert!(source.next().is_none());
        assert_ne!(frames[0], frames[1]);
        Ok(())
    }

    #[test]
    fn empty_stream_is_reported() {
        let err = VideoSource::open(VideoConfig::new("stub://empty"))
            .err()
            .expect("empty clip must fail");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmptyStream(_))
        ));
        assert_eq!(kind_of(&err), ErrorKind::Decode);
    }

    #[test]
    fn url_schemes_are_rejected() {
        let err = VideoSource::open(VideoConfig::new("rtsp://camera/stream"))
            .err()
            .expect("urls must fail");
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Open { .. })));
    }
}
