//! Video file output.
//!
//! `VideoWriter` encodes RGB frames into an MP4 container with the MPEG-4
//! Part 2 codec. All frames must share the size given at creation; the
//! container keeps the source frame rate.

use std::path::{Path, PathBuf};

use anyhow::Result;

#[cfg(feature = "video-ffmpeg")]
use super::video_ffmpeg::FfmpegVideoWriter;
use crate::error::Error;
use crate::frame::Frame;

/// Destination for a sequence of equally sized frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush buffered frames and finalize the output.
    fn finish(&mut self) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Largest time-base denominator the MPEG-4 encoder accepts.
const MAX_TIME_BASE_DENOMINATOR: i32 = 65_535;

/// Frame rate as `(numerator, denominator)` suitable for the encoder.
///
/// Rates within 0.1% of an NTSC rate (`n * 1000 / 1001`) snap to it; others
/// round to a millisecond grid. The denominator never exceeds 65535.
#[cfg_attr(not(feature = "video-ffmpeg"), allow(dead_code))]
pub(crate) fn encoder_frame_rate(fps: f64) -> (i32, i32) {
    let ntsc = (fps * 1.001).round();
    if ntsc >= 1.0 && (fps * 1.001 - ntsc).abs() < 1e-3 && (fps - fps.round()).abs() > 1e-3 {
        return ((ntsc as i32).saturating_mul(1000), 1001);
    }
    let millis = ((fps * 1000.0).round() as i32).max(1);
    let divisor = gcd(millis, 1000);
    let (num, den) = (millis / divisor, 1000 / divisor);
    debug_assert!(den <= MAX_TIME_BASE_DENOMINATOR);
    (num, den)
}

fn gcd(mut a: i32, mut b: i32) -> i32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// MP4 video file writer.
pub struct VideoWriter {
    backend: WriterBackend,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    finished: bool,
}

enum WriterBackend {
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(Box<FfmpegVideoWriter>),
}

impl VideoWriter {
    /// Create the output file. An existing file at `path` is overwritten.
    pub fn create(path: impl AsRef<Path>, width: u32, height: u32, fps: f64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if width == 0 || height == 0 {
            return Err(Error::Processing(format!(
                "cannot encode {width}x{height} video to {}",
                path.display()
            ))
            .into());
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::Processing(format!("invalid frame rate {fps}")).into());
        }

        #[cfg(feature = "video-ffmpeg")]
        {
            let writer = FfmpegVideoWriter::create(&path, width, height, fps)?;
            log::info!(
                "VideoWriter: writing {} ({}x{} @ {:.2} fps)",
                path.display(),
                width,
                height,
                fps
            );
            Ok(Self {
                backend: WriterBackend::Ffmpeg(Box::new(writer)),
                path,
                width,
                height,
                frames_written: 0,
                finished: false,
            })
        }
        #[cfg(not(feature = "video-ffmpeg"))]
        {
            Err(Error::Unsupported("video encoding", "video-ffmpeg").into())
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for VideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(Error::Processing("video writer already finished".to_string()).into());
        }
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(Error::Processing(format!(
                "frame is {}x{}, video is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ))
            .into());
        }
        match self.backend {
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(ref mut writer) => writer.write(frame, self.frames_written)?,
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match self.backend {
            #[cfg(feature = "video-ffmpeg")]
            WriterBackend::Ffmpeg(ref mut writer) => writer.finish()?,
        }
        log::info!(
            "VideoWriter: finished {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }
}
