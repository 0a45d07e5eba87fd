//! Local file decoding using FFmpeg.
//!
//! Frames are decoded in-memory and scaled to packed RGB24.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use crate::error::Error;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    frame_rate: ffmpeg::Rational,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let open_error = |reason: String| Error::Open {
            path: path.to_string(),
            reason,
        };
        let input = ffmpeg::format::input(&path).map_err(|e| open_error(e.to_string()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_error("file has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let frame_rate = input_stream.avg_frame_rate();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| open_error(format!("load video decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| open_error(format!("open video decoder: {e}")))?;

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler: None,
            frame_rate,
            frame_count: 0,
            eof_sent: false,
        })
    }

    /// Average frame rate from the container, if it reports one.
    pub(crate) fn reported_fps(&self) -> Option<f64> {
        if self.frame_rate.numerator() > 0 && self.frame_rate.denominator() > 0 {
            Some(f64::from(self.frame_rate))
        } else {
            None
        }
    }

    /// Decode the next frame; `None` once the stream is drained.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame = self.convert(&decoded)?;
                self.frame_count += 1;
                return Ok(Some(frame));
            }
            if self.eof_sent {
                log::debug!(
                    "VideoSource: {} drained after {} frames",
                    self.path,
                    self.frame_count
                );
                return Ok(None);
            }

            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        if self.scaler.is_none() {
            let scaler = ffmpeg::software::scaling::context::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::util::format::pixel::Pixel::RGB24,
                decoded.width(),
                decoded.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            self.scaler = Some(scaler);
        }
        let scaler = self.scaler.as_mut().context("ffmpeg scaler missing")?;
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::from_rgb(pixels, width, height)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0) as usize;
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
