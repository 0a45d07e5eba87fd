//! MP4 encoding using FFmpeg.
//!
//! RGB24 frames are converted to YUV420P, encoded with MPEG-4 Part 2 and
//! muxed into the container picked from the file extension.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::video::encoder_frame_rate;
use crate::frame::Frame;

/// Bits per pixel per frame used to size the target bitrate.
const BITS_PER_PIXEL: f64 = 0.2;

pub(crate) struct FfmpegVideoWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
}

impl FfmpegVideoWriter {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("create video output {}", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no MPEG-4 encoder"))?;
        let (num, den) = encoder_frame_rate(fps);
        let frame_rate = ffmpeg::Rational::new(num, den);
        let encoder_time_base = frame_rate.invert();

        let encoder = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            let mut encoder =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                    .context("create encoder context")?
                    .encoder()
                    .video()
                    .context("configure video encoder")?;
            encoder.set_width(width);
            encoder.set_height(height);
            encoder.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder.set_frame_rate(Some(frame_rate));
            encoder.set_time_base(encoder_time_base);
            encoder.set_bit_rate((f64::from(width) * f64::from(height) * fps * BITS_PER_PIXEL) as usize);
            if global_header {
                encoder.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
            }
            let encoder = encoder.open_as(codec).context("open MPEG-4 encoder")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            encoder
        };

        output.write_header().context("write container header")?;
        let stream_time_base = output
            .stream(0)
            .map(|stream| stream.time_base())
            .context("output stream missing after header")?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            encoder_time_base,
            stream_time_base,
            width,
            height,
        })
    }

    /// Encode one frame as presentation index `index`.
    pub(crate) fn write(&mut self, frame: &Frame, index: u64) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        copy_into_plane(frame, &mut rgb)?;

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV420P")?;
        yuv.set_pts(Some(index as i64));

        self.encoder
            .send_frame(&yuv)
            .context("send frame to ffmpeg encoder")?;
        self.drain_packets()
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        self.encoder.send_eof().context("flush ffmpeg encoder")?;
        self.drain_packets()?;
        self.output.write_trailer().context("write container trailer")
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }
}

fn copy_into_plane(frame: &Frame, target: &mut ffmpeg::frame::Video) -> Result<()> {
    let row_bytes = frame.width() as usize * 3;
    let stride = target.stride(0);
    let plane = target.data_mut(0);
    for (row, pixels) in frame.as_bytes().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        plane
            .get_mut(start..start + row_bytes)
            .context("ffmpeg frame row is out of bounds")?
            .copy_from_slice(pixels);
    }
    Ok(())
}
