//! V4L2 capture device.
//!
//! Connects to a local device node (e.g., /dev/video0), negotiates a capture
//! format and normalizes every buffer to RGB. The mmap stream borrows the
//! device, so both live in one self-referencing struct and are released
//! together on drop.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::device::{CameraSettings, CaptureDevice};
use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Device {
    name: String,
    state: V4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&settings.device)
            .with_context(|| format!("open v4l2 device {}", settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set format on {}: {}",
                    settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported format {}",
                settings.device,
                format.fourcc
            )
        })?;

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Device: failed to set fps on {}: {}",
                    settings.device,
                    err
                );
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: connected to {} ({}x{} {:?})",
            settings.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            name: settings.device.clone(),
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (format, width, height) = (self.format, self.width, self.height);
        let frame = self.state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;
        self.frame_count += 1;
        Ok(frame)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        log::info!(
            "V4l2Device: released {} after {} frames",
            self.name,
            self.frame_count
        );
    }
}
