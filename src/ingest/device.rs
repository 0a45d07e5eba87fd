//! Live capture devices.
//!
//! A `CaptureDevice` is owned by exactly one camera reader thread. Dropping
//! the device releases the underlying handle.

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::error::Error;
use crate::frame::Frame;

/// Camera selection and requested capture format.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Device path (e.g., "/dev/video0"), or `stub://<name>` for a synthetic camera.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// A device that blocks until the next frame is available.
pub trait CaptureDevice: Send {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    /// Read the next frame, normalized to RGB.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Open the configured device.
///
/// Any failure is reported as [`Error::CameraUnavailable`].
pub fn open_capture_device(settings: &CameraSettings) -> Result<Box<dyn CaptureDevice>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(settings.clone())));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let device = super::v4l2::V4l2Device::open(settings)
            .map_err(|e| Error::CameraUnavailable(format!("{}: {e:#}", settings.device)))?;
        Ok(Box::new(device))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(Error::CameraUnavailable(format!(
            "{}: camera capture requires the ingest-v4l2 feature",
            settings.device
        ))
        .into())
    }
}

// ----------------------------------------------------------------------------
// Synthetic device (stub://) for tests
// ----------------------------------------------------------------------------

/// Synthetic camera producing a moving YUYV test pattern at the target rate.
pub struct SyntheticDevice {
    settings: CameraSettings,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticDevice {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            next_due: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.settings.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / u64::from(self.settings.target_fps))
        }
    }

    fn generate_yuyv(&self) -> Vec<u8> {
        let w = (self.settings.width & !1) as usize;
        let h = self.settings.height as usize;
        let mut yuyv = vec![128u8; w * h * 2];
        for (i, quad) in yuyv.chunks_exact_mut(4).enumerate() {
            let x = (i * 2) % w.max(1);
            let luma = ((x as u64 + self.frame_count * 4) % 220 + 16) as u8;
            quad[0] = luma;
            quad[2] = luma.saturating_add(1);
        }
        yuyv
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.frame_interval());
        self.frame_count += 1;

        let pixels = self.generate_yuyv();
        normalize_to_rgb(
            &pixels,
            self.settings.width & !1,
            self.settings.height,
            PixelFormat::Yuyv,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_settings() -> CameraSettings {
        CameraSettings {
            device: "stub://test".to_string(),
            width: 32,
            height: 24,
            target_fps: 0,
        }
    }

    #[test]
    fn synthetic_device_produces_frames() -> Result<()> {
        let mut device = open_capture_device(&stub_settings())?;
        let first = device.read_frame()?;
        let second = device.read_frame()?;
        assert_eq!((first.width(), first.height()), (32, 24));
        assert_ne!(first, second, "pattern must move between frames");
        assert_eq!(device.name(), "stub://test");
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_devices_need_v4l2_support() {
        let settings = CameraSettings::default();
        let err = open_capture_device(&settings).err().expect("must fail");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CameraUnavailable(_))
        ));
    }
}
