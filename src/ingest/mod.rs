//! Frame sources.
//!
//! This module provides the sources frames are read from:
//! - Still images (`load_image`)
//! - Local video files (`VideoSource`, decoding requires feature: video-ffmpeg)
//! - Live cameras (`CaptureDevice`, V4L2 requires feature: ingest-v4l2)
//! - Synthetic `stub://` sources (testing)
//!
//! Every source yields RGB `Frame`s; device formats are normalized here so
//! nothing downstream deals with channel order.

pub mod device;
pub mod file;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod image;
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use self::image::load_image;
pub use device::{open_capture_device, CameraSettings, CaptureDevice, SyntheticDevice};
pub use file::{VideoConfig, VideoSource, DEFAULT_FPS};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;
