//! Frame sinks.
//!
//! - `MjpegStream`: multipart JPEG parts for HTTP streaming
//! - `VideoWriter`: encoded video files (requires feature: video-ffmpeg)
//! - `save_image`: still image files

mod image_file;
pub mod mjpeg;
pub mod video;
#[cfg(feature = "video-ffmpeg")]
mod video_ffmpeg;

pub use image_file::save_image;
pub use mjpeg::{MjpegStream, StreamOptions, MJPEG_BOUNDARY, MJPEG_CONTENT_TYPE};
pub use video::{FrameSink, VideoWriter};
