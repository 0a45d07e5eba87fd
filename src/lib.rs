//! Face Veil
//!
//! Face anonymization for still images, video files and live camera feeds.
//! Faces are located by a pretrained detector and covered with a strong box
//! blur; nothing else in the frame is touched.
//!
//! # Architecture
//!
//! Frames flow one at a time through the same three steps:
//!
//! 1. **Source**: an image file, a video file or the shared live camera
//!    yields an RGB `Frame`.
//! 2. **Anonymize**: a `FaceDetector` reports relative boxes, which are
//!    blurred in place.
//! 3. **Sink**: the frame is written to an image file, a video file or a
//!    multipart JPEG stream.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame buffer and JPEG encoding
//! - `detect`: face detector trait, backends and factory
//! - `anonymize`: box-to-pixel mapping and the blur
//! - `ingest`: image, video file and camera device sources
//! - `camera`: shared live camera lifecycle
//! - `sink`: image, video and MJPEG outputs
//! - `pipeline`: source → anonymize → sink wiring
//! - `upload`, `api`: the web service
//! - `config`, `error`, `ui`: service configuration, error taxonomy, CLI output

pub mod anonymize;
pub mod api;
pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
#[cfg(feature = "gui")]
pub mod gui;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod ui;
pub mod upload;

pub use anonymize::{anonymize, PixelRect};
pub use camera::{CameraFeed, CameraManager, CameraOpener};
pub use config::ServiceConfig;
pub use detect::{DetectorFactory, DetectorSettings, FaceDetector, FixedBackend, RelativeBox};
pub use error::{Error, ErrorKind};
pub use frame::Frame;
pub use pipeline::{anonymize_frame, process_image_file, transcode_file, VideoReport};
