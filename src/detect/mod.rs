//! Face detection.
//!
//! Detection is delegated to a pretrained model behind the `FaceDetector`
//! trait. Each logical stream owns its own detector, built on demand through
//! `DetectorFactory`.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::FaceDetector;
pub use backends::FixedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::UltraFaceBackend;
pub use registry::{DetectorFactory, DetectorSettings};
pub use result::RelativeBox;

/// Minimum detector confidence for a face to be reported.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
