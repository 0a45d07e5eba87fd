pub mod fixed;

#[cfg(feature = "backend-tract")]
pub mod ultraface;

pub use fixed::FixedBackend;

#[cfg(feature = "backend-tract")]
pub use ultraface::UltraFaceBackend;
