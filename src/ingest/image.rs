//! Still image source.

use std::path::Path;

use anyhow::Result;

use crate::error::Error;
use crate::frame::Frame;

/// Load an image file as an RGB frame.
///
/// Fails with [`Error::Load`] when the path does not exist or the content is
/// not a decodable image. Alpha and grayscale inputs are converted to RGB.
pub fn load_image(path: impl AsRef<Path>) -> Result<Frame> {
    let path = path.as_ref();
    let load_error = |reason: String| Error::Load {
        path: path.display().to_string(),
        reason,
    };
    if !path.is_file() {
        return Err(load_error("file not found".to_string()).into());
    }
    let reader = ::image::ImageReader::open(path)
        .map_err(|e| load_error(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| load_error(e.to_string()))?;
    let decoded = reader.decode().map_err(|e| load_error(e.to_string()))?;
    Ok(Frame::from(decoded.to_rgb8()))
}
