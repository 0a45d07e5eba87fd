use std::path::Path;

use anyhow::{Context, Result};

use crate::frame::Frame;

/// Write a frame to disk; the format follows the file extension.
pub fn save_image(frame: &Frame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    frame
        .to_rgb_image()
        .save(path)
        .with_context(|| format!("write image to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::load_image;

    #[test]
    fn saved_png_reloads_identically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.png");
        let mut frame = Frame::filled(6, 4, [1, 2, 3]);
        frame.set_pixel(5, 3, [250, 0, 9]);

        save_image(&frame, &path)?;
        assert_eq!(load_image(&path)?, frame);
        Ok(())
    }

    #[test]
    fn unknown_extension_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frame = Frame::filled(2, 2, [0, 0, 0]);
        assert!(save_image(&frame, dir.path().join("out.xyz")).is_err());
    }
}
