//! Uploaded media handling.
//!
//! Client-supplied file names are reduced to their base name and only the
//! extension is kept; it must be on the allow-list for the expected media
//! kind. Upload bytes are written to a scoped temporary file that is removed
//! when the `TempUpload` is dropped, on every exit path.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::TempPath;

use crate::error::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Allowed lowercase extensions, without the dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => IMAGE_EXTENSIONS,
            MediaKind::Video => VIDEO_EXTENSIONS,
        }
    }

    /// User-facing rejection message for a disallowed extension.
    pub fn invalid_message(self) -> &'static str {
        match self {
            MediaKind::Image => "Invalid image type",
            MediaKind::Video => "Invalid video format",
        }
    }

    /// `accept` attribute for HTML file inputs.
    pub fn accept_attr(self) -> String {
        self.extensions()
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Strip directories from a client file name (both `/` and `\` separators).
pub fn sanitize_filename(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.trim()
}

/// Lowercase extension of `filename` if it is allowed for `kind`.
///
/// Fails with [`Error::Validation`] otherwise.
pub fn validate_extension(filename: &str, kind: MediaKind) -> Result<String> {
    let base = sanitize_filename(filename);
    let ext = Path::new(base)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext {
        Some(ext) if kind.extensions().contains(&ext.as_str()) => Ok(ext),
        _ => Err(Error::Validation(kind.invalid_message().to_string()).into()),
    }
}

/// Uploaded bytes stored in a temporary file, removed on drop.
#[derive(Debug)]
pub struct TempUpload {
    path: TempPath,
}

impl TempUpload {
    /// Persist `bytes` to a new temporary file ending in `.<ext>`.
    pub fn write(bytes: &[u8], ext: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("face-veil-in-")
            .suffix(&format!(".{ext}"))
            .tempfile()
            .context("create temporary upload file")?;
        file.write_all(bytes).context("write temporary upload file")?;
        file.flush().context("flush temporary upload file")?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// New empty temporary output path ending in `.<ext>`, removed on drop.
pub fn temp_output(ext: &str) -> Result<TempPath> {
    let file = tempfile::Builder::new()
        .prefix("face-veil-out-")
        .suffix(&format!(".{ext}"))
        .tempfile()
        .context("create temporary output file")?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() -> Result<()> {
        assert_eq!(validate_extension("Holiday.JPG", MediaKind::Image)?, "jpg");
        assert_eq!(validate_extension("a.PnG", MediaKind::Image)?, "png");
        assert_eq!(validate_extension("clip.MoV", MediaKind::Video)?, "mov");
        Ok(())
    }

    #[test]
    fn disallowed_extensions_are_validation_errors() {
        for (name, kind) in [
            ("notes.txt", MediaKind::Image),
            ("clip.mp4", MediaKind::Image),
            ("photo.png", MediaKind::Video),
            ("noext", MediaKind::Video),
            ("", MediaKind::Image),
            (".jpg", MediaKind::Image),
        ] {
            let err = validate_extension(name, kind).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn client_directories_are_ignored() -> Result<()> {
        assert_eq!(sanitize_filename("../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize_filename(r"C:\Users\me\face.jpeg"), "face.jpeg");
        assert_eq!(validate_extension("dir.mp4/evil.png", MediaKind::Image)?, "png");
        Ok(())
    }

    #[test]
    fn temp_upload_is_removed_on_drop() -> Result<()> {
        let upload = TempUpload::write(b"payload", "png")?;
        let path = upload.path().to_path_buf();
        assert_eq!(std::fs::read(&path)?, b"payload");
        assert!(path.to_string_lossy().ends_with(".png"));
        drop(upload);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn accept_attr_lists_extensions() {
        assert_eq!(MediaKind::Video.accept_attr(), ".mp4,.mov,.avi");
    }
}
