//! Typed failures.
//!
//! Library functions return `anyhow::Result`; the variants below are wrapped
//! inside so that callers (the HTTP layer, the CLI) can downcast and pick a
//! response without string matching.

use thiserror::Error;

/// Coarse failure classes surfaced to users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad extension, missing upload field, bad CLI input.
    Validation,
    /// Camera cannot be opened.
    Device,
    /// Unreadable image or video.
    Decode,
    /// Failure while transforming or encoding frames.
    Processing,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("could not load image '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("could not open video '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("no frames could be read from '{0}'")]
    EmptyStream(String),

    #[error("could not start camera: {0}")]
    CameraUnavailable(String),

    #[error("frame processing failed: {0}")]
    Processing(String),

    #[error("{0} requires the '{1}' feature")]
    Unsupported(&'static str, &'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::CameraUnavailable(_) => ErrorKind::Device,
            Error::Load { .. } | Error::Open { .. } | Error::EmptyStream(_) => ErrorKind::Decode,
            Error::Processing(_) | Error::Unsupported(..) => ErrorKind::Processing,
        }
    }
}

/// Classify an `anyhow::Error`, searching the whole context chain.
///
/// Errors that carry no typed cause are processing failures.
pub fn kind_of(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(Error::kind)
        .unwrap_or(ErrorKind::Processing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_added_context() {
        let err: anyhow::Result<()> = Err(Error::EmptyStream("clip.mp4".into()).into());
        let err = err.context("processing upload").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::Decode);
    }

    #[test]
    fn untyped_errors_are_processing_failures() {
        let err = anyhow::anyhow!("encoder exploded");
        assert_eq!(kind_of(&err), ErrorKind::Processing);
    }

    #[test]
    fn camera_failures_are_device_errors() {
        let err = Error::CameraUnavailable("no device".into());
        assert_eq!(err.kind(), ErrorKind::Device);
        assert_eq!(err.to_string(), "could not start camera: no device");
    }
}
