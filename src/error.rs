//! Error types shared across the frame pipeline.
//!
//! Every error here is scoped to a single frame; none of them stops the
//! pipeline.

use thiserror::Error;

use crate::processing::ProcessingMode;

/// Per-frame failure taxonomy
#[derive(Debug, Error)]
pub enum FrameError {
    /// Plane count or plane geometry does not describe a 4:2:0 frame
    #[error("invalid frame format: {0}")]
    InvalidFrameFormat(String),

    /// A transform step failed; the frame falls back to its unprocessed form
    #[error("{mode} processing failed: {reason}")]
    ProcessingFailure {
        mode: ProcessingMode,
        reason: String,
    },

    /// The GPU texture could not be updated
    #[error("texture upload failed: {0}")]
    UploadFailure(String),
}

impl FrameError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidFrameFormat(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::UploadFailure(msg.into())
    }
}

/// Capture source errors
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported capture configuration: {0}")]
    Unsupported(String),

    #[error("stream not started")]
    StreamNotStarted,
}

/// Errors reported by an [`ImageOps`](crate::processing::ImageOps) implementation
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("image dimensions {width}x{height} are not supported")]
    Dimensions { width: u32, height: u32 },

    #[error("{0}")]
    Other(String),
}
