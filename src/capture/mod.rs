pub mod frame;
pub mod pool;
pub mod synthetic;
pub mod v4l2;

pub use frame::{FrameMetadata, PixelFormat, Plane, PlaneLayout, RawFrame};
pub use pool::{BufferPool, PooledBuffer};
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;
use crate::{CaptureConfig, SourceKind};

/// Producer of planar camera frames.
///
/// `Ok(None)` means no frame this tick: the sensor timed out or the frame was
/// dropped because every pool buffer is still held downstream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Open the source named by the capture configuration
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::V4l2 => {
            let mut capture = V4l2Capture::new(config.clone())?;
            capture.start_stream()?;
            Ok(Box::new(capture))
        }
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(config))),
    }
}
