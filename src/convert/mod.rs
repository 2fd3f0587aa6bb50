pub mod encode;
pub mod packed;
pub mod yuv;

pub use encode::{save_snapshot, SnapshotFormat};
pub use packed::{PackedImage, BYTES_PER_PIXEL};

use std::time::Instant;

use image::RgbaImage;

use crate::capture::RawFrame;
use crate::error::FrameError;

/// Converts between sensor frames, packed RGBA, and displayable images
#[derive(Debug, Default, Clone)]
pub struct PixelFormatConverter;

#[allow(clippy::wrong_self_convention)]
impl PixelFormatConverter {
    pub fn new() -> Self {
        Self
    }

    /// Planar 4:2:0 frame to a freshly allocated RGBA image
    pub fn to_packed_image(&self, frame: &RawFrame) -> Result<PackedImage, FrameError> {
        let start = Instant::now();
        let packed = yuv::to_packed_image(frame)?;
        metrics::histogram!("convert_time_us").record(start.elapsed().as_micros() as f64);
        Ok(packed)
    }

    /// Packed image to an on-screen/on-disk representation of the same size
    pub fn from_packed_image(&self, image: &PackedImage) -> RgbaImage {
        encode::from_packed_image(image)
    }
}
