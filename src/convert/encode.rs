//! Packed image to displayable / storable representations

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError, RgbaImage};

use super::packed::PackedImage;

/// JPEG quality used when none is given
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Png,
    Jpeg { quality: u8 },
}

impl SnapshotFormat {
    /// Pick the encoding from a file extension, PNG when unknown
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => SnapshotFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            },
            _ => SnapshotFormat::Png,
        }
    }
}

/// Device-displayable image with the same dimensions as `image`
pub fn from_packed_image(image: &PackedImage) -> RgbaImage {
    image.to_rgba_image()
}

/// Encode for storage or transport
pub fn encode(image: &PackedImage, format: SnapshotFormat) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());

    match format {
        SnapshotFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                image.data(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        SnapshotFormat::Jpeg { quality } => {
            // JPEG carries no alpha channel
            let rgb = DynamicImage::ImageRgba8(from_packed_image(image)).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(out.into_inner())
}

/// Write `image` to `path`, encoding chosen by extension
pub fn save_snapshot(image: &PackedImage, path: &Path) -> Result<(), ImageError> {
    let bytes = encode(image, SnapshotFormat::from_path(path))?;
    std::fs::write(path, bytes)?;
    Ok(())
}
