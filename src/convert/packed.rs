use image::{GrayImage, RgbaImage};

use crate::error::FrameError;

/// Bytes per pixel of every packed image (RGBA8)
pub const BYTES_PER_PIXEL: usize = 4;

/// Interleaved RGBA image, `width * height * 4` bytes, row-major, no padding.
///
/// The buffer length is checked on construction, so every stage downstream
/// can rely on it.
#[derive(Clone, PartialEq, Eq)]
pub struct PackedImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PackedImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(FrameError::invalid(format!(
                "packed {}x{} image needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Image with every pixel set to `rgba`
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            data: rgba.repeat(pixels),
        }
    }

    /// Re-expand an intensity image so each value `g` becomes `(g, g, g, 255)`
    pub fn from_gray(gray: &GrayImage) -> Self {
        let mut data = Vec::with_capacity(gray.as_raw().len() * BYTES_PER_PIXEL);
        for &g in gray.as_raw() {
            data.extend_from_slice(&[g, g, g, u8::MAX]);
        }
        Self {
            width: gray.width(),
            height: gray.height(),
            data,
        }
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Borrowing view for `image` algorithms that need a typed buffer
    pub fn to_rgba_image(&self) -> RgbaImage {
        // Length is validated on construction
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

impl From<RgbaImage> for PackedImage {
    fn from(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        }
    }
}

impl std::fmt::Debug for PackedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}
