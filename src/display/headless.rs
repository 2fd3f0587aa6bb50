//! Host-memory texture target for running without a window

use super::{check_upload_layout, TextureBackend};
use crate::convert::PackedImage;
use crate::error::FrameError;

/// Keeps the last uploaded image in memory and counts draws
#[derive(Debug, Default)]
pub struct HeadlessTarget {
    texture: Option<PackedImage>,
    uploads: u64,
    presents: u64,
}

impl HeadlessTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image currently held as the texture
    pub fn texture(&self) -> Option<&PackedImage> {
        self.texture.as_ref()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl TextureBackend for HeadlessTarget {
    fn upload(&mut self, image: &PackedImage) -> Result<(), FrameError> {
        check_upload_layout(image)?;
        self.texture = Some(image.clone());
        self.uploads += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<(), FrameError> {
        self.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_replaces_texture() {
        let mut target = HeadlessTarget::new();
        target.upload(&PackedImage::filled(2, 1, [1, 2, 3, 255])).unwrap();
        target.upload(&PackedImage::filled(3, 1, [4, 5, 6, 255])).unwrap();

        assert_eq!(target.uploads(), 2);
        assert_eq!(target.texture().unwrap().dimensions(), (3, 1));
    }

    #[test]
    fn test_rejected_upload_keeps_previous_texture() {
        let mut target = HeadlessTarget::new();
        let good = PackedImage::filled(2, 2, [7, 7, 7, 255]);
        target.upload(&good).unwrap();

        let err = target.upload(&PackedImage::filled(0, 2, [0; 4])).unwrap_err();
        assert!(matches!(err, FrameError::UploadFailure(_)));
        assert_eq!(target.texture(), Some(&good));
        assert_eq!(target.uploads(), 1);
    }
}
