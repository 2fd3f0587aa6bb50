//! [`ImageOps`] backed by OpenCV `imgproc`

use image::GrayImage;
use opencv::{
    core::{self, Mat, Scalar, Size},
    imgproc,
    prelude::*,
};

use super::ImageOps;
use crate::convert::PackedImage;
use crate::error::OpsError;

/// Sobel aperture used by Canny
const CANNY_APERTURE: i32 = 3;

/// OpenCV implementation of the image-processing capability
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvOps;

impl ImageOps for OpenCvOps {
    fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError> {
        let rgba = to_mat(image.width(), image.height(), core::CV_8UC4, image.data())?;

        let mut gray = Mat::default();
        imgproc::cvt_color(&rgba, &mut gray, imgproc::COLOR_RGBA2GRAY, 0)
            .map_err(|e| OpsError::Other(format!("Failed to convert RGBA to gray: {:?}", e)))?;

        to_gray_image(&gray)
    }

    fn blur(&self, gray: &GrayImage, kernel_size: u32, sigma: f32) -> Result<GrayImage, OpsError> {
        let src = gray_to_mat(gray)?;
        let ksize = i32::try_from(kernel_size)
            .map_err(|_| OpsError::Other(format!("blur kernel size {kernel_size} out of range")))?;

        let mut dst = Mat::default();
        imgproc::gaussian_blur(
            &src,
            &mut dst,
            Size::new(ksize, ksize),
            sigma as f64,
            sigma as f64,
            core::BORDER_DEFAULT,
        )
        .map_err(|e| OpsError::Other(format!("Failed to blur: {:?}", e)))?;

        to_gray_image(&dst)
    }

    fn edges(&self, gray: &GrayImage, low: f32, high: f32) -> Result<GrayImage, OpsError> {
        let src = gray_to_mat(gray)?;

        let mut dst = Mat::default();
        imgproc::canny(&src, &mut dst, low as f64, high as f64, CANNY_APERTURE, false)
            .map_err(|e| OpsError::Other(format!("Failed to run Canny: {:?}", e)))?;

        to_gray_image(&dst)
    }
}

fn gray_to_mat(gray: &GrayImage) -> Result<Mat, OpsError> {
    to_mat(gray.width(), gray.height(), core::CV_8UC1, gray.as_raw())
}

/// Copy a tightly packed buffer into a freshly allocated Mat
fn to_mat(width: u32, height: u32, typ: i32, data: &[u8]) -> Result<Mat, OpsError> {
    let dims = || OpsError::Dimensions { width, height };
    let rows = i32::try_from(height).map_err(|_| dims())?;
    let cols = i32::try_from(width).map_err(|_| dims())?;

    let mut mat = Mat::new_rows_cols_with_default(rows, cols, typ, Scalar::all(0.))
        .map_err(|e| OpsError::Other(format!("Failed to create Mat: {:?}", e)))?;
    let bytes = mat
        .data_bytes_mut()
        .map_err(|e| OpsError::Other(format!("Failed to access Mat: {:?}", e)))?;
    if bytes.len() != data.len() {
        return Err(dims());
    }
    bytes.copy_from_slice(data);

    Ok(mat)
}

fn to_gray_image(mat: &Mat) -> Result<GrayImage, OpsError> {
    let (width, height) = (mat.cols().max(0) as u32, mat.rows().max(0) as u32);
    let data = mat
        .data_bytes()
        .map_err(|e| OpsError::Other(format!("Failed to read Mat: {:?}", e)))?
        .to_vec();

    GrayImage::from_raw(width, height, data).ok_or(OpsError::Dimensions { width, height })
}
