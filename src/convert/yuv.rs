//! Planar YUV 4:2:0 to packed RGBA.
//!
//! Planes are first interleaved into NV21 (full luma plane, then V/U pairs)
//! and the NV21 buffer is converted with BT.601 full-range coefficients.
//! Plane 2 (V) always precedes plane 1 (U) in each chroma pair.

use crate::capture::{Plane, RawFrame};
use crate::error::FrameError;

use super::packed::{PackedImage, BYTES_PER_PIXEL};

/// Convert a planar frame to RGBA
pub fn to_packed_image(frame: &RawFrame) -> Result<PackedImage, FrameError> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let [y, u, v] = validated_planes(frame)?;

    let nv21 = interleave_nv21(&y, &u, &v, width, height);
    let rgba = nv21_to_rgba(&nv21, width, height);

    PackedImage::new(frame.width(), frame.height(), rgba)
}

/// Check the 4:2:0 plane geometry and return `[Y, U, V]`
fn validated_planes(frame: &RawFrame) -> Result<[Plane<'_>; 3], FrameError> {
    if frame.plane_count() != 3 {
        return Err(FrameError::invalid(format!(
            "expected 3 planes, got {}",
            frame.plane_count()
        )));
    }
    if frame.width() == 0 || frame.height() == 0 {
        return Err(FrameError::invalid(format!(
            "empty frame {}x{}",
            frame.width(),
            frame.height()
        )));
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));

    let mut planes = [None; 3];
    for (idx, (name, cols, rows)) in [
        ("Y", width, height),
        ("U", chroma_w, chroma_h),
        ("V", chroma_w, chroma_h),
    ]
    .into_iter()
    .enumerate()
    {
        let plane = frame
            .plane(idx)
            .ok_or_else(|| FrameError::invalid(format!("missing {name} plane")))?;
        check_plane(name, &plane, cols, rows)?;
        planes[idx] = Some(plane);
    }

    match planes {
        [Some(y), Some(u), Some(v)] => Ok([y, u, v]),
        _ => Err(FrameError::invalid("missing plane")),
    }
}

fn check_plane(name: &str, plane: &Plane<'_>, cols: usize, rows: usize) -> Result<(), FrameError> {
    if plane.pixel_stride == 0 {
        return Err(FrameError::invalid(format!("{name} plane has zero pixel stride")));
    }

    let row_bytes = (cols - 1) * plane.pixel_stride + 1;
    if plane.row_stride < row_bytes {
        return Err(FrameError::invalid(format!(
            "{name} plane row stride {} is shorter than a {cols}-sample row",
            plane.row_stride
        )));
    }

    let needed = (rows - 1) * plane.row_stride + row_bytes;
    if plane.data.len() < needed {
        return Err(FrameError::invalid(format!(
            "{name} plane holds {} bytes, {cols}x{rows} samples need {needed}",
            plane.data.len()
        )));
    }
    Ok(())
}

/// Pack the planes as NV21: `width*height` luma bytes, then V/U pairs
fn interleave_nv21(y: &Plane<'_>, u: &Plane<'_>, v: &Plane<'_>, width: usize, height: usize) -> Vec<u8> {
    let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
    let mut nv21 = Vec::with_capacity(width * height + 2 * chroma_w * chroma_h);

    for row in 0..height {
        if y.pixel_stride == 1 {
            let start = row * y.row_stride;
            nv21.extend_from_slice(&y.data[start..start + width]);
        } else {
            nv21.extend((0..width).map(|col| y.sample(col, row)));
        }
    }

    for row in 0..chroma_h {
        for col in 0..chroma_w {
            nv21.push(v.sample(col, row));
            nv21.push(u.sample(col, row));
        }
    }

    nv21
}

fn nv21_to_rgba(nv21: &[u8], width: usize, height: usize) -> Vec<u8> {
    let chroma_w = width.div_ceil(2);
    let (luma, chroma) = nv21.split_at(width * height);
    let mut rgba = vec![0u8; width * height * BYTES_PER_PIXEL];

    for (row, out_row) in rgba.chunks_exact_mut(width * BYTES_PER_PIXEL).enumerate() {
        let luma_row = &luma[row * width..(row + 1) * width];
        let chroma_row = &chroma[(row / 2) * chroma_w * 2..];

        for (col, px) in out_row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let pair = (col / 2) * 2;
            let [r, g, b] = yuv_to_rgb(luma_row[col], chroma_row[pair + 1], chroma_row[pair]);
            px.copy_from_slice(&[r, g, b, u8::MAX]);
        }
    }

    rgba
}

/// BT.601 full range, 16-bit fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let r = c + ((91_881 * e + 32_768) >> 16);
    let g = c - ((22_554 * d + 46_802 * e + 32_768) >> 16);
    let b = c + ((116_130 * d + 32_768) >> 16);

    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};

    fn frame(width: u32, height: u32, planes: Vec<(Vec<u8>, usize, usize)>) -> RawFrame {
        let meta = FrameMetadata {
            sequence: 1,
            width,
            height,
            format: PixelFormat::Yu12,
            device_timestamp: None,
        };
        RawFrame::from_planes(meta, planes).unwrap()
    }

    fn uniform(width: u32, height: u32, y: u8, u: u8, v: u8) -> RawFrame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        frame(
            width,
            height,
            vec![
                (vec![y; w * h], w, 1),
                (vec![u; cw * ch], cw, 1),
                (vec![v; cw * ch], cw, 1),
            ],
        )
    }

    #[test]
    fn test_output_length() {
        for (w, h) in [(4, 4), (16, 8), (5, 3), (1, 1)] {
            let packed = to_packed_image(&uniform(w, h, 100, 128, 128)).unwrap();
            assert_eq!(packed.data().len(), (w * h * 4) as usize);
            assert_eq!(packed.dimensions(), (w, h));
        }
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let packed = to_packed_image(&uniform(4, 2, 128, 128, 128)).unwrap();
        for px in packed.data().chunks_exact(4) {
            assert_eq!(px, &[128, 128, 128, 255]);
        }
    }

    #[test]
    fn test_chroma_planes_are_not_confused() {
        // Strong U (blue difference), neutral V
        let packed = to_packed_image(&uniform(2, 2, 128, 255, 128)).unwrap();
        let px = &packed.data()[..4];
        assert_eq!(px[0], 128);
        assert_eq!(px[2], 255);

        // Strong V (red difference), neutral U
        let packed = to_packed_image(&uniform(2, 2, 128, 128, 255)).unwrap();
        let px = &packed.data()[..4];
        assert_eq!(px[0], 255);
        assert_eq!(px[2], 128);
    }

    #[test]
    fn test_nv21_pairs_put_v_first() {
        let y = Plane { data: &[0; 4], row_stride: 2, pixel_stride: 1 };
        let u = Plane { data: &[7], row_stride: 1, pixel_stride: 1 };
        let v = Plane { data: &[9], row_stride: 1, pixel_stride: 1 };
        let nv21 = interleave_nv21(&y, &u, &v, 2, 2);
        assert_eq!(&nv21[4..], &[9, 7]);
    }

    #[test]
    fn test_padded_strides_are_skipped() {
        // Luma rows padded to 8 bytes with garbage
        let mut luma = vec![255u8; 8 * 2];
        luma[..4].fill(128);
        luma[8..12].fill(128);
        let f = frame(
            4,
            2,
            vec![(luma, 8, 1), (vec![128, 128, 0, 0], 4, 1), (vec![128, 128, 0, 0], 4, 1)],
        );

        let packed = to_packed_image(&f).unwrap();
        assert!(packed.data().chunks_exact(4).all(|px| px == [128, 128, 128, 255]));
    }

    #[test]
    fn test_semi_planar_pixel_stride() {
        // NV12-style chroma: U and V interleaved, pixel stride 2
        let f = RawFrame::new(
            FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                format: PixelFormat::Nv12,
                device_timestamp: None,
            },
            crate::capture::PooledBuffer::unpooled(vec![128, 128, 128, 128, 255, 128]),
            PixelFormat::Nv12.plane_layouts(2, 2),
        )
        .unwrap();

        let packed = to_packed_image(&f).unwrap();
        assert_eq!(&packed.data()[..4], &[128, 128 - 44, 255, 255]);
    }

    #[test]
    fn test_wrong_plane_count() {
        let f = frame(2, 2, vec![(vec![0; 4], 2, 1), (vec![0; 1], 1, 1)]);
        assert!(matches!(
            to_packed_image(&f),
            Err(FrameError::InvalidFrameFormat(_))
        ));
    }

    #[test]
    fn test_full_resolution_chroma_rejected_when_short() {
        let f = frame(
            4,
            4,
            vec![(vec![0; 16], 4, 1), (vec![0; 2], 2, 1), (vec![0; 4], 2, 1)],
        );
        assert!(matches!(
            to_packed_image(&f),
            Err(FrameError::InvalidFrameFormat(_))
        ));
    }

    #[test]
    fn test_stride_narrower_than_row_rejected() {
        let f = frame(
            4,
            2,
            vec![(vec![0; 8], 3, 1), (vec![0; 2], 2, 1), (vec![0; 2], 2, 1)],
        );
        assert!(to_packed_image(&f).is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        let f = frame(0, 0, vec![(vec![], 0, 1), (vec![], 0, 1), (vec![], 0, 1)]);
        assert!(to_packed_image(&f).is_err());
    }
}
