use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::pool::PooledBuffer;
use crate::error::FrameError;

/// Planar sensor frame with its buffer leased from the capture pool.
///
/// Planes are always ordered `[Y, U, V]` regardless of how the sensor laid
/// them out in memory. Dropping the frame releases the buffer.
pub struct RawFrame {
    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    buffer: PooledBuffer,
    planes: Vec<PlaneLayout>,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Location of one plane inside the frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub len: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// Borrowed view of a single plane
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// 4:2:0 layouts a sensor may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Y, U, V planes (I420)
    Yu12,
    /// Y, V, U planes
    Yv12,
    /// Y plane, interleaved UV
    Nv12,
    /// Y plane, interleaved VU
    Nv21,
}

impl PixelFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Yu12 => *b"YU12",
            PixelFormat::Yv12 => *b"YV12",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Nv21 => *b"NV21",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YU12" => Some(PixelFormat::Yu12),
            b"YV12" => Some(PixelFormat::Yv12),
            b"NV12" => Some(PixelFormat::Nv12),
            b"NV21" => Some(PixelFormat::Nv21),
            _ => None,
        }
    }

    /// Bytes needed for one contiguous frame with the given luma stride
    pub fn frame_size(self, height: u32, stride: usize) -> usize {
        let rows = height as usize;
        let chroma_rows = rows.div_ceil(2);
        match self {
            PixelFormat::Yu12 | PixelFormat::Yv12 => {
                stride * rows + 2 * stride.div_ceil(2) * chroma_rows
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                stride * rows + semi_planar_stride(stride) * chroma_rows
            }
        }
    }

    /// `[Y, U, V]` plane layouts for a contiguous frame buffer
    pub fn plane_layouts(self, height: u32, stride: usize) -> Vec<PlaneLayout> {
        let rows = height as usize;
        let chroma_rows = rows.div_ceil(2);
        let luma = PlaneLayout {
            offset: 0,
            len: stride * rows,
            row_stride: stride,
            pixel_stride: 1,
        };
        let chroma_base = luma.len;

        match self {
            PixelFormat::Yu12 | PixelFormat::Yv12 => {
                let chroma_stride = stride.div_ceil(2);
                let chroma_len = chroma_stride * chroma_rows;
                let first = PlaneLayout {
                    offset: chroma_base,
                    len: chroma_len,
                    row_stride: chroma_stride,
                    pixel_stride: 1,
                };
                let second = PlaneLayout {
                    offset: chroma_base + chroma_len,
                    ..first
                };
                if self == PixelFormat::Yu12 {
                    vec![luma, first, second]
                } else {
                    vec![luma, second, first]
                }
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let chroma_stride = semi_planar_stride(stride);
                let region = chroma_stride * chroma_rows;
                let first = PlaneLayout {
                    offset: chroma_base,
                    len: region,
                    row_stride: chroma_stride,
                    pixel_stride: 2,
                };
                let second = PlaneLayout {
                    offset: chroma_base + 1,
                    len: region.saturating_sub(1),
                    row_stride: chroma_stride,
                    pixel_stride: 2,
                };
                if self == PixelFormat::Nv12 {
                    vec![luma, first, second]
                } else {
                    vec![luma, second, first]
                }
            }
        }
    }
}

/// Row stride of an interleaved chroma plane: `ceil(w / 2)` pairs must fit,
/// so an odd luma stride is rounded up
fn semi_planar_stride(luma_stride: usize) -> usize {
    luma_stride.next_multiple_of(2)
}

impl RawFrame {
    /// Build a frame over a leased buffer.
    ///
    /// Fails if any plane reaches past the end of the buffer; the buffer is
    /// released in that case as well.
    pub fn new(
        meta: FrameMetadata,
        buffer: PooledBuffer,
        planes: Vec<PlaneLayout>,
    ) -> Result<Self, FrameError> {
        for (idx, plane) in planes.iter().enumerate() {
            let fits = plane
                .offset
                .checked_add(plane.len)
                .is_some_and(|end| end <= buffer.len());
            if !fits {
                return Err(FrameError::invalid(format!(
                    "plane {idx} spans {}..{} but buffer holds {} bytes",
                    plane.offset,
                    plane.offset.saturating_add(plane.len),
                    buffer.len()
                )));
            }
        }

        Ok(Self {
            meta,
            timestamp: Instant::now(),
            buffer,
            planes,
        })
    }

    /// Build an unpooled frame from separately owned planes
    /// (`data`, `row_stride`, `pixel_stride`).
    pub fn from_planes(
        meta: FrameMetadata,
        planes: Vec<(Vec<u8>, usize, usize)>,
    ) -> Result<Self, FrameError> {
        let total = planes.iter().map(|(data, _, _)| data.len()).sum();
        let mut buffer = Vec::with_capacity(total);
        let mut layouts = Vec::with_capacity(planes.len());

        for (data, row_stride, pixel_stride) in planes {
            layouts.push(PlaneLayout {
                offset: buffer.len(),
                len: data.len(),
                row_stride,
                pixel_stride,
            });
            buffer.extend_from_slice(&data);
        }

        Self::new(meta, PooledBuffer::unpooled(buffer), layouts)
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<Plane<'_>> {
        let layout = self.planes.get(index)?;
        Some(Plane {
            data: &self.buffer[layout.offset..layout.offset + layout.len],
            row_stride: layout.row_stride,
            pixel_stride: layout.pixel_stride,
        })
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("meta", &self.meta)
            .field("planes", &self.planes)
            .finish_non_exhaustive()
    }
}

impl<'a> Plane<'a> {
    /// Sample at (`col`, `row`); the caller has validated the plane geometry
    #[inline]
    pub fn sample(&self, col: usize, row: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32, format: PixelFormat) -> FrameMetadata {
        FrameMetadata {
            sequence: 0,
            width,
            height,
            format,
            device_timestamp: None,
        }
    }

    #[test]
    fn test_yu12_layouts() {
        let layouts = PixelFormat::Yu12.plane_layouts(4, 4);
        assert_eq!(layouts[0].len, 16);
        assert_eq!(layouts[1].offset, 16);
        assert_eq!(layouts[1].row_stride, 2);
        assert_eq!(layouts[2].offset, 20);
        assert_eq!(PixelFormat::Yu12.frame_size(4, 4), 24);
    }

    #[test]
    fn test_yv12_orders_planes_yuv() {
        let layouts = PixelFormat::Yv12.plane_layouts(4, 4);
        // V sits first in memory, but plane 1 is still U
        assert_eq!(layouts[1].offset, 20);
        assert_eq!(layouts[2].offset, 16);
    }

    #[test]
    fn test_nv21_interleaved_offsets() {
        let layouts = PixelFormat::Nv21.plane_layouts(4, 4);
        assert_eq!(layouts[1].offset, 17);
        assert_eq!(layouts[2].offset, 16);
        assert_eq!(layouts[1].pixel_stride, 2);
        assert_eq!(PixelFormat::Nv21.frame_size(4, 4), 24);
    }

    #[test]
    fn test_odd_width_layouts_fit_every_chroma_sample() {
        for format in [
            PixelFormat::Yu12,
            PixelFormat::Yv12,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
        ] {
            let (width, height) = (641usize, 481usize);
            let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
            let size = format.frame_size(height as u32, width);

            for (idx, layout) in format.plane_layouts(height as u32, width).iter().enumerate() {
                let (cols, rows) = if idx == 0 { (width, height) } else { (cw, ch) };
                let last = layout.offset
                    + (rows - 1) * layout.row_stride
                    + (cols - 1) * layout.pixel_stride;
                assert!(last < size, "{format:?} plane {idx} ends at {last}, frame is {size}");
                assert!(last < layout.offset + layout.len, "{format:?} plane {idx}");
            }
        }
    }

    #[test]
    fn test_nv12_odd_stride_rounds_chroma_rows_up() {
        let layouts = PixelFormat::Nv12.plane_layouts(3, 3);
        assert_eq!(layouts[1].row_stride, 4);
        assert_eq!(layouts[1].offset, 9);
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }

    #[test]
    fn test_plane_out_of_bounds_rejected() {
        let layouts = PixelFormat::Yu12.plane_layouts(4, 4);
        let buffer = PooledBuffer::unpooled(vec![0; 20]);
        let err = RawFrame::new(meta(4, 4, PixelFormat::Yu12), buffer, layouts).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrameFormat(_)));
    }

    #[test]
    fn test_from_planes_views() {
        let frame = RawFrame::from_planes(
            meta(2, 2, PixelFormat::Yu12),
            vec![(vec![1, 2, 3, 4], 2, 1), (vec![5], 1, 1), (vec![6], 1, 1)],
        )
        .unwrap();

        assert_eq!(frame.plane_count(), 3);
        assert_eq!(frame.plane(0).unwrap().sample(1, 1), 4);
        assert_eq!(frame.plane(2).unwrap().data, &[6]);
        assert!(frame.plane(3).is_none());
    }

    #[test]
    fn test_fourcc_roundtrip_names() {
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), Some(PixelFormat::Nv12));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
        assert_eq!(&PixelFormat::Yv12.fourcc(), b"YV12");
    }
}
