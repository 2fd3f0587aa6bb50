//! Camera-less frame source producing a moving test pattern.
//!
//! Used when no sensor is present and as the producer in pipeline tests.

use std::time::{Duration, Instant};

use super::frame::{FrameMetadata, PixelFormat, PlaneLayout, RawFrame};
use super::pool::BufferPool;
use super::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

const SQUARE_SIZE: u32 = 48;

/// Test pattern source: luma gradient with a bright square sweeping across
pub struct SyntheticSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    layouts: Vec<PlaneLayout>,
    pool: BufferPool,
    frame_interval: Option<Duration>,
    next_deadline: Instant,
    sequence: u64,
}

impl SyntheticSource {
    /// Source paced to `config.fps`
    pub fn new(config: &CaptureConfig) -> Self {
        let mut source = Self::unpaced(
            config.width,
            config.height,
            config.format,
            config.buffer_count as usize,
        );
        source.frame_interval = Some(Duration::from_secs(1) / config.fps.max(1));
        source
    }

    /// Source that returns frames as fast as they are requested
    pub fn unpaced(width: u32, height: u32, format: PixelFormat, buffer_count: usize) -> Self {
        let stride = width as usize;
        Self {
            width,
            height,
            format,
            layouts: format.plane_layouts(height, stride),
            pool: BufferPool::new(buffer_count, format.frame_size(height, stride)),
            frame_interval: None,
            next_deadline: Instant::now(),
            sequence: 0,
        }
    }

    /// Handle on the pool, for observing buffer release
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };

        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
            self.next_deadline += interval;
        } else {
            // Fell behind; do not try to catch up with a burst
            self.next_deadline = now + interval;
        }
    }

    fn paint(&self, buffer: &mut [u8]) {
        let t = self.sequence as u32;
        let (w, h) = (self.width, self.height);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        let span = w.saturating_sub(SQUARE_SIZE).max(1);
        let sq_x = (t * 4) % span;
        let sq_y = h.saturating_sub(SQUARE_SIZE) / 2;
        let in_square = |x: u32, y: u32| {
            (sq_x..sq_x + SQUARE_SIZE).contains(&x) && (sq_y..sq_y + SQUARE_SIZE).contains(&y)
        };

        write_plane(buffer, &self.layouts[0], w, h, |x, y| {
            if in_square(x, y) {
                235
            } else {
                (16 + (x + y + t) % 128) as u8
            }
        });
        write_plane(buffer, &self.layouts[1], cw, ch, |x, _| (96 + (x * 2 + t) % 64) as u8);
        write_plane(buffer, &self.layouts[2], cw, ch, |_, y| (96 + (y * 2) % 64) as u8);
    }
}

fn write_plane(
    buffer: &mut [u8],
    layout: &PlaneLayout,
    cols: u32,
    rows: u32,
    value: impl Fn(u32, u32) -> u8,
) {
    for y in 0..rows {
        let row_start = layout.offset + y as usize * layout.row_stride;
        for x in 0..cols {
            buffer[row_start + x as usize * layout.pixel_stride] = value(x, y);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        self.pace();
        self.sequence += 1;

        let Some(mut buffer) = self.pool.acquire() else {
            metrics::counter!("capture_dropped_frames").increment(1);
            return Ok(None);
        };
        self.paint(&mut buffer);

        let meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            format: self.format,
            device_timestamp: None,
        };

        RawFrame::new(meta, buffer, self.layouts.clone())
            .map(Some)
            .map_err(|e| CaptureError::Unsupported(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{} {:?}", self.width, self.height, self.format)
    }
}
