//! V4L2 capture of planar 4:2:0 frames into pooled buffers

use std::io;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{FrameMetadata, PixelFormat, PlaneLayout, RawFrame};
use super::pool::BufferPool;
use super::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// V4L2 capture streaming YU12/YV12/NV12/NV21
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_size: usize,
    layouts: Vec<PlaneLayout>,
    pool: BufferPool,
    sequence: u64,
    dropped: u64,
}

impl V4l2Capture {
    /// Open the device and negotiate a planar format
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported(format!(
                "{} does not support video capture",
                config.device
            )));
        }

        // Set format
        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&config.format.fourcc());
        let actual = device.set_format(&fmt)?;

        // The driver may substitute a format it prefers
        let format = PixelFormat::from_fourcc(&actual.fourcc.repr).ok_or_else(|| {
            CaptureError::Unsupported(format!("driver negotiated {}", actual.fourcc))
        })?;
        if format != config.format {
            warn!(
                requested = ?config.format,
                negotiated = ?format,
                "Driver substituted pixel format"
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Failed to set frame rate to {}: {}", config.fps, e);
        }

        let stride = if actual.stride == 0 {
            actual.width as usize
        } else {
            actual.stride as usize
        };
        let frame_size = format.frame_size(actual.height, stride);
        let layouts = format.plane_layouts(actual.height, stride);
        let pool = BufferPool::new(config.buffer_count as usize, frame_size);

        info!(
            "Negotiated {}x{} {:?}, stride {}, {} bytes/frame",
            actual.width, actual.height, format, stride, frame_size
        );

        Ok(Self {
            device: Box::new(device),
            stream: None,
            width: actual.width,
            height: actual.height,
            config,
            format,
            frame_size,
            layouts,
            pool,
            sequence: 0,
            dropped: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        // A stalled sensor must not park the capture thread past shutdown
        let timeout = dequeue_timeout(self.config.fps);
        stream.set_timeout(timeout);

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers, {:?} dequeue timeout",
            self.config.buffer_count, timeout
        );
        Ok(())
    }

    /// Frames dropped because no pool buffer was free
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Floor for the dequeue timeout at high frame rates
const MIN_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(50);

/// Two frame intervals at `fps`
fn dequeue_timeout(fps: u32) -> Duration {
    (Duration::from_secs(2) / fps.max(1)).max(MIN_DEQUEUE_TIMEOUT)
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self), level = "trace")]
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::StreamNotStarted)?;

        // Waits for the next buffer, at most the dequeue timeout
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                debug!("No frame within dequeue timeout");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.sequence += 1;

        // Keep only the latest: without a free buffer this frame is skipped
        let Some(mut buffer) = self.pool.acquire() else {
            self.dropped += 1;
            metrics::counter!("capture_dropped_frames").increment(1);
            debug!(sequence = self.sequence, "Pool exhausted, dropping frame");
            return Ok(None);
        };

        if buf.len() < self.frame_size {
            warn!(
                got = buf.len(),
                expected = self.frame_size,
                "Short capture buffer"
            );
            return Ok(None);
        }
        buffer[..self.frame_size].copy_from_slice(&buf[..self.frame_size]);

        let frame_meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            format: self.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        RawFrame::new(frame_meta, buffer, self.layouts.clone())
            .map(Some)
            .map_err(|e| CaptureError::Unsupported(e.to_string()))
    }

    fn describe(&self) -> String {
        format!(
            "v4l2 {} {}x{} {:?} @ {}fps",
            self.config.device, self.width, self.height, self.format, self.config.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_timeout_is_two_frames() {
        assert_eq!(dequeue_timeout(10), Duration::from_millis(200));
        assert_eq!(dequeue_timeout(30), Duration::from_secs(2) / 30);
    }

    #[test]
    fn test_dequeue_timeout_bounds() {
        assert_eq!(dequeue_timeout(1000), MIN_DEQUEUE_TIMEOUT);
        assert_eq!(dequeue_timeout(0), Duration::from_secs(2));
    }
}
