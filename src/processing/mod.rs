//! Per-frame image transforms.
//!
//! The heavy algorithms live behind [`ImageOps`]; [`FrameProcessor`] only
//! sequences them per [`ProcessingMode`] and guarantees an RGBA result of the
//! input's size.

#[cfg(feature = "opencv")]
pub mod cv;
pub mod native;

#[cfg(feature = "opencv")]
pub use cv::OpenCvOps;
pub use native::NativeOps;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::PackedImage;
use crate::error::{FrameError, OpsError};

/// Side length of the smoothing kernel applied before edge extraction
pub const BLUR_KERNEL_SIZE: u32 = 5;
/// Standard deviation of the smoothing kernel
pub const BLUR_SIGMA: f32 = 1.5;
/// Gradient hysteresis thresholds on the intensity domain
pub const EDGE_LOW_THRESHOLD: f32 = 50.0;
pub const EDGE_HIGH_THRESHOLD: f32 = 150.0;

/// Transform applied to sampled frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessingMode {
    #[default]
    Passthrough = 0,
    Grayscale = 1,
    EdgeMap = 2,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 3] = [
        ProcessingMode::Passthrough,
        ProcessingMode::Grayscale,
        ProcessingMode::EdgeMap,
    ];

    /// Label shown by the control surface
    pub fn label(self) -> &'static str {
        match self {
            ProcessingMode::Passthrough => "ORIGINAL",
            ProcessingMode::Grayscale => "GRAYSCALE",
            ProcessingMode::EdgeMap => "EDGE DETECTION",
        }
    }

    fn from_repr(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| *mode as u8 == value)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mode cell shared by the control surface (writer) and the capture worker
/// (reader). Only valid discriminants are ever stored.
#[derive(Debug, Clone)]
pub struct ModeControl {
    mode: Arc<AtomicU8>,
}

impl ModeControl {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(mode as u8)),
        }
    }

    pub fn get(&self) -> ProcessingMode {
        ProcessingMode::from_repr(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set(&self, mode: ProcessingMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }
}

impl Default for ModeControl {
    fn default() -> Self {
        Self::new(ProcessingMode::default())
    }
}

/// Image-processing capability the processor delegates to
pub trait ImageOps: Send + Sync {
    /// RGBA to single-channel intensity
    fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError>;

    /// Gaussian smoothing with a square `kernel_size` kernel
    fn blur(&self, gray: &GrayImage, kernel_size: u32, sigma: f32) -> Result<GrayImage, OpsError>;

    /// Binary edge map (0 or 255) from gradient hysteresis thresholds
    fn edges(&self, gray: &GrayImage, low: f32, high: f32) -> Result<GrayImage, OpsError>;
}

impl<T: ImageOps + ?Sized> ImageOps for Arc<T> {
    fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError> {
        (**self).to_gray(image)
    }

    fn blur(&self, gray: &GrayImage, kernel_size: u32, sigma: f32) -> Result<GrayImage, OpsError> {
        (**self).blur(gray, kernel_size, sigma)
    }

    fn edges(&self, gray: &GrayImage, low: f32, high: f32) -> Result<GrayImage, OpsError> {
        (**self).edges(gray, low, high)
    }
}

/// A transform failed; the unprocessed input is handed back
#[derive(Error)]
#[error("{mode} processing failed: {reason}")]
pub struct ProcessingFailure {
    pub mode: ProcessingMode,
    pub reason: String,
    input: PackedImage,
}

impl ProcessingFailure {
    pub fn input(&self) -> &PackedImage {
        &self.input
    }

    /// Split into the untouched input and the per-frame error to report
    pub fn into_parts(self) -> (PackedImage, FrameError) {
        let error = FrameError::ProcessingFailure {
            mode: self.mode,
            reason: self.reason,
        };
        (self.input, error)
    }
}

impl fmt::Debug for ProcessingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingFailure")
            .field("mode", &self.mode)
            .field("reason", &self.reason)
            .field("input", &self.input)
            .finish()
    }
}

/// Applies a [`ProcessingMode`] to packed images
#[derive(Debug, Clone)]
pub struct FrameProcessor<O> {
    ops: O,
}

impl<O: ImageOps> FrameProcessor<O> {
    pub fn new(ops: O) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Transform `image`. The output is always RGBA with the input's size.
    ///
    /// Errors and panics inside the capability are both reported as
    /// [`ProcessingFailure`].
    pub fn apply(
        &self,
        image: PackedImage,
        mode: ProcessingMode,
    ) -> Result<PackedImage, ProcessingFailure> {
        if mode == ProcessingMode::Passthrough {
            return Ok(image);
        }

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.transform(&image, mode)));
        metrics::histogram!("process_time_us").record(start.elapsed().as_micros() as f64);

        let reason = match result {
            Ok(Ok(output)) if output.dimensions() == image.dimensions() => return Ok(output),
            Ok(Ok(output)) => format!(
                "output is {}x{}, expected {}x{}",
                output.width(),
                output.height(),
                image.width(),
                image.height()
            ),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        Err(ProcessingFailure {
            mode,
            reason,
            input: image,
        })
    }

    fn transform(&self, image: &PackedImage, mode: ProcessingMode) -> Result<PackedImage, OpsError> {
        let gray = self.ops.to_gray(image)?;
        let gray = match mode {
            ProcessingMode::Passthrough | ProcessingMode::Grayscale => gray,
            ProcessingMode::EdgeMap => {
                let smoothed = self.ops.blur(&gray, BLUR_KERNEL_SIZE, BLUR_SIGMA)?;
                self.ops
                    .edges(&smoothed, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD)?
            }
        };
        Ok(PackedImage::from_gray(&gray))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic in image operation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn gradient(width: u32, height: u32) -> PackedImage {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8, 255]);
            }
        }
        PackedImage::new(width, height, data).unwrap()
    }

    struct FailingOps;

    impl ImageOps for FailingOps {
        fn to_gray(&self, _: &PackedImage) -> Result<GrayImage, OpsError> {
            Err(OpsError::Other("backend unavailable".into()))
        }
        fn blur(&self, g: &GrayImage, _: u32, _: f32) -> Result<GrayImage, OpsError> {
            Ok(g.clone())
        }
        fn edges(&self, g: &GrayImage, _: f32, _: f32) -> Result<GrayImage, OpsError> {
            Ok(g.clone())
        }
    }

    struct PanickingOps;

    impl ImageOps for PanickingOps {
        fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError> {
            NativeOps.to_gray(image)
        }
        fn blur(&self, _: &GrayImage, _: u32, _: f32) -> Result<GrayImage, OpsError> {
            panic!("kernel exploded")
        }
        fn edges(&self, g: &GrayImage, _: f32, _: f32) -> Result<GrayImage, OpsError> {
            Ok(g.clone())
        }
    }

    /// Records the order of calls and the parameters passed
    #[derive(Default)]
    struct RecordingOps {
        blur_calls: AtomicUsize,
        edge_calls: AtomicUsize,
    }

    impl ImageOps for RecordingOps {
        fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError> {
            NativeOps.to_gray(image)
        }
        fn blur(&self, g: &GrayImage, size: u32, sigma: f32) -> Result<GrayImage, OpsError> {
            assert_eq!(size, 5);
            assert_eq!(sigma, 1.5);
            assert_eq!(self.edge_calls.load(Ordering::SeqCst), 0);
            self.blur_calls.fetch_add(1, Ordering::SeqCst);
            Ok(g.clone())
        }
        fn edges(&self, g: &GrayImage, low: f32, high: f32) -> Result<GrayImage, OpsError> {
            assert_eq!((low, high), (50.0, 150.0));
            self.edge_calls.fetch_add(1, Ordering::SeqCst);
            Ok(g.clone())
        }
    }

    #[test]
    fn test_passthrough_is_identity() {
        let processor = FrameProcessor::new(NativeOps);
        let input = gradient(13, 7);
        let output = processor.apply(input.clone(), ProcessingMode::Passthrough).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_grayscale_is_idempotent() {
        let processor = FrameProcessor::new(NativeOps);
        let once = processor
            .apply(gradient(32, 16), ProcessingMode::Grayscale)
            .unwrap();
        let twice = processor
            .apply(once.clone(), ProcessingMode::Grayscale)
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_grayscale_output_is_uniform_rgba() {
        let processor = FrameProcessor::new(NativeOps);
        let output = processor
            .apply(gradient(8, 8), ProcessingMode::Grayscale)
            .unwrap();

        assert_eq!(output.dimensions(), (8, 8));
        for px in output.data().chunks_exact(4) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_edge_map_of_flat_image_is_empty() {
        let processor = FrameProcessor::new(NativeOps);
        let flat = PackedImage::filled(256, 256, [0, 255, 0, 255]);
        let output = processor.apply(flat, ProcessingMode::EdgeMap).unwrap();

        assert_eq!(output.dimensions(), (256, 256));
        for px in output.data().chunks_exact(4) {
            assert_eq!(px, &[0, 0, 0, 255]);
        }
    }

    #[test]
    fn test_edge_map_is_binary() {
        let processor = FrameProcessor::new(NativeOps);
        let mut img = image::RgbaImage::from_pixel(64, 64, image::Rgba([0, 0, 0, 255]));
        for y in 16..48 {
            for x in 16..48 {
                img.put_pixel(x, y, image::Rgba([255, 255, 255, 255]));
            }
        }
        let output = processor
            .apply(PackedImage::from(img), ProcessingMode::EdgeMap)
            .unwrap();

        assert!(output
            .data()
            .chunks_exact(4)
            .all(|px| (px[0] == 0 || px[0] == 255) && px[3] == 255));
        assert!(output.data().chunks_exact(4).any(|px| px[0] == 255));
    }

    #[test]
    fn test_edge_map_blurs_before_edges() {
        let processor = FrameProcessor::new(RecordingOps::default());
        processor
            .apply(gradient(8, 8), ProcessingMode::EdgeMap)
            .unwrap();

        assert_eq!(processor.ops().blur_calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.ops().edge_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ops_error_returns_input() {
        let processor = FrameProcessor::new(FailingOps);
        let input = gradient(4, 4);
        let failure = processor
            .apply(input.clone(), ProcessingMode::Grayscale)
            .unwrap_err();

        assert_eq!(failure.mode, ProcessingMode::Grayscale);
        assert!(failure.reason.contains("backend unavailable"));
        let (returned, error) = failure.into_parts();
        assert_eq!(returned, input);
        assert!(matches!(error, FrameError::ProcessingFailure { .. }));
    }

    #[test]
    fn test_ops_panic_is_caught() {
        let processor = FrameProcessor::new(PanickingOps);
        let failure = processor
            .apply(gradient(4, 4), ProcessingMode::EdgeMap)
            .unwrap_err();

        assert!(failure.reason.contains("kernel exploded"));
        assert_eq!(failure.input().dimensions(), (4, 4));
    }

    #[test]
    fn test_mode_control_roundtrip() {
        let control = ModeControl::new(ProcessingMode::EdgeMap);
        let reader = control.clone();
        assert_eq!(reader.get(), ProcessingMode::EdgeMap);

        control.set(ProcessingMode::Grayscale);
        assert_eq!(reader.get(), ProcessingMode::Grayscale);
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(ProcessingMode::Passthrough.to_string(), "ORIGINAL");
        assert_eq!(ProcessingMode::EdgeMap.label(), "EDGE DETECTION");
    }
}
