//! Hand-off of packed images to the render side and texture upload.
//!
//! The capture worker publishes through a [`FrameHandoff`]; the render loop
//! owns the [`TextureSink`] and calls [`TextureSink::draw_frame`] at its own
//! cadence.

#[cfg(feature = "gpu-display")]
pub mod gpu;
pub mod headless;
#[cfg(feature = "gpu-display")]
pub mod window;

#[cfg(feature = "gpu-display")]
pub use gpu::GpuTexture;
pub use headless::HeadlessTarget;
#[cfg(feature = "gpu-display")]
pub use window::run_viewer;

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tracing::warn;

use crate::convert::PackedImage;
use crate::error::FrameError;
use crate::pipeline::PipelineStats;

/// Destination that can hold one RGBA texture and draw it full-screen
pub trait TextureBackend {
    /// Replace the whole texture with `image`.
    ///
    /// Implementations reject buffers that are not `width * height * 4`
    /// bytes with [`FrameError::UploadFailure`].
    fn upload(&mut self, image: &PackedImage) -> Result<(), FrameError>;

    /// Draw the current texture as a full-screen quad
    fn present(&mut self) -> Result<(), FrameError>;
}

/// Single-slot, latest-wins exchange between capture and render contexts
#[derive(Debug, Clone)]
pub struct FrameHandoff {
    slot: Arc<ArcSwapOption<PackedImage>>,
    stats: Arc<PipelineStats>,
}

impl FrameHandoff {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            slot: Arc::new(ArcSwapOption::empty()),
            stats,
        }
    }

    /// Publish `image`, discarding any image the renderer has not taken yet
    pub fn set_pending(&self, image: impl Into<Arc<PackedImage>>) {
        if self.slot.swap(Some(image.into())).is_some() {
            self.stats.record_superseded();
        }
    }

    /// Take the pending image, leaving the slot empty
    pub fn take(&self) -> Option<Arc<PackedImage>> {
        self.slot.swap(None)
    }

    pub fn has_pending(&self) -> bool {
        self.slot.load().is_some()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

/// What a [`TextureSink::draw_frame`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A new image was uploaded and drawn
    Uploaded,
    /// No new image; the previous texture was drawn again
    Redrawn,
    /// The new image could not be uploaded; the previous texture was drawn
    UploadFailed,
}

/// Render-side owner of the texture
pub struct TextureSink<B> {
    handoff: FrameHandoff,
    backend: B,
}

impl<B: TextureBackend> TextureSink<B> {
    pub fn new(handoff: FrameHandoff, backend: B) -> Self {
        Self { handoff, backend }
    }

    pub fn set_pending(&self, image: impl Into<Arc<PackedImage>>) {
        self.handoff.set_pending(image);
    }

    pub fn handoff(&self) -> &FrameHandoff {
        &self.handoff
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Upload the pending image if there is one, then draw.
    ///
    /// Upload failures are logged and counted; the previous texture stays on
    /// screen. Only a failure to present is returned.
    pub fn draw_frame(&mut self) -> Result<DrawOutcome, FrameError> {
        let render_start = Instant::now();

        let outcome = match self.handoff.take() {
            Some(image) => match self.backend.upload(&image) {
                Ok(()) => {
                    self.handoff.stats().record_uploaded();
                    DrawOutcome::Uploaded
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        width = image.width(),
                        height = image.height(),
                        "Keeping previous texture"
                    );
                    self.handoff.stats().record_error(&e);
                    DrawOutcome::UploadFailed
                }
            },
            None => DrawOutcome::Redrawn,
        };

        self.backend.present()?;

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        Ok(outcome)
    }
}

/// Check that `image` matches the 4-channel texture layout exactly
pub(crate) fn check_upload_layout(image: &PackedImage) -> Result<(), FrameError> {
    let expected = PackedImage::expected_len(image.width(), image.height());
    if image.width() == 0 || image.height() == 0 || image.data().len() != expected {
        return Err(FrameError::upload(format!(
            "{}x{} image with {} bytes does not match RGBA8 layout",
            image.width(),
            image.height(),
            image.data().len()
        )));
    }
    Ok(())
}
