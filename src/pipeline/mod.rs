//! Per-frame orchestration: convert, sample, process, publish.

pub mod stats;
pub mod throughput;
pub mod worker;

pub use stats::{PipelineStats, StatsSnapshot};
pub use throughput::ThroughputTracker;
pub use worker::CaptureWorker;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::RawFrame;
use crate::convert::{PackedImage, PixelFormatConverter};
use crate::display::FrameHandoff;
use crate::processing::{FrameProcessor, ImageOps, ProcessingMode};
use crate::PipelineConfig;

/// What is shown for frames that are not sampled for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Publish the converted, unprocessed frame
    #[default]
    Raw,
    /// Re-publish the last processed image while the mode and size match
    HoldLast,
}

/// Result of handling one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Sampled and transformed
    Processed,
    /// Not sampled; the converted frame was published
    Raw,
    /// Not sampled; the previous processed image was published again
    Held,
    /// Sampled but processing failed; the converted frame was published
    Fallback,
    /// Conversion failed; nothing was published
    Dropped,
}

/// Capture-side half of the pipeline
pub struct FramePipeline<O> {
    converter: PixelFormatConverter,
    processor: FrameProcessor<O>,
    throughput: ThroughputTracker,
    sample_interval: u32,
    counter: u32,
    skip_policy: SkipPolicy,
    last_processed: Option<(ProcessingMode, Arc<PackedImage>)>,
    handoff: FrameHandoff,
}

impl<O: ImageOps> FramePipeline<O> {
    pub fn new(ops: O, handoff: FrameHandoff, config: &PipelineConfig) -> Self {
        Self {
            converter: PixelFormatConverter::new(),
            processor: FrameProcessor::new(ops),
            throughput: ThroughputTracker::new(Instant::now(), config.initial_fps),
            sample_interval: config.sample_interval.max(1),
            counter: 0,
            skip_policy: config.skip_policy,
            last_processed: None,
            handoff,
        }
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        self.handoff.stats()
    }

    pub fn handoff(&self) -> &FrameHandoff {
        &self.handoff
    }

    pub fn processor(&self) -> &FrameProcessor<O> {
        &self.processor
    }

    pub fn sample_interval(&self) -> u32 {
        self.sample_interval
    }

    /// Rate published by the last closed throughput window
    pub fn current_fps(&self) -> f64 {
        self.throughput.current_rate()
    }

    /// Handle one captured frame under `mode`.
    ///
    /// The frame is consumed on every path, which returns its buffer to the
    /// capture pool before this returns.
    pub fn on_frame(&mut self, frame: RawFrame, mode: ProcessingMode) -> FrameOutcome {
        let stats = Arc::clone(self.handoff.stats());

        if let Some(fps) = self.throughput.record_arrival(frame.timestamp) {
            stats.set_fps(fps);
        }
        stats.record_received();

        let sampled = self.counter % self.sample_interval == 0;
        self.counter = self.counter.wrapping_add(1);

        let converted = self.converter.to_packed_image(&frame);
        let sequence = frame.meta.sequence;
        drop(frame);

        let image = match converted {
            Ok(image) => image,
            Err(e) => {
                warn!(sequence, error = %e, "Dropping frame");
                stats.record_error(&e);
                return FrameOutcome::Dropped;
            }
        };

        if !sampled {
            return self.publish_skipped(image, mode);
        }

        match self.processor.apply(image, mode) {
            Ok(processed) => {
                debug!(sequence, %mode, "Processed frame");
                stats.record_processed();
                let processed = Arc::new(processed);
                if self.skip_policy == SkipPolicy::HoldLast {
                    self.last_processed = Some((mode, Arc::clone(&processed)));
                }
                self.handoff.set_pending(processed);
                FrameOutcome::Processed
            }
            Err(failure) => {
                let (input, error) = failure.into_parts();
                warn!(sequence, error = %error, "Showing unprocessed frame");
                stats.record_error(&error);
                // The held image no longer reflects the scene
                self.last_processed = None;
                self.handoff.set_pending(input);
                FrameOutcome::Fallback
            }
        }
    }

    fn publish_skipped(&mut self, image: PackedImage, mode: ProcessingMode) -> FrameOutcome {
        if self.skip_policy == SkipPolicy::HoldLast && mode != ProcessingMode::Passthrough {
            let held = self
                .last_processed
                .as_ref()
                .filter(|(held_mode, held)| {
                    *held_mode == mode && held.dimensions() == image.dimensions()
                })
                .map(|(_, held)| Arc::clone(held));

            if let Some(held) = held {
                self.handoff.set_pending(held);
                return FrameOutcome::Held;
            }
        }

        self.handoff.set_pending(image);
        FrameOutcome::Raw
    }
}
