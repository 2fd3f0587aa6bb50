//! Counters shared between the capture worker, the renderer, and the
//! control surface

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::error::FrameError;

/// Lock-free pipeline statistics
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: CachePadded<AtomicU64>,
    frames_processed: CachePadded<AtomicU64>,
    processing_failures: AtomicU64,
    invalid_frames: AtomicU64,
    upload_failures: AtomicU64,
    frames_uploaded: CachePadded<AtomicU64>,
    frames_superseded: AtomicU64,
    fps_bits: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_processed: u64,
    pub processing_failures: u64,
    pub invalid_frames: u64,
    pub upload_failures: u64,
    pub frames_uploaded: u64,
    pub frames_superseded: u64,
    pub fps: f64,
}

impl PipelineStats {
    pub fn new(initial_fps: f64) -> Self {
        let stats = Self::default();
        stats.set_fps(initial_fps);
        stats
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_received").increment(1);
    }

    pub fn record_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_processed").increment(1);
    }

    pub fn record_uploaded(&self) {
        self.frames_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.frames_superseded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_superseded").increment(1);
    }

    /// Count a per-frame failure under its taxonomy bucket
    pub fn record_error(&self, error: &FrameError) {
        let (counter, name) = match error {
            FrameError::InvalidFrameFormat(_) => (&self.invalid_frames, "invalid_frames"),
            FrameError::ProcessingFailure { .. } => {
                (&self.processing_failures, "processing_failures")
            }
            FrameError::UploadFailure(_) => (&self.upload_failures, "upload_failures"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(name).increment(1);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        metrics::gauge!("capture_fps").set(fps);
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
            invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            frames_uploaded: self.frames_uploaded.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            fps: self.fps(),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fps={:.1} received={} processed={} uploaded={} superseded={} \
             invalid={} processing_failures={} upload_failures={}",
            self.fps,
            self.frames_received,
            self.frames_processed,
            self.frames_uploaded,
            self.frames_superseded,
            self.invalid_frames,
            self.processing_failures,
            self.upload_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ProcessingMode;

    #[test]
    fn test_errors_land_in_their_bucket() {
        let stats = PipelineStats::new(0.0);
        stats.record_error(&FrameError::invalid("bad"));
        stats.record_error(&FrameError::upload("lost"));
        stats.record_error(&FrameError::upload("lost again"));
        stats.record_error(&FrameError::ProcessingFailure {
            mode: ProcessingMode::EdgeMap,
            reason: "x".into(),
        });

        let snap = stats.snapshot();
        assert_eq!(snap.invalid_frames, 1);
        assert_eq!(snap.upload_failures, 2);
        assert_eq!(snap.processing_failures, 1);
    }

    #[test]
    fn test_fps_roundtrip() {
        let stats = PipelineStats::new(15.0);
        assert_eq!(stats.fps(), 15.0);
        stats.set_fps(29.97);
        assert_eq!(stats.snapshot().fps, 29.97);
    }
}
