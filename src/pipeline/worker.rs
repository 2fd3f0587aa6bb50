//! Dedicated capture/processing thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use super::FramePipeline;
use crate::capture::FrameSource;
use crate::processing::{ImageOps, ModeControl};

/// Pause after a capture error before asking the source again
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Owns the thread that pulls frames from a source and feeds the pipeline
pub struct CaptureWorker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start the `capture` thread. With `pin_core` set the thread is pinned
    /// to that core before the first frame.
    pub fn spawn<O>(
        mut source: Box<dyn FrameSource>,
        mut pipeline: FramePipeline<O>,
        mode: ModeControl,
        pin_core: Option<usize>,
    ) -> std::io::Result<Self>
    where
        O: ImageOps + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_to_core(core);
                }
                info!(source = %source.describe(), "Capture worker started");

                while !stop.load(Ordering::Relaxed) {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            pipeline.on_frame(frame, mode.get());
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("Capture error: {}", e);
                            thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }

                info!(stats = %pipeline.stats().snapshot(), "Capture worker stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Capture worker panicked");
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pin_to_core(core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
        .is_some_and(core_affinity::set_for_current);

    if pinned {
        info!(core, "Pinned capture worker");
    } else {
        warn!(core, "Could not pin capture worker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, RawFrame, SyntheticSource};
    use crate::display::{FrameHandoff, HeadlessTarget, TextureSink};
    use crate::error::CaptureError;
    use crate::pipeline::PipelineStats;
    use crate::processing::{NativeOps, ProcessingMode};
    use crate::PipelineConfig;
    use std::time::Instant;

    /// Fails every other call
    struct FlakySource {
        inner: SyntheticSource,
        calls: u64,
    }

    impl FrameSource for FlakySource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(CaptureError::StreamNotStarted);
            }
            self.inner.next_frame()
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    /// Never produces a frame, like a stalled sensor behind a dequeue timeout
    struct StalledSource;

    impl FrameSource for StalledSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
            thread::sleep(Duration::from_millis(20));
            Ok(None)
        }

        fn describe(&self) -> String {
            "stalled".into()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_feeds_sink_and_stops() {
        let stats = Arc::new(PipelineStats::new(0.0));
        let handoff = FrameHandoff::new(Arc::clone(&stats));
        let pipeline = FramePipeline::new(NativeOps, handoff.clone(), &PipelineConfig::default());
        let source = SyntheticSource::unpaced(32, 32, PixelFormat::Yu12, 2);
        let mode = ModeControl::new(ProcessingMode::Grayscale);

        let mut worker = CaptureWorker::spawn(Box::new(source), pipeline, mode, None).unwrap();
        let mut sink = TextureSink::new(handoff, HeadlessTarget::new());

        assert!(wait_for(|| {
            let _ = sink.draw_frame();
            sink.backend().uploads() > 0
        }));
        assert!(worker.is_running());

        worker.shutdown();
        assert!(!worker.is_running());
        assert!(stats.snapshot().frames_received > 0);
    }

    #[test]
    fn test_capture_errors_do_not_stop_worker() {
        let stats = Arc::new(PipelineStats::new(0.0));
        let handoff = FrameHandoff::new(Arc::clone(&stats));
        let pipeline = FramePipeline::new(NativeOps, handoff, &PipelineConfig::default());
        let source = FlakySource {
            inner: SyntheticSource::unpaced(16, 16, PixelFormat::Nv12, 2),
            calls: 0,
        };

        let mut worker =
            CaptureWorker::spawn(Box::new(source), pipeline, ModeControl::default(), None).unwrap();

        assert!(wait_for(|| stats.snapshot().frames_received >= 3));
        worker.shutdown();
    }

    #[test]
    fn test_shutdown_returns_while_source_is_stalled() {
        let handoff = FrameHandoff::new(Arc::new(PipelineStats::new(0.0)));
        let pipeline = FramePipeline::new(NativeOps, handoff, &PipelineConfig::default());
        let mut worker =
            CaptureWorker::spawn(Box::new(StalledSource), pipeline, ModeControl::default(), None)
                .unwrap();

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        worker.shutdown();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!worker.is_running());
    }
}
