//! Rolling frames-per-second over fixed one-second windows

use std::time::{Duration, Instant};

/// Length of one counting window
pub const WINDOW: Duration = Duration::from_millis(1000);

/// Counts arrivals per window and derives a rate when the window closes
#[derive(Debug, Clone)]
pub struct ThroughputTracker {
    frame_count: u64,
    window_start: Instant,
    rate: f64,
}

impl ThroughputTracker {
    /// `initial_rate` is reported until the first window closes
    pub fn new(window_start: Instant, initial_rate: f64) -> Self {
        Self {
            frame_count: 0,
            window_start,
            rate: initial_rate,
        }
    }

    /// Count one arrival at `now`. Returns the new rate when this arrival
    /// closes the window.
    ///
    /// A clock that stalls or steps backwards reads as zero elapsed time and
    /// keeps the window open.
    pub fn record_arrival(&mut self, now: Instant) -> Option<f64> {
        self.frame_count += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return None;
        }

        self.rate = self.frame_count as f64 / elapsed.as_secs_f64();
        self.frame_count = 0;
        self.window_start = now;
        Some(self.rate)
    }

    pub fn current_rate(&self) -> f64 {
        self.rate
    }

    /// Arrivals counted in the open window
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
