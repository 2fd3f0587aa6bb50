pub mod capture;
pub mod convert;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{PixelFormat, RawFrame};
pub use convert::{PackedImage, PixelFormatConverter};
pub use error::FrameError;
pub use pipeline::{FramePipeline, SkipPolicy};
pub use processing::{FrameProcessor, ModeControl, ProcessingMode};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "EDGEVIEW_CONFIG";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String, // Empty means auto-detect
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub pin_core: Option<usize>, // CPU core for the capture worker
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Window,
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub refresh_hz: u32,
    pub snapshot_path: Option<PathBuf>,
    pub stats_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_interval: u32,
    pub initial_mode: ProcessingMode,
    pub skip_policy: SkipPolicy,
    pub initial_fps: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::V4l2,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Yu12,
            buffer_count: 4,
            pin_core: None,
        }
    }
}

impl DisplayConfig {
    /// Period of the stats log and title refresh
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Window,
            width: 800,
            height: 600,
            vsync: true,
            refresh_hz: 60,
            snapshot_path: None,
            stats_interval_ms: 1000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval: 5,
            initial_mode: ProcessingMode::EdgeMap,
            skip_policy: SkipPolicy::Raw,
            initial_fps: 0.0,
        }
    }
}

impl Config {
    /// The configuration most recently published to [`CONFIG`]
    pub fn current() -> Arc<Config> {
        CONFIG.load_full()
    }

    /// Make this the process-wide configuration
    pub fn publish(self) -> Arc<Config> {
        let config = Arc::new(self);
        CONFIG.store(Arc::clone(&config));
        config
    }

    /// Layer defaults, an optional TOML file, then `EDGEVIEW__*` environment
    /// variables (`EDGEVIEW__PIPELINE__SAMPLE_INTERVAL=3`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("EDGEVIEW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let fail = |msg: &str| Err(config::ConfigError::Message(msg.to_string()));

        if self.capture.width == 0 || self.capture.height == 0 {
            return fail("capture.width and capture.height must be non-zero");
        }
        if self.capture.fps == 0 {
            return fail("capture.fps must be non-zero");
        }
        if self.capture.buffer_count == 0 {
            return fail("capture.buffer_count must be non-zero");
        }
        if self.pipeline.sample_interval == 0 {
            return fail("pipeline.sample_interval must be non-zero");
        }
        if self.display.refresh_hz == 0 {
            return fail("display.refresh_hz must be non-zero");
        }
        if !self.pipeline.initial_fps.is_finite() || self.pipeline.initial_fps < 0.0 {
            return fail("pipeline.initial_fps must be a non-negative number");
        }
        Ok(())
    }
}
