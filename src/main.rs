//! edgeview: live camera viewer with sampled grayscale / edge processing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use edgeview::capture;
use edgeview::display::{FrameHandoff, HeadlessTarget, TextureSink};
use edgeview::pipeline::{CaptureWorker, PipelineStats};
#[cfg(feature = "opencv")]
use edgeview::processing::OpenCvOps as Ops;
#[cfg(not(feature = "opencv"))]
use edgeview::processing::NativeOps as Ops;
use edgeview::{convert, utils, Config, DisplayConfig, DisplayMode, SourceKind};
use edgeview::{FramePipeline, ModeControl};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("edgeview launching...");

    // Load configuration
    let config_path = std::env::var_os(edgeview::CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("edgeview.toml"));
    let mut config = Config::load(Some(&config_path))?;

    // Auto-detect capture device if needed
    if config.capture.source == SourceKind::V4l2 && config.capture.device.is_empty() {
        let device = utils::auto_detect_device(config.capture.format)?;
        config.capture.device = device.path;
        config.capture.format = device.format;
    }
    let config = config.publish();

    let source = capture::open_source(&config.capture)?;
    info!("Using capture source: {}", source.describe());

    let stats = Arc::new(PipelineStats::new(config.pipeline.initial_fps));
    let handoff = FrameHandoff::new(Arc::clone(&stats));
    let mode = ModeControl::new(config.pipeline.initial_mode);
    let pipeline = FramePipeline::new(Ops, handoff.clone(), &config.pipeline);

    let mut worker = CaptureWorker::spawn(source, pipeline, mode.clone(), config.capture.pin_core)?;

    let result = match config.display.mode {
        DisplayMode::Window => run_window(config.display.clone(), handoff, mode).await,
        DisplayMode::Headless => run_headless(config.display.clone(), handoff).await,
    };

    worker.shutdown();
    info!(stats = %stats.snapshot(), "edgeview shutting down");
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgeview=info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[cfg(feature = "gpu-display")]
async fn run_window(config: DisplayConfig, handoff: FrameHandoff, mode: ModeControl) -> Result<()> {
    edgeview::display::run_viewer(config, handoff, mode)
}

#[cfg(not(feature = "gpu-display"))]
async fn run_window(config: DisplayConfig, handoff: FrameHandoff, _mode: ModeControl) -> Result<()> {
    warn!("Built without gpu-display, running headless");
    run_headless(config, handoff).await
}

/// Draw into host memory at `refresh_hz` until Ctrl-C
async fn run_headless(config: DisplayConfig, handoff: FrameHandoff) -> Result<()> {
    info!(refresh_hz = config.refresh_hz, "Running headless");

    let stats = Arc::clone(handoff.stats());
    let mut sink = TextureSink::new(handoff, HeadlessTarget::new());

    let mut draw_tick =
        tokio::time::interval(Duration::from_secs(1) / config.refresh_hz.max(1));
    let mut stats_tick = tokio::time::interval(Config::current().display.stats_interval());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = draw_tick.tick() => {
                if let Err(e) = sink.draw_frame() {
                    error!("Display error: {}", e);
                }
            }
            _ = stats_tick.tick() => {
                info!(stats = %stats.snapshot(), "Pipeline stats");
            }
            res = &mut shutdown => {
                res?;
                info!("Ctrl-C received");
                break;
            }
        }
    }

    if let Some(path) = &config.snapshot_path {
        match sink.backend().texture() {
            Some(image) => {
                convert::save_snapshot(image, path)?;
                info!("Wrote snapshot to {}", path.display());
            }
            None => warn!("No frame displayed, skipping snapshot"),
        }
    }

    Ok(())
}
