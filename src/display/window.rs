//! winit viewer: redraw loop, mode keys and the status title

use std::sync::Arc;
use std::time::Instant;

use color_eyre::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use super::{FrameHandoff, GpuTexture, TextureSink};
use crate::processing::{ModeControl, ProcessingMode};
use crate::{Config, DisplayConfig};

const TITLE: &str = "edgeview";

/// Application handler for the winit event loop
pub struct ViewerApp {
    config: DisplayConfig,
    handoff: FrameHandoff,
    mode: ModeControl,
    sink: Option<TextureSink<GpuTexture>>,
    last_title_update: Instant,
    init_error: Option<color_eyre::Report>,
}

impl ViewerApp {
    pub fn new(config: DisplayConfig, handoff: FrameHandoff, mode: ModeControl) -> Self {
        Self {
            config,
            handoff,
            mode,
            sink: None,
            last_title_update: Instant::now(),
            init_error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attrs = Window::default_attributes()
            .with_title(TITLE)
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let backend = pollster::block_on(GpuTexture::new(window, &self.config))?;
        self.sink = Some(TextureSink::new(self.handoff.clone(), backend));
        Ok(())
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }

        let mode = match event.physical_key {
            PhysicalKey::Code(KeyCode::Digit1) => ProcessingMode::Passthrough,
            PhysicalKey::Code(KeyCode::Digit2) => ProcessingMode::Grayscale,
            PhysicalKey::Code(KeyCode::Digit3) => ProcessingMode::EdgeMap,
            PhysicalKey::Code(KeyCode::Escape) => {
                info!("Escape pressed");
                event_loop.exit();
                return;
            }
            _ => return,
        };

        info!(%mode, "Switching processing mode");
        self.mode.set(mode);
        self.update_title();
    }

    fn update_title(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let stats = self.handoff.stats().snapshot();
        sink.backend().window().set_title(&format!(
            "{TITLE} | FPS: {:.1} | Mode: {}",
            stats.fps,
            self.mode.get()
        ));
        self.last_title_update = Instant::now();
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.sink.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            error!("Display initialization failed: {}", e);
            self.init_error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),
            WindowEvent::RedrawRequested => {
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.draw_frame() {
                        error!("Display error: {}", e);
                    }
                }
                // Read live so a republished config takes effect
                let interval = Config::current().display.stats_interval();
                if self.last_title_update.elapsed() >= interval {
                    self.update_title();
                }
            }
            WindowEvent::Resized(new_size) => {
                if let Some(sink) = self.sink.as_mut() {
                    sink.backend_mut().resize(new_size.width, new_size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(sink) = &self.sink {
            sink.backend().window().request_redraw();
        }
    }
}

/// Run the viewer on the calling thread until the window closes
pub fn run_viewer(config: DisplayConfig, handoff: FrameHandoff, mode: ModeControl) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(config, handoff, mode);
    event_loop.run_app(&mut app)?;

    match app.init_error.take() {
        Some(e) => Err(e.wrap_err("viewer failed to start")),
        None => Ok(()),
    }
}
