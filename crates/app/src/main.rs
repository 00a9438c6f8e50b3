//! vkframe - Main Entry Point
//!
//! Opens a window and renders a colored triangle until the window is closed.
//! Configuration comes from `VKFRAME_*` environment variables.

use anyhow::Result;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkframe_core::{EngineConfig, FrameTimer};
use vkframe_platform::Window;
use vkframe_renderer::Renderer;

struct App {
    config: EngineConfig,
    // Dropped before the window it renders to
    renderer: Option<Renderer>,
    window: Option<Window>,
    timer: FrameTimer,
    /// First fatal error; returned from `main` once the loop exits.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            timer: FrameTimer::new(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            &self.config.title,
        )?;
        let renderer = Renderer::new(&window, &self.config)?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return Ok(());
        };

        // Minimized: nothing to draw into and nothing to rebuild
        if !window.has_area() {
            return Ok(());
        }

        let status = renderer.draw_frame()?;
        if status.needs_rebuild() {
            let extent = renderer.extent();
            debug!(
                "Frame reported {:?} at {}x{}, chain will be rebuilt",
                status, extent.width, extent.height
            );
        }

        if let Some(fps) = self.timer.frame() {
            debug!("FPS: {:.1}", fps);
        }

        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("initialization failed"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e.context("frame failed"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            let frames = renderer.frame_loop();
            info!(
                "{} submission(s), {} presentation(s)",
                frames.submissions(),
                frames.presentations()
            );
        }

        // GPU teardown has to happen while the window still exists
        self.renderer = None;
        self.window = None;
        info!(
            "Rendered {} frame(s) in {:.1}s",
            self.timer.total_frames(),
            self.timer.elapsed().as_secs_f32()
        );
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();
    info!("Starting vkframe");

    let config = EngineConfig::from_env()?;
    debug!("Configuration: {:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => {
            info!("Clean shutdown");
            Ok(())
        }
    }
}
