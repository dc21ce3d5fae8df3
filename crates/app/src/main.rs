//! rtg - real-time frame engine.
//!
//! Opens a window and paces frames into it, or, with `--headless`, renders
//! into an offscreen ring driven by an event stream and saves the frames it
//! is asked to.

mod cli;
mod demo;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use rtg_core::{Config, FrameClock};
use rtg_platform::Window;
use rtg_renderer::FramePacer;
use rtg_rhi::allocator::Allocator;
use rtg_rhi::device::Device;
use rtg_rhi::swapchain::Swapchain;
use rtg_rhi::vulkan::VulkanBackend;

use crate::cli::{Cli, surface_preferences, vulkan_options};
use crate::demo::DemoProducer;

/// Everything tied to the window.
///
/// Field order is drop order: the pacer drains the GPU first, and the window
/// outlives the surface created from it.
struct Engine {
    pacer: FramePacer,
    producer: DemoProducer,
    window: Window,
}

struct App {
    config: Config,
    engine: Option<Engine>,
    clock: FrameClock,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            clock: FrameClock::new(),
            error: None,
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Engine> {
        let window = Window::new(
            event_loop,
            self.config.surface.width,
            self.config.surface.height,
            "rtg",
        )
        .context("failed to create window")?;
        let backend = VulkanBackend::with_window(&vulkan_options(&self.config), &window)
            .context("failed to initialize Vulkan")?;
        let (pacer, producer) = build_engine(backend, &self.config, false)?;
        Ok(Engine {
            pacer,
            producer,
            window,
        })
    }

    /// Records a fatal error and leaves the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.error = Some(error);
        self.engine = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(engine) => {
                info!("Initialization complete, entering main loop");
                self.clock.reset();
                self.engine = Some(engine);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                // The chain notices on its next acquire or present.
                engine.window.set_drawable_size(size);
            }
            WindowEvent::RedrawRequested => {
                if !engine.window.has_drawable_area() {
                    return;
                }
                let dt = self.clock.tick();
                if let Err(e) = engine.pacer.frame(&mut engine.producer, dt, None) {
                    self.fail(event_loop, anyhow::Error::new(e).context("frame failed"));
                }
            }
            other => {
                engine.pacer.input_mut().handle_window_event(&other);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = &self.engine {
            engine.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.take() {
            info!("Shutting down after {} frames", engine.pacer.frame_count());
        }
    }
}

/// Brings up the device context, the presentation chain and the pacer.
fn build_engine(
    backend: VulkanBackend,
    config: &Config,
    headless: bool,
) -> Result<(FramePacer, DemoProducer)> {
    let device = Device::new(backend);
    let allocator = Arc::new(Allocator::new(device.clone())?);
    let swapchain = Swapchain::new(
        device.clone(),
        allocator.clone(),
        surface_preferences(config)?,
        headless,
    )
    .context("failed to create presentation chain")?;
    let producer = DemoProducer::new(allocator, swapchain.format());
    let pacer = FramePacer::new(device, swapchain, config.engine.workspaces as usize)?;
    Ok((pacer, producer))
}

fn run_windowed(config: Config) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_headless(config: &Config, events: Option<&Path>) -> Result<()> {
    let backend =
        VulkanBackend::headless(&vulkan_options(config)).context("failed to initialize Vulkan")?;
    let (mut pacer, mut producer) = build_engine(backend, config, true)?;

    let frames = match events {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open event stream {}", path.display()))?;
            pacer.run_headless(&mut producer, BufReader::new(file))?
        }
        None => {
            info!("Reading headless events from stdin");
            pacer.run_headless(&mut producer, std::io::stdin().lock())?
        }
    };
    info!("Rendered {} headless frames", frames);
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    info!(
        "Starting rtg: {}x{}, {} workspaces, {}",
        config.surface.width,
        config.surface.height,
        config.engine.workspaces,
        if config.engine.headless { "headless" } else { "windowed" }
    );

    if config.engine.headless {
        run_headless(&config, cli.events.as_deref())
    } else {
        run_windowed(config)
    }
}

fn main() -> ExitCode {
    rtg_core::init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
