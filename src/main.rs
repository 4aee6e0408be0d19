// =============================================================================
// TOPAZ DEMO - one window, one triangle, Vulkan backend
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (this file)                                   │
// │    └── Engine (job system, logging)                             │
// │          └── Device<VulkanBackend> (components, surface)        │
// │                └── Renderer (shaders, render pass, output)      │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. RedrawRequested
// 2. device.begin_frame(): reclaim orphaned components, rebuild a stale surface
// 3. renderer.render_tris(): clear, draw, present
//
// Set `graphics.backend = "headless"` in config.toml to run one offscreen
// frame without a window instead.
//
// =============================================================================

use anyhow::{Context, Result};
use glam::UVec2;
use std::sync::Arc;
use std::time::Instant;
use topaz::backend::vulkan::VulkanSettings;
use topaz::config::GraphicsBackend;
use topaz::engine::init_logging;
use topaz::{
    Component, Config, Device, Engine, HeadlessBackend, ImageFormat, ImageOutput, RenderPassAttachment, RenderPassBuilder,
    Renderer, RendererInfo, Resource, ResourceAccess, ResourceFlags, ShaderSource, ShaderStage, VulkanBackend,
    WindowOutput,
};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const VERTEX_SHADER: &str = "shaders/triangle.vert.spv";
const FRAGMENT_SHADER: &str = "shaders/triangle.frag.spv";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Topaz {}", topaz::engine::version());
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let engine = Engine::initialise(&config);

    match config.graphics.backend {
        GraphicsBackend::Headless => run_headless(&config, &engine)?,
        backend => {
            if backend == GraphicsBackend::OpenGl {
                log::warn!("The demo has no GL context of its own; using Vulkan");
            }
            log::info!("Present mode: {}", config.graphics.present_mode);
            let event_loop = EventLoop::new()?;
            let mut app = App::new(config, &engine);
            event_loop.run_app(&mut app)?;
        }
    }

    engine.terminate();
    Ok(())
}

/// Clear a small offscreen image and report what came back.
fn run_headless(config: &Config, engine: &Engine) -> Result<()> {
    let mut device = Device::new(HeadlessBackend::new())?.with_job_system(engine.job_system());

    let dimensions = UVec2::new(config.window.width.min(64), config.window.height.min(64));
    let target = device.create_image_component(Some(
        Resource::image_uninitialised(ImageFormat::Rgba32Unorm, dimensions, ResourceAccess::DynamicFixed)
            .with_flags(ResourceFlags::RENDERER_OUTPUT),
    ))?;

    // The headless backend never runs shaders; GLSL text is enough
    let mut info = RendererInfo::new();
    info.shader_mut()
        .set_shader(ShaderStage::Vertex, ShaderSource::glsl(include_str!("../shaders/triangle.vert")));
    info.shader_mut()
        .set_shader(ShaderStage::Fragment, ShaderSource::glsl(include_str!("../shaders/triangle.frag")));
    info.set_output(ImageOutput::new(target));
    info.set_clear_colour(config.clear_colour());
    let mut renderer = device.create_renderer(&info)?;
    renderer.render_tris(&mut device, 1)?;

    let pixels = device
        .component(target)
        .get_resource()
        .map(|resource| resource.data().to_vec())
        .context("Headless output lost its resource")?;
    log::info!(
        "Headless frame {}: {}x{}, {} bytes, first pixel {:?}",
        renderer.debug_name(),
        dimensions.x,
        dimensions.y,
        pixels.len(),
        &pixels[..pixels.len().min(4)]
    );
    Ok(())
}

fn set_triangle_shaders(info: &mut RendererInfo) -> Result<()> {
    for (stage, path) in [(ShaderStage::Vertex, VERTEX_SHADER), (ShaderStage::Fragment, FRAGMENT_SHADER)] {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path} (is glslc installed?)"))?;
        info.shader_mut().set_shader(stage, ShaderSource::spirv_from_bytes(&bytes)?);
    }
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Frames drawn since the last title refresh.
struct FrameCounter {
    frames: u32,
    window_start: Instant,
    last_frame: Instant,
}

impl FrameCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frames: 0,
            window_start: now,
            last_frame: now,
        }
    }

    /// Count one frame; once a second, returns (fps, last frame time in ms).
    fn tick(&mut self) -> Option<(f32, f32)> {
        let now = Instant::now();
        let frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.window_start = now;
        Some((fps, frame_ms))
    }
}

struct App {
    config: Config,
    jobs: Arc<topaz::JobSystem>,

    // Drop order: renderer, then device, then window
    renderer: Option<Renderer<VulkanBackend>>,
    device: Option<Device<VulkanBackend>>,
    window: Option<Arc<Window>>,

    fullscreen: bool,
    minimised: bool,
    counter: FrameCounter,
}

impl App {
    fn new(config: Config, engine: &Engine) -> Self {
        Self {
            fullscreen: config.window.fullscreen,
            config,
            jobs: engine.job_system(),
            renderer: None,
            device: None,
            window: None,
            minimised: false,
            counter: FrameCounter::new(),
        }
    }

    fn init_renderer(&mut self, window: &Arc<Window>) -> Result<()> {
        let settings = VulkanSettings::from_config(&self.config);
        let backend = VulkanBackend::with_window(&settings, window.as_ref())?;
        let mut device = Device::new(backend)?.with_job_system(self.jobs.clone());
        device.on_resize(|size| log::info!("Surface resized to {}x{}", size.x, size.y));

        let mut pass = RenderPassBuilder::new();
        pass.add_pass(RenderPassAttachment::Colour);

        let mut info = RendererInfo::new();
        info.set_debug_name("triangle");
        set_triangle_shaders(&mut info)?;
        info.set_render_pass(pass);
        info.set_output(WindowOutput::new(window));
        info.set_clear_colour(self.config.clear_colour());

        let renderer = device.create_renderer(&info)?;
        log::info!(
            "Renderer {} ready on {} ({:?})",
            renderer.debug_name(),
            device.kind(),
            device.window_format()
        );

        self.renderer = Some(renderer);
        self.device = Some(device);
        Ok(())
    }

    /// Returns whether a frame was drawn.
    fn render_frame(&mut self) -> Result<bool> {
        if self.minimised {
            return Ok(false);
        }
        let (Some(device), Some(renderer)) = (self.device.as_mut(), self.renderer.as_mut()) else {
            return Ok(false);
        };
        if renderer.is_lost() {
            return Ok(false);
        }

        device.begin_frame()?;
        renderer.render_tris(device, 1)?;
        Ok(true)
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        self.fullscreen = fullscreen;
        window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Window mode: {}", if fullscreen { "fullscreen" } else { "windowed" });
    }

    fn frame_drawn(&mut self) {
        let Some((fps, frame_ms)) = self.counter.tick() else {
            return;
        };
        if !self.config.debug.show_fps {
            return;
        }
        if let Some(window) = self.window.as_ref() {
            window.set_title(&format!("{} | {fps:.0} fps, {frame_ms:.2} ms", self.config.window.title));
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(device) = self.device.as_mut() {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                self.minimised = size.width == 0 || size.height == 0;
                if !self.minimised {
                    if let Some(device) = self.device.as_mut() {
                        device.notify_resize(UVec2::new(size.width, size.height));
                    }
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.frame_drawn(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    if self.renderer.as_ref().is_some_and(Renderer::is_lost) {
                        log::error!("Device lost, exiting");
                        event_loop.exit();
                    }
                }
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.set_fullscreen(!self.fullscreen),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws for maximum FPS.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
