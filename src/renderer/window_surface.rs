//! The window, its swapchain and the device both the tracer and the present
//! pass run on.

use crate::config::WindowConfig;
use crate::error::SetupError;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Device, queue and the optional features the tracer asked for.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
    /// Both timestamp query features were granted.
    pub timestamps: bool,
}

impl GpuContext {
    async fn for_surface(instance: &wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self, SetupError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(surface),
            })
            .await
            .map_err(|_| SetupError::NoAdapter)?;
        let info = adapter.get_info();
        log::info!(target: "renderer", "adapter {} ({:?}, {:?})", info.name, info.device_type, info.backend);

        let wanted = wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let timestamps = adapter.features().contains(wanted);
        if !timestamps {
            log::warn!(target: "renderer", "adapter lacks timestamp queries; kernel timings disabled");
        }
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Tracer Device"),
                required_features: if timestamps { wanted } else { wgpu::Features::empty() },
                // Ray buffers grow with resolution and supersampling.
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|err| SetupError::Device(err.to_string()))?;
        Ok(Self { device, queue, adapter, timestamps })
    }
}

/// A swapchain image checked out for one present.
pub struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

impl SurfaceFrame {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn present(self) {
        self.texture.present();
    }
}

/// How to react to a failed swapchain acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Reconfigure,
    SkipFrame,
    Fatal(&'static str),
}

fn recovery_for(error: &wgpu::SurfaceError) -> Recovery {
    match error {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => Recovery::Reconfigure,
        wgpu::SurfaceError::Timeout => Recovery::SkipFrame,
        wgpu::SurfaceError::OutOfMemory => Recovery::Fatal("swapchain out of memory"),
        wgpu::SurfaceError::Other => Recovery::Fatal("swapchain reported an unknown error"),
    }
}

/// Without vsync the lowest-latency mode wins: mailbox, then immediate.
fn pick_present_mode(vsync: bool, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if vsync {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

/// The display buffer already holds display-ready 8-bit values, so a linear
/// format shows them unchanged.
fn pick_format(available: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    available.iter().copied().find(|format| !format.is_srgb()).or_else(|| available.first().copied())
}

pub struct WindowSurface {
    title: String,
    vsync: bool,
    size: PhysicalSize<u32>,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    config: Option<wgpu::SurfaceConfiguration>,
    gpu: Option<GpuContext>,
}

impl WindowSurface {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        Self {
            title: window_cfg.title.clone(),
            vsync: window_cfg.vsync,
            size: PhysicalSize::new(window_cfg.width.max(1), window_cfg.height.max(1)),
            window: None,
            surface: None,
            config: None,
            gpu: None,
        }
    }

    /// Creates the window, surface and device on first call.
    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }
        let attributes = Window::default_attributes().with_title(self.title.as_str()).with_inner_size(self.size);
        let window = Arc::new(event_loop.create_window(attributes).context("Failed to create window")?);

        let instance = wgpu::Instance::default();
        let surface =
            instance.create_surface(Arc::clone(&window)).map_err(|err| SetupError::Surface(err.to_string()))?;
        let gpu = pollster::block_on(GpuContext::for_surface(&instance, &surface))?;

        let caps = surface.get_capabilities(&gpu.adapter);
        let format = pick_format(&caps.formats)
            .ok_or_else(|| SetupError::Surface("adapter reports no surface formats".to_string()))?;
        let inner = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: inner.width.max(1),
            height: inner.height.max(1),
            present_mode: pick_present_mode(self.vsync, &caps.present_modes),
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        log::info!(
            target: "renderer",
            "surface {}x{} {:?} {:?}",
            config.width,
            config.height,
            config.format,
            config.present_mode
        );

        self.size = PhysicalSize::new(config.width, config.height);
        self.window = Some(window);
        self.surface = Some(surface);
        self.config = Some(config);
        self.gpu = Some(gpu);
        Ok(())
    }

    pub fn gpu(&self) -> Result<&GpuContext> {
        self.gpu.as_ref().context("GPU device not created yet")
    }

    pub fn format(&self) -> Result<wgpu::TextureFormat> {
        self.config.as_ref().map(|config| config.format).context("Surface not configured yet")
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    /// Asks the windowing system for a new inner size. The swapchain follows
    /// once the resulting `Resized` event arrives.
    pub fn request_size(&self, width: u32, height: u32) {
        if let Some(window) = &self.window {
            let _ = window.request_inner_size(PhysicalSize::new(width, height));
        }
    }

    /// Tracks the new size; a zero-sized (minimised) window keeps the old swapchain.
    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.size = size;
        if size.width == 0 || size.height == 0 {
            return;
        }
        if let Some(config) = self.config.as_mut() {
            config.width = size.width;
            config.height = size.height;
        }
        self.reconfigure();
    }

    fn reconfigure(&self) {
        if let (Some(surface), Some(config), Some(gpu)) = (&self.surface, &self.config, &self.gpu) {
            surface.configure(&gpu.device, config);
        }
    }

    /// Next swapchain image, or `None` when this frame should not be presented.
    pub fn acquire(&self) -> Result<Option<SurfaceFrame>> {
        let surface = self.surface.as_ref().context("Surface not created yet")?;
        let error = match surface.get_current_texture() {
            Ok(texture) => {
                let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                return Ok(Some(SurfaceFrame { texture, view }));
            }
            Err(error) => error,
        };
        match recovery_for(&error) {
            Recovery::Reconfigure => {
                log::debug!(target: "renderer", "{error}; reconfiguring swapchain");
                self.reconfigure();
                Ok(None)
            }
            Recovery::SkipFrame => Ok(None),
            Recovery::Fatal(reason) => bail!("{reason}: {error}"),
        }
    }
}
