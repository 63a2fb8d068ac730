mod present;
mod window_surface;

pub use present::PresentPass;
pub use window_surface::{GpuContext, SurfaceFrame, WindowSurface};

use crate::compute::{DisplayInterop, WgpuBackend};
use crate::config::WindowConfig;
use anyhow::Result;
use std::time::{Duration, Instant};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Owns the window, its surface and the pass that shows the traced image.
pub struct Renderer {
    surface: WindowSurface,
    present: Option<PresentPass>,
}

impl Renderer {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        Self { surface: WindowSurface::new(window_cfg), present: None }
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        self.surface.ensure_window(event_loop)?;
        if self.present.is_none() {
            let format = self.surface.format()?;
            self.present = Some(PresentPass::new(&self.surface.gpu()?.device, format));
        }
        Ok(())
    }

    /// Device and queue handles for the compute backend.
    pub fn device_and_queue(&self) -> Result<(wgpu::Device, wgpu::Queue)> {
        let gpu = self.surface.gpu()?;
        Ok((gpu.device.clone(), gpu.queue.clone()))
    }

    pub fn gpu_timing_supported(&self) -> bool {
        self.surface.gpu().is_ok_and(|gpu| gpu.timestamps)
    }

    pub fn window(&self) -> Option<&Window> {
        self.surface.window()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.surface.size()
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.surface.resize(new_size);
    }

    pub fn request_size(&self, width: u32, height: u32) {
        self.surface.request_size(width, height);
    }

    /// Shows the display buffer. Returns the host time spent presenting.
    pub fn present(&mut self, backend: &WgpuBackend, display: &DisplayInterop) -> Result<Duration> {
        let start = Instant::now();
        let handle = display.presentable()?;
        let buffer = backend.raw_buffer(handle)?;
        let Some(frame) = self.surface.acquire()? else {
            return Ok(start.elapsed());
        };
        let size = self.surface.size();
        if let Some(pass) = self.present.as_mut() {
            let gpu = self.surface.gpu()?;
            pass.draw(
                &gpu.device,
                &gpu.queue,
                frame.view(),
                (size.width, size.height),
                handle,
                buffer,
            );
        }
        if let Some(window) = self.surface.window() {
            window.pre_present_notify();
        }
        frame.present();
        Ok(start.elapsed())
    }
}
