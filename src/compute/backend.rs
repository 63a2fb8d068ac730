use super::graph::DispatchGraph;
use crate::error::GpuError;
use std::fmt;

/// Width and height words that precede the pixels of a display buffer.
pub const DISPLAY_HEADER_BYTES: u64 = 8;

/// Bytes of a `width * height` display buffer, header included.
pub fn display_buffer_size(width: u32, height: u32) -> u64 {
    DISPLAY_HEADER_BYTES + u64::from(width) * u64::from(height) * 4
}

/// Opaque id of a device buffer. Ids are never reused by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
}

/// RGBA8 texture contents, row-major without padding.
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

/// GPU time spent by one graph node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTiming {
    pub label: &'static str,
    pub nanos: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimings {
    pub stages: Vec<StageTiming>,
}

impl FrameTimings {
    pub fn total_nanos(&self, label: &str) -> u64 {
        self.stages.iter().filter(|s| s.label == label).map(|s| s.nanos).sum()
    }
}

/// Device seam the frame scheduler drives.
pub trait ComputeBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, GpuError>;

    fn create_buffer_init(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, GpuError>;

    /// Creates a packed RGBA8 buffer of `width * height` pixels shared with the
    /// present pass, prefixed by its dimensions.
    fn create_display_surface(&mut self, width: u32, height: u32) -> Result<BufferHandle, GpuError>;

    /// Submits the graph in order and blocks until the queue drains.
    fn execute(&mut self, graph: DispatchGraph) -> Result<FrameTimings, GpuError>;

    fn timing_supported(&self) -> bool {
        false
    }
}
