//! Headless backend that records graphs instead of running them.

use super::backend::{
    display_buffer_size, BufferDesc, BufferHandle, ComputeBackend, FrameTimings, StageTiming, TextureDesc, TextureHandle,
};
use super::graph::{DispatchGraph, NodeOp};
use crate::error::GpuError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBuffer {
    pub label: String,
    pub size: u64,
    pub display: bool,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_id: u32,
    live: BTreeMap<BufferHandle, RecordedBuffer>,
    textures: BTreeMap<TextureHandle, (u32, u32)>,
    destroyed: Vec<BufferHandle>,
    frames: Vec<DispatchGraph>,
    /// Fails the next allocation whose label matches.
    fail_label: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[DispatchGraph] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&DispatchGraph> {
        self.frames.last()
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&RecordedBuffer> {
        self.live.get(&handle)
    }

    pub fn live_buffers(&self) -> impl Iterator<Item = (BufferHandle, &RecordedBuffer)> {
        self.live.iter().map(|(handle, buffer)| (*handle, buffer))
    }

    pub fn is_destroyed(&self, handle: BufferHandle) -> bool {
        self.destroyed.contains(&handle)
    }

    pub fn fail_allocation(&mut self, label: impl Into<String>) {
        self.fail_label = Some(label.into());
    }

    fn allocate(&mut self, label: &str, size: u64, display: bool) -> Result<BufferHandle, GpuError> {
        if self.fail_label.as_deref() == Some(label) {
            self.fail_label = None;
            return Err(GpuError::Allocation { label: label.to_string(), size });
        }
        let handle = BufferHandle(self.next_id);
        self.next_id += 1;
        self.live.insert(handle, RecordedBuffer { label: label.to_string(), size, display });
        Ok(handle)
    }
}

impl ComputeBackend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, GpuError> {
        self.allocate(desc.label, desc.size, false)
    }

    fn create_buffer_init(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        self.allocate(label, contents.len() as u64, false)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.live.remove(&buffer).is_some() {
            self.destroyed.push(buffer);
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, GpuError> {
        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle, (desc.width, desc.height));
        Ok(handle)
    }

    fn create_display_surface(&mut self, width: u32, height: u32) -> Result<BufferHandle, GpuError> {
        self.allocate("display", display_buffer_size(width, height), true)
    }

    fn execute(&mut self, graph: DispatchGraph) -> Result<FrameTimings, GpuError> {
        for node in graph.nodes() {
            for buffer in node.reads().iter().chain(node.writes()) {
                if !self.live.contains_key(buffer) {
                    return Err(GpuError::UnknownBuffer(buffer.0));
                }
            }
        }
        let stages = graph
            .nodes()
            .iter()
            .filter(|node| matches!(node.op, NodeOp::Dispatch { .. } | NodeOp::Upload { .. }))
            .map(|node| StageTiming { label: node.label, nanos: 1_000 })
            .collect();
        self.frames.push(graph);
        Ok(FrameTimings { stages })
    }
}
