//! [`ComputeBackend`] on a wgpu device.
//!
//! All kernels live in one WGSL module. Pipelines are built on first use per
//! kernel and local size; the local size reaches the shader through the
//! `WORKGROUP_*` override constants. A frame is encoded into a single command
//! buffer, one compute pass per dispatch, and submitted once.

use super::backend::{
    BufferDesc, BufferHandle, ComputeBackend, FrameTimings, StageTiming, TextureDesc, TextureHandle,
};
use super::graph::{DispatchGraph, NodeOp};
use super::kernel::{pack_uniforms, Kernel, KernelArg, ParamKind, UNIFORM_BINDING};
use crate::error::{GpuError, SetupError};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

/// Two queries per timed node.
const MAX_TIMESTAMP_QUERIES: u32 = 4096;
const TIMESTAMP_BYTES: u64 = std::mem::size_of::<u64>() as u64;

struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    period_ns: f64,
}

impl GpuTimer {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let size = u64::from(MAX_TIMESTAMP_QUERIES) * TIMESTAMP_BYTES;
        Self {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("Kernel Timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: MAX_TIMESTAMP_QUERIES,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamp Resolve"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamp Readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            period_ns: f64::from(queue.get_timestamp_period()),
        }
    }
}

/// Queries handed out while encoding one frame.
struct TimedNode {
    label: &'static str,
    first_query: u32,
}

#[derive(Default)]
struct QueryCursor {
    next: u32,
    nodes: Vec<TimedNode>,
}

impl QueryCursor {
    fn reserve(&mut self, label: &'static str) -> Option<u32> {
        if self.next + 2 > MAX_TIMESTAMP_QUERIES {
            return None;
        }
        let first_query = self.next;
        self.next += 2;
        self.nodes.push(TimedNode { label, first_query });
        Some(first_query)
    }
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    module: wgpu::ShaderModule,
    layouts: HashMap<Kernel, wgpu::BindGroupLayout>,
    pipelines: HashMap<(Kernel, [u32; 3]), wgpu::ComputePipeline>,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    textures: HashMap<TextureHandle, GpuTexture>,
    next_id: u32,
    timer: Option<GpuTimer>,
}

impl WgpuBackend {
    /// Compiles the kernel program at `kernel_path`. GPU timing is enabled
    /// when `timing` is set; the device must then carry both timestamp features.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        kernel_path: &Path,
        timing: bool,
    ) -> Result<Self, SetupError> {
        let source = fs::read_to_string(kernel_path).map_err(|source| SetupError::KernelSource {
            path: kernel_path.display().to_string(),
            source,
        })?;
        let module = Self::compile(&device, &source)?;
        let timer = timing.then(|| GpuTimer::new(&device, &queue));
        log::info!(
            target: "compute",
            "kernel program {} ready (GPU timing {})",
            kernel_path.display(),
            if timer.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            device,
            queue,
            module,
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_id: 0,
            timer,
        })
    }

    fn compile(device: &wgpu::Device, source: &str) -> Result<wgpu::ShaderModule, SetupError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Tracer Kernels"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(SetupError::KernelBuild { diagnostics: err.to_string() }),
            None => Ok(module),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Raw buffer behind `handle`, for passes outside the dispatch graph.
    pub fn raw_buffer(&self, handle: BufferHandle) -> Result<&wgpu::Buffer, GpuError> {
        self.buffers.get(&handle).ok_or(GpuError::UnknownBuffer(handle.0))
    }

    fn texture_view(&self, handle: TextureHandle) -> Result<&wgpu::TextureView, GpuError> {
        self.textures.get(&handle).map(|t| &t.view).ok_or(GpuError::UnknownTexture(handle.0))
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_size(&self, label: &str, size: u64) -> Result<(), GpuError> {
        let limits = self.device.limits();
        let max = limits.max_buffer_size.min(u64::from(limits.max_storage_buffer_binding_size));
        if size == 0 || size > max {
            return Err(GpuError::Allocation { label: label.to_string(), size });
        }
        Ok(())
    }

    fn insert_buffer(&mut self, buffer: wgpu::Buffer) -> BufferHandle {
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(handle, buffer);
        handle
    }

    fn storage_usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
    }

    fn allocate_with<F>(&mut self, label: &str, size: u64, create: F) -> Result<BufferHandle, GpuError>
    where
        F: FnOnce(&wgpu::Device) -> wgpu::Buffer,
    {
        self.check_size(label, size)?;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = create(&self.device);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!(target: "compute", "allocating {label} ({size} bytes): {err}");
            return Err(GpuError::Allocation { label: label.to_string(), size });
        }
        Ok(self.insert_buffer(buffer))
    }

    fn bind_group_layout(device: &wgpu::Device, kernel: Kernel) -> wgpu::BindGroupLayout {
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = kernel
            .signature()
            .iter()
            .enumerate()
            .filter_map(|(index, param)| {
                let ty = match param {
                    ParamKind::BufferRead => storage_binding(true),
                    ParamKind::BufferWrite | ParamKind::BufferReadWrite => storage_binding(false),
                    ParamKind::Texture => wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    _ => return None,
                };
                Some(wgpu::BindGroupLayoutEntry {
                    binding: index as u32,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty,
                    count: None,
                })
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: UNIFORM_BINDING,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.entry_point()),
            entries: &entries,
        })
    }

    fn ensure_pipeline(&mut self, kernel: Kernel, local_size: [u32; 3]) -> Result<(), GpuError> {
        if self.pipelines.contains_key(&(kernel, local_size)) {
            return Ok(());
        }
        let device = &self.device;
        let layout = self.layouts.entry(kernel).or_insert_with(|| Self::bind_group_layout(device, kernel));
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.entry_point()),
            bind_group_layouts: &[&*layout],
            push_constant_ranges: &[],
        });
        let constants_2d = [("WORKGROUP_X", f64::from(local_size[0])), ("WORKGROUP_Y", f64::from(local_size[1]))];
        let constants_1d = [("WORKGROUP_SIZE", f64::from(local_size[0]))];
        let constants: &[(&str, f64)] = if kernel.is_2d() { &constants_2d } else { &constants_1d };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.entry_point()),
            layout: Some(&pipeline_layout),
            module: &self.module,
            entry_point: Some(kernel.entry_point()),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants,
                ..Default::default()
            },
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Validation(format!("{} pipeline: {err}", kernel.entry_point())));
        }
        log::debug!(target: "compute", "built {} for local size {:?}", kernel.entry_point(), local_size);
        self.pipelines.insert((kernel, local_size), pipeline);
        Ok(())
    }

    /// Packs every dispatch's uniform block into one buffer. Returns the
    /// per-node `(offset, size)` of its block.
    fn pack_frame_uniforms(&self, graph: &DispatchGraph) -> (wgpu::Buffer, Vec<Option<(u64, u64)>>) {
        let align = u64::from(self.device.limits().min_uniform_buffer_offset_alignment).max(16);
        let mut arena: Vec<u8> = Vec::new();
        let ranges = graph
            .nodes()
            .iter()
            .map(|node| {
                let NodeOp::Dispatch { args, .. } = &node.op else { return None };
                let packed = pack_uniforms(args);
                let offset = (arena.len() as u64).div_ceil(align) * align;
                arena.resize(offset as usize, 0);
                arena.extend_from_slice(&packed);
                Some((offset, packed.len() as u64))
            })
            .collect();
        if arena.is_empty() {
            arena.resize(16, 0);
        }
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Uniforms"),
            contents: &arena,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        (buffer, ranges)
    }

    fn encode(
        &self,
        graph: &DispatchGraph,
        encoder: &mut wgpu::CommandEncoder,
        queries: &mut QueryCursor,
    ) -> Result<(), GpuError> {
        let (uniforms, ranges) = self.pack_frame_uniforms(graph);
        for (node, range) in graph.nodes().iter().zip(ranges) {
            match &node.op {
                NodeOp::Upload { buffer, offset, data } => {
                    if data.is_empty() {
                        continue;
                    }
                    let target = self.raw_buffer(*buffer)?;
                    let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(node.label),
                        contents: data,
                        usage: wgpu::BufferUsages::COPY_SRC,
                    });
                    let query = self.timer.as_ref().and_then(|timer| {
                        let first = queries.reserve(node.label)?;
                        encoder.write_timestamp(&timer.query_set, first);
                        Some((timer, first))
                    });
                    encoder.copy_buffer_to_buffer(&staging, 0, target, *offset, data.len() as u64);
                    if let Some((timer, first)) = query {
                        encoder.write_timestamp(&timer.query_set, first + 1);
                    }
                }
                NodeOp::Dispatch { kernel, args, workgroups, local_size } => {
                    let pipeline = self.pipelines.get(&(*kernel, *local_size)).ok_or_else(|| {
                        GpuError::Validation(format!("{} pipeline missing", kernel.entry_point()))
                    })?;
                    let layout = self.layouts.get(kernel).ok_or_else(|| {
                        GpuError::Validation(format!("{} layout missing", kernel.entry_point()))
                    })?;
                    let (offset, size) = range.unwrap_or((0, 16));
                    let mut entries = Vec::with_capacity(args.len() + 1);
                    for (index, arg) in args.iter().enumerate() {
                        let resource = match arg {
                            KernelArg::Buffer(handle) => self.raw_buffer(*handle)?.as_entire_binding(),
                            KernelArg::Texture(handle) => {
                                wgpu::BindingResource::TextureView(self.texture_view(*handle)?)
                            }
                            _ => continue,
                        };
                        entries.push(wgpu::BindGroupEntry { binding: index as u32, resource });
                    }
                    entries.push(wgpu::BindGroupEntry {
                        binding: UNIFORM_BINDING,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &uniforms,
                            offset,
                            size: NonZeroU64::new(size),
                        }),
                    });
                    let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(kernel.entry_point()),
                        layout,
                        entries: &entries,
                    });

                    let timestamp_writes = self.timer.as_ref().and_then(|timer| {
                        let first = queries.reserve(node.label)?;
                        Some(wgpu::ComputePassTimestampWrites {
                            query_set: &timer.query_set,
                            beginning_of_pass_write_index: Some(first),
                            end_of_pass_write_index: Some(first + 1),
                        })
                    });
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(kernel.entry_point()),
                        timestamp_writes,
                    });
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
                }
                NodeOp::AcquireDisplay(buffer) | NodeOp::ReleaseDisplay(buffer) => {
                    // Compute and present share one queue; submission order is the hand-off.
                    self.raw_buffer(*buffer)?;
                }
            }
        }
        if let (Some(timer), true) = (self.timer.as_ref(), queries.next > 0) {
            encoder.resolve_query_set(&timer.query_set, 0..queries.next, &timer.resolve, 0);
            let bytes = u64::from(queries.next) * TIMESTAMP_BYTES;
            encoder.copy_buffer_to_buffer(&timer.resolve, 0, &timer.readback, 0, bytes);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|err| GpuError::DeviceLost(err.to_string()))
    }

    fn read_timestamps(&self, queries: &QueryCursor) -> Result<Vec<StageTiming>, GpuError> {
        let Some(timer) = self.timer.as_ref() else { return Ok(Vec::new()) };
        if queries.next == 0 {
            return Ok(Vec::new());
        }
        let slice = timer.readback.slice(0..u64::from(queries.next) * TIMESTAMP_BYTES);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait_idle()?;
        rx.recv()
            .map_err(|_| GpuError::DeviceLost("timestamp readback dropped".to_string()))?
            .map_err(|err| GpuError::DeviceLost(err.to_string()))?;
        let stamps: Vec<u64> = {
            let data = slice.get_mapped_range();
            data.chunks_exact(TIMESTAMP_BYTES as usize).map(bytemuck::pod_read_unaligned::<u64>).collect()
        };
        timer.readback.unmap();

        Ok(queries
            .nodes
            .iter()
            .map(|node| {
                let begin = stamps[node.first_query as usize];
                let end = stamps[node.first_query as usize + 1];
                StageTiming { label: node.label, nanos: (end.saturating_sub(begin) as f64 * timer.period_ns) as u64 }
            })
            .collect())
    }
}

fn storage_binding(read_only: bool) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

impl ComputeBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, GpuError> {
        self.allocate_with(desc.label, desc.size, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage: Self::storage_usage(),
                mapped_at_creation: false,
            })
        })
    }

    fn create_buffer_init(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        self.allocate_with(label, contents.len() as u64, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: Self::storage_usage(),
            })
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(raw) = self.buffers.remove(&buffer) {
            raw.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, GpuError> {
        let size = wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 };
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            desc.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * desc.width),
                rows_per_image: Some(desc.height),
            },
            size,
        );
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(format!("texture {}: {err}", desc.label)));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, GpuTexture { _texture: texture, view });
        Ok(handle)
    }

    fn create_display_surface(&mut self, width: u32, height: u32) -> Result<BufferHandle, GpuError> {
        let mut contents = vec![0u8; super::backend::display_buffer_size(width, height) as usize];
        contents[..8].copy_from_slice(bytemuck::cast_slice(&[width, height]));
        self.create_buffer_init("display", &contents)
    }

    fn execute(&mut self, graph: DispatchGraph) -> Result<FrameTimings, GpuError> {
        for node in graph.nodes() {
            if let NodeOp::Dispatch { kernel, local_size, .. } = &node.op {
                self.ensure_pipeline(*kernel, *local_size)?;
            }
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Tracer Frame"),
        });
        let mut queries = QueryCursor::default();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self.encode(&graph, &mut encoder, &mut queries);
        if encoded.is_ok() {
            self.queue.submit(Some(encoder.finish()));
        }
        let scope = pollster::block_on(self.device.pop_error_scope());
        encoded?;
        if let Some(err) = scope {
            return Err(GpuError::Validation(err.to_string()));
        }
        self.wait_idle()?;
        let stages = self.read_timestamps(&queries)?;
        Ok(FrameTimings { stages })
    }

    fn timing_supported(&self) -> bool {
        self.timer.is_some()
    }
}
