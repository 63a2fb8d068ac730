//! Per-frame host scheduling of the bounce tracer.
//!
//! Every frame the scheduler records a [`DispatchGraph`]: light and sphere
//! uploads, primary rays, per-instance vertex transforms, the bounce loop and
//! the display resolve. The backend executes it in order and blocks until the
//! queue drains, so the display buffer is presentable when `run_frame` returns.

use crate::compute::{
    BufferDesc, BufferHandle, ComputeBackend, DispatchGraph, DisplayInterop, FrameTimings, Kernel, KernelArg, NodeId,
};
use crate::error::GpuError;
use crate::gpu_types::{Light, Ray};
use crate::model::ModelInstance;
use crate::scene::Scene;
use crate::settings::TracerSettings;
use bytemuck::Pod;
use glam::Mat4;
use smallvec::smallvec;
use std::time::{Duration, Instant};

/// Largest workgroup count a single dispatch dimension may use.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

const RAY_BYTES: u64 = std::mem::size_of::<Ray>() as u64;
const ACCUMULATION_BYTES: u64 = std::mem::size_of::<[f32; 4]>() as u64;

/// Global and local sizes derived from the current settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSizes {
    pub local_2d: [u32; 2],
    pub local_1d: u32,
    /// Window grid rounded up to whole 2-D work groups.
    pub global_2d: [u32; 2],
    /// `global_2d` scaled by the supersample factor.
    pub supersampled_2d: [u32; 2],
    pub ray_count: u32,
}

impl DispatchSizes {
    pub fn new(settings: &TracerSettings, ray_count: u32) -> Self {
        let local_2d = settings.local_2d();
        let global_2d = [round_up(settings.width, local_2d[0]), round_up(settings.height, local_2d[1])];
        let ss = settings.supersampling;
        Self {
            local_2d,
            local_1d: settings.local_1d(),
            global_2d,
            supersampled_2d: [global_2d[0] * ss, global_2d[1] * ss],
            ray_count,
        }
    }

    pub fn workgroups_2d(&self, global: [u32; 2]) -> [u32; 3] {
        [global[0] / self.local_2d[0], global[1] / self.local_2d[1], 1]
    }

    /// Workgroup counts covering `items` linear invocations. Counts past the
    /// per-dimension limit fold into a second dimension.
    pub fn workgroups_1d(&self, items: u32) -> [u32; 3] {
        let groups = items.div_ceil(self.local_1d).max(1);
        if groups <= MAX_WORKGROUPS_PER_DIM {
            [groups, 1, 1]
        } else {
            [MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM), 1]
        }
    }
}

pub fn round_up(value: u32, multiple: u32) -> u32 {
    value.div_ceil(multiple) * multiple
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetKey {
    width: u32,
    height: u32,
    supersampling: u32,
}

/// Resolution-dependent buffers. Replaced wholesale on resize.
#[derive(Debug)]
struct FrameTargets {
    key: TargetKey,
    rays: BufferHandle,
    accumulation: BufferHandle,
    display: DisplayInterop,
    ray_count: u32,
}

/// What one `run_frame` call did.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub ray_count: u32,
    pub dispatches: usize,
    pub reallocated: bool,
    pub timings: FrameTimings,
    /// Host time spent recording the graph.
    pub enqueue: Duration,
    /// Host time from the start of recording until the queue drained.
    pub total: Duration,
}

#[derive(Debug)]
pub struct FrameScheduler {
    targets: Option<FrameTargets>,
    sizes: Option<DispatchSizes>,
    spheres: BufferHandle,
    sphere_count: u32,
    lights: BufferHandle,
    reallocations: usize,
}

impl FrameScheduler {
    /// Allocates the sphere and light buffers, seeded with the scene's current contents.
    pub fn new(backend: &mut dyn ComputeBackend, scene: &Scene) -> Result<Self, GpuError> {
        let spheres = backend.create_buffer_init("spheres", &at_least_one(&scene.spheres))?;
        let lights: Vec<Light> = scene.lights.iter().map(|light| light.light).collect();
        let lights = backend.create_buffer_init("lights", &at_least_one(&lights))?;
        Ok(Self {
            targets: None,
            sizes: None,
            spheres,
            sphere_count: scene.spheres.len() as u32,
            lights,
            reallocations: 0,
        })
    }

    /// Number of times the resolution-dependent buffers were (re)created.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn sizes(&self) -> Option<DispatchSizes> {
        self.sizes
    }

    pub fn ray_buffer(&self) -> Option<BufferHandle> {
        self.targets.as_ref().map(|t| t.rays)
    }

    pub fn accumulation_buffer(&self) -> Option<BufferHandle> {
        self.targets.as_ref().map(|t| t.accumulation)
    }

    pub fn display(&self) -> Option<&DisplayInterop> {
        self.targets.as_ref().map(|t| &t.display)
    }

    /// Recreates ray, accumulation and display buffers when the output size or
    /// supersample factor changed. Returns whether anything was reallocated.
    pub fn ensure_resources(
        &mut self,
        backend: &mut dyn ComputeBackend,
        settings: &TracerSettings,
    ) -> Result<bool, GpuError> {
        let key = TargetKey {
            width: settings.width,
            height: settings.height,
            supersampling: settings.supersampling,
        };
        let unchanged = self.targets.as_ref().is_some_and(|t| t.key == key);
        if unchanged {
            let ray_count = self.targets.as_ref().map_or(0, |t| t.ray_count);
            self.sizes = Some(DispatchSizes::new(settings, ray_count));
            return Ok(false);
        }

        if let Some(old) = self.targets.take() {
            backend.destroy_buffer(old.rays);
            backend.destroy_buffer(old.accumulation);
            backend.destroy_buffer(old.display.buffer());
        }

        let rays = settings.ray_count();
        let ray_count = u32::try_from(rays)
            .map_err(|_| GpuError::Allocation { label: "rays".to_string(), size: rays.saturating_mul(RAY_BYTES) })?;
        let ray_buffer = backend.create_buffer(&BufferDesc { label: "rays", size: rays * RAY_BYTES })?;
        let accumulation =
            backend.create_buffer(&BufferDesc { label: "accumulation", size: rays * ACCUMULATION_BYTES })?;
        let display_buffer = backend.create_display_surface(settings.width, settings.height)?;

        self.targets = Some(FrameTargets {
            key,
            rays: ray_buffer,
            accumulation,
            display: DisplayInterop::new(display_buffer, settings.width, settings.height),
            ray_count,
        });
        self.sizes = Some(DispatchSizes::new(settings, ray_count));
        self.reallocations += 1;
        log::info!(
            target: "scheduler",
            "allocated {}x{} targets (supersampling {}, {} rays)",
            settings.width,
            settings.height,
            settings.supersampling,
            ray_count
        );
        Ok(true)
    }

    /// Records one frame. Call [`FrameScheduler::ensure_resources`] first.
    pub fn build_frame(
        &mut self,
        scene: &mut Scene,
        settings: &TracerSettings,
        dt: f32,
    ) -> Result<DispatchGraph, GpuError> {
        let (Some(targets), Some(sizes)) = (self.targets.as_mut(), self.sizes) else {
            return Err(GpuError::Interop("frame recorded before targets were allocated"));
        };
        let mut graph = DispatchGraph::new();
        let rays = targets.rays;
        let ray_count = targets.ray_count;
        let linear = sizes.workgroups_1d(ray_count);
        let local_1d = [sizes.local_1d, 1, 1];
        let local_2d = [sizes.local_2d[0], sizes.local_2d[1], 1];

        let lights: Vec<Light> = scene.lights.iter().map(|light| light.light).collect();
        if !lights.is_empty() {
            graph.upload("Write lights", self.lights, 0, bytemuck::cast_slice(&lights).to_vec());
        }
        let snapped = (settings.num_lights as usize).min(scene.spheres.len());
        if snapped > 0 {
            let bytes = bytemuck::cast_slice(&scene.spheres[..snapped]).to_vec();
            graph.upload("Write spheres", self.spheres, 0, bytes);
        }

        let aspect = settings.width as f32 / settings.height as f32;
        let inv_view_projection = scene.camera.inv_view_projection(aspect);
        let ss = settings.supersampling;
        graph.dispatch(
            Kernel::PrimaryRays,
            smallvec![
                KernelArg::Buffer(rays),
                KernelArg::Mat4(inv_view_projection.transpose()),
                KernelArg::Vec4(scene.camera.position().extend(1.0)),
                KernelArg::U32(settings.width * ss),
                KernelArg::U32(settings.height * ss),
                KernelArg::Buffer(targets.accumulation),
            ],
            sizes.workgroups_2d(sizes.supersampled_2d),
            local_2d,
        )?;

        for instance in scene.instances.iter_mut().filter(|instance| instance.active) {
            let model = &scene.models[instance.model()];
            let vertex_count = model.vertex_count();
            let world = instance.advance(dt);
            let transformed = instance.transformed();
            let groups = sizes.workgroups_1d(vertex_count);
            match instance.skeleton_mut() {
                Some(skeleton) => {
                    skeleton.set_world(world);
                    let matrices = skeleton.transform_buffer(&mut graph);
                    graph.dispatch(
                        Kernel::TransformSkeletalVertices,
                        smallvec![
                            KernelArg::Buffer(model.base_vertices()),
                            KernelArg::Buffer(transformed),
                            KernelArg::Buffer(matrices),
                            KernelArg::U32(vertex_count),
                        ],
                        groups,
                        local_1d,
                    )?;
                }
                None => {
                    let (world_t, inverse) = rigid_transform_args(world);
                    graph.dispatch(
                        Kernel::TransformVertices,
                        smallvec![
                            KernelArg::Buffer(model.base_vertices()),
                            KernelArg::Buffer(transformed),
                            KernelArg::Mat4(world_t),
                            KernelArg::Mat4(inverse),
                            KernelArg::U32(vertex_count),
                        ],
                        groups,
                        local_1d,
                    )?;
                }
            }
        }

        let active: Vec<(i32, &ModelInstance)> = scene
            .instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.active)
            .map(|(index, instance)| (index as i32 + 1, instance))
            .collect();

        for _ in 0..settings.num_bounces {
            graph.dispatch(
                Kernel::FindClosestSpheres,
                smallvec![
                    KernelArg::Buffer(rays),
                    KernelArg::U32(ray_count),
                    KernelArg::Buffer(self.spheres),
                    KernelArg::U32(self.sphere_count),
                    KernelArg::I32(0),
                ],
                linear,
                local_1d,
            )?;
            for &(object_id, instance) in &active {
                let model = &scene.models[instance.model()];
                graph.dispatch(
                    Kernel::FindClosestTriangles,
                    smallvec![
                        KernelArg::Buffer(rays),
                        KernelArg::U32(ray_count),
                        KernelArg::Buffer(instance.transformed()),
                        KernelArg::U32(model.triangle_count()),
                        KernelArg::F32(settings.reflect),
                        KernelArg::Texture(model.diffuse()),
                        KernelArg::Texture(model.normal()),
                        KernelArg::I32(object_id),
                    ],
                    linear,
                    local_1d,
                )?;
            }
            graph.dispatch(
                Kernel::MoveRays,
                smallvec![KernelArg::Buffer(rays), KernelArg::U32(ray_count)],
                linear,
                local_1d,
            )?;

            for light in 0..settings.num_lights {
                graph.dispatch(
                    Kernel::UpdateRaysToLight,
                    smallvec![
                        KernelArg::Buffer(rays),
                        KernelArg::U32(ray_count),
                        KernelArg::Buffer(self.lights),
                        KernelArg::U32(light),
                    ],
                    linear,
                    local_1d,
                )?;
                graph.dispatch(
                    Kernel::ShadowSpheres,
                    smallvec![
                        KernelArg::Buffer(rays),
                        KernelArg::U32(ray_count),
                        KernelArg::Buffer(self.spheres),
                        KernelArg::U32(self.sphere_count),
                        KernelArg::I32(0),
                    ],
                    linear,
                    local_1d,
                )?;
                for &(object_id, instance) in &active {
                    let model = &scene.models[instance.model()];
                    graph.dispatch(
                        Kernel::ShadowTriangles,
                        smallvec![
                            KernelArg::Buffer(rays),
                            KernelArg::U32(ray_count),
                            KernelArg::Buffer(instance.transformed()),
                            KernelArg::U32(model.triangle_count()),
                            KernelArg::I32(object_id),
                        ],
                        linear,
                        local_1d,
                    )?;
                }
                graph.dispatch(
                    Kernel::Accumulate,
                    smallvec![
                        KernelArg::Buffer(targets.accumulation),
                        KernelArg::Buffer(rays),
                        KernelArg::U32(ray_count),
                        KernelArg::Buffer(self.lights),
                        KernelArg::U32(light),
                    ],
                    linear,
                    local_1d,
                )?;
            }
        }

        let display = targets.display.acquire()?;
        graph.acquire_display(display);
        graph.dispatch(
            Kernel::DumpImage,
            smallvec![
                KernelArg::Buffer(targets.accumulation),
                KernelArg::Buffer(rays),
                KernelArg::Buffer(display),
                KernelArg::U32(ss),
            ],
            sizes.workgroups_2d(sizes.global_2d),
            local_2d,
        )?;
        graph.release_display(display);
        targets.display.release()?;
        Ok(graph)
    }

    /// Resize check, record, submit and wait for one frame.
    pub fn run_frame(
        &mut self,
        backend: &mut dyn ComputeBackend,
        scene: &mut Scene,
        settings: &TracerSettings,
        dt: f32,
    ) -> Result<FrameReport, GpuError> {
        let reallocated = self.ensure_resources(backend, settings)?;
        let start = Instant::now();
        let graph = self.build_frame(scene, settings, dt)?;
        let enqueue = start.elapsed();
        let dispatches = graph.dispatches().count();
        log::trace!(
            target: "scheduler",
            "frame graph: {} nodes, {} dispatches, parallelism {}",
            graph.len(),
            dispatches,
            graph.max_parallelism()
        );
        let timings = backend.execute(graph)?;
        Ok(FrameReport {
            ray_count: self.targets.as_ref().map_or(0, |t| t.ray_count),
            dispatches,
            reallocated,
            timings,
            enqueue,
            total: start.elapsed(),
        })
    }
}

/// Buffer contents for `items`, zero-padded to one element so the buffer is never empty.
fn at_least_one<T: Pod>(items: &[T]) -> Vec<u8> {
    if items.is_empty() {
        vec![0; std::mem::size_of::<T>()]
    } else {
        bytemuck::cast_slice(items).to_vec()
    }
}

/// Dispatch node ids of `kernel` in `graph`, in submission order.
pub fn dispatch_ids(graph: &DispatchGraph, kernel: Kernel) -> Vec<NodeId> {
    graph.dispatches().filter(|(_, node)| node.kernel() == Some(kernel)).map(|(id, _)| id).collect()
}

/// Transposed world matrix and its inverse, as `transformVertices` takes them.
pub fn rigid_transform_args(world: Mat4) -> (Mat4, Mat4) {
    (world.transpose(), world.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FlyCamera;
    use crate::compute::{NodeOp, RecordingBackend};
    use crate::config::CameraConfig;
    use crate::mesh::MeshData;
    use crate::model::{Geometry, ModelAsset};
    use crate::texture::{TextureData, WHITE};
    use crate::transform::CachedTransform;
    use crate::tube::Tube;
    use glam::Vec3;

    fn cube_asset() -> ModelAsset {
        ModelAsset::from_mesh(MeshData::cube(1.0), TextureData::solid(WHITE), TextureData::solid(WHITE))
    }

    fn tube_asset() -> ModelAsset {
        let tube = Tube::generate().unwrap();
        ModelAsset {
            name: "tube".into(),
            geometry: Geometry::Skinned { vertices: tube.vertices, bind_pose: tube.bind_pose },
            diffuse: TextureData::solid(WHITE),
            normal: TextureData::solid(WHITE),
        }
    }

    fn scene_with(backend: &mut RecordingBackend, assets: &[ModelAsset]) -> Scene {
        let mut scene =
            Scene::new(FlyCamera::from_config(&CameraConfig::default()), crate::scene::random_spheres(5, 1));
        for asset in assets {
            scene.add_model(backend, asset, CachedTransform::identity(), Vec3::Y, 0.5).unwrap();
        }
        scene
    }

    fn settings(width: u32, height: u32, bounces: u32, lights: u32) -> TracerSettings {
        TracerSettings { width, height, num_bounces: bounces, num_lights: lights, ..TracerSettings::default() }
    }

    #[test]
    fn dispatch_counts_follow_bounces_lights_and_models() {
        let mut backend = RecordingBackend::new();
        let mut scene = scene_with(&mut backend, &[cube_asset(), tube_asset()]);
        let mut scheduler = FrameScheduler::new(&mut backend, &scene).unwrap();
        let settings = settings(64, 32, 3, 2);
        let report = scheduler.run_frame(&mut backend, &mut scene, &settings, 0.016).unwrap();

        let graph = backend.last_frame().unwrap();
        let shadows = graph.count(Kernel::ShadowSpheres) + graph.count(Kernel::ShadowTriangles);
        assert_eq!(shadows, 3 * 2 * (1 + 2));
        assert_eq!(graph.count(Kernel::Accumulate), 3 * 2);
        assert_eq!(graph.count(Kernel::FindClosestTriangles), 3 * 2);
        assert_eq!(graph.count(Kernel::TransformVertices), 1);
        assert_eq!(graph.count(Kernel::TransformSkeletalVertices), 1);
        assert_eq!(graph.count(Kernel::PrimaryRays), 1);
        assert_eq!(graph.count(Kernel::DumpImage), 1);
        assert_eq!(report.ray_count, 64 * 32);
        assert!(report.reallocated);
    }

    #[test]
    fn accumulations_are_serialized() {
        let mut backend = RecordingBackend::new();
        let mut scene = scene_with(&mut backend, &[cube_asset()]);
        let mut scheduler = FrameScheduler::new(&mut backend, &scene).unwrap();
        scheduler.run_frame(&mut backend, &mut scene, &settings(32, 32, 2, 3), 0.0).unwrap();
        let graph = backend.last_frame().unwrap();
        let ids = dispatch_ids(graph, Kernel::Accumulate);
        for pair in ids.windows(2) {
            assert!(graph.depends_on(pair[1], pair[0]));
        }
    }

    #[test]
    fn display_is_bracketed_by_acquire_and_release() {
        let mut backend = RecordingBackend::new();
        let mut scene = scene_with(&mut backend, &[]);
        let mut scheduler = FrameScheduler::new(&mut backend, &scene).unwrap();
        scheduler.run_frame(&mut backend, &mut scene, &settings(32, 32, 1, 1), 0.0).unwrap();
        let graph = backend.last_frame().unwrap();
        let nodes = graph.nodes();
        let acquire = nodes.iter().position(|n| matches!(n.op, NodeOp::AcquireDisplay(_))).unwrap();
        let dump = dispatch_ids(graph, Kernel::DumpImage)[0];
        let release = nodes.iter().position(|n| matches!(n.op, NodeOp::ReleaseDisplay(_))).unwrap();
        assert!(acquire < dump && dump < release);
        for id in 0..acquire {
            assert!(graph.depends_on(acquire, id));
        }
        assert!(graph.depends_on(release, dump));
        assert!(!scheduler.display().unwrap().is_acquired());
    }

    #[test]
    fn skinned_upload_precedes_skeletal_transform() {
        let mut backend = RecordingBackend::new();
        let mut scene = scene_with(&mut backend, &[tube_asset()]);
        let mut scheduler = FrameScheduler::new(&mut backend, &scene).unwrap();
        scheduler.run_frame(&mut backend, &mut scene, &settings(32, 32, 1, 1), 0.1).unwrap();
        let graph = backend.last_frame().unwrap();
        let upload = graph.nodes().iter().position(|n| n.label == "Write skinning").unwrap();
        let transform = dispatch_ids(graph, Kernel::TransformSkeletalVertices)[0];
        assert!(graph.depends_on(transform, upload));
        assert_eq!(scene.instances[0].skeleton().unwrap().upload_count(), 1);
    }

    #[test]
    fn sphere_upload_covers_only_light_spheres() {
        let mut backend = RecordingBackend::new();
        let mut scene = scene_with(&mut backend, &[]);
        let mut scheduler = FrameScheduler::new(&mut backend, &scene).unwrap();
        scheduler.run_frame(&mut backend, &mut scene, &settings(32, 32, 1, 3), 0.0).unwrap();
        let graph = backend.last_frame().unwrap();
        let sizes: Vec<(&str, usize)> = graph
            .nodes()
            .iter()
            .filter_map(|n| match &n.op {
                NodeOp::Upload { data, .. } => Some((n.label, data.len())),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![("Write lights", 10 * 32), ("Write spheres", 3 * 48)]);
    }

    #[test]
    fn linear_dispatches_fold_past_dimension_limit() {
        let sizes = DispatchSizes::new(&settings(64, 64, 1, 1), 0);
        assert_eq!(sizes.workgroups_1d(100), [4, 1, 1]);
        assert_eq!(sizes.workgroups_1d(0), [1, 1, 1]);
        let big = 32 * MAX_WORKGROUPS_PER_DIM * 2 + 1;
        let groups = sizes.workgroups_1d(big);
        assert_eq!(groups[0], MAX_WORKGROUPS_PER_DIM);
        assert!(u64::from(groups[0]) * u64::from(groups[1]) * 32 >= u64::from(big));
    }

    #[test]
    fn global_sizes_round_up_to_work_groups() {
        let mut s = settings(1000, 750, 1, 1);
        s.work_group_size = 64;
        s.supersampling = 2;
        let sizes = DispatchSizes::new(&s, 0);
        assert_eq!(sizes.local_2d, [32, 2]);
        assert_eq!(sizes.global_2d, [1024, 750]);
        assert_eq!(sizes.supersampled_2d, [2048, 1500]);
        assert_eq!(sizes.workgroups_2d(sizes.global_2d), [32, 375, 1]);
    }

    #[test]
    fn rigid_args_are_transpose_and_inverse() {
        let world = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_y(0.4),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let (t, inv) = rigid_transform_args(world);
        assert_eq!(t.transpose(), world);
        assert!((inv * world).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }
}
