//! Shared model geometry and the per-instance state that places it in the scene.

use crate::compute::{BufferDesc, BufferHandle, ComputeBackend, TextureHandle};
use crate::error::GpuError;
use crate::gpu_types::{SkinnedVertex, Vertex};
use crate::mesh::MeshData;
use crate::skeleton::{Pose, Skeleton};
use crate::texture::TextureData;
use crate::transform::CachedTransform;
use glam::{Mat4, Vec3};
use std::sync::Arc;

pub const VERTEX_BYTES: u64 = std::mem::size_of::<Vertex>() as u64;

/// Host-side geometry ready for upload.
#[derive(Debug, Clone)]
pub enum Geometry {
    Static(Vec<Vertex>),
    Skinned { vertices: Vec<SkinnedVertex>, bind_pose: Pose },
}

#[derive(Debug, Clone)]
pub struct ModelAsset {
    pub name: String,
    pub geometry: Geometry,
    pub diffuse: TextureData,
    pub normal: TextureData,
}

impl ModelAsset {
    pub fn from_mesh(mesh: MeshData, diffuse: TextureData, normal: TextureData) -> Self {
        Self { name: mesh.name, geometry: Geometry::Static(mesh.vertices), diffuse, normal }
    }

    pub fn vertex_count(&self) -> usize {
        match &self.geometry {
            Geometry::Static(vertices) => vertices.len(),
            Geometry::Skinned { vertices, .. } => vertices.len(),
        }
    }
}

/// Geometry shared by every instance: base vertices, optional bind pose and texture maps.
#[derive(Debug)]
pub struct Model {
    pub name: String,
    base_vertices: BufferHandle,
    vertex_count: u32,
    bind_pose: Option<Arc<Pose>>,
    diffuse: TextureHandle,
    normal: TextureHandle,
}

impl Model {
    pub fn upload(backend: &mut dyn ComputeBackend, asset: &ModelAsset) -> Result<Self, GpuError> {
        let (base_vertices, bind_pose) = match &asset.geometry {
            Geometry::Static(vertices) => {
                (backend.create_buffer_init("model vertices", bytemuck::cast_slice(vertices))?, None)
            }
            Geometry::Skinned { vertices, bind_pose } => (
                backend.create_buffer_init("skinned vertices", bytemuck::cast_slice(vertices))?,
                Some(Arc::new(bind_pose.clone())),
            ),
        };
        Ok(Self {
            name: asset.name.clone(),
            base_vertices,
            vertex_count: asset.vertex_count() as u32,
            bind_pose,
            diffuse: asset.diffuse.upload(backend, "diffuse map")?,
            normal: asset.normal.upload(backend, "normal map")?,
        })
    }

    pub fn base_vertices(&self) -> BufferHandle {
        self.base_vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.vertex_count / 3
    }

    pub fn bind_pose(&self) -> Option<&Arc<Pose>> {
        self.bind_pose.as_ref()
    }

    pub fn is_animated(&self) -> bool {
        self.bind_pose.is_some()
    }

    pub fn diffuse(&self) -> TextureHandle {
        self.diffuse
    }

    pub fn normal(&self) -> TextureHandle {
        self.normal
    }
}

/// One placement of a [`Model`]. Owns the transformed-vertex scratch buffer its
/// intersection dispatches read, and a skeleton when the model is animated.
#[derive(Debug)]
pub struct ModelInstance {
    model: usize,
    pub world: CachedTransform,
    spin_axis: Vec3,
    /// Radians per second.
    spin_speed: f32,
    pub active: bool,
    transformed: BufferHandle,
    skeleton: Option<Skeleton>,
}

impl ModelInstance {
    pub fn new(
        backend: &mut dyn ComputeBackend,
        model_index: usize,
        model: &Model,
        world: CachedTransform,
        spin_axis: Vec3,
        spin_speed: f32,
    ) -> Result<Self, GpuError> {
        let size = VERTEX_BYTES * u64::from(model.vertex_count().max(3));
        let transformed = backend.create_buffer(&BufferDesc { label: "transformed vertices", size })?;
        let skeleton = match model.bind_pose() {
            Some(bind) => Some(Skeleton::create(backend, Arc::clone(bind))?),
            None => None,
        };
        Ok(Self { model: model_index, world, spin_axis, spin_speed, active: true, transformed, skeleton })
    }

    pub fn model(&self) -> usize {
        self.model
    }

    pub fn transformed(&self) -> BufferHandle {
        self.transformed
    }

    pub fn spin_speed(&self) -> f32 {
        self.spin_speed
    }

    pub fn skeleton(&self) -> Option<&Skeleton> {
        self.skeleton.as_ref()
    }

    pub fn skeleton_mut(&mut self) -> Option<&mut Skeleton> {
        self.skeleton.as_mut()
    }

    pub fn toggle(&mut self) {
        self.active = !self.active;
    }

    /// Spins by `spin_speed * dt` and returns the refreshed world matrix.
    pub fn advance(&mut self, dt: f32) -> Mat4 {
        self.world.rotate(self.spin_axis, self.spin_speed * dt);
        self.world.refresh()
    }
}
