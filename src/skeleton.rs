//! Bind pose, live pose and the skinning-matrix buffer of one animated instance.

pub mod bone;
pub mod pose;

pub use bone::{setup_hierarchy, Bone, Children};
pub use pose::Pose;

use crate::compute::{BufferDesc, BufferHandle, ComputeBackend, DispatchGraph};
use crate::error::GpuError;
use glam::Mat4;
use std::sync::Arc;

pub const MATRIX_BYTES: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Stale,
    Fresh,
}

#[derive(Debug)]
pub struct Skeleton {
    bind: Arc<Pose>,
    current: Pose,
    world: Mat4,
    offsets: Vec<Mat4>,
    staged: Vec<[[f32; 4]; 4]>,
    buffer: BufferHandle,
    state: BufferState,
    uploads: usize,
}

impl Skeleton {
    /// Wraps an already allocated buffer of `bind.bone_count()` matrices.
    pub fn new(bind: Arc<Pose>, buffer: BufferHandle) -> Self {
        let count = bind.bone_count();
        let current = Pose::from_bind(&bind);
        Self {
            bind,
            current,
            world: Mat4::IDENTITY,
            offsets: vec![Mat4::IDENTITY; count],
            staged: vec![Mat4::IDENTITY.to_cols_array_2d(); count],
            buffer,
            state: BufferState::Stale,
            uploads: 0,
        }
    }

    pub fn create(backend: &mut dyn ComputeBackend, bind: Arc<Pose>) -> Result<Self, GpuError> {
        let size = MATRIX_BYTES * bind.bone_count() as u64;
        let buffer = backend.create_buffer(&BufferDesc { label: "skinning matrices", size })?;
        Ok(Self::new(bind, buffer))
    }

    pub fn bind_pose(&self) -> &Arc<Pose> {
        &self.bind
    }

    pub fn current_pose(&self) -> &Pose {
        &self.current
    }

    /// Mutable access to the live pose. Marks the skinning buffer stale.
    pub fn current_pose_mut(&mut self) -> &mut Pose {
        self.state = BufferState::Stale;
        &mut self.current
    }

    pub fn bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.state = BufferState::Stale;
        self.current.bone_mut(index)
    }

    /// Always marks stale, even for an unchanged matrix.
    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
        self.state = BufferState::Stale;
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn offsets(&self) -> &[Mat4] {
        &self.offsets
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn is_stale(&self) -> bool {
        self.state == BufferState::Stale
    }

    /// Number of recompute-and-upload cycles so far.
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Returns the skinning buffer, recording an upload of `transpose(world * offset)`
    /// per bone into `graph` first if anything changed since the last call.
    pub fn transform_buffer(&mut self, graph: &mut DispatchGraph) -> BufferHandle {
        if self.state == BufferState::Stale {
            self.bind.write_offsets(&self.current, &mut self.offsets);
            for (slot, offset) in self.staged.iter_mut().zip(&self.offsets) {
                *slot = (self.world * *offset).transpose().to_cols_array_2d();
            }
            let bytes = bytemuck::cast_slice(&self.staged).to_vec();
            graph.upload("Write skinning", self.buffer, 0, bytes);
            self.state = BufferState::Fresh;
            self.uploads += 1;
        }
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::CachedTransform;
    use glam::{Quat, Vec3};

    fn two_bone_bind() -> Arc<Pose> {
        Arc::new(
            Pose::new(vec![
                Bone::new("root", None, CachedTransform::identity()),
                Bone::new("child", Some(0), CachedTransform::from_translation(Vec3::Y)),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn mutation_triggers_exactly_one_upload() {
        let mut skeleton = Skeleton::new(two_bone_bind(), BufferHandle(0));
        let mut graph = DispatchGraph::new();
        skeleton.transform_buffer(&mut graph);
        assert_eq!(skeleton.upload_count(), 1);
        skeleton.transform_buffer(&mut graph);
        assert_eq!(skeleton.upload_count(), 1);
        assert_eq!(graph.len(), 1);

        skeleton.set_world(Mat4::from_translation(Vec3::X));
        skeleton.transform_buffer(&mut graph);
        skeleton.transform_buffer(&mut graph);
        assert_eq!(skeleton.upload_count(), 2);

        if let Some(bone) = skeleton.bone_mut(1) {
            bone.local.set_orientation(Quat::from_rotation_z(0.3));
        }
        assert!(skeleton.is_stale());
        skeleton.transform_buffer(&mut graph);
        skeleton.transform_buffer(&mut graph);
        assert_eq!(skeleton.upload_count(), 3);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn uploaded_matrices_are_transposed_world_times_offset() {
        let mut skeleton = Skeleton::new(two_bone_bind(), BufferHandle(0));
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        skeleton.set_world(world);
        let mut graph = DispatchGraph::new();
        skeleton.transform_buffer(&mut graph);
        let crate::compute::NodeOp::Upload { data, .. } = &graph.nodes()[0].op else {
            panic!("expected an upload node");
        };
        let floats: &[f32] = bytemuck::cast_slice(data);
        assert_eq!(floats.len(), 32);
        let uploaded = Mat4::from_cols_slice(&floats[..16]);
        assert!(uploaded.abs_diff_eq(world.transpose(), 1e-6));
    }
}
