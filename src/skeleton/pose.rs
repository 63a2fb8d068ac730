use super::bone::{setup_hierarchy, Bone, Children};
use crate::error::HierarchyError;
use glam::Mat4;

/// Ordered bones sharing one topology. Bone 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    bones: Vec<Bone>,
}

impl Pose {
    pub fn new(mut bones: Vec<Bone>) -> Result<Self, HierarchyError> {
        setup_hierarchy(&mut bones)?;
        Ok(Self { bones })
    }

    /// Clones `bind` as the starting point of a per-instance pose.
    pub fn from_bind(bind: &Pose) -> Self {
        bind.clone()
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn children(&self, index: usize) -> Children<'_> {
        Children::new(&self.bones, index)
    }

    /// Number of parent hops from `index` to the root.
    pub fn depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut cursor = self.bones.get(index).and_then(Bone::parent);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.bones[parent].parent();
        }
        depth
    }

    /// Root-to-bone product of local matrices. Recomputed on every call.
    pub fn object_transform(&self, index: usize) -> Mat4 {
        let bone = &self.bones[index];
        let local = bone.local.matrix();
        match bone.parent() {
            None => local,
            Some(parent) => self.object_transform(parent) * local,
        }
    }

    /// Writes, per bone, the matrix taking bind-space placement (`self`) to `other`.
    pub fn calculate_offset_to(&self, other: &Pose, out: &mut [Mat4]) -> Result<(), HierarchyError> {
        if self.bone_count() != other.bone_count() {
            return Err(HierarchyError::BoneCountMismatch { bind: self.bone_count(), current: other.bone_count() });
        }
        if out.len() != self.bone_count() {
            return Err(HierarchyError::OffsetSlotMismatch { bones: self.bone_count(), slots: out.len() });
        }
        self.write_offsets(other, out);
        Ok(())
    }

    pub(crate) fn write_offsets(&self, other: &Pose, out: &mut [Mat4]) {
        debug_assert_eq!(self.bone_count(), other.bone_count());
        debug_assert_eq!(self.bone_count(), out.len());
        for (index, slot) in out.iter_mut().enumerate() {
            *slot = other.object_transform(index) * self.object_transform(index).inverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::CachedTransform;
    use glam::{Quat, Vec3};

    fn chain(len: usize) -> Pose {
        let bones = (0..len)
            .map(|i| {
                let parent = i.checked_sub(1);
                let offset = if i == 0 { Vec3::ZERO } else { Vec3::X };
                Bone::new(format!("bone{i}"), parent, CachedTransform::from_translation(offset))
            })
            .collect();
        Pose::new(bones).unwrap()
    }

    #[test]
    fn object_transform_chains_parents() {
        let pose = chain(4);
        let tip = pose.object_transform(3).transform_point3(Vec3::ZERO);
        assert!((tip - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(pose.depth(3), 3);
        assert_eq!(pose.depth(0), 0);
        assert_eq!(pose.find("bone2"), Some(2));
    }

    #[test]
    fn identical_poses_give_identity_offsets() {
        let bind = chain(5);
        let mut current = Pose::from_bind(&bind);
        if let Some(bone) = current.bone_mut(2) {
            bone.local.set_orientation(Quat::from_rotation_y(1.0));
            bone.local.set_orientation(Quat::IDENTITY);
        }
        let mut out = vec![Mat4::ZERO; 5];
        bind.calculate_offset_to(&current, &mut out).unwrap();
        for m in out {
            assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-5));
        }
    }

    #[test]
    fn mismatched_counts_are_reported() {
        let bind = chain(3);
        let current = chain(2);
        let mut out = vec![Mat4::IDENTITY; 3];
        let err = bind.calculate_offset_to(&current, &mut out).unwrap_err();
        assert_eq!(err, HierarchyError::BoneCountMismatch { bind: 3, current: 2 });

        let mut short = vec![Mat4::IDENTITY; 2];
        let err = bind.calculate_offset_to(&Pose::from_bind(&bind), &mut short).unwrap_err();
        assert_eq!(err, HierarchyError::OffsetSlotMismatch { bones: 3, slots: 2 });
    }
}
