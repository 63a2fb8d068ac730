//! Procedural box tube with a chain of bones along its length.

use crate::error::HierarchyError;
use crate::gpu_types::{SkinnedVertex, Vertex};
use crate::skeleton::{Bone, Pose};
use crate::transform::CachedTransform;
use glam::{Vec2, Vec3};

pub const SEGMENTS: usize = 10;
pub const LENGTH: f32 = 10.0;
const HALF_WIDTH: f32 = 0.5;

const TEX_BASE: Vec2 = Vec2::new(3.0 / 8.0, 0.0);
const TEX_RIGHT: Vec2 = Vec2::new(1.0 / 4.0, 0.0);
const TEX_UP: Vec2 = Vec2::new(0.0, 1.0 / 4.0);

/// Generated tube geometry: a flat triangle list plus its bind pose.
#[derive(Debug, Clone)]
pub struct Tube {
    pub vertices: Vec<SkinnedVertex>,
    pub bind_pose: Pose,
    bone_positions: Vec<Vec3>,
}

impl Tube {
    pub fn generate() -> Result<Self, HierarchyError> {
        let length_dir = Vec3::X;
        let height_dir = Vec3::Y;
        let width_dir = length_dir.cross(height_dir);
        let min_pos = -HALF_WIDTH * width_dir - HALF_WIDTH * height_dir;

        let width = 2.0 * HALF_WIDTH * width_dir;
        let height = 2.0 * HALF_WIDTH * height_dir;
        let step = (LENGTH / SEGMENTS as f32) * length_dir;

        let mut builder = Builder::default();
        builder.quad(min_pos, width, height);
        for i in 0..SEGMENTS {
            let pos = i as f32 * step;
            builder.segment(pos, step, width);
            builder.bone(pos);
        }
        builder.quad(min_pos + width + LENGTH * length_dir, -width, height);
        builder.bone(LENGTH * length_dir);

        builder.finish()
    }

    pub fn bone_positions(&self) -> &[Vec3] {
        &self.bone_positions
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

#[derive(Default)]
struct Builder {
    corners: Vec<Vertex>,
    bones: Vec<Bone>,
    bone_positions: Vec<Vec3>,
}

impl Builder {
    fn quad(&mut self, pos: Vec3, right: Vec3, up: Vec3) {
        let normal = right.cross(up).normalize();
        let tangent = right.normalize();
        let bitangent = up.normalize();
        let corner = |offset: Vec3, tex: Vec2| {
            Vertex::new(pos + offset, tex.to_array(), normal, tangent, bitangent)
        };
        let quad = [
            corner(Vec3::ZERO, TEX_BASE),
            corner(right, TEX_BASE + TEX_RIGHT),
            corner(right + up, TEX_BASE + TEX_RIGHT + TEX_UP),
            corner(up, TEX_BASE + TEX_UP),
        ];
        self.corners.extend_from_slice(&[quad[0], quad[1], quad[2], quad[0], quad[2], quad[3]]);
    }

    /// Four side walls of one segment starting at `pos`.
    fn segment(&mut self, pos: Vec3, forward: Vec3, width: Vec3) {
        let perp = forward.normalize().cross(width);
        let base = pos - 0.5 * width - 0.5 * perp;
        self.quad(base, forward, perp);
        self.quad(base + perp, forward, width);
        self.quad(base + perp + width, forward, -perp);
        self.quad(base + width, forward, -width);
    }

    /// Appends a bone at `pos`, parented to the previous one and placed relative to it.
    fn bone(&mut self, pos: Vec3) {
        let previous = self.bone_positions.last().copied().unwrap_or(Vec3::ZERO);
        let index = self.bones.len();
        self.bones.push(Bone::new(
            format!("bone{index}"),
            index.checked_sub(1),
            CachedTransform::from_translation(pos - previous),
        ));
        self.bone_positions.push(pos);
    }

    fn finish(self) -> Result<Tube, HierarchyError> {
        let vertices = self
            .corners
            .iter()
            .map(|vertex| SkinnedVertex::new(*vertex, closest_bone(vertex.position3(), &self.bone_positions)))
            .collect();
        let bind_pose = Pose::new(self.bones)?;
        Ok(Tube { vertices, bind_pose, bone_positions: self.bone_positions })
    }
}

/// Index of the nearest bone by squared distance; ties go to the lower index.
fn closest_bone(position: Vec3, bones: &[Vec3]) -> u32 {
    let mut best = 0;
    let mut best_sq = f32::MAX;
    for (index, bone) in bones.iter().enumerate() {
        let dist_sq = position.distance_squared(*bone);
        if dist_sq < best_sq {
            best_sq = dist_sq;
            best = index;
        }
    }
    best as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tube_has_chained_bones_and_capped_walls() {
        let tube = Tube::generate().unwrap();
        assert_eq!(tube.bind_pose.bone_count(), SEGMENTS + 1);
        assert_eq!(tube.vertices.len(), (2 + 4 * SEGMENTS) * 6);
        assert_eq!(tube.triangle_count(), (2 + 4 * SEGMENTS) * 2);
        assert_eq!(tube.bind_pose.depth(SEGMENTS), SEGMENTS);
        let tip = tube.bind_pose.object_transform(SEGMENTS).transform_point3(Vec3::ZERO);
        assert!((tip - Vec3::new(LENGTH, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn vertices_bind_to_nearest_bone() {
        let tube = Tube::generate().unwrap();
        for skinned in &tube.vertices {
            let position = skinned.vertex.position3();
            let bound = tube.bone_positions()[skinned.bone as usize];
            for other in tube.bone_positions() {
                assert!(position.distance_squared(bound) <= position.distance_squared(*other) + 1e-5);
            }
        }
        assert_eq!(tube.vertices[0].bone, 0);
        assert_eq!(tube.vertices.last().map(|v| v.bone), Some(SEGMENTS as u32));
    }

    #[test]
    fn end_caps_face_outwards() {
        let tube = Tube::generate().unwrap();
        let first = tube.vertices[0].vertex.normal;
        let last = tube.vertices[tube.vertices.len() - 1].vertex.normal;
        assert_eq!(first, [-1.0, 0.0, 0.0, 0.0]);
        assert_eq!(last, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn ties_prefer_lower_bone() {
        let bones = [Vec3::ZERO, Vec3::X];
        assert_eq!(closest_bone(Vec3::new(0.5, 0.0, 0.0), &bones), 0);
    }
}
