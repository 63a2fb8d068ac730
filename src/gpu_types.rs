//! Kernel-facing structs. Field order and padding mirror the WGSL declarations.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub origin: [f32; 4],
    pub direction: [f32; 4],
    pub diffuse_reflectivity: [f32; 4],
    pub surface_normal: [f32; 4],
    pub reflect_dir: [f32; 4],
    pub distance: f32,
    pub shininess: f32,
    pub strength: f32,
    pub total_strength: f32,
    pub in_shadow: i32,
    pub collide_group: i32,
    pub collide_object: i32,
    pub _padding: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Sphere {
    pub position: [f32; 4],
    pub diffuse_reflectivity: [f32; 4],
    pub radius: f32,
    pub reflect_fraction: f32,
    pub _padding: [f32; 2],
}

impl Sphere {
    pub fn new(position: Vec3, diffuse_reflectivity: Vec3, radius: f32, reflect_fraction: f32) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            diffuse_reflectivity: diffuse_reflectivity.extend(1.0).to_array(),
            radius,
            reflect_fraction,
            _padding: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub position: [f32; 4],
    pub intensity: [f32; 4],
}

impl Light {
    pub fn new(position: Vec4, intensity: Vec4) -> Self {
        Self { position: position.to_array(), intensity: intensity.to_array() }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub tex_coord: [f32; 4],
    pub normal: [f32; 4],
    pub tangent: [f32; 4],
    pub bitangent: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec3, tex_coord: [f32; 2], normal: Vec3, tangent: Vec3, bitangent: Vec3) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            tex_coord: [tex_coord[0], tex_coord[1], 0.0, 0.0],
            normal: normal.extend(0.0).to_array(),
            tangent: tangent.extend(0.0).to_array(),
            bitangent: bitangent.extend(0.0).to_array(),
        }
    }

    pub fn position3(&self) -> Vec3 {
        Vec4::from_array(self.position).truncate()
    }
}

/// A vertex rigidly bound to a single bone.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkinnedVertex {
    pub vertex: Vertex,
    pub bone: u32,
    pub _padding: [u32; 3],
}

impl SkinnedVertex {
    pub fn new(vertex: Vertex, bone: u32) -> Self {
        Self { vertex, bone, _padding: [0; 3] }
    }
}

const _: () = assert!(std::mem::size_of::<Ray>() == 112);
const _: () = assert!(std::mem::size_of::<Sphere>() == 48);
const _: () = assert!(std::mem::size_of::<Light>() == 32);
const _: () = assert!(std::mem::size_of::<Vertex>() == 80);
const _: () = assert!(std::mem::size_of::<SkinnedVertex>() == 96);
