//! Positional call contract of the kernel program.
//!
//! Buffers and textures bind to `@group(0)` at their argument index. Scalar,
//! vector and matrix arguments are packed in order into one uniform block at
//! [`UNIFORM_BINDING`] using WGSL uniform alignment rules.

use super::backend::{BufferHandle, TextureHandle};
use crate::error::KernelError;
use glam::{Mat4, Vec4};
use smallvec::SmallVec;

pub const UNIFORM_BINDING: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kernel {
    PrimaryRays,
    TransformVertices,
    TransformSkeletalVertices,
    FindClosestSpheres,
    FindClosestTriangles,
    MoveRays,
    UpdateRaysToLight,
    ShadowSpheres,
    ShadowTriangles,
    Accumulate,
    DumpImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    BufferRead,
    BufferWrite,
    BufferReadWrite,
    Texture,
    U32,
    I32,
    F32,
    Vec4,
    Mat4,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::BufferRead => "read-only buffer",
            ParamKind::BufferWrite => "write buffer",
            ParamKind::BufferReadWrite => "read-write buffer",
            ParamKind::Texture => "texture",
            ParamKind::U32 => "u32",
            ParamKind::I32 => "i32",
            ParamKind::F32 => "f32",
            ParamKind::Vec4 => "vec4<f32>",
            ParamKind::Mat4 => "mat4x4<f32>",
        }
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, ParamKind::BufferRead | ParamKind::BufferWrite | ParamKind::BufferReadWrite)
    }

    pub fn is_uniform(self) -> bool {
        !self.is_buffer() && self != ParamKind::Texture
    }

    pub fn reads(self) -> bool {
        matches!(self, ParamKind::BufferRead | ParamKind::BufferReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, ParamKind::BufferWrite | ParamKind::BufferReadWrite)
    }
}

use ParamKind::{
    BufferRead as R, BufferReadWrite as RW, BufferWrite as W, Texture as Tex, F32, I32, Mat4 as M4,
    Vec4 as V4, U32,
};

impl Kernel {
    pub const ALL: [Kernel; 11] = [
        Kernel::PrimaryRays,
        Kernel::TransformVertices,
        Kernel::TransformSkeletalVertices,
        Kernel::FindClosestSpheres,
        Kernel::FindClosestTriangles,
        Kernel::MoveRays,
        Kernel::UpdateRaysToLight,
        Kernel::ShadowSpheres,
        Kernel::ShadowTriangles,
        Kernel::Accumulate,
        Kernel::DumpImage,
    ];

    /// Entry point name inside the compiled program.
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::PrimaryRays => "primaryRays",
            Kernel::TransformVertices => "transformVertices",
            Kernel::TransformSkeletalVertices => "transformSkeletalVertices",
            Kernel::FindClosestSpheres => "findClosestSpheres",
            Kernel::FindClosestTriangles => "findClosestTriangles",
            Kernel::MoveRays => "moveRaysToIntersection",
            Kernel::UpdateRaysToLight => "updateRaysToLight",
            Kernel::ShadowSpheres => "detectShadowWithSpheres",
            Kernel::ShadowTriangles => "detectShadowWithTriangles",
            Kernel::Accumulate => "accumulateImage",
            Kernel::DumpImage => "dumpImage",
        }
    }

    pub fn signature(self) -> &'static [ParamKind] {
        match self {
            Kernel::PrimaryRays => &[W, M4, V4, U32, U32, W],
            Kernel::TransformVertices => &[R, W, M4, M4, U32],
            Kernel::TransformSkeletalVertices => &[R, W, R, U32],
            Kernel::FindClosestSpheres => &[RW, U32, R, U32, I32],
            Kernel::FindClosestTriangles => &[RW, U32, R, U32, F32, Tex, Tex, I32],
            Kernel::MoveRays => &[RW, U32],
            Kernel::UpdateRaysToLight => &[RW, U32, R, U32],
            Kernel::ShadowSpheres => &[RW, U32, R, U32, I32],
            Kernel::ShadowTriangles => &[RW, U32, R, U32, I32],
            Kernel::Accumulate => &[RW, R, U32, R, U32],
            Kernel::DumpImage => &[R, R, W, U32],
        }
    }

    /// Per-pixel kernels run on a 2-D grid; the rest are linear over rays or vertices.
    pub fn is_2d(self) -> bool {
        matches!(self, Kernel::PrimaryRays | Kernel::DumpImage)
    }

    /// Name of the timing counter this kernel's GPU time accumulates into.
    pub fn timer_label(self) -> &'static str {
        match self {
            Kernel::PrimaryRays => "Primary rays",
            Kernel::TransformVertices | Kernel::TransformSkeletalVertices => "Transform vertices",
            Kernel::FindClosestSpheres => "Intersection spheres",
            Kernel::FindClosestTriangles => "Intersection triangles",
            Kernel::MoveRays => "Move rays",
            Kernel::UpdateRaysToLight => "Rays to light",
            Kernel::ShadowSpheres => "Shadow spheres",
            Kernel::ShadowTriangles => "Shadow triangles",
            Kernel::Accumulate => "Accumulate colors",
            Kernel::DumpImage => "Dump image",
        }
    }

    /// Checks argument count and kinds against [`Kernel::signature`].
    pub fn validate(self, args: &[KernelArg]) -> Result<(), KernelError> {
        let signature = self.signature();
        if signature.len() != args.len() {
            return Err(KernelError::ArgumentCount {
                kernel: self.entry_point(),
                expected: signature.len(),
                actual: args.len(),
            });
        }
        for (index, (param, arg)) in signature.iter().zip(args).enumerate() {
            if !arg.matches(*param) {
                return Err(KernelError::ArgumentKind {
                    kernel: self.entry_point(),
                    index,
                    expected: param.name(),
                    actual: arg.kind_name(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    U32(u32),
    I32(i32),
    F32(f32),
    Vec4(Vec4),
    Mat4(Mat4),
}

pub type KernelArgs = SmallVec<[KernelArg; 8]>;

impl KernelArg {
    pub fn kind_name(&self) -> &'static str {
        match self {
            KernelArg::Buffer(_) => "buffer",
            KernelArg::Texture(_) => "texture",
            KernelArg::U32(_) => "u32",
            KernelArg::I32(_) => "i32",
            KernelArg::F32(_) => "f32",
            KernelArg::Vec4(_) => "vec4<f32>",
            KernelArg::Mat4(_) => "mat4x4<f32>",
        }
    }

    fn matches(&self, param: ParamKind) -> bool {
        match self {
            KernelArg::Buffer(_) => param.is_buffer(),
            KernelArg::Texture(_) => param == ParamKind::Texture,
            KernelArg::U32(_) => param == ParamKind::U32,
            KernelArg::I32(_) => param == ParamKind::I32,
            KernelArg::F32(_) => param == ParamKind::F32,
            KernelArg::Vec4(_) => param == ParamKind::Vec4,
            KernelArg::Mat4(_) => param == ParamKind::Mat4,
        }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        match self {
            KernelArg::Buffer(handle) => Some(*handle),
            _ => None,
        }
    }
}

/// Packs the uniform arguments in order. The result is padded to 16 bytes.
pub fn pack_uniforms(args: &[KernelArg]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(64);
    for arg in args {
        match arg {
            KernelArg::U32(v) => push_aligned(&mut bytes, 4, bytemuck::bytes_of(v)),
            KernelArg::I32(v) => push_aligned(&mut bytes, 4, bytemuck::bytes_of(v)),
            KernelArg::F32(v) => push_aligned(&mut bytes, 4, bytemuck::bytes_of(v)),
            KernelArg::Vec4(v) => push_aligned(&mut bytes, 16, bytemuck::cast_slice(&v.to_array())),
            KernelArg::Mat4(m) => push_aligned(&mut bytes, 16, bytemuck::cast_slice(&m.to_cols_array())),
            KernelArg::Buffer(_) | KernelArg::Texture(_) => {}
        }
    }
    let padded = bytes.len().div_ceil(16).max(1) * 16;
    bytes.resize(padded, 0);
    bytes
}

fn push_aligned(bytes: &mut Vec<u8>, align: usize, data: &[u8]) {
    let start = bytes.len().div_ceil(align) * align;
    bytes.resize(start, 0);
    bytes.extend_from_slice(data);
}
