use crate::gpu_types::Vertex;
use crate::texture::TextureData;
use anyhow::{anyhow, bail, Context, Result};
use gltf::mesh::Mode;
use glam::{Mat4, Vec2, Vec3};
use std::path::Path;

/// Static geometry as a flat triangle list: every three vertices form one triangle.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
}

/// A mesh plus whatever texture maps its first material references.
#[derive(Debug, Clone)]
pub struct MeshImport {
    pub mesh: MeshData,
    pub diffuse: Option<TextureData>,
    pub normal: Option<TextureData>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn cube(size: f32) -> Self {
        let hs = size * 0.5;
        let positions = [
            Vec3::new(-hs, -hs, -hs),
            Vec3::new(hs, -hs, -hs),
            Vec3::new(hs, hs, -hs),
            Vec3::new(-hs, hs, -hs),
            Vec3::new(-hs, -hs, hs),
            Vec3::new(hs, -hs, hs),
            Vec3::new(hs, hs, hs),
            Vec3::new(-hs, hs, hs),
        ];
        let uv_quad = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];

        let mut vertices = Vec::with_capacity(36);
        let mut write_face = |corners: [usize; 4]| {
            for tri in [[0, 1, 2], [0, 2, 3]] {
                let p = tri.map(|i| positions[corners[i]]);
                let uv = tri.map(|i| uv_quad[i]);
                push_triangle(&mut vertices, p, uv, None);
            }
        };
        write_face([0, 3, 2, 1]); // back
        write_face([4, 5, 6, 7]); // front
        write_face([0, 4, 7, 3]); // left
        write_face([1, 2, 6, 5]); // right
        write_face([3, 7, 6, 2]); // top
        write_face([0, 1, 5, 4]); // bottom

        Self { name: "cube".to_string(), vertices }
    }

    /// Loads every triangle primitive of every mesh node, baking node transforms into positions.
    pub fn load_gltf(path: impl AsRef<Path>) -> Result<MeshImport> {
        let path_ref = path.as_ref();
        let (document, buffers, images) = gltf::import(path_ref)
            .with_context(|| format!("Failed to import glTF from {}", path_ref.display()))?;

        let mut vertices = Vec::new();
        let mut diffuse_index = None;
        let mut normal_index = None;

        let scene = document.default_scene().or_else(|| document.scenes().next());
        let mut stack: Vec<(gltf::Node, Mat4)> = match scene {
            Some(scene) => scene.nodes().map(|node| (node, Mat4::IDENTITY)).collect(),
            None => document.nodes().map(|node| (node, Mat4::IDENTITY)).collect(),
        };

        while let Some((node, parent)) = stack.pop() {
            let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
            stack.extend(node.children().map(|child| (child, world)));
            let Some(mesh) = node.mesh() else { continue };
            let normal_matrix = world.inverse().transpose();

            for primitive in mesh.primitives() {
                if primitive.mode() != Mode::Triangles {
                    continue;
                }
                let material = primitive.material();
                if diffuse_index.is_none() {
                    diffuse_index = material
                        .pbr_metallic_roughness()
                        .base_color_texture()
                        .map(|info| info.texture().source().index());
                }
                if normal_index.is_none() {
                    normal_index = material.normal_texture().map(|info| info.texture().source().index());
                }

                let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
                let positions: Vec<Vec3> = reader
                    .read_positions()
                    .ok_or_else(|| anyhow!("POSITION attribute missing in {}", path_ref.display()))?
                    .map(|p| world.transform_point3(Vec3::from_array(p)))
                    .collect();
                if positions.is_empty() {
                    continue;
                }
                let normals: Option<Vec<Vec3>> = reader.read_normals().map(|it| {
                    it.map(|n| normal_matrix.transform_vector3(Vec3::from_array(n)).normalize_or_zero()).collect()
                });
                let tex_coords: Vec<Vec2> = reader
                    .read_tex_coords(0)
                    .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                    .unwrap_or_default();
                let indices: Vec<u32> = reader
                    .read_indices()
                    .map(|read| read.into_u32().collect())
                    .unwrap_or_else(|| (0..positions.len() as u32).collect());

                for tri in indices.chunks_exact(3) {
                    let ids = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
                    if ids.iter().any(|&i| i >= positions.len()) {
                        continue;
                    }
                    let p = ids.map(|i| positions[i]);
                    let uv = ids.map(|i| tex_coords.get(i).copied().unwrap_or(Vec2::ZERO));
                    let n = normals.as_ref().filter(|n| n.len() == positions.len()).map(|n| ids.map(|i| n[i]));
                    push_triangle(&mut vertices, p, uv, n);
                }
            }
        }

        if vertices.is_empty() {
            bail!("{} contains no triangle primitives", path_ref.display());
        }

        let texture = |index: Option<usize>| -> Result<Option<TextureData>> {
            let Some(index) = index else { return Ok(None) };
            let image = images
                .get(index)
                .ok_or_else(|| anyhow!("Image index {index} missing in {}", path_ref.display()))?;
            Ok(Some(TextureData { width: image.width, height: image.height, rgba: convert_image_to_rgba(image)? }))
        };

        let name = path_ref.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(MeshImport {
            mesh: MeshData { name, vertices },
            diffuse: texture(diffuse_index)?,
            normal: texture(normal_index)?,
        })
    }
}

/// Appends one triangle with a per-face tangent frame. Missing normals use the face normal.
fn push_triangle(out: &mut Vec<Vertex>, p: [Vec3; 3], uv: [Vec2; 3], normals: Option<[Vec3; 3]>) {
    let face_normal = normalize_or((p[1] - p[0]).cross(p[2] - p[0]), Vec3::Y);
    let normals = normals
        .filter(|n| n.iter().all(|v| v.length_squared() > 0.0))
        .unwrap_or([face_normal; 3]);
    let (tangent, bitangent) = face_tangents(p, uv, face_normal);
    for i in 0..3 {
        let n = normals[i];
        let t = normalize_or(tangent - n * n.dot(tangent), tangent);
        out.push(Vertex::new(p[i], uv[i].to_array(), n, t, bitangent));
    }
}

fn face_tangents(p: [Vec3; 3], uv: [Vec2; 3], normal: Vec3) -> (Vec3, Vec3) {
    let delta_pos1 = p[1] - p[0];
    let delta_pos2 = p[2] - p[0];
    let delta_uv1 = uv[1] - uv[0];
    let delta_uv2 = uv[2] - uv[0];

    let denom = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
    if denom.abs() < 1e-8 {
        let tangent = normal.any_orthonormal_vector();
        return (tangent, normal.cross(tangent));
    }
    let r = 1.0 / denom;
    let sdir = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
    let tdir = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * r;
    (normalize_or(sdir, Vec3::X), normalize_or(tdir, Vec3::Y))
}

fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let n = v.normalize_or_zero();
    if n == Vec3::ZERO { fallback } else { n }
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => Ok(image.pixels.iter().flat_map(|&v| [v, v, v, 255]).collect()),
        gltf::image::Format::R8G8 => {
            Ok(image.pixels.chunks_exact(2).flat_map(|c| [c[0], c[1], 0, 255]).collect())
        }
        gltf::image::Format::R8G8B8 => {
            Ok(image.pixels.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect())
        }
        gltf::image::Format::R8G8B8A8 => Ok(image.pixels.clone()),
        other => bail!("Unsupported image format {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_demo_gltf_triangle() {
        let import = MeshData::load_gltf("assets/models/triangle.gltf").expect("demo gltf should load");
        assert_eq!(import.mesh.vertices.len(), 3);
        assert_eq!(import.mesh.triangle_count(), 1);
        assert!(import.diffuse.is_none());
        for vertex in &import.mesh.vertices {
            let normal = Vec3::new(vertex.normal[0], vertex.normal[1], vertex.normal[2]);
            assert!((normal - Vec3::Z).length_squared() < 1e-4);
            assert!(Vec3::new(vertex.tangent[0], vertex.tangent[1], vertex.tangent[2]).length_squared() > 0.0);
        }
    }

    #[test]
    fn missing_gltf_reports_path() {
        let err = MeshData::load_gltf("assets/models/does_not_exist.gltf").unwrap_err();
        assert!(format!("{err:#}").contains("does_not_exist.gltf"));
    }

    #[test]
    fn cube_is_closed_triangle_list() {
        let cube = MeshData::cube(2.0);
        assert_eq!(cube.triangle_count(), 12);
        for vertex in &cube.vertices {
            let p = vertex.position3();
            let n = Vec3::new(vertex.normal[0], vertex.normal[1], vertex.normal[2]);
            // Outward faces: the normal points the same way as the vertex from the center.
            assert!(p.dot(n) > 0.0);
        }
    }
}
