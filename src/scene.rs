//! Everything the tracer renders: models and their instances, the sphere field,
//! moving lights and the camera.

use crate::camera::FlyCamera;
use crate::compute::ComputeBackend;
use crate::config::{ModelConfig, ModelSource, SceneConfig};
use crate::error::GpuError;
use crate::gpu_types::Sphere;
use crate::light::{snap_spheres_to_lights, MovingLight};
use crate::mesh::MeshData;
use crate::model::{Geometry, Model, ModelAsset, ModelInstance};
use crate::settings::{TracerSettings, MAX_LIGHTS};
use crate::skeleton::Skeleton;
use crate::texture::{TextureData, FLAT_NORMAL, WHITE};
use crate::transform::CachedTransform;
use crate::tube::Tube;
use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

#[derive(Debug)]
pub struct Scene {
    pub models: Vec<Model>,
    pub instances: Vec<ModelInstance>,
    pub spheres: Vec<Sphere>,
    pub lights: Vec<MovingLight>,
    pub camera: FlyCamera,
    animation_time: f32,
}

impl Scene {
    pub fn new(camera: FlyCamera, spheres: Vec<Sphere>) -> Self {
        Self {
            models: Vec::new(),
            instances: Vec::new(),
            spheres,
            lights: (0..MAX_LIGHTS).map(MovingLight::rig).collect(),
            camera,
            animation_time: 0.0,
        }
    }

    /// Builds the configured scene, uploading every model through `backend`.
    pub fn from_config(backend: &mut dyn ComputeBackend, cfg: &SceneConfig) -> Result<Self> {
        let mut scene = Self::new(FlyCamera::from_config(&cfg.camera), random_spheres(cfg.sphere_count, cfg.seed));
        for model_cfg in &cfg.models {
            let asset = load_asset(model_cfg, cfg.fallback_model.as_deref());
            let world = CachedTransform::new(
                Vec3::from_array(model_cfg.position),
                Vec3::splat(model_cfg.scale),
                Quat::IDENTITY,
            );
            let index = scene
                .add_model(
                    backend,
                    &asset,
                    world,
                    Vec3::from_array(model_cfg.spin_axis),
                    model_cfg.spin_degrees_per_second.to_radians(),
                )
                .with_context(|| format!("Failed to upload model {}", asset.name))?;
            scene.instances[index].active = model_cfg.active;
            log::info!(
                target: "assets",
                "model {} '{}': {} triangles{}",
                index + 1,
                asset.name,
                asset.vertex_count() / 3,
                if matches!(asset.geometry, Geometry::Skinned { .. }) { ", animated" } else { "" }
            );
        }
        Ok(scene)
    }

    /// Uploads `asset` as a new model with a single instance; returns the instance index.
    pub fn add_model(
        &mut self,
        backend: &mut dyn ComputeBackend,
        asset: &ModelAsset,
        world: CachedTransform,
        spin_axis: Vec3,
        spin_speed: f32,
    ) -> Result<usize, GpuError> {
        let model = Model::upload(backend, asset)?;
        let model_index = self.models.len();
        let instance = ModelInstance::new(backend, model_index, &model, world, spin_axis, spin_speed)?;
        self.models.push(model);
        self.instances.push(instance);
        Ok(self.instances.len() - 1)
    }

    pub fn animation_time(&self) -> f32 {
        self.animation_time
    }

    /// Toggles instance `index`; out-of-range indices are ignored.
    pub fn toggle_instance(&mut self, index: usize) -> Option<bool> {
        let instance = self.instances.get_mut(index)?;
        instance.toggle();
        Some(instance.active)
    }

    /// Active flag per instance, in instance order.
    pub fn active_mask(&self) -> Vec<bool> {
        self.instances.iter().map(|instance| instance.active).collect()
    }

    /// Sets each instance's active flag from `mask`; instances past its end are disabled.
    pub fn set_active_mask(&mut self, mask: &[bool]) {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            instance.active = mask.get(index).copied().unwrap_or(false);
        }
    }

    pub fn active_instances(&self) -> usize {
        self.instances.iter().filter(|instance| instance.active).count()
    }

    /// Advances lights and bone animation by `dt` seconds.
    pub fn update(&mut self, dt: f32, settings: &TracerSettings) {
        self.animation_time += dt;
        for light in &mut self.lights {
            light.advance(dt);
        }
        snap_spheres_to_lights(&mut self.spheres, &self.lights, settings.num_lights as usize);
        let t = self.animation_time;
        for skeleton in self.instances.iter_mut().filter_map(ModelInstance::skeleton_mut) {
            animate_bones(skeleton, t);
        }
    }
}

/// Root breathes along Y; every other bone bends about Z so the chain curls through half a turn.
pub fn animate_bones(skeleton: &mut Skeleton, t: f32) {
    let pose = skeleton.current_pose_mut();
    let count = pose.bone_count();
    if let Some(root) = pose.bone_mut(0) {
        root.local.set_scale(Vec3::new(1.0, 1.0 + (t * 3.1).sin() * 0.2, 1.0));
    }
    if count < 2 {
        return;
    }
    let bend = Quat::from_rotation_z((t.sin() + 1.0) * std::f32::consts::PI / (count - 1) as f32);
    for index in 1..count {
        if let Some(bone) = pose.bone_mut(index) {
            bone.local.set_orientation(bend);
        }
    }
}

/// Spheres scattered through a ball whose radius grows with the cube root of the count.
pub fn random_spheres(count: u32, seed: u64) -> Vec<Sphere> {
    let mut rng = StdRng::seed_from_u64(seed);
    let field_radius = (count as f32).cbrt() * 3.0;
    (0..count)
        .map(|_| {
            let position = ball_point(&mut rng) * field_radius;
            let reflectivity = (sphere_point(&mut rng) * 0.5).abs();
            let radius = rng.gen_range(0.1..=2.0);
            let reflect = rng.gen_range(0.5..=0.7);
            Sphere::new(position, reflectivity, radius, reflect)
        })
        .collect()
}

fn ball_point(rng: &mut impl Rng) -> Vec3 {
    loop {
        let p = Vec3::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
        if p.length_squared() <= 1.0 {
            return p;
        }
    }
}

fn sphere_point(rng: &mut impl Rng) -> Vec3 {
    loop {
        let p = ball_point(rng);
        if p.length_squared() > 1e-4 {
            return p.normalize();
        }
    }
}

/// Resolves a model entry to geometry, substituting the fallback (or a cube) when loading fails.
fn load_asset(cfg: &ModelConfig, fallback: Option<&Path>) -> ModelAsset {
    let diffuse = TextureData::load_or(cfg.diffuse.as_deref(), WHITE);
    let normal = TextureData::load_or(cfg.normal.as_deref(), FLAT_NORMAL);
    match &cfg.source {
        ModelSource::Tube => match Tube::generate() {
            Ok(tube) => ModelAsset {
                name: "tube".to_string(),
                geometry: Geometry::Skinned { vertices: tube.vertices, bind_pose: tube.bind_pose },
                diffuse,
                normal,
            },
            Err(err) => {
                log::warn!(target: "assets", "tube skeleton rejected: {err}; using built-in cube");
                ModelAsset::from_mesh(MeshData::cube(1.0), diffuse, normal)
            }
        },
        ModelSource::Gltf(path) => match MeshData::load_gltf(path) {
            Ok(import) => ModelAsset::from_mesh(
                import.mesh,
                if cfg.diffuse.is_some() { diffuse } else { import.diffuse.unwrap_or(diffuse) },
                if cfg.normal.is_some() { normal } else { import.normal.unwrap_or(normal) },
            ),
            Err(err) => {
                log::warn!(target: "assets", "{err:#}; using fallback model");
                let mesh = fallback
                    .and_then(|path| match MeshData::load_gltf(path) {
                        Ok(import) => Some(import.mesh),
                        Err(err) => {
                            log::warn!(target: "assets", "{err:#}; using built-in cube");
                            None
                        }
                    })
                    .unwrap_or_else(|| MeshData::cube(1.0));
                ModelAsset::from_mesh(mesh, diffuse, normal)
            }
        },
    }
}
