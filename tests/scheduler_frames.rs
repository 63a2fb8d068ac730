use anyhow::Result;
use bounce_tracer::camera::FlyCamera;
use bounce_tracer::compute::{Kernel, RecordingBackend};
use bounce_tracer::config::CameraConfig;
use bounce_tracer::mesh::MeshData;
use bounce_tracer::model::{Geometry, ModelAsset};
use bounce_tracer::scene::{random_spheres, Scene};
use bounce_tracer::scheduler::{dispatch_ids, FrameScheduler};
use bounce_tracer::settings::TracerSettings;
use bounce_tracer::texture::{TextureData, WHITE};
use bounce_tracer::transform::CachedTransform;
use bounce_tracer::tube::Tube;
use glam::Vec3;

fn cube() -> ModelAsset {
    ModelAsset::from_mesh(MeshData::cube(1.0), TextureData::solid(WHITE), TextureData::solid(WHITE))
}

fn tube() -> ModelAsset {
    let tube = Tube::generate().expect("tube bones form a chain");
    ModelAsset {
        name: "tube".into(),
        geometry: Geometry::Skinned { vertices: tube.vertices, bind_pose: tube.bind_pose },
        diffuse: TextureData::solid(WHITE),
        normal: TextureData::solid(WHITE),
    }
}

fn scene(backend: &mut RecordingBackend, assets: &[ModelAsset]) -> Result<Scene> {
    let mut scene = Scene::new(FlyCamera::from_config(&CameraConfig::default()), random_spheres(10, 3));
    for asset in assets {
        scene.add_model(backend, asset, CachedTransform::identity(), Vec3::Y, 0.25)?;
    }
    Ok(scene)
}

fn settings(width: u32, height: u32) -> TracerSettings {
    TracerSettings { width, height, supersampling: 1, num_bounces: 2, num_lights: 1, ..TracerSettings::default() }
}

#[test]
fn repeated_frames_at_one_size_allocate_once() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut scene = scene(&mut backend, &[cube()])?;
    let mut scheduler = FrameScheduler::new(&mut backend, &scene)?;
    let settings = settings(320, 200);
    for _ in 0..4 {
        scheduler.run_frame(&mut backend, &mut scene, &settings, 0.016)?;
    }
    assert_eq!(scheduler.reallocations(), 1);
    assert_eq!(backend.frames().len(), 4);
    Ok(())
}

#[test]
fn resize_replaces_every_resolution_buffer() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut scene = scene(&mut backend, &[cube(), tube()])?;
    let mut scheduler = FrameScheduler::new(&mut backend, &scene)?;

    let first = scheduler.run_frame(&mut backend, &mut scene, &settings(1024, 768), 0.016)?;
    assert_eq!(first.ray_count, 786_432);
    let old_rays = scheduler.ray_buffer().expect("ray buffer");
    let old_accumulation = scheduler.accumulation_buffer().expect("accumulation buffer");
    let old_display = scheduler.display().expect("display").buffer();

    let second = scheduler.run_frame(&mut backend, &mut scene, &settings(640, 480), 0.016)?;
    assert!(second.reallocated);
    assert_eq!(second.ray_count, 307_200);
    assert_eq!(scheduler.reallocations(), 2);

    for old in [old_rays, old_accumulation, old_display] {
        assert!(backend.is_destroyed(old));
    }
    let graph = backend.last_frame().expect("second frame");
    for old in [old_rays, old_accumulation, old_display] {
        assert!(!graph.references(old), "dispatch still bound to {old}");
    }
    let rays = scheduler.ray_buffer().expect("new ray buffer");
    let recorded = backend.buffer(rays).expect("live ray buffer");
    assert_eq!(recorded.size % 307_200, 0);
    assert_eq!(scheduler.display().expect("display").size(), (640, 480));
    Ok(())
}

#[test]
fn inactive_instances_are_never_bound() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut scene = scene(&mut backend, &[cube(), tube()])?;
    let mut scheduler = FrameScheduler::new(&mut backend, &scene)?;
    scene.toggle_instance(1);
    let hidden = scene.instances[1].transformed();

    scheduler.run_frame(&mut backend, &mut scene, &settings(64, 64), 0.016)?;
    let graph = backend.last_frame().expect("frame");
    assert!(!graph.references(hidden));
    assert_eq!(graph.count(Kernel::TransformSkeletalVertices), 0);
    assert_eq!(graph.count(Kernel::TransformVertices), 1);
    assert_eq!(graph.count(Kernel::FindClosestTriangles), 2);
    Ok(())
}

#[test]
fn empty_scene_still_produces_an_image() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut scene = scene(&mut backend, &[])?;
    let mut scheduler = FrameScheduler::new(&mut backend, &scene)?;
    let report = scheduler.run_frame(&mut backend, &mut scene, &settings(32, 32), 0.016)?;

    let graph = backend.last_frame().expect("frame");
    assert_eq!(graph.count(Kernel::FindClosestTriangles), 0);
    assert_eq!(graph.count(Kernel::ShadowTriangles), 0);
    assert_eq!(graph.count(Kernel::FindClosestSpheres), 2);
    assert_eq!(dispatch_ids(graph, Kernel::DumpImage).len(), 1);
    assert_eq!(report.dispatches, graph.dispatches().count());
    Ok(())
}

#[test]
fn zero_bounces_resolve_primary_rays_directly() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut scene = scene(&mut backend, &[cube()])?;
    let mut scheduler = FrameScheduler::new(&mut backend, &scene)?;
    let settings = TracerSettings { num_bounces: 0, ..settings(32, 32) };
    scheduler.run_frame(&mut backend, &mut scene, &settings, 0.0)?;

    let graph = backend.last_frame().expect("frame");
    assert_eq!(graph.count(Kernel::Accumulate), 0);
    assert_eq!(graph.count(Kernel::MoveRays), 0);
    let primary = dispatch_ids(graph, Kernel::PrimaryRays)[0];
    let dump = dispatch_ids(graph, Kernel::DumpImage)[0];
    assert!(graph.depends_on(dump, primary));
    Ok(())
}
