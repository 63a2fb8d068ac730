use bounce_tracer::cli::CliOverrides;
use bounce_tracer::config::{AppConfig, ModelSource, DEFAULT_CONFIG_PATH};
use bounce_tracer::settings::TracerSettings;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[test]
fn partial_config_keeps_defaults_for_missing_fields() {
    let mut temp = NamedTempFile::new().expect("temp config");
    write!(
        temp,
        r#"{{"window":{{"width":800}},"tracer":{{"num_bounces":5}},"scene":{{"models":[{{"source":{{"gltf":"assets/models/triangle.gltf"}},"active":false}}]}}}}"#
    )
    .expect("write config");

    let config = AppConfig::load(temp.path()).expect("parse config");
    assert_eq!(config.window.width, 800);
    assert_eq!(config.window.height, 768);
    assert_eq!(config.tracer.num_bounces, 5);
    assert_eq!(config.tracer.num_lights, 1);
    assert_eq!(config.scene.models.len(), 1);
    assert_eq!(config.scene.models[0].source, ModelSource::Gltf(PathBuf::from("assets/models/triangle.gltf")));
    assert!(!config.scene.models[0].active);
    assert!(config.benchmark.is_none());
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let config = AppConfig::load_or_default("config/does-not-exist.json");
    assert_eq!(config.window.width, 1024);
    assert_eq!(config.scene.models.len(), 1);
    assert_eq!(config.scene.models[0].source, ModelSource::Tube);
}

#[test]
fn shipped_config_parses() {
    let config = AppConfig::load(DEFAULT_CONFIG_PATH).expect("shipped config");
    assert_eq!(config.tracer.kernel_path, PathBuf::from("assets/shaders/tracer.wgsl"));
    assert!(config.benchmark.is_some());
}

#[test]
fn cli_flags_override_config_values() {
    let cli = CliOverrides::parse(["bounce_tracer", "--width", "640", "--lights", "20", "--vsync", "on", "--config", "alt.json"])
        .expect("parse flags");
    assert_eq!(cli.config_path(), PathBuf::from("alt.json"));
    let overrides = cli.into_config_overrides();
    assert_eq!(overrides.applied_fields(), vec!["width", "vsync", "lights"]);

    let mut config = AppConfig::default();
    config.apply_overrides(&overrides);
    assert_eq!(config.window.width, 640);
    assert!(config.window.vsync);

    let settings = TracerSettings::from_config(&config);
    assert_eq!(settings.num_lights, 10, "light count clamps to the maximum");
    assert_eq!(settings.ray_count(), 640 * 768);
}

#[test]
fn malformed_flags_are_rejected() {
    assert!(CliOverrides::parse(["bounce_tracer", "--width"]).is_err());
    assert!(CliOverrides::parse(["bounce_tracer", "--width", "wide"]).is_err());
    assert!(CliOverrides::parse(["bounce_tracer", "--fullscreen", "1"]).is_err());
    assert!(CliOverrides::parse(["bounce_tracer", "stray"]).is_err());
    assert_eq!(
        CliOverrides::parse(["bounce_tracer"]).expect("no flags").config_path(),
        PathBuf::from(DEFAULT_CONFIG_PATH)
    );
}
