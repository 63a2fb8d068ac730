use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/tracer.json";

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
    #[serde(default = "WindowConfig::default_width")]
    pub width: u32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: u32,
    #[serde(default = "WindowConfig::default_vsync")]
    pub vsync: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracerConfig {
    #[serde(default = "TracerConfig::default_num_bounces")]
    pub num_bounces: u32,
    #[serde(default = "TracerConfig::default_num_lights")]
    pub num_lights: u32,
    #[serde(default = "TracerConfig::default_supersampling")]
    pub supersampling: u32,
    #[serde(default = "TracerConfig::default_work_group_size")]
    pub work_group_size: u32,
    #[serde(default = "TracerConfig::default_reflect")]
    pub reflect: f32,
    #[serde(default = "TracerConfig::default_kernel_path")]
    pub kernel_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default = "CameraConfig::default_direction")]
    pub direction: [f32; 3],
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "CameraConfig::default_look_sensitivity")]
    pub look_sensitivity: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Procedural bone-animated tube.
    Tube,
    Gltf(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub source: ModelSource,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "ModelConfig::default_scale")]
    pub scale: f32,
    #[serde(default = "ModelConfig::default_spin_axis")]
    pub spin_axis: [f32; 3],
    #[serde(default)]
    pub spin_degrees_per_second: f32,
    #[serde(default = "ModelConfig::default_active")]
    pub active: bool,
    #[serde(default)]
    pub diffuse: Option<PathBuf>,
    #[serde(default)]
    pub normal: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_sphere_count")]
    pub sphere_count: u32,
    #[serde(default = "SceneConfig::default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub camera: CameraConfig,
    /// Loaded in place of any glTF model that fails to import.
    #[serde(default)]
    pub fallback_model: Option<PathBuf>,
    #[serde(default = "SceneConfig::default_models")]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "TimingConfig::default_report_period_secs")]
    pub report_period_secs: f32,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub benchmark: Option<crate::benchmark::BenchmarkPlan>,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub bounces: Option<u32>,
    pub lights: Option<u32>,
    pub supersampling: Option<u32>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: Self::default_title(),
            width: Self::default_width(),
            height: Self::default_height(),
            vsync: Self::default_vsync(),
        }
    }
}

impl WindowConfig {
    fn default_title() -> String {
        "Bounce Tracer".to_string()
    }

    const fn default_width() -> u32 {
        1024
    }

    const fn default_height() -> u32 {
        768
    }

    const fn default_vsync() -> bool {
        false
    }
}

impl TracerConfig {
    const fn default_num_bounces() -> u32 {
        2
    }

    const fn default_num_lights() -> u32 {
        1
    }

    const fn default_supersampling() -> u32 {
        1
    }

    const fn default_work_group_size() -> u32 {
        32
    }

    const fn default_reflect() -> f32 {
        0.5
    }

    fn default_kernel_path() -> PathBuf {
        PathBuf::from("assets/shaders/tracer.wgsl")
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            num_bounces: Self::default_num_bounces(),
            num_lights: Self::default_num_lights(),
            supersampling: Self::default_supersampling(),
            work_group_size: Self::default_work_group_size(),
            reflect: Self::default_reflect(),
            kernel_path: Self::default_kernel_path(),
        }
    }
}

impl CameraConfig {
    const fn default_position() -> [f32; 3] {
        [0.0, 1.0, -2.0]
    }

    const fn default_direction() -> [f32; 3] {
        [0.0, 0.0, -1.0]
    }

    const fn default_fov_degrees() -> f32 {
        45.0
    }

    const fn default_move_speed() -> f32 {
        2.0
    }

    const fn default_look_sensitivity() -> f32 {
        0.2
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Self::default_position(),
            direction: Self::default_direction(),
            fov_degrees: Self::default_fov_degrees(),
            move_speed: Self::default_move_speed(),
            look_sensitivity: Self::default_look_sensitivity(),
        }
    }
}

impl ModelConfig {
    const fn default_scale() -> f32 {
        1.0
    }

    const fn default_spin_axis() -> [f32; 3] {
        [0.0, 1.0, 0.0]
    }

    const fn default_active() -> bool {
        true
    }

    pub fn tube() -> Self {
        Self {
            source: ModelSource::Tube,
            position: [-0.2, -0.4, 0.0],
            scale: 0.4,
            spin_axis: Self::default_spin_axis(),
            spin_degrees_per_second: 15.0,
            active: true,
            diffuse: None,
            normal: None,
        }
    }
}

impl SceneConfig {
    const fn default_sphere_count() -> u32 {
        10
    }

    const fn default_seed() -> u64 {
        0x5eed
    }

    fn default_models() -> Vec<ModelConfig> {
        vec![ModelConfig::tube()]
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            sphere_count: Self::default_sphere_count(),
            seed: Self::default_seed(),
            camera: CameraConfig::default(),
            fallback_model: None,
            models: Self::default_models(),
        }
    }
}

impl TimingConfig {
    const fn default_report_period_secs() -> f32 {
        5.0
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { report_period_secs: Self::default_report_period_secs(), snapshot_path: None }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!(target: "config", "{err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(bounces) = overrides.bounces {
            self.tracer.num_bounces = bounces;
        }
        if let Some(lights) = overrides.lights {
            self.tracer.num_lights = lights;
        }
        if let Some(supersampling) = overrides.supersampling {
            self.tracer.supersampling = supersampling;
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.bounces.is_some() {
            fields.push("bounces");
        }
        if self.lights.is_some() {
            fields.push("lights");
        }
        if self.supersampling.is_some() {
            fields.push("supersample");
        }
        fields
    }
}
