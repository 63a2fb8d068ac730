pub mod app;
pub mod benchmark;
pub mod camera;
pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod gpu_types;
pub mod input;
pub mod light;
pub mod mesh;
pub mod model;
pub mod renderer;
pub mod scene;
pub mod scheduler;
pub mod settings;
pub mod skeleton;
pub mod texture;
pub mod timing;
pub mod transform;
pub mod tube;

pub use app::{run, run_with_overrides, App};
