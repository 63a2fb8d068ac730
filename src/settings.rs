//! Runtime tracer settings, threaded explicitly through the frame scheduler.

use crate::config::{AppConfig, TracerConfig};

pub const MAX_LIGHTS: u32 = 10;
pub const MIN_WORK_GROUP: u32 = 32;
pub const MAX_WORK_GROUP: u32 = 256;
/// Width of a 2-D work group; the height is `work_group_size / WORK_GROUP_2D_X`.
pub const WORK_GROUP_2D_X: u32 = 32;
const REFLECT_STEP: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct TracerSettings {
    pub width: u32,
    pub height: u32,
    pub num_bounces: u32,
    pub num_lights: u32,
    pub supersampling: u32,
    pub work_group_size: u32,
    pub reflect: f32,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TracerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_parts(config.window.width, config.window.height, &config.tracer)
    }

    pub fn from_parts(width: u32, height: u32, tracer: &TracerConfig) -> Self {
        let mut settings = Self {
            width,
            height,
            num_bounces: tracer.num_bounces,
            num_lights: tracer.num_lights,
            supersampling: tracer.supersampling,
            work_group_size: tracer.work_group_size,
            reflect: tracer.reflect,
        };
        settings.set_window_size(width, height);
        settings.clamp();
        settings
    }

    /// Forces every field into its legal range.
    pub fn clamp(&mut self) {
        self.num_lights = self.num_lights.clamp(1, MAX_LIGHTS);
        self.supersampling = self.supersampling.max(1);
        let group = self.work_group_size.clamp(MIN_WORK_GROUP, MAX_WORK_GROUP);
        self.work_group_size = if group.is_power_of_two() { group } else { group.next_power_of_two() / 2 };
        self.reflect = self.reflect.clamp(0.0, 1.0);
    }

    pub fn local_2d(&self) -> [u32; 2] {
        [WORK_GROUP_2D_X, self.work_group_size / WORK_GROUP_2D_X]
    }

    pub fn local_1d(&self) -> u32 {
        self.work_group_size
    }

    pub fn ray_count(&self) -> u64 {
        let ss = u64::from(self.supersampling);
        u64::from(self.width) * u64::from(self.height) * ss * ss
    }

    /// Zero-sized (minimized) windows keep a 1x1 target.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn increase_lights(&mut self) {
        self.num_lights = (self.num_lights + 1).min(MAX_LIGHTS);
    }

    pub fn decrease_lights(&mut self) {
        self.num_lights = self.num_lights.saturating_sub(1).max(1);
    }

    pub fn increase_bounces(&mut self) {
        self.num_bounces += 1;
    }

    pub fn decrease_bounces(&mut self) {
        if self.num_bounces > 1 {
            self.num_bounces -= 1;
        }
    }

    pub fn increase_reflect(&mut self) {
        self.reflect = (self.reflect + REFLECT_STEP).min(1.0);
    }

    pub fn decrease_reflect(&mut self) {
        self.reflect = (self.reflect - REFLECT_STEP).max(0.0);
    }

    pub fn increase_work_group(&mut self) {
        if self.work_group_size < MAX_WORK_GROUP {
            self.work_group_size *= 2;
        }
    }

    pub fn decrease_work_group(&mut self) {
        if self.work_group_size > MIN_WORK_GROUP {
            self.work_group_size /= 2;
        }
    }

    pub fn increase_supersampling(&mut self) {
        self.supersampling += 1;
    }

    pub fn decrease_supersampling(&mut self) {
        if self.supersampling > 1 {
            self.supersampling -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        let tracer = TracerConfig {
            num_lights: 0,
            supersampling: 0,
            work_group_size: 100,
            reflect: 3.0,
            ..TracerConfig::default()
        };
        let settings = TracerSettings::from_parts(640, 480, &tracer);
        assert_eq!(settings.num_lights, 1);
        assert_eq!(settings.supersampling, 1);
        assert_eq!(settings.work_group_size, 64);
        assert_eq!(settings.reflect, 1.0);
        assert_eq!(settings.local_2d(), [32, 2]);
    }

    #[test]
    fn interactive_steps_respect_bounds() {
        let mut settings = TracerSettings::default();
        for _ in 0..20 {
            settings.increase_lights();
            settings.increase_work_group();
        }
        assert_eq!(settings.num_lights, MAX_LIGHTS);
        assert_eq!(settings.work_group_size, MAX_WORK_GROUP);
        for _ in 0..20 {
            settings.decrease_lights();
            settings.decrease_work_group();
            settings.decrease_bounces();
            settings.decrease_reflect();
        }
        assert_eq!(settings.num_lights, 1);
        assert_eq!(settings.work_group_size, MIN_WORK_GROUP);
        assert_eq!(settings.num_bounces, 1);
        assert_eq!(settings.reflect, 0.0);
    }

    #[test]
    fn ray_count_scales_with_supersampling() {
        let mut settings = TracerSettings::default();
        settings.set_window_size(1024, 768);
        settings.supersampling = 2;
        assert_eq!(settings.ray_count(), 1024 * 768 * 4);
    }
}
