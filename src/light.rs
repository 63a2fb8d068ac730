use crate::gpu_types::{Light, Sphere};
use glam::{Vec3, Vec4};

pub const LIGHT_SPHERE_RADIUS: f32 = 0.1;

/// Point light sliding back and forth between two endpoints.
#[derive(Debug, Clone)]
pub struct MovingLight {
    pub light: Light,
    start: Vec3,
    direction: Vec3,
    length: f32,
    travelled: f32,
    speed: f32,
}

impl MovingLight {
    pub fn new(intensity: Vec4, from: Vec3, to: Vec3, speed: f32) -> Self {
        let span = to - from;
        let length = span.length();
        let direction = if length > 0.0 { span / length } else { Vec3::ZERO };
        Self {
            light: Light::new(from.extend(1.0), intensity),
            start: from,
            direction,
            length,
            travelled: 0.0,
            speed,
        }
    }

    /// Light `index` of the default rig: spaced along X, sweeping Z between -9 and 9.
    pub fn rig(index: u32) -> Self {
        let x = index as f32;
        Self::new(
            Vec4::new(50.0, 50.0, 50.0, 0.0),
            Vec3::new(x, 0.0, 9.0),
            Vec3::new(x, 0.0, -9.0),
            1.0 / (index as f32 + 1.0),
        )
    }

    pub fn position(&self) -> Vec3 {
        self.start + self.direction * self.travelled
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Advances along the segment, reversing after passing either end.
    pub fn advance(&mut self, dt: f32) {
        self.travelled += self.speed * dt;
        if (self.speed < 0.0 && self.travelled < 0.0) || (self.speed > 0.0 && self.travelled > self.length) {
            self.speed = -self.speed;
        }
        self.light.position = self.position().extend(1.0).to_array();
    }
}

/// Moves the first `count` spheres onto the lights so they show up in the image.
pub fn snap_spheres_to_lights(spheres: &mut [Sphere], lights: &[MovingLight], count: usize) {
    for (sphere, light) in spheres.iter_mut().zip(lights).take(count) {
        sphere.position = light.light.position;
        sphere.radius = LIGHT_SPHERE_RADIUS;
    }
}
