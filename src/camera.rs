use crate::config::CameraConfig;
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};

pub const CAMERA_NEAR: f32 = 0.01;
pub const CAMERA_FAR: f32 = 100.0;
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// First-person camera: position plus yaw/pitch, moved in the horizontal plane.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
    fov_y_radians: f32,
    pub move_speed: f32,
    /// Degrees of rotation per pixel of mouse travel.
    pub look_sensitivity: f32,
    inverse: Option<(f32, Mat4)>,
}

impl FlyCamera {
    pub fn new(position: Vec3, direction: Vec3, fov_y_radians: f32) -> Self {
        let dir = direction.normalize_or_zero();
        let dir = if dir == Vec3::ZERO { Vec3::NEG_Z } else { dir };
        Self {
            position,
            yaw: (-dir.x).atan2(-dir.z),
            pitch: dir.y.clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT),
            fov_y_radians,
            move_speed: 2.0,
            look_sensitivity: 0.2,
            inverse: None,
        }
    }

    pub fn from_config(cfg: &CameraConfig) -> Self {
        let mut camera = Self::new(
            Vec3::from_array(cfg.position),
            Vec3::from_array(cfg.direction),
            cfg.fov_degrees.to_radians(),
        );
        camera.move_speed = cfg.move_speed;
        camera.look_sensitivity = cfg.look_sensitivity;
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    pub fn set_position(&mut self, position: Vec3) {
        if self.position != position {
            self.position = position;
            self.inverse = None;
        }
    }

    /// Applies mouse travel in pixels. Pitch is clamped short of straight up/down.
    pub fn look(&mut self, delta: Vec2) {
        if delta == Vec2::ZERO {
            return;
        }
        let scale = self.look_sensitivity.to_radians();
        self.yaw = wrap_angle(self.yaw - delta.x * scale);
        self.pitch = (self.pitch - delta.y * scale).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.inverse = None;
    }

    /// `input.x` strafes right, `input.y` moves backwards; only yaw affects the heading.
    pub fn travel(&mut self, input: Vec2, dt: f32) {
        if input == Vec2::ZERO {
            return;
        }
        let velocity = input.normalize() * self.move_speed * dt;
        let step = Quat::from_rotation_y(self.yaw) * Vec3::new(velocity.x, 0.0, velocity.y);
        self.set_position(self.position + step);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, aspect.max(0.0001), CAMERA_NEAR, CAMERA_FAR)
    }

    /// Inverse view-projection, recomputed only after a move, turn or aspect change.
    pub fn inv_view_projection(&mut self, aspect: f32) -> Mat4 {
        match self.inverse {
            Some((cached_aspect, inverse)) if cached_aspect == aspect => inverse,
            _ => {
                let inverse = (self.projection_matrix(aspect) * self.view_matrix()).inverse();
                self.inverse = Some((aspect, inverse));
                inverse
            }
        }
    }
}

fn wrap_angle(mut radians: f32) -> f32 {
    let two_pi = 2.0 * std::f32::consts::PI;
    while radians > std::f32::consts::PI {
        radians -= two_pi;
    }
    while radians < -std::f32::consts::PI {
        radians += two_pi;
    }
    radians
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips_through_yaw_pitch() {
        let dir = Vec3::new(1.0, 0.5, -1.0).normalize();
        let camera = FlyCamera::new(Vec3::ZERO, dir, 45f32.to_radians());
        assert!((camera.forward() - dir).length() < 1e-4);
    }

    #[test]
    fn travel_ignores_pitch() {
        let mut camera = FlyCamera::new(Vec3::ZERO, Vec3::new(0.0, 0.8, -0.6), 1.0);
        camera.move_speed = 1.0;
        camera.travel(Vec2::new(0.0, -1.0), 1.0);
        let p = camera.position();
        assert!(p.y.abs() < 1e-6);
        assert!((p.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn inverse_unprojects_center_onto_forward_axis() {
        let mut camera = FlyCamera::new(Vec3::new(0.0, 1.0, -2.0), Vec3::NEG_Z, 45f32.to_radians());
        let inv = camera.inv_view_projection(4.0 / 3.0);
        let far = inv.project_point3(Vec3::new(0.0, 0.0, 1.0));
        let dir = (far - camera.position()).normalize();
        assert!((dir - Vec3::NEG_Z).length() < 1e-4);
        assert_eq!(camera.inv_view_projection(4.0 / 3.0), inv);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FlyCamera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0);
        camera.look(Vec2::new(0.0, -100_000.0));
        assert!(camera.forward().y < 1.0);
        assert!(camera.forward().y > 0.99);
    }
}
