use glam::{Mat4, Quat, Vec3};

/// Composed matrix state of a [`CachedTransform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatrixCache {
    Stale,
    Fresh(Mat4),
}

/// Translation, scale and orientation with a lazily composed `T * S * R` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTransform {
    translation: Vec3,
    scale: Vec3,
    orientation: Quat,
    cache: MatrixCache,
}

impl Default for CachedTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl CachedTransform {
    /// Creates a transform whose matrix is computed on first read.
    pub fn new(translation: Vec3, scale: Vec3, orientation: Quat) -> Self {
        Self { translation, scale, orientation, cache: MatrixCache::Stale }
    }

    pub fn identity() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            orientation: Quat::IDENTITY,
            cache: MatrixCache::Fresh(Mat4::IDENTITY),
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Vec3::ONE, Quat::IDENTITY)
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    /// Returns `true` when the value differed and the cache was invalidated.
    pub fn set_translation(&mut self, translation: Vec3) -> bool {
        if self.translation == translation {
            return false;
        }
        self.translation = translation;
        self.cache = MatrixCache::Stale;
        true
    }

    pub fn set_scale(&mut self, scale: Vec3) -> bool {
        if self.scale == scale {
            return false;
        }
        self.scale = scale;
        self.cache = MatrixCache::Stale;
        true
    }

    pub fn set_orientation(&mut self, orientation: Quat) -> bool {
        if self.orientation == orientation {
            return false;
        }
        self.orientation = orientation;
        self.cache = MatrixCache::Stale;
        true
    }

    /// Rotates by `angle` radians around `axis`, applied after the current orientation.
    pub fn rotate(&mut self, axis: Vec3, angle: f32) -> bool {
        let axis = axis.normalize_or_zero();
        if axis == Vec3::ZERO || angle == 0.0 {
            return false;
        }
        let next = (Quat::from_axis_angle(axis, angle) * self.orientation).normalize();
        self.set_orientation(next)
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self.cache, MatrixCache::Fresh(_))
    }

    pub fn cache(&self) -> MatrixCache {
        self.cache
    }

    /// Builds `T * S * R` from the current components, ignoring the cache.
    pub fn compose(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from_scale(self.scale)
            * Mat4::from_quat(self.orientation)
    }

    /// Cached matrix when fresh, otherwise a freshly composed one. Never mutates.
    pub fn matrix(&self) -> Mat4 {
        match self.cache {
            MatrixCache::Fresh(matrix) => matrix,
            MatrixCache::Stale => self.compose(),
        }
    }

    /// Recomposes if stale and stores the result.
    pub fn refresh(&mut self) -> Mat4 {
        match self.cache {
            MatrixCache::Fresh(matrix) => matrix,
            MatrixCache::Stale => {
                let matrix = self.compose();
                self.cache = MatrixCache::Fresh(matrix);
                matrix
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_mat(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-5)
    }

    #[test]
    fn identity_starts_fresh_and_parameterised_starts_stale() {
        assert!(CachedTransform::identity().is_fresh());
        let t = CachedTransform::new(Vec3::X, Vec3::ONE, Quat::IDENTITY);
        assert!(!t.is_fresh());
        assert_eq!(t.matrix(), Mat4::from_translation(Vec3::X));
    }

    #[test]
    fn repeated_reads_are_bit_identical() {
        let mut t = CachedTransform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.5, 2.0, 1.5),
            Quat::from_rotation_y(0.7),
        );
        let first = t.refresh();
        let second = t.refresh();
        let third = t.matrix();
        assert_eq!(first.to_cols_array(), second.to_cols_array());
        assert_eq!(first.to_cols_array(), third.to_cols_array());
    }

    #[test]
    fn setting_equal_value_keeps_cache() {
        let mut t = CachedTransform::from_translation(Vec3::Y);
        t.refresh();
        assert!(!t.set_translation(Vec3::Y));
        assert!(t.is_fresh());
        assert!(t.set_translation(Vec3::Z));
        assert!(!t.is_fresh());
    }

    #[test]
    fn single_setter_reflects_only_that_change() {
        let mut t = CachedTransform::new(Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0), Quat::IDENTITY);
        t.refresh();
        t.set_orientation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let expected = Mat4::from_translation(Vec3::X)
            * Mat4::from_scale(Vec3::splat(2.0))
            * Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        assert!(approx_mat(t.refresh(), expected));
    }

    #[test]
    fn composition_order_is_translate_scale_rotate() {
        let t = CachedTransform::new(
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(2.0, 1.0, 1.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        // R takes X to Y, S leaves Y alone, T lifts by one.
        let p = t.matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn rotate_with_zero_axis_is_noop() {
        let mut t = CachedTransform::identity();
        assert!(!t.rotate(Vec3::ZERO, 1.0));
        assert!(t.is_fresh());
        assert!(t.rotate(Vec3::Y, 0.25));
        assert!(!t.is_fresh());
    }
}
