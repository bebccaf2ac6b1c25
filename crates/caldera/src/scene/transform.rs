//! Local transform of a scene node
//!
//! Angles are radians. The rotation is built as `pitch · yaw · roll`, so
//! the same matrix that places a node in the world also rotates world-space
//! directions into the node's view space: for any yaw and for
//! `|pitch| < π/2`, `rotation_matrix() · forward() = -Z`,
//! `rotation_matrix() · right() = +X` and `rotation_matrix() · up() = +Y`.

use serde::{Deserialize, Serialize};

use crate::foundation::math::{Mat3, Mat4, Vec3};

/// Uniform scale, Euler angles and position of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    /// Uniform scale factor
    pub scale: f32,
    /// Rotation around +Y
    pub yaw: f32,
    /// Rotation around +X
    pub pitch: f32,
    /// Rotation around +Z
    pub roll: f32,
    /// Translation
    pub position: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            position: Vec3::zeros(),
        }
    }
}

impl Transform {
    /// Identity transform placed at `position`
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Set the Euler angles
    pub fn with_rotation(mut self, yaw: f32, pitch: f32, roll: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self.roll = roll;
        self
    }

    /// Set the uniform scale
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Local-to-parent matrix: `T · S · R`
    pub fn world_matrix(&self) -> Mat4 {
        self.translation_matrix() * self.scale_matrix() * self.rotation_matrix()
    }

    /// Translation by `position`
    pub fn translation_matrix(&self) -> Mat4 {
        Self::translation(self.position)
    }

    /// Uniform scale by `scale`
    pub fn scale_matrix(&self) -> Mat4 {
        Self::uniform_scale(self.scale)
    }

    /// Translation matrix for an arbitrary offset
    pub fn translation(offset: Vec3) -> Mat4 {
        Mat4::new(
            1.0, 0.0, 0.0, offset.x,
            0.0, 1.0, 0.0, offset.y,
            0.0, 0.0, 1.0, offset.z,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Uniform scale matrix
    pub fn uniform_scale(scale: f32) -> Mat4 {
        Mat4::new(
            scale, 0.0, 0.0, 0.0,
            0.0, scale, 0.0, 0.0,
            0.0, 0.0, scale, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Rotation around +Y by `yaw`
    pub fn yaw_matrix(&self) -> Mat4 {
        let (s, c) = self.yaw.sin_cos();
        Mat4::new(
            c, 0.0, s, 0.0,
            0.0, 1.0, 0.0, 0.0,
            -s, 0.0, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Rotation around +X by `pitch`
    pub fn pitch_matrix(&self) -> Mat4 {
        let (s, c) = self.pitch.sin_cos();
        Mat4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, c, -s, 0.0,
            0.0, s, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Rotation around +Z by `roll`
    pub fn roll_matrix(&self) -> Mat4 {
        let (s, c) = self.roll.sin_cos();
        Mat4::new(
            c, -s, 0.0, 0.0,
            s, c, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Combined rotation `pitch · yaw · roll`
    pub fn rotation_matrix(&self) -> Mat4 {
        self.pitch_matrix() * self.yaw_matrix() * self.roll_matrix()
    }

    /// Upper-left 3x3 block of [`rotation_matrix`](Self::rotation_matrix)
    pub fn rotation_mat3(&self) -> Mat3 {
        self.rotation_matrix().fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Facing direction derived from yaw and pitch. Roll is ignored.
    pub fn forward(&self) -> Vec3 {
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        -Vec3::new(
            (-self.yaw).sin() * cos_pitch,
            sin_pitch,
            (-self.yaw).cos() * cos_pitch,
        )
    }

    /// Unit vector to the right of [`forward`](Self::forward)
    pub fn right(&self) -> Vec3 {
        self.forward().cross(&Vec3::y()).normalize()
    }

    /// Unit vector above [`forward`](Self::forward)
    pub fn up(&self) -> Vec3 {
        self.right().cross(&self.forward()).normalize()
    }

    /// View matrix: `rotation · translation(-position)`
    ///
    /// The rotation block is used as-is, not transposed. See the module docs
    /// for the basis relations that make this consistent with `forward`.
    pub fn view_matrix(&self) -> Mat4 {
        self.rotation_matrix() * Self::translation(-self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants, Vec4};
    use approx::assert_relative_eq;

    fn rotate(t: &Transform, v: Vec3) -> Vec3 {
        t.rotation_mat3() * v
    }

    #[test]
    fn test_default_is_identity() {
        let t = Transform::default();
        assert_relative_eq!(t.world_matrix(), Mat4::identity());
        assert_relative_eq!(t.view_matrix(), Mat4::identity());
        assert_relative_eq!(t.forward(), -Vec3::z());
        assert_relative_eq!(t.right(), Vec3::x());
        assert_relative_eq!(t.up(), Vec3::y());
    }

    #[test]
    fn test_world_matrix_applies_rotation_then_scale_then_translation() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(2.0)
            .with_rotation(constants::HALF_PI, 0.0, 0.0);

        // yaw of 90° maps +X onto -Z, scale doubles it, translation offsets it
        let p = t.world_matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.xyz(), Vec3::new(1.0, 2.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_view_rotation_maps_basis_to_view_axes() {
        let angles = [
            (0.3, 0.2, 0.0),
            (-1.2, 0.7, 0.0),
            (2.5, -1.1, 0.0),
            (constants::PI, 0.4, 0.0),
        ];

        for (yaw, pitch, roll) in angles {
            let t = Transform::default().with_rotation(yaw, pitch, roll);
            assert_relative_eq!(rotate(&t, t.forward()), -Vec3::z(), epsilon = 1e-5);
            assert_relative_eq!(rotate(&t, t.right()), Vec3::x(), epsilon = 1e-5);
            assert_relative_eq!(rotate(&t, t.up()), Vec3::y(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_view_matrix_puts_position_at_origin() {
        let t = Transform::from_position(Vec3::new(4.0, -1.0, 2.5)).with_rotation(0.8, -0.3, 0.1);
        let eye = t.view_matrix() * Vec4::new(4.0, -1.0, 2.5, 1.0);
        assert_relative_eq!(eye.xyz(), Vec3::zeros(), epsilon = 1e-5);
    }

    #[test]
    fn test_point_ahead_lands_on_negative_z() {
        let t = Transform::from_position(Vec3::new(0.0, 0.0, 1.0)).with_rotation(0.6, 0.25, 0.0);
        let ahead = t.position + t.forward() * 5.0;
        let eye = t.view_matrix() * ahead.push(1.0);
        assert_relative_eq!(eye.xyz(), Vec3::new(0.0, 0.0, -5.0), epsilon = 1e-4);
    }

    #[test]
    fn test_roll_does_not_change_facing() {
        let flat = Transform::default().with_rotation(0.4, 0.2, 0.0);
        let rolled = Transform::default().with_rotation(0.4, 0.2, 1.3);

        assert_relative_eq!(flat.forward(), rolled.forward());
        assert_relative_eq!(flat.right(), rolled.right());
        assert_relative_eq!(flat.up(), rolled.up());

        // but it still rotates the matrices
        assert!((flat.rotation_matrix() - rolled.rotation_matrix()).norm() > 1e-3);
    }

    #[test]
    fn test_rotation_order_is_pitch_yaw_roll() {
        let t = Transform::default().with_rotation(0.5, 0.3, 0.2);
        let expected = t.pitch_matrix() * t.yaw_matrix() * t.roll_matrix();
        assert_relative_eq!(t.rotation_matrix(), expected);
    }
}
