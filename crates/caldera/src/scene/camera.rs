//! Camera parameters and viewport rectangles

use serde::{Deserialize, Serialize};

use crate::foundation::math::{utils, Mat4, Mat4Ext};

/// Perspective camera parameters
///
/// Placement lives in the owning scene node's transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near clip plane distance
    pub near: f32,
    /// Far clip plane distance
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Create a camera
    pub fn new(fov_degrees: f32, near: f32, far: f32) -> Self {
        Self { fov_degrees, near, far }
    }

    /// Projection from Y-up, -Z-forward view space into Vulkan clip space
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective(utils::deg_to_rad(self.fov_degrees), aspect, self.near, self.far)
            * Mat4::vulkan_coordinate_transform()
    }
}

/// Rectangle of a render target, in pixels
///
/// A zero width or height means "fill the target along that axis".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width, or 0 for the full target width
    pub width: f32,
    /// Height, or 0 for the full target height
    pub height: f32,
}

impl Viewport {
    /// Viewport that fills the whole target
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    /// Create a viewport
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Width over height
    ///
    /// Only meaningful once the viewport has been resolved against a target.
    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_depth_range() {
        let camera = Camera::default();
        let proj = camera.projection_matrix(16.0 / 9.0);

        let near = proj * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -camera.far, 1.0);

        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_flips_y_for_vulkan() {
        let proj = Camera::default().projection_matrix(1.0);
        let above = proj * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn test_projection_uses_aspect() {
        let camera = Camera::default();
        let wide = camera.projection_matrix(2.0);
        let square = camera.projection_matrix(1.0);
        assert_relative_eq!(wide[(0, 0)] * 2.0, square[(0, 0)], epsilon = 1e-6);
        assert_relative_eq!(wide[(1, 1)], square[(1, 1)]);
    }
}
