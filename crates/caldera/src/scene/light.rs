//! Lighting parameters shared by every draw in a pass

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::foundation::color::Color;
use crate::foundation::math::Vec3;

/// Infinitely distant light
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    /// Direction the light travels in
    pub direction: Vec3,
    /// Scalar multiplier on `color`
    pub intensity: f32,
    /// Light color
    pub color: Color,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, 0.0),
            intensity: 1.0,
            color: Color::WHITE,
        }
    }
}

impl DirectionalLight {
    /// Create a light, normalizing `direction`
    pub fn new(direction: Vec3, intensity: f32, color: Color) -> Self {
        Self {
            direction: direction.try_normalize(f32::EPSILON).unwrap_or_else(|| Vec3::new(0.0, -1.0, 0.0)),
            intensity,
            color,
        }
    }

    /// GPU layout: direction and intensity share one vec4
    pub fn to_gpu(&self) -> GpuDirectionalLight {
        GpuDirectionalLight {
            direction: self.direction.into(),
            intensity: self.intensity,
            color: self.color,
        }
    }
}

/// std430 layout of [`DirectionalLight`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// Direction the light travels in
    pub direction: [f32; 3],
    /// Scalar multiplier on `color`
    pub intensity: f32,
    /// Light color
    pub color: Color,
}
