//! # Caldera
//!
//! A thin real-time 3D renderer: a scene graph of meshes and cameras, and a
//! frames-in-flight pipeline that records each `(scene, camera, viewport)`
//! pass into a render target and presents windows by blitting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use caldera::prelude::*;
//! use caldera::render::testing::RecordingDevice;
//!
//! fn main() -> Result<(), RenderError> {
//!     let device = Arc::new(RecordingDevice::new());
//!     let engine = Engine::new(device, EngineConfig::default())?;
//!     let target = RenderTarget::new(
//!         engine.release_queue().clone(),
//!         RenderTargetInfo::new(800, 600).with_samples(engine.preferred_samples()),
//!     )?;
//!
//!     let mut scene = Scene::new();
//!     let root = scene.create_root("root", Transform::default());
//!     scene.add_mesh(root, "cube", Some(engine.cube().clone()), Transform::default(), None)?;
//!     let camera = scene.add_camera(
//!         root,
//!         "camera",
//!         Camera::default(),
//!         Transform::from_position(Vec3::new(0.0, 0.0, 3.0)),
//!         Viewport::FULL,
//!     )?;
//!
//!     let mut renderer = Renderer::new(&engine, RendererConfig::default())?;
//!     renderer.begin_frame()?;
//!     renderer.render_scene(&scene, &target, camera, Viewport::FULL, &RenderSettings::clear())?;
//!     renderer.end_frame()?;
//!     Ok(())
//! }
//! ```
//!
//! Enable the `vulkan` feature for the ash/GLFW backend.

#![warn(missing_docs)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

#[cfg(test)]
mod tests;

/// Common imports
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig, RendererConfig, ShaderConfig, WindowConfig},
        foundation::{
            color::Color,
            math::{Mat4, Vec2, Vec3, Vec4},
            time::FrameTimer,
        },
        render::{
            Engine, Key, Material, MaterialInfo, MaterialTemplate, MaterialTemplateInfo, Mesh, RenderError,
            RenderResult, RenderSettings, RenderTarget, RenderTargetInfo, Renderer, SampleCount, Vertex, Window,
            WindowSurface,
        },
        scene::{Camera, DirectionalLight, FirstPersonController, NodeKey, Scene, Transform, Viewport},
    };
}
