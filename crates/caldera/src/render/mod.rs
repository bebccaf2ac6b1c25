//! Frame pipeline, GPU resources and presentation
//!
//! The [`Renderer`] owns the frames in flight and turns
//! `(scene, target, camera, viewport, settings)` requests into recorded
//! commands. Everything GPU-side goes through the [`RenderDevice`]
//! capability, which the `vulkan` feature implements with ash and which
//! [`testing::RecordingDevice`] implements in memory.

pub mod commands;
pub mod compositor;
pub mod device;
pub mod engine;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod release;
pub mod renderer;
pub mod target;
pub mod testing;
pub mod window;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use commands::{CommandRecorder, Extent2D, ImageLayout, LoadOp, Rect2D, RenderCommand, StoreOp};
pub use compositor::RenderSettings;
pub use device::{DeviceError, DeviceResult, RenderDevice, SampleCount};
pub use engine::Engine;
pub use frame::FrameState;
pub use material::{Material, MaterialInfo, MaterialTemplate, MaterialTemplateInfo};
pub use mesh::{Mesh, Vertex};
pub use renderer::Renderer;
pub use target::{RenderTarget, RenderTargetInfo};
pub use window::{Key, Window, WindowSurface};

use crate::config::ConfigError;
use crate::scene::graph::SceneError;

/// Rendering errors
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// The device rejected an operation
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// The device stopped responding during a fence wait
    #[error("Device lost while waiting on frame {frame}")]
    DeviceLost {
        /// Frame slot whose fence was being waited on
        frame: usize,
    },

    /// A bounded fence wait expired
    #[error("Fence of frame {frame} did not signal within the configured timeout")]
    FenceTimeout {
        /// Frame slot whose fence was being waited on
        frame: usize,
    },

    /// Frame operations called out of order
    #[error("Invalid frame state: expected {expected:?}, found {actual:?}")]
    InvalidFrameState {
        /// State the operation needs
        expected: FrameState,
        /// State the slot is in
        actual: FrameState,
    },

    /// Command recorder used out of order
    #[error("Invalid command recorder state for {operation}: {state:?}")]
    InvalidRecorderState {
        /// What was attempted
        operation: &'static str,
        /// State the recorder is in
        state: commands::RecorderState,
    },

    /// A material cannot draw into the target
    #[error("Material of node '{node}' is incompatible with the render target: {reason}")]
    IncompatibleMaterial {
        /// Mesh node name
        node: String,
        /// Which property differs
        reason: String,
    },

    /// Material parameters of the wrong size
    #[error("Material parameters are {actual} bytes, template expects {expected}")]
    ParamsSizeMismatch {
        /// Template parameter block size
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Scene graph lookup failed
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),
}

impl From<ConfigError> for RenderError {
    fn from(error: ConfigError) -> Self {
        Self::InvalidConfig(error.to_string())
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
