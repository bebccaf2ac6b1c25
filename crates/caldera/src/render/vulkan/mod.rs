//! Vulkan backend
//!
//! [`VulkanDevice`] implements [`RenderDevice`](crate::render::RenderDevice)
//! on Vulkan 1.3 with dynamic rendering, synchronization2 and buffer device
//! addresses. [`GlfwSurface`] implements
//! [`WindowSurface`](crate::render::WindowSurface) for a GLFW window.
//!
//! ```rust,no_run
//! use caldera::prelude::*;
//! use caldera::render::vulkan;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (device, surface) = vulkan::create(&EngineConfig::default(), &WindowConfig::default())?;
//! let engine = Engine::new(device, EngineConfig::default())?;
//! let window = Window::new(&engine, surface, &WindowConfig::default())?;
//! # Ok(())
//! # }
//! ```

mod commands;
mod context;
mod device;
mod pipeline;
mod resources;
mod window;

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::config::{EngineConfig, WindowConfig};
use crate::render::device::{DeviceError, Format, SampleCount};

pub use device::VulkanDevice;
pub use window::{GlfwSurface, GlfwWindow};

/// Vulkan backend errors
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Handle does not name a live object
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan or window initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for DeviceError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                DeviceError::OutOfMemory
            }
            VulkanError::Api(vk::Result::TIMEOUT) => DeviceError::Timeout,
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST) => DeviceError::DeviceLost,
            VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                DeviceError::SurfaceLost
            }
            VulkanError::NoSuitableMemoryType => DeviceError::OutOfMemory,
            VulkanError::ResourceNotFound(what) => DeviceError::ResourceNotFound(what),
            other => DeviceError::Backend(other.to_string()),
        }
    }
}

/// Open a window and bring up a device that can present to it
pub fn create(engine: &EngineConfig, window: &WindowConfig) -> VulkanResult<(Arc<VulkanDevice>, GlfwSurface)> {
    let glfw_window = GlfwWindow::new(window)?;
    let device = Arc::new(VulkanDevice::new(&glfw_window, engine)?);
    let surface = GlfwSurface::new(device.clone(), glfw_window)?;
    Ok((device, surface))
}

fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::D32Float => vk::Format::D32_SFLOAT,
    }
}

fn vk_samples(samples: SampleCount) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(samples.count())
}

fn aspect_of(format: Format) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}
