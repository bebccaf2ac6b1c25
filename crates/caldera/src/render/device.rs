//! GPU device capability
//!
//! Everything above this module talks to the GPU through [`RenderDevice`]:
//! object creation and destruction, host writes into mapped buffers, fence
//! queries and queue submission. Objects are named by generational ids, so
//! a destroyed id is reported as [`DeviceError::ResourceNotFound`] instead
//! of reaching the driver.
//!
//! Implementations are shared as `Arc<dyn RenderDevice>` and must accept
//! calls through `&self` from any thread.

use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::render::commands::{Extent2D, RenderCommand};

new_key_type! {
    /// GPU buffer handle
    pub struct BufferId;
    /// GPU image handle
    pub struct ImageId;
    /// CPU-visible completion signal
    pub struct FenceId;
    /// GPU-side ordering primitive between submissions
    pub struct SemaphoreId;
    /// Graphics pipeline handle
    pub struct PipelineId;
}

/// Device errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device or host memory exhausted
    #[error("Out of memory")]
    OutOfMemory,

    /// The id does not name a live object
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A bounded wait expired
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// The device stopped responding
    #[error("Device lost")]
    DeviceLost,

    /// Queue submission was rejected
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// The presentation surface is gone or out of date
    #[error("Surface lost")]
    SurfaceLost,

    /// Anything else the backend reports
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Read through a device address as a storage buffer
        const STORAGE = 1 << 0;
        /// Bound as an index buffer
        const INDEX = 1 << 1;
        /// Read as a uniform block
        const UNIFORM = 1 << 2;
        /// Written by transfer commands
        const TRANSFER_DST = 1 << 3;
        /// Host can map and write it
        const HOST_WRITE = 1 << 4;
    }
}

bitflags! {
    /// How an image will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Rendered to as a color attachment
        const COLOR_ATTACHMENT = 1 << 0;
        /// Rendered to as a depth attachment
        const DEPTH_ATTACHMENT = 1 << 1;
        /// Source of copies, blits and resolves
        const TRANSFER_SRC = 1 << 2;
        /// Destination of copies, blits and resolves
        const TRANSFER_DST = 1 << 3;
        /// Sampled from shaders
        const SAMPLED = 1 << 4;
    }
}

/// Multisample count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum SampleCount {
    /// No multisampling
    #[default]
    X1,
    /// 2 samples
    X2,
    /// 4 samples
    X4,
    /// 8 samples
    X8,
    /// 16 samples
    X16,
    /// 32 samples
    X32,
    /// 64 samples
    X64,
}

impl SampleCount {
    /// Number of samples
    pub const fn count(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
            Self::X32 => 32,
            Self::X64 => 64,
        }
    }

    /// Parse an exact power-of-two count
    pub const fn from_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            4 => Some(Self::X4),
            8 => Some(Self::X8),
            16 => Some(Self::X16),
            32 => Some(Self::X32),
            64 => Some(Self::X64),
            _ => None,
        }
    }

    /// More than one sample
    pub const fn is_multisampled(self) -> bool {
        !matches!(self, Self::X1)
    }
}

/// Pixel formats used by render targets and swapchains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 16-bit float RGBA, the offscreen color format
    Rgba16Float,
    /// 8-bit sRGB BGRA, the usual swapchain format
    Bgra8Srgb,
    /// 32-bit float depth
    D32Float,
}

impl Format {
    /// Whether the format has a depth aspect
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D32Float)
    }
}

/// Queue a submission targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Rendering and presentation blits
    Graphics,
    /// Mesh uploads
    Transfer,
}

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Intended usage
    pub usage: BufferUsage,
    /// Debug label
    pub label: &'static str,
}

impl BufferDesc {
    /// Per-slot scene data block, rewritten by transfer commands
    pub fn storage(size: u64, label: &'static str) -> Self {
        Self {
            size,
            usage: BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
            label,
        }
    }

    /// Host-written uniform block
    pub fn uniform(size: u64, label: &'static str) -> Self {
        Self {
            size,
            usage: BufferUsage::UNIFORM | BufferUsage::HOST_WRITE,
            label,
        }
    }
}

/// Image creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: Extent2D,
    /// Pixel format
    pub format: Format,
    /// Samples per pixel
    pub samples: SampleCount,
    /// Intended usage
    pub usage: ImageUsage,
}

/// Rasterizer fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PolygonMode {
    /// Filled triangles
    #[default]
    Fill,
    /// Wireframe
    Line,
    /// Vertices only
    Point,
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    /// SPIR-V vertex shader
    pub vertex_shader: PathBuf,
    /// SPIR-V fragment shader
    pub fragment_shader: PathBuf,
    /// Depth test and write enabled
    pub depth_test: bool,
    /// Alpha blending enabled
    pub transparency: bool,
    /// Rasterizer fill mode
    pub polygon_mode: PolygonMode,
    /// Line width for `PolygonMode::Line`
    pub line_width: f32,
    /// Samples per pixel of the targets it draws into
    pub samples: SampleCount,
    /// Color attachment format
    pub color_format: Format,
    /// Depth attachment format, if depth is used
    pub depth_format: Option<Format>,
    /// Size of the per-draw constant block
    pub push_constant_size: u32,
}

/// One batch of recorded commands for a queue
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Target queue
    pub queue: QueueKind,
    /// Commands in execution order
    pub commands: &'a [RenderCommand],
    /// Semaphores waited on before execution
    pub wait: &'a [SemaphoreId],
    /// Semaphores signaled on completion
    pub signal: &'a [SemaphoreId],
    /// Fence signaled on completion
    pub fence: Option<FenceId>,
}

/// GPU device capability
pub trait RenderDevice: Send + Sync {
    /// Create a buffer, optionally filled with `initial` bytes
    fn create_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>) -> DeviceResult<BufferId>;

    /// Write bytes into a host-writable buffer
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()>;

    /// GPU virtual address of a buffer
    fn buffer_address(&self, buffer: BufferId) -> DeviceResult<u64>;

    /// Create an image
    fn create_image(&self, desc: &ImageDesc) -> DeviceResult<ImageId>;

    /// Destroy an image
    fn destroy_image(&self, image: ImageId) -> DeviceResult<()>;

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceId>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: FenceId) -> DeviceResult<()>;

    /// Non-blocking status query
    fn fence_signaled(&self, fence: FenceId) -> DeviceResult<bool>;

    /// Block until the fence signals, or `timeout` expires
    ///
    /// `None` waits forever. Expiry is [`DeviceError::Timeout`].
    fn wait_fence(&self, fence: FenceId, timeout: Option<Duration>) -> DeviceResult<()>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceId) -> DeviceResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> DeviceResult<SemaphoreId>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreId) -> DeviceResult<()>;

    /// Build a graphics pipeline
    fn create_pipeline(&self, desc: &PipelineDesc) -> DeviceResult<PipelineId>;

    /// Destroy a graphics pipeline
    fn destroy_pipeline(&self, pipeline: PipelineId) -> DeviceResult<()>;

    /// Submit recorded commands
    fn submit(&self, submission: &Submission<'_>) -> DeviceResult<()>;

    /// Highest sample count usable for color and depth attachments
    fn max_sample_count(&self) -> SampleCount;

    /// Block until all queues are idle
    fn wait_idle(&self) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_count_round_trip_and_order() {
        for count in [1, 2, 4, 8, 16, 32, 64] {
            let samples = SampleCount::from_count(count).unwrap();
            assert_eq!(samples.count(), count);
        }
        assert_eq!(SampleCount::from_count(3), None);
        assert!(SampleCount::X4 < SampleCount::X8);
        assert_eq!(SampleCount::X16.min(SampleCount::X8), SampleCount::X8);
        assert!(!SampleCount::X1.is_multisampled());
    }
}
