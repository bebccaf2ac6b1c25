//! Frame slots
//!
//! Each slot cycles `Idle → Recording → Submitted → Idle`. The slot's fence
//! guards both its command list and its scene-data buffer: neither is
//! touched again until the fence of the previous use has been waited on.

use crate::render::commands::CommandRecorder;
use crate::render::device::{BufferDesc, BufferId, DeviceResult, FenceId, RenderDevice};

/// Lifecycle state of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Free to begin
    Idle,
    /// Between `begin_frame` and `end_frame`
    Recording,
    /// Handed to the GPU, fence not yet waited on
    Submitted,
}

/// Per-frame resources
#[derive(Debug)]
pub struct FrameSlot {
    pub(crate) fence: FenceId,
    pub(crate) recorder: CommandRecorder,
    pub(crate) scene_data: BufferId,
    pub(crate) scene_data_address: u64,
    pub(crate) transient: Vec<BufferId>,
    pub(crate) state: FrameState,
}

impl FrameSlot {
    /// Allocate the fence (signaled, so the first begin does not block) and
    /// the scene-data buffer
    pub(crate) fn new(device: &dyn RenderDevice, scene_data_size: u64) -> DeviceResult<Self> {
        let fence = device.create_fence(true)?;
        let scene_data = match device.create_buffer(&BufferDesc::storage(scene_data_size, "scene data"), None) {
            Ok(buffer) => buffer,
            Err(error) => {
                device.destroy_fence(fence)?;
                return Err(error);
            }
        };
        let scene_data_address = device.buffer_address(scene_data)?;

        Ok(Self {
            fence,
            recorder: CommandRecorder::new(),
            scene_data,
            scene_data_address,
            transient: Vec::new(),
            state: FrameState::Idle,
        })
    }

    /// Completion fence
    pub fn fence(&self) -> FenceId {
        self.fence
    }

    /// Scene-data buffer rewritten by every pass recorded into this slot
    pub fn scene_data(&self) -> BufferId {
        self.scene_data
    }

    /// Camera-data buffers allocated since the slot began recording
    pub fn transient_buffers(&self) -> &[BufferId] {
        &self.transient
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Destroy the transient buffers; only valid after the fence wait
    pub(crate) fn release_transient(&mut self, device: &dyn RenderDevice) -> DeviceResult<usize> {
        let count = self.transient.len();
        let mut first_error = None;
        for buffer in self.transient.drain(..) {
            if let Err(error) = device.destroy_buffer(buffer) {
                log::error!("Failed to destroy camera data buffer {buffer:?}: {error}");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(count), Err)
    }

    /// Destroy everything the slot owns
    pub(crate) fn destroy(&mut self, device: &dyn RenderDevice) {
        if let Err(error) = self.release_transient(device) {
            log::error!("Failed to release transient buffers: {error}");
        }
        if let Err(error) = device.destroy_buffer(self.scene_data) {
            log::error!("Failed to destroy scene data buffer: {error}");
        }
        if let Err(error) = device.destroy_fence(self.fence) {
            log::error!("Failed to destroy frame fence: {error}");
        }
    }
}
