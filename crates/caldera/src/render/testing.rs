//! In-memory device and surface
//!
//! [`RecordingDevice`] implements [`RenderDevice`] without a GPU. Every call
//! that changes device state is appended to an event log with a sequence
//! number, so tests can assert ordering ("buffer destroyed after the fence
//! wait"). Submissions execute immediately: inline buffer updates are applied
//! to CPU copies and the submission fence is signaled before `submit`
//! returns.
//!
//! [`ScriptedSurface`] stands in for a window: its swapchain images live on a
//! `RecordingDevice`, and key/cursor state is driven by the test.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use slotmap::SlotMap;

use crate::render::commands::{Extent2D, RenderCommand};
use crate::render::device::{
    BufferDesc, BufferId, BufferUsage, DeviceError, DeviceResult, FenceId, Format, ImageDesc, ImageId, ImageUsage,
    PipelineDesc, PipelineId, QueueKind, RenderDevice, SampleCount, SemaphoreId, Submission,
};
use crate::render::window::{Key, WindowSurface};

/// A state-changing device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// `create_buffer`
    CreateBuffer {
        /// New buffer
        id: BufferId,
        /// Size in bytes
        size: u64,
        /// Usage flags
        usage: BufferUsage,
        /// Debug label
        label: &'static str,
    },
    /// `write_buffer`
    WriteBuffer {
        /// Buffer written
        id: BufferId,
        /// Byte offset
        offset: u64,
        /// Bytes written
        len: usize,
    },
    /// `destroy_buffer`
    DestroyBuffer(BufferId),
    /// `create_image`
    CreateImage {
        /// New image
        id: ImageId,
        /// Creation parameters
        desc: ImageDesc,
    },
    /// `destroy_image`
    DestroyImage(ImageId),
    /// `create_fence`
    CreateFence {
        /// New fence
        id: FenceId,
        /// Initial state
        signaled: bool,
    },
    /// `reset_fence`
    ResetFence(FenceId),
    /// `wait_fence`
    WaitFence(FenceId),
    /// `destroy_fence`
    DestroyFence(FenceId),
    /// `create_semaphore`
    CreateSemaphore(SemaphoreId),
    /// `destroy_semaphore`
    DestroySemaphore(SemaphoreId),
    /// `create_pipeline`
    CreatePipeline {
        /// New pipeline
        id: PipelineId,
        /// Creation parameters
        desc: PipelineDesc,
    },
    /// `destroy_pipeline`
    DestroyPipeline(PipelineId),
    /// `submit`
    Submit {
        /// Target queue
        queue: QueueKind,
        /// Commands executed
        commands: Vec<RenderCommand>,
        /// Waited semaphores
        wait: Vec<SemaphoreId>,
        /// Signaled semaphores
        signal: Vec<SemaphoreId>,
        /// Signaled fence
        fence: Option<FenceId>,
    },
    /// `wait_idle`
    WaitIdle,
    /// Swapchain image acquired by a [`ScriptedSurface`]
    Acquire {
        /// Acquired image
        image: ImageId,
        /// Semaphore signaled on acquire
        signal: SemaphoreId,
    },
    /// Swapchain image presented by a [`ScriptedSurface`]
    Present {
        /// Semaphores waited before presenting
        wait: Vec<SemaphoreId>,
    },
}

/// An event with its position in the log
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Monotonic sequence number
    pub seq: u64,
    /// What happened
    pub event: DeviceEvent,
}

#[derive(Debug)]
struct BufferRecord {
    data: Vec<u8>,
    address: u64,
}

#[derive(Debug, Default)]
struct DeviceState {
    buffers: SlotMap<BufferId, BufferRecord>,
    images: SlotMap<ImageId, ImageDesc>,
    fences: SlotMap<FenceId, bool>,
    semaphores: SlotMap<SemaphoreId, ()>,
    pipelines: SlotMap<PipelineId, PipelineDesc>,
    next_address: u64,
    wait_errors: VecDeque<DeviceError>,
    events: Vec<RecordedEvent>,
    next_seq: u64,
}

impl DeviceState {
    fn log(&mut self, event: DeviceEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(RecordedEvent { seq, event });
    }

    fn buffer_mut(&mut self, id: BufferId) -> DeviceResult<&mut BufferRecord> {
        self.buffers
            .get_mut(id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("buffer {id:?}")))
    }

    fn write(&mut self, id: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let record = self.buffer_mut(id)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > record.data.len() {
            return Err(DeviceError::Backend(format!(
                "write of {} bytes at {offset} overflows {}-byte buffer",
                data.len(),
                record.data.len()
            )));
        }
        record.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn execute(&mut self, command: &RenderCommand) -> DeviceResult<()> {
        match command {
            RenderCommand::UpdateBuffer { buffer, offset, data } => self.write(*buffer, *offset, data),
            RenderCommand::BindIndexBuffer(buffer) => self.buffer_mut(*buffer).map(|_| ()),
            RenderCommand::BindPipeline(pipeline) | RenderCommand::PushConstants { pipeline, .. } => {
                if self.pipelines.contains_key(*pipeline) {
                    Ok(())
                } else {
                    Err(DeviceError::ResourceNotFound(format!("pipeline {pipeline:?}")))
                }
            }
            RenderCommand::BeginRendering { color, depth, .. } => {
                self.image(color.image)?;
                depth.map_or(Ok(()), |depth| self.image(depth.image))
            }
            RenderCommand::TransitionImage { image, .. } => self.image(*image),
            RenderCommand::ResolveImage { src, dst } | RenderCommand::BlitImage { src, dst } => {
                self.image(*src)?;
                self.image(*dst)
            }
            _ => Ok(()),
        }
    }

    fn image(&self, id: ImageId) -> DeviceResult<()> {
        if self.images.contains_key(id) {
            Ok(())
        } else {
            Err(DeviceError::ResourceNotFound(format!("image {id:?}")))
        }
    }
}

/// GPU-less [`RenderDevice`] that logs every call
#[derive(Debug)]
pub struct RecordingDevice {
    max_samples: SampleCount,
    state: Mutex<DeviceState>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    /// Device supporting single-sampled rendering only
    pub fn new() -> Self {
        Self {
            max_samples: SampleCount::X1,
            state: Mutex::new(DeviceState {
                next_address: 0x1000,
                ..DeviceState::default()
            }),
        }
    }

    /// Report `samples` as the device maximum
    pub fn with_max_sample_count(mut self, samples: SampleCount) -> Self {
        self.max_samples = samples;
        self
    }

    /// Make the next `wait_fence` call fail with `error`
    ///
    /// Errors queue up and are consumed one per wait.
    pub fn script_wait_error(&self, error: DeviceError) {
        self.lock().wait_errors.push_back(error);
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    /// Number of logged events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&DeviceEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|e| predicate(&e.event)).count()
    }

    /// Sequence number of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&DeviceEvent) -> bool) -> Option<u64> {
        self.lock().events.iter().find(|e| predicate(&e.event)).map(|e| e.seq)
    }

    /// Command lists submitted to `queue`, in submission order
    pub fn submissions(&self, queue: QueueKind) -> Vec<Vec<RenderCommand>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match &e.event {
                DeviceEvent::Submit { queue: q, commands, .. } if *q == queue => Some(commands.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop all logged events; sequence numbers keep increasing
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// CPU copy of a live buffer
    pub fn buffer_data(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.lock().buffers.get(buffer).map(|record| record.data.clone())
    }

    /// Whether `buffer` has not been destroyed
    pub fn is_buffer_live(&self, buffer: BufferId) -> bool {
        self.lock().buffers.contains_key(buffer)
    }

    /// Number of images not yet destroyed
    pub fn live_images(&self) -> usize {
        self.lock().images.len()
    }

    /// Number of buffers not yet destroyed
    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub(crate) fn log_event(&self, event: DeviceEvent) {
        self.lock().log(event);
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RenderDevice for RecordingDevice {
    fn create_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>) -> DeviceResult<BufferId> {
        let mut state = self.lock();
        let mut data = vec![0u8; desc.size as usize];
        if let Some(initial) = initial {
            if initial.len() > data.len() {
                return Err(DeviceError::Backend(format!(
                    "{} initial bytes for {}-byte buffer '{}'",
                    initial.len(),
                    desc.size,
                    desc.label
                )));
            }
            data[..initial.len()].copy_from_slice(initial);
        }

        let address = state.next_address;
        // Keep addresses distinct and aligned like a real allocator would
        state.next_address += desc.size.max(1).next_multiple_of(256);

        let id = state.buffers.insert(BufferRecord { data, address });
        state.log(DeviceEvent::CreateBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
            label: desc.label,
        });
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.lock();
        state.write(buffer, offset, data)?;
        state.log(DeviceEvent::WriteBuffer {
            id: buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .buffers
            .remove(buffer)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("buffer {buffer:?}")))?;
        state.log(DeviceEvent::DestroyBuffer(buffer));
        Ok(())
    }

    fn buffer_address(&self, buffer: BufferId) -> DeviceResult<u64> {
        self.lock().buffer_mut(buffer).map(|record| record.address)
    }

    fn create_image(&self, desc: &ImageDesc) -> DeviceResult<ImageId> {
        let mut state = self.lock();
        let id = state.images.insert(desc.clone());
        state.log(DeviceEvent::CreateImage { id, desc: desc.clone() });
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .images
            .remove(image)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("image {image:?}")))?;
        state.log(DeviceEvent::DestroyImage(image));
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceId> {
        let mut state = self.lock();
        let id = state.fences.insert(signaled);
        state.log(DeviceEvent::CreateFence { id, signaled });
        Ok(id)
    }

    fn reset_fence(&self, fence: FenceId) -> DeviceResult<()> {
        let mut state = self.lock();
        let signaled = state
            .fences
            .get_mut(fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("fence {fence:?}")))?;
        *signaled = false;
        state.log(DeviceEvent::ResetFence(fence));
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceId) -> DeviceResult<bool> {
        self.lock()
            .fences
            .get(fence)
            .copied()
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("fence {fence:?}")))
    }

    fn wait_fence(&self, fence: FenceId, _timeout: Option<Duration>) -> DeviceResult<()> {
        let mut state = self.lock();
        state.log(DeviceEvent::WaitFence(fence));
        if let Some(error) = state.wait_errors.pop_front() {
            return Err(error);
        }
        match state.fences.get(fence) {
            Some(true) => Ok(()),
            // Nothing will ever signal it
            Some(false) => Err(DeviceError::Timeout),
            None => Err(DeviceError::ResourceNotFound(format!("fence {fence:?}"))),
        }
    }

    fn destroy_fence(&self, fence: FenceId) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .fences
            .remove(fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("fence {fence:?}")))?;
        state.log(DeviceEvent::DestroyFence(fence));
        Ok(())
    }

    fn create_semaphore(&self) -> DeviceResult<SemaphoreId> {
        let mut state = self.lock();
        let id = state.semaphores.insert(());
        state.log(DeviceEvent::CreateSemaphore(id));
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .semaphores
            .remove(semaphore)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("semaphore {semaphore:?}")))?;
        state.log(DeviceEvent::DestroySemaphore(semaphore));
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> DeviceResult<PipelineId> {
        let mut state = self.lock();
        let id = state.pipelines.insert(desc.clone());
        state.log(DeviceEvent::CreatePipeline { id, desc: desc.clone() });
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> DeviceResult<()> {
        let mut state = self.lock();
        state
            .pipelines
            .remove(pipeline)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("pipeline {pipeline:?}")))?;
        state.log(DeviceEvent::DestroyPipeline(pipeline));
        Ok(())
    }

    fn submit(&self, submission: &Submission<'_>) -> DeviceResult<()> {
        let mut state = self.lock();
        for command in submission.commands {
            state
                .execute(command)
                .map_err(|error| DeviceError::SubmissionFailed(error.to_string()))?;
        }
        if let Some(fence) = submission.fence {
            let signaled = state
                .fences
                .get_mut(fence)
                .ok_or_else(|| DeviceError::ResourceNotFound(format!("fence {fence:?}")))?;
            *signaled = true;
        }
        state.log(DeviceEvent::Submit {
            queue: submission.queue,
            commands: submission.commands.to_vec(),
            wait: submission.wait.to_vec(),
            signal: submission.signal.to_vec(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn max_sample_count(&self) -> SampleCount {
        self.max_samples
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        self.lock().log(DeviceEvent::WaitIdle);
        Ok(())
    }
}

/// Swapchain format used by scripted surfaces
pub const SURFACE_FORMAT: Format = Format::Bgra8Srgb;

/// Test-driven [`WindowSurface`]
#[derive(Debug)]
pub struct ScriptedSurface {
    device: Arc<RecordingDevice>,
    extent: Extent2D,
    images: Vec<ImageId>,
    next_image: usize,
    keys: HashSet<Key>,
    cursor: (f64, f64),
    close_requested: bool,
    polls: usize,
}

impl ScriptedSurface {
    /// Surface with `image_count` swapchain images of `extent`
    pub fn new(device: Arc<RecordingDevice>, extent: Extent2D, image_count: usize) -> DeviceResult<Self> {
        let mut images = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            images.push(device.create_image(&ImageDesc {
                extent,
                format: SURFACE_FORMAT,
                samples: SampleCount::X1,
                usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
            })?);
        }
        Ok(Self {
            device,
            extent,
            images,
            next_image: 0,
            keys: HashSet::new(),
            cursor: (0.0, 0.0),
            close_requested: false,
            polls: 0,
        })
    }

    /// Swapchain images in acquisition order
    pub fn images(&self) -> &[ImageId] {
        &self.images
    }

    /// Hold a key down
    pub fn press(&mut self, key: Key) {
        self.keys.insert(key);
    }

    /// Let go of a key
    pub fn release(&mut self, key: Key) {
        self.keys.remove(&key);
    }

    /// Move the cursor to an absolute position
    pub fn move_cursor(&mut self, x: f64, y: f64) {
        self.cursor = (x, y);
    }

    /// Ask the window to close
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// How many times events were polled
    pub fn poll_count(&self) -> usize {
        self.polls
    }
}

impl WindowSurface for ScriptedSurface {
    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn acquire_next_image(&mut self, signal: SemaphoreId) -> DeviceResult<ImageId> {
        let image = *self.images.get(self.next_image).ok_or(DeviceError::SurfaceLost)?;
        self.next_image = (self.next_image + 1) % self.images.len();
        self.device.log_event(DeviceEvent::Acquire { image, signal });
        Ok(image)
    }

    fn present(&mut self, wait: &[SemaphoreId]) -> DeviceResult<()> {
        self.device.log_event(DeviceEvent::Present { wait: wait.to_vec() });
        Ok(())
    }

    fn poll_events(&mut self) {
        self.polls += 1;
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn is_key_pressed(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    fn cursor_position(&self) -> (f64, f64) {
        self.cursor
    }
}

impl Drop for ScriptedSurface {
    fn drop(&mut self) {
        for image in self.images.drain(..) {
            if let Err(error) = self.device.destroy_image(image) {
                log::error!("Failed to destroy swapchain image: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_applies_updates_and_signals_fence() {
        let device = RecordingDevice::new();
        let buffer = device.create_buffer(&BufferDesc::storage(8, "test"), None).unwrap();
        let fence = device.create_fence(false).unwrap();

        device
            .submit(&Submission {
                queue: QueueKind::Graphics,
                commands: &[RenderCommand::UpdateBuffer {
                    buffer,
                    offset: 4,
                    data: vec![1, 2, 3, 4],
                }],
                wait: &[],
                signal: &[],
                fence: Some(fence),
            })
            .unwrap();

        assert!(device.fence_signaled(fence).unwrap());
        assert_eq!(device.buffer_data(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        device.wait_fence(fence, None).unwrap();
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_times_out() {
        let device = RecordingDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert_eq!(device.wait_fence(fence, None), Err(DeviceError::Timeout));

        let signaled = device.create_fence(true).unwrap();
        device.script_wait_error(DeviceError::DeviceLost);
        assert_eq!(device.wait_fence(signaled, None), Err(DeviceError::DeviceLost));
        assert_eq!(device.wait_fence(signaled, None), Ok(()));
    }

    #[test]
    fn test_submit_rejects_destroyed_buffers() {
        let device = RecordingDevice::new();
        let buffer = device.create_buffer(&BufferDesc::storage(4, "test"), None).unwrap();
        device.destroy_buffer(buffer).unwrap();

        let result = device.submit(&Submission {
            queue: QueueKind::Graphics,
            commands: &[RenderCommand::BindIndexBuffer(buffer)],
            wait: &[],
            signal: &[],
            fence: None,
        });
        assert!(matches!(result, Err(DeviceError::SubmissionFailed(_))));
    }

    #[test]
    fn test_surface_cycles_images() {
        let device = Arc::new(RecordingDevice::new());
        let mut surface = ScriptedSurface::new(device.clone(), Extent2D::new(4, 4), 2).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        let first = surface.acquire_next_image(semaphore).unwrap();
        let second = surface.acquire_next_image(semaphore).unwrap();
        assert_ne!(first, second);
        assert_eq!(surface.acquire_next_image(semaphore).unwrap(), first);

        drop(surface);
        assert_eq!(device.live_images(), 0);
    }
}
