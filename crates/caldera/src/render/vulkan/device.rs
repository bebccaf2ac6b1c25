//! [`RenderDevice`] on Vulkan

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ash::{vk, Device};

use super::commands::{CommandPool, Translator};
use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::resources::{self, ImageEntry, Resources};
use super::window::GlfwWindow;
use super::{pipeline, VulkanError, VulkanResult};
use crate::config::EngineConfig;
use crate::render::device::{
    BufferDesc, BufferId, DeviceError, DeviceResult, FenceId, ImageDesc, ImageId, PipelineDesc, PipelineId,
    RenderDevice, SampleCount, SemaphoreId, Submission,
};

/// Tables and the command pool share one lock; it also serializes queue access
pub(super) struct State {
    pub resources: Resources,
    pub commands: CommandPool,
}

/// Vulkan 1.3 device
///
/// Owns the instance, the logical device and every object created through
/// [`RenderDevice`]. Objects still alive when the device drops are
/// destroyed with a warning.
pub struct VulkanDevice {
    state: Mutex<State>,
    physical: PhysicalDeviceInfo,
    max_samples: SampleCount,
    logical: LogicalDevice,
    instance: VulkanInstance,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("queue_family", &self.physical.queue_family)
            .field("max_samples", &self.max_samples)
            .finish_non_exhaustive()
    }
}

impl VulkanDevice {
    /// Create a device able to present to `window`
    pub fn new(window: &GlfwWindow, config: &EngineConfig) -> VulkanResult<Self> {
        let validation = config.enable_validation.unwrap_or(cfg!(debug_assertions));
        let instance = VulkanInstance::new(window, &config.application_name, validation)?;

        // Only needed to pick a queue family that can present
        let probe = window.create_surface(&instance.instance)?;
        let physical = PhysicalDeviceInfo::select(&instance, probe);
        unsafe { instance.surface_loader.destroy_surface(probe, None) };
        let physical = physical?;

        let logical = LogicalDevice::new(&instance, &physical)?;
        let commands = CommandPool::new(logical.device.clone(), physical.queue_family)?;
        let max_samples = physical.max_sample_count();
        log::info!("Vulkan device ready (max samples {:?})", max_samples);

        Ok(Self {
            state: Mutex::new(State {
                resources: Resources::default(),
                commands,
            }),
            physical,
            max_samples,
            logical,
            instance,
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn device(&self) -> &Device {
        &self.logical.device
    }

    pub(super) fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub(super) fn logical(&self) -> &LogicalDevice {
        &self.logical
    }

    pub(super) fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Add an externally owned image to the image table
    pub(super) fn register_image(&self, entry: ImageEntry) -> ImageId {
        self.lock().resources.images.insert(entry)
    }

    pub(super) fn semaphore_handle(&self, id: SemaphoreId) -> DeviceResult<vk::Semaphore> {
        Ok(self.lock().resources.semaphore(id)?)
    }

    fn fence_handle(&self, id: FenceId) -> DeviceResult<vk::Fence> {
        Ok(self.lock().resources.fence(id)?)
    }
}

fn map_wait(result: vk::Result) -> DeviceError {
    match result {
        vk::Result::TIMEOUT => DeviceError::Timeout,
        vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost,
        other => VulkanError::Api(other).into(),
    }
}

fn map_submit(result: vk::Result) -> DeviceError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceError::OutOfMemory,
        other => DeviceError::SubmissionFailed(format!("{other:?}")),
    }
}

impl RenderDevice for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>) -> DeviceResult<BufferId> {
        let entry = resources::create_buffer(self.device(), &self.physical.memory_properties, desc, initial)?;
        Ok(self.lock().resources.buffers.insert(entry))
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let state = self.lock();
        let entry = state.resources.buffer(buffer)?;
        resources::write_buffer(self.device(), entry, offset, data)?;
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()> {
        let entry = self
            .lock()
            .resources
            .buffers
            .remove(buffer)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("buffer {buffer:?}")))?;
        resources::destroy_buffer(self.device(), &entry);
        Ok(())
    }

    fn buffer_address(&self, buffer: BufferId) -> DeviceResult<u64> {
        Ok(self.lock().resources.buffer(buffer)?.address)
    }

    fn create_image(&self, desc: &ImageDesc) -> DeviceResult<ImageId> {
        let entry = resources::create_image(self.device(), &self.physical.memory_properties, desc)?;
        Ok(self.lock().resources.images.insert(entry))
    }

    fn destroy_image(&self, image: ImageId) -> DeviceResult<()> {
        let entry = self
            .lock()
            .resources
            .images
            .remove(image)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("image {image:?}")))?;
        resources::destroy_image(self.device(), &entry);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceId> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe {
            self.device()
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(self.lock().resources.fences.insert(fence))
    }

    fn reset_fence(&self, fence: FenceId) -> DeviceResult<()> {
        let handle = self.fence_handle(fence)?;
        unsafe { self.device().reset_fences(&[handle]).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceId) -> DeviceResult<bool> {
        let handle = self.fence_handle(fence)?;
        unsafe { self.device().get_fence_status(handle).map_err(map_wait) }
    }

    fn wait_fence(&self, fence: FenceId, timeout: Option<Duration>) -> DeviceResult<()> {
        let handle = self.fence_handle(fence)?;
        let timeout = timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        unsafe { self.device().wait_for_fences(&[handle], true, timeout).map_err(map_wait) }
    }

    fn destroy_fence(&self, fence: FenceId) -> DeviceResult<()> {
        let handle = self
            .lock()
            .resources
            .fences
            .remove(fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("fence {fence:?}")))?;
        unsafe { self.device().destroy_fence(handle, None) };
        Ok(())
    }

    fn create_semaphore(&self) -> DeviceResult<SemaphoreId> {
        let semaphore = unsafe {
            self.device()
                .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
                .map_err(VulkanError::Api)?
        };
        Ok(self.lock().resources.semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) -> DeviceResult<()> {
        let handle = self
            .lock()
            .resources
            .semaphores
            .remove(semaphore)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("semaphore {semaphore:?}")))?;
        unsafe { self.device().destroy_semaphore(handle, None) };
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> DeviceResult<PipelineId> {
        let entry = pipeline::create_pipeline(self.device(), desc)?;
        log::debug!(
            "Created pipeline from {} / {}",
            desc.vertex_shader.display(),
            desc.fragment_shader.display()
        );
        Ok(self.lock().resources.pipelines.insert(entry))
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> DeviceResult<()> {
        let entry = self
            .lock()
            .resources
            .pipelines
            .remove(pipeline)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("pipeline {pipeline:?}")))?;
        pipeline::destroy_pipeline(self.device(), &entry);
        Ok(())
    }

    fn submit(&self, submission: &Submission<'_>) -> DeviceResult<()> {
        let device = self.device();
        let mut guard = self.lock();
        let state = &mut *guard;

        let wait = submission
            .wait
            .iter()
            .map(|&id| state.resources.semaphore(id))
            .collect::<VulkanResult<Vec<_>>>()?;
        let signal = submission
            .signal
            .iter()
            .map(|&id| state.resources.semaphore(id))
            .collect::<VulkanResult<Vec<_>>>()?;
        let fence = submission.fence.map(|id| state.resources.fence(id)).transpose()?;

        let slot = state.commands.acquire()?;
        let (cb, internal_fence) = slot;
        if let Err(e) = Translator::new(device, cb, &mut state.resources).record(submission.commands) {
            unsafe {
                let _ = device.reset_command_buffer(cb, vk::CommandBufferResetFlags::empty());
            }
            state.commands.release(slot);
            return Err(e.into());
        }

        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait.len()];
        let command_buffers = [cb];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);

        unsafe {
            if let Err(e) = device.queue_submit(self.logical.queue, &[submit_info.build()], internal_fence) {
                let _ = device.reset_command_buffer(cb, vk::CommandBufferResetFlags::empty());
                state.commands.release(slot);
                return Err(map_submit(e));
            }
            state.commands.retire(slot);

            // An empty batch signals once everything before it completes
            if let Some(fence) = fence {
                device.queue_submit(self.logical.queue, &[], fence).map_err(map_submit)?;
            }
        }

        log::trace!(
            "Submitted {} commands to {:?}",
            submission.commands.len(),
            submission.queue
        );
        Ok(())
    }

    fn max_sample_count(&self) -> SampleCount {
        self.max_samples
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        let mut state = self.lock();
        unsafe { self.device().device_wait_idle().map_err(map_wait)? };
        state.commands.reclaim()?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = self.logical.device.clone();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            let _ = device.device_wait_idle();
        }

        let resources = std::mem::take(&mut state.resources);
        let leaked = resources.buffers.len()
            + resources.images.len()
            + resources.fences.len()
            + resources.semaphores.len()
            + resources.pipelines.len();
        if leaked > 0 {
            log::warn!("Destroying {leaked} device objects still alive at shutdown");
        }

        for (_, entry) in resources.buffers {
            resources::destroy_buffer(&device, &entry);
        }
        for (_, entry) in resources.images {
            resources::destroy_image(&device, &entry);
        }
        for (_, entry) in resources.pipelines {
            pipeline::destroy_pipeline(&device, &entry);
        }
        unsafe {
            for (_, fence) in resources.fences {
                device.destroy_fence(fence, None);
            }
            for (_, semaphore) in resources.semaphores {
                device.destroy_semaphore(semaphore, None);
            }
        }
    }
}
