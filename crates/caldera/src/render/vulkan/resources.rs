//! Buffer, image and pipeline tables
//!
//! Every live Vulkan object the device hands out is stored here under its
//! generational id. Images carry their last recorded layout so command
//! translation can emit the matching barrier.

use ash::{vk, Device};
use slotmap::SlotMap;

use super::{aspect_of, vk_format, vk_samples, VulkanError, VulkanResult};
use crate::render::commands::Extent2D;
use crate::render::device::{
    BufferDesc, BufferId, BufferUsage, FenceId, Format, ImageDesc, ImageId, ImageUsage, PipelineId, SemaphoreId,
};

pub(super) struct BufferEntry {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub address: u64,
    pub host_visible: bool,
}

pub(super) struct ImageEntry {
    pub image: vk::Image,
    /// `None` for swapchain images, which the swapchain owns
    pub memory: Option<vk::DeviceMemory>,
    pub view: vk::ImageView,
    pub format: Format,
    pub extent: Extent2D,
    pub layout: vk::ImageLayout,
}

impl ImageEntry {
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_of(self.format)
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    pub fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect(),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

pub(super) struct PipelineEntry {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Default)]
pub(super) struct Resources {
    pub buffers: SlotMap<BufferId, BufferEntry>,
    pub images: SlotMap<ImageId, ImageEntry>,
    pub fences: SlotMap<FenceId, vk::Fence>,
    pub semaphores: SlotMap<SemaphoreId, vk::Semaphore>,
    pub pipelines: SlotMap<PipelineId, PipelineEntry>,
}

fn not_found(kind: &str, id: impl std::fmt::Debug) -> VulkanError {
    VulkanError::ResourceNotFound(format!("{kind} {id:?}"))
}

impl Resources {
    pub fn buffer(&self, id: BufferId) -> VulkanResult<&BufferEntry> {
        self.buffers.get(id).ok_or_else(|| not_found("buffer", id))
    }

    pub fn image(&self, id: ImageId) -> VulkanResult<&ImageEntry> {
        self.images.get(id).ok_or_else(|| not_found("image", id))
    }

    pub fn image_mut(&mut self, id: ImageId) -> VulkanResult<&mut ImageEntry> {
        self.images.get_mut(id).ok_or_else(|| not_found("image", id))
    }

    pub fn fence(&self, id: FenceId) -> VulkanResult<vk::Fence> {
        self.fences.get(id).copied().ok_or_else(|| not_found("fence", id))
    }

    pub fn semaphore(&self, id: SemaphoreId) -> VulkanResult<vk::Semaphore> {
        self.semaphores.get(id).copied().ok_or_else(|| not_found("semaphore", id))
    }

    pub fn pipeline(&self, id: PipelineId) -> VulkanResult<&PipelineEntry> {
        self.pipelines.get(id).ok_or_else(|| not_found("pipeline", id))
    }
}

fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<u32> {
    for i in 0..memory_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}

fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    flags
}

/// Host-writable buffers and buffers created with initial contents live in
/// host-visible coherent memory; everything else is device-local.
pub(super) fn create_buffer(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    desc: &BufferDesc,
    initial: Option<&[u8]>,
) -> VulkanResult<BufferEntry> {
    if desc.size == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("buffer '{}' has zero size", desc.label),
        });
    }

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(desc.size)
        .usage(buffer_usage(desc.usage))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

    let host_visible = desc.usage.contains(BufferUsage::HOST_WRITE) || initial.is_some();
    let properties = if host_visible {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    } else {
        vk::MemoryPropertyFlags::DEVICE_LOCAL
    };

    let memory = match allocate_buffer_memory(device, memory_properties, buffer, properties) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let address_info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
    let address = unsafe { device.get_buffer_device_address(&address_info) };

    let entry = BufferEntry {
        buffer,
        memory,
        size: desc.size,
        address,
        host_visible,
    };

    if let Some(data) = initial {
        if let Err(e) = write_buffer(device, &entry, 0, data) {
            destroy_buffer(device, &entry);
            return Err(e);
        }
    }

    log::trace!("Created buffer '{}' ({} bytes)", desc.label, desc.size);
    Ok(entry)
}

fn allocate_buffer_memory(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    buffer: vk::Buffer,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type = find_memory_type(requirements.memory_type_bits, properties, memory_properties)?;

    let mut flags_info = vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type)
        .push_next(&mut flags_info);

    unsafe {
        let memory = device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)?;
        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.free_memory(memory, None);
            return Err(VulkanError::Api(e));
        }
        Ok(memory)
    }
}

pub(super) fn write_buffer(device: &Device, entry: &BufferEntry, offset: u64, data: &[u8]) -> VulkanResult<()> {
    if !entry.host_visible {
        return Err(VulkanError::InvalidOperation {
            reason: "buffer is not host-writable".to_string(),
        });
    }
    let end = offset.checked_add(data.len() as u64);
    if end.map_or(true, |end| end > entry.size) {
        return Err(VulkanError::InvalidOperation {
            reason: format!("write of {} bytes at {offset} exceeds buffer size {}", data.len(), entry.size),
        });
    }
    if data.is_empty() {
        return Ok(());
    }

    unsafe {
        let ptr = device
            .map_memory(entry.memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
            .map_err(VulkanError::Api)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        device.unmap_memory(entry.memory);
    }
    Ok(())
}

pub(super) fn destroy_buffer(device: &Device, entry: &BufferEntry) {
    unsafe {
        device.destroy_buffer(entry.buffer, None);
        device.free_memory(entry.memory, None);
    }
}

pub(super) fn create_image(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    desc: &ImageDesc,
) -> VulkanResult<ImageEntry> {
    let format = vk_format(desc.format);
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(image_usage(desc.usage))
        .samples(vk_samples(desc.samples))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type = match find_memory_type(
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        memory_properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    let memory = unsafe {
        match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(VulkanError::Api(e));
            }
        }
    };

    let view = unsafe {
        device
            .bind_image_memory(image, memory, 0)
            .and_then(|_| create_view(device, image, desc.format))
    };
    let view = match view {
        Ok(view) => view,
        Err(e) => {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }
    };

    Ok(ImageEntry {
        image,
        memory: Some(memory),
        view,
        format: desc.format,
        extent: desc.extent,
        layout: vk::ImageLayout::UNDEFINED,
    })
}

/// Wrap an image someone else owns, such as a swapchain image
pub(super) fn borrow_image(device: &Device, image: vk::Image, format: Format, extent: Extent2D) -> VulkanResult<ImageEntry> {
    let view = unsafe { create_view(device, image, format).map_err(VulkanError::Api)? };
    Ok(ImageEntry {
        image,
        memory: None,
        view,
        format,
        extent,
        layout: vk::ImageLayout::UNDEFINED,
    })
}

unsafe fn create_view(device: &Device, image: vk::Image, format: Format) -> Result<vk::ImageView, vk::Result> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(vk_format(format))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_of(format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    device.create_image_view(&view_info, None)
}

pub(super) fn destroy_image(device: &Device, entry: &ImageEntry) {
    unsafe {
        device.destroy_image_view(entry.view, None);
        if let Some(memory) = entry.memory {
            device.destroy_image(entry.image, None);
            device.free_memory(memory, None);
        }
    }
}
