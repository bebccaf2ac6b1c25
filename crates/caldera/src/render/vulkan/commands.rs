//! Command pool and [`RenderCommand`] translation
//!
//! Each submission gets a primary command buffer paired with an internal
//! fence. The pair returns to the free list once that fence signals, so
//! command buffers are recycled whether or not the caller passed a fence.

use ash::{vk, Device};

use super::pipeline::PUSH_CONSTANT_STAGES;
use super::resources::{ImageEntry, Resources};
use super::{VulkanError, VulkanResult};
use crate::render::commands::{
    ColorAttachment, DepthAttachment, Extent2D, ImageLayout, LoadOp, Rect2D, RenderCommand, StoreOp,
};
use crate::render::device::BufferId;

/// `vkCmdUpdateBuffer` writes at most this many bytes per call
const MAX_INLINE_UPDATE: usize = 65536;

type Slot = (vk::CommandBuffer, vk::Fence);

/// Command pool wrapper with RAII cleanup
pub(super) struct CommandPool {
    device: Device,
    pool: vk::CommandPool,
    free: Vec<Slot>,
    in_flight: Vec<Slot>,
}

impl CommandPool {
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe { device.create_command_pool(&pool_create_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device,
            pool,
            free: Vec::new(),
            in_flight: Vec::new(),
        })
    }

    /// A command buffer in the initial state and its unsignaled fence
    pub fn acquire(&mut self) -> VulkanResult<Slot> {
        self.reclaim()?;
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? };
        let buffer = buffers
            .first()
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("command buffer allocation returned nothing".to_string()))?;

        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::builder(), None)
                .map_err(VulkanError::Api)
        };
        match fence {
            Ok(fence) => Ok((buffer, fence)),
            Err(e) => {
                unsafe { self.device.free_command_buffers(self.pool, &[buffer]) };
                Err(e)
            }
        }
    }

    /// Track a submitted slot until its fence signals
    pub fn retire(&mut self, slot: Slot) {
        self.in_flight.push(slot);
    }

    /// Return a slot that was never submitted
    pub fn release(&mut self, slot: Slot) {
        self.free.push(slot);
    }

    /// Move every completed slot back to the free list
    pub fn reclaim(&mut self) -> VulkanResult<()> {
        let mut index = 0;
        while index < self.in_flight.len() {
            let (_, fence) = self.in_flight[index];
            let done = unsafe { self.device.get_fence_status(fence).map_err(VulkanError::Api)? };
            if done {
                unsafe { self.device.reset_fences(&[fence]).map_err(VulkanError::Api)? };
                let slot = self.in_flight.swap_remove(index);
                self.free.push(slot);
            } else {
                index += 1;
            }
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for (_, fence) in self.free.drain(..).chain(self.in_flight.drain(..)) {
                self.device.destroy_fence(fence, None);
            }
            // Frees every command buffer allocated from the pool
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

fn vk_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn vk_rect(rect: Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x, y: rect.y },
        extent: vk::Extent2D {
            width: rect.extent.width,
            height: rect.extent.height,
        },
    }
}

fn full_barrier() -> vk::MemoryBarrier2 {
    vk::MemoryBarrier2::builder()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .build()
}

/// Orders earlier reads and writes of any buffer before an inline update
fn pre_update_barrier() -> vk::MemoryBarrier2 {
    vk::MemoryBarrier2::builder()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .build()
}

/// Translates recorded commands into one Vulkan command buffer
///
/// Image layouts are tracked on the [`ImageEntry`]s as commands are
/// recorded; submissions execute in recording order on the single queue, so
/// the tracked layout is the one the image has when the barrier runs.
pub(super) struct Translator<'a> {
    device: &'a Device,
    cb: vk::CommandBuffer,
    resources: &'a mut Resources,
}

impl<'a> Translator<'a> {
    pub fn new(device: &'a Device, cb: vk::CommandBuffer, resources: &'a mut Resources) -> Self {
        Self { device, cb, resources }
    }

    pub fn record(&mut self, commands: &[RenderCommand]) -> VulkanResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.cb, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        for command in commands {
            self.translate(command)?;
        }

        unsafe { self.device.end_command_buffer(self.cb).map_err(VulkanError::Api) }
    }

    fn translate(&mut self, command: &RenderCommand) -> VulkanResult<()> {
        let device = self.device;
        let cb = self.cb;
        match command {
            RenderCommand::BeginRendering { color, depth, extent } => self.begin_rendering(color, depth.as_ref(), *extent)?,
            RenderCommand::EndRendering => unsafe { device.cmd_end_rendering(cb) },
            RenderCommand::BindPipeline(id) => {
                let pipeline = self.resources.pipeline(*id)?.pipeline;
                unsafe { device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline) };
            }
            RenderCommand::SetViewport(viewport) => {
                let viewports = [vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }];
                unsafe { device.cmd_set_viewport(cb, 0, &viewports) };
            }
            RenderCommand::SetScissor(rect) => unsafe { device.cmd_set_scissor(cb, 0, &[vk_rect(*rect)]) },
            RenderCommand::BindIndexBuffer(id) => {
                let buffer = self.resources.buffer(*id)?.buffer;
                unsafe { device.cmd_bind_index_buffer(cb, buffer, 0, vk::IndexType::UINT32) };
            }
            RenderCommand::PushConstants { pipeline, data } => {
                let layout = self.resources.pipeline(*pipeline)?.layout;
                unsafe { device.cmd_push_constants(cb, layout, PUSH_CONSTANT_STAGES, 0, data) };
            }
            RenderCommand::DrawIndexed { index_count } => unsafe {
                device.cmd_draw_indexed(cb, *index_count, 1, 0, 0, 0);
            },
            RenderCommand::UpdateBuffer { buffer, offset, data } => self.update_buffer(*buffer, *offset, data)?,
            RenderCommand::ClearRect { color, rect } => {
                let attachments = [vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: 0,
                    clear_value: vk::ClearValue {
                        color: vk::ClearColorValue { float32: color.to_array() },
                    },
                }];
                let rects = [vk::ClearRect {
                    rect: vk_rect(*rect),
                    base_array_layer: 0,
                    layer_count: 1,
                }];
                unsafe { device.cmd_clear_attachments(cb, &attachments, &rects) };
            }
            RenderCommand::TransitionImage { image, layout } => {
                let entry = self.resources.image_mut(*image)?;
                transition(device, cb, entry, vk_layout(*layout));
            }
            RenderCommand::ResolveImage { src, dst } => {
                let src = self.resources.image(*src)?;
                let dst = self.resources.image(*dst)?;
                let region = vk::ImageResolve {
                    src_subresource: src.subresource_layers(),
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: dst.subresource_layers(),
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D {
                        width: src.extent.width.min(dst.extent.width),
                        height: src.extent.height.min(dst.extent.height),
                        depth: 1,
                    },
                };
                unsafe {
                    device.cmd_resolve_image(cb, src.image, src.layout, dst.image, dst.layout, &[region]);
                }
            }
            RenderCommand::BlitImage { src, dst } => {
                let src = self.resources.image(*src)?;
                let dst = self.resources.image(*dst)?;
                let corner = |entry: &ImageEntry| vk::Offset3D {
                    x: entry.extent.width as i32,
                    y: entry.extent.height as i32,
                    z: 1,
                };
                let region = vk::ImageBlit {
                    src_subresource: src.subresource_layers(),
                    src_offsets: [vk::Offset3D::default(), corner(src)],
                    dst_subresource: dst.subresource_layers(),
                    dst_offsets: [vk::Offset3D::default(), corner(dst)],
                };
                unsafe {
                    device.cmd_blit_image(
                        cb,
                        src.image,
                        src.layout,
                        dst.image,
                        dst.layout,
                        &[region],
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
        Ok(())
    }

    fn begin_rendering(
        &mut self,
        color: &ColorAttachment,
        depth: Option<&DepthAttachment>,
        extent: Extent2D,
    ) -> VulkanResult<()> {
        let (device, cb) = (self.device, self.cb);

        let color_entry = self.resources.image_mut(color.image)?;
        transition(device, cb, color_entry, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let color_info = vk::RenderingAttachmentInfo::builder()
            .image_view(color_entry.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op(color.load))
            .store_op(store_op(color.store))
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.clear_color.to_array(),
                },
            })
            .build();

        let depth_info = match depth {
            Some(depth) => {
                let depth_entry = self.resources.image_mut(depth.image)?;
                transition(device, cb, depth_entry, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
                Some(
                    vk::RenderingAttachmentInfo::builder()
                        .image_view(depth_entry.view)
                        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                        .load_op(load_op(depth.load))
                        .store_op(store_op(depth.store))
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: depth.clear_depth,
                                stencil: 0,
                            },
                        })
                        .build(),
                )
            }
            None => None,
        };

        let color_attachments = [color_info];
        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk_rect(Rect2D::full(extent)))
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_info) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }

        unsafe { device.cmd_begin_rendering(cb, &rendering_info) };
        Ok(())
    }

    fn update_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> VulkanResult<()> {
        let entry = self.resources.buffer(id)?;
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("inline update of {} bytes at {offset} is not 4-byte aligned", data.len()),
            });
        }
        if offset + data.len() as u64 > entry.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("inline update of {} bytes at {offset} exceeds buffer size {}", data.len(), entry.size),
            });
        }

        let barriers = [pre_update_barrier()];
        let dependency = vk::DependencyInfo::builder().memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cb, &dependency) };

        for (index, chunk) in data.chunks(MAX_INLINE_UPDATE).enumerate() {
            let chunk_offset = offset + (index * MAX_INLINE_UPDATE) as u64;
            unsafe { self.device.cmd_update_buffer(self.cb, entry.buffer, chunk_offset, chunk) };
        }

        let barriers = [full_barrier()];
        let dependency = vk::DependencyInfo::builder().memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cb, &dependency) };
        Ok(())
    }
}

/// Barrier into `new_layout`, also ordering earlier writes to the image
fn transition(device: &Device, cb: vk::CommandBuffer, entry: &mut ImageEntry, new_layout: vk::ImageLayout) {
    let barriers = [vk::ImageMemoryBarrier2::builder()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(entry.layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(entry.image)
        .subresource_range(entry.subresource_range())
        .build()];
    let dependency = vk::DependencyInfo::builder().image_memory_barriers(&barriers);
    unsafe { device.cmd_pipeline_barrier2(cb, &dependency) };
    entry.layout = new_layout;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_fenced_against_earlier_shader_reads() {
        let before = pre_update_barrier();
        assert!(before.src_stage_mask.contains(vk::PipelineStageFlags2::ALL_COMMANDS));
        assert!(before.src_access_mask.contains(vk::AccessFlags2::MEMORY_READ));
        assert!(before.dst_access_mask.contains(vk::AccessFlags2::TRANSFER_WRITE));

        let after = full_barrier();
        assert!(after.src_access_mask.contains(vk::AccessFlags2::MEMORY_WRITE));
        assert!(after.dst_access_mask.contains(vk::AccessFlags2::MEMORY_READ));
    }
}
