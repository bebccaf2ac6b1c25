//! SPIR-V loading and dynamic-rendering graphics pipelines
//!
//! Pipelines take no vertex input. Shaders pull vertices, material
//! parameters, scene and camera data through the device addresses in the
//! per-draw push constant block.

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use ash::{vk, Device};

use super::resources::PipelineEntry;
use super::{vk_format, vk_samples, VulkanError, VulkanResult};
use crate::render::device::{PipelineDesc, PolygonMode};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Push constants are visible to both stages
pub(super) const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL_GRAPHICS;

/// Shader module destroyed on drop
struct ShaderModule<'a> {
    device: &'a Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn from_file(device: &'a Device, path: &Path) -> VulkanResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to open shader file {}: {e}", path.display()))
        })?;
        let code = ash::util::read_spv(&mut file).map_err(|e| {
            VulkanError::InitializationFailed(format!("Invalid SPIR-V in {}: {e}", path.display()))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.create_shader_module(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, module })
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

fn polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

pub(super) fn create_pipeline(device: &Device, desc: &PipelineDesc) -> VulkanResult<PipelineEntry> {
    let vertex = ShaderModule::from_file(device, &desc.vertex_shader)?;
    let fragment = ShaderModule::from_file(device, &desc.fragment_shader)?;
    let stages = [
        vertex.stage_info(vk::ShaderStageFlags::VERTEX),
        fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
    ];

    let push_constant_ranges = [vk::PushConstantRange {
        stage_flags: PUSH_CONSTANT_STAGES,
        offset: 0,
        size: desc.push_constant_size,
    }];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&push_constant_ranges);
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api)? };

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(polygon_mode(desc.polygon_mode))
        .line_width(desc.line_width)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE);
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk_samples(desc.samples))
        .sample_shading_enable(false);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend = if desc.transparency {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    } else {
        vk::PipelineColorBlendAttachmentState::builder().blend_enable(false)
    }
    .color_write_mask(vk::ColorComponentFlags::RGBA)
    .build();
    let attachments = [blend];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let color_formats = [vk_format(desc.color_format)];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(desc.depth_format.map_or(vk::Format::UNDEFINED, vk_format));

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipeline = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
    };
    match pipeline {
        Ok(pipelines) => Ok(PipelineEntry {
            pipeline: pipelines[0],
            layout,
        }),
        Err((_, e)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(VulkanError::Api(e))
        }
    }
}

pub(super) fn destroy_pipeline(device: &Device, entry: &PipelineEntry) {
    unsafe {
        device.destroy_pipeline(entry.pipeline, None);
        device.destroy_pipeline_layout(entry.layout, None);
    }
}
