//! Materials and material templates
//!
//! A [`MaterialTemplate`] owns a graphics pipeline and fixes the size of
//! the parameter block. A [`Material`] is a template plus a GPU-resident
//! parameter buffer. Both are shared through `Arc`; the last owner to
//! drop hands the GPU objects to the release queue.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ShaderConfig;
use crate::foundation::color::Color;
use crate::render::device::{BufferDesc, BufferId, PipelineDesc, PipelineId, SampleCount};
use crate::render::engine::Engine;
use crate::render::release::{PendingRelease, ReleaseQueue};
use crate::render::renderer::DrawConstants;
use crate::render::target::RenderTarget;
use crate::render::{RenderError, RenderResult};

pub use crate::render::device::PolygonMode;

/// Parameters for building a [`MaterialTemplate`]
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTemplateInfo {
    /// Vertex and fragment shaders
    pub shaders: ShaderConfig,
    /// Size of the parameter block in bytes
    pub params_size: usize,
    /// Depth test and write
    pub enable_depth: bool,
    /// Alpha blending
    pub transparency: bool,
    /// Rasterizer fill mode
    pub polygon_mode: PolygonMode,
    /// Line width for wireframe
    pub line_width: f32,
    /// Sample count of the targets it draws into (None = engine preference)
    pub samples: Option<SampleCount>,
}

impl MaterialTemplateInfo {
    /// Opaque, depth-tested, filled template
    pub fn new(shaders: ShaderConfig, params_size: usize) -> Self {
        Self {
            shaders,
            params_size,
            enable_depth: true,
            transparency: false,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
            samples: None,
        }
    }
}

/// Pipeline plus the descriptors used for compatibility checks
#[derive(Debug)]
pub struct MaterialTemplate {
    release: Arc<ReleaseQueue>,
    pipeline: PipelineId,
    params_size: usize,
    has_depth: bool,
    transparency: bool,
    samples: SampleCount,
}

impl MaterialTemplate {
    /// Build a template
    pub fn new(engine: &Engine, info: &MaterialTemplateInfo) -> RenderResult<Arc<Self>> {
        Self::create(engine.release_queue(), engine.preferred_samples(), info)
    }

    pub(crate) fn create(
        release: &Arc<ReleaseQueue>,
        default_samples: SampleCount,
        info: &MaterialTemplateInfo,
    ) -> RenderResult<Arc<Self>> {
        let samples = info.samples.unwrap_or(default_samples);
        let pipeline = release.device().create_pipeline(&PipelineDesc {
            vertex_shader: PathBuf::from(&info.shaders.vertex_shader_path),
            fragment_shader: PathBuf::from(&info.shaders.fragment_shader_path),
            depth_test: info.enable_depth,
            transparency: info.transparency,
            polygon_mode: info.polygon_mode,
            line_width: info.line_width,
            samples,
            color_format: crate::render::device::Format::Rgba16Float,
            depth_format: info.enable_depth.then_some(RenderTarget::DEPTH_FORMAT),
            push_constant_size: std::mem::size_of::<DrawConstants>() as u32,
        })?;

        log::debug!(
            "Created material template ({} + {}, {} param bytes)",
            info.shaders.vertex_shader_path,
            info.shaders.fragment_shader_path,
            info.params_size
        );

        Ok(Arc::new(Self {
            release: release.clone(),
            pipeline,
            params_size: info.params_size,
            has_depth: info.enable_depth,
            transparency: info.transparency,
            samples,
        }))
    }

    /// Pipeline bound for every draw using this template
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Size of the parameter block
    pub fn params_size(&self) -> usize {
        self.params_size
    }

    /// Whether the pipeline depth-tests
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }

    /// Whether the pipeline blends
    pub fn is_transparent(&self) -> bool {
        self.transparency
    }

    /// Sample count the pipeline was built for
    pub fn samples(&self) -> SampleCount {
        self.samples
    }

    /// Describe why this template cannot draw into `target`, if it can't
    pub fn incompatibility(&self, target: &RenderTarget) -> Option<String> {
        if self.samples != target.samples() {
            return Some(format!(
                "sample count {} vs target {}",
                self.samples.count(),
                target.samples().count()
            ));
        }
        if self.has_depth != target.has_depth() {
            return Some(format!("depth test {} vs target depth {}", self.has_depth, target.has_depth()));
        }
        None
    }
}

impl Drop for MaterialTemplate {
    fn drop(&mut self) {
        self.release.defer(PendingRelease::Pipeline(self.pipeline));
    }
}

/// Combined description that builds a private template
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInfo {
    /// Vertex and fragment shaders
    pub shaders: ShaderConfig,
    /// Initial parameter block; its length fixes the template's size
    pub params: Vec<u8>,
    /// Depth test and write
    pub enable_depth: bool,
    /// Alpha blending
    pub transparency: bool,
    /// Rasterizer fill mode
    pub polygon_mode: PolygonMode,
    /// Line width for wireframe
    pub line_width: f32,
}

impl MaterialInfo {
    /// Opaque material with the given parameter bytes
    pub fn new(shaders: ShaderConfig, params: Vec<u8>) -> Self {
        Self {
            shaders,
            params,
            enable_depth: true,
            transparency: false,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
        }
    }
}

/// Template plus a GPU parameter buffer
#[derive(Debug)]
pub struct Material {
    release: Arc<ReleaseQueue>,
    template: Arc<MaterialTemplate>,
    params: Option<BufferId>,
    params_address: u64,
}

impl Material {
    /// Instantiate a shared template
    ///
    /// `params` must be empty (zero-filled block) or exactly the template's size.
    pub fn new(template: Arc<MaterialTemplate>, params: &[u8]) -> RenderResult<Arc<Self>> {
        let size = template.params_size();
        if !params.is_empty() && params.len() != size {
            return Err(RenderError::ParamsSizeMismatch {
                expected: size,
                actual: params.len(),
            });
        }

        let release = template.release.clone();
        let device = release.device().clone();

        let (buffer, address) = if size == 0 {
            (None, 0)
        } else {
            let zeroed;
            let initial = if params.is_empty() {
                zeroed = vec![0u8; size];
                &zeroed[..]
            } else {
                params
            };
            let buffer = device.create_buffer(&BufferDesc::uniform(size as u64, "material params"), Some(initial))?;
            match device.buffer_address(buffer) {
                Ok(address) => (Some(buffer), address),
                Err(error) => {
                    release.defer(PendingRelease::Buffer(buffer));
                    return Err(error.into());
                }
            }
        };

        Ok(Arc::new(Self {
            release,
            template,
            params: buffer,
            params_address: address,
        }))
    }

    /// Build a material with its own template
    pub fn from_info(engine: &Engine, info: &MaterialInfo) -> RenderResult<Arc<Self>> {
        let template = MaterialTemplate::new(
            engine,
            &MaterialTemplateInfo {
                shaders: info.shaders.clone(),
                params_size: info.params.len(),
                enable_depth: info.enable_depth,
                transparency: info.transparency,
                polygon_mode: info.polygon_mode,
                line_width: info.line_width,
                samples: None,
            },
        )?;
        Self::new(template, &info.params)
    }

    /// Flat color material using the engine's default shaders
    pub fn color(engine: &Engine, color: Color) -> RenderResult<Arc<Self>> {
        Self::color_with(engine.release_queue(), engine.preferred_samples(), &engine.config().default_shaders, color)
    }

    pub(crate) fn color_with(
        release: &Arc<ReleaseQueue>,
        samples: SampleCount,
        shaders: &ShaderConfig,
        color: Color,
    ) -> RenderResult<Arc<Self>> {
        let template = MaterialTemplate::create(
            release,
            samples,
            &MaterialTemplateInfo::new(shaders.clone(), std::mem::size_of::<Color>()),
        )?;
        Self::new(template, bytemuck::bytes_of(&color))
    }

    /// Rewrite the parameter block
    pub fn update_params(&self, params: &[u8]) -> RenderResult<()> {
        let expected = self.template.params_size();
        if params.len() != expected {
            return Err(RenderError::ParamsSizeMismatch {
                expected,
                actual: params.len(),
            });
        }
        if let Some(buffer) = self.params {
            self.release.device().write_buffer(buffer, 0, params)?;
        }
        Ok(())
    }

    /// Template this material instantiates
    pub fn template(&self) -> &Arc<MaterialTemplate> {
        &self.template
    }

    /// Parameter buffer, `None` when the block is empty
    pub fn params_buffer(&self) -> Option<BufferId> {
        self.params
    }

    /// Device address of the parameter buffer, 0 when there is none
    pub fn params_address(&self) -> u64 {
        self.params_address
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        if let Some(buffer) = self.params {
            self.release.defer(PendingRelease::Buffer(buffer));
        }
    }
}
