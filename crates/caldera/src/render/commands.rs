//! Backend-neutral command recording
//!
//! A [`CommandRecorder`] collects [`RenderCommand`]s on the CPU. The device
//! translates the list into native command buffers at submission time.

use bytemuck::Pod;

use crate::foundation::color::Color;
use crate::render::device::{BufferId, ImageId, PipelineId};
use crate::render::{RenderError, RenderResult};
use crate::scene::camera::Viewport;

/// Size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2D {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Size
    pub extent: Extent2D,
}

impl Rect2D {
    /// Rectangle covering `extent` from the origin
    pub const fn full(extent: Extent2D) -> Self {
        Self { x: 0, y: 0, extent }
    }
}

/// What happens to an attachment's contents when rendering begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    /// Keep what previous passes wrote
    Load,
    /// Fill with the clear value
    Clear,
    /// Contents are undefined
    DontCare,
}

/// What happens to an attachment's contents when rendering ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Keep the rendered contents
    Store,
    /// Contents may be discarded
    DontCare,
}

/// Image layouts the renderer transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined
    Undefined,
    /// Color attachment optimal
    ColorAttachment,
    /// Depth attachment optimal
    DepthAttachment,
    /// Source of a transfer
    TransferSrc,
    /// Destination of a transfer
    TransferDst,
    /// Ready for presentation
    PresentSrc,
}

/// Color attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    /// Image rendered into
    pub image: ImageId,
    /// Load behavior
    pub load: LoadOp,
    /// Store behavior
    pub store: StoreOp,
    /// Used when `load` is [`LoadOp::Clear`]
    pub clear_color: Color,
}

/// Depth attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    /// Image rendered into
    pub image: ImageId,
    /// Load behavior
    pub load: LoadOp,
    /// Store behavior
    pub store: StoreOp,
    /// Used when `load` is [`LoadOp::Clear`]
    pub clear_depth: f32,
}

/// A recorded GPU command
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    /// Start dynamic rendering into the attachments
    BeginRendering {
        /// Color output
        color: ColorAttachment,
        /// Optional depth buffer
        depth: Option<DepthAttachment>,
        /// Render area
        extent: Extent2D,
    },
    /// Finish the current rendering scope
    EndRendering,
    /// Bind a graphics pipeline
    BindPipeline(PipelineId),
    /// Set the dynamic viewport (depth range 0..1)
    SetViewport(Viewport),
    /// Set the dynamic scissor
    SetScissor(Rect2D),
    /// Bind a 32-bit index buffer
    BindIndexBuffer(BufferId),
    /// Upload the per-draw constant block
    PushConstants {
        /// Pipeline whose layout receives the constants
        pipeline: PipelineId,
        /// Raw bytes
        data: Vec<u8>,
    },
    /// Draw `index_count` indices of the bound index buffer
    DrawIndexed {
        /// Number of indices
        index_count: u32,
    },
    /// Inline buffer update ordered with the other commands
    UpdateBuffer {
        /// Destination
        buffer: BufferId,
        /// Byte offset
        offset: u64,
        /// New contents
        data: Vec<u8>,
    },
    /// Clear a rectangle of the color attachment inside a rendering scope
    ClearRect {
        /// Fill color
        color: Color,
        /// Region
        rect: Rect2D,
    },
    /// Transition an image to a new layout
    TransitionImage {
        /// Image
        image: ImageId,
        /// New layout
        layout: ImageLayout,
    },
    /// Resolve a multisampled image into a single-sample one
    ResolveImage {
        /// Multisampled source in `TransferSrc`
        src: ImageId,
        /// Destination in `TransferDst`
        dst: ImageId,
    },
    /// Scaled copy between images
    BlitImage {
        /// Source in `TransferSrc`
        src: ImageId,
        /// Destination in `TransferDst`
        dst: ImageId,
    },
}

/// Lifecycle of a [`CommandRecorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Nothing recorded
    Idle,
    /// Accepting commands
    Recording,
    /// Closed and ready for submission
    Executable,
}

/// CPU-side command list with a begin/end state machine
#[derive(Debug)]
pub struct CommandRecorder {
    state: RecorderState,
    commands: Vec<RenderCommand>,
    rendering: bool,
}

impl Default for CommandRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRecorder {
    /// Create an idle recorder
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            commands: Vec::new(),
            rendering: false,
        }
    }

    /// Current state
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Commands recorded since the last `begin`
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Discard everything and start recording
    ///
    /// Allowed from `Idle` and `Executable`; the previous list is dropped.
    pub fn begin(&mut self) -> RenderResult<()> {
        if self.state == RecorderState::Recording {
            return Err(RenderError::InvalidRecorderState {
                operation: "begin",
                state: self.state,
            });
        }
        self.commands.clear();
        self.rendering = false;
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Close the list for submission
    pub fn end(&mut self) -> RenderResult<()> {
        self.expect_recording("end")?;
        if self.rendering {
            return Err(RenderError::InvalidRecorderState {
                operation: "end inside a rendering scope",
                state: self.state,
            });
        }
        self.state = RecorderState::Executable;
        Ok(())
    }

    /// Drop all commands and return to `Idle`
    pub fn reset(&mut self) {
        self.commands.clear();
        self.rendering = false;
        self.state = RecorderState::Idle;
    }

    /// Drop every command recorded after the first `len`
    ///
    /// The rendering scope flag is recomputed from what remains.
    pub fn truncate(&mut self, len: usize) {
        self.commands.truncate(len);
        self.rendering = self
            .commands
            .iter()
            .rev()
            .find_map(|command| match command {
                RenderCommand::BeginRendering { .. } => Some(true),
                RenderCommand::EndRendering => Some(false),
                _ => None,
            })
            .unwrap_or(false);
    }

    /// Append a raw command
    pub fn record(&mut self, command: RenderCommand) -> RenderResult<()> {
        self.expect_recording("record")?;
        match &command {
            RenderCommand::BeginRendering { .. } if self.rendering => {
                return Err(RenderError::InvalidRecorderState {
                    operation: "nested begin_rendering",
                    state: self.state,
                });
            }
            RenderCommand::BeginRendering { .. } => self.rendering = true,
            RenderCommand::EndRendering if !self.rendering => {
                return Err(RenderError::InvalidRecorderState {
                    operation: "end_rendering without begin_rendering",
                    state: self.state,
                });
            }
            RenderCommand::EndRendering => self.rendering = false,
            _ => {}
        }
        self.commands.push(command);
        Ok(())
    }

    /// Start dynamic rendering
    pub fn begin_rendering(
        &mut self,
        color: ColorAttachment,
        depth: Option<DepthAttachment>,
        extent: Extent2D,
    ) -> RenderResult<()> {
        self.record(RenderCommand::BeginRendering { color, depth, extent })
    }

    /// Finish dynamic rendering
    pub fn end_rendering(&mut self) -> RenderResult<()> {
        self.record(RenderCommand::EndRendering)
    }

    /// Bind a pipeline
    pub fn bind_pipeline(&mut self, pipeline: PipelineId) -> RenderResult<()> {
        self.record(RenderCommand::BindPipeline(pipeline))
    }

    /// Set the viewport
    pub fn set_viewport(&mut self, viewport: Viewport) -> RenderResult<()> {
        self.record(RenderCommand::SetViewport(viewport))
    }

    /// Set the scissor
    pub fn set_scissor(&mut self, scissor: Rect2D) -> RenderResult<()> {
        self.record(RenderCommand::SetScissor(scissor))
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(&mut self, buffer: BufferId) -> RenderResult<()> {
        self.record(RenderCommand::BindIndexBuffer(buffer))
    }

    /// Push a constant block
    pub fn push_constants<T: Pod>(&mut self, pipeline: PipelineId, constants: &T) -> RenderResult<()> {
        self.record(RenderCommand::PushConstants {
            pipeline,
            data: bytemuck::bytes_of(constants).to_vec(),
        })
    }

    /// Indexed draw
    pub fn draw_indexed(&mut self, index_count: u32) -> RenderResult<()> {
        self.record(RenderCommand::DrawIndexed { index_count })
    }

    /// Inline buffer update with a POD value
    pub fn update_buffer<T: Pod>(&mut self, buffer: BufferId, value: &T) -> RenderResult<()> {
        self.update_buffer_bytes(buffer, 0, bytemuck::bytes_of(value))
    }

    /// Inline buffer update with raw bytes
    pub fn update_buffer_bytes(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.record(RenderCommand::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        })
    }

    /// Clear a rectangle of the current color attachment
    pub fn clear_rect(&mut self, color: Color, rect: Rect2D) -> RenderResult<()> {
        if !self.rendering {
            return Err(RenderError::InvalidRecorderState {
                operation: "clear_rect outside a rendering scope",
                state: self.state,
            });
        }
        self.record(RenderCommand::ClearRect { color, rect })
    }

    /// Transition an image layout
    pub fn transition_image(&mut self, image: ImageId, layout: ImageLayout) -> RenderResult<()> {
        self.record(RenderCommand::TransitionImage { image, layout })
    }

    /// Resolve a multisampled image
    pub fn resolve_image(&mut self, src: ImageId, dst: ImageId) -> RenderResult<()> {
        self.record(RenderCommand::ResolveImage { src, dst })
    }

    /// Blit between images
    pub fn blit_image(&mut self, src: ImageId, dst: ImageId) -> RenderResult<()> {
        self.record(RenderCommand::BlitImage { src, dst })
    }

    fn expect_recording(&self, operation: &'static str) -> RenderResult<()> {
        if self.state == RecorderState::Recording {
            Ok(())
        } else {
            Err(RenderError::InvalidRecorderState {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn image() -> ImageId {
        SlotMap::<ImageId, ()>::with_key().insert(())
    }

    fn color(image: ImageId) -> ColorAttachment {
        ColorAttachment {
            image,
            load: LoadOp::Clear,
            store: StoreOp::Store,
            clear_color: Color::DEFAULT_CLEAR,
        }
    }

    #[test]
    fn test_recorder_lifecycle() {
        let mut recorder = CommandRecorder::new();
        assert!(recorder.draw_indexed(3).is_err());

        recorder.begin().unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        assert!(recorder.begin().is_err());

        recorder.draw_indexed(3).unwrap();
        recorder.end().unwrap();
        assert_eq!(recorder.state(), RecorderState::Executable);
        assert_eq!(recorder.commands().len(), 1);

        recorder.begin().unwrap();
        assert!(recorder.commands().is_empty());
    }

    #[test]
    fn test_rendering_scope_must_be_balanced() {
        let mut recorder = CommandRecorder::new();
        recorder.begin().unwrap();

        assert!(recorder.end_rendering().is_err());
        recorder
            .begin_rendering(color(image()), None, Extent2D::new(4, 4))
            .unwrap();
        assert!(recorder
            .begin_rendering(color(image()), None, Extent2D::new(4, 4))
            .is_err());
        assert!(matches!(
            recorder.end(),
            Err(RenderError::InvalidRecorderState { .. })
        ));

        recorder.end_rendering().unwrap();
        recorder.end().unwrap();
    }

    #[test]
    fn test_truncate_closes_abandoned_rendering_scope() {
        let mut recorder = CommandRecorder::new();
        recorder.begin().unwrap();
        recorder.draw_indexed(3).unwrap();
        let mark = recorder.commands().len();

        recorder
            .begin_rendering(color(image()), None, Extent2D::new(4, 4))
            .unwrap();
        recorder.draw_indexed(6).unwrap();
        recorder.truncate(mark);

        assert_eq!(recorder.commands(), &[RenderCommand::DrawIndexed { index_count: 3 }]);
        assert!(recorder.end_rendering().is_err());
        recorder.end().unwrap();
    }

    #[test]
    fn test_clear_rect_requires_rendering_scope() {
        let mut recorder = CommandRecorder::new();
        recorder.begin().unwrap();
        let rect = Rect2D::full(Extent2D::new(8, 8));

        assert!(recorder.clear_rect(Color::BLACK, rect).is_err());
        recorder
            .begin_rendering(color(image()), None, rect.extent)
            .unwrap();
        recorder.clear_rect(Color::BLACK, rect).unwrap();
    }

    #[test]
    fn test_push_constants_store_pod_bytes() {
        let mut recorder = CommandRecorder::new();
        recorder.begin().unwrap();
        let pipeline = SlotMap::<PipelineId, ()>::with_key().insert(());

        recorder.push_constants(pipeline, &[1.0f32, 2.0]).unwrap();

        match &recorder.commands()[0] {
            RenderCommand::PushConstants { data, .. } => {
                assert_eq!(bytemuck::pod_collect_to_vec::<u8, f32>(data), vec![1.0, 2.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
