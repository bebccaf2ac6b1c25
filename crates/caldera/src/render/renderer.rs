//! Frames-in-flight renderer
//!
//! The renderer cycles through `frames_in_flight` slots. A frame is:
//!
//! ```text
//! begin_frame()                     reset slot fence, start recording
//! render_scene(..) one or more      record passes, allocate camera data
//! end_frame()                       submit, wait on the slot fence once,
//!                                   free camera data, advance the slot
//! ```
//!
//! The fence wait in `end_frame` is the only blocking point and bounds how
//! far the CPU can run ahead. Camera-data buffers allocated while recording
//! are destroyed only after that wait, so no submission can still read them.
//!
//! A pass that fails is dropped from the recorder and the frame stays
//! open. A frame whose `end_frame` wait failed stays `Submitted`; the next
//! `begin_frame` on that slot waits again before reusing it.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::config::RendererConfig;
use crate::foundation::color::Color;
use crate::foundation::math::{Mat4, Mat4Ext};
use crate::foundation::time::FrameTimer;
use crate::render::commands::CommandRecorder;
use crate::render::compositor::{record_resolve, PassPlan, RenderSettings};
use crate::render::device::{
    BufferDesc, BufferId, DeviceError, FenceId, PipelineId, QueueKind, RenderDevice, Submission,
};
use crate::render::engine::Engine;
use crate::render::frame::{FrameSlot, FrameState};
use crate::render::material::Material;
use crate::render::release::ReleaseQueue;
use crate::render::target::RenderTarget;
use crate::render::{RenderError, RenderResult};
use crate::scene::camera::Viewport;
use crate::scene::graph::{NodeKey, Scene, SceneError};
use crate::scene::light::GpuDirectionalLight;

/// Per-pass lighting block, rewritten in the slot's scene-data buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    /// Ambient light term
    pub ambient_color: Color,
    /// Directional light
    pub sun: GpuDirectionalLight,
}

/// Per-pass camera block, one transient buffer per `render_scene`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    /// `proj · view`
    pub view_proj: [[f32; 4]; 4],
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub proj: [[f32; 4]; 4],
}

impl CameraData {
    /// Pack view and projection matrices
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view_proj: (proj * view).to_cols_array(),
            view: view.to_cols_array(),
            proj: proj.to_cols_array(),
        }
    }
}

/// Per-draw push constant block (96 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawConstants {
    /// Node world matrix
    pub world: [[f32; 4]; 4],
    /// Vertex buffer address
    pub vertices: u64,
    /// Material parameter buffer address
    pub material: u64,
    /// Scene-data buffer address
    pub scene_data: u64,
    /// Camera-data buffer address
    pub camera_data: u64,
}

/// Frames-in-flight scene renderer
pub struct Renderer {
    release: Arc<ReleaseQueue>,
    default_material: Arc<Material>,
    config: RendererConfig,
    frames: Vec<FrameSlot>,
    current: usize,
    timer: FrameTimer,
    validate: bool,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("current", &self.current)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Create a renderer with `config.frames_in_flight` slots
    pub fn new(engine: &Engine, config: RendererConfig) -> RenderResult<Self> {
        config.validate()?;

        let release = engine.release_queue().clone();
        let device = release.device().clone();

        let mut frames = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            match FrameSlot::new(device.as_ref(), std::mem::size_of::<SceneData>() as u64) {
                Ok(slot) => frames.push(slot),
                Err(error) => {
                    for slot in &mut frames {
                        slot.destroy(device.as_ref());
                    }
                    return Err(error.into());
                }
            }
        }

        let validate = config.compatibility_validation_enabled();
        log::debug!(
            "Created renderer: {} frames in flight, compatibility checks {}",
            config.frames_in_flight,
            if validate { "on" } else { "off" }
        );

        Ok(Self {
            release,
            default_material: engine.default_material().clone(),
            config,
            frames,
            current: 0,
            timer: FrameTimer::new(),
            validate,
        })
    }

    /// Index of the slot the next frame records into
    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Inspect a slot
    pub fn frame(&self, index: usize) -> Option<&FrameSlot> {
        self.frames.get(index)
    }

    /// Frames completed during the last full second
    pub fn fps(&self) -> u32 {
        self.timer.fps()
    }

    /// Seconds between the last two completed frames
    pub fn frame_delta(&self) -> f32 {
        self.timer.delta_time()
    }

    /// Start recording into the current slot
    ///
    /// Blocks (with a warning) only if the slot's previous submission has
    /// not signaled yet. A slot left `Submitted` by a failed `end_frame`
    /// wait is waited on again and released first.
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        let index = self.current;
        let timeout = self.config.fence_timeout();
        let device = self.release.device().clone();
        let slot = &mut self.frames[index];

        match slot.state {
            FrameState::Idle => {
                if !device.fence_signaled(slot.fence)? {
                    log::warn!("Frame {index} is still in flight, waiting for it");
                    wait_for_frame(device.as_ref(), slot.fence, timeout, index)?;
                }
            }
            // The last end_frame failed its wait; finish it here.
            FrameState::Submitted => {
                log::warn!("Frame {index} was not waited on, retrying the wait");
                wait_for_frame(device.as_ref(), slot.fence, timeout, index)?;
                let released = slot.release_transient(device.as_ref())?;
                slot.state = FrameState::Idle;
                self.release.flush()?;
                log::debug!("Recovered frame {index}, released {released} camera buffers");
            }
            FrameState::Recording => {
                return Err(RenderError::InvalidFrameState {
                    expected: FrameState::Idle,
                    actual: slot.state,
                });
            }
        }

        device.reset_fence(slot.fence)?;
        slot.recorder.begin()?;
        slot.state = FrameState::Recording;

        log::trace!("Began frame {index}");
        Ok(())
    }

    /// Record one pass of `scene` seen from `camera` into `target`
    ///
    /// A zero `viewport` axis fills the target along that axis; the aspect
    /// ratio of the resolved viewport drives the projection.
    pub fn render_scene(
        &mut self,
        scene: &Scene,
        target: &RenderTarget,
        camera: NodeKey,
        viewport: Viewport,
        settings: &RenderSettings,
    ) -> RenderResult<()> {
        let index = self.current;
        let state = self.frames[index].state;
        if state != FrameState::Recording {
            return Err(RenderError::InvalidFrameState {
                expected: FrameState::Recording,
                actual: state,
            });
        }

        if self.validate {
            self.check_compatibility(scene, target)?;
        }

        let camera_node = scene.node(camera)?;
        let lens = camera_node
            .as_camera()
            .ok_or_else(|| SceneError::WrongNodeKind {
                name: camera_node.name().to_string(),
                expected: "camera",
            })?
            .camera;

        let plan = PassPlan::new(target, viewport, settings);
        let view = scene.view_matrix(camera)?;
        let proj = lens.projection_matrix(plan.viewport.aspect());
        let camera_data = CameraData::new(view, proj);

        // Pending mesh uploads run here, before anything is recorded.
        let draws = self.prepare_draws(scene)?;

        let device = self.release.device().clone();
        let slot = &mut self.frames[index];

        let camera_buffer = device.create_buffer(
            &BufferDesc::uniform(std::mem::size_of::<CameraData>() as u64, "camera data"),
            Some(bytemuck::bytes_of(&camera_data)),
        )?;
        slot.transient.push(camera_buffer);
        let camera_address = device.buffer_address(camera_buffer)?;

        let scene_data = SceneData {
            ambient_color: settings.ambient_color,
            sun: settings.sun.to_gpu(),
        };
        let buffers = PassBuffers {
            scene_data: slot.scene_data,
            scene_data_address: slot.scene_data_address,
            camera_address,
        };

        let mark = slot.recorder.commands().len();
        if let Err(error) = record_pass(&mut slot.recorder, target, &plan, settings, &scene_data, buffers, &draws) {
            slot.recorder.truncate(mark);
            log::warn!("Discarded partially recorded pass in frame {index}: {error}");
            return Err(error);
        }

        log::trace!(
            "Recorded pass into frame {index}: {} draws, viewport {:?}",
            draws.len(),
            plan.viewport
        );
        Ok(())
    }

    /// Record a pass using the camera node's own viewport
    pub fn render_camera(
        &mut self,
        scene: &Scene,
        target: &RenderTarget,
        camera: NodeKey,
        settings: &RenderSettings,
    ) -> RenderResult<()> {
        let node = scene.node(camera)?;
        let viewport = node
            .as_camera()
            .ok_or_else(|| SceneError::WrongNodeKind {
                name: node.name().to_string(),
                expected: "camera",
            })?
            .viewport;
        self.render_scene(scene, target, camera, viewport, settings)
    }

    /// Submit the current slot, wait for it, and move to the next slot
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let index = self.current;
        let timeout = self.config.fence_timeout();
        let device = self.release.device().clone();
        let slot = &mut self.frames[index];

        if slot.state != FrameState::Recording {
            return Err(RenderError::InvalidFrameState {
                expected: FrameState::Recording,
                actual: slot.state,
            });
        }

        slot.recorder.end()?;
        device.submit(&Submission {
            queue: QueueKind::Graphics,
            commands: slot.recorder.commands(),
            wait: &[],
            signal: &[],
            fence: Some(slot.fence),
        })?;
        slot.state = FrameState::Submitted;

        wait_for_frame(device.as_ref(), slot.fence, timeout, index)?;

        let released = slot.release_transient(device.as_ref())?;
        slot.state = FrameState::Idle;
        self.release.flush()?;

        self.current = (index + 1) % self.frames.len();
        self.timer.tick();

        log::trace!("Ended frame {index}, released {released} camera buffers");
        Ok(())
    }

    /// Resolve pipelines and mesh buffers for every drawable node, in table order
    fn prepare_draws(&self, scene: &Scene) -> RenderResult<Vec<Draw>> {
        let mut draws = Vec::new();
        for (_, node) in scene.meshes() {
            let Some(mesh_node) = node.as_mesh() else {
                continue;
            };
            let Some(mesh) = &mesh_node.mesh else {
                continue;
            };
            let material = mesh_node.material.as_ref().unwrap_or(&self.default_material);
            draws.push(Draw {
                pipeline: material.template().pipeline(),
                index_buffer: mesh.index_buffer()?,
                index_count: mesh.index_count(),
                world: node.world_matrix().to_cols_array(),
                vertices: mesh.vertex_address()?,
                material: material.params_address(),
            });
        }
        Ok(draws)
    }

    fn check_compatibility(&self, scene: &Scene, target: &RenderTarget) -> RenderResult<()> {
        for (_, node) in scene.meshes() {
            let Some(mesh_node) = node.as_mesh() else {
                continue;
            };
            let material = mesh_node.material.as_ref().unwrap_or(&self.default_material);
            if let Some(reason) = material.template().incompatibility(target) {
                return Err(RenderError::IncompatibleMaterial {
                    node: node.name().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let device = self.release.device().clone();
        if let Err(error) = device.wait_idle() {
            log::error!("wait_idle failed while dropping the renderer: {error}");
        }
        for slot in &mut self.frames {
            slot.destroy(device.as_ref());
        }
        if let Err(error) = self.release.flush() {
            log::error!("Failed to flush deferred releases: {error}");
        }
    }
}

/// One mesh node, ready to record
struct Draw {
    pipeline: PipelineId,
    index_buffer: BufferId,
    index_count: u32,
    world: [[f32; 4]; 4],
    vertices: u64,
    material: u64,
}

#[derive(Clone, Copy)]
struct PassBuffers {
    scene_data: BufferId,
    scene_data_address: u64,
    camera_address: u64,
}

fn record_pass(
    recorder: &mut CommandRecorder,
    target: &RenderTarget,
    plan: &PassPlan,
    settings: &RenderSettings,
    scene_data: &SceneData,
    buffers: PassBuffers,
    draws: &[Draw],
) -> RenderResult<()> {
    recorder.update_buffer(buffers.scene_data, scene_data)?;

    recorder.begin_rendering(plan.color, plan.depth, plan.extent)?;
    if let Some(rect) = plan.clear_rect {
        recorder.clear_rect(settings.clear_color, rect)?;
    }

    for draw in draws {
        recorder.bind_pipeline(draw.pipeline)?;
        recorder.set_viewport(plan.viewport)?;
        recorder.set_scissor(plan.scissor)?;
        recorder.bind_index_buffer(draw.index_buffer)?;
        recorder.push_constants(
            draw.pipeline,
            &DrawConstants {
                world: draw.world,
                vertices: draw.vertices,
                material: draw.material,
                scene_data: buffers.scene_data_address,
                camera_data: buffers.camera_address,
            },
        )?;
        recorder.draw_indexed(draw.index_count)?;
    }

    recorder.end_rendering()?;
    record_resolve(recorder, target)
}

fn wait_for_frame(
    device: &dyn RenderDevice,
    fence: FenceId,
    timeout: Option<std::time::Duration>,
    frame: usize,
) -> RenderResult<()> {
    device.wait_fence(fence, timeout).map_err(|error| match error {
        DeviceError::Timeout => RenderError::FenceTimeout { frame },
        DeviceError::DeviceLost => RenderError::DeviceLost { frame },
        other => RenderError::Device(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_block_sizes() {
        assert_eq!(std::mem::size_of::<SceneData>(), 48);
        assert_eq!(std::mem::size_of::<CameraData>(), 192);
        assert_eq!(std::mem::size_of::<DrawConstants>(), 96);
    }
}
