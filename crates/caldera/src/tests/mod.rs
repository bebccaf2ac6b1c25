//! Cross-module scenarios driven through the in-memory device

mod frame_pipeline;
mod presentation;
mod scene_graph;

use std::sync::Arc;

use crate::config::{EngineConfig, RendererConfig};
use crate::foundation::logging;
use crate::foundation::math::Vec3;
use crate::render::commands::RenderCommand;
use crate::render::device::QueueKind;
use crate::render::engine::Engine;
use crate::render::renderer::Renderer;
use crate::render::target::{RenderTarget, RenderTargetInfo};
use crate::render::testing::RecordingDevice;
use crate::scene::camera::{Camera, Viewport};
use crate::scene::graph::{NodeKey, Scene};
use crate::scene::transform::Transform;

/// Device, engine, an 800x600 target and a scene holding one cube and one
/// camera at (0, 0, 1) looking down -Z
struct Fixture {
    scene: Scene,
    cube: NodeKey,
    camera: NodeKey,
    target: RenderTarget,
    engine: Engine,
    device: Arc<RecordingDevice>,
}

impl Fixture {
    fn new() -> Self {
        logging::init();

        let device = Arc::new(RecordingDevice::new());
        let engine = Engine::new(device.clone(), EngineConfig::new("scenario")).unwrap();
        let target = RenderTarget::new(
            engine.release_queue().clone(),
            RenderTargetInfo::new(800, 600).with_samples(engine.preferred_samples()),
        )
        .unwrap();

        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let cube = scene
            .add_mesh(root, "cube", Some(engine.cube().clone()), Transform::default(), None)
            .unwrap();
        let camera = scene
            .add_camera(
                root,
                "camera",
                Camera::default(),
                Transform::from_position(Vec3::new(0.0, 0.0, 1.0)),
                Viewport::FULL,
            )
            .unwrap();

        Self {
            scene,
            cube,
            camera,
            target,
            engine,
            device,
        }
    }

    fn renderer(&self, config: RendererConfig) -> Renderer {
        Renderer::new(&self.engine, config).unwrap()
    }

    /// Command lists the renderer handed to the graphics queue
    fn graphics_submissions(&self) -> Vec<Vec<RenderCommand>> {
        self.device.submissions(QueueKind::Graphics)
    }
}
