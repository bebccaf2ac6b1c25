use std::sync::Arc;

use crate::config::{EngineConfig, RendererConfig, WindowConfig};
use crate::foundation::math::Vec3;
use crate::render::commands::Extent2D;
use crate::render::compositor::RenderSettings;
use crate::render::device::{QueueKind, SampleCount};
use crate::render::engine::Engine;
use crate::render::renderer::Renderer;
use crate::render::testing::{DeviceEvent, RecordingDevice, ScriptedSurface};
use crate::render::window::{Key, Window};
use crate::scene::camera::{Camera, Viewport};
use crate::scene::controller::FirstPersonController;
use crate::scene::graph::Scene;
use crate::scene::transform::Transform;

#[test]
fn test_window_frame_submits_then_blits_then_presents() {
    let device = Arc::new(RecordingDevice::new().with_max_sample_count(SampleCount::X4));
    let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
    let surface = ScriptedSurface::new(device.clone(), Extent2D::new(640, 480), 3).unwrap();
    let mut window = Window::new(&engine, surface, &WindowConfig::new(640, 480, "scenario")).unwrap();

    let mut scene = Scene::new();
    let root = scene.create_root("root", Transform::default());
    scene
        .add_mesh(root, "cube", Some(engine.cube().clone()), Transform::default(), None)
        .unwrap();
    let camera = scene
        .add_camera(
            root,
            "camera",
            Camera::default(),
            Transform::from_position(Vec3::new(0.0, 0.0, 2.0)),
            Viewport::FULL,
        )
        .unwrap();

    let mut renderer = Renderer::new(&engine, RendererConfig::default()).unwrap();
    device.clear_events();

    renderer.begin_frame().unwrap();
    renderer
        .render_camera(&scene, window.target(), camera, &RenderSettings::clear())
        .unwrap();
    renderer.end_frame().unwrap();
    window.swap_buffers().unwrap();

    let frame_fence = renderer.frame(0).unwrap().fence();
    let submit_frame = device
        .position(|e| matches!(e, DeviceEvent::Submit { fence: Some(f), .. } if *f == frame_fence))
        .unwrap();
    let wait_frame = device.position(|e| *e == DeviceEvent::WaitFence(frame_fence)).unwrap();
    let acquire = device.position(|e| matches!(e, DeviceEvent::Acquire { .. })).unwrap();
    let present = device.position(|e| matches!(e, DeviceEvent::Present { .. })).unwrap();
    assert!(submit_frame < wait_frame);
    assert!(wait_frame < acquire);
    assert!(acquire < present);

    // Multisampled window: the blit reads the resolve image
    let blit = device.submissions(QueueKind::Graphics).pop().unwrap();
    assert!(blit.contains(&crate::render::RenderCommand::BlitImage {
        src: window.resolve_image().unwrap(),
        dst: window.surface().images()[0],
    }));
}

#[test]
fn test_controller_driven_by_window_input() {
    let device = Arc::new(RecordingDevice::new());
    let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
    let surface = ScriptedSurface::new(device.clone(), Extent2D::new(320, 240), 2).unwrap();
    let mut window = Window::new(&engine, surface, &WindowConfig::default()).unwrap();

    let mut scene = Scene::new();
    let root = scene.create_root("root", Transform::default());
    let camera = scene
        .add_camera(root, "camera", Camera::default(), Transform::default(), Viewport::FULL)
        .unwrap();

    let mut controller = FirstPersonController::new(1.0, 0.01);
    window.surface_mut().move_cursor(100.0, 0.0);
    window.surface_mut().press(Key::W);
    window.poll_events();
    controller.update(&mut scene, camera, &mut window, 1.0).unwrap();

    let transform = *scene.node(camera).unwrap().transform();
    assert!((transform.yaw - 1.0).abs() < 1e-6);
    assert!((transform.position.norm() - 1.0).abs() < 1e-6);
    assert_eq!(transform.position.y, 0.0);

    // Cursor did not move: no further turning
    controller.update(&mut scene, camera, &mut window, 0.0).unwrap();
    assert!((scene.node(camera).unwrap().transform().yaw - 1.0).abs() < 1e-6);
    assert_eq!(window.surface().poll_count(), 1);
}
