use approx::assert_relative_eq;

use super::Fixture;
use crate::config::{EngineConfig, RendererConfig};
use crate::foundation::color::Color;
use crate::foundation::math::Mat4;
use crate::render::compositor::RenderSettings;
use crate::render::device::{DeviceError, RenderDevice, SampleCount};
use crate::render::frame::FrameState;
use crate::render::material::Material;
use crate::render::renderer::{CameraData, DrawConstants, Renderer};
use crate::render::target::{RenderTarget, RenderTargetInfo};
use crate::render::testing::{DeviceEvent, RecordingDevice};
use crate::render::{Engine, RenderCommand, RenderError};
use crate::scene::camera::{Camera, Viewport};
use crate::scene::transform::Transform;

fn draw_constants(commands: &[RenderCommand]) -> Vec<DrawConstants> {
    commands
        .iter()
        .filter_map(|command| match command {
            RenderCommand::PushConstants { data, .. } => Some(bytemuck::pod_read_unaligned(data)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_slots_alternate_and_each_end_waits_once_on_its_fence() {
    let fixture = Fixture::new();
    let mut renderer = fixture.renderer(RendererConfig::default());
    let settings = RenderSettings::clear();

    for expected in [0, 1, 0] {
        assert_eq!(renderer.current_frame(), expected);
        let fence = renderer.frame(expected).unwrap().fence();
        fixture.device.clear_events();

        renderer.begin_frame().unwrap();
        renderer
            .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
            .unwrap();
        renderer.end_frame().unwrap();

        assert_eq!(fixture.device.count(|e| *e == DeviceEvent::WaitFence(fence)), 1);
        assert_eq!(renderer.frame(expected).unwrap().state(), FrameState::Idle);
    }
    assert_eq!(renderer.current_frame(), 1);
}

#[test]
fn test_camera_buffer_outlives_fence_wait() {
    let fixture = Fixture::new();
    let mut renderer = fixture.renderer(RendererConfig::default());

    renderer.begin_frame().unwrap();
    renderer
        .render_scene(
            &fixture.scene,
            &fixture.target,
            fixture.camera,
            Viewport::FULL,
            &RenderSettings::clear(),
        )
        .unwrap();

    let slot = renderer.frame(0).unwrap();
    let fence = slot.fence();
    let [camera_buffer] = slot.transient_buffers() else {
        panic!("expected one camera buffer, found {:?}", slot.transient_buffers());
    };
    let camera_buffer = *camera_buffer;
    assert!(fixture.device.is_buffer_live(camera_buffer));

    renderer.end_frame().unwrap();

    let waited = fixture.device.position(|e| *e == DeviceEvent::WaitFence(fence)).unwrap();
    let destroyed = fixture
        .device
        .position(|e| *e == DeviceEvent::DestroyBuffer(camera_buffer))
        .unwrap();
    assert!(destroyed > waited);
    assert!(renderer.frame(0).unwrap().transient_buffers().is_empty());
}

#[test]
fn test_camera_data_uses_resolved_viewport_aspect() {
    let fixture = Fixture::new();
    let mut renderer = fixture.renderer(RendererConfig::default());

    renderer.begin_frame().unwrap();
    renderer
        .render_scene(
            &fixture.scene,
            &fixture.target,
            fixture.camera,
            Viewport::new(400.0, 0.0, 400.0, 0.0),
            &RenderSettings::clear(),
        )
        .unwrap();

    let camera_buffer = renderer.frame(0).unwrap().transient_buffers()[0];
    let data: CameraData = bytemuck::pod_read_unaligned(&fixture.device.buffer_data(camera_buffer).unwrap());

    let view = fixture.scene.view_matrix(fixture.camera).unwrap();
    let proj = Camera::default().projection_matrix(400.0 / 600.0);
    assert_relative_eq!(Mat4::from(data.proj), proj, epsilon = 1e-6);
    assert_relative_eq!(Mat4::from(data.view), view, epsilon = 1e-6);
    assert_relative_eq!(Mat4::from(data.view_proj), proj * view, epsilon = 1e-5);

    renderer.end_frame().unwrap();
}

#[test]
fn test_draws_follow_mesh_table_and_skip_empty_nodes() {
    let mut fixture = Fixture::new();
    let red = Material::color(&fixture.engine, Color::rgb(1.0, 0.0, 0.0)).unwrap();
    let root = fixture.scene.roots()[0];
    fixture
        .scene
        .add_mesh(root, "placeholder", None, Transform::default(), None)
        .unwrap();
    let moved = fixture
        .scene
        .add_mesh(
            root,
            "red cube",
            Some(fixture.engine.cube().clone()),
            Transform::from_position(crate::foundation::math::Vec3::new(2.0, 0.0, 0.0)),
            Some(red.clone()),
        )
        .unwrap();

    let mut renderer = fixture.renderer(RendererConfig::default());
    renderer.begin_frame().unwrap();
    renderer
        .render_scene(
            &fixture.scene,
            &fixture.target,
            fixture.camera,
            Viewport::FULL,
            &RenderSettings::clear(),
        )
        .unwrap();
    renderer.end_frame().unwrap();

    let submissions = fixture.graphics_submissions();
    let commands = submissions.last().unwrap();
    let pipelines: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            RenderCommand::BindPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .collect();
    assert_eq!(
        pipelines,
        vec![
            fixture.engine.default_material().template().pipeline(),
            red.template().pipeline(),
        ]
    );

    let constants = draw_constants(commands);
    assert_eq!(constants.len(), 2);
    assert_relative_eq!(
        Mat4::from(constants[0].world),
        fixture.scene.world_matrix(fixture.cube).unwrap()
    );
    assert_relative_eq!(Mat4::from(constants[1].world), fixture.scene.world_matrix(moved).unwrap());
    assert_eq!(constants[1].material, red.params_address());
    assert_eq!(
        constants[0].scene_data,
        fixture
            .device
            .buffer_address(renderer.frame(0).unwrap().scene_data())
            .unwrap()
    );
    assert_ne!(constants[0].camera_data, 0);
    assert_eq!(constants[0].camera_data, constants[1].camera_data);
}

#[test]
fn test_frame_operations_out_of_order_are_rejected() {
    let fixture = Fixture::new();
    let mut renderer = fixture.renderer(RendererConfig::default());
    let settings = RenderSettings::clear();

    let result = renderer.render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings);
    assert!(matches!(
        result,
        Err(RenderError::InvalidFrameState {
            expected: FrameState::Recording,
            actual: FrameState::Idle
        })
    ));
    assert!(matches!(renderer.end_frame(), Err(RenderError::InvalidFrameState { .. })));

    renderer.begin_frame().unwrap();
    assert!(matches!(
        renderer.begin_frame(),
        Err(RenderError::InvalidFrameState {
            expected: FrameState::Idle,
            actual: FrameState::Recording
        })
    ));
}

#[test]
fn test_fence_timeout_and_device_loss_are_distinct() {
    let fixture = Fixture::new();
    fixture.engine.cube().upload().unwrap();
    let mut renderer = fixture.renderer(RendererConfig::default().with_fence_timeout_ms(5));
    let settings = RenderSettings::clear();

    fixture.device.script_wait_error(DeviceError::Timeout);
    renderer.begin_frame().unwrap();
    renderer
        .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
        .unwrap();
    assert!(matches!(renderer.end_frame(), Err(RenderError::FenceTimeout { frame: 0 })));

    let fixture = Fixture::new();
    fixture.engine.cube().upload().unwrap();
    let mut renderer = fixture.renderer(RendererConfig::default());

    fixture.device.script_wait_error(DeviceError::DeviceLost);
    renderer.begin_frame().unwrap();
    renderer
        .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
        .unwrap();
    assert!(matches!(renderer.end_frame(), Err(RenderError::DeviceLost { frame: 0 })));
}

#[test]
fn test_failed_pass_leaves_frame_recordable() {
    let fixture = Fixture::new();
    let mut renderer = fixture.renderer(RendererConfig::default());
    let settings = RenderSettings::clear();
    assert!(fixture.engine.cube().is_dirty());

    renderer.begin_frame().unwrap();
    // The cube's pending upload waits on a fence and gets this error
    fixture.device.script_wait_error(DeviceError::DeviceLost);
    let result = renderer.render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings);
    assert!(matches!(result, Err(RenderError::Device(DeviceError::DeviceLost))));

    let slot = renderer.frame(0).unwrap();
    assert_eq!(slot.state(), FrameState::Recording);
    assert!(slot.recorder.commands().is_empty());
    assert!(slot.transient_buffers().is_empty());
    assert!(fixture.engine.cube().is_dirty());

    renderer
        .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
        .unwrap();
    renderer.end_frame().unwrap();
    assert!(!fixture.engine.cube().is_dirty());
    assert_eq!(renderer.current_frame(), 1);

    let submissions = fixture.graphics_submissions();
    let begins = submissions[0]
        .iter()
        .filter(|c| matches!(c, RenderCommand::BeginRendering { .. }))
        .count();
    let ends = submissions[0]
        .iter()
        .filter(|c| matches!(c, RenderCommand::EndRendering))
        .count();
    assert_eq!((begins, ends), (1, 1));

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
}

#[test]
fn test_slot_recovers_after_fence_timeout() {
    let fixture = Fixture::new();
    fixture.engine.cube().upload().unwrap();
    let mut renderer = fixture.renderer(RendererConfig::default().with_fence_timeout_ms(5));
    let settings = RenderSettings::clear();

    renderer.begin_frame().unwrap();
    renderer
        .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
        .unwrap();
    let camera_buffer = renderer.frame(0).unwrap().transient_buffers()[0];

    fixture.device.script_wait_error(DeviceError::Timeout);
    assert!(matches!(renderer.end_frame(), Err(RenderError::FenceTimeout { frame: 0 })));
    assert_eq!(renderer.frame(0).unwrap().state(), FrameState::Submitted);
    assert_eq!(renderer.current_frame(), 0);
    assert!(fixture.device.is_buffer_live(camera_buffer));

    let fence = renderer.frame(0).unwrap().fence();
    fixture.device.clear_events();
    renderer.begin_frame().unwrap();

    let waited = fixture.device.position(|e| *e == DeviceEvent::WaitFence(fence)).unwrap();
    let destroyed = fixture
        .device
        .position(|e| *e == DeviceEvent::DestroyBuffer(camera_buffer))
        .unwrap();
    let reset = fixture.device.position(|e| *e == DeviceEvent::ResetFence(fence)).unwrap();
    assert!(waited < destroyed && destroyed < reset);
    assert_eq!(renderer.frame(0).unwrap().state(), FrameState::Recording);

    renderer
        .render_scene(&fixture.scene, &fixture.target, fixture.camera, Viewport::FULL, &settings)
        .unwrap();
    renderer.end_frame().unwrap();
    assert_eq!(renderer.current_frame(), 1);
    assert_eq!(renderer.frame(0).unwrap().state(), FrameState::Idle);
}

#[test]
fn test_wait_failure_repeats_until_slot_completes() {
    let fixture = Fixture::new();
    fixture.engine.cube().upload().unwrap();
    let mut renderer = fixture.renderer(RendererConfig::default());

    renderer.begin_frame().unwrap();
    fixture.device.script_wait_error(DeviceError::DeviceLost);
    fixture.device.script_wait_error(DeviceError::DeviceLost);
    assert!(matches!(renderer.end_frame(), Err(RenderError::DeviceLost { frame: 0 })));
    assert!(matches!(renderer.begin_frame(), Err(RenderError::DeviceLost { frame: 0 })));
    assert_eq!(renderer.frame(0).unwrap().state(), FrameState::Submitted);

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
    assert_eq!(renderer.current_frame(), 1);
}

#[test]
fn test_incompatible_material_rejected_before_recording() {
    let device = std::sync::Arc::new(RecordingDevice::new().with_max_sample_count(SampleCount::X4));
    let engine = Engine::new(device, EngineConfig::default()).unwrap();
    let single_sampled = RenderTarget::new(engine.release_queue().clone(), RenderTargetInfo::new(64, 64)).unwrap();

    let mut scene = crate::scene::graph::Scene::new();
    let root = scene.create_root("root", Transform::default());
    scene
        .add_mesh(root, "cube", Some(engine.cube().clone()), Transform::default(), None)
        .unwrap();
    let camera = scene
        .add_camera(root, "camera", Camera::default(), Transform::default(), Viewport::FULL)
        .unwrap();

    let mut strict = Renderer::new(&engine, RendererConfig::default().with_compatibility_validation(true)).unwrap();
    strict.begin_frame().unwrap();
    let result = strict.render_scene(&scene, &single_sampled, camera, Viewport::FULL, &RenderSettings::clear());
    match result {
        Err(RenderError::IncompatibleMaterial { node, .. }) => assert_eq!(node, "cube"),
        other => panic!("expected an incompatible material error, got {other:?}"),
    }
    let slot = strict.frame(0).unwrap();
    assert!(slot.recorder.commands().is_empty());
    assert!(slot.transient_buffers().is_empty());

    let mut lenient = Renderer::new(&engine, RendererConfig::default().with_compatibility_validation(false)).unwrap();
    lenient.begin_frame().unwrap();
    lenient
        .render_scene(&scene, &single_sampled, camera, Viewport::FULL, &RenderSettings::clear())
        .unwrap();
    lenient.end_frame().unwrap();
}

#[test]
fn test_zero_frames_in_flight_is_invalid() {
    let fixture = Fixture::new();
    let result = Renderer::new(&fixture.engine, RendererConfig::default().with_frames_in_flight(0));
    assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
}

#[test]
fn test_dropping_renderer_frees_slot_resources() {
    let fixture = Fixture::new();
    let buffers_before = fixture.device.live_buffers();

    let renderer = fixture.renderer(RendererConfig::default().with_frames_in_flight(3));
    assert_eq!(renderer.frames_in_flight(), 3);
    assert_eq!(fixture.device.live_buffers(), buffers_before + 3);

    drop(renderer);
    assert_eq!(fixture.device.live_buffers(), buffers_before);
    assert!(fixture.device.count(|e| *e == DeviceEvent::WaitIdle) >= 1);
}
