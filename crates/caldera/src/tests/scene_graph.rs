use approx::assert_relative_eq;

use super::Fixture;
use crate::config::RendererConfig;
use crate::foundation::math::{Mat4, Vec3};
use crate::render::compositor::RenderSettings;
use crate::render::renderer::DrawConstants;
use crate::render::RenderCommand;
use crate::scene::camera::Viewport;
use crate::scene::graph::Scene;
use crate::scene::transform::Transform;

#[test]
fn test_world_matrix_is_product_along_ancestor_chain() {
    let mut scene = Scene::new();
    let a = Transform::from_position(Vec3::new(1.0, 0.0, 0.0)).with_rotation(0.3, 0.0, 0.0);
    let b = Transform::from_position(Vec3::new(0.0, 2.0, 0.0)).with_scale(2.0);
    let c = Transform::from_position(Vec3::new(0.0, 0.0, -3.0)).with_rotation(0.1, 0.2, 0.3);

    let root = scene.create_root("root", a);
    let middle = scene.add_mesh(root, "middle", None, b, None).unwrap();
    let leaf = scene.add_mesh(middle, "leaf", None, c, None).unwrap();

    assert_relative_eq!(
        scene.world_matrix(leaf).unwrap(),
        a.world_matrix() * b.world_matrix() * c.world_matrix(),
        epsilon = 1e-5
    );

    let moved = Transform::from_position(Vec3::new(-4.0, 1.0, 0.5)).with_rotation(1.0, 0.0, 0.0);
    scene.update_transform(root, moved).unwrap();
    assert_relative_eq!(
        scene.world_matrix(leaf).unwrap(),
        moved.world_matrix() * b.world_matrix() * c.world_matrix(),
        epsilon = 1e-5
    );
}

#[test]
fn test_translate_and_rotate_match_explicit_updates() {
    let build = || {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
        let node = scene
            .add_mesh(
                root,
                "node",
                None,
                Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).with_rotation(0.1, 0.2, 0.3),
                None,
            )
            .unwrap();
        let child = scene.add_mesh(node, "child", None, Transform::default().with_scale(0.5), None).unwrap();
        (scene, node, child)
    };

    let (mut incremental, node, child) = build();
    incremental.translate(node, Vec3::new(0.5, -1.0, 2.0)).unwrap();
    incremental.rotate(node, 0.4, -0.2, 0.7).unwrap();

    let (mut explicit, node_b, child_b) = build();
    let mut transform = *explicit.node(node_b).unwrap().transform();
    transform.position += Vec3::new(0.5, -1.0, 2.0);
    transform.yaw += 0.4;
    transform.pitch -= 0.2;
    transform.roll += 0.7;
    explicit.update_transform(node_b, transform).unwrap();

    assert_relative_eq!(
        incremental.world_matrix(node).unwrap(),
        explicit.world_matrix(node_b).unwrap(),
        epsilon = 1e-6
    );
    assert_relative_eq!(
        incremental.world_matrix(child).unwrap(),
        explicit.world_matrix(child_b).unwrap(),
        epsilon = 1e-6
    );
}

#[test]
fn test_duplicate_name_draws_only_latest_node() {
    let mut fixture = Fixture::new();
    let root = fixture.scene.roots()[0];
    let cube = Some(fixture.engine.cube().clone());

    let first = fixture
        .scene
        .add_mesh(root, "Brick", cube.clone(), Transform::from_position(Vec3::x()), None)
        .unwrap();
    let second = fixture
        .scene
        .add_mesh(root, "Brick", cube, Transform::from_position(Vec3::y()), None)
        .unwrap();

    assert_eq!(fixture.scene.get_mesh("Brick"), Some(second));
    assert!(fixture.scene.children(root).unwrap().contains(&first));
    assert!(fixture.scene.node(first).is_ok());

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
    let worlds: Vec<Mat4> = submissions
        .last()
        .unwrap()
        .iter()
        .filter_map(|command| match command {
            RenderCommand::PushConstants { data, .. } => {
                Some(Mat4::from(bytemuck::pod_read_unaligned::<DrawConstants>(data).world))
            }
            _ => None,
        })
        .collect();

    assert_eq!(worlds.len(), 2);
    assert_relative_eq!(worlds[0], fixture.scene.world_matrix(fixture.cube).unwrap());
    assert_relative_eq!(worlds[1], fixture.scene.world_matrix(second).unwrap());
}

#[test]
fn test_camera_at_unit_z_sees_origin_ahead() {
    let fixture = Fixture::new();
    let view = fixture.scene.view_matrix(fixture.camera).unwrap();
    let origin = view * crate::foundation::math::Vec4::new(0.0, 0.0, 0.0, 1.0);
    assert_relative_eq!(origin.xyz(), Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
}
