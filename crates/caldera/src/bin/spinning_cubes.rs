//! Three cubes, a first-person camera and a picture-in-picture view
//!
//! Run with `cargo run --features vulkan --bin spinning_cubes [engine.toml]`.
//! WASD moves, the mouse looks around, F/G toggle flying, 0 returns home,
//! P toggles the inset view, Escape quits.

use std::error::Error;

use caldera::foundation::logging;
use caldera::prelude::*;
use caldera::render::vulkan;

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let engine_config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::new("Spinning Cubes"),
    };
    let window_config = WindowConfig {
        capture_mouse: true,
        ..WindowConfig::new(1280, 720, "Caldera - Spinning Cubes")
    };

    let (device, surface) = vulkan::create(&engine_config, &window_config)?;
    let engine = Engine::new(device, engine_config)?;
    let mut window = Window::new(&engine, surface, &window_config)?;
    let mut renderer = Renderer::new(&engine, RendererConfig::default())?;

    let mut scene = Scene::new();
    let root = scene.create_root("root", Transform::default());
    let colors = [
        ("red", Color::rgb(0.9, 0.2, 0.2), -2.0),
        ("green", Color::rgb(0.2, 0.9, 0.3), 0.0),
        ("blue", Color::rgb(0.2, 0.4, 0.9), 2.0),
    ];
    let mut cubes = Vec::with_capacity(colors.len());
    for (name, color, x) in colors {
        let material = Material::color(&engine, color)?;
        let cube = scene.add_mesh(
            root,
            name,
            Some(engine.cube().clone()),
            Transform::from_position(Vec3::new(x, 0.0, -4.0)),
            Some(material),
        )?;
        cubes.push(cube);
    }

    let camera = scene.add_camera(
        root,
        "player",
        Camera::default(),
        Transform::from_position(FirstPersonController::HOME),
        Viewport::FULL,
    )?;
    let overhead = scene.add_camera(
        root,
        "overhead",
        Camera::default(),
        Transform::from_position(Vec3::new(0.0, 8.0, -4.0)).with_rotation(0.0, 1.5, 0.0),
        Viewport::new(960.0, 20.0, 300.0, 200.0),
    )?;

    let mut controller = FirstPersonController::new(3.0, 0.002);
    let inset = RenderSettings::load_previous()
        .with_clear_viewport()
        .with_clear_color(Color::BLACK);
    let mut show_inset = true;
    let mut last_fps = 0;

    while !window.should_close() {
        window.poll_events();
        if window.is_key_pressed(Key::Escape) {
            break;
        }
        if window.is_key_clicked(Key::P) {
            show_inset = !show_inset;
        }

        let dt = renderer.frame_delta();
        controller.update(&mut scene, camera, &mut window, dt)?;
        for (index, &cube) in cubes.iter().enumerate() {
            let speed = 0.5 + index as f32 * 0.4;
            scene.rotate(cube, speed * dt, speed * 0.5 * dt, 0.0)?;
        }

        renderer.begin_frame()?;
        renderer.render_scene(&scene, window.target(), camera, Viewport::FULL, &RenderSettings::clear())?;
        if show_inset {
            renderer.render_camera(&scene, window.target(), overhead, &inset)?;
        }
        renderer.end_frame()?;
        window.swap_buffers()?;

        if renderer.fps() != last_fps {
            last_fps = renderer.fps();
            log::info!("{last_fps} fps");
        }
    }

    Ok(())
}
