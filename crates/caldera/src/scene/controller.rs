//! First-person camera controller
//!
//! Mouse-look turns the camera node; WASD moves it on the ground plane, or
//! along its full facing basis while flying.

use crate::foundation::math::{constants, Vec3};
use crate::render::window::{Key, Window, WindowSurface};
use crate::scene::graph::{NodeKey, Scene, SceneResult};

/// Input the controller reads each update
pub trait ControllerInput {
    /// Whether `key` is held
    fn is_key_pressed(&self, key: Key) -> bool;

    /// Horizontal cursor movement since the previous call
    fn mouse_delta_x(&mut self) -> f64;

    /// Vertical cursor movement since the previous call
    fn mouse_delta_y(&mut self) -> f64;
}

impl<S: WindowSurface> ControllerInput for Window<S> {
    fn is_key_pressed(&self, key: Key) -> bool {
        Window::is_key_pressed(self, key)
    }

    fn mouse_delta_x(&mut self) -> f64 {
        Window::mouse_delta_x(self)
    }

    fn mouse_delta_y(&mut self) -> f64 {
        Window::mouse_delta_y(self)
    }
}

/// Mouse-look and WASD movement for a camera node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstPersonController {
    /// Units per second
    pub speed: f32,
    /// Radians per pixel of cursor movement
    pub sensitivity: f32,
    /// Move along the pitched basis and allow vertical movement
    pub flying: bool,
}

impl Default for FirstPersonController {
    fn default() -> Self {
        Self {
            speed: 0.1,
            sensitivity: 0.001,
            flying: false,
        }
    }
}

impl FirstPersonController {
    /// Where the `0` key puts the camera
    pub const HOME: Vec3 = Vec3::new(0.0, 1.0, 0.0);

    /// Create a controller
    pub fn new(speed: f32, sensitivity: f32) -> Self {
        Self {
            speed,
            sensitivity,
            flying: false,
        }
    }

    /// Apply one frame of input to `camera`
    pub fn update(
        &mut self,
        scene: &mut Scene,
        camera: NodeKey,
        input: &mut impl ControllerInput,
        delta_time: f32,
    ) -> SceneResult<()> {
        let mut transform = *scene.node(camera)?.transform();

        transform.yaw += input.mouse_delta_x() as f32 * self.sensitivity;
        transform.pitch = (transform.pitch + input.mouse_delta_y() as f32 * self.sensitivity)
            .clamp(-constants::HALF_PI, constants::HALF_PI);

        if input.is_key_pressed(Key::Num0) {
            transform.position = Self::HOME;
        }
        if input.is_key_pressed(Key::F) {
            self.flying = true;
        }
        if input.is_key_pressed(Key::G) {
            self.flying = false;
        }

        let (forward, right, up) = if self.flying {
            (transform.forward(), transform.right(), transform.up())
        } else {
            let (sin_yaw, cos_yaw) = (-transform.yaw).sin_cos();
            (
                -Vec3::new(sin_yaw, 0.0, cos_yaw),
                Vec3::new(cos_yaw, 0.0, -sin_yaw),
                Vec3::zeros(),
            )
        };

        let step = self.speed * delta_time;
        let bindings = [
            (Key::W, forward),
            (Key::S, -forward),
            (Key::D, right),
            (Key::A, -right),
            (Key::Space, up),
            (Key::LeftShift, -up),
        ];
        for (key, direction) in bindings {
            if input.is_key_pressed(key) {
                transform.position += direction * step;
            }
        }

        scene.update_transform(camera, transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use approx::assert_relative_eq;

    use crate::scene::camera::{Camera, Viewport};
    use crate::scene::transform::Transform;

    #[derive(Default)]
    struct FakeInput {
        keys: HashSet<Key>,
        dx: f64,
        dy: f64,
    }

    impl ControllerInput for FakeInput {
        fn is_key_pressed(&self, key: Key) -> bool {
            self.keys.contains(&key)
        }

        fn mouse_delta_x(&mut self) -> f64 {
            std::mem::take(&mut self.dx)
        }

        fn mouse_delta_y(&mut self) -> f64 {
            std::mem::take(&mut self.dy)
        }
    }

    fn scene() -> (Scene, NodeKey) {
        let mut scene = Scene::new();
        let root = scene.create_root("root", Transform::default());
        let camera = scene
            .add_camera(root, "camera", Camera::default(), Transform::default(), Viewport::FULL)
            .unwrap();
        (scene, camera)
    }

    #[test]
    fn test_walking_stays_on_ground_plane() {
        let (mut scene, camera) = scene();
        let mut controller = FirstPersonController::new(2.0, 0.001);
        scene.rotate(camera, 0.0, 0.5, 0.0).unwrap();

        let mut input = FakeInput::default();
        input.keys.insert(Key::W);
        input.keys.insert(Key::Space);
        controller.update(&mut scene, camera, &mut input, 0.5).unwrap();

        let position = scene.node(camera).unwrap().transform().position;
        assert_relative_eq!(position, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_flying_follows_pitch() {
        let (mut scene, camera) = scene();
        let mut controller = FirstPersonController::new(1.0, 0.001);
        scene.rotate(camera, 0.0, 0.5, 0.0).unwrap();

        let mut input = FakeInput::default();
        input.keys.insert(Key::F);
        input.keys.insert(Key::W);
        controller.update(&mut scene, camera, &mut input, 1.0).unwrap();
        assert!(controller.flying);

        let transform = *scene.node(camera).unwrap().transform();
        assert_relative_eq!(transform.position, transform.forward(), epsilon = 1e-6);

        input.keys.clear();
        input.keys.insert(Key::G);
        controller.update(&mut scene, camera, &mut input, 1.0).unwrap();
        assert!(!controller.flying);
    }

    #[test]
    fn test_mouse_look_clamps_pitch() {
        let (mut scene, camera) = scene();
        let mut controller = FirstPersonController::new(1.0, 0.01);

        let mut input = FakeInput {
            dx: 50.0,
            dy: 1000.0,
            ..FakeInput::default()
        };
        controller.update(&mut scene, camera, &mut input, 0.0).unwrap();

        let transform = scene.node(camera).unwrap().transform();
        assert_relative_eq!(transform.yaw, 0.5, epsilon = 1e-6);
        assert_relative_eq!(transform.pitch, constants::HALF_PI);
    }

    #[test]
    fn test_zero_key_resets_position() {
        let (mut scene, camera) = scene();
        scene.update_position(camera, Vec3::new(5.0, 5.0, 5.0)).unwrap();

        let mut input = FakeInput::default();
        input.keys.insert(Key::Num0);
        FirstPersonController::default()
            .update(&mut scene, camera, &mut input, 0.0)
            .unwrap();

        assert_eq!(scene.node(camera).unwrap().transform().position, FirstPersonController::HOME);
    }
}
