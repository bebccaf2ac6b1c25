//! Presentable windows
//!
//! A [`Window`] is a [`RenderTarget`] plus a [`WindowSurface`]. Scenes are
//! rendered into the target like any other; [`Window::swap_buffers`] then
//! blits the presentable image onto the next swapchain image and presents
//! it. Keyboard and mouse state are read through the surface.

use std::collections::HashMap;
use std::ops::Deref;

use crate::config::WindowConfig;
use crate::render::commands::{CommandRecorder, Extent2D, ImageLayout};
use crate::render::device::{DeviceResult, ImageId, QueueKind, SemaphoreId, Submission};
use crate::render::engine::Engine;
use crate::render::target::{RenderTarget, RenderTargetInfo};
use crate::render::RenderResult;

/// Keys the engine knows about
#[allow(missing_docs)]
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    Space,
    LeftShift,
    LeftControl,
    Escape,
    Enter,
    Tab,
    Up,
    Down,
    Left,
    Right,
}

/// Platform window with a swapchain
pub trait WindowSurface {
    /// Swapchain image size
    fn extent(&self) -> Extent2D;

    /// Acquire the next swapchain image; `signal` fires once it is usable
    fn acquire_next_image(&mut self, signal: SemaphoreId) -> DeviceResult<ImageId>;

    /// Present the last acquired image after `wait` has fired
    fn present(&mut self, wait: &[SemaphoreId]) -> DeviceResult<()>;

    /// Pump the platform event queue
    fn poll_events(&mut self);

    /// Whether the user asked to close the window
    fn should_close(&self) -> bool;

    /// Whether `key` is currently held
    fn is_key_pressed(&self, key: Key) -> bool;

    /// Cursor position in window coordinates
    fn cursor_position(&self) -> (f64, f64);
}

/// Render target that can be shown on screen
pub struct Window<S: WindowSurface> {
    target: RenderTarget,
    surface: S,
    blit: CommandRecorder,
    image_available: SemaphoreId,
    blit_finished: SemaphoreId,
    prev_keys: HashMap<Key, bool>,
    last_mouse_x: f64,
    last_mouse_y: f64,
}

impl<S: WindowSurface> Window<S> {
    /// Wrap `surface`; the target matches the surface size and uses the
    /// configured sample count, or the engine's preferred one
    pub fn new(engine: &Engine, surface: S, config: &WindowConfig) -> RenderResult<Self> {
        let extent = surface.extent();
        let samples = config.samples.unwrap_or_else(|| engine.preferred_samples());
        let target = RenderTarget::new(
            engine.release_queue().clone(),
            RenderTargetInfo::new(extent.width, extent.height)
                .with_samples(samples)
                .with_depth(true),
        )?;

        let device = engine.device();
        let image_available = device.create_semaphore()?;
        let blit_finished = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(error) => {
                device.destroy_semaphore(image_available)?;
                return Err(error.into());
            }
        };

        let (last_mouse_x, last_mouse_y) = surface.cursor_position();
        log::info!(
            "Created window '{}' ({}x{}, {} samples)",
            config.title,
            extent.width,
            extent.height,
            samples.count()
        );

        Ok(Self {
            target,
            surface,
            blit: CommandRecorder::new(),
            image_available,
            blit_finished,
            prev_keys: HashMap::new(),
            last_mouse_x,
            last_mouse_y,
        })
    }

    /// The offscreen target scenes are rendered into
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Platform surface
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Platform surface, mutably
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Copy the presentable image to the screen
    ///
    /// Call after the frame that rendered into this window has ended.
    pub fn swap_buffers(&mut self) -> RenderResult<()> {
        let device = self.target.release_queue().device().clone();
        let swap_image = self.surface.acquire_next_image(self.image_available)?;
        let source = self.target.presentable_image();

        self.blit.reset();
        self.blit.begin()?;
        self.blit.transition_image(source, ImageLayout::TransferSrc)?;
        self.blit.transition_image(swap_image, ImageLayout::TransferDst)?;
        self.blit.blit_image(source, swap_image)?;
        self.blit.transition_image(swap_image, ImageLayout::PresentSrc)?;
        self.blit.transition_image(source, RenderTarget::optimal_color_layout())?;
        self.blit.end()?;

        device.submit(&Submission {
            queue: QueueKind::Graphics,
            commands: self.blit.commands(),
            wait: &[self.image_available],
            signal: &[self.blit_finished],
            fence: None,
        })?;

        self.surface.present(&[self.blit_finished])?;
        Ok(())
    }

    /// Pump platform events
    pub fn poll_events(&mut self) {
        self.surface.poll_events();
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.surface.should_close()
    }

    /// Whether `key` is held
    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.surface.is_key_pressed(key)
    }

    /// True on the first query after `key` goes down
    pub fn is_key_clicked(&mut self, key: Key) -> bool {
        let pressed = self.surface.is_key_pressed(key);
        let was_pressed = self.prev_keys.insert(key, pressed).unwrap_or(false);
        pressed && !was_pressed
    }

    /// Horizontal cursor movement since the previous call
    pub fn mouse_delta_x(&mut self) -> f64 {
        let (x, _) = self.surface.cursor_position();
        let delta = x - self.last_mouse_x;
        self.last_mouse_x = x;
        delta
    }

    /// Vertical cursor movement since the previous call
    pub fn mouse_delta_y(&mut self) -> f64 {
        let (_, y) = self.surface.cursor_position();
        let delta = y - self.last_mouse_y;
        self.last_mouse_y = y;
        delta
    }
}

impl<S: WindowSurface> Deref for Window<S> {
    type Target = RenderTarget;

    fn deref(&self) -> &RenderTarget {
        &self.target
    }
}

impl<S: WindowSurface> Drop for Window<S> {
    fn drop(&mut self) {
        let device = self.target.release_queue().device().clone();
        if let Err(error) = device.wait_idle() {
            log::error!("wait_idle failed while dropping a window: {error}");
        }
        for semaphore in [self.image_available, self.blit_finished] {
            if let Err(error) = device.destroy_semaphore(semaphore) {
                log::error!("Failed to destroy window semaphore: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::render::device::SampleCount;
    use crate::render::testing::{DeviceEvent, RecordingDevice, ScriptedSurface};
    use crate::render::RenderCommand;

    fn window(device: &Arc<RecordingDevice>, engine: &Engine) -> Window<ScriptedSurface> {
        let surface = ScriptedSurface::new(device.clone(), Extent2D::new(320, 240), 2).unwrap();
        Window::new(engine, surface, &WindowConfig::default()).unwrap()
    }

    #[test]
    fn test_target_follows_surface_and_preferred_samples() {
        let device = Arc::new(RecordingDevice::new().with_max_sample_count(SampleCount::X4));
        let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        let window = window(&device, &engine);

        assert_eq!(window.extent(), Extent2D::new(320, 240));
        assert_eq!(window.samples(), SampleCount::X4);
        assert!(window.has_depth());
        assert!(window.resolve_image().is_some());
    }

    #[test]
    fn test_swap_buffers_blits_and_presents() {
        let device = Arc::new(RecordingDevice::new());
        let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        let mut window = window(&device, &engine);
        let swap_image = window.surface().images()[0];
        let source = window.presentable_image();
        device.clear_events();

        window.swap_buffers().unwrap();

        let events: Vec<_> = device.events().into_iter().map(|e| e.event).collect();
        let [DeviceEvent::Acquire { image, signal }, DeviceEvent::Submit { commands, wait, signal: blit_signal, fence, .. }, DeviceEvent::Present { wait: present_wait }] =
            events.as_slice()
        else {
            panic!("unexpected events: {events:?}");
        };

        assert_eq!(*image, swap_image);
        assert_eq!(wait, &vec![*signal]);
        assert_eq!(present_wait, blit_signal);
        assert_eq!(*fence, None);
        assert_eq!(
            commands,
            &vec![
                RenderCommand::TransitionImage { image: source, layout: ImageLayout::TransferSrc },
                RenderCommand::TransitionImage { image: swap_image, layout: ImageLayout::TransferDst },
                RenderCommand::BlitImage { src: source, dst: swap_image },
                RenderCommand::TransitionImage { image: swap_image, layout: ImageLayout::PresentSrc },
                RenderCommand::TransitionImage { image: source, layout: ImageLayout::ColorAttachment },
            ]
        );
    }

    #[test]
    fn test_key_click_is_edge_triggered() {
        let device = Arc::new(RecordingDevice::new());
        let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        let mut window = window(&device, &engine);

        assert!(!window.is_key_clicked(Key::F));
        window.surface_mut().press(Key::F);
        assert!(window.is_key_clicked(Key::F));
        assert!(!window.is_key_clicked(Key::F));
        assert!(window.is_key_pressed(Key::F));

        window.surface_mut().release(Key::F);
        assert!(!window.is_key_clicked(Key::F));
        window.surface_mut().press(Key::F);
        assert!(window.is_key_clicked(Key::F));
    }

    #[test]
    fn test_mouse_deltas_are_independent() {
        let device = Arc::new(RecordingDevice::new());
        let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        let mut window = window(&device, &engine);

        window.surface_mut().move_cursor(10.0, 4.0);
        assert_eq!(window.mouse_delta_x(), 10.0);
        assert_eq!(window.mouse_delta_x(), 0.0);

        window.surface_mut().move_cursor(15.0, 6.0);
        assert_eq!(window.mouse_delta_y(), 6.0);
        assert_eq!(window.mouse_delta_x(), 5.0);
    }

    #[test]
    fn test_drop_waits_idle_and_frees_semaphores() {
        let device = Arc::new(RecordingDevice::new());
        let engine = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        drop(window(&device, &engine));

        assert_eq!(device.count(|e| matches!(e, DeviceEvent::DestroySemaphore(_))), 2);
        assert!(device.count(|e| *e == DeviceEvent::WaitIdle) >= 1);
    }
}
