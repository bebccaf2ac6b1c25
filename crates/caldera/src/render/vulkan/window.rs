//! GLFW windows and their swapchains

use std::sync::Arc;

use ash::vk;

use super::device::VulkanDevice;
use super::resources;
use super::{VulkanError, VulkanResult};
use crate::config::WindowConfig;
use crate::render::commands::Extent2D;
use crate::render::device::{DeviceError, DeviceResult, Format, ImageId, SemaphoreId};
use crate::render::window::{Key, WindowSurface};

/// GLFW window wrapper with proper resource management
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl std::fmt::Debug for GlfwWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlfwWindow")
            .field("framebuffer_size", &self.window.get_framebuffer_size())
            .finish_non_exhaustive()
    }
}

impl GlfwWindow {
    /// Open a window without a client API
    pub fn new(config: &WindowConfig) -> VulkanResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| VulkanError::InitializationFailed(format!("GLFW initialization failed: {e:?}")))?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or_else(|| VulkanError::InitializationFailed("Window creation failed".to_string()))?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);
        if config.capture_mouse {
            window.set_cursor_mode(glfw::CursorMode::Disabled);
        }

        log::info!("Opened window '{}' ({}x{})", config.title, config.width, config.height);
        Ok(Self { glfw, window, events })
    }

    pub(super) fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("Vulkan is not supported by GLFW".to_string()))
    }

    pub(super) fn create_surface(&self, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api(result))
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        }
    }
}

fn glfw_key(key: Key) -> glfw::Key {
    match key {
        Key::A => glfw::Key::A,
        Key::B => glfw::Key::B,
        Key::C => glfw::Key::C,
        Key::D => glfw::Key::D,
        Key::E => glfw::Key::E,
        Key::F => glfw::Key::F,
        Key::G => glfw::Key::G,
        Key::H => glfw::Key::H,
        Key::I => glfw::Key::I,
        Key::J => glfw::Key::J,
        Key::K => glfw::Key::K,
        Key::L => glfw::Key::L,
        Key::M => glfw::Key::M,
        Key::N => glfw::Key::N,
        Key::O => glfw::Key::O,
        Key::P => glfw::Key::P,
        Key::Q => glfw::Key::Q,
        Key::R => glfw::Key::R,
        Key::S => glfw::Key::S,
        Key::T => glfw::Key::T,
        Key::U => glfw::Key::U,
        Key::V => glfw::Key::V,
        Key::W => glfw::Key::W,
        Key::X => glfw::Key::X,
        Key::Y => glfw::Key::Y,
        Key::Z => glfw::Key::Z,
        Key::Num0 => glfw::Key::Num0,
        Key::Num1 => glfw::Key::Num1,
        Key::Num2 => glfw::Key::Num2,
        Key::Num3 => glfw::Key::Num3,
        Key::Num4 => glfw::Key::Num4,
        Key::Num5 => glfw::Key::Num5,
        Key::Num6 => glfw::Key::Num6,
        Key::Num7 => glfw::Key::Num7,
        Key::Num8 => glfw::Key::Num8,
        Key::Num9 => glfw::Key::Num9,
        Key::Space => glfw::Key::Space,
        Key::LeftShift => glfw::Key::LeftShift,
        Key::LeftControl => glfw::Key::LeftControl,
        Key::Escape => glfw::Key::Escape,
        Key::Enter => glfw::Key::Enter,
        Key::Tab => glfw::Key::Tab,
        Key::Up => glfw::Key::Up,
        Key::Down => glfw::Key::Down,
        Key::Left => glfw::Key::Left,
        Key::Right => glfw::Key::Right,
    }
}

/// Swapchain handle and its registered images
struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<ImageId>,
    extent: Extent2D,
}

/// [`WindowSurface`] backed by a GLFW window and a Vulkan swapchain
///
/// Swapchain images are registered with the device so blits can target
/// them by id. An out-of-date or suboptimal swapchain is rebuilt on the
/// next acquire.
pub struct GlfwSurface {
    swapchain: Swapchain,
    surface: vk::SurfaceKHR,
    current: Option<u32>,
    stale: bool,
    window: GlfwWindow,
    device: Arc<VulkanDevice>,
}

impl std::fmt::Debug for GlfwSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlfwSurface")
            .field("extent", &self.swapchain.extent)
            .field("images", &self.swapchain.images.len())
            .field("stale", &self.stale)
            .finish_non_exhaustive()
    }
}

impl GlfwSurface {
    /// Create a surface and swapchain for `window`
    pub fn new(device: Arc<VulkanDevice>, window: GlfwWindow) -> VulkanResult<Self> {
        let surface = window.create_surface(&device.instance().instance)?;

        let supported = unsafe {
            device.instance().surface_loader.get_physical_device_surface_support(
                device.physical().device,
                device.physical().queue_family,
                surface,
            )
        };
        if !matches!(supported, Ok(true)) {
            unsafe { device.instance().surface_loader.destroy_surface(surface, None) };
            return Err(VulkanError::InitializationFailed(
                "The device queue cannot present to this window".to_string(),
            ));
        }

        let swapchain = match create_swapchain(&device, surface, window.framebuffer_extent(), vk::SwapchainKHR::null()) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                unsafe { device.instance().surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            surface,
            current: None,
            stale: false,
            window,
            device,
        })
    }

    /// The underlying window
    pub fn window(&self) -> &GlfwWindow {
        &self.window
    }

    fn recreate(&mut self) -> VulkanResult<()> {
        let extent = self.window.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }

        unsafe {
            self.device
                .device()
                .device_wait_idle()
                .map_err(VulkanError::Api)?;
        }
        let new = create_swapchain(&self.device, self.surface, extent, self.swapchain.handle)?;
        let old = std::mem::replace(&mut self.swapchain, new);
        destroy_swapchain(&self.device, old);
        self.stale = false;
        log::debug!(
            "Recreated swapchain at {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }
}

fn create_swapchain(
    device: &VulkanDevice,
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> VulkanResult<Swapchain> {
    let surface_loader = &device.instance().surface_loader;
    let physical = device.physical().device;

    let surface_caps = unsafe {
        surface_loader
            .get_physical_device_surface_capabilities(physical, surface)
            .map_err(VulkanError::Api)?
    };
    if !surface_caps
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::TRANSFER_DST)
    {
        return Err(VulkanError::InitializationFailed(
            "Swapchain images cannot be blit targets".to_string(),
        ));
    }

    let surface_formats = unsafe {
        surface_loader
            .get_physical_device_surface_formats(physical, surface)
            .map_err(VulkanError::Api)?
    };
    let format = surface_formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .copied()
        .ok_or_else(|| VulkanError::InitializationFailed("B8G8R8A8_SRGB surface format unavailable".to_string()))?;

    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(physical, surface)
            .map_err(VulkanError::Api)?
    };
    let present_mode = present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO);

    let extent = if surface_caps.current_extent.width != u32::MAX {
        surface_caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                surface_caps.min_image_extent.width,
                surface_caps.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                surface_caps.min_image_extent.height,
                surface_caps.max_image_extent.height,
            ),
        }
    };

    let image_count = if surface_caps.max_image_count > 0 {
        (surface_caps.min_image_count + 1).min(surface_caps.max_image_count)
    } else {
        surface_caps.min_image_count + 1
    };

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(surface_caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let loader = &device.logical().swapchain_loader;
    let handle = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
    let raw_images = match unsafe { loader.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { loader.destroy_swapchain(handle, None) };
            return Err(VulkanError::Api(e));
        }
    };

    let extent = Extent2D::new(extent.width, extent.height);
    let mut swapchain = Swapchain {
        handle,
        images: Vec::with_capacity(raw_images.len()),
        extent,
    };
    for image in raw_images {
        match resources::borrow_image(device.device(), image, Format::Bgra8Srgb, extent) {
            Ok(entry) => swapchain.images.push(device.register_image(entry)),
            Err(e) => {
                destroy_swapchain(device, swapchain);
                return Err(e);
            }
        }
    }

    log::debug!(
        "Created swapchain with {} images ({:?})",
        swapchain.images.len(),
        present_mode
    );
    Ok(swapchain)
}

fn destroy_swapchain(device: &VulkanDevice, swapchain: Swapchain) {
    for id in swapchain.images {
        if let Some(entry) = device.lock().resources.images.remove(id) {
            resources::destroy_image(device.device(), &entry);
        }
    }
    unsafe {
        device
            .logical()
            .swapchain_loader
            .destroy_swapchain(swapchain.handle, None);
    }
}

impl WindowSurface for GlfwSurface {
    fn extent(&self) -> Extent2D {
        self.swapchain.extent
    }

    fn acquire_next_image(&mut self, signal: SemaphoreId) -> DeviceResult<ImageId> {
        let semaphore = self.device.semaphore_handle(signal)?;
        if self.stale {
            self.recreate()?;
        }

        for _ in 0..2 {
            let result = unsafe {
                self.device.logical().swapchain_loader.acquire_next_image(
                    self.swapchain.handle,
                    u64::MAX,
                    semaphore,
                    vk::Fence::null(),
                )
            };
            match result {
                Ok((index, suboptimal)) => {
                    self.stale |= suboptimal;
                    self.current = Some(index);
                    return self
                        .swapchain
                        .images
                        .get(index as usize)
                        .copied()
                        .ok_or_else(|| DeviceError::Backend(format!("swapchain returned image {index}")));
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.recreate()?,
                Err(e) => return Err(VulkanError::Api(e).into()),
            }
        }
        Err(DeviceError::SurfaceLost)
    }

    fn present(&mut self, wait: &[SemaphoreId]) -> DeviceResult<()> {
        let index = self.current.take().ok_or_else(|| {
            DeviceError::from(VulkanError::InvalidOperation {
                reason: "present without an acquired image".to_string(),
            })
        })?;
        let wait = wait
            .iter()
            .map(|&id| self.device.semaphore_handle(id))
            .collect::<DeviceResult<Vec<_>>>()?;

        let swapchains = [self.swapchain.handle];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = {
            // Queue access is externally synchronized
            let _queue = self.device.lock();
            unsafe {
                self.device
                    .logical()
                    .swapchain_loader
                    .queue_present(self.device.logical().queue, &present_info)
            }
        };
        match result {
            Ok(suboptimal) => {
                self.stale |= suboptimal;
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.stale = true;
                Ok(())
            }
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn poll_events(&mut self) {
        self.window.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.window.events) {
            if let glfw::WindowEvent::FramebufferSize(..) = event {
                self.stale = true;
            }
        }
    }

    fn should_close(&self) -> bool {
        self.window.window.should_close()
    }

    fn is_key_pressed(&self, key: Key) -> bool {
        self.window.window.get_key(glfw_key(key)) == glfw::Action::Press
    }

    fn cursor_position(&self) -> (f64, f64) {
        self.window.window.get_cursor_pos()
    }
}

impl Drop for GlfwSurface {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device().device_wait_idle();
        }
        let swapchain = std::mem::replace(
            &mut self.swapchain,
            Swapchain {
                handle: vk::SwapchainKHR::null(),
                images: Vec::new(),
                extent: Extent2D::default(),
            },
        );
        destroy_swapchain(&self.device, swapchain);
        unsafe {
            self.device
                .instance()
                .surface_loader
                .destroy_surface(self.surface, None);
        }
    }
}
