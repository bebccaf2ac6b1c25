//! Instance, physical device selection and logical device
//!
//! The device is created for Vulkan 1.3 with dynamic rendering,
//! synchronization2 and buffer device addresses enabled. A single queue from
//! a family that supports both graphics and presentation serves every
//! [`QueueKind`](crate::render::device::QueueKind).

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::window::GlfwWindow;
use super::{VulkanError, VulkanResult};
use crate::render::device::SampleCount;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };
const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"Caldera\0") };

/// Vulkan instance with optional validation messenger
pub(super) struct VulkanInstance {
    _entry: Entry,
    pub instance: Instance,
    pub surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    pub fn new(window: &GlfwWindow, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let required = window.required_instance_extensions()?;
        let required: Vec<CString> = required
            .into_iter()
            .filter_map(|name| CString::new(name).ok())
            .collect();
        let mut extensions: Vec<*const c_char> = required.iter().map(|name| name.as_ptr()).collect();

        let validation = enable_validation && Self::has_validation_layer(&entry);
        if enable_validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        let layers: Vec<*const c_char> = if validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        log::info!("Vulkan instance created (validation: {validation})");

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            debug,
        })
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Selected GPU
pub(super) struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_family: u32,
}

impl PhysicalDeviceInfo {
    /// First device with Vulkan 1.3, the swapchain extension and a queue
    /// family that can both draw and present to `surface`
    pub fn select(instance: &VulkanInstance, surface: vk::SurfaceKHR) -> VulkanResult<Self> {
        let devices = unsafe { instance.instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            match Self::evaluate(instance, device, surface) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", unsafe {
                        CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                    });
                    return Ok(info);
                }
                Err(reason) => log::debug!("Skipping GPU: {reason}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate(instance: &VulkanInstance, device: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VulkanResult<Self> {
        let properties = unsafe { instance.instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.3 not supported".to_string()));
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features13)
            .push_next(&mut features12);
        unsafe { instance.instance.get_physical_device_features2(device, &mut features) };
        let core_features = features.features;
        if features13.dynamic_rendering == vk::FALSE
            || features13.synchronization2 == vk::FALSE
            || features12.buffer_device_address == vk::FALSE
        {
            return Err(VulkanError::InitializationFailed(
                "dynamic rendering, synchronization2 or buffer device address missing".to_string(),
            ));
        }

        let extensions = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("VK_KHR_swapchain not supported".to_string()));
        }

        let families = unsafe { instance.instance.get_physical_device_queue_family_properties(device) };
        let mut queue_family = None;
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let present = unsafe {
                instance
                    .surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            if present {
                queue_family = Some(index);
                break;
            }
        }
        let queue_family = queue_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family can present".to_string()))?;

        let memory_properties = unsafe { instance.instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            features: core_features,
            memory_properties,
            queue_family,
        })
    }

    /// Highest count both color and depth attachments support
    pub fn max_sample_count(&self) -> SampleCount {
        let limits = &self.properties.limits;
        let supported = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        [64, 32, 16, 8, 4, 2]
            .into_iter()
            .find(|&count| supported.contains(vk::SampleCountFlags::from_raw(count)))
            .and_then(SampleCount::from_count)
            .unwrap_or(SampleCount::X1)
    }
}

/// Logical device and its single queue
pub(super) struct LogicalDevice {
    pub device: Device,
    pub queue: vk::Queue,
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    pub fn new(instance: &VulkanInstance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let extensions = [SwapchainLoader::name().as_ptr()];
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().buffer_device_address(true);
        let features = vk::PhysicalDeviceFeatures::builder()
            .fill_mode_non_solid(physical.features.fill_mode_non_solid == vk::TRUE)
            .wide_lines(physical.features.wide_lines == vk::TRUE);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut features13)
            .push_next(&mut features12);

        let device = unsafe {
            instance
                .instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let queue = unsafe { device.get_device_queue(physical.queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);

        Ok(Self {
            device,
            queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
