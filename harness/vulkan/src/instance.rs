//! Vulkan loader and instance bootstrap.
//!
//! Fixed setup with no decision logic beyond "enable what is available":
//! `VK_EXT_debug_utils` when the loader offers it (for object labels), and the
//! Khronos validation layer when asked for and installed.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, warn};

use crate::error::{vk_err, Result, VulkanError};

const APP_NAME: &CStr = c"vkt";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Owns the loader entry points and the `VkInstance`.
pub struct Instance {
    _entry: ash::Entry,
    pub(crate) handle: ash::Instance,
    pub(crate) debug_utils: bool,
}

impl Instance {
    /// Load the Vulkan loader and create an instance.
    pub fn new(validation: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| VulkanError::Loader(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(APP_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(vk_err("vkEnumerateInstanceExtensionProperties"))?;
        let debug_utils = extensions
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(ash::ext::debug_utils::NAME));
        let mut extension_ptrs = Vec::new();
        if debug_utils {
            extension_ptrs.push(ash::ext::debug_utils::NAME.as_ptr());
        } else {
            debug!("VK_EXT_debug_utils not available, object labels disabled");
        }

        let mut layer_ptrs = Vec::new();
        if validation {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(vk_err("vkEnumerateInstanceLayerProperties"))?;
            if layers.iter().any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER)) {
                layer_ptrs.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            }
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let handle = unsafe { entry.create_instance(&create_info, None) }
            .map_err(vk_err("vkCreateInstance"))?;
        debug!(validation = !layer_ptrs.is_empty(), debug_utils, "created Vulkan instance");

        Ok(Self { _entry: entry, handle, debug_utils })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { self.handle.destroy_instance(None) };
    }
}
