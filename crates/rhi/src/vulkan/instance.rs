//! Vulkan instance management.
//!
//! Handles VkInstance creation, the window-system surface extensions, the
//! validation layer and the debug messenger that forwards validation output
//! into `tracing`.

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// When dropped, destroys the debug messenger and then the instance.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// When `display` is given, the surface extensions the window system needs
    /// are enabled. A missing validation layer is a warning, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded, the surface
    /// extensions cannot be enumerated, or instance creation fails.
    pub fn new(enable_validation: bool, display: Option<RawDisplayHandle>) -> RhiResult<Self> {
        // Load the Vulkan library
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"rtg")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"rtg")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = Self::required_extensions(display)?;
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created ({} extension(s), validation: {})",
            extensions.len(),
            validation_available
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => {
                    debug!("Debug messenger created");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Surface extensions for the display, if any. A headless instance
    /// enables none.
    fn required_extensions(display: Option<RawDisplayHandle>) -> RhiResult<Vec<*const c_char>> {
        let Some(display) = display else {
            return Ok(Vec::new());
        };
        let extensions = ash_window::enumerate_required_extensions(display)?;
        for &name in extensions {
            // SAFETY: ash-window hands out static nul-terminated names.
            trace!("Surface extension: {:?}", unsafe { CStr::from_ptr(name) });
        }
        Ok(extensions.to_vec())
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RhiError::from)?
        };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            // Destroy debug messenger before instance
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation layer messages to `tracing` at the matching level.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid (or null) callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            info!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_instance_needs_no_surface_extensions() {
        let extensions = Instance::required_extensions(None).unwrap();
        assert!(extensions.is_empty());
    }

    #[test]
    fn test_headless_instance_creation() {
        // Requires a Vulkan loader; skipped when none is installed.
        match Instance::new(false, None) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(RhiError::VulkanError(e)) => {
                eprintln!("Skipping test: no Vulkan driver ({e})");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
