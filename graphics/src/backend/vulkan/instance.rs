//! Vulkan instance creation and configuration.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Required Vulkan API version (dynamic rendering, synchronization2 and
/// maintenance4 are core in 1.3).
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional debug utils state.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a headless Vulkan instance with optional validation layers.
///
/// Debug utils are enabled whenever the extension is present so that
/// command markers show up in capture tools; the messenger is only installed
/// with validation.
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    // Check if validation layers are available
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let debug_utils_available = check_extension_support(entry, ash::ext::debug_utils::NAME);

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"framegraph")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"framegraph")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if debug_utils_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug_utils =
        debug_utils_available.then(|| ash::ext::debug_utils::Instance::new(entry, &instance));

    let debug_messenger = match (&debug_utils, validation_available) {
        (Some(debug_utils), true) => match debug::create_debug_messenger(debug_utils) {
            Ok(messenger) => Some(messenger),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        },
        _ => None,
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}

/// Check if an instance extension is available.
fn check_extension_support(entry: &ash::Entry, name: &CStr) -> bool {
    let Ok(extensions) = (unsafe { entry.enumerate_instance_extension_properties(None) }) else {
        return false;
    };

    extensions
        .iter()
        .any(|extension| extension.extension_name_as_c_str() == Ok(name))
}
