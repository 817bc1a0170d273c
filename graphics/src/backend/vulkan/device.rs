//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::GraphicsError;

/// Select the best physical device.
///
/// Only Vulkan 1.3 devices with `VK_KHR_push_descriptor`, update-after-bind
/// descriptor indexing and a graphics queue qualify; discrete GPUs are
/// preferred over integrated GPUs.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if properties.api_version < vk::API_VERSION_1_3 {
            log::info!("Skipping GPU {device_name}: Vulkan 1.3 not supported");
            continue;
        }
        if !supports_push_descriptor(instance, device) {
            log::info!("Skipping GPU {device_name}: VK_KHR_push_descriptor not supported");
            continue;
        }
        if !supports_bindless(instance, device) {
            log::info!("Skipping GPU {device_name}: update-after-bind descriptor indexing not supported");
            continue;
        }
        let Some(queue_family) = find_graphics_queue_family(instance, device) else {
            log::info!("Skipping GPU {device_name}: no graphics queue");
            continue;
        };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    best.ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

fn supports_push_descriptor(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions
        .iter()
        .any(|extension| extension.extension_name_as_c_str() == Ok(ash::khr::push_descriptor::NAME))
}

fn supports_bindless(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_12_features);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    let f = vulkan_12_features;
    [
        f.descriptor_indexing,
        f.runtime_descriptor_array,
        f.descriptor_binding_partially_bound,
        f.descriptor_binding_update_unused_while_pending,
        f.descriptor_binding_sampled_image_update_after_bind,
        f.descriptor_binding_storage_image_update_after_bind,
        f.descriptor_binding_storage_buffer_update_after_bind,
        f.shader_sampled_image_array_non_uniform_indexing,
        f.shader_storage_image_array_non_uniform_indexing,
        f.shader_storage_buffer_array_non_uniform_indexing,
    ]
    .into_iter()
    .all(|supported| supported == vk::TRUE)
}

/// Find a queue family that supports graphics (and therefore compute and
/// transfer) operations.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

/// Create a logical device with one queue and the features the backend relies
/// on: timeline semaphores, descriptor indexing, dynamic rendering,
/// synchronization2, maintenance4 and push descriptors.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = [ash::khr::push_descriptor::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .scalar_block_layout(true)
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_update_unused_while_pending(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .shader_storage_image_array_non_uniform_indexing(true)
        .shader_storage_buffer_array_non_uniform_indexing(true);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}
