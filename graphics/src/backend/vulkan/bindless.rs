//! Shader-visible bindless descriptor set.
//!
//! One update-after-bind set, bound as set 1 of the shared pipeline layout,
//! holds three partially bound arrays indexed by the same bindless slot:
//!
//! | binding | contents                  | layout          |
//! |---------|---------------------------|-----------------|
//! | 0       | sampled images (SRV)      | shader read     |
//! | 1       | storage images (UAV)      | general         |
//! | 2       | storage buffers (SRV/UAV) | -               |
//!
//! A slot is only written in the array matching its view, so shaders must
//! index the array that fits the resource they expect.

use ash::vk;
use rustc_hash::FxHashMap;

use super::conversion::{aspect_mask, convert_texture_format, state_access};
use crate::descriptor::DescriptorView;
use crate::error::GraphicsError;
use crate::types::{ResourceState, TextureDescriptor, TextureDimension};

/// Binding of the sampled image array.
pub const SAMPLED_IMAGES: u32 = 0;
/// Binding of the storage image array.
pub const STORAGE_IMAGES: u32 = 1;
/// Binding of the storage buffer array.
pub const STORAGE_BUFFERS: u32 = 2;

const BINDINGS: [(u32, vk::DescriptorType); 3] = [
    (SAMPLED_IMAGES, vk::DescriptorType::SAMPLED_IMAGE),
    (STORAGE_IMAGES, vk::DescriptorType::STORAGE_IMAGE),
    (STORAGE_BUFFERS, vk::DescriptorType::STORAGE_BUFFER),
];

/// Largest table the device can hold, from its update-after-bind limits.
pub fn max_capacity(properties: &vk::PhysicalDeviceVulkan12Properties<'_>) -> u32 {
    [
        properties.max_descriptor_set_update_after_bind_sampled_images,
        properties.max_descriptor_set_update_after_bind_storage_images,
        properties.max_descriptor_set_update_after_bind_storage_buffers,
        properties.max_per_stage_descriptor_update_after_bind_sampled_images,
        properties.max_per_stage_descriptor_update_after_bind_storage_images,
        properties.max_per_stage_descriptor_update_after_bind_storage_buffers,
        properties.max_per_stage_update_after_bind_resources / 3,
    ]
    .into_iter()
    .min()
    .unwrap_or(0)
}

/// Image view type for a texture view.
fn view_type(descriptor: &TextureDescriptor) -> vk::ImageViewType {
    let layers = descriptor.array_layers();
    match descriptor.dimension {
        TextureDimension::D3 => vk::ImageViewType::TYPE_3D,
        TextureDimension::Cube if layers > 6 => vk::ImageViewType::CUBE_ARRAY,
        TextureDimension::Cube => vk::ImageViewType::CUBE,
        TextureDimension::D2 if layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureDimension::D2 => vk::ImageViewType::TYPE_2D,
    }
}

/// Descriptor set, pool and the image views written into it.
pub struct BindlessTable {
    pub set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    capacity: u32,
    /// Views created for image slots, destroyed when the slot is cleared.
    views: FxHashMap<u32, vk::ImageView>,
}

impl BindlessTable {
    /// Create a table with `capacity` entries per array.
    pub fn new(device: &ash::Device, capacity: u32) -> Result<Self, GraphicsError> {
        let capacity = capacity.max(1);
        let bindings = BINDINGS.map(|(binding, descriptor_type)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL)
        });
        let flags = [vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND; 3];
        let mut binding_flags =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create bindless set layout: {:?}",
                    e
                ))
            })?;

        let pool_sizes = BINDINGS.map(|(_, descriptor_type)| vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: capacity,
        });
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to create bindless descriptor pool: {:?}",
                    e
                )));
            }
        };

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) if !sets.is_empty() => sets[0],
            result => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to allocate the bindless descriptor set: {:?}",
                    result.err()
                )));
            }
        };

        log::debug!("Created bindless descriptor set ({} slots per array)", capacity);
        Ok(Self {
            set_layout,
            pool,
            set,
            capacity,
            views: FxHashMap::default(),
        })
    }

    fn check_slot(&self, slot: u32) -> Result<(), GraphicsError> {
        if slot >= self.capacity {
            log::error!(
                "Bindless slot {} is beyond the device table of {} slots",
                slot,
                self.capacity
            );
            return Err(GraphicsError::OutOfDescriptors(
                crate::descriptor::DescriptorHeapKind::Resource,
            ));
        }
        Ok(())
    }

    /// Write a storage buffer range into `slot`.
    pub fn write_buffer(
        &mut self,
        device: &ash::Device,
        slot: u32,
        buffer: vk::Buffer,
        range: u64,
    ) -> Result<(), GraphicsError> {
        self.check_slot(slot)?;
        self.destroy_view(device, slot);
        let info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(STORAGE_BUFFERS)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Create a view of `descriptor`'s mip range of `image` and write it into
    /// the array `view` selects.
    pub fn write_image(
        &mut self,
        device: &ash::Device,
        slot: u32,
        image: vk::Image,
        descriptor: &TextureDescriptor,
        view: DescriptorView,
    ) -> Result<(), GraphicsError> {
        self.check_slot(slot)?;
        let (binding, descriptor_type, state) = match view {
            DescriptorView::ShaderWrite => (
                STORAGE_IMAGES,
                vk::DescriptorType::STORAGE_IMAGE,
                ResourceState::UNORDERED_ACCESS,
            ),
            _ => (
                SAMPLED_IMAGES,
                vk::DescriptorType::SAMPLED_IMAGE,
                ResourceState::ALL_SHADER_RESOURCE,
            ),
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type(descriptor))
            .format(convert_texture_format(descriptor.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(descriptor.format) & !vk::ImageAspectFlags::STENCIL,
                base_mip_level: descriptor.base_mip,
                level_count: descriptor.mip_levels,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        let image_view = unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create bindless view of {}: {:?}",
                descriptor.debug_name(),
                e
            ))
        })?;

        let info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view,
            image_layout: state_access(state).layout,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(descriptor_type)
            .image_info(&info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        self.destroy_view(device, slot);
        self.views.insert(slot, image_view);
        Ok(())
    }

    /// Forget `slot`. Partially bound arrays may keep stale entries as long
    /// as shaders no longer index them.
    pub fn clear(&mut self, device: &ash::Device, slot: u32) {
        self.destroy_view(device, slot);
    }

    fn destroy_view(&mut self, device: &ash::Device, slot: u32) {
        if let Some(view) = self.views.remove(&slot) {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    /// Destroy every view, the pool and the layout.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for (_, view) in self.views.drain() {
                device.destroy_image_view(view, None);
            }
            // Frees the set too.
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        self.pool = vk::DescriptorPool::null();
        self.set_layout = vk::DescriptorSetLayout::null();
        self.set = vk::DescriptorSet::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureFormat, TextureUsage};

    #[test]
    fn test_view_types() {
        let flat = TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead);
        assert_eq!(view_type(&flat), vk::ImageViewType::TYPE_2D);
        let cube = TextureDescriptor::new_cube(8, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead);
        assert_eq!(view_type(&cube), vk::ImageViewType::CUBE);
    }

    #[test]
    fn test_capacity_is_the_tightest_limit() {
        let properties = vk::PhysicalDeviceVulkan12Properties {
            max_descriptor_set_update_after_bind_sampled_images: 1 << 20,
            max_descriptor_set_update_after_bind_storage_images: 1 << 20,
            max_descriptor_set_update_after_bind_storage_buffers: 1 << 20,
            max_per_stage_descriptor_update_after_bind_sampled_images: 1 << 20,
            max_per_stage_descriptor_update_after_bind_storage_images: 500_000,
            max_per_stage_descriptor_update_after_bind_storage_buffers: 1 << 20,
            max_per_stage_update_after_bind_resources: 3 << 20,
            ..Default::default()
        };
        assert_eq!(max_capacity(&properties), 500_000);
    }
}
