//! Native Vulkan backend implementation using ash.
//!
//! The backend is headless: it renders into textures only and never touches
//! a surface. It needs Vulkan 1.3 (dynamic rendering, synchronization2 and
//! maintenance4), timeline semaphores and `VK_KHR_push_descriptor`.
//!
//! All queue types are served by one graphics queue; each type still gets its
//! own timeline semaphore so submission values are numbered per type.
//!
//! Timestamps use `vkCmdWriteTimestamp2` into plain query pools and are
//! copied out with `vkCmdCopyQueryPoolResults`; the period is 0 when the
//! queue family reports no valid timestamp bits.
//!
//! Image layouts are tracked per mip on the texture itself. Barriers take the
//! old layout from the tracker, which lets freshly created images go through
//! `UNDEFINED` on their first use.

mod allocator;
mod barriers;
mod bindless;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod sync;

use std::collections::VecDeque;
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use framegraph_core::profiling::profile_scope;

use self::barriers::BarrierBatch;
use self::bindless::BindlessTable;
use self::command::{RecordContext, Recorder};
use self::conversion::{
    aspect_mask, convert_buffer_usage, convert_texture_format, convert_texture_usage,
    state_access,
};
use self::pipeline::SharedLayout;
use self::sync::{Timelines, map_device_error};
use super::{
    AllocationInfo, GpuBackend, GpuBuffer, GpuCommand, GpuHeap, GpuPipeline, GpuQueryPool,
    GpuTexture, GpuView,
};
use crate::command_list::QueueType;
use crate::descriptor::{DescriptorHeapKind, DescriptorView};
use crate::error::GraphicsError;
use crate::pipeline::PipelineDescriptor;
use crate::types::{
    BufferDescriptor, BufferUsage, ResourceDescriptor, ResourceState, TextureDescriptor,
    TextureDimension, TextureUsage,
};

/// Vulkan buffer with its memory.
#[derive(Debug)]
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    /// `None` for buffers placed in a heap.
    allocation: Option<Allocation>,
    pub(crate) size: u64,
}

impl VulkanBuffer {
    /// Raw buffer handle.
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }
}

/// Vulkan image with its per-mip attachment views and tracked layouts.
#[derive(Debug)]
pub struct VulkanTexture {
    pub(crate) image: vk::Image,
    /// `None` for images placed in a heap.
    allocation: Option<Allocation>,
    pub(crate) format: vk::Format,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) block_size: u32,
    /// One view per mip, only for render and depth targets.
    mip_views: Vec<vk::ImageView>,
    pub(crate) layouts: Mutex<Vec<vk::ImageLayout>>,
}

impl VulkanTexture {
    /// Raw image handle.
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    /// Number of mips.
    pub fn mip_count(&self) -> u32 {
        self.layouts.lock().len() as u32
    }

    pub(crate) fn has_depth(&self) -> bool {
        self.aspect.contains(vk::ImageAspectFlags::DEPTH)
    }

    pub(crate) fn mip_view(&self, mip: u32) -> Result<vk::ImageView, GraphicsError> {
        self.mip_views.get(mip as usize).copied().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "mip {mip} of a {:?} texture cannot be used as an attachment",
                self.format
            ))
        })
    }

    /// Queue the transition of a mip range, splitting it where the tracked
    /// layouts differ, and record the new layout.
    pub(crate) fn transition(
        &self,
        batch: &mut BarrierBatch,
        base_mip: u32,
        mip_count: u32,
        before: ResourceState,
        after: ResourceState,
    ) {
        let new_layout = state_access(after).layout;
        let mut layouts = self.layouts.lock();
        let end = base_mip.saturating_add(mip_count).min(layouts.len() as u32);
        let mut mip = base_mip;
        while mip < end {
            let old_layout = layouts[mip as usize];
            let mut run_end = mip + 1;
            while run_end < end && layouts[run_end as usize] == old_layout {
                run_end += 1;
            }
            batch.add_image_barrier(
                self.image,
                self.aspect,
                mip,
                run_end - mip,
                before,
                after,
                old_layout,
            );
            mip = run_end;
        }
        for layout in layouts.iter_mut().take(end as usize).skip(base_mip as usize) {
            *layout = new_layout;
        }
    }
}

/// Block of device memory resources can be placed in.
#[derive(Debug)]
pub struct VulkanHeap {
    allocation: Option<Allocation>,
    memory: vk::DeviceMemory,
    /// Offset of the heap inside `memory`.
    offset: u64,
    pub(crate) size: u64,
}

/// Compiled pipeline.
#[derive(Debug)]
pub struct VulkanPipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) bind_point: vk::PipelineBindPoint,
}

/// Timestamp query pool.
#[derive(Debug)]
pub struct VulkanQueryPool {
    pub(crate) pool: vk::QueryPool,
    pub(crate) count: u32,
}

/// Limits the recorder validates bindings against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceLimits {
    pub min_uniform_offset_alignment: u64,
    pub min_storage_offset_alignment: u64,
    pub max_uniform_range: u64,
    pub max_storage_range: u64,
    pub buffer_image_granularity: u64,
}

pub(crate) fn vk_buffer(buffer: &GpuBuffer) -> Result<&VulkanBuffer, GraphicsError> {
    match buffer {
        GpuBuffer::Vulkan(buffer) => Ok(buffer),
        other => Err(GraphicsError::InvalidParameter(format!(
            "buffer {other:?} does not belong to the Vulkan backend"
        ))),
    }
}

pub(crate) fn vk_texture(texture: &GpuTexture) -> Result<&VulkanTexture, GraphicsError> {
    match texture {
        GpuTexture::Vulkan(texture) => Ok(texture),
        other => Err(GraphicsError::InvalidParameter(format!(
            "texture {other:?} does not belong to the Vulkan backend"
        ))),
    }
}

pub(crate) fn vk_pipeline(pipeline: &GpuPipeline) -> Result<&VulkanPipeline, GraphicsError> {
    match pipeline {
        GpuPipeline::Vulkan(pipeline) => Ok(pipeline),
        other => Err(GraphicsError::InvalidParameter(format!(
            "pipeline {other:?} does not belong to the Vulkan backend"
        ))),
    }
}

pub(crate) fn vk_query_pool(pool: &GpuQueryPool) -> Result<&VulkanQueryPool, GraphicsError> {
    match pool {
        GpuQueryPool::Vulkan(pool) => Ok(pool),
        other => Err(GraphicsError::InvalidParameter(format!(
            "query pool {other:?} does not belong to the Vulkan backend"
        ))),
    }
}

fn vk_heap(heap: &GpuHeap) -> Result<&VulkanHeap, GraphicsError> {
    match heap {
        GpuHeap::Vulkan(heap) => Ok(heap),
        other => Err(GraphicsError::InvalidParameter(format!(
            "heap {other:?} does not belong to the Vulkan backend"
        ))),
    }
}

/// First-use layout transition waiting for the next submission.
#[derive(Debug, Clone, Copy)]
struct PendingLayout {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mip_count: u32,
    layout: vk::ImageLayout,
}

fn buffer_create_info(descriptor: &BufferDescriptor) -> vk::BufferCreateInfo<'static> {
    vk::BufferCreateInfo::default()
        .size(descriptor.size.max(1))
        .usage(convert_buffer_usage(descriptor))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}

fn image_create_info(
    descriptor: &TextureDescriptor,
) -> Result<vk::ImageCreateInfo<'static>, GraphicsError> {
    let usage = convert_texture_usage(descriptor.usage, descriptor.format)?;
    let (image_type, depth, flags) = match descriptor.dimension {
        TextureDimension::D2 => (vk::ImageType::TYPE_2D, 1, vk::ImageCreateFlags::empty()),
        TextureDimension::D3 => (
            vk::ImageType::TYPE_3D,
            descriptor.depth_or_array_layers.max(1),
            vk::ImageCreateFlags::empty(),
        ),
        TextureDimension::Cube => (
            vk::ImageType::TYPE_2D,
            1,
            vk::ImageCreateFlags::CUBE_COMPATIBLE,
        ),
    };
    // Views may reinterpret color formats of the same texel size.
    let flags = if descriptor.format.is_depth_stencil() {
        flags
    } else {
        flags | vk::ImageCreateFlags::MUTABLE_FORMAT
    };
    Ok(vk::ImageCreateInfo::default()
        .flags(flags)
        .image_type(image_type)
        .format(convert_texture_format(descriptor.format))
        .extent(vk::Extent3D {
            width: descriptor.width.max(1),
            height: descriptor.height.max(1),
            depth,
        })
        .mip_levels((descriptor.base_mip + descriptor.mip_levels).max(1))
        .array_layers(descriptor.array_layers().max(1))
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED))
}

fn memory_location(descriptor: &BufferDescriptor) -> MemoryLocation {
    match descriptor.usage {
        BufferUsage::Readback => MemoryLocation::GpuToCpu,
        BufferUsage::Upload => MemoryLocation::CpuToGpu,
        _ if descriptor.mappable => MemoryLocation::CpuToGpu,
        _ => MemoryLocation::GpuOnly,
    }
}

/// Native Vulkan backend.
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils_instance: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    push_descriptor: ash::khr::push_descriptor::Device,
    queue: vk::Queue,
    allocator: ManuallyDrop<Allocator>,
    limits: DeviceLimits,
    /// Nanoseconds per timestamp tick, 0 without timestamp support.
    timestamp_period: f64,
    /// Memory type every heap is allocated from.
    heap_memory_type: u32,
    bindless: BindlessTable,
    layout: SharedLayout,
    timelines: Timelines,
    command_pool: vk::CommandPool,
    free_command_buffers: Vec<vk::CommandBuffer>,
    in_flight: VecDeque<(QueueType, u64, vk::CommandBuffer)>,
    pending_layouts: Vec<PendingLayout>,
}

impl VulkanBackend {
    /// Create a Vulkan backend, optionally with validation layers, with a
    /// bindless table of up to `bindless_capacity` slots.
    pub fn new(validation_enabled: bool, bindless_capacity: u32) -> Result<Self, GraphicsError> {
        profile_scope!("VulkanBackend::new");

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let bundle = instance::create_instance(&entry, validation_enabled)?;

        let (physical_device, queue_family) = match device::select_physical_device(&bundle.instance)
        {
            Ok(selection) => selection,
            Err(e) => {
                destroy_instance(&bundle);
                return Err(e);
            }
        };

        let device =
            match device::create_logical_device(&bundle.instance, physical_device, queue_family) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance(&bundle);
                    return Err(e);
                }
            };

        match Self::init(
            entry,
            &bundle,
            physical_device,
            queue_family,
            device.clone(),
            bindless_capacity,
        ) {
            Ok(backend) => {
                log::info!(
                    "Vulkan backend initialized (validation: {}, debug labels: {})",
                    bundle.debug_messenger.is_some(),
                    backend.debug_utils.is_some()
                );
                Ok(backend)
            }
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&bundle);
                Err(e)
            }
        }
    }

    fn init(
        entry: ash::Entry,
        bundle: &instance::InstanceBundle,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        device: ash::Device,
        bindless_capacity: u32,
    ) -> Result<Self, GraphicsError> {
        let instance = &bundle.instance;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let mut vulkan_12_properties = vk::PhysicalDeviceVulkan12Properties::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut vulkan_12_properties);
        unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };
        let properties = properties2.properties;
        let device_capacity = bindless::max_capacity(&vulkan_12_properties);
        if bindless_capacity > device_capacity {
            log::warn!(
                "Bindless table clamped from {} to the device limit of {} slots",
                bindless_capacity,
                device_capacity
            );
        }

        let limits = DeviceLimits {
            min_uniform_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
            min_storage_offset_alignment: properties.limits.min_storage_buffer_offset_alignment,
            max_uniform_range: u64::from(properties.limits.max_uniform_buffer_range),
            max_storage_range: u64::from(properties.limits.max_storage_buffer_range),
            buffer_image_granularity: properties.limits.buffer_image_granularity,
        };
        let timestamp_bits = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        }
        .get(queue_family as usize)
        .map_or(0, |family| family.timestamp_valid_bits);
        let timestamp_period = if timestamp_bits == 0 {
            log::warn!("Queue family {} cannot write timestamps", queue_family);
            0.0
        } else {
            f64::from(properties.limits.timestamp_period)
        };
        let heap_memory_type = select_heap_memory_type(instance, physical_device, &device)?;

        let mut bindless = BindlessTable::new(&device, bindless_capacity.min(device_capacity))?;
        let mut layout = match SharedLayout::new(&device, bindless.set_layout) {
            Ok(layout) => layout,
            Err(e) => {
                bindless.destroy(&device);
                return Err(e);
            }
        };
        let mut timelines = match Timelines::new(&device) {
            Ok(timelines) => timelines,
            Err(e) => {
                layout.destroy(&device);
                bindless.destroy(&device);
                return Err(e);
            }
        };
        let command_pool = match command::create_command_pool(&device, queue_family) {
            Ok(pool) => pool,
            Err(e) => {
                timelines.destroy(&device);
                layout.destroy(&device);
                bindless.destroy(&device);
                return Err(e);
            }
        };
        let allocator = match allocator::create_allocator(instance, physical_device, device.clone())
        {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                timelines.destroy(&device);
                layout.destroy(&device);
                bindless.destroy(&device);
                return Err(e);
            }
        };

        let debug_utils = bundle
            .debug_utils
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(instance, &device));
        let push_descriptor = ash::khr::push_descriptor::Device::new(instance, &device);

        Ok(Self {
            _entry: entry,
            instance: instance.clone(),
            debug_utils_instance: bundle.debug_utils.clone(),
            debug_messenger: bundle.debug_messenger,
            physical_device,
            device,
            debug_utils,
            push_descriptor,
            queue,
            allocator: ManuallyDrop::new(allocator),
            limits,
            timestamp_period,
            heap_memory_type,
            bindless,
            layout,
            timelines,
            command_pool,
            free_command_buffers: Vec::new(),
            in_flight: VecDeque::new(),
            pending_layouts: Vec::new(),
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn requirements(&self, descriptor: &ResourceDescriptor) -> Result<vk::MemoryRequirements, GraphicsError> {
        let mut requirements = vk::MemoryRequirements2::default();
        match descriptor {
            ResourceDescriptor::Buffer(desc) => {
                let info = buffer_create_info(desc);
                let query = vk::DeviceBufferMemoryRequirements::default().create_info(&info);
                unsafe {
                    self.device
                        .get_device_buffer_memory_requirements(&query, &mut requirements)
                };
            }
            ResourceDescriptor::Texture(desc) => {
                let info = image_create_info(desc)?;
                let query = vk::DeviceImageMemoryRequirements::default().create_info(&info);
                unsafe {
                    self.device
                        .get_device_image_memory_requirements(&query, &mut requirements)
                };
            }
        }
        Ok(requirements.memory_requirements)
    }

    fn create_raw_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<(vk::Buffer, vk::MemoryRequirements), GraphicsError> {
        let info = buffer_create_info(descriptor);
        let buffer = unsafe { self.device.create_buffer(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create buffer {}: {:?}",
                descriptor.debug_name(),
                e
            ))
        })?;
        debug::set_object_name(self.debug_utils.as_ref(), buffer, descriptor.label.as_deref());
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        Ok((buffer, requirements))
    }

    fn bind_buffer(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<(), GraphicsError> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }.map_err(|e| {
            unsafe { self.device.destroy_buffer(buffer, None) };
            GraphicsError::ResourceCreationFailed(format!("Failed to bind buffer memory: {:?}", e))
        })
    }

    fn create_raw_image(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<(vk::Image, vk::MemoryRequirements), GraphicsError> {
        let info = image_create_info(descriptor)?;
        let image = unsafe { self.device.create_image(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create texture {}: {:?}",
                descriptor.debug_name(),
                e
            ))
        })?;
        debug::set_object_name(self.debug_utils.as_ref(), image, descriptor.label.as_deref());
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        Ok((image, requirements))
    }

    fn bind_image(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<(), GraphicsError> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }.map_err(|e| {
            unsafe { self.device.destroy_image(image, None) };
            GraphicsError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })
    }

    /// Finish a bound image: attachment views, layout tracking and the
    /// first-use transition.
    fn finish_texture(
        &mut self,
        image: vk::Image,
        allocation: Option<Allocation>,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<VulkanTexture, GraphicsError> {
        let format = convert_texture_format(descriptor.format);
        let aspect = aspect_mask(descriptor.format);
        let mip_count = (descriptor.base_mip + descriptor.mip_levels).max(1);

        let mut mip_views = Vec::new();
        let attachment = matches!(
            descriptor.usage,
            TextureUsage::RenderTarget | TextureUsage::DepthStencilTarget
        );
        if attachment && descriptor.dimension != TextureDimension::D3 {
            let layers = descriptor.array_layers().max(1);
            let view_type = if layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            };
            for mip in 0..mip_count {
                let info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(view_type)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: mip,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: layers,
                    });
                match unsafe { self.device.create_image_view(&info, None) } {
                    Ok(view) => mip_views.push(view),
                    Err(e) => {
                        unsafe {
                            for view in mip_views {
                                self.device.destroy_image_view(view, None);
                            }
                            self.device.destroy_image(image, None);
                        }
                        if let Some(allocation) = allocation {
                            allocator::free(&mut self.allocator, allocation);
                        }
                        return Err(GraphicsError::ResourceCreationFailed(format!(
                            "Failed to create image view: {:?}",
                            e
                        )));
                    }
                }
            }
        }

        let layout = state_access(initial_state).layout;
        self.pending_layouts.push(PendingLayout {
            image,
            aspect,
            mip_count,
            layout,
        });

        Ok(VulkanTexture {
            image,
            allocation,
            format,
            aspect,
            block_size: descriptor.format.block_size(),
            mip_views,
            layouts: Mutex::new(vec![layout; mip_count as usize]),
        })
    }

    fn recycle_command_buffers(&mut self) -> Result<(), GraphicsError> {
        if self.in_flight.is_empty() {
            return Ok(());
        }
        let completed = self.timelines.completed_all(&self.device)?;
        let free = &mut self.free_command_buffers;
        self.in_flight.retain(|&(queue, value, cmd)| {
            if value <= completed[queue.index()] {
                free.push(cmd);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn acquire_command_buffer(&mut self) -> Result<vk::CommandBuffer, GraphicsError> {
        self.recycle_command_buffers()?;
        match self.free_command_buffers.pop() {
            Some(cmd) => Ok(cmd),
            None => command::allocate_command_buffer(&self.device, self.command_pool),
        }
    }

    fn record(
        &self,
        cmd: vk::CommandBuffer,
        commands: &[GpuCommand<'_>],
    ) -> Result<(), GraphicsError> {
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin) }.map_err(map_device_error)?;

        if !self.pending_layouts.is_empty() {
            let mut batch = BarrierBatch::new();
            for pending in &self.pending_layouts {
                batch.add_layout_change(
                    pending.image,
                    pending.aspect,
                    0,
                    pending.mip_count,
                    vk::ImageLayout::UNDEFINED,
                    pending.layout,
                );
            }
            batch.submit(&self.device, cmd);
        }

        let recorder = Recorder::new(
            RecordContext {
                device: &self.device,
                push_descriptor: &self.push_descriptor,
                debug_utils: self.debug_utils.as_ref(),
                layout: self.layout.pipeline_layout,
                bindless_set: self.bindless.set,
                limits: &self.limits,
            },
            cmd,
        );
        let recorded = recorder.record(commands);
        let ended = unsafe { self.device.end_command_buffer(cmd) }.map_err(map_device_error);
        recorded.and(ended)
    }
}

fn destroy_instance(bundle: &instance::InstanceBundle) {
    unsafe {
        if let (Some(debug_utils), Some(messenger)) = (&bundle.debug_utils, bundle.debug_messenger)
        {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        bundle.instance.destroy_instance(None);
    }
}

/// Pick a device-local memory type that fits buffers, color images and depth
/// images alike, so every resource can be placed in the same heaps.
fn select_heap_memory_type(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<u32, GraphicsError> {
    let candidates = [
        ResourceDescriptor::Buffer(BufferDescriptor::rw_byte_address(64 * 1024)),
        ResourceDescriptor::Texture(TextureDescriptor::new_2d(
            64,
            64,
            crate::types::TextureFormat::Rgba8Unorm,
            TextureUsage::RenderTarget,
        )),
        ResourceDescriptor::Texture(TextureDescriptor::new_2d(
            64,
            64,
            crate::types::TextureFormat::Depth32Float,
            TextureUsage::DepthStencilTarget,
        )),
    ];

    let mut type_bits = u32::MAX;
    for candidate in &candidates {
        let mut requirements = vk::MemoryRequirements2::default();
        match candidate {
            ResourceDescriptor::Buffer(desc) => {
                let info = buffer_create_info(desc);
                let query = vk::DeviceBufferMemoryRequirements::default().create_info(&info);
                unsafe { device.get_device_buffer_memory_requirements(&query, &mut requirements) };
            }
            ResourceDescriptor::Texture(desc) => {
                let info = image_create_info(desc)?;
                let query = vk::DeviceImageMemoryRequirements::default().create_info(&info);
                unsafe { device.get_device_image_memory_requirements(&query, &mut requirements) };
            }
        }
        let bits = requirements.memory_requirements.memory_type_bits;
        if type_bits & bits == 0 {
            log::warn!("No memory type fits every resource kind; some resources will not be placed");
            continue;
        }
        type_bits &= bits;
    }

    let properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    let types = &properties.memory_types[..properties.memory_type_count as usize];
    let matching = |required: vk::MemoryPropertyFlags| {
        types.iter().enumerate().position(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
    };

    matching(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .or_else(|| matching(vk::MemoryPropertyFlags::empty()))
        .map(|index| index as u32)
        .ok_or_else(|| GraphicsError::InitializationFailed("No memory type for heaps".into()))
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Command buffers are freed with their pool.
            self.device.destroy_command_pool(self.command_pool, None);
            self.timelines.destroy(&self.device);
            self.layout.destroy(&self.device);
            self.bindless.destroy(&self.device);

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils_instance, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError> {
        profile_scope!("VulkanBackend::create_buffer");
        let (buffer, requirements) = self.create_raw_buffer(descriptor)?;
        let allocation = match allocator::allocate(
            &mut self.allocator,
            descriptor.debug_name(),
            requirements,
            memory_location(descriptor),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation stays alive as long as the buffer.
        if let Err(e) =
            self.bind_buffer(buffer, unsafe { allocation.memory() }, allocation.offset())
        {
            allocator::free(&mut self.allocator, allocation);
            return Err(e);
        }

        log::trace!(
            "Created Vulkan buffer {} ({} bytes, state {:?})",
            descriptor.debug_name(),
            descriptor.size,
            initial_state
        );
        Ok(GpuBuffer::Vulkan(VulkanBuffer {
            buffer,
            allocation: Some(allocation),
            size: descriptor.size,
        }))
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError> {
        profile_scope!("VulkanBackend::create_texture");
        let (image, requirements) = self.create_raw_image(descriptor)?;
        let allocation = match allocator::allocate(
            &mut self.allocator,
            descriptor.debug_name(),
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation stays alive as long as the image.
        if let Err(e) = self.bind_image(image, unsafe { allocation.memory() }, allocation.offset())
        {
            allocator::free(&mut self.allocator, allocation);
            return Err(e);
        }

        let texture = self.finish_texture(image, Some(allocation), descriptor, initial_state)?;
        log::trace!(
            "Created Vulkan texture {} ({}x{}, {:?})",
            descriptor.debug_name(),
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(GpuTexture::Vulkan(texture))
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        let GpuBuffer::Vulkan(buffer) = buffer else {
            log::error!("Vulkan backend asked to destroy a foreign buffer: {buffer:?}");
            return;
        };
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        if let Some(allocation) = buffer.allocation {
            allocator::free(&mut self.allocator, allocation);
        }
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        let GpuTexture::Vulkan(texture) = texture else {
            log::error!("Vulkan backend asked to destroy a foreign texture: {texture:?}");
            return;
        };
        self.pending_layouts
            .retain(|pending| pending.image != texture.image);
        unsafe {
            for view in &texture.mip_views {
                self.device.destroy_image_view(*view, None);
            }
            self.device.destroy_image(texture.image, None);
        }
        if let Some(allocation) = texture.allocation {
            allocator::free(&mut self.allocator, allocation);
        }
    }

    fn allocation_info(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<AllocationInfo, GraphicsError> {
        let requirements = self.requirements(descriptor)?;
        Ok(AllocationInfo {
            size: requirements.size,
            alignment: requirements
                .alignment
                .max(self.limits.buffer_image_granularity),
        })
    }

    fn create_heap(&mut self, size: u64, alignment: u64) -> Result<GpuHeap, GraphicsError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "heap alignment {alignment} is not a power of two"
            )));
        }
        let requirements = vk::MemoryRequirements {
            size,
            alignment,
            memory_type_bits: 1 << self.heap_memory_type,
        };
        let allocation = allocator::allocate(
            &mut self.allocator,
            "transient heap",
            requirements,
            MemoryLocation::GpuOnly,
            false,
        )?;
        log::debug!(
            "Created Vulkan heap ({} bytes, memory type {})",
            size,
            self.heap_memory_type
        );
        Ok(GpuHeap::Vulkan(VulkanHeap {
            // SAFETY: the allocation is owned by the heap and freed in destroy_heap.
            memory: unsafe { allocation.memory() },
            offset: allocation.offset(),
            allocation: Some(allocation),
            size,
        }))
    }

    fn destroy_heap(&mut self, heap: GpuHeap) {
        let GpuHeap::Vulkan(mut heap) = heap else {
            log::error!("Vulkan backend asked to destroy a foreign heap: {heap:?}");
            return;
        };
        if let Some(allocation) = heap.allocation.take() {
            allocator::free(&mut self.allocator, allocation);
        }
    }

    fn create_placed_buffer(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError> {
        // Host-visible memory never comes from a heap.
        if descriptor.usage.is_host_visible() || descriptor.mappable {
            return self.create_buffer(descriptor, initial_state);
        }
        let heap = vk_heap(heap)?;
        let (buffer, requirements) = self.create_raw_buffer(descriptor)?;
        if requirements.memory_type_bits & (1 << self.heap_memory_type) == 0
            || offset % requirements.alignment.max(1) != 0
            || offset + requirements.size > heap.size
        {
            unsafe { self.device.destroy_buffer(buffer, None) };
            log::debug!(
                "Buffer {} cannot be placed at offset {}, using a dedicated allocation",
                descriptor.debug_name(),
                offset
            );
            return self.create_buffer(descriptor, initial_state);
        }
        self.bind_buffer(buffer, heap.memory, heap.offset + offset)?;
        Ok(GpuBuffer::Vulkan(VulkanBuffer {
            buffer,
            allocation: None,
            size: descriptor.size,
        }))
    }

    fn create_placed_texture(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError> {
        let heap = vk_heap(heap)?;
        let (memory, heap_offset, heap_size) = (heap.memory, heap.offset, heap.size);
        let (image, requirements) = self.create_raw_image(descriptor)?;
        if requirements.memory_type_bits & (1 << self.heap_memory_type) == 0
            || offset % requirements.alignment.max(1) != 0
            || offset + requirements.size > heap_size
        {
            unsafe { self.device.destroy_image(image, None) };
            log::debug!(
                "Texture {} cannot be placed at offset {}, using a dedicated allocation",
                descriptor.debug_name(),
                offset
            );
            return self.create_texture(descriptor, initial_state);
        }
        self.bind_image(image, memory, heap_offset + offset)?;
        let texture = self.finish_texture(image, None, descriptor, initial_state)?;
        Ok(GpuTexture::Vulkan(texture))
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let buffer = vk_buffer(buffer)?;
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= buffer.size)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "write of {} bytes at offset {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    buffer.size
                ))
            })?;
        let ptr = buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| GraphicsError::InvalidParameter("buffer is not host visible".into()))?;
        debug_assert!(end <= buffer.size);
        // SAFETY: the mapping covers the whole buffer and the range was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().cast::<u8>().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let buffer = vk_buffer(buffer)?;
        if offset.checked_add(size).is_none_or(|end| end > buffer.size) {
            return Err(GraphicsError::InvalidParameter(format!(
                "read of {} bytes at offset {} exceeds buffer size {}",
                size, offset, buffer.size
            )));
        }
        let ptr = buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| GraphicsError::InvalidParameter("buffer is not host visible".into()))?;
        let mut data = vec![0u8; size as usize];
        // SAFETY: the mapping covers the whole buffer and the range was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().cast::<u8>().add(offset as usize),
                data.as_mut_ptr(),
                data.len(),
            );
        }
        Ok(data)
    }

    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor,
    ) -> Result<GpuPipeline, GraphicsError> {
        profile_scope!("VulkanBackend::create_pipeline");
        let layout = self.layout.pipeline_layout;
        let (pipeline, bind_point) = match descriptor {
            PipelineDescriptor::Graphics(desc) => (
                pipeline::create_graphics_pipeline(&self.device, layout, desc)?,
                vk::PipelineBindPoint::GRAPHICS,
            ),
            PipelineDescriptor::Compute(desc) => (
                pipeline::create_compute_pipeline(&self.device, layout, desc)?,
                vk::PipelineBindPoint::COMPUTE,
            ),
        };
        debug::set_object_name(self.debug_utils.as_ref(), pipeline, descriptor.label());
        log::debug!("Created Vulkan pipeline {:?}", descriptor.label());
        Ok(GpuPipeline::Vulkan(VulkanPipeline {
            pipeline,
            bind_point,
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: GpuPipeline) {
        let GpuPipeline::Vulkan(pipeline) = pipeline else {
            log::error!("Vulkan backend asked to destroy a foreign pipeline: {pipeline:?}");
            return;
        };
        unsafe { self.device.destroy_pipeline(pipeline.pipeline, None) };
    }

    fn create_query_pool(&mut self, count: u32) -> Result<GpuQueryPool, GraphicsError> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count.max(1));
        let pool = unsafe { self.device.create_query_pool(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create query pool of {} timestamps: {:?}",
                count, e
            ))
        })?;
        Ok(GpuQueryPool::Vulkan(VulkanQueryPool { pool, count }))
    }

    fn destroy_query_pool(&mut self, pool: GpuQueryPool) {
        let GpuQueryPool::Vulkan(pool) = pool else {
            log::error!("Vulkan backend asked to destroy a foreign query pool: {pool:?}");
            return;
        };
        unsafe { self.device.destroy_query_pool(pool.pool, None) };
    }

    fn timestamp_period(&self) -> f64 {
        self.timestamp_period
    }

    fn write_descriptor(
        &mut self,
        kind: DescriptorHeapKind,
        slot: u32,
        view: DescriptorView,
        resource: GpuView<'_>,
    ) -> Result<(), GraphicsError> {
        // Attachments render through the per-mip views made at creation.
        if kind != DescriptorHeapKind::Resource {
            return Ok(());
        }
        match resource {
            GpuView::Buffer { buffer, descriptor } => {
                let buffer = vk_buffer(buffer)?;
                let range = descriptor
                    .size
                    .min(buffer.size)
                    .min(self.limits.max_storage_range);
                self.bindless
                    .write_buffer(&self.device, slot, buffer.buffer, range)
            }
            GpuView::Texture {
                texture,
                descriptor,
            } => {
                let image = vk_texture(texture)?.image;
                self.bindless
                    .write_image(&self.device, slot, image, descriptor, view)
            }
        }
    }

    fn clear_descriptor(&mut self, kind: DescriptorHeapKind, slot: u32) {
        if kind == DescriptorHeapKind::Resource {
            self.bindless.clear(&self.device, slot);
        }
    }

    fn submit(
        &mut self,
        queue: QueueType,
        commands: &[GpuCommand<'_>],
    ) -> Result<u64, GraphicsError> {
        profile_scope!("VulkanBackend::submit");
        let cmd = self.acquire_command_buffer()?;
        if let Err(e) = self.record(cmd, commands) {
            self.free_command_buffers.push(cmd);
            return Err(e);
        }

        let value = self.timelines.next_value(queue);
        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.timelines.semaphore(queue))
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        if let Err(e) = unsafe { self.device.queue_submit2(self.queue, &[submit], vk::Fence::null()) }
        {
            self.free_command_buffers.push(cmd);
            return Err(map_device_error(e));
        }

        self.timelines.commit(queue);
        self.pending_layouts.clear();
        self.in_flight.push_back((queue, value, cmd));
        log::trace!(
            "Submitted {} commands to {:?} (value {})",
            commands.len(),
            queue,
            value
        );
        Ok(value)
    }

    fn completed_submission(&mut self, queue: QueueType) -> Result<u64, GraphicsError> {
        self.timelines.completed(&self.device, queue)
    }

    fn wait_submission(&mut self, queue: QueueType, value: u64) -> Result<(), GraphicsError> {
        profile_scope!("VulkanBackend::wait_submission");
        self.timelines.wait(&self.device, queue, value)
    }

    fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        profile_scope!("VulkanBackend::wait_idle");
        unsafe { self.device.device_wait_idle() }.map_err(map_device_error)?;
        self.recycle_command_buffers()
    }
}
