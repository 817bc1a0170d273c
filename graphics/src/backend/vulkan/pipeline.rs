//! Pipeline layout and pipeline creation.
//!
//! Every pipeline shares one layout: set 0 is a push descriptor set holding
//! the three fixed constant slots, set 1 is the bindless table (see
//! [`super::bindless`]), plus a push constant range visible to all stages.
//!
//! | set 0 binding | slot   | type           |
//! |---------------|--------|----------------|
//! | 0             | `Cbv0` | uniform buffer |
//! | 1             | `Srv0` | storage buffer |
//! | 2             | `Srv1` | storage buffer |

use std::io::Cursor;

use ash::vk;

use super::conversion::{convert_cull_mode, convert_texture_format, convert_topology};
use super::debug::label_cstring;
use crate::command_list::BindSlot;
use crate::error::GraphicsError;
use crate::pipeline::{ComputePipelineDescriptor, GraphicsPipelineDescriptor, ShaderModule};

/// Bytes of push constants every pipeline accepts.
pub const PUSH_CONSTANTS_SIZE: u32 = 128;

/// Descriptor binding of a fixed slot.
pub fn slot_binding(slot: BindSlot) -> (u32, vk::DescriptorType) {
    match slot {
        BindSlot::Cbv0 => (0, vk::DescriptorType::UNIFORM_BUFFER),
        BindSlot::Srv0 => (1, vk::DescriptorType::STORAGE_BUFFER),
        BindSlot::Srv1 => (2, vk::DescriptorType::STORAGE_BUFFER),
    }
}

/// Set index of the bindless table.
pub const BINDLESS_SET: u32 = 1;

/// Layout objects shared by every pipeline.
pub struct SharedLayout {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

impl SharedLayout {
    /// Create the push descriptor set layout and the pipeline layout over it
    /// and `bindless_layout`, which stays owned by the caller.
    pub fn new(
        device: &ash::Device,
        bindless_layout: vk::DescriptorSetLayout,
    ) -> Result<Self, GraphicsError> {
        let bindings = [BindSlot::Cbv0, BindSlot::Srv0, BindSlot::Srv1].map(|slot| {
            let (binding, descriptor_type) = slot_binding(slot);
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
        });
        let set_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create descriptor set layout: {:?}",
                    e
                ))
            })?;

        let set_layouts = [set_layout, bindless_layout];
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(PUSH_CONSTANTS_SIZE)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to create pipeline layout: {:?}",
                    e
                )));
            }
        };

        Ok(Self {
            set_layout,
            pipeline_layout,
        })
    }

    /// Destroy both owned layouts. No pipeline may still use them.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        self.pipeline_layout = vk::PipelineLayout::null();
        self.set_layout = vk::DescriptorSetLayout::null();
    }
}

/// Shader module destroyed when dropped.
struct ScopedShader<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl Drop for ScopedShader<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

fn create_shader<'a>(
    device: &'a ash::Device,
    shader: &ShaderModule,
) -> Result<ScopedShader<'a>, GraphicsError> {
    let words = ash::util::read_spv(&mut Cursor::new(&shader.bytecode)).map_err(|e| {
        GraphicsError::InvalidParameter(format!("Invalid SPIR-V bytecode: {}", e))
    })?;
    let info = vk::ShaderModuleCreateInfo::default().code(&words);
    let module = unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create shader module: {:?}", e))
    })?;
    Ok(ScopedShader { device, module })
}

/// Create a compute pipeline.
pub fn create_compute_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    descriptor: &ComputePipelineDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    let shader = create_shader(device, &descriptor.compute)?;
    let entry = label_cstring(&descriptor.compute.entry_point);
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader.module)
        .name(&entry);
    let info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let pipelines =
        unsafe { device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None) }
            .map_err(|(_, e)| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create compute pipeline: {:?}",
                    e
                ))
            })?;

    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::Internal("vkCreateComputePipelines returned no pipeline".into())
    })
}

/// Create a graphics pipeline for dynamic rendering.
///
/// Viewport and scissor are dynamic; there is no vertex input state since
/// vertices are pulled from bindless buffers.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    descriptor: &GraphicsPipelineDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    let vertex = create_shader(device, &descriptor.vertex)?;
    let fragment = create_shader(device, &descriptor.fragment)?;
    let vertex_entry = label_cstring(&descriptor.vertex.entry_point);
    let fragment_entry = label_cstring(&descriptor.fragment.entry_point);

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex.module)
            .name(&vertex_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment.module)
            .name(&fragment_entry),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(descriptor.topology));
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(convert_cull_mode(descriptor.cull_mode))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(descriptor.depth_test)
        .depth_write_enable(descriptor.depth_write)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let blend_attachments: Vec<_> = descriptor
        .color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<vk::Format> = descriptor
        .color_formats
        .iter()
        .map(|format| convert_texture_format(*format))
        .collect();
    let depth_format = descriptor
        .depth_format
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_format = match descriptor.depth_format {
        Some(format) if format.has_stencil() => depth_format,
        _ => vk::Format::UNDEFINED,
    };
    let mut rendering = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .push_next(&mut rendering)
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout);

    let pipelines =
        unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) }
            .map_err(|(_, e)| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create graphics pipeline: {:?}",
                    e
                ))
            })?;

    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::Internal("vkCreateGraphicsPipelines returned no pipeline".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_bindings_are_distinct() {
        assert_eq!(slot_binding(BindSlot::Cbv0).0, 0);
        assert_eq!(slot_binding(BindSlot::Srv0).0, 1);
        assert_eq!(slot_binding(BindSlot::Srv1).0, 2);
        assert_eq!(slot_binding(BindSlot::Cbv0).1, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(slot_binding(BindSlot::Srv1).1, vk::DescriptorType::STORAGE_BUFFER);
    }
}
