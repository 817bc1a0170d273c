//! Type conversions between framegraph types and Vulkan types.

use ash::vk;

use crate::error::GraphicsError;
use crate::pipeline::{CullMode, PrimitiveTopology};
use crate::types::{BufferDescriptor, BufferUsage, ResourceState, TextureFormat, TextureUsage};

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        // 8-bit formats
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R8Snorm => vk::Format::R8_SNORM,
        TextureFormat::R8Uint => vk::Format::R8_UINT,
        TextureFormat::R8Sint => vk::Format::R8_SINT,

        // 16-bit formats
        TextureFormat::R16Unorm => vk::Format::R16_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,

        // 32-bit formats
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,

        // 64-bit formats
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,

        // 128-bit formats
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        // Depth/stencil formats
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24Plus => vk::Format::D32_SFLOAT, // no portable D24 without stencil
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

fn is_srgb(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
    )
}

/// Aspect mask covering every plane of `format`.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Buffer usage flags for a descriptor.
///
/// Every buffer can be copied from and to; the rest follows the usage.
pub fn convert_buffer_usage(descriptor: &BufferDescriptor) -> vk::BufferUsageFlags {
    let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let typed = descriptor.format.is_some();
    let usage = match descriptor.usage {
        BufferUsage::General | BufferUsage::AccelerationStructure => {
            vk::BufferUsageFlags::STORAGE_BUFFER
        }
        BufferUsage::Upload => {
            vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::INDIRECT_BUFFER
        }
        BufferUsage::Readback => vk::BufferUsageFlags::empty(),
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::ShaderRead if typed => {
            vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
        }
        BufferUsage::ShaderRead => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::ShaderReadWrite if typed => {
            vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
        }
        BufferUsage::ShaderReadWrite => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::IndirectArgs => {
            vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
        }
    };
    usage | transfer
}

/// Image usage flags for a texture.
///
/// Every image can be sampled and copied; storage and attachment bits follow
/// the usage.
pub fn convert_texture_usage(
    usage: TextureUsage,
    format: TextureFormat,
) -> Result<vk::ImageUsageFlags, GraphicsError> {
    let mut result = vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST;

    match usage {
        TextureUsage::General | TextureUsage::ShaderRead => {}
        TextureUsage::ShaderReadWrite => {
            if is_srgb(format) || format.is_depth_stencil() {
                return Err(GraphicsError::ResourceCreationFailed(format!(
                    "{format:?} cannot be used as a storage image"
                )));
            }
            result |= vk::ImageUsageFlags::STORAGE;
        }
        TextureUsage::RenderTarget => result |= vk::ImageUsageFlags::COLOR_ATTACHMENT,
        TextureUsage::DepthStencilTarget => {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        }
    }

    Ok(result)
}

/// Convert PrimitiveTopology to Vulkan topology.
pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

/// Convert CullMode to Vulkan cull mode flags.
pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Pipeline stages, accesses and image layout implied by a resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateAccess {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

const fn stages(a: vk::PipelineStageFlags2, b: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::from_raw(a.as_raw() | b.as_raw())
}

const fn accesses(a: vk::AccessFlags2, b: vk::AccessFlags2) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_raw(a.as_raw() | b.as_raw())
}

const SHADER_STAGES: vk::PipelineStageFlags2 = stages(
    stages(
        vk::PipelineStageFlags2::VERTEX_SHADER,
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
    ),
    vk::PipelineStageFlags2::COMPUTE_SHADER,
);

const DEPTH_STAGES: vk::PipelineStageFlags2 = stages(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
    vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
);

const SHADER_READ: vk::AccessFlags2 = accesses(
    vk::AccessFlags2::SHADER_SAMPLED_READ,
    vk::AccessFlags2::SHADER_STORAGE_READ,
);

/// Per-flag mapping; `UNDEFINED` marks flags that carry no image layout.
type StateEntry = (
    ResourceState,
    vk::PipelineStageFlags2,
    vk::AccessFlags2,
    vk::ImageLayout,
);

const STATE_TABLE: [StateEntry; 12] = [
    (
        ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        stages(vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT, SHADER_STAGES),
        accesses(
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            vk::AccessFlags2::UNIFORM_READ,
        ),
        vk::ImageLayout::UNDEFINED,
    ),
    (
        ResourceState::INDEX_BUFFER,
        vk::PipelineStageFlags2::INDEX_INPUT,
        vk::AccessFlags2::INDEX_READ,
        vk::ImageLayout::UNDEFINED,
    ),
    (
        ResourceState::RENDER_TARGET,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        accesses(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    ),
    (
        ResourceState::UNORDERED_ACCESS,
        SHADER_STAGES,
        accesses(
            vk::AccessFlags2::SHADER_STORAGE_READ,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        vk::ImageLayout::GENERAL,
    ),
    (
        ResourceState::DEPTH_WRITE,
        DEPTH_STAGES,
        accesses(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    ),
    (
        ResourceState::DEPTH_READ,
        DEPTH_STAGES,
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    ),
    (
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
        stages(
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        ),
        SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ),
    (
        ResourceState::PIXEL_SHADER_RESOURCE,
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ),
    (
        ResourceState::INDIRECT_ARGUMENT,
        vk::PipelineStageFlags2::DRAW_INDIRECT,
        vk::AccessFlags2::INDIRECT_COMMAND_READ,
        vk::ImageLayout::UNDEFINED,
    ),
    (
        ResourceState::COPY_DEST,
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    ),
    (
        ResourceState::COPY_SOURCE,
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    ),
    (
        ResourceState::ACCELERATION_STRUCTURE,
        vk::PipelineStageFlags2::ALL_COMMANDS,
        accesses(vk::AccessFlags2::MEMORY_READ, vk::AccessFlags2::MEMORY_WRITE),
        vk::ImageLayout::UNDEFINED,
    ),
];

fn merge_layouts(a: vk::ImageLayout, b: vk::ImageLayout) -> vk::ImageLayout {
    match (a, b) {
        (a, b) if a == b => a,
        (vk::ImageLayout::UNDEFINED, other) | (other, vk::ImageLayout::UNDEFINED) => other,
        (vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        | (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL) => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        _ => vk::ImageLayout::GENERAL,
    }
}

/// Map a (possibly combined) resource state to synchronization2 terms.
///
/// `COMMON` waits on and makes visible all memory and uses the `GENERAL`
/// layout. Combined read states whose layouts disagree also fall back to
/// `GENERAL`.
pub fn state_access(state: ResourceState) -> StateAccess {
    if state.is_empty() {
        return StateAccess {
            stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            access: vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            layout: vk::ImageLayout::GENERAL,
        };
    }

    let mut result = StateAccess {
        stage: vk::PipelineStageFlags2::empty(),
        access: vk::AccessFlags2::empty(),
        layout: vk::ImageLayout::UNDEFINED,
    };
    for (flag, stage, access, layout) in STATE_TABLE {
        if state.contains(flag) {
            result.stage |= stage;
            result.access |= access;
            result.layout = merge_layouts(result.layout, layout);
        }
    }
    if result.layout == vk::ImageLayout::UNDEFINED {
        result.layout = vk::ImageLayout::GENERAL;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats_use_depth_aspect() {
        assert_eq!(
            aspect_mask(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(TextureFormat::Rgba8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_single_state_layouts() {
        assert_eq!(
            state_access(ResourceState::RENDER_TARGET).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            state_access(ResourceState::UNORDERED_ACCESS).layout,
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            state_access(ResourceState::COPY_DEST).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            state_access(ResourceState::COMMON).stage,
            vk::PipelineStageFlags2::ALL_COMMANDS
        );
    }

    #[test]
    fn test_combined_read_states() {
        let shader = state_access(ResourceState::ALL_SHADER_RESOURCE);
        assert_eq!(shader.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(shader.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(shader.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));

        let depth = state_access(ResourceState::DEPTH_READ | ResourceState::PIXEL_SHADER_RESOURCE);
        assert_eq!(depth.layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);

        // Shader reads and copy reads disagree on the layout.
        assert_eq!(
            state_access(ResourceState::GENERIC_READ).layout,
            vk::ImageLayout::GENERAL
        );
    }

    #[test]
    fn test_buffer_only_states_fall_back_to_general() {
        let index = state_access(ResourceState::INDEX_BUFFER);
        assert_eq!(index.layout, vk::ImageLayout::GENERAL);
        assert_eq!(index.access, vk::AccessFlags2::INDEX_READ);
    }

    #[test]
    fn test_storage_usage_rejects_srgb() {
        assert!(
            convert_texture_usage(TextureUsage::ShaderReadWrite, TextureFormat::Rgba8UnormSrgb)
                .is_err()
        );
        let usage =
            convert_texture_usage(TextureUsage::ShaderReadWrite, TextureFormat::Rgba8Unorm).unwrap();
        assert!(usage.contains(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn test_upload_buffers_bind_as_constants() {
        let usage = convert_buffer_usage(&BufferDescriptor::upload(256));
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }
}
