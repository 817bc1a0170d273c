//! Resource states used for barrier placement.
//!
//! A resource is always in exactly one [`ResourceState`]. Read-only states can
//! be combined (a texture sampled by a pixel shader and a compute shader in the
//! same pass sits in `ALL_SHADER_RESOURCE`); write states are exclusive.

use bitflags::bitflags;

use super::{BufferUsage, TextureUsage};

bitflags! {
    /// GPU access state of a buffer or texture subresource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceState: u32 {
        /// Usable by copies and as a starting point for everything else.
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 8;
        const COPY_DEST = 1 << 9;
        const COPY_SOURCE = 1 << 10;
        const ACCELERATION_STRUCTURE = 1 << 11;

        /// Upload heap state.
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
        /// Readable from any shader stage.
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
    .union(ResourceState::UNORDERED_ACCESS)
    .union(ResourceState::DEPTH_WRITE)
    .union(ResourceState::COPY_DEST);

impl ResourceState {
    /// Resting state of a buffer with the given usage.
    pub fn for_buffer_usage(usage: BufferUsage) -> Self {
        match usage {
            BufferUsage::General => Self::COMMON,
            BufferUsage::Upload => Self::GENERIC_READ,
            BufferUsage::Readback => Self::COPY_DEST,
            BufferUsage::Index => Self::INDEX_BUFFER,
            BufferUsage::Vertex => Self::VERTEX_AND_CONSTANT_BUFFER,
            BufferUsage::ShaderRead => Self::ALL_SHADER_RESOURCE,
            BufferUsage::ShaderReadWrite => Self::UNORDERED_ACCESS,
            BufferUsage::IndirectArgs => Self::INDIRECT_ARGUMENT,
            BufferUsage::AccelerationStructure => Self::ACCELERATION_STRUCTURE,
        }
    }

    /// Resting state of a texture with the given usage.
    pub fn for_texture_usage(usage: TextureUsage) -> Self {
        match usage {
            TextureUsage::General => Self::COMMON,
            TextureUsage::ShaderRead => Self::ALL_SHADER_RESOURCE,
            TextureUsage::ShaderReadWrite => Self::UNORDERED_ACCESS,
            TextureUsage::RenderTarget => Self::RENDER_TARGET,
            TextureUsage::DepthStencilTarget => Self::DEPTH_WRITE,
        }
    }

    /// Returns true if no write access is included.
    ///
    /// `COMMON` counts as read-only.
    pub fn is_read_only(self) -> bool {
        !self.intersects(WRITE_STATES)
    }

    /// Returns true for the unordered access (shader write) state.
    pub fn is_unordered_access(self) -> bool {
        self.contains(Self::UNORDERED_ACCESS)
    }
}

/// Part of a resource a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    /// Every mip of the resource (always the case for buffers).
    All,
    /// A single mip level.
    Mip(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_states() {
        assert_eq!(
            ResourceState::for_buffer_usage(BufferUsage::Upload),
            ResourceState::GENERIC_READ
        );
        assert_eq!(
            ResourceState::for_buffer_usage(BufferUsage::Readback),
            ResourceState::COPY_DEST
        );
        assert_eq!(
            ResourceState::for_buffer_usage(BufferUsage::ShaderRead),
            ResourceState::ALL_SHADER_RESOURCE
        );
    }

    #[test]
    fn test_texture_usage_states() {
        assert_eq!(
            ResourceState::for_texture_usage(TextureUsage::RenderTarget),
            ResourceState::RENDER_TARGET
        );
        assert_eq!(
            ResourceState::for_texture_usage(TextureUsage::DepthStencilTarget),
            ResourceState::DEPTH_WRITE
        );
        assert_eq!(
            ResourceState::for_texture_usage(TextureUsage::General),
            ResourceState::COMMON
        );
    }

    #[test]
    fn test_read_only() {
        assert!(ResourceState::COMMON.is_read_only());
        assert!(ResourceState::GENERIC_READ.is_read_only());
        assert!(
            (ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::INDIRECT_ARGUMENT)
                .is_read_only()
        );
        assert!(!ResourceState::UNORDERED_ACCESS.is_read_only());
        assert!(!ResourceState::COPY_DEST.is_read_only());
        assert!(!ResourceState::RENDER_TARGET.is_read_only());
    }
}
