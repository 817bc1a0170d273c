//! Common types and descriptors for graphics resources.
//!
//! Format enums, usages, resource states and descriptor structs used
//! throughout the crate.

mod buffer;
mod common;
mod state;
mod texture;

pub use buffer::{
    BufferDescriptor, BufferUsage, DispatchIndirectArgs, DrawIndexedIndirectArgs, DrawIndirectArgs,
};
pub use common::{ClearValue, ScissorRect, Viewport};
pub use state::{ResourceState, Subresource};
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};

/// Descriptor of either resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDescriptor {
    /// A buffer.
    Buffer(BufferDescriptor),
    /// A texture.
    Texture(TextureDescriptor),
}

impl ResourceDescriptor {
    /// Returns true for buffers.
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Returns true for textures.
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }

    /// Number of barrier-tracked subresources.
    pub fn subresource_count(&self) -> u32 {
        match self {
            Self::Buffer(_) => 1,
            Self::Texture(desc) => desc.subresource_count(),
        }
    }

    /// Resting state for the descriptor's usage.
    pub fn default_state(&self) -> ResourceState {
        match self {
            Self::Buffer(desc) => ResourceState::for_buffer_usage(desc.usage),
            Self::Texture(desc) => ResourceState::for_texture_usage(desc.usage),
        }
    }

    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Buffer(desc) => desc.label.as_deref(),
            Self::Texture(desc) => desc.label.as_deref(),
        }
    }
}

impl From<BufferDescriptor> for ResourceDescriptor {
    fn from(desc: BufferDescriptor) -> Self {
        Self::Buffer(desc)
    }
}

impl From<TextureDescriptor> for ResourceDescriptor {
    fn from(desc: TextureDescriptor) -> Self {
        Self::Texture(desc)
    }
}
