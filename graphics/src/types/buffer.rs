//! Buffer types and descriptors.

use bytemuck::{Pod, Zeroable};

use super::TextureFormat;

/// How a buffer is used for its whole lifetime.
///
/// The usage decides the memory location, the resting state and whether the
/// buffer gets a bindless descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    /// Plain device-local memory with no implied view.
    #[default]
    General,
    /// CPU-writable staging memory.
    Upload,
    /// CPU-readable memory for GPU to CPU copies.
    Readback,
    /// Index buffer.
    Index,
    /// Vertex buffer.
    Vertex,
    /// Read-only shader resource (typed, structured or raw).
    ShaderRead,
    /// Read-write shader resource.
    ShaderReadWrite,
    /// Indirect draw/dispatch arguments.
    IndirectArgs,
    /// Ray tracing acceleration structure storage.
    AccelerationStructure,
}

impl BufferUsage {
    /// Returns true if the buffer lives in host-visible memory.
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }
}

/// Descriptor for creating a buffer.
///
/// The label is ignored by equality so that views and graph resources compare
/// by shape only.
#[derive(Debug, Clone, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Element stride for structured buffers (0 when not structured).
    pub stride: u32,
    /// Element format for typed buffers.
    pub format: Option<TextureFormat>,
    /// Usage.
    pub usage: BufferUsage,
    /// Keep the buffer persistently mapped.
    pub mappable: bool,
    /// Raw (byte address) access.
    pub raw: bool,
}

impl PartialEq for BufferDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.stride == other.stride
            && self.format == other.format
            && self.usage == other.usage
            && self.mappable == other.mappable
            && self.raw == other.raw
    }
}

impl Eq for BufferDescriptor {}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            stride: 0,
            format: None,
            usage,
            mappable: usage.is_host_visible(),
            raw: false,
        }
    }

    /// Read-only structured buffer of `count` elements.
    pub fn structured(count: u64, stride: u32) -> Self {
        Self {
            stride,
            ..Self::new(count * stride as u64, BufferUsage::ShaderRead)
        }
    }

    /// Read-write structured buffer of `count` elements.
    pub fn rw_structured(count: u64, stride: u32) -> Self {
        Self {
            stride,
            ..Self::new(count * stride as u64, BufferUsage::ShaderReadWrite)
        }
    }

    /// Read-only byte address buffer.
    pub fn byte_address(size: u64) -> Self {
        Self {
            raw: true,
            ..Self::new(size, BufferUsage::ShaderRead)
        }
    }

    /// Read-write byte address buffer.
    pub fn rw_byte_address(size: u64) -> Self {
        Self {
            raw: true,
            ..Self::new(size, BufferUsage::ShaderReadWrite)
        }
    }

    /// Read-only typed buffer of `count` elements of `format`.
    pub fn typed(count: u64, format: TextureFormat) -> Self {
        Self {
            format: Some(format),
            ..Self::new(count * format.block_size() as u64, BufferUsage::ShaderRead)
        }
    }

    /// Persistently mapped staging buffer.
    pub fn upload(size: u64) -> Self {
        Self::new(size, BufferUsage::Upload)
    }

    /// CPU-readable destination buffer.
    pub fn readback(size: u64) -> Self {
        Self::new(size, BufferUsage::Readback)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the usage, keeping size and layout.
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Returns true if a shader-read view of this buffer is meaningful.
    pub fn is_shader_viewable(&self) -> bool {
        self.format.is_some()
            || self.stride != 0
            || self.raw
            || self.usage == BufferUsage::AccelerationStructure
    }

    /// Label or a placeholder, for logs.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or("<unnamed buffer>")
    }
}

// ============================================================================
// Indirect Arguments
// ============================================================================

/// Arguments for a non-indexed indirect draw call.
///
/// Layout matches `vkCmdDrawIndirect`: 16 bytes, 4-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    /// Number of vertices to draw.
    pub vertex_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first vertex to draw.
    pub first_vertex: u32,
    /// Instance ID of the first instance to draw.
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create new indirect draw arguments.
    pub fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Arguments for an indexed indirect draw call.
///
/// Layout matches `vkCmdDrawIndexedIndirect`: 20 bytes, 4-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first index to draw.
    pub first_index: u32,
    /// Value added to each index before reading from the vertex buffer.
    pub base_vertex: i32,
    /// Instance ID of the first instance to draw.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create new indexed indirect draw arguments.
    pub fn new(index_count: u32, instance_count: u32) -> Self {
        Self {
            index_count,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Arguments for an indirect dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    /// Workgroups in X.
    pub x: u32,
    /// Workgroups in Y.
    pub y: u32,
    /// Workgroups in Z.
    pub z: u32,
}

impl DispatchIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_sizes() {
        assert_eq!(DrawIndirectArgs::SIZE, 16);
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(DispatchIndirectArgs::SIZE, 12);
        let args = DrawIndirectArgs::new(36, 100);
        assert_eq!(bytemuck::bytes_of(&args).len(), 16);
    }

    #[test]
    fn test_equality_ignores_label() {
        let a = BufferDescriptor::structured(64, 16).with_label("a");
        let b = BufferDescriptor::structured(64, 16).with_label("b");
        assert_eq!(a, b);
        assert_ne!(a, BufferDescriptor::rw_structured(64, 16));
    }

    #[test]
    fn test_shader_viewable() {
        assert!(BufferDescriptor::structured(4, 4).is_shader_viewable());
        assert!(BufferDescriptor::byte_address(16).is_shader_viewable());
        assert!(BufferDescriptor::typed(4, TextureFormat::R32Float).is_shader_viewable());
        assert!(!BufferDescriptor::new(16, BufferUsage::ShaderRead).is_shader_viewable());
        assert!(
            BufferDescriptor::new(16, BufferUsage::AccelerationStructure).is_shader_viewable()
        );
    }

    #[test]
    fn test_host_visible_defaults_mappable() {
        assert!(BufferDescriptor::upload(64).mappable);
        assert!(BufferDescriptor::readback(64).mappable);
        assert!(!BufferDescriptor::new(64, BufferUsage::Vertex).mappable);
    }

    #[test]
    fn test_typed_size() {
        let desc = BufferDescriptor::typed(10, TextureFormat::Rgba32Float);
        assert_eq!(desc.size, 160);
    }
}
