//! GPU backend abstraction layer.
//!
//! The device talks to the GPU only through the [`GpuBackend`] trait. Backends
//! see raw allocations and fully resolved command streams; handles, descriptor
//! tables and deferred releases live above this layer.
//!
//! # Available Backends
//!
//! - `dummy` (default): in-memory backend used by tests and headless tools
//! - `vulkan-backend`: native Vulkan backend using ash and gpu-allocator
//!
//! # Ownership
//!
//! Raw objects ([`GpuBuffer`], [`GpuTexture`], ...) are created by a backend
//! and must be handed back to the same backend's `destroy_*`. The device
//! shares them between views through `Arc` and destroys each one exactly once,
//! after the GPU is done with it.

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use smallvec::SmallVec;

use crate::command_list::{BindSlot, IndexFormat, QueueType};
use crate::descriptor::{DescriptorHeapKind, DescriptorView};
use crate::error::GraphicsError;
use crate::pipeline::PipelineDescriptor;
use crate::types::{
    BufferDescriptor, ClearValue, ResourceDescriptor, ResourceState, ScissorRect,
    TextureDescriptor, Viewport,
};

pub use dummy::{DUMMY_TICKS_PER_COMMAND, DummyBackend, DummyDescriptor, DummyStats};

/// Which backend a device should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// In-memory backend, always available.
    Dummy,
    /// Vulkan backend (requires the `vulkan-backend` feature).
    Vulkan,
    /// Vulkan when it can be created, dummy otherwise.
    #[default]
    Auto,
}

impl BackendType {
    /// Parse a backend name as used by `FRAMEGRAPH_BACKEND`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dummy" => Some(Self::Dummy),
            "vulkan" | "vk" => Some(Self::Vulkan),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Memory requirements of a resource placed in a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocationInfo {
    /// Size in bytes.
    pub size: u64,
    /// Required alignment of the placement offset.
    pub alignment: u64,
}

/// Raw GPU buffer.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum GpuBuffer {
    /// Dummy backend buffer.
    Dummy {
        /// Backend-unique id.
        id: u64,
        /// Size in bytes.
        size: u64,
    },
    /// Vulkan backend buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanBuffer),
}

/// Raw GPU texture.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum GpuTexture {
    /// Dummy backend texture.
    Dummy {
        /// Backend-unique id.
        id: u64,
    },
    /// Vulkan backend texture.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanTexture),
}

/// Raw memory heap resources can be placed in.
#[derive(Debug)]
pub enum GpuHeap {
    /// Dummy backend heap.
    Dummy {
        /// Backend-unique id.
        id: u64,
        /// Size in bytes.
        size: u64,
    },
    /// Vulkan backend heap.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanHeap),
}

impl GpuHeap {
    /// Size of the heap in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(heap) => heap.size,
        }
    }
}

/// Raw pipeline state object.
#[derive(Debug)]
pub enum GpuPipeline {
    /// Dummy backend pipeline.
    Dummy {
        /// Backend-unique id.
        id: u64,
        /// Compute or graphics.
        compute: bool,
    },
    /// Vulkan backend pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanPipeline),
}

/// Raw pool of GPU timestamp queries.
#[derive(Debug)]
pub enum GpuQueryPool {
    /// Dummy backend pool.
    Dummy {
        /// Backend-unique id.
        id: u64,
        /// Number of queries.
        count: u32,
    },
    /// Vulkan backend pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanQueryPool),
}

impl GpuQueryPool {
    /// Number of queries in the pool.
    pub fn count(&self) -> u32 {
        match self {
            Self::Dummy { count, .. } => *count,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(pool) => pool.count,
        }
    }
}

/// Resource a descriptor slot is written with, together with the
/// descriptor of the view (which may cover part of the allocation).
#[derive(Debug, Clone, Copy)]
pub enum GpuView<'a> {
    /// A buffer view.
    Buffer {
        buffer: &'a GpuBuffer,
        descriptor: &'a BufferDescriptor,
    },
    /// A texture view over `descriptor.base_mip..+mip_levels`.
    Texture {
        texture: &'a GpuTexture,
        descriptor: &'a TextureDescriptor,
    },
}

/// Resource referenced by a resolved barrier.
#[derive(Debug, Clone, Copy)]
pub enum GpuResource<'a> {
    /// A buffer.
    Buffer(&'a GpuBuffer),
    /// A texture.
    Texture(&'a GpuTexture),
}

/// Resolved state transition.
#[derive(Debug, Clone, Copy)]
pub struct GpuBarrier<'a> {
    /// Transitioned resource.
    pub resource: GpuResource<'a>,
    /// First absolute mip (0 for buffers).
    pub base_mip: u32,
    /// Mip count (1 for buffers).
    pub mip_count: u32,
    /// State before the barrier.
    pub before: ResourceState,
    /// State after the barrier.
    pub after: ResourceState,
}

/// One resolved attachment.
#[derive(Debug, Clone, Copy)]
pub struct GpuAttachment<'a> {
    /// Attached texture.
    pub texture: &'a GpuTexture,
    /// Absolute mip rendered to.
    pub mip: u32,
    /// Width of that mip.
    pub width: u32,
    /// Height of that mip.
    pub height: u32,
}

/// Command with every handle resolved to a raw backend object.
#[derive(Debug, Clone)]
pub enum GpuCommand<'a> {
    /// Bind a pipeline.
    SetPipeline(&'a GpuPipeline),
    /// Push root constants.
    PushConstants(&'a [u8]),
    /// Bind a buffer range to a fixed slot.
    BindBuffer {
        slot: BindSlot,
        buffer: &'a GpuBuffer,
        offset: u64,
    },
    /// Bind an index buffer.
    BindIndexBuffer {
        buffer: &'a GpuBuffer,
        offset: u64,
        format: IndexFormat,
    },
    /// Bind a vertex buffer.
    BindVertexBuffer {
        slot: u32,
        buffer: &'a GpuBuffer,
        offset: u64,
    },
    /// Set the viewport.
    SetViewport(Viewport),
    /// Set the scissor rectangle.
    SetScissor(ScissorRect),
    /// Set color and depth attachments.
    SetRenderTargets {
        colors: SmallVec<[GpuAttachment<'a>; 8]>,
        depth: Option<GpuAttachment<'a>>,
    },
    /// Non-indexed draw.
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    /// Indirect draw reading arguments from a buffer.
    DrawIndirect {
        buffer: &'a GpuBuffer,
        offset: u64,
        draw_count: u32,
        indexed: bool,
    },
    /// Compute dispatch.
    Dispatch { x: u32, y: u32, z: u32 },
    /// Indirect compute dispatch.
    DispatchIndirect { buffer: &'a GpuBuffer, offset: u64 },
    /// Buffer to buffer copy.
    CopyBuffer {
        src: &'a GpuBuffer,
        src_offset: u64,
        dst: &'a GpuBuffer,
        dst_offset: u64,
        size: u64,
    },
    /// Buffer to texture copy of one mip.
    CopyBufferToTexture {
        src: &'a GpuBuffer,
        src_offset: u64,
        row_pitch: u32,
        dst: &'a GpuTexture,
        mip: u32,
        width: u32,
        height: u32,
        depth: u32,
    },
    /// Clear a mip range of a texture.
    ClearTexture {
        texture: &'a GpuTexture,
        base_mip: u32,
        mip_count: u32,
        value: ClearValue,
    },
    /// Fill a buffer with a 32-bit value.
    ClearBuffer { buffer: &'a GpuBuffer, value: u32 },
    /// A batch of state transitions.
    Barriers(SmallVec<[GpuBarrier<'a>; 4]>),
    /// Mark `count` queries from `first` unavailable before they are rewritten.
    ResetQueries {
        pool: &'a GpuQueryPool,
        first: u32,
        count: u32,
    },
    /// Write the GPU clock into query `index` once prior work completes.
    WriteTimestamp { pool: &'a GpuQueryPool, index: u32 },
    /// Copy `count` queries from `first` into `dst` as little-endian `u64`s.
    ResolveQueries {
        pool: &'a GpuQueryPool,
        first: u32,
        count: u32,
        dst: &'a GpuBuffer,
        offset: u64,
    },
    /// Open a debug region.
    BeginMarker(&'a str),
    /// Close the last debug region.
    EndMarker,
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Submissions are identified by monotonically increasing per-queue values;
/// a value is complete once the GPU has finished every command submitted with
/// it or before it on the same queue.
pub trait GpuBackend: Send + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer in its own allocation.
    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture in its own allocation.
    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError>;

    /// Destroy a buffer. The GPU must no longer use it.
    fn destroy_buffer(&mut self, buffer: GpuBuffer);

    /// Destroy a texture. The GPU must no longer use it.
    fn destroy_texture(&mut self, texture: GpuTexture);

    /// Size and alignment a resource needs when placed in a heap.
    fn allocation_info(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<AllocationInfo, GraphicsError>;

    /// Create a heap of `size` bytes.
    fn create_heap(&mut self, size: u64, alignment: u64) -> Result<GpuHeap, GraphicsError>;

    /// Destroy a heap. Resources placed in it must already be destroyed.
    fn destroy_heap(&mut self, heap: GpuHeap);

    /// Create a buffer placed at `offset` inside `heap`.
    ///
    /// Backends without placement support fall back to a dedicated allocation.
    fn create_placed_buffer(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError> {
        let _ = (heap, offset);
        self.create_buffer(descriptor, initial_state)
    }

    /// Create a texture placed at `offset` inside `heap`.
    ///
    /// Backends without placement support fall back to a dedicated allocation.
    fn create_placed_texture(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError> {
        let _ = (heap, offset);
        self.create_texture(descriptor, initial_state)
    }

    /// Write into a host-visible buffer.
    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Read from a host-visible buffer.
    fn read_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError>;

    /// Create a pipeline state object.
    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor,
    ) -> Result<GpuPipeline, GraphicsError>;

    /// Destroy a pipeline state object.
    fn destroy_pipeline(&mut self, pipeline: GpuPipeline);

    /// Create a pool of `count` timestamp queries.
    fn create_query_pool(&mut self, count: u32) -> Result<GpuQueryPool, GraphicsError>;

    /// Destroy a query pool. The GPU must no longer use it.
    fn destroy_query_pool(&mut self, pool: GpuQueryPool);

    /// Nanoseconds per timestamp tick, 0 when the queue cannot write
    /// timestamps.
    fn timestamp_period(&self) -> f64;

    /// Point descriptor `slot` of heap `kind` at `resource`.
    ///
    /// For the shader-visible heap the slot is the bindless index shaders
    /// use; backends without GPU-side attachment heaps may ignore the other
    /// kinds.
    fn write_descriptor(
        &mut self,
        kind: DescriptorHeapKind,
        slot: u32,
        view: DescriptorView,
        resource: GpuView<'_>,
    ) -> Result<(), GraphicsError>;

    /// Forget what descriptor `slot` of heap `kind` points at. The GPU must
    /// no longer use it.
    fn clear_descriptor(&mut self, kind: DescriptorHeapKind, slot: u32);

    /// Execute a resolved command stream and return its submission value.
    fn submit(
        &mut self,
        queue: QueueType,
        commands: &[GpuCommand<'_>],
    ) -> Result<u64, GraphicsError>;

    /// Latest submission value known to be complete on `queue`.
    fn completed_submission(&mut self, queue: QueueType) -> Result<u64, GraphicsError>;

    /// Block until `value` is complete on `queue`.
    fn wait_submission(&mut self, queue: QueueType, value: u64) -> Result<(), GraphicsError>;

    /// Block until every queue is idle.
    fn wait_idle(&mut self) -> Result<(), GraphicsError>;
}

/// Create the backend requested by `backend_type`.
///
/// `bindless_capacity` sizes the shader-visible descriptor table. `Auto`
/// tries Vulkan first (when compiled in) and falls back to the dummy backend
/// with a warning.
pub fn create_backend(
    backend_type: BackendType,
    validation: bool,
    bindless_capacity: u32,
) -> Result<Box<dyn GpuBackend>, GraphicsError> {
    match backend_type {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Box::new(DummyBackend::new()))
        }
        BackendType::Vulkan => create_vulkan(validation, bindless_capacity),
        BackendType::Auto => match create_vulkan(validation, bindless_capacity) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Vulkan backend unavailable ({e}), falling back to dummy backend");
                Ok(Box::new(DummyBackend::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan(
    validation: bool,
    bindless_capacity: u32,
) -> Result<Box<dyn GpuBackend>, GraphicsError> {
    let backend = vulkan::VulkanBackend::new(validation, bindless_capacity)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Box::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan(
    _validation: bool,
    _bindless_capacity: u32,
) -> Result<Box<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::FeatureNotSupported(
        "built without the vulkan-backend feature".into(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_from_name() {
        assert_eq!(BackendType::from_name("Dummy"), Some(BackendType::Dummy));
        assert_eq!(BackendType::from_name(" vk "), Some(BackendType::Vulkan));
        assert_eq!(BackendType::from_name("auto"), Some(BackendType::Auto));
        assert_eq!(BackendType::from_name("metal"), None);
    }

    #[test]
    fn test_create_dummy() {
        let backend = create_backend(BackendType::Dummy, false, 16).unwrap();
        assert_eq!(backend.name(), "Dummy");
    }

    #[cfg(not(feature = "vulkan-backend"))]
    #[test]
    fn test_auto_falls_back_to_dummy() {
        let backend = create_backend(BackendType::Auto, false, 16).unwrap();
        assert_eq!(backend.name(), "Dummy");
        assert!(matches!(
            create_backend(BackendType::Vulkan, false, 16),
            Err(GraphicsError::FeatureNotSupported(_))
        ));
    }
}
