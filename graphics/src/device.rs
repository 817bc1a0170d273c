//! Graphics device.
//!
//! The [`Device`] is the only way to obtain or destroy GPU resources. It owns
//! the backend, generation-checked pools for every object kind, one
//! [`DescriptorTable`] per heap, per-frame upload buffers and the deferred
//! release queue.
//!
//! # Frames
//!
//! The CPU records frame N+1 while the GPU may still execute frame N, bounded by
//! `frame_count` frames in flight. Every submission is remembered as the fence
//! value of the current frame slot; [`Device::on_update`] advances the frame
//! counter and blocks on the fence of the slot it is about to reuse. That is
//! the only place the device waits for the GPU.
//!
//! # Resource lifetime
//!
//! Releasing a resource removes its handle immediately (later lookups fail with
//! [`GraphicsError::InvalidHandle`]) and queues the backing allocation and
//! descriptor stamped with the frame counter. They are destroyed by the first
//! `on_update` that reaches `stamp + frame_count + 1`.
//!
//! # Example
//!
//! ```
//! use framegraph::device::{Device, DeviceConfig};
//! use framegraph::types::BufferDescriptor;
//!
//! let mut device = Device::new(DeviceConfig::dummy()).unwrap();
//! let buffer = device
//!     .create_buffer(&BufferDescriptor::structured(64, 16).with_label("instances"))
//!     .unwrap();
//! let slot = device.bindless_heap_index(buffer).unwrap();
//! # let _ = slot;
//!
//! device.release_buffer(buffer).unwrap();
//! assert!(device.buffer(buffer).is_err());
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use framegraph_core::pool::{Handle, HandlePool};
use framegraph_core::profiling::{frame_mark, profile_function, profile_plot};
use smallvec::SmallVec;

use crate::backend::{
    self, AllocationInfo, BackendType, GpuAttachment, GpuBackend, GpuBarrier, GpuBuffer,
    GpuCommand, GpuHeap, GpuPipeline, GpuQueryPool, GpuResource, GpuTexture, GpuView,
};
use crate::command_list::{
    Command, CommandList, CommandListState, QueueType, ResourceBarrier, TextureAttachment,
};
use crate::deferred::{DeferredQueue, DeferredRelease};
use crate::descriptor::{
    DescriptorEntry, DescriptorHeapKind, DescriptorId, DescriptorTable, DescriptorView,
};
use crate::error::GraphicsError;
use crate::pipeline::{ComputePipelineDescriptor, GraphicsPipelineDescriptor, PipelineDescriptor};
use crate::types::{
    BufferDescriptor, BufferUsage, ResourceDescriptor, ResourceState, Subresource,
    TextureDescriptor, TextureUsage,
};

/// Row pitch alignment for buffer to texture copies.
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;
/// Offset alignment for buffer to texture copies.
const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;
/// Offset alignment for buffer uploads.
const BUFFER_UPLOAD_ALIGNMENT: u64 = 16;

/// Handle of a buffer or buffer view.
pub type BufferId = Handle<Buffer>;
/// Handle of a texture or texture view.
pub type TextureId = Handle<Texture>;
/// Handle of a memory heap.
pub type HeapId = Handle<Heap>;
/// Handle of a pipeline state object.
pub type PipelineId = Handle<Pipeline>;
/// Handle of a timestamp query pool.
pub type QueryPoolId = Handle<QueryPool>;

/// Handle of either resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A buffer.
    Buffer(BufferId),
    /// A texture.
    Texture(TextureId),
}

impl From<BufferId> for ResourceId {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<TextureId> for ResourceId {
    fn from(id: TextureId) -> Self {
        Self::Texture(id)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Backend selection.
    pub backend: BackendType,
    /// Frames the CPU may run ahead of the GPU.
    pub frame_count: u32,
    /// Enable API validation (Vulkan validation layers).
    pub validation: bool,
    /// Minimum size of a newly created upload buffer.
    pub upload_chunk_size: u64,
    /// Capacity of the shader-visible resource heap.
    pub resource_descriptors: u32,
    /// Capacity of the render-target heap.
    pub render_target_descriptors: u32,
    /// Capacity of the depth-stencil heap.
    pub depth_stencil_descriptors: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            frame_count: 2,
            validation: cfg!(debug_assertions),
            upload_chunk_size: 4 * 1024 * 1024,
            resource_descriptors: 65_536,
            render_target_descriptors: 1_024,
            depth_stencil_descriptors: 256,
        }
    }
}

impl DeviceConfig {
    /// Default configuration on the dummy backend.
    pub fn dummy() -> Self {
        Self::default().with_backend(BackendType::Dummy)
    }

    /// Defaults overridden by `FRAMEGRAPH_BACKEND`, `FRAMEGRAPH_FRAME_COUNT`
    /// and `FRAMEGRAPH_VALIDATION`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("FRAMEGRAPH_BACKEND") {
            match BackendType::from_name(&value) {
                Some(backend) => config.backend = backend,
                None => log::warn!("Ignoring unknown FRAMEGRAPH_BACKEND '{}'", value),
            }
        }
        if let Some(value) = lookup("FRAMEGRAPH_FRAME_COUNT") {
            match value.trim().parse::<u32>() {
                Ok(count) if count > 0 => config.frame_count = count,
                _ => log::warn!("Ignoring invalid FRAMEGRAPH_FRAME_COUNT '{}'", value),
            }
        }
        if let Some(value) = lookup("FRAMEGRAPH_VALIDATION") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => config.validation = true,
                "0" | "false" | "off" => config.validation = false,
                _ => log::warn!("Ignoring invalid FRAMEGRAPH_VALIDATION '{}'", value),
            }
        }
        config
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the minimum upload buffer size.
    pub fn with_upload_chunk_size(mut self, size: u64) -> Self {
        self.upload_chunk_size = size;
        self
    }

    /// Set the capacity of one descriptor heap.
    pub fn with_descriptor_capacity(mut self, kind: DescriptorHeapKind, capacity: u32) -> Self {
        match kind {
            DescriptorHeapKind::Resource => self.resource_descriptors = capacity,
            DescriptorHeapKind::RenderTarget => self.render_target_descriptors = capacity,
            DescriptorHeapKind::DepthStencil => self.depth_stencil_descriptors = capacity,
        }
        self
    }

    fn descriptor_capacity(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::Resource => self.resource_descriptors,
            DescriptorHeapKind::RenderTarget => self.render_target_descriptors,
            DescriptorHeapKind::DepthStencil => self.depth_stencil_descriptors,
        }
    }
}

// ============================================================================
// Pooled objects
// ============================================================================

/// A buffer or buffer view.
#[derive(Debug)]
pub struct Buffer {
    desc: BufferDescriptor,
    allocation: Arc<GpuBuffer>,
    descriptor: Option<(DescriptorHeapKind, DescriptorId)>,
    state: ResourceState,
}

impl Buffer {
    /// Descriptor the buffer (or view) was created with.
    pub fn desc(&self) -> &BufferDescriptor {
        &self.desc
    }

    /// Backing allocation, shared with views.
    pub fn allocation(&self) -> &Arc<GpuBuffer> {
        &self.allocation
    }

    /// Bindless descriptor, if the usage has one.
    pub fn descriptor(&self) -> Option<(DescriptorHeapKind, DescriptorId)> {
        self.descriptor
    }

    /// Resting state between uses.
    pub fn state(&self) -> ResourceState {
        self.state
    }
}

/// A texture or texture view.
#[derive(Debug)]
pub struct Texture {
    desc: TextureDescriptor,
    allocation: Arc<GpuTexture>,
    descriptor: Option<(DescriptorHeapKind, DescriptorId)>,
    state: ResourceState,
    /// Mip count of the underlying allocation.
    chain_mips: u32,
}

impl Texture {
    /// Descriptor the texture (or view) was created with.
    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Backing allocation, shared with views.
    pub fn allocation(&self) -> &Arc<GpuTexture> {
        &self.allocation
    }

    /// Bindless descriptor, if the usage has one.
    pub fn descriptor(&self) -> Option<(DescriptorHeapKind, DescriptorId)> {
        self.descriptor
    }

    /// Resting state between uses.
    pub fn state(&self) -> ResourceState {
        self.state
    }
}

/// A memory heap resources can be placed in.
#[derive(Debug)]
pub struct Heap {
    raw: GpuHeap,
    alignment: u64,
}

impl Heap {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.raw.size()
    }

    /// Alignment the heap was created with.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }
}

/// A pool of GPU timestamp queries.
#[derive(Debug)]
pub struct QueryPool {
    raw: GpuQueryPool,
}

impl QueryPool {
    /// Number of queries.
    pub fn count(&self) -> u32 {
        self.raw.count()
    }
}

/// A pipeline state object.
#[derive(Debug)]
pub struct Pipeline {
    desc: PipelineDescriptor,
    raw: GpuPipeline,
}

impl Pipeline {
    /// Description the pipeline was built from.
    pub fn desc(&self) -> &PipelineDescriptor {
        &self.desc
    }
}

#[derive(Debug)]
struct UploadBuffer {
    buffer: BufferId,
    capacity: u64,
    cursor: u64,
    /// Frame counter of the last write.
    last_used: u64,
}

fn buffer_view_kind(desc: &BufferDescriptor) -> Option<DescriptorView> {
    match desc.usage {
        BufferUsage::Readback => None,
        BufferUsage::ShaderReadWrite => Some(DescriptorView::ShaderWrite),
        _ if desc.is_shader_viewable() => Some(DescriptorView::ShaderRead),
        _ => None,
    }
}

fn texture_view_kind(desc: &TextureDescriptor) -> Option<DescriptorView> {
    match desc.usage {
        TextureUsage::General => None,
        TextureUsage::ShaderRead => Some(DescriptorView::ShaderRead),
        TextureUsage::ShaderReadWrite => Some(DescriptorView::ShaderWrite),
        TextureUsage::RenderTarget => Some(DescriptorView::RenderTarget),
        TextureUsage::DepthStencilTarget => Some(DescriptorView::DepthStencil),
    }
}

fn table_index(kind: DescriptorHeapKind) -> usize {
    match kind {
        DescriptorHeapKind::Resource => 0,
        DescriptorHeapKind::RenderTarget => 1,
        DescriptorHeapKind::DepthStencil => 2,
    }
}

fn validate_buffer(desc: &BufferDescriptor) -> Result<(), GraphicsError> {
    if desc.size == 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "buffer '{}' has zero size",
            desc.debug_name()
        )));
    }
    if desc.stride != 0 && desc.size % desc.stride as u64 != 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "buffer '{}' size {} is not a multiple of its stride {}",
            desc.debug_name(),
            desc.size,
            desc.stride
        )));
    }
    Ok(())
}

fn validate_texture(desc: &TextureDescriptor) -> Result<(), GraphicsError> {
    let name = desc.debug_name();
    if desc.width == 0 || desc.height == 0 || desc.depth_or_array_layers == 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture '{name}' has a zero extent ({}x{}x{})",
            desc.width, desc.height, desc.depth_or_array_layers
        )));
    }
    if desc.mip_levels == 0 || desc.mip_levels > desc.max_mip_levels() {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture '{name}' requests {} mips, the extent allows 1..={}",
            desc.mip_levels,
            desc.max_mip_levels()
        )));
    }
    if desc.base_mip != 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture '{name}' base mip {} is outside the chain",
            desc.base_mip
        )));
    }
    let depth_format = desc.format.is_depth_stencil();
    let depth_usage = desc.usage == TextureUsage::DepthStencilTarget;
    if depth_format != depth_usage {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture '{name}' format {:?} does not match usage {:?}",
            desc.format, desc.usage
        )));
    }
    Ok(())
}

/// Accepts `list` on `queue`: the graphics queue runs everything, the compute
/// queue runs compute and copy lists, the copy queue only copy lists.
fn queue_accepts(queue: QueueType, list: QueueType) -> bool {
    match queue {
        QueueType::Graphics => true,
        QueueType::Compute => list != QueueType::Graphics,
        QueueType::Copy => list == QueueType::Copy,
    }
}

// ============================================================================
// Device
// ============================================================================

/// Owner of every GPU object.
///
/// The API takes `&mut self` and is not internally synchronized; the device
/// is `Send` so it can move to a render thread.
pub struct Device {
    backend: Box<dyn GpuBackend>,
    config: DeviceConfig,
    buffers: HandlePool<Buffer>,
    textures: HandlePool<Texture>,
    heaps: HandlePool<Heap>,
    pipelines: HandlePool<Pipeline>,
    query_pools: HandlePool<QueryPool>,
    descriptors: [DescriptorTable; 3],
    deferred: DeferredQueue,
    frame_counter: u64,
    frame_index: u32,
    /// Last submission value per queue, per frame slot.
    frame_fences: Vec<[u64; 3]>,
    uploads_active: Vec<UploadBuffer>,
    uploads_retired: Vec<UploadBuffer>,
}

static_assertions::assert_impl_all!(Device: Send);

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("frame_counter", &self.frame_counter)
            .field("frame_index", &self.frame_index)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("pending_releases", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Create a device on the backend selected by `config.backend`.
    pub fn new(config: DeviceConfig) -> Result<Self, GraphicsError> {
        crate::profiling::start();
        let backend = backend::create_backend(
            config.backend,
            config.validation,
            config.resource_descriptors,
        )?;
        Self::with_backend(config, backend)
    }

    /// Create a device on an explicit backend.
    pub fn with_backend(
        config: DeviceConfig,
        backend: Box<dyn GpuBackend>,
    ) -> Result<Self, GraphicsError> {
        if config.frame_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frame_count must be at least 1".into(),
            ));
        }
        log::info!(
            "Creating device on {} backend ({} frames in flight)",
            backend.name(),
            config.frame_count
        );
        let descriptors = DescriptorHeapKind::ALL
            .map(|kind| DescriptorTable::new(kind, config.descriptor_capacity(kind)));
        Ok(Self {
            backend,
            frame_fences: vec![[0; 3]; config.frame_count as usize],
            config,
            buffers: HandlePool::new(),
            textures: HandlePool::new(),
            heaps: HandlePool::new(),
            pipelines: HandlePool::new(),
            query_pools: HandlePool::new(),
            descriptors,
            deferred: DeferredQueue::new(),
            frame_counter: 0,
            frame_index: 0,
            uploads_active: Vec::new(),
            uploads_retired: Vec::new(),
        })
    }

    fn table(&self, kind: DescriptorHeapKind) -> &DescriptorTable {
        &self.descriptors[table_index(kind)]
    }

    fn table_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorTable {
        &mut self.descriptors[table_index(kind)]
    }

    /// Claim a slot for `resource` and write it on the GPU.
    ///
    /// The resource must already be in its pool.
    fn allocate_descriptor(
        &mut self,
        resource: ResourceId,
        view: Option<DescriptorView>,
    ) -> Result<Option<(DescriptorHeapKind, DescriptorId)>, GraphicsError> {
        let Some(view) = view else {
            return Ok(None);
        };
        let kind = DescriptorHeapKind::for_view(view);
        let target = match resource {
            ResourceId::Buffer(id) => {
                let buffer = self.buffers.get(id)?;
                GpuView::Buffer {
                    buffer: &buffer.allocation,
                    descriptor: &buffer.desc,
                }
            }
            ResourceId::Texture(id) => {
                let texture = self.textures.get(id)?;
                GpuView::Texture {
                    texture: &texture.allocation,
                    descriptor: &texture.desc,
                }
            }
        };
        let table = &mut self.descriptors[table_index(kind)];
        let id = table.allocate(DescriptorEntry { resource, view })?;
        if let Err(e) = self.backend.write_descriptor(kind, id.index(), view, target) {
            table.free(id)?;
            return Err(e);
        }
        Ok(Some((kind, id)))
    }

    /// Clear a slot on the GPU and give it back to its table.
    fn free_descriptor(
        &mut self,
        kind: DescriptorHeapKind,
        id: DescriptorId,
    ) -> Result<(), GraphicsError> {
        self.table(kind).get(id)?;
        self.backend.clear_descriptor(kind, id.index());
        self.table_mut(kind).free(id)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    /// Create a buffer in its resting state for `desc.usage`.
    pub fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        validate_buffer(desc)?;
        let state = ResourceState::for_buffer_usage(desc.usage);
        let raw = self.backend.create_buffer(desc, state)?;
        self.insert_buffer(desc.clone(), Arc::new(raw), state)
    }

    /// Create a buffer placed in `heap` at `offset`, starting in `initial_state`.
    pub fn create_placed_buffer(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<BufferId, GraphicsError> {
        validate_buffer(desc)?;
        let heap = self.heaps.get(heap)?;
        let raw = self
            .backend
            .create_placed_buffer(&heap.raw, offset, desc, initial_state)?;
        self.insert_buffer(desc.clone(), Arc::new(raw), initial_state)
    }

    /// Create a second handle onto `buffer`'s allocation with its own usage.
    ///
    /// Releasing either handle leaves the other valid.
    pub fn create_buffer_view(
        &mut self,
        buffer: BufferId,
        desc: &BufferDescriptor,
    ) -> Result<BufferId, GraphicsError> {
        validate_buffer(desc)?;
        let parent = self.buffers.get(buffer)?;
        if desc.size > parent.desc.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "view '{}' of {} bytes exceeds buffer '{}' of {} bytes",
                desc.debug_name(),
                desc.size,
                parent.desc.debug_name(),
                parent.desc.size
            )));
        }
        let allocation = parent.allocation.clone();
        let state = parent.state;
        self.insert_buffer(desc.clone(), allocation, state)
    }

    fn insert_buffer(
        &mut self,
        desc: BufferDescriptor,
        allocation: Arc<GpuBuffer>,
        state: ResourceState,
    ) -> Result<BufferId, GraphicsError> {
        let view = buffer_view_kind(&desc);
        log::trace!(
            "Creating buffer '{}' ({} bytes, {:?})",
            desc.debug_name(),
            desc.size,
            desc.usage
        );
        let id = self.buffers.add(Buffer {
            desc,
            allocation,
            descriptor: None,
            state,
        });
        match self.allocate_descriptor(id.into(), view) {
            Ok(descriptor) => {
                self.buffers.get_mut(id)?.descriptor = descriptor;
                Ok(id)
            }
            Err(e) => {
                let buffer = self.buffers.remove(id)?;
                self.destroy_release(DeferredRelease::Buffer(buffer.allocation));
                Err(e)
            }
        }
    }

    /// Look up a buffer.
    pub fn buffer(&self, id: BufferId) -> Result<&Buffer, GraphicsError> {
        Ok(self.buffers.get(id)?)
    }

    /// Release a buffer; its allocation and descriptor are destroyed once the
    /// GPU can no longer use them.
    pub fn release_buffer(&mut self, id: BufferId) -> Result<(), GraphicsError> {
        let buffer = self.buffers.remove(id)?;
        log::trace!(
            "Releasing buffer '{}' at frame {}",
            buffer.desc.debug_name(),
            self.frame_counter
        );
        // Slots go first so views never outlive their allocation.
        if let Some((kind, descriptor)) = buffer.descriptor {
            self.deferred
                .push(self.frame_counter, DeferredRelease::Descriptor(kind, descriptor));
        }
        self.deferred
            .push(self.frame_counter, DeferredRelease::Buffer(buffer.allocation));
        Ok(())
    }

    /// Release a buffer now. The GPU must not be using it.
    pub fn release_buffer_immediate(&mut self, id: BufferId) -> Result<(), GraphicsError> {
        let buffer = self.buffers.remove(id)?;
        if let Some((kind, descriptor)) = buffer.descriptor {
            self.free_descriptor(kind, descriptor)?;
        }
        self.destroy_release(DeferredRelease::Buffer(buffer.allocation));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------------

    /// Create a texture in its resting state for `desc.usage`.
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, GraphicsError> {
        validate_texture(desc)?;
        let state = ResourceState::for_texture_usage(desc.usage);
        let raw = self.backend.create_texture(desc, state)?;
        self.insert_texture(desc.clone(), Arc::new(raw), state, desc.mip_levels)
    }

    /// Create a texture placed in `heap` at `offset`, starting in `initial_state`.
    pub fn create_placed_texture(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<TextureId, GraphicsError> {
        validate_texture(desc)?;
        let heap = self.heaps.get(heap)?;
        let raw = self
            .backend
            .create_placed_texture(&heap.raw, offset, desc, initial_state)?;
        self.insert_texture(desc.clone(), Arc::new(raw), initial_state, desc.mip_levels)
    }

    /// Create a second handle onto `texture`'s allocation.
    ///
    /// The view may use a different usage and a sub-range of the mip chain
    /// (`desc.base_mip` counts from the allocation's first mip).
    pub fn create_texture_view(
        &mut self,
        texture: TextureId,
        desc: &TextureDescriptor,
    ) -> Result<TextureId, GraphicsError> {
        let parent = self.textures.get(texture)?;
        let name = desc.debug_name();
        if desc.width != parent.desc.width
            || desc.height != parent.desc.height
            || desc.depth_or_array_layers != parent.desc.depth_or_array_layers
            || desc.dimension != parent.desc.dimension
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "view '{name}' extent does not match texture '{}'",
                parent.desc.debug_name()
            )));
        }
        if desc.format.block_size() != parent.desc.format.block_size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "view '{name}' format {:?} is not compatible with {:?}",
                desc.format, parent.desc.format
            )));
        }
        let end_mip = desc.base_mip.checked_add(desc.mip_levels);
        if desc.mip_levels == 0 || end_mip.is_none_or(|end| end > parent.chain_mips) {
            return Err(GraphicsError::InvalidParameter(format!(
                "view '{name}' mips {}+{} are outside the chain of {} mips",
                desc.base_mip, desc.mip_levels, parent.chain_mips
            )));
        }
        let allocation = parent.allocation.clone();
        let state = parent.state;
        let chain_mips = parent.chain_mips;
        self.insert_texture(desc.clone(), allocation, state, chain_mips)
    }

    fn insert_texture(
        &mut self,
        desc: TextureDescriptor,
        allocation: Arc<GpuTexture>,
        state: ResourceState,
        chain_mips: u32,
    ) -> Result<TextureId, GraphicsError> {
        let view = texture_view_kind(&desc);
        log::trace!(
            "Creating texture '{}' ({}x{}, mips {}..{}, {:?})",
            desc.debug_name(),
            desc.width,
            desc.height,
            desc.base_mip,
            desc.base_mip + desc.mip_levels,
            desc.usage
        );
        let id = self.textures.add(Texture {
            desc,
            allocation,
            descriptor: None,
            state,
            chain_mips,
        });
        match self.allocate_descriptor(id.into(), view) {
            Ok(descriptor) => {
                self.textures.get_mut(id)?.descriptor = descriptor;
                Ok(id)
            }
            Err(e) => {
                let texture = self.textures.remove(id)?;
                self.destroy_release(DeferredRelease::Texture(texture.allocation));
                Err(e)
            }
        }
    }

    /// Look up a texture.
    pub fn texture(&self, id: TextureId) -> Result<&Texture, GraphicsError> {
        Ok(self.textures.get(id)?)
    }

    /// Release a texture; its allocation and descriptor are destroyed once the
    /// GPU can no longer use them.
    pub fn release_texture(&mut self, id: TextureId) -> Result<(), GraphicsError> {
        let texture = self.textures.remove(id)?;
        log::trace!(
            "Releasing texture '{}' at frame {}",
            texture.desc.debug_name(),
            self.frame_counter
        );
        if let Some((kind, descriptor)) = texture.descriptor {
            self.deferred
                .push(self.frame_counter, DeferredRelease::Descriptor(kind, descriptor));
        }
        self.deferred
            .push(self.frame_counter, DeferredRelease::Texture(texture.allocation));
        Ok(())
    }

    /// Release a texture now. The GPU must not be using it.
    pub fn release_texture_immediate(&mut self, id: TextureId) -> Result<(), GraphicsError> {
        let texture = self.textures.remove(id)?;
        if let Some((kind, descriptor)) = texture.descriptor {
            self.free_descriptor(kind, descriptor)?;
        }
        self.destroy_release(DeferredRelease::Texture(texture.allocation));
        Ok(())
    }

    /// Descriptor of a live resource.
    pub fn resource_descriptor(
        &self,
        resource: impl Into<ResourceId>,
    ) -> Result<ResourceDescriptor, GraphicsError> {
        Ok(match resource.into() {
            ResourceId::Buffer(id) => ResourceDescriptor::Buffer(self.buffers.get(id)?.desc.clone()),
            ResourceId::Texture(id) => {
                ResourceDescriptor::Texture(self.textures.get(id)?.desc.clone())
            }
        })
    }

    /// Resting state of a live resource.
    pub fn resource_state(&self, resource: impl Into<ResourceId>) -> Result<ResourceState, GraphicsError> {
        Ok(match resource.into() {
            ResourceId::Buffer(id) => self.buffers.get(id)?.state,
            ResourceId::Texture(id) => self.textures.get(id)?.state,
        })
    }

    /// Bindless index of a resource's descriptor.
    pub fn bindless_heap_index(
        &self,
        resource: impl Into<ResourceId>,
    ) -> Result<u32, GraphicsError> {
        let resource = resource.into();
        let descriptor = match resource {
            ResourceId::Buffer(id) => self.buffers.get(id)?.descriptor,
            ResourceId::Texture(id) => self.textures.get(id)?.descriptor,
        };
        let (kind, id) = descriptor.ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("{resource:?} has no bindless descriptor"))
        })?;
        self.table(kind).bindless_index(id)
    }

    /// Bindless index of a shader-visible descriptor.
    pub fn descriptor_bindless_index(&self, id: DescriptorId) -> Result<u32, GraphicsError> {
        self.table(DescriptorHeapKind::Resource).bindless_index(id)
    }

    /// Descriptor table of one heap kind.
    pub fn descriptor_table(&self, kind: DescriptorHeapKind) -> &DescriptorTable {
        self.table(kind)
    }

    // ------------------------------------------------------------------------
    // Heaps
    // ------------------------------------------------------------------------

    /// Size and alignment `desc` needs when placed in a heap.
    ///
    /// Fails for descriptors the device would refuse to create.
    pub fn allocation_info(
        &self,
        desc: &ResourceDescriptor,
    ) -> Result<AllocationInfo, GraphicsError> {
        match desc {
            ResourceDescriptor::Buffer(buffer) => validate_buffer(buffer)?,
            ResourceDescriptor::Texture(texture) => validate_texture(texture)?,
        }
        self.backend.allocation_info(desc)
    }

    /// Create a memory heap.
    pub fn create_heap(&mut self, size: u64, alignment: u64) -> Result<HeapId, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter("heap has zero size".into()));
        }
        let raw = self.backend.create_heap(size, alignment)?;
        log::trace!("Creating heap of {} bytes", size);
        Ok(self.heaps.add(Heap { raw, alignment }))
    }

    /// Look up a heap.
    pub fn heap(&self, id: HeapId) -> Result<&Heap, GraphicsError> {
        Ok(self.heaps.get(id)?)
    }

    /// Release a heap through the deferred path.
    ///
    /// Resources placed in it must be released first.
    pub fn release_heap(&mut self, id: HeapId) -> Result<(), GraphicsError> {
        let heap = self.heaps.remove(id)?;
        self.deferred
            .push(self.frame_counter, DeferredRelease::Heap(heap.raw));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Timestamps
    // ------------------------------------------------------------------------

    /// Create a pool of `count` timestamp queries.
    pub fn create_query_pool(&mut self, count: u32) -> Result<QueryPoolId, GraphicsError> {
        if count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "query pool has no queries".into(),
            ));
        }
        let raw = self.backend.create_query_pool(count)?;
        log::trace!("Creating query pool of {} timestamps", count);
        Ok(self.query_pools.add(QueryPool { raw }))
    }

    /// Look up a query pool.
    pub fn query_pool(&self, id: QueryPoolId) -> Result<&QueryPool, GraphicsError> {
        Ok(self.query_pools.get(id)?)
    }

    /// Release a query pool through the deferred path.
    pub fn release_query_pool(&mut self, id: QueryPoolId) -> Result<(), GraphicsError> {
        let pool = self.query_pools.remove(id)?;
        self.deferred
            .push(self.frame_counter, DeferredRelease::QueryPool(pool.raw));
        Ok(())
    }

    /// Nanoseconds per timestamp tick, 0 when the backend cannot write
    /// timestamps.
    pub fn timestamp_period(&self) -> f64 {
        self.backend.timestamp_period()
    }

    // ------------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------------

    /// Build a pipeline. Prefer going through a [`PipelineCache`](crate::pipeline::PipelineCache).
    pub fn create_pipeline(&mut self, desc: PipelineDescriptor) -> Result<PipelineId, GraphicsError> {
        let raw = self.backend.create_pipeline(&desc)?;
        log::trace!("Creating pipeline {:?}", desc.label());
        Ok(self.pipelines.add(Pipeline { desc, raw }))
    }

    /// Build a graphics pipeline.
    pub fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, GraphicsError> {
        self.create_pipeline(PipelineDescriptor::Graphics(desc.clone()))
    }

    /// Build a compute pipeline.
    pub fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<PipelineId, GraphicsError> {
        self.create_pipeline(PipelineDescriptor::Compute(desc.clone()))
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline, GraphicsError> {
        Ok(self.pipelines.get(id)?)
    }

    /// Release a pipeline through the deferred path.
    pub fn release_pipeline(&mut self, id: PipelineId) -> Result<(), GraphicsError> {
        let pipeline = self.pipelines.remove(id)?;
        self.deferred
            .push(self.frame_counter, DeferredRelease::Pipeline(pipeline.raw));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Data transfer
    // ------------------------------------------------------------------------

    /// Write directly into a mappable buffer.
    pub fn write_buffer_data(
        &mut self,
        id: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffers.get(id)?;
        if !buffer.desc.mappable {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer '{}' is not mappable",
                buffer.desc.debug_name()
            )));
        }
        let allocation = buffer.allocation.clone();
        self.backend.write_buffer(&allocation, offset, data)
    }

    /// Read back from a mappable buffer.
    ///
    /// The caller is responsible for the GPU having finished writing it.
    pub fn read_buffer_data(
        &mut self,
        id: BufferId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let buffer = self.buffers.get(id)?;
        if !buffer.desc.mappable {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer '{}' is not mappable",
                buffer.desc.debug_name()
            )));
        }
        let allocation = buffer.allocation.clone();
        self.backend.read_buffer(&allocation, offset, len)
    }

    /// Find room for `len` bytes in this frame's upload buffers.
    fn upload_region(&mut self, len: u64, alignment: u64) -> Result<(BufferId, u64), GraphicsError> {
        let counter = self.frame_counter;
        if let Some(upload) = self.uploads_active.iter_mut().find(|u| {
            u.last_used == counter && u.cursor.next_multiple_of(alignment) + len <= u.capacity
        }) {
            let offset = upload.cursor.next_multiple_of(alignment);
            upload.cursor = offset + len;
            return Ok((upload.buffer, offset));
        }

        let mut upload = match self.uploads_retired.iter().position(|u| u.capacity >= len) {
            Some(index) => self.uploads_retired.swap_remove(index),
            None => {
                let capacity = len.max(self.config.upload_chunk_size);
                let buffer =
                    self.create_buffer(&BufferDescriptor::upload(capacity).with_label("upload"))?;
                log::debug!("Created upload buffer of {} bytes", capacity);
                UploadBuffer {
                    buffer,
                    capacity,
                    cursor: 0,
                    last_used: counter,
                }
            }
        };
        upload.cursor = len;
        upload.last_used = counter;
        let buffer = upload.buffer;
        self.uploads_active.push(upload);
        Ok((buffer, 0))
    }

    fn retire_upload_buffers(&mut self) {
        let counter = self.frame_counter;
        let frame_count = self.config.frame_count as u64;
        let (ready, busy): (Vec<_>, Vec<_>) = std::mem::take(&mut self.uploads_active)
            .into_iter()
            .partition(|u| u.last_used + frame_count + 1 <= counter);
        self.uploads_active = busy;
        self.uploads_retired.extend(ready.into_iter().map(|mut upload| {
            upload.cursor = 0;
            upload
        }));
    }

    /// Upload `data` into `buffer` at `offset`.
    ///
    /// Mappable buffers are written directly; others get a staging copy
    /// recorded into `cmd`, with transitions to `COPY_DEST` and back when the
    /// resting state requires it.
    pub fn upload_buffer_data(
        &mut self,
        cmd: &mut CommandList,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let target = self.buffers.get(buffer)?;
        let len = data.len() as u64;
        if offset.checked_add(len).is_none_or(|end| end > target.desc.size) {
            return Err(GraphicsError::InvalidParameter(format!(
                "upload of {len} bytes at offset {offset} exceeds buffer '{}' of {} bytes",
                target.desc.debug_name(),
                target.desc.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        if target.desc.mappable {
            return self.write_buffer_data(buffer, offset, data);
        }

        let state = target.state;
        let (upload, upload_offset) = self.upload_region(len, BUFFER_UPLOAD_ALIGNMENT)?;
        self.write_buffer_data(upload, upload_offset, data)?;
        log::trace!(
            "Uploading {} bytes to buffer {:?} via staging offset {}",
            len,
            buffer,
            upload_offset
        );

        let transition = state != ResourceState::COMMON && state != ResourceState::COPY_DEST;
        let barrier = |before, after| ResourceBarrier {
            resource: buffer.into(),
            subresource: Subresource::All,
            before,
            after,
        };
        if transition {
            cmd.barriers(&[barrier(state, ResourceState::COPY_DEST)]);
        }
        cmd.copy_buffer(upload, upload_offset, buffer, offset, len);
        if transition {
            cmd.barriers(&[barrier(ResourceState::COPY_DEST, state)]);
        }
        Ok(())
    }

    /// Upload a slice of plain data into `buffer` at `offset`.
    pub fn upload_pod<T: Pod>(
        &mut self,
        cmd: &mut CommandList,
        buffer: BufferId,
        offset: u64,
        data: &[T],
    ) -> Result<(), GraphicsError> {
        self.upload_buffer_data(cmd, buffer, offset, bytemuck::cast_slice(data))
    }

    /// Upload tightly packed texel data for one mip of `texture`.
    ///
    /// `mip` counts from the handle's first mip. Rows are re-laid at a
    /// [`TEXTURE_ROW_PITCH_ALIGNMENT`] pitch in the staging buffer.
    pub fn upload_texture_data(
        &mut self,
        cmd: &mut CommandList,
        texture: TextureId,
        mip: u32,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let target = self.textures.get(texture)?;
        let desc = &target.desc;
        if mip >= desc.mip_levels {
            return Err(GraphicsError::InvalidParameter(format!(
                "mip {mip} out of range for texture '{}' ({} mips)",
                desc.debug_name(),
                desc.mip_levels
            )));
        }
        let (width, height, depth) = desc.mip_extent(desc.base_mip + mip);
        let row_bytes = width as usize * desc.format.block_size() as usize;
        let rows = (height * depth * desc.array_layers()) as usize;
        if data.len() != row_bytes * rows {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture '{}' mip {mip} needs {} bytes, got {}",
                desc.debug_name(),
                row_bytes * rows,
                data.len()
            )));
        }
        let state = target.state;

        let pitch = row_bytes.next_multiple_of(TEXTURE_ROW_PITCH_ALIGNMENT as usize);
        let mut staging = vec![0u8; pitch * rows];
        for (row, src) in data.chunks_exact(row_bytes).enumerate() {
            staging[row * pitch..row * pitch + row_bytes].copy_from_slice(src);
        }

        let (upload, upload_offset) =
            self.upload_region(staging.len() as u64, TEXTURE_PLACEMENT_ALIGNMENT)?;
        self.write_buffer_data(upload, upload_offset, &staging)?;

        let barrier = |before, after| ResourceBarrier {
            resource: texture.into(),
            subresource: Subresource::Mip(mip),
            before,
            after,
        };
        let transition = state != ResourceState::COPY_DEST;
        if transition {
            cmd.barriers(&[barrier(state, ResourceState::COPY_DEST)]);
        }
        cmd.copy_buffer_to_texture(upload, upload_offset, pitch as u32, texture, mip);
        if transition {
            cmd.barriers(&[barrier(ResourceState::COPY_DEST, state)]);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Submission and frames
    // ------------------------------------------------------------------------

    /// Submit a closed command list to `queue`.
    ///
    /// Every handle in the list is resolved first; a stale one fails the whole
    /// submission before anything reaches the backend.
    pub fn submit(&mut self, list: &mut CommandList, queue: QueueType) -> Result<u64, GraphicsError> {
        profile_function!();
        if list.state() != CommandListState::Closed {
            return Err(GraphicsError::InvalidState(format!(
                "only closed command lists can be submitted, got {:?}",
                list.state()
            )));
        }
        if !queue_accepts(queue, list.queue_type()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} queue cannot run a {:?} command list",
                queue,
                list.queue_type()
            )));
        }

        let resolver = Resolver {
            buffers: &self.buffers,
            textures: &self.textures,
            pipelines: &self.pipelines,
            query_pools: &self.query_pools,
        };
        let resolved = list
            .commands()
            .iter()
            .map(|command| resolver.resolve(command))
            .collect::<Result<Vec<_>, _>>()?;
        let value = self.backend.submit(queue, &resolved)?;
        drop(resolved);

        self.frame_fences[self.frame_index as usize][queue.index()] = value;
        list.mark_submitted(self.frame_index, value);
        log::trace!(
            "Submitted {} commands to {:?} (frame {}, value {})",
            list.commands().len(),
            queue,
            self.frame_counter,
            value
        );
        Ok(value)
    }

    /// Advance to the next frame.
    ///
    /// Blocks until the GPU has finished the frame slot being reused, then
    /// destroys deferred releases and retires upload buffers that are old
    /// enough.
    pub fn on_update(&mut self) -> Result<(), GraphicsError> {
        profile_function!();
        self.frame_counter += 1;
        self.frame_index = (self.frame_counter % self.config.frame_count as u64) as u32;

        let slot = self.frame_index as usize;
        for queue in QueueType::ALL {
            let value = self.frame_fences[slot][queue.index()];
            if value > 0 {
                self.backend.wait_submission(queue, value)?;
            }
        }
        self.frame_fences[slot] = [0; 3];

        let ready = self
            .deferred
            .drain_ready(self.frame_counter, self.config.frame_count);
        if !ready.is_empty() {
            log::debug!(
                "Frame {}: destroying {} deferred releases",
                self.frame_counter,
                ready.len()
            );
        }
        for item in ready {
            self.destroy_release(item);
        }
        self.retire_upload_buffers();

        profile_plot!("pending releases", self.deferred.len());
        frame_mark!();
        Ok(())
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()?;
        for fences in &mut self.frame_fences {
            *fences = [0; 3];
        }
        Ok(())
    }

    fn destroy_release(&mut self, item: DeferredRelease) {
        match item {
            // Views share allocations; only the last reference destroys.
            DeferredRelease::Buffer(allocation) => {
                if let Ok(raw) = Arc::try_unwrap(allocation) {
                    self.backend.destroy_buffer(raw);
                }
            }
            DeferredRelease::Texture(allocation) => {
                if let Ok(raw) = Arc::try_unwrap(allocation) {
                    self.backend.destroy_texture(raw);
                }
            }
            DeferredRelease::Heap(raw) => self.backend.destroy_heap(raw),
            DeferredRelease::Descriptor(kind, id) => {
                if let Err(e) = self.free_descriptor(kind, id) {
                    log::error!("Failed to free {:?} descriptor {:?}: {}", kind, id, e);
                }
            }
            DeferredRelease::Pipeline(raw) => self.backend.destroy_pipeline(raw),
            DeferredRelease::QueryPool(raw) => self.backend.destroy_query_pool(raw),
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Configuration the device was created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current frame slot, `frame_counter % frame_count`.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Number of `on_update` calls so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Frames in flight.
    pub fn frame_count(&self) -> u32 {
        self.config.frame_count
    }

    /// Live buffer handles (views and upload buffers included).
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Live texture handles (views included).
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Live heaps.
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Live pipelines.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Live query pools.
    pub fn query_pool_count(&self) -> usize {
        self.query_pools.len()
    }

    /// Live descriptors in one heap, pending frees included.
    pub fn descriptor_count(&self, kind: DescriptorHeapKind) -> usize {
        self.table(kind).len()
    }

    /// Releases waiting for the GPU.
    pub fn pending_release_count(&self) -> usize {
        self.deferred.len()
    }

    /// Upload buffers owned by the device, busy or retired.
    pub fn upload_buffer_count(&self) -> usize {
        self.uploads_active.len() + self.uploads_retired.len()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to wait for GPU idle while dropping device: {}", e);
        }
        for item in self.deferred.drain_all() {
            self.destroy_release(item);
        }

        let live = self.buffers.len() + self.textures.len();
        if live > 0 {
            log::debug!("Device dropped with {} live resources", live);
        }
        for buffer in self.buffers.drain() {
            if let Some((kind, id)) = buffer.descriptor {
                self.destroy_release(DeferredRelease::Descriptor(kind, id));
            }
            self.destroy_release(DeferredRelease::Buffer(buffer.allocation));
        }
        for texture in self.textures.drain() {
            if let Some((kind, id)) = texture.descriptor {
                self.destroy_release(DeferredRelease::Descriptor(kind, id));
            }
            self.destroy_release(DeferredRelease::Texture(texture.allocation));
        }
        for pipeline in self.pipelines.drain() {
            self.backend.destroy_pipeline(pipeline.raw);
        }
        for pool in self.query_pools.drain() {
            self.backend.destroy_query_pool(pool.raw);
        }
        for heap in self.heaps.drain() {
            self.backend.destroy_heap(heap.raw);
        }
    }
}

/// Borrowed view of the pools used to turn handles into raw objects.
struct Resolver<'a> {
    buffers: &'a HandlePool<Buffer>,
    textures: &'a HandlePool<Texture>,
    pipelines: &'a HandlePool<Pipeline>,
    query_pools: &'a HandlePool<QueryPool>,
}

impl<'a> Resolver<'a> {
    fn buffer(&self, id: BufferId) -> Result<&'a GpuBuffer, GraphicsError> {
        Ok(&self.buffers.get(id)?.allocation)
    }

    fn texture(&self, id: TextureId) -> Result<&'a Texture, GraphicsError> {
        Ok(self.textures.get(id)?)
    }

    fn queries(
        &self,
        id: QueryPoolId,
        first: u32,
        count: u32,
    ) -> Result<&'a GpuQueryPool, GraphicsError> {
        let pool = &self.query_pools.get(id)?.raw;
        if first.checked_add(count).is_none_or(|end| end > pool.count()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "queries {first}+{count} exceed a pool of {}",
                pool.count()
            )));
        }
        Ok(pool)
    }

    fn attachment(&self, attachment: &TextureAttachment) -> Result<GpuAttachment<'a>, GraphicsError> {
        let texture = self.texture(attachment.texture)?;
        let mip = texture.desc.base_mip + attachment.mip;
        let (width, height, _) = texture.desc.mip_extent(mip);
        Ok(GpuAttachment {
            texture: &texture.allocation,
            mip,
            width,
            height,
        })
    }

    fn barrier(&self, barrier: &ResourceBarrier) -> Result<GpuBarrier<'a>, GraphicsError> {
        let (resource, base_mip, mip_count) = match barrier.resource {
            ResourceId::Buffer(id) => (GpuResource::Buffer(self.buffer(id)?), 0, 1),
            ResourceId::Texture(id) => {
                let texture = self.texture(id)?;
                let (base, count) = match barrier.subresource {
                    Subresource::All => (texture.desc.base_mip, texture.desc.mip_levels),
                    Subresource::Mip(mip) => (texture.desc.base_mip + mip, 1),
                };
                (GpuResource::Texture(&texture.allocation), base, count)
            }
        };
        Ok(GpuBarrier {
            resource,
            base_mip,
            mip_count,
            before: barrier.before,
            after: barrier.after,
        })
    }

    fn resolve(&self, command: &'a Command) -> Result<GpuCommand<'a>, GraphicsError> {
        Ok(match command {
            Command::SetPipeline(id) => GpuCommand::SetPipeline(&self.pipelines.get(*id)?.raw),
            Command::PushConstants(bytes) => GpuCommand::PushConstants(bytes.as_slice()),
            Command::BindToSlot {
                buffer,
                slot,
                offset,
            } => GpuCommand::BindBuffer {
                slot: *slot,
                buffer: self.buffer(*buffer)?,
                offset: *offset,
            },
            Command::BindIndexBuffer {
                buffer,
                offset,
                format,
            } => GpuCommand::BindIndexBuffer {
                buffer: self.buffer(*buffer)?,
                offset: *offset,
                format: *format,
            },
            Command::BindVertexBuffer {
                slot,
                buffer,
                offset,
            } => GpuCommand::BindVertexBuffer {
                slot: *slot,
                buffer: self.buffer(*buffer)?,
                offset: *offset,
            },
            Command::SetViewport(viewport) => GpuCommand::SetViewport(*viewport),
            Command::SetScissor(scissor) => GpuCommand::SetScissor(*scissor),
            Command::SetRenderTargets { colors, depth } => GpuCommand::SetRenderTargets {
                colors: colors
                    .iter()
                    .map(|color| self.attachment(color))
                    .collect::<Result<SmallVec<_>, _>>()?,
                depth: depth.as_ref().map(|d| self.attachment(d)).transpose()?,
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => GpuCommand::Draw {
                vertex_count: *vertex_count,
                instance_count: *instance_count,
                first_vertex: *first_vertex,
                first_instance: *first_instance,
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => GpuCommand::DrawIndexed {
                index_count: *index_count,
                instance_count: *instance_count,
                first_index: *first_index,
                base_vertex: *base_vertex,
                first_instance: *first_instance,
            },
            Command::DrawIndirect {
                buffer,
                offset,
                draw_count,
                indexed,
            } => GpuCommand::DrawIndirect {
                buffer: self.buffer(*buffer)?,
                offset: *offset,
                draw_count: *draw_count,
                indexed: *indexed,
            },
            Command::Dispatch { x, y, z } => GpuCommand::Dispatch {
                x: *x,
                y: *y,
                z: *z,
            },
            Command::DispatchIndirect { buffer, offset } => GpuCommand::DispatchIndirect {
                buffer: self.buffer(*buffer)?,
                offset: *offset,
            },
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => GpuCommand::CopyBuffer {
                src: self.buffer(*src)?,
                src_offset: *src_offset,
                dst: self.buffer(*dst)?,
                dst_offset: *dst_offset,
                size: *size,
            },
            Command::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                mip,
            } => {
                let texture = self.texture(*dst)?;
                let mip = texture.desc.base_mip + mip;
                let (width, height, depth) = texture.desc.mip_extent(mip);
                GpuCommand::CopyBufferToTexture {
                    src: self.buffer(*src)?,
                    src_offset: *src_offset,
                    row_pitch: *row_pitch,
                    dst: &texture.allocation,
                    mip,
                    width,
                    height,
                    depth,
                }
            }
            Command::ClearTexture { texture, value } => {
                let texture = self.texture(*texture)?;
                GpuCommand::ClearTexture {
                    texture: &texture.allocation,
                    base_mip: texture.desc.base_mip,
                    mip_count: texture.desc.mip_levels,
                    value: *value,
                }
            }
            Command::ClearBuffer { buffer, value } => GpuCommand::ClearBuffer {
                buffer: self.buffer(*buffer)?,
                value: *value,
            },
            Command::Barriers(barriers) => GpuCommand::Barriers(
                barriers
                    .iter()
                    .map(|barrier| self.barrier(barrier))
                    .collect::<Result<SmallVec<_>, _>>()?,
            ),
            Command::ResetQueries { pool, first, count } => GpuCommand::ResetQueries {
                pool: self.queries(*pool, *first, *count)?,
                first: *first,
                count: *count,
            },
            Command::WriteTimestamp { pool, index } => GpuCommand::WriteTimestamp {
                pool: self.queries(*pool, *index, 1)?,
                index: *index,
            },
            Command::ResolveQueries {
                pool,
                first,
                count,
                dst,
                offset,
            } => GpuCommand::ResolveQueries {
                pool: self.queries(*pool, *first, *count)?,
                first: *first,
                count: *count,
                dst: self.buffer(*dst)?,
                offset: *offset,
            },
            Command::BeginMarker(name) => GpuCommand::BeginMarker(name.as_str()),
            Command::EndMarker => GpuCommand::EndMarker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::TextureFormat;

    fn dummy_device(frame_count: u32) -> (Device, DummyBackend) {
        let observer = DummyBackend::new();
        let device = Device::with_backend(
            DeviceConfig::dummy().with_frame_count(frame_count),
            Box::new(observer.clone()),
        )
        .unwrap();
        (device, observer)
    }

    fn rw_texture(size: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(size, size, TextureFormat::Rgba8Unorm, TextureUsage::ShaderReadWrite)
    }

    #[test]
    fn test_descriptor_rules() {
        let (mut device, _) = dummy_device(2);
        let readback = device.create_buffer(&BufferDescriptor::readback(64)).unwrap();
        let raw = device.create_buffer(&BufferDescriptor::new(64, BufferUsage::Vertex)).unwrap();
        let structured = device.create_buffer(&BufferDescriptor::structured(4, 16)).unwrap();
        let rw = device.create_buffer(&BufferDescriptor::rw_byte_address(64)).unwrap();
        let general = device
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::General))
            .unwrap();
        let rt = device
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::RenderTarget))
            .unwrap();
        let ds = device
            .create_texture(&TextureDescriptor::new_2d(
                4,
                4,
                TextureFormat::Depth32Float,
                TextureUsage::DepthStencilTarget,
            ))
            .unwrap();

        assert!(device.buffer(readback).unwrap().descriptor().is_none());
        assert!(device.buffer(raw).unwrap().descriptor().is_none());
        assert!(device.texture(general).unwrap().descriptor().is_none());
        assert_eq!(
            device.buffer(structured).unwrap().descriptor().map(|d| d.0),
            Some(DescriptorHeapKind::Resource)
        );
        assert_eq!(
            device
                .descriptor_table(DescriptorHeapKind::Resource)
                .get(device.buffer(rw).unwrap().descriptor().unwrap().1)
                .unwrap()
                .view,
            DescriptorView::ShaderWrite
        );
        assert_eq!(device.descriptor_count(DescriptorHeapKind::Resource), 2);
        assert_eq!(device.descriptor_count(DescriptorHeapKind::RenderTarget), 1);
        assert_eq!(device.descriptor_count(DescriptorHeapKind::DepthStencil), 1);
        assert!(device.bindless_heap_index(rt).is_ok());
        assert!(device.bindless_heap_index(ds).is_ok());
        assert!(matches!(
            device.bindless_heap_index(raw),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let (mut device, observer) = dummy_device(2);
        let bad = [
            TextureDescriptor::new_2d(0, 4, TextureFormat::R8Unorm, TextureUsage::ShaderRead),
            TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::ShaderRead).with_mips(0),
            TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::ShaderRead).with_mips(4),
            TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::ShaderRead)
                .with_mip_range(1, 1),
            TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::DepthStencilTarget),
        ];
        for desc in &bad {
            assert!(matches!(
                device.create_texture(desc),
                Err(GraphicsError::InvalidParameter(_))
            ));
        }
        assert!(matches!(
            device.create_buffer(&BufferDescriptor::new(0, BufferUsage::Index)),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(observer.stats().live_textures, 0);
        assert_eq!(observer.stats().live_buffers, 0);
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let backend = DummyBackend::with_memory_budget(128);
        let mut device =
            Device::with_backend(DeviceConfig::dummy(), Box::new(backend)).unwrap();
        assert_eq!(
            device.create_buffer(&BufferDescriptor::structured(64, 16)),
            Err(GraphicsError::OutOfMemory)
        );
        assert_eq!(device.buffer_count(), 0);
    }

    #[test]
    fn test_out_of_descriptors_destroys_allocation() {
        let observer = DummyBackend::new();
        let mut device = Device::with_backend(
            DeviceConfig::dummy().with_descriptor_capacity(DescriptorHeapKind::Resource, 1),
            Box::new(observer.clone()),
        )
        .unwrap();
        device.create_buffer(&BufferDescriptor::structured(4, 4)).unwrap();
        assert_eq!(
            device.create_buffer(&BufferDescriptor::structured(4, 4)),
            Err(GraphicsError::OutOfDescriptors(DescriptorHeapKind::Resource))
        );
        assert_eq!(device.buffer_count(), 1);
        assert_eq!(observer.stats().live_buffers, 1);
    }

    #[test]
    fn test_release_is_deferred() {
        let (mut device, observer) = dummy_device(2);
        let buffer = device.create_buffer(&BufferDescriptor::structured(4, 16)).unwrap();
        device.release_buffer(buffer).unwrap();

        assert!(device.buffer(buffer).is_err());
        assert!(matches!(
            device.release_buffer(buffer),
            Err(GraphicsError::InvalidHandle(_))
        ));
        assert_eq!(device.pending_release_count(), 2);

        for _ in 0..2 {
            device.on_update().unwrap();
            assert_eq!(observer.stats().live_buffers, 1);
        }
        device.on_update().unwrap();
        assert_eq!(observer.stats().live_buffers, 0);
        assert_eq!(device.pending_release_count(), 0);
        assert_eq!(device.descriptor_count(DescriptorHeapKind::Resource), 0);
    }

    #[test]
    fn test_bindless_slot_points_at_allocation() {
        let (mut device, observer) = dummy_device(2);
        let texture = device.create_texture(&rw_texture(8).with_mips(3)).unwrap();
        let view = device
            .create_texture_view(
                texture,
                &TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead)
                    .with_mip_range(1, 2),
            )
            .unwrap();
        let GpuTexture::Dummy { id: allocation } = **device.texture(texture).unwrap().allocation()
        else {
            panic!("dummy device returned a foreign texture");
        };

        let slot = device.bindless_heap_index(texture).unwrap();
        let written = observer.descriptor(DescriptorHeapKind::Resource, slot).unwrap();
        assert_eq!(written.allocation, allocation);
        assert_eq!(written.view, DescriptorView::ShaderWrite);

        let view_slot = device.bindless_heap_index(view).unwrap();
        assert_ne!(view_slot, slot);
        let written = observer.descriptor(DescriptorHeapKind::Resource, view_slot).unwrap();
        assert_eq!(written.allocation, allocation);
        assert_eq!((written.view, written.base_mip, written.extent), (DescriptorView::ShaderRead, 1, 2));

        // The slot stays written until the GPU can no longer read it.
        device.release_texture(texture).unwrap();
        for _ in 0..2 {
            device.on_update().unwrap();
            assert!(observer.descriptor(DescriptorHeapKind::Resource, slot).is_some());
        }
        device.on_update().unwrap();
        assert!(observer.descriptor(DescriptorHeapKind::Resource, slot).is_none());
        assert!(observer.descriptor(DescriptorHeapKind::Resource, view_slot).is_some());
        assert_eq!(observer.stats().live_textures, 1);

        device.release_texture_immediate(view).unwrap();
        assert_eq!(observer.stats().live_descriptors, 0);
        assert_eq!(observer.stats().live_textures, 0);
    }

    #[test]
    fn test_attachment_descriptors_are_written() {
        let (mut device, observer) = dummy_device(2);
        let rt = device
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::RenderTarget))
            .unwrap();
        let slot = device.bindless_heap_index(rt).unwrap();
        assert_eq!(
            observer
                .descriptor(DescriptorHeapKind::RenderTarget, slot)
                .map(|d| d.view),
            Some(DescriptorView::RenderTarget)
        );
        drop(device);
        assert_eq!(observer.stats().live_descriptors, 0);
    }

    #[test]
    fn test_immediate_release() {
        let (mut device, observer) = dummy_device(3);
        let texture = device.create_texture(&rw_texture(8)).unwrap();
        device.release_texture_immediate(texture).unwrap();
        assert_eq!(observer.stats().live_textures, 0);
        assert_eq!(device.descriptor_count(DescriptorHeapKind::Resource), 0);
        assert_eq!(device.pending_release_count(), 0);
    }

    #[test]
    fn test_views_share_allocation() {
        let (mut device, observer) = dummy_device(1);
        let texture = device.create_texture(&rw_texture(16).with_mips(3)).unwrap();
        let view = device
            .create_texture_view(
                texture,
                &rw_texture(16).with_usage(TextureUsage::ShaderRead).with_mip_range(1, 2),
            )
            .unwrap();
        assert!(Arc::ptr_eq(
            device.texture(texture).unwrap().allocation(),
            device.texture(view).unwrap().allocation()
        ));
        assert_ne!(
            device.bindless_heap_index(texture).unwrap(),
            device.bindless_heap_index(view).unwrap()
        );

        device.release_texture(texture).unwrap();
        for _ in 0..3 {
            device.on_update().unwrap();
        }
        assert!(device.texture(view).is_ok());
        assert_eq!(observer.stats().live_textures, 1);

        device.release_texture(view).unwrap();
        for _ in 0..2 {
            device.on_update().unwrap();
        }
        assert_eq!(observer.stats().live_textures, 0);
    }

    #[test]
    fn test_view_outside_chain_rejected() {
        let (mut device, _) = dummy_device(2);
        let texture = device.create_texture(&rw_texture(16).with_mips(2)).unwrap();
        assert!(matches!(
            device.create_texture_view(texture, &rw_texture(16).with_mip_range(1, 2)),
            Err(GraphicsError::InvalidParameter(_))
        ));
        let buffer = device.create_buffer(&BufferDescriptor::byte_address(64)).unwrap();
        assert!(
            device
                .create_buffer_view(buffer, &BufferDescriptor::byte_address(128))
                .is_err()
        );
    }

    #[test]
    fn test_ranges_near_integer_limits_rejected() {
        let (mut device, _) = dummy_device(2);
        let target = device.create_buffer(&BufferDescriptor::byte_address(64)).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        assert!(matches!(
            device.upload_buffer_data(&mut cmd, target, u64::MAX - 1, &[1, 2, 3, 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(cmd.commands().is_empty());

        let texture = device.create_texture(&rw_texture(16).with_mips(2)).unwrap();
        let mut desc = rw_texture(16);
        desc.base_mip = u32::MAX;
        desc.mip_levels = 2;
        assert!(matches!(
            device.create_texture_view(texture, &desc),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_upload_buffer_reuse() {
        let (mut device, _) = dummy_device(2);
        let target = device.create_buffer(&BufferDescriptor::structured(16, 16)).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();

        device.upload_pod(&mut cmd, target, 0, &[1u32; 4]).unwrap();
        device.upload_pod(&mut cmd, target, 16, &[2u32; 4]).unwrap();
        assert_eq!(device.upload_buffer_count(), 1);

        cmd.close().unwrap();
        device.submit(&mut cmd, QueueType::Graphics).unwrap();

        // Not reusable until frame_count + 1 frames later.
        device.on_update().unwrap();
        cmd.begin().unwrap();
        device.upload_pod(&mut cmd, target, 0, &[3u32; 4]).unwrap();
        assert_eq!(device.upload_buffer_count(), 2);

        for _ in 0..3 {
            device.on_update().unwrap();
        }
        device.upload_pod(&mut cmd, target, 0, &[4u32; 4]).unwrap();
        assert_eq!(device.upload_buffer_count(), 2);
    }

    #[test]
    fn test_upload_records_transitions_and_copy() {
        let (mut device, _) = dummy_device(2);
        let target = device.create_buffer(&BufferDescriptor::structured(4, 4)).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        device.upload_buffer_data(&mut cmd, target, 0, &[7; 16]).unwrap();

        let commands = cmd.commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(&commands[0], Command::Barriers(b)
            if b[0].before == ResourceState::ALL_SHADER_RESOURCE
                && b[0].after == ResourceState::COPY_DEST));
        assert!(matches!(commands[1], Command::CopyBuffer { dst, size: 16, .. } if dst == target));
        assert!(matches!(&commands[2], Command::Barriers(b)
            if b[0].after == ResourceState::ALL_SHADER_RESOURCE));
    }

    #[test]
    fn test_upload_then_readback() {
        let (mut device, _) = dummy_device(2);
        let target = device.create_buffer(&BufferDescriptor::byte_address(16)).unwrap();
        let readback = device.create_buffer(&BufferDescriptor::readback(16)).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        device.upload_buffer_data(&mut cmd, target, 4, &[1, 2, 3, 4]).unwrap();
        cmd.copy_buffer(target, 0, readback, 0, 16);
        cmd.close().unwrap();
        device.submit(&mut cmd, QueueType::Graphics).unwrap();

        let bytes = device.read_buffer_data(readback, 0, 8).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.read_buffer_data(target, 0, 4).is_err());
    }

    #[test]
    fn test_upload_texture_pitch() {
        let (mut device, _) = dummy_device(2);
        let texture = device
            .create_texture(
                &TextureDescriptor::new_2d(10, 4, TextureFormat::R8Unorm, TextureUsage::ShaderRead)
                    .with_mips(2),
            )
            .unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();

        assert!(matches!(
            device.upload_texture_data(&mut cmd, texture, 0, &[0; 39]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        device.upload_texture_data(&mut cmd, texture, 1, &[0; 5 * 2]).unwrap();

        let commands = cmd.commands();
        assert!(matches!(&commands[0], Command::Barriers(b)
            if b[0].subresource == Subresource::Mip(1) && b[0].after == ResourceState::COPY_DEST));
        assert!(matches!(
            commands[1],
            Command::CopyBufferToTexture { row_pitch: 256, mip: 1, .. }
        ));
    }

    #[test]
    fn test_submit_rejects_stale_handles() {
        let (mut device, observer) = dummy_device(2);
        let buffer = device.create_buffer(&BufferDescriptor::byte_address(16)).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        cmd.clear_buffer(buffer, 0);
        cmd.close().unwrap();

        device.release_buffer(buffer).unwrap();
        assert!(matches!(
            device.submit(&mut cmd, QueueType::Graphics),
            Err(GraphicsError::InvalidHandle(_))
        ));
        assert_eq!(observer.stats().submissions, 0);
    }

    #[test]
    fn test_submit_requires_closed_list_and_matching_queue() {
        let (mut device, _) = dummy_device(2);
        let mut cmd = CommandList::new(QueueType::Graphics);
        assert!(matches!(
            device.submit(&mut cmd, QueueType::Graphics),
            Err(GraphicsError::InvalidState(_))
        ));
        cmd.begin().unwrap();
        cmd.close().unwrap();
        assert!(matches!(
            device.submit(&mut cmd, QueueType::Copy),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(device.submit(&mut cmd, QueueType::Graphics).unwrap(), 1);
        assert_eq!(cmd.state(), CommandListState::Submitted);
    }

    #[test]
    fn test_frame_index_wraps() {
        let (mut device, _) = dummy_device(3);
        let mut indices = Vec::new();
        for _ in 0..6 {
            device.on_update().unwrap();
            indices.push(device.frame_index());
        }
        assert_eq!(indices, vec![1, 2, 0, 1, 2, 0]);
        assert_eq!(device.frame_counter(), 6);
    }

    #[test]
    fn test_allocation_info_rejects_invalid_descriptors() {
        let (device, _) = dummy_device(2);
        let empty = ResourceDescriptor::Buffer(BufferDescriptor::byte_address(0));
        assert!(matches!(
            device.allocation_info(&empty),
            Err(GraphicsError::InvalidParameter(_))
        ));
        let mut texture = rw_texture(16);
        texture.mip_levels = 0;
        assert!(
            device
                .allocation_info(&ResourceDescriptor::Texture(texture))
                .is_err()
        );
        let info = device
            .allocation_info(&ResourceDescriptor::Buffer(BufferDescriptor::byte_address(4)))
            .unwrap();
        assert!(info.size >= 4);
    }

    #[test]
    fn test_placed_resources() {
        let (mut device, observer) = dummy_device(2);
        let desc = ResourceDescriptor::Texture(rw_texture(64));
        let info = device.allocation_info(&desc).unwrap();
        let heap = device.create_heap(info.size * 2, info.alignment).unwrap();

        let a = device
            .create_placed_texture(heap, 0, &rw_texture(64), ResourceState::UNORDERED_ACCESS)
            .unwrap();
        let b = device
            .create_placed_texture(heap, info.size, &rw_texture(64), ResourceState::COMMON)
            .unwrap();
        assert_eq!(device.texture(b).unwrap().state(), ResourceState::COMMON);
        assert_eq!(observer.stats().live_heaps, 1);

        device.release_texture(a).unwrap();
        device.release_texture(b).unwrap();
        device.release_heap(heap).unwrap();
        for _ in 0..3 {
            device.on_update().unwrap();
        }
        assert_eq!(observer.stats().live_heaps, 0);
        assert_eq!(observer.stats().live_textures, 0);
    }

    #[test]
    fn test_drop_flushes_everything() {
        let (mut device, observer) = dummy_device(2);
        let a = device.create_buffer(&BufferDescriptor::byte_address(16)).unwrap();
        device.create_texture(&rw_texture(4)).unwrap();
        device.release_buffer(a).unwrap();
        drop(device);

        let stats = observer.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_textures, 0);
        assert_eq!(stats.allocated_bytes, 0);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = DeviceConfig::from_lookup(|key| match key {
            "FRAMEGRAPH_BACKEND" => Some("dummy".into()),
            "FRAMEGRAPH_FRAME_COUNT" => Some("3".into()),
            "FRAMEGRAPH_VALIDATION" => Some("off".into()),
            _ => None,
        });
        assert_eq!(config.backend, BackendType::Dummy);
        assert_eq!(config.frame_count, 3);
        assert!(!config.validation);

        let fallback = DeviceConfig::from_lookup(|key| match key {
            "FRAMEGRAPH_FRAME_COUNT" => Some("zero".into()),
            _ => None,
        });
        assert_eq!(fallback.frame_count, 2);
    }

    #[test]
    fn test_zero_frame_count_rejected() {
        assert!(matches!(
            Device::new(DeviceConfig::dummy().with_frame_count(0)),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
