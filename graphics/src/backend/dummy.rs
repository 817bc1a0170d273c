//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU but keeps enough state to make the layers
//! above it observable: buffer contents (so uploads, copies and readbacks can be
//! checked), live object counts, an optional memory budget and per-queue
//! submission values. Submissions complete as soon as they are made.
//!
//! Timestamps come from a simulated clock that advances
//! [`DUMMY_TICKS_PER_COMMAND`] nanoseconds per executed command.
//!
//! The backend is cheaply cloneable; clones share state, so a test can keep one
//! clone for inspection while the device owns the other.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::command_list::QueueType;
use crate::descriptor::{DescriptorHeapKind, DescriptorView};
use crate::error::GraphicsError;
use crate::pipeline::PipelineDescriptor;
use crate::types::{BufferDescriptor, ResourceDescriptor, ResourceState, TextureDescriptor};

use super::{
    AllocationInfo, GpuBackend, GpuBuffer, GpuCommand, GpuHeap, GpuPipeline, GpuQueryPool,
    GpuTexture, GpuView,
};

const BUFFER_ALIGNMENT: u64 = 256;
const TEXTURE_ALIGNMENT: u64 = 64 * 1024;

/// Simulated GPU time spent on each executed command.
pub const DUMMY_TICKS_PER_COMMAND: u64 = 1_000;

/// Snapshot of dummy backend bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Buffers created and not yet destroyed (placed ones included).
    pub live_buffers: usize,
    /// Textures created and not yet destroyed (placed ones included).
    pub live_textures: usize,
    /// Heaps created and not yet destroyed.
    pub live_heaps: usize,
    /// Pipelines created and not yet destroyed.
    pub live_pipelines: usize,
    /// Bytes held by dedicated allocations and heaps.
    pub allocated_bytes: u64,
    /// Number of submissions across all queues.
    pub submissions: u64,
    /// Number of commands across all submissions.
    pub commands: u64,
    /// Number of barriers across all submissions.
    pub barriers: u64,
    /// Buffer ids in destruction order.
    pub destroyed_buffers: Vec<u64>,
    /// Texture ids in destruction order.
    pub destroyed_textures: Vec<u64>,
    /// Descriptor slots currently written.
    pub live_descriptors: usize,
    /// Query pools created and not yet destroyed.
    pub live_query_pools: usize,
}

/// What a dummy descriptor slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyDescriptor {
    /// Backend id of the buffer or texture.
    pub allocation: u64,
    /// View kind.
    pub view: DescriptorView,
    /// First mip of a texture view (0 for buffers).
    pub base_mip: u32,
    /// Mips of a texture view, or bytes of a buffer view.
    pub extent: u64,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    memory_budget: Option<u64>,
    stats: DummyStats,
    /// Sizes of dedicated allocations, to give bytes back on destroy.
    dedicated: FxHashMap<u64, u64>,
    /// Lazily allocated buffer contents.
    contents: FxHashMap<u64, Vec<u8>>,
    descriptors: FxHashMap<(DescriptorHeapKind, u32), DummyDescriptor>,
    /// Query values per pool, 0 when unavailable.
    queries: FxHashMap<u64, Vec<u64>>,
    clock: u64,
    submitted: [u64; 3],
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn reserve(&mut self, size: u64) -> Result<(), GraphicsError> {
        if let Some(budget) = self.memory_budget
            && self.stats.allocated_bytes + size > budget
        {
            log::trace!(
                "DummyBackend: allocation of {} bytes exceeds budget ({} of {} used)",
                size,
                self.stats.allocated_bytes,
                budget
            );
            return Err(GraphicsError::OutOfMemory);
        }
        self.stats.allocated_bytes += size;
        Ok(())
    }

    fn release(&mut self, id: u64) {
        if let Some(size) = self.dedicated.remove(&id) {
            self.stats.allocated_bytes -= size;
        }
    }

    fn contents_mut(&mut self, id: u64, size: u64) -> &mut Vec<u8> {
        self.contents
            .entry(id)
            .or_insert_with(|| vec![0; size as usize])
    }
}

/// Dummy GPU backend.
#[derive(Debug, Clone, Default)]
pub struct DummyBackend {
    state: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Create a new dummy backend with unlimited memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dummy backend that fails allocations beyond `bytes`.
    pub fn with_memory_budget(bytes: u64) -> Self {
        let backend = Self::new();
        backend.state.lock().memory_budget = Some(bytes);
        backend
    }

    /// Snapshot of the current bookkeeping.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats.clone()
    }

    /// What descriptor `slot` of heap `kind` points at, if it is written.
    pub fn descriptor(&self, kind: DescriptorHeapKind, slot: u32) -> Option<DummyDescriptor> {
        self.state.lock().descriptors.get(&(kind, slot)).copied()
    }

    fn texture_id(texture: &GpuTexture) -> Result<u64, GraphicsError> {
        match texture {
            GpuTexture::Dummy { id } => Ok(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => Err(GraphicsError::Internal(
                "texture does not belong to the dummy backend".into(),
            )),
        }
    }

    fn buffer_id(buffer: &GpuBuffer) -> Result<(u64, u64), GraphicsError> {
        match buffer {
            GpuBuffer::Dummy { id, size } => Ok((*id, *size)),
            #[cfg(feature = "vulkan-backend")]
            _ => Err(GraphicsError::Internal(
                "buffer does not belong to the dummy backend".into(),
            )),
        }
    }

    fn query_range<'s>(
        state: &'s mut DummyState,
        pool: &GpuQueryPool,
        first: u32,
        count: u32,
    ) -> Result<&'s mut [u64], GraphicsError> {
        let id = match pool {
            GpuQueryPool::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(GraphicsError::Internal(
                    "query pool does not belong to the dummy backend".into(),
                ));
            }
        };
        let queries = state
            .queries
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::Internal(format!("query pool {id} is destroyed")))?;
        let len = queries.len();
        queries
            .get_mut(first as usize..first as usize + count as usize)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "queries {first}+{count} exceed pool {id} of {len}"
                ))
            })
    }

    fn check_range(size: u64, offset: u64, len: u64) -> Result<(), GraphicsError> {
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(GraphicsError::InvalidParameter(format!(
                "range {offset}..{} exceeds buffer size {size}",
                offset.saturating_add(len)
            )));
        }
        Ok(())
    }

    fn execute(state: &mut DummyState, command: &GpuCommand<'_>) -> Result<(), GraphicsError> {
        state.clock += DUMMY_TICKS_PER_COMMAND;
        match command {
            GpuCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (src_id, src_size) = Self::buffer_id(src)?;
                let (dst_id, dst_size) = Self::buffer_id(dst)?;
                Self::check_range(src_size, *src_offset, *size)?;
                Self::check_range(dst_size, *dst_offset, *size)?;
                let bytes = state.contents_mut(src_id, src_size)
                    [*src_offset as usize..(*src_offset + *size) as usize]
                    .to_vec();
                state.contents_mut(dst_id, dst_size)
                    [*dst_offset as usize..(*dst_offset + *size) as usize]
                    .copy_from_slice(&bytes);
            }
            GpuCommand::ClearBuffer { buffer, value } => {
                let (id, size) = Self::buffer_id(buffer)?;
                let pattern = value.to_le_bytes();
                for (i, byte) in state.contents_mut(id, size).iter_mut().enumerate() {
                    *byte = pattern[i % 4];
                }
            }
            GpuCommand::Barriers(barriers) => {
                state.stats.barriers += barriers.len() as u64;
            }
            GpuCommand::ResetQueries { pool, first, count } => {
                Self::query_range(state, pool, *first, *count)?.fill(0);
            }
            GpuCommand::WriteTimestamp { pool, index } => {
                let clock = state.clock;
                Self::query_range(state, pool, *index, 1)?[0] = clock;
            }
            GpuCommand::ResolveQueries {
                pool,
                first,
                count,
                dst,
                offset,
            } => {
                let bytes: Vec<u8> = Self::query_range(state, pool, *first, *count)?
                    .iter()
                    .flat_map(|value| value.to_le_bytes())
                    .collect();
                let (dst_id, dst_size) = Self::buffer_id(dst)?;
                Self::check_range(dst_size, *offset, bytes.len() as u64)?;
                state.contents_mut(dst_id, dst_size)
                    [*offset as usize..*offset as usize + bytes.len()]
                    .copy_from_slice(&bytes);
            }
            GpuCommand::BeginMarker(name) => {
                log::trace!("DummyBackend: begin marker '{}'", name);
            }
            _ => {}
        }
        Ok(())
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError> {
        let mut state = self.state.lock();
        state.reserve(descriptor.size)?;
        let id = state.next_id();
        state.dedicated.insert(id, descriptor.size);
        state.stats.live_buffers += 1;
        log::trace!(
            "DummyBackend: creating buffer {} {:?} (size: {}, state: {:?})",
            id,
            descriptor.label,
            descriptor.size,
            initial_state
        );
        Ok(GpuBuffer::Dummy {
            id,
            size: descriptor.size,
        })
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError> {
        let size = self
            .allocation_info(&ResourceDescriptor::Texture(descriptor.clone()))?
            .size;
        let mut state = self.state.lock();
        state.reserve(size)?;
        let id = state.next_id();
        state.dedicated.insert(id, size);
        state.stats.live_textures += 1;
        log::trace!(
            "DummyBackend: creating texture {} {:?} ({}x{}x{}, state: {:?})",
            id,
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth_or_array_layers,
            initial_state
        );
        Ok(GpuTexture::Dummy { id })
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        match buffer {
            GpuBuffer::Dummy { id, .. } => {
                let mut state = self.state.lock();
                state.release(id);
                state.contents.remove(&id);
                state.stats.live_buffers -= 1;
                state.stats.destroyed_buffers.push(id);
                log::trace!("DummyBackend: destroyed buffer {}", id);
            }
            #[cfg(feature = "vulkan-backend")]
            other => log::error!("DummyBackend: cannot destroy foreign buffer {other:?}"),
        }
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        match texture {
            GpuTexture::Dummy { id } => {
                let mut state = self.state.lock();
                state.release(id);
                state.stats.live_textures -= 1;
                state.stats.destroyed_textures.push(id);
                log::trace!("DummyBackend: destroyed texture {}", id);
            }
            #[cfg(feature = "vulkan-backend")]
            other => log::error!("DummyBackend: cannot destroy foreign texture {other:?}"),
        }
    }

    fn allocation_info(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<AllocationInfo, GraphicsError> {
        Ok(match descriptor {
            ResourceDescriptor::Buffer(desc) => AllocationInfo {
                size: desc.size.max(1).next_multiple_of(BUFFER_ALIGNMENT),
                alignment: BUFFER_ALIGNMENT,
            },
            ResourceDescriptor::Texture(desc) => {
                let end = desc.base_mip.checked_add(desc.mip_levels).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "texture '{}' mip range overflows",
                        desc.debug_name()
                    ))
                })?;
                let bytes: u64 = (desc.base_mip..end).map(|mip| desc.mip_size_bytes(mip)).sum();
                AllocationInfo {
                    size: bytes.max(1).next_multiple_of(TEXTURE_ALIGNMENT),
                    alignment: TEXTURE_ALIGNMENT,
                }
            }
        })
    }

    fn create_heap(&mut self, size: u64, alignment: u64) -> Result<GpuHeap, GraphicsError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "heap alignment {alignment} is not a power of two"
            )));
        }
        let mut state = self.state.lock();
        state.reserve(size)?;
        let id = state.next_id();
        state.dedicated.insert(id, size);
        state.stats.live_heaps += 1;
        log::trace!("DummyBackend: creating heap {} (size: {})", id, size);
        Ok(GpuHeap::Dummy { id, size })
    }

    fn destroy_heap(&mut self, heap: GpuHeap) {
        match heap {
            GpuHeap::Dummy { id, .. } => {
                let mut state = self.state.lock();
                state.release(id);
                state.stats.live_heaps -= 1;
                log::trace!("DummyBackend: destroyed heap {}", id);
            }
            #[cfg(feature = "vulkan-backend")]
            other => log::error!("DummyBackend: cannot destroy foreign heap {other:?}"),
        }
    }

    fn create_placed_buffer(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuBuffer, GraphicsError> {
        let info = self.allocation_info(&ResourceDescriptor::Buffer(descriptor.clone()))?;
        Self::check_placement(heap, offset, info)?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.stats.live_buffers += 1;
        log::trace!(
            "DummyBackend: placing buffer {} {:?} at offset {} (state: {:?})",
            id,
            descriptor.label,
            offset,
            initial_state
        );
        Ok(GpuBuffer::Dummy {
            id,
            size: descriptor.size,
        })
    }

    fn create_placed_texture(
        &mut self,
        heap: &GpuHeap,
        offset: u64,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuTexture, GraphicsError> {
        let info = self.allocation_info(&ResourceDescriptor::Texture(descriptor.clone()))?;
        Self::check_placement(heap, offset, info)?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.stats.live_textures += 1;
        log::trace!(
            "DummyBackend: placing texture {} {:?} at offset {} (state: {:?})",
            id,
            descriptor.label,
            offset,
            initial_state
        );
        Ok(GpuTexture::Dummy { id })
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let (id, size) = Self::buffer_id(buffer)?;
        Self::check_range(size, offset, data.len() as u64)?;
        log::trace!(
            "DummyBackend: write_buffer {} offset={} len={}",
            id,
            offset,
            data.len()
        );
        let mut state = self.state.lock();
        state.contents_mut(id, size)[offset as usize..offset as usize + data.len()]
            .copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let (id, buffer_size) = Self::buffer_id(buffer)?;
        Self::check_range(buffer_size, offset, size)?;
        log::trace!(
            "DummyBackend: read_buffer {} offset={} size={}",
            id,
            offset,
            size
        );
        let mut state = self.state.lock();
        Ok(state.contents_mut(id, buffer_size)[offset as usize..(offset + size) as usize].to_vec())
    }

    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor,
    ) -> Result<GpuPipeline, GraphicsError> {
        let compute = match descriptor {
            PipelineDescriptor::Graphics(desc) => {
                if desc.vertex.bytecode.is_empty() {
                    return Err(GraphicsError::InvalidParameter(
                        "vertex shader bytecode is empty".into(),
                    ));
                }
                false
            }
            PipelineDescriptor::Compute(desc) => {
                if desc.compute.bytecode.is_empty() {
                    return Err(GraphicsError::InvalidParameter(
                        "compute shader bytecode is empty".into(),
                    ));
                }
                true
            }
        };
        let mut state = self.state.lock();
        let id = state.next_id();
        state.stats.live_pipelines += 1;
        log::trace!(
            "DummyBackend: creating pipeline {} {:?}",
            id,
            descriptor.label()
        );
        Ok(GpuPipeline::Dummy { id, compute })
    }

    fn destroy_pipeline(&mut self, pipeline: GpuPipeline) {
        match pipeline {
            GpuPipeline::Dummy { id, .. } => {
                self.state.lock().stats.live_pipelines -= 1;
                log::trace!("DummyBackend: destroyed pipeline {}", id);
            }
            #[cfg(feature = "vulkan-backend")]
            other => log::error!("DummyBackend: cannot destroy foreign pipeline {other:?}"),
        }
    }

    fn create_query_pool(&mut self, count: u32) -> Result<GpuQueryPool, GraphicsError> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.queries.insert(id, vec![0; count as usize]);
        state.stats.live_query_pools += 1;
        log::trace!("DummyBackend: creating query pool {} ({} queries)", id, count);
        Ok(GpuQueryPool::Dummy { id, count })
    }

    fn destroy_query_pool(&mut self, pool: GpuQueryPool) {
        match pool {
            GpuQueryPool::Dummy { id, .. } => {
                let mut state = self.state.lock();
                state.queries.remove(&id);
                state.stats.live_query_pools -= 1;
                log::trace!("DummyBackend: destroyed query pool {}", id);
            }
            #[cfg(feature = "vulkan-backend")]
            other => log::error!("DummyBackend: cannot destroy foreign query pool {other:?}"),
        }
    }

    fn timestamp_period(&self) -> f64 {
        1.0
    }

    fn write_descriptor(
        &mut self,
        kind: DescriptorHeapKind,
        slot: u32,
        view: DescriptorView,
        resource: GpuView<'_>,
    ) -> Result<(), GraphicsError> {
        let descriptor = match resource {
            GpuView::Buffer { buffer, descriptor } => {
                let (id, size) = Self::buffer_id(buffer)?;
                Self::check_range(size, 0, descriptor.size)?;
                DummyDescriptor {
                    allocation: id,
                    view,
                    base_mip: 0,
                    extent: descriptor.size,
                }
            }
            GpuView::Texture {
                texture,
                descriptor,
            } => DummyDescriptor {
                allocation: Self::texture_id(texture)?,
                view,
                base_mip: descriptor.base_mip,
                extent: u64::from(descriptor.mip_levels),
            },
        };
        log::trace!(
            "DummyBackend: {:?} descriptor {} -> {:?}",
            kind,
            slot,
            descriptor
        );
        let mut state = self.state.lock();
        if state.descriptors.insert((kind, slot), descriptor).is_none() {
            state.stats.live_descriptors += 1;
        }
        Ok(())
    }

    fn clear_descriptor(&mut self, kind: DescriptorHeapKind, slot: u32) {
        let mut state = self.state.lock();
        if state.descriptors.remove(&(kind, slot)).is_some() {
            state.stats.live_descriptors -= 1;
        } else {
            log::warn!("DummyBackend: clearing unwritten {:?} descriptor {}", kind, slot);
        }
    }

    fn submit(
        &mut self,
        queue: QueueType,
        commands: &[GpuCommand<'_>],
    ) -> Result<u64, GraphicsError> {
        let mut state = self.state.lock();
        for command in commands {
            Self::execute(&mut state, command)?;
        }
        state.stats.submissions += 1;
        state.stats.commands += commands.len() as u64;
        let value = &mut state.submitted[queue.index()];
        *value += 1;
        let value = *value;
        log::trace!(
            "DummyBackend: submitted {} commands to {:?} (value {})",
            commands.len(),
            queue,
            value
        );
        Ok(value)
    }

    fn completed_submission(&mut self, queue: QueueType) -> Result<u64, GraphicsError> {
        Ok(self.state.lock().submitted[queue.index()])
    }

    fn wait_submission(&mut self, queue: QueueType, value: u64) -> Result<(), GraphicsError> {
        let submitted = self.state.lock().submitted[queue.index()];
        if value > submitted {
            return Err(GraphicsError::InvalidParameter(format!(
                "waiting for {queue:?} submission {value} but only {submitted} were made"
            )));
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        Ok(())
    }
}

impl DummyBackend {
    fn check_placement(
        heap: &GpuHeap,
        offset: u64,
        info: AllocationInfo,
    ) -> Result<(), GraphicsError> {
        if offset % info.alignment != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "placement offset {offset} is not aligned to {}",
                info.alignment
            )));
        }
        if offset + info.size > heap.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "placement {offset}+{} exceeds heap size {}",
                info.size,
                heap.size()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::backend::{GpuBarrier, GpuResource};
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    #[test]
    fn test_buffer_roundtrip_through_copy() {
        let mut backend = DummyBackend::new();
        let upload = backend
            .create_buffer(&BufferDescriptor::upload(16), ResourceState::GENERIC_READ)
            .unwrap();
        let target = backend
            .create_buffer(&BufferDescriptor::readback(16), ResourceState::COPY_DEST)
            .unwrap();

        backend.write_buffer(&upload, 4, &[1, 2, 3, 4]).unwrap();
        backend
            .submit(
                QueueType::Graphics,
                &[GpuCommand::CopyBuffer {
                    src: &upload,
                    src_offset: 4,
                    dst: &target,
                    dst_offset: 0,
                    size: 4,
                }],
            )
            .unwrap();

        assert_eq!(backend.read_buffer(&target, 0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_timestamps_follow_the_clock() {
        let mut backend = DummyBackend::new();
        let pool = backend.create_query_pool(2).unwrap();
        let readback = backend
            .create_buffer(&BufferDescriptor::readback(16), ResourceState::COPY_DEST)
            .unwrap();
        backend
            .submit(
                QueueType::Graphics,
                &[
                    GpuCommand::ResetQueries {
                        pool: &pool,
                        first: 0,
                        count: 2,
                    },
                    GpuCommand::WriteTimestamp {
                        pool: &pool,
                        index: 0,
                    },
                    GpuCommand::Dispatch { x: 1, y: 1, z: 1 },
                    GpuCommand::WriteTimestamp {
                        pool: &pool,
                        index: 1,
                    },
                    GpuCommand::ResolveQueries {
                        pool: &pool,
                        first: 0,
                        count: 2,
                        dst: &readback,
                        offset: 0,
                    },
                ],
            )
            .unwrap();

        let bytes = backend.read_buffer(&readback, 0, 16).unwrap();
        let values: Vec<u64> = bytes
            .chunks_exact(8)
            .map(bytemuck::pod_read_unaligned::<u64>)
            .collect();
        assert_eq!(values[1] - values[0], 2 * DUMMY_TICKS_PER_COMMAND);

        let overrun = backend.submit(
            QueueType::Graphics,
            &[GpuCommand::WriteTimestamp {
                pool: &pool,
                index: 2,
            }],
        );
        assert!(matches!(overrun, Err(GraphicsError::InvalidParameter(_))));

        backend.destroy_query_pool(pool);
        assert_eq!(backend.stats().live_query_pools, 0);
    }

    #[test]
    fn test_out_of_range_write_fails() {
        let mut backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::upload(8), ResourceState::GENERIC_READ)
            .unwrap();
        assert!(matches!(
            backend.write_buffer(&buffer, 6, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_memory_budget() {
        let mut backend = DummyBackend::with_memory_budget(1024);
        let desc = BufferDescriptor::new(768, BufferUsage::Vertex);
        let first = backend.create_buffer(&desc, ResourceState::COMMON).unwrap();
        assert_eq!(
            backend.create_buffer(&desc, ResourceState::COMMON).unwrap_err(),
            GraphicsError::OutOfMemory
        );

        backend.destroy_buffer(first);
        assert!(backend.create_buffer(&desc, ResourceState::COMMON).is_ok());
    }

    #[test]
    fn test_shared_stats_between_clones() {
        let observer = DummyBackend::new();
        let mut backend = observer.clone();
        let tex = backend
            .create_texture(
                &TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead),
                ResourceState::ALL_SHADER_RESOURCE,
            )
            .unwrap();
        assert_eq!(observer.stats().live_textures, 1);
        backend.destroy_texture(tex);
        assert_eq!(observer.stats().live_textures, 0);
        assert_eq!(observer.stats().destroyed_textures.len(), 1);
    }

    #[test]
    fn test_placement_validation() {
        let mut backend = DummyBackend::new();
        let heap = backend.create_heap(1024, 256).unwrap();
        let desc = BufferDescriptor::new(256, BufferUsage::ShaderRead);

        assert!(
            backend
                .create_placed_buffer(&heap, 768, &desc, ResourceState::COMMON)
                .is_ok()
        );
        assert!(
            backend
                .create_placed_buffer(&heap, 1024, &desc, ResourceState::COMMON)
                .is_err()
        );
        assert!(
            backend
                .create_placed_buffer(&heap, 100, &desc, ResourceState::COMMON)
                .is_err()
        );
    }

    #[test]
    fn test_submission_values_per_queue() {
        let mut backend = DummyBackend::new();
        assert_eq!(backend.submit(QueueType::Graphics, &[]).unwrap(), 1);
        assert_eq!(backend.submit(QueueType::Graphics, &[]).unwrap(), 2);
        assert_eq!(backend.submit(QueueType::Compute, &[]).unwrap(), 1);
        assert_eq!(backend.completed_submission(QueueType::Graphics).unwrap(), 2);
        assert!(backend.wait_submission(QueueType::Copy, 1).is_err());
    }

    #[test]
    fn test_descriptor_writes_are_recorded() {
        let mut backend = DummyBackend::new();
        let desc = BufferDescriptor::structured(8, 16);
        let buffer = backend.create_buffer(&desc, ResourceState::ALL_SHADER_RESOURCE).unwrap();
        backend
            .write_descriptor(
                DescriptorHeapKind::Resource,
                3,
                DescriptorView::ShaderRead,
                GpuView::Buffer {
                    buffer: &buffer,
                    descriptor: &desc,
                },
            )
            .unwrap();

        let written = backend.descriptor(DescriptorHeapKind::Resource, 3).unwrap();
        assert_eq!(written.view, DescriptorView::ShaderRead);
        assert_eq!(written.extent, 128);
        assert!(backend.descriptor(DescriptorHeapKind::RenderTarget, 3).is_none());
        assert_eq!(backend.stats().live_descriptors, 1);

        backend.clear_descriptor(DescriptorHeapKind::Resource, 3);
        assert!(backend.descriptor(DescriptorHeapKind::Resource, 3).is_none());
        assert_eq!(backend.stats().live_descriptors, 0);
    }

    #[test]
    fn test_barriers_are_counted() {
        let mut backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::rw_byte_address(64), ResourceState::UNORDERED_ACCESS)
            .unwrap();
        let barrier = GpuBarrier {
            resource: GpuResource::Buffer(&buffer),
            base_mip: 0,
            mip_count: 1,
            before: ResourceState::UNORDERED_ACCESS,
            after: ResourceState::ALL_SHADER_RESOURCE,
        };
        backend
            .submit(QueueType::Compute, &[GpuCommand::Barriers(smallvec![barrier])])
            .unwrap();
        assert_eq!(backend.stats().barriers, 1);
    }
}
