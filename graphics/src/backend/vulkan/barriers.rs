//! Barrier batching for Vulkan.
//!
//! Transitions recorded back to back are collected into one batch and
//! submitted as a single `vkCmdPipelineBarrier2` call.

use ash::vk;

use super::conversion::{StateAccess, state_access};
use crate::types::ResourceState;

/// Information for a single image barrier.
#[derive(Debug, Clone, Copy)]
struct ImageBarrierInfo {
    image: vk::Image,
    src: StateAccess,
    dst: StateAccess,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
    base_mip: u32,
    mip_count: u32,
}

/// Information for a single buffer barrier.
#[derive(Debug, Clone, Copy)]
struct BufferBarrierInfo {
    buffer: vk::Buffer,
    src: StateAccess,
    dst: StateAccess,
}

/// A batch of memory barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    images: Vec<ImageBarrierInfo>,
    buffers: Vec<BufferBarrierInfo>,
    /// Global write-after-write dependencies.
    memory: Vec<StateAccess>,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer state transition.
    pub fn add_buffer_barrier(
        &mut self,
        buffer: vk::Buffer,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.buffers.push(BufferBarrierInfo {
            buffer,
            src: state_access(before),
            dst: state_access(after),
        });
    }

    /// Add an image transition over a mip range.
    ///
    /// `old_layout` is the layout the image is actually in, which can differ
    /// from the one `before` implies right after creation.
    #[allow(clippy::too_many_arguments)]
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
        before: ResourceState,
        after: ResourceState,
        old_layout: vk::ImageLayout,
    ) {
        let dst = state_access(after);
        self.images.push(ImageBarrierInfo {
            image,
            src: state_access(before),
            dst,
            old_layout,
            new_layout: dst.layout,
            aspect_mask,
            base_mip,
            mip_count,
        });
    }

    /// Order writes in `state` against earlier writes in the same state.
    ///
    /// Layouts stay as they are, so a global memory barrier covers every
    /// resource in that state.
    pub fn add_write_dependency(&mut self, state: ResourceState) {
        let access = state_access(state);
        if !self.memory.contains(&access) {
            self.memory.push(access);
        }
    }

    /// Add a layout change outside of any tracked state transition.
    ///
    /// Waits on all prior work, so it is only used for first-use transitions
    /// and the short detours clears and copies need.
    pub fn add_layout_change(
        &mut self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let any = |layout| StateAccess {
            stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            access: vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            layout,
        };
        self.images.push(ImageBarrierInfo {
            image,
            src: any(old_layout),
            dst: any(new_layout),
            old_layout,
            new_layout,
            aspect_mask,
            base_mip,
            mip_count,
        });
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty() && self.memory.is_empty()
    }

    /// Record all barriers in a single pipeline barrier command.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        let image_barriers: Vec<vk::ImageMemoryBarrier2<'_>> = self
            .images
            .iter()
            .map(|info| {
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(info.src.stage)
                    .src_access_mask(info.src.access)
                    .dst_stage_mask(info.dst.stage)
                    .dst_access_mask(info.dst.access)
                    .old_layout(info.old_layout)
                    .new_layout(info.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(info.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: info.aspect_mask,
                        base_mip_level: info.base_mip,
                        level_count: info.mip_count,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
            })
            .collect();

        let buffer_barriers: Vec<vk::BufferMemoryBarrier2<'_>> = self
            .buffers
            .iter()
            .map(|info| {
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(info.src.stage)
                    .src_access_mask(info.src.access)
                    .dst_stage_mask(info.dst.stage)
                    .dst_access_mask(info.dst.access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(info.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
            })
            .collect();

        let memory_barriers: Vec<vk::MemoryBarrier2<'_>> = self
            .memory
            .iter()
            .map(|access| {
                vk::MemoryBarrier2::default()
                    .src_stage_mask(access.stage)
                    .src_access_mask(access.access)
                    .dst_stage_mask(access.stage)
                    .dst_access_mask(access.access)
            })
            .collect();

        let dependency = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);

        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
        self.memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_image_barrier_uses_tracked_old_layout() {
        let mut batch = BarrierBatch::new();
        batch.add_image_barrier(
            vk::Image::from_raw(1),
            vk::ImageAspectFlags::COLOR,
            0,
            1,
            ResourceState::UNORDERED_ACCESS,
            ResourceState::PIXEL_SHADER_RESOURCE,
            vk::ImageLayout::GENERAL,
        );

        let info = batch.images[0];
        assert_eq!(info.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(info.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(info.src.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert!(info.dst.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }

    #[test]
    fn test_write_dependency_waits_on_writes() {
        let mut batch = BarrierBatch::new();
        batch.add_write_dependency(ResourceState::UNORDERED_ACCESS);
        batch.add_write_dependency(ResourceState::UNORDERED_ACCESS);
        assert!(!batch.is_empty());
        assert_eq!(batch.memory.len(), 1);

        let access = batch.memory[0];
        assert!(access.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert!(access.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(batch.images.is_empty());
    }

    #[test]
    fn test_batch_clear() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(
            vk::Buffer::from_raw(7),
            ResourceState::COPY_DEST,
            ResourceState::ALL_SHADER_RESOURCE,
        );
        batch.add_layout_change(
            vk::Image::from_raw(8),
            vk::ImageAspectFlags::DEPTH,
            0,
            3,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        batch.add_write_dependency(ResourceState::RENDER_TARGET);
        assert_eq!((batch.images.len(), batch.buffers.len(), batch.memory.len()), (1, 1, 1));

        batch.clear();
        assert!(batch.is_empty());
    }
}
