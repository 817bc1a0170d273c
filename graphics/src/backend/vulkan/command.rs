//! Command pool management and recording of resolved command streams.

use ash::vk;
use smallvec::SmallVec;

use super::barriers::BarrierBatch;
use super::pipeline::{BINDLESS_SET, PUSH_CONSTANTS_SIZE, slot_binding};
use super::{DeviceLimits, VulkanTexture, vk_buffer, vk_pipeline, vk_query_pool, vk_texture};
use crate::backend::{GpuAttachment, GpuBarrier, GpuCommand, GpuResource};
use crate::command_list::{BindSlot, IndexFormat};
use crate::error::GraphicsError;
use crate::types::{ClearValue, DrawIndexedIndirectArgs, DrawIndirectArgs};

use super::debug::label_cstring;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Allocate one primary command buffer.
pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe { device.allocate_command_buffers(&info) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to allocate command buffer: {:?}", e))
    })?;
    buffers
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("no command buffer allocated".into()))
}

fn check_queries(pool: &super::VulkanQueryPool, first: u32, count: u32) -> Result<(), GraphicsError> {
    if first.checked_add(count).is_none_or(|end| end > pool.count) {
        return Err(GraphicsError::InvalidParameter(format!(
            "queries {first}+{count} exceed a pool of {}",
            pool.count
        )));
    }
    Ok(())
}

/// Device objects a recorder needs.
pub struct RecordContext<'a> {
    pub device: &'a ash::Device,
    pub push_descriptor: &'a ash::khr::push_descriptor::Device,
    pub debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    pub layout: vk::PipelineLayout,
    pub bindless_set: vk::DescriptorSet,
    pub limits: &'a DeviceLimits,
}

struct ColorTarget {
    view: vk::ImageView,
    layout: vk::ImageLayout,
}

struct DepthTarget {
    view: vk::ImageView,
    layout: vk::ImageLayout,
    stencil: bool,
}

struct RenderTargets {
    colors: SmallVec<[ColorTarget; 8]>,
    depth: Option<DepthTarget>,
    extent: vk::Extent2D,
}

const GRAPHICS: usize = 0;
const COMPUTE: usize = 1;

/// Translates a resolved command stream into one Vulkan command buffer.
///
/// Rendering is begun lazily on the first draw after the render targets are
/// set and ended before anything that cannot run inside a render pass.
/// Constant slots are pushed as descriptors right before each draw or
/// dispatch whose bind point saw a slot change.
pub struct Recorder<'a> {
    ctx: RecordContext<'a>,
    cmd: vk::CommandBuffer,
    slots: [Option<vk::DescriptorBufferInfo>; 3],
    dirty: [bool; 2],
    targets: Option<RenderTargets>,
    rendering: bool,
    batch: BarrierBatch,
}

impl<'a> Recorder<'a> {
    /// Create a recorder for a command buffer in the recording state.
    pub fn new(ctx: RecordContext<'a>, cmd: vk::CommandBuffer) -> Self {
        Self {
            ctx,
            cmd,
            slots: [None; 3],
            dirty: [false; 2],
            targets: None,
            rendering: false,
            batch: BarrierBatch::new(),
        }
    }

    /// Record the whole stream.
    pub fn record(mut self, commands: &[GpuCommand<'_>]) -> Result<(), GraphicsError> {
        for bind_point in [vk::PipelineBindPoint::GRAPHICS, vk::PipelineBindPoint::COMPUTE] {
            unsafe {
                self.ctx.device.cmd_bind_descriptor_sets(
                    self.cmd,
                    bind_point,
                    self.ctx.layout,
                    BINDLESS_SET,
                    &[self.ctx.bindless_set],
                    &[],
                )
            };
        }
        for command in commands {
            self.record_command(command)?;
        }
        self.end_rendering();
        Ok(())
    }

    fn record_command(&mut self, command: &GpuCommand<'_>) -> Result<(), GraphicsError> {
        let device = self.ctx.device;
        let cmd = self.cmd;
        match command {
            GpuCommand::SetPipeline(pipeline) => {
                let pipeline = vk_pipeline(pipeline)?;
                unsafe { device.cmd_bind_pipeline(cmd, pipeline.bind_point, pipeline.pipeline) };
            }
            GpuCommand::PushConstants(data) => self.push_constants(data)?,
            GpuCommand::BindBuffer {
                slot,
                buffer,
                offset,
            } => self.bind_slot(*slot, vk_buffer(buffer)?, *offset)?,
            GpuCommand::BindIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                let index_type = match format {
                    IndexFormat::U16 => vk::IndexType::UINT16,
                    IndexFormat::U32 => vk::IndexType::UINT32,
                };
                let buffer = vk_buffer(buffer)?;
                unsafe { device.cmd_bind_index_buffer(cmd, buffer.buffer, *offset, index_type) };
            }
            GpuCommand::BindVertexBuffer {
                slot,
                buffer,
                offset,
            } => {
                let buffer = vk_buffer(buffer)?;
                unsafe { device.cmd_bind_vertex_buffers(cmd, *slot, &[buffer.buffer], &[*offset]) };
            }
            GpuCommand::SetViewport(viewport) => {
                let viewport = vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                };
                unsafe { device.cmd_set_viewport(cmd, 0, &[viewport]) };
            }
            GpuCommand::SetScissor(rect) => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D {
                        x: rect.x,
                        y: rect.y,
                    },
                    extent: vk::Extent2D {
                        width: rect.width,
                        height: rect.height,
                    },
                };
                unsafe { device.cmd_set_scissor(cmd, 0, &[scissor]) };
            }
            GpuCommand::SetRenderTargets { colors, depth } => {
                self.end_rendering();
                self.set_render_targets(colors, depth.as_ref())?;
            }
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                self.prepare_draw()?;
                unsafe {
                    device.cmd_draw(
                        cmd,
                        *vertex_count,
                        *instance_count,
                        *first_vertex,
                        *first_instance,
                    )
                };
            }
            GpuCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                self.prepare_draw()?;
                unsafe {
                    device.cmd_draw_indexed(
                        cmd,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    )
                };
            }
            GpuCommand::DrawIndirect {
                buffer,
                offset,
                draw_count,
                indexed,
            } => {
                let buffer = vk_buffer(buffer)?.buffer;
                self.prepare_draw()?;
                unsafe {
                    if *indexed {
                        device.cmd_draw_indexed_indirect(
                            cmd,
                            buffer,
                            *offset,
                            *draw_count,
                            DrawIndexedIndirectArgs::SIZE as u32,
                        );
                    } else {
                        device.cmd_draw_indirect(
                            cmd,
                            buffer,
                            *offset,
                            *draw_count,
                            DrawIndirectArgs::SIZE as u32,
                        );
                    }
                }
            }
            GpuCommand::Dispatch { x, y, z } => {
                self.prepare_dispatch();
                unsafe { device.cmd_dispatch(cmd, *x, *y, *z) };
            }
            GpuCommand::DispatchIndirect { buffer, offset } => {
                let buffer = vk_buffer(buffer)?.buffer;
                self.prepare_dispatch();
                unsafe { device.cmd_dispatch_indirect(cmd, buffer, *offset) };
            }
            GpuCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                self.end_rendering();
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe {
                    device.cmd_copy_buffer(cmd, vk_buffer(src)?.buffer, vk_buffer(dst)?.buffer, &[region])
                };
            }
            GpuCommand::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                mip,
                width,
                height,
                depth,
            } => {
                self.end_rendering();
                let src = vk_buffer(src)?;
                let dst = vk_texture(dst)?;
                let block_size = dst.block_size.max(1);
                if row_pitch % block_size != 0 {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "row pitch {row_pitch} is not a multiple of the texel size {block_size}"
                    )));
                }
                let region = vk::BufferImageCopy {
                    buffer_offset: *src_offset,
                    buffer_row_length: row_pitch / block_size,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        // Copies address the depth plane only.
                        aspect_mask: if dst.has_depth() {
                            vk::ImageAspectFlags::DEPTH
                        } else {
                            vk::ImageAspectFlags::COLOR
                        },
                        mip_level: *mip,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: *width,
                        height: *height,
                        depth: *depth,
                    },
                };
                self.with_transfer_layout(dst, *mip, 1, |recorder, layout| unsafe {
                    recorder.ctx.device.cmd_copy_buffer_to_image(
                        recorder.cmd,
                        src.buffer,
                        dst.image,
                        layout,
                        &[region],
                    )
                });
            }
            GpuCommand::ClearTexture {
                texture,
                base_mip,
                mip_count,
                value,
            } => {
                self.end_rendering();
                let texture = vk_texture(texture)?;
                let range = vk::ImageSubresourceRange {
                    aspect_mask: texture.aspect,
                    base_mip_level: *base_mip,
                    level_count: *mip_count,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                };
                match (value, texture.has_depth()) {
                    (ClearValue::Color(color), false) => {
                        let color = vk::ClearColorValue { float32: *color };
                        self.with_transfer_layout(texture, *base_mip, *mip_count, |recorder, layout| unsafe {
                            recorder.ctx.device.cmd_clear_color_image(
                                recorder.cmd,
                                texture.image,
                                layout,
                                &color,
                                &[range],
                            )
                        });
                    }
                    (ClearValue::DepthStencil { depth, stencil }, true) => {
                        let value = vk::ClearDepthStencilValue {
                            depth: *depth,
                            stencil: u32::from(*stencil),
                        };
                        self.with_transfer_layout(texture, *base_mip, *mip_count, |recorder, layout| unsafe {
                            recorder.ctx.device.cmd_clear_depth_stencil_image(
                                recorder.cmd,
                                texture.image,
                                layout,
                                &value,
                                &[range],
                            )
                        });
                    }
                    _ => {
                        return Err(GraphicsError::InvalidParameter(
                            "clear value does not match the texture format".into(),
                        ));
                    }
                }
            }
            GpuCommand::ClearBuffer { buffer, value } => {
                self.end_rendering();
                let buffer = vk_buffer(buffer)?;
                unsafe { device.cmd_fill_buffer(cmd, buffer.buffer, 0, vk::WHOLE_SIZE, *value) };
            }
            GpuCommand::Barriers(barriers) => {
                self.end_rendering();
                self.barriers(barriers)?;
            }
            GpuCommand::ResetQueries { pool, first, count } => {
                self.end_rendering();
                let pool = vk_query_pool(pool)?;
                check_queries(pool, *first, *count)?;
                unsafe { device.cmd_reset_query_pool(cmd, pool.pool, *first, *count) };
            }
            GpuCommand::WriteTimestamp { pool, index } => {
                let pool = vk_query_pool(pool)?;
                check_queries(pool, *index, 1)?;
                unsafe {
                    device.cmd_write_timestamp2(
                        cmd,
                        vk::PipelineStageFlags2::ALL_COMMANDS,
                        pool.pool,
                        *index,
                    )
                };
            }
            GpuCommand::ResolveQueries {
                pool,
                first,
                count,
                dst,
                offset,
            } => {
                self.end_rendering();
                let pool = vk_query_pool(pool)?;
                check_queries(pool, *first, *count)?;
                let dst = vk_buffer(dst)?;
                unsafe {
                    device.cmd_copy_query_pool_results(
                        cmd,
                        pool.pool,
                        *first,
                        *count,
                        dst.buffer,
                        *offset,
                        std::mem::size_of::<u64>() as u64,
                        vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                    )
                };
                // Make the copy visible to host reads after the submission completes.
                let barrier = vk::MemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::COPY)
                    .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags2::HOST)
                    .dst_access_mask(vk::AccessFlags2::HOST_READ);
                let barriers = [barrier];
                let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
                unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
            }
            GpuCommand::BeginMarker(name) => {
                self.end_rendering();
                if let Some(debug_utils) = self.ctx.debug_utils {
                    let name = label_cstring(name);
                    let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
                    unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
                }
            }
            GpuCommand::EndMarker => {
                self.end_rendering();
                if let Some(debug_utils) = self.ctx.debug_utils {
                    unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
                }
            }
        }
        Ok(())
    }

    fn push_constants(&mut self, data: &[u8]) -> Result<(), GraphicsError> {
        if data.len() > PUSH_CONSTANTS_SIZE as usize {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} bytes of push constants exceed the {PUSH_CONSTANTS_SIZE} byte limit",
                data.len()
            )));
        }
        // Sizes must be a multiple of four.
        let mut padded = [0u8; PUSH_CONSTANTS_SIZE as usize];
        padded[..data.len()].copy_from_slice(data);
        let size = data.len().next_multiple_of(4);
        unsafe {
            self.ctx.device.cmd_push_constants(
                self.cmd,
                self.ctx.layout,
                vk::ShaderStageFlags::ALL,
                0,
                &padded[..size],
            )
        };
        Ok(())
    }

    fn bind_slot(
        &mut self,
        slot: BindSlot,
        buffer: &super::VulkanBuffer,
        offset: u64,
    ) -> Result<(), GraphicsError> {
        let limits = self.ctx.limits;
        let (alignment, max_range) = match slot {
            BindSlot::Cbv0 => (limits.min_uniform_offset_alignment, limits.max_uniform_range),
            BindSlot::Srv0 | BindSlot::Srv1 => {
                (limits.min_storage_offset_alignment, limits.max_storage_range)
            }
        };
        if offset % alignment.max(1) != 0 || offset >= buffer.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "offset {offset} cannot be bound to {slot:?} (alignment {alignment}, size {})",
                buffer.size
            )));
        }
        let index = slot_binding(slot).0 as usize;
        self.slots[index] = Some(vk::DescriptorBufferInfo {
            buffer: buffer.buffer,
            offset,
            range: (buffer.size - offset).min(max_range),
        });
        self.dirty = [true; 2];
        Ok(())
    }

    fn flush_slots(&mut self, bind_point: vk::PipelineBindPoint, index: usize) {
        if !self.dirty[index] {
            return;
        }
        self.dirty[index] = false;

        let bound: SmallVec<[(u32, vk::DescriptorType, vk::DescriptorBufferInfo); 3]> =
            [BindSlot::Cbv0, BindSlot::Srv0, BindSlot::Srv1]
                .into_iter()
                .filter_map(|slot| {
                    let (binding, descriptor_type) = slot_binding(slot);
                    self.slots[binding as usize].map(|info| (binding, descriptor_type, info))
                })
                .collect();
        if bound.is_empty() {
            return;
        }
        let writes: SmallVec<[vk::WriteDescriptorSet<'_>; 3]> = bound
            .iter()
            .map(|(binding, descriptor_type, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe {
            self.ctx.push_descriptor.cmd_push_descriptor_set(
                self.cmd,
                bind_point,
                self.ctx.layout,
                0,
                &writes,
            )
        };
    }

    fn set_render_targets(
        &mut self,
        colors: &[GpuAttachment<'_>],
        depth: Option<&GpuAttachment<'_>>,
    ) -> Result<(), GraphicsError> {
        if colors.is_empty() && depth.is_none() {
            self.targets = None;
            return Ok(());
        }

        let mut extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let mut targets = RenderTargets {
            colors: SmallVec::new(),
            depth: None,
            extent,
        };

        for attachment in colors {
            let texture = vk_texture(attachment.texture)?;
            let view = texture.mip_view(attachment.mip)?;
            let layout = self.attachment_layout(
                texture,
                attachment.mip,
                &[vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::GENERAL],
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            targets.colors.push(ColorTarget { view, layout });
            extent.width = extent.width.min(attachment.width);
            extent.height = extent.height.min(attachment.height);
        }

        if let Some(attachment) = depth {
            let texture = vk_texture(attachment.texture)?;
            let view = texture.mip_view(attachment.mip)?;
            let layout = self.attachment_layout(
                texture,
                attachment.mip,
                &[
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::GENERAL,
                ],
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            );
            targets.depth = Some(DepthTarget {
                view,
                layout,
                stencil: texture.aspect.contains(vk::ImageAspectFlags::STENCIL),
            });
            extent.width = extent.width.min(attachment.width);
            extent.height = extent.height.min(attachment.height);
        }

        self.flush_barriers();
        targets.extent = extent;
        self.targets = Some(targets);
        Ok(())
    }

    /// Layout an attachment is rendered in, moving it there if its tracked
    /// layout is not usable for rendering.
    fn attachment_layout(
        &mut self,
        texture: &VulkanTexture,
        mip: u32,
        accepted: &[vk::ImageLayout],
        fallback: vk::ImageLayout,
    ) -> vk::ImageLayout {
        let mut layouts = texture.layouts.lock();
        let Some(current) = layouts.get_mut(mip as usize) else {
            return fallback;
        };
        if accepted.contains(current) {
            return *current;
        }
        self.batch
            .add_layout_change(texture.image, texture.aspect, mip, 1, *current, fallback);
        *current = fallback;
        fallback
    }

    fn prepare_draw(&mut self) -> Result<(), GraphicsError> {
        self.flush_slots(vk::PipelineBindPoint::GRAPHICS, GRAPHICS);
        if self.rendering {
            return Ok(());
        }
        let Some(targets) = &self.targets else {
            return Err(GraphicsError::InvalidState(
                "draw recorded without render targets".into(),
            ));
        };

        let colors: SmallVec<[vk::RenderingAttachmentInfo<'_>; 8]> = targets
            .colors
            .iter()
            .map(|target| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(target.view)
                    .image_layout(target.layout)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();
        let depth = targets.depth.as_ref().map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(target.view)
                .image_layout(target.layout)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: targets.extent,
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = &depth {
            info = info.depth_attachment(depth);
            if targets.depth.as_ref().is_some_and(|target| target.stencil) {
                info = info.stencil_attachment(depth);
            }
        }

        unsafe { self.ctx.device.cmd_begin_rendering(self.cmd, &info) };
        self.rendering = true;
        Ok(())
    }

    fn prepare_dispatch(&mut self) {
        self.end_rendering();
        self.flush_slots(vk::PipelineBindPoint::COMPUTE, COMPUTE);
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.ctx.device.cmd_end_rendering(self.cmd) };
            self.rendering = false;
        }
    }

    fn flush_barriers(&mut self) {
        self.batch.submit(self.ctx.device, self.cmd);
        self.batch.clear();
    }

    fn barriers(&mut self, barriers: &[GpuBarrier<'_>]) -> Result<(), GraphicsError> {
        for barrier in barriers {
            if barrier.before == barrier.after {
                self.batch.add_write_dependency(barrier.after);
                continue;
            }
            match barrier.resource {
                GpuResource::Buffer(buffer) => {
                    let buffer = vk_buffer(buffer)?;
                    self.batch
                        .add_buffer_barrier(buffer.buffer, barrier.before, barrier.after);
                }
                GpuResource::Texture(texture) => {
                    let texture = vk_texture(texture)?;
                    texture.transition(
                        &mut self.batch,
                        barrier.base_mip,
                        barrier.mip_count,
                        barrier.before,
                        barrier.after,
                    );
                }
            }
        }
        self.flush_barriers();
        Ok(())
    }

    /// Run `op` with the mip range in a layout transfers and clears accept,
    /// detouring through `TRANSFER_DST_OPTIMAL` when needed.
    fn with_transfer_layout(
        &mut self,
        texture: &VulkanTexture,
        base_mip: u32,
        mip_count: u32,
        op: impl Fn(&Self, vk::ImageLayout),
    ) {
        let layouts: Vec<vk::ImageLayout> = {
            let tracked = texture.layouts.lock();
            let end = (base_mip + mip_count).min(tracked.len() as u32);
            tracked[(base_mip as usize).min(tracked.len())..end as usize].to_vec()
        };
        let in_place = layouts.iter().all(|layout| {
            *layout == layouts[0]
                && matches!(
                    *layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::GENERAL
                )
        });
        if in_place && !layouts.is_empty() {
            op(self, layouts[0]);
            return;
        }

        let dst = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        for (offset, layout) in layouts.iter().enumerate() {
            let mip = base_mip + offset as u32;
            self.batch
                .add_layout_change(texture.image, texture.aspect, mip, 1, *layout, dst);
        }
        self.flush_barriers();
        op(self, dst);
        for (offset, layout) in layouts.iter().enumerate() {
            let mip = base_mip + offset as u32;
            self.batch
                .add_layout_change(texture.image, texture.aspect, mip, 1, dst, *layout);
        }
        self.flush_barriers();
    }
}
