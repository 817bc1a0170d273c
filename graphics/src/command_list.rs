//! Command recording.
//!
//! A [`CommandList`] is a plain recording of [`Command`]s against device
//! handles. Nothing reaches the GPU until the list is closed and handed to
//! [`Device::submit`](crate::device::Device::submit), which resolves every
//! handle and fails loudly on stale ones.
//!
//! # Lifecycle
//!
//! ```text
//! Initial --begin--> Recording --close--> Closed --submit--> Submitted
//!    ^                                      |                    |
//!    +------------------ begin -------------+-------- begin -----+
//! ```

use bytemuck::Pod;
use smallvec::SmallVec;

use crate::device::{BufferId, PipelineId, QueryPoolId, ResourceId, TextureId};
use crate::error::GraphicsError;
use crate::types::{ClearValue, ResourceState, ScissorRect, Subresource, Viewport};

/// Maximum size of push constants in bytes.
pub const MAX_PUSH_CONSTANTS_SIZE: usize = 128;

/// Queue a command list is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    /// Graphics queue (also accepts compute and copy work).
    #[default]
    Graphics,
    /// Async compute queue.
    Compute,
    /// Copy queue.
    Copy,
}

impl QueueType {
    /// All queue types.
    pub const ALL: [Self; 3] = [Self::Graphics, Self::Compute, Self::Copy];

    /// Dense index of this queue.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }
}

/// Fixed binding slots shared by every pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindSlot {
    /// Global constants.
    Cbv0,
    /// Per-frame constants.
    Srv0,
    /// Per-pass constants.
    Srv1,
}

/// Index buffer element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    #[default]
    U32,
}

/// One state transition on a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// Transitioned resource.
    pub resource: ResourceId,
    /// Affected part, mips relative to the handle's own range.
    pub subresource: Subresource,
    /// State before the barrier.
    pub before: ResourceState,
    /// State after the barrier.
    pub after: ResourceState,
}

/// Texture bound as an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureAttachment {
    /// Texture or texture view.
    pub texture: TextureId,
    /// Mip rendered to, relative to the handle's range.
    pub mip: u32,
}

/// Recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPipeline(PipelineId),
    PushConstants(SmallVec<[u8; MAX_PUSH_CONSTANTS_SIZE]>),
    BindToSlot {
        buffer: BufferId,
        slot: BindSlot,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferId,
        offset: u64,
        format: IndexFormat,
    },
    BindVertexBuffer {
        slot: u32,
        buffer: BufferId,
        offset: u64,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRenderTargets {
        colors: SmallVec<[TextureAttachment; 8]>,
        depth: Option<TextureAttachment>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: BufferId,
        offset: u64,
        draw_count: u32,
        indexed: bool,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: BufferId,
        offset: u64,
    },
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: BufferId,
        src_offset: u64,
        row_pitch: u32,
        dst: TextureId,
        mip: u32,
    },
    ClearTexture {
        texture: TextureId,
        value: ClearValue,
    },
    ClearBuffer {
        buffer: BufferId,
        value: u32,
    },
    Barriers(SmallVec<[ResourceBarrier; 4]>),
    ResetQueries {
        pool: QueryPoolId,
        first: u32,
        count: u32,
    },
    WriteTimestamp {
        pool: QueryPoolId,
        index: u32,
    },
    ResolveQueries {
        pool: QueryPoolId,
        first: u32,
        count: u32,
        dst: BufferId,
        offset: u64,
    },
    BeginMarker(String),
    EndMarker,
}

/// Recording state of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandListState {
    /// Never recorded.
    #[default]
    Initial,
    /// Accepting commands.
    Recording,
    /// Closed and ready to submit.
    Closed,
    /// Handed to the device.
    Submitted,
}

/// A batch of GPU commands for one queue.
#[derive(Debug, Default)]
pub struct CommandList {
    queue_type: QueueType,
    state: CommandListState,
    commands: Vec<Command>,
    frame_index: u32,
    submission_value: u64,
}

impl CommandList {
    /// Create an empty command list for `queue_type`.
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            ..Default::default()
        }
    }

    /// Start (or restart) recording, dropping previously recorded commands.
    pub fn begin(&mut self) -> Result<(), GraphicsError> {
        if self.state == CommandListState::Recording {
            return Err(GraphicsError::InvalidState(
                "command list is already recording".into(),
            ));
        }
        self.commands.clear();
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// Stop recording.
    pub fn close(&mut self) -> Result<(), GraphicsError> {
        if self.state != CommandListState::Recording {
            return Err(GraphicsError::InvalidState(format!(
                "cannot close a command list in state {:?}",
                self.state
            )));
        }
        self.state = CommandListState::Closed;
        Ok(())
    }

    /// Called by the device once the list is handed to the backend.
    pub(crate) fn mark_submitted(&mut self, frame_index: u32, submission_value: u64) {
        self.state = CommandListState::Submitted;
        self.frame_index = frame_index;
        self.submission_value = submission_value;
    }

    /// Queue this list targets.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Current recording state.
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// Returns true while commands can be recorded.
    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    /// Recorded commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Frame slot of the last submission.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Queue submission value of the last submission.
    pub fn submission_value(&self) -> u64 {
        self.submission_value
    }

    fn push(&mut self, command: Command) {
        debug_assert!(
            self.is_recording(),
            "recording {command:?} into a command list in state {:?}",
            self.state
        );
        self.commands.push(command);
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.push(Command::SetPipeline(pipeline));
    }

    /// Push root constants, at most [`MAX_PUSH_CONSTANTS_SIZE`] bytes.
    pub fn push_constants<T: Pod>(&mut self, value: &T) -> Result<(), GraphicsError> {
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() > MAX_PUSH_CONSTANTS_SIZE {
            return Err(GraphicsError::InvalidParameter(format!(
                "push constants of {} bytes exceed the {MAX_PUSH_CONSTANTS_SIZE} byte limit",
                bytes.len()
            )));
        }
        self.push(Command::PushConstants(SmallVec::from_slice(bytes)));
        Ok(())
    }

    pub fn bind_to_slot(&mut self, buffer: BufferId, slot: BindSlot, offset: u64) {
        self.push(Command::BindToSlot {
            buffer,
            slot,
            offset,
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat) {
        self.push(Command::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) {
        self.push(Command::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        self.push(Command::SetScissor(scissor));
    }

    /// Set the viewport and a scissor rectangle covering it.
    pub fn set_viewport_and_scissor(&mut self, viewport: Viewport) {
        self.set_viewport(viewport);
        self.set_scissor(viewport.scissor());
    }

    pub fn set_render_targets(
        &mut self,
        colors: &[TextureAttachment],
        depth: Option<TextureAttachment>,
    ) {
        self.push(Command::SetRenderTargets {
            colors: SmallVec::from_slice(colors),
            depth,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn draw_indirect(&mut self, buffer: BufferId, offset: u64, draw_count: u32, indexed: bool) {
        self.push(Command::DrawIndirect {
            buffer,
            offset,
            draw_count,
            indexed,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    pub fn dispatch_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.push(Command::DispatchIndirect { buffer, offset });
    }

    pub fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.push(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        row_pitch: u32,
        dst: TextureId,
        mip: u32,
    ) {
        self.push(Command::CopyBufferToTexture {
            src,
            src_offset,
            row_pitch,
            dst,
            mip,
        });
    }

    pub fn clear_texture(&mut self, texture: TextureId, value: ClearValue) {
        self.push(Command::ClearTexture { texture, value });
    }

    pub fn clear_buffer(&mut self, buffer: BufferId, value: u32) {
        self.push(Command::ClearBuffer { buffer, value });
    }

    /// Record a batch of transitions. Empty batches are skipped.
    pub fn barriers(&mut self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.push(Command::Barriers(SmallVec::from_slice(barriers)));
    }

    /// Make `count` queries from `first` writable again.
    pub fn reset_queries(&mut self, pool: QueryPoolId, first: u32, count: u32) {
        self.push(Command::ResetQueries { pool, first, count });
    }

    /// Write the GPU clock into query `index` once prior commands complete.
    pub fn write_timestamp(&mut self, pool: QueryPoolId, index: u32) {
        self.push(Command::WriteTimestamp { pool, index });
    }

    /// Copy `count` queries from `first` into `dst` at `offset`, 8 bytes each.
    ///
    /// `dst` must be in `COPY_DEST`.
    pub fn resolve_queries(
        &mut self,
        pool: QueryPoolId,
        first: u32,
        count: u32,
        dst: BufferId,
        offset: u64,
    ) {
        self.push(Command::ResolveQueries {
            pool,
            first,
            count,
            dst,
            offset,
        });
    }

    pub fn begin_marker(&mut self, name: impl Into<String>) {
        self.push(Command::BeginMarker(name.into()));
    }

    pub fn end_marker(&mut self) {
        self.push(Command::EndMarker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(index: u32) -> BufferId {
        BufferId::from_raw_parts(index, 0)
    }

    #[test]
    fn test_lifecycle() {
        let mut list = CommandList::new(QueueType::Compute);
        assert_eq!(list.state(), CommandListState::Initial);
        assert!(list.close().is_err());

        list.begin().unwrap();
        assert!(list.begin().is_err());
        list.dispatch(8, 8, 1);
        list.close().unwrap();
        assert_eq!(list.state(), CommandListState::Closed);

        list.mark_submitted(1, 7);
        assert_eq!(list.frame_index(), 1);
        assert_eq!(list.submission_value(), 7);

        list.begin().unwrap();
        assert!(list.commands().is_empty());
        assert_eq!(list.queue_type(), QueueType::Compute);
    }

    #[test]
    fn test_push_constants_limit() {
        let mut list = CommandList::new(QueueType::Graphics);
        list.begin().unwrap();
        assert!(list.push_constants(&[0u32; 32]).is_ok());
        assert!(matches!(
            list.push_constants(&[[0u32; 11]; 3]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(list.commands().len(), 1);
    }

    #[test]
    fn test_empty_barrier_batch_skipped() {
        let mut list = CommandList::new(QueueType::Graphics);
        list.begin().unwrap();
        list.barriers(&[]);
        assert!(list.commands().is_empty());

        list.barriers(&[ResourceBarrier {
            resource: ResourceId::Buffer(buffer(0)),
            subresource: Subresource::All,
            before: ResourceState::UNORDERED_ACCESS,
            after: ResourceState::ALL_SHADER_RESOURCE,
        }]);
        assert!(matches!(list.commands()[0], Command::Barriers(ref b) if b.len() == 1));
    }

    #[test]
    fn test_viewport_and_scissor() {
        let mut list = CommandList::new(QueueType::Graphics);
        list.begin().unwrap();
        list.set_viewport_and_scissor(Viewport::from_dimensions(64, 32));
        assert_eq!(
            list.commands()[1],
            Command::SetScissor(ScissorRect::new(0, 0, 64, 32))
        );
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_recording_outside_begin_panics_in_debug() {
        let mut list = CommandList::new(QueueType::Graphics);
        list.draw(3, 1);
    }
}
