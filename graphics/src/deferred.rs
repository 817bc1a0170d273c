//! Deferred release queue.
//!
//! GPU commands execute asynchronously: when a resource is released on the CPU,
//! frames that still reference it may be in flight. Releases therefore go into
//! a queue stamped with the frame counter at release time and are destroyed
//! only once enough frames have been confirmed complete.
//!
//! ```text
//! release at frame N          on_update at frame M
//!        |                            |
//!        v                            v
//!   [ (N, item) ] ... ------> destroy every item with N + frame_count + 1 <= M
//! ```
//!
//! Stamps never decrease, so the queue is drained from the front.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuHeap, GpuPipeline, GpuQueryPool, GpuTexture};
use crate::descriptor::{DescriptorHeapKind, DescriptorId};

/// Something waiting for the GPU to finish with it.
#[derive(Debug)]
pub enum DeferredRelease {
    /// A buffer allocation, destroyed if this is the last reference.
    Buffer(Arc<GpuBuffer>),
    /// A texture allocation, destroyed if this is the last reference.
    Texture(Arc<GpuTexture>),
    /// A memory heap.
    Heap(GpuHeap),
    /// A descriptor slot.
    Descriptor(DescriptorHeapKind, DescriptorId),
    /// A pipeline state object.
    Pipeline(GpuPipeline),
    /// A timestamp query pool.
    QueryPool(GpuQueryPool),
}

/// FIFO of releases stamped with the frame counter.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: VecDeque<(u64, DeferredRelease)>,
}

impl DeferredQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item`, released during frame `frame_counter`.
    pub fn push(&mut self, frame_counter: u64, item: DeferredRelease) {
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|(stamp, _)| *stamp <= frame_counter),
            "deferred release stamps must not decrease"
        );
        self.entries.push_back((frame_counter, item));
    }

    /// Remove every entry old enough to destroy at `frame_counter`.
    pub fn drain_ready(&mut self, frame_counter: u64, frame_count: u32) -> Vec<DeferredRelease> {
        let mut ready = Vec::new();
        while let Some((stamp, _)) = self.entries.front() {
            if stamp + frame_count as u64 + 1 > frame_counter {
                break;
            }
            if let Some((_, item)) = self.entries.pop_front() {
                ready.push(item);
            }
        }
        ready
    }

    /// Remove every entry regardless of age. The GPU must be idle.
    pub fn drain_all(&mut self) -> Vec<DeferredRelease> {
        self.entries.drain(..).map(|(_, item)| item).collect()
    }

    /// Number of pending releases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(id: u64) -> DeferredRelease {
        DeferredRelease::Heap(GpuHeap::Dummy { id, size: 0 })
    }

    #[test]
    fn test_release_waits_frame_count_plus_one() {
        let mut queue = DeferredQueue::new();
        queue.push(5, heap(1));

        // frame_count = 2: destroyable at 5 + 2 + 1 = 8
        assert!(queue.drain_ready(6, 2).is_empty());
        assert!(queue.drain_ready(7, 2).is_empty());
        assert_eq!(queue.drain_ready(8, 2).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_stops_at_first_young_entry() {
        let mut queue = DeferredQueue::new();
        queue.push(1, heap(1));
        queue.push(1, heap(2));
        queue.push(3, heap(3));

        let ready = queue.drain_ready(4, 2);
        assert_eq!(ready.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all().len(), 1);
    }
}
