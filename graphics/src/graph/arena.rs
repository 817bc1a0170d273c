//! Memory heap backing graph-owned resources.

use crate::backend::AllocationInfo;
use crate::device::{Device, HeapId};
use crate::error::GraphicsError;

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Linear allocator over one device heap.
///
/// Each compilation reserves a heap sized for its resources; the graph
/// releases it on clear, through the deferred path.
#[derive(Debug, Default)]
pub struct TransientArena {
    heap: Option<HeapId>,
    size: u64,
    cursor: u64,
}

impl TransientArena {
    /// Create an arena without a heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Back the arena with a heap of `size` bytes and rewind the cursor.
    ///
    /// A heap left over from an earlier reservation is released first.
    pub fn reserve(
        &mut self,
        device: &mut Device,
        size: u64,
        alignment: u64,
    ) -> Result<(), GraphicsError> {
        self.release(device)?;
        if size == 0 {
            return Ok(());
        }
        self.heap = Some(device.create_heap(size, alignment.max(1))?);
        self.size = size;
        log::info!(
            "Transient arena reserved {:.2} MB",
            size as f64 / MEGABYTE
        );
        Ok(())
    }

    /// Rewind the cursor; placed resources must already be released.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Carve out room for one resource, returning its heap offset.
    pub fn allocate(&mut self, info: AllocationInfo) -> Result<u64, GraphicsError> {
        let offset = self.cursor.next_multiple_of(info.alignment.max(1));
        let end = offset
            .checked_add(info.size)
            .ok_or(GraphicsError::OutOfMemory)?;
        if self.heap.is_none() || end > self.size {
            return Err(GraphicsError::OutOfMemory);
        }
        self.cursor = end;
        Ok(offset)
    }

    /// Heap currently backing the arena.
    pub fn heap(&self) -> Option<HeapId> {
        self.heap
    }

    /// Heap size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes handed out since the last reset.
    pub fn used(&self) -> u64 {
        self.cursor
    }

    /// Release the heap through the deferred path.
    pub fn release(&mut self, device: &mut Device) -> Result<(), GraphicsError> {
        if let Some(heap) = self.heap.take() {
            device.release_heap(heap)?;
        }
        self.size = 0;
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;

    fn info(size: u64, alignment: u64) -> AllocationInfo {
        AllocationInfo { size, alignment }
    }

    #[test]
    fn test_allocate_aligns_offsets() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut arena = TransientArena::new();
        arena.reserve(&mut device, 4096, 256).unwrap();

        assert_eq!(arena.allocate(info(100, 256)).unwrap(), 0);
        assert_eq!(arena.allocate(info(100, 256)).unwrap(), 256);
        assert_eq!(arena.used(), 356);
        assert_eq!(
            arena.allocate(info(4096, 256)),
            Err(GraphicsError::OutOfMemory)
        );
    }

    #[test]
    fn test_reserve_replaces_heap() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut arena = TransientArena::new();
        arena.reserve(&mut device, 4096, 256).unwrap();
        let first = arena.heap();
        arena.allocate(info(100, 256)).unwrap();

        arena.reserve(&mut device, 1024, 256).unwrap();
        assert_ne!(arena.heap(), first);
        assert_eq!(arena.size(), 1024);
        assert_eq!(arena.used(), 0);
        assert_eq!(device.heap_count(), 1);
        assert_eq!(device.pending_release_count(), 1);

        arena.reserve(&mut device, 0, 256).unwrap();
        assert!(arena.heap().is_none());
        assert_eq!(device.heap_count(), 0);
    }

    #[test]
    fn test_allocate_without_heap_fails() {
        let mut arena = TransientArena::new();
        assert_eq!(arena.allocate(info(1, 1)), Err(GraphicsError::OutOfMemory));
    }

    #[test]
    fn test_release() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut arena = TransientArena::new();
        arena.reserve(&mut device, 4096, 256).unwrap();
        arena.release(&mut device).unwrap();

        assert!(arena.heap().is_none());
        assert_eq!(arena.size(), 0);
        assert_eq!(device.heap_count(), 0);
    }
}
