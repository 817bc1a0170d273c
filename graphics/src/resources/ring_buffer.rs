//! Ring allocator for per-frame constants.
//!
//! A ring allocator is a persistently mapped upload buffer split into one
//! region per frame in flight. Each frame writes into its own region with a
//! bump cursor; when the cursor reaches the end of the region it wraps back to
//! the region's start. Because a region is only reused `frame_count` frames
//! later, the GPU has finished reading it by the time the CPU overwrites it.
//!
//! ```text
//! | frame 0 region | frame 1 region | frame 2 region |
//!                  ^ base    ^ cursor
//! ```
//!
//! The buffer is a raw (byte address) buffer with a bindless descriptor, so
//! shaders load constants with the returned offset.
//!
//! # Example
//!
//! ```
//! use framegraph::device::{Device, DeviceConfig};
//! use framegraph::resources::RingAllocator;
//!
//! let mut device = Device::new(DeviceConfig::dummy()).unwrap();
//! let mut ring = RingAllocator::new(&mut device, 1024, "frame constants").unwrap();
//!
//! ring.begin_frame(device.frame_index());
//! let offset = ring
//!     .alloc_and_copy(&mut device, bytemuck::bytes_of(&[1.0f32; 4]), 16)
//!     .unwrap();
//! assert_eq!(offset, 0);
//! ring.release(&mut device).unwrap();
//! ```

use crate::device::{BufferId, Device};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage};

/// A sub-allocation from a ring allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl RingAllocation {
    /// Create a new ring allocation.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Per-frame ring of mapped upload memory.
///
/// `RingAllocator` is not thread-safe; use one per recording thread.
#[derive(Debug)]
pub struct RingAllocator {
    buffer: BufferId,
    frame_capacity: u64,
    frame_count: u32,
    frame_index: u32,
    /// Offset into the current frame's region.
    cursor: u64,
    wrap_count: u64,
}

impl RingAllocator {
    /// Default alignment for byte address loads.
    pub const DEFAULT_ALIGNMENT: u64 = 4;

    /// Create a ring with `frame_capacity` bytes per frame in flight.
    pub fn new(
        device: &mut Device,
        frame_capacity: u64,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if frame_capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "ring allocator capacity cannot be zero".to_string(),
            ));
        }

        // Keep every region start aligned for the largest alignment we hand out.
        let frame_capacity = align_up(frame_capacity, 256);
        let frame_count = device.frame_count();
        let descriptor = BufferDescriptor {
            raw: true,
            ..BufferDescriptor::new(frame_capacity * frame_count as u64, BufferUsage::Upload)
        }
        .with_label(format!("{label}_ring"));

        let buffer = device.create_buffer(&descriptor)?;
        log::debug!(
            "Created ring allocator '{}' ({} bytes x {} frames)",
            label,
            frame_capacity,
            frame_count
        );

        Ok(Self {
            buffer,
            frame_capacity,
            frame_count,
            frame_index: 0,
            cursor: 0,
            wrap_count: 0,
        })
    }

    /// Underlying upload buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Bytes available per frame.
    pub fn frame_capacity(&self) -> u64 {
        self.frame_capacity
    }

    /// Number of times a frame region wrapped around.
    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }

    /// Bytes used in the current frame's region.
    pub fn used(&self) -> u64 {
        self.cursor
    }

    /// Switch to the region of `frame_index` and rewind it.
    pub fn begin_frame(&mut self, frame_index: u32) {
        self.frame_index = frame_index % self.frame_count;
        self.cursor = 0;
    }

    fn region_base(&self) -> u64 {
        self.frame_index as u64 * self.frame_capacity
    }

    /// Reserve `size` bytes in the current frame's region.
    ///
    /// The cursor wraps to the region start when the request does not fit.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<RingAllocation, GraphicsError> {
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if size > self.frame_capacity {
            return Err(GraphicsError::InvalidParameter(format!(
                "ring allocation of {size} bytes exceeds the frame capacity of {} bytes",
                self.frame_capacity
            )));
        }

        let mut offset = align_up(self.cursor, alignment);
        if offset + size > self.frame_capacity {
            log::trace!("Ring allocator wrapped in frame slot {}", self.frame_index);
            self.wrap_count += 1;
            offset = 0;
        }
        self.cursor = offset + size;
        Ok(RingAllocation::new(self.region_base() + offset, size))
    }

    /// Copy `data` into the ring and return its byte offset in the buffer.
    pub fn alloc_and_copy(
        &mut self,
        device: &mut Device,
        data: &[u8],
        alignment: u64,
    ) -> Result<u32, GraphicsError> {
        let allocation = self.allocate(data.len() as u64, alignment)?;
        device.write_buffer_data(self.buffer, allocation.offset, data)?;
        u32::try_from(allocation.offset).map_err(|_| {
            GraphicsError::InvalidParameter(format!(
                "ring offset {} does not fit a shader offset",
                allocation.offset
            ))
        })
    }

    /// Release the ring buffer through the deferred path.
    pub fn release(self, device: &mut Device) -> Result<(), GraphicsError> {
        device.release_buffer(self.buffer)
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;

    fn create_test_device(frame_count: u32) -> Device {
        Device::new(DeviceConfig::dummy().with_frame_count(frame_count)).unwrap()
    }

    #[test]
    fn test_ring_creation() {
        let mut device = create_test_device(3);
        let ring = RingAllocator::new(&mut device, 1000, "test").unwrap();

        assert_eq!(ring.frame_capacity(), 1024);
        assert_eq!(device.buffer(ring.buffer()).unwrap().desc().size, 3 * 1024);
        assert!(device.bindless_heap_index(ring.buffer()).is_ok());
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_ring_allocation_alignment() {
        let mut device = create_test_device(2);
        let mut ring = RingAllocator::new(&mut device, 1024, "test").unwrap();

        let a = ring.allocate(100, 4).unwrap();
        assert_eq!(a.offset, 0);
        let b = ring.allocate(50, 256).unwrap();
        assert_eq!(b.offset, 256);
        assert_eq!(b.end(), 306);
    }

    #[test]
    fn test_ring_frame_regions() {
        let mut device = create_test_device(2);
        let mut ring = RingAllocator::new(&mut device, 512, "test").unwrap();

        ring.begin_frame(1);
        assert_eq!(ring.allocate(16, 4).unwrap().offset, 512);
        ring.begin_frame(2);
        assert_eq!(ring.allocate(16, 4).unwrap().offset, 0);
    }

    #[test]
    fn test_ring_wraps_within_frame() {
        let mut device = create_test_device(2);
        let mut ring = RingAllocator::new(&mut device, 512, "test").unwrap();

        ring.begin_frame(1);
        ring.allocate(400, 4).unwrap();
        let wrapped = ring.allocate(200, 4).unwrap();
        assert_eq!(wrapped.offset, 512);
        assert_eq!(ring.wrap_count(), 1);
    }

    #[test]
    fn test_ring_rejects_bad_requests() {
        let mut device = create_test_device(2);
        let mut ring = RingAllocator::new(&mut device, 256, "test").unwrap();

        assert!(ring.allocate(16, 3).is_err());
        assert!(ring.allocate(257, 4).is_err());
        assert!(RingAllocator::new(&mut device, 0, "empty").is_err());
    }

    #[test]
    fn test_alloc_and_copy_writes_data() {
        let mut device = create_test_device(2);
        let mut ring = RingAllocator::new(&mut device, 256, "test").unwrap();

        ring.alloc_and_copy(&mut device, &[9; 6], 4).unwrap();
        let offset = ring.alloc_and_copy(&mut device, &[1, 2, 3, 4], 4).unwrap();
        assert_eq!(offset, 8);

        let bytes = device.read_buffer_data(ring.buffer(), 8, 4).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);

        let buffer = ring.buffer();
        ring.release(&mut device).unwrap();
        assert!(device.buffer(buffer).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(100, 64), 128);
    }
}
