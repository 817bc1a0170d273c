//! Resource helpers built on top of the [`Device`](crate::device::Device).
//!
//! - [`RingAllocator`] - per-frame wrapping staging memory for constants

pub mod ring_buffer;

pub use ring_buffer::{RingAllocation, RingAllocator};
