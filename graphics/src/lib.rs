//! # Framegraph
//!
//! Frame graph and GPU resource scheduler built around bindless descriptors.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - Owner of every GPU object, addressed through generational handles
//! - [`RenderGraph`] - Declarative per-frame pass list with automatic barriers
//! - [`CommandList`] - Backend-independent command recording
//! - [`PipelineCache`] - Content-addressed pipeline reuse
//! - [`RingAllocator`] - Per-frame wrapping constant memory
//! - Backends: Dummy (for testing) and Vulkan (`vulkan-backend` feature)
//!
//! ## Frames
//!
//! Up to `frame_count` frames are in flight. Released objects are destroyed
//! by [`Device::on_update`] once the GPU can no longer reference them.
//!
//! ## Example
//!
//! ```
//! use framegraph::{CommandList, Device, DeviceConfig, QueueType, RenderGraph, Viewport};
//!
//! let mut device = Device::new(DeviceConfig::dummy()).unwrap();
//! let mut graph = RenderGraph::new(Viewport::from_dimensions(1280, 720));
//! graph.compile(&mut device, &0u32).unwrap();
//!
//! let mut cmd = CommandList::new(QueueType::Graphics);
//! cmd.begin().unwrap();
//! graph.execute(&mut device, &mut cmd).unwrap();
//! cmd.close().unwrap();
//! device.submit(&mut cmd, QueueType::Graphics).unwrap();
//! device.on_update().unwrap();
//! ```

pub mod backend;
pub mod command_list;
pub mod deferred;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod profiling;
pub mod resources;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendType, GpuBackend};
pub use command_list::{BindSlot, CommandList, CommandListState, QueueType, ResourceBarrier};
pub use descriptor::{DescriptorHeapKind, DescriptorId, DescriptorTable};
pub use device::{
    BufferId, Device, DeviceConfig, HeapId, PipelineId, QueryPoolId, ResourceId, TextureId,
};
pub use error::{GraphError, GraphicsError};
pub use graph::{
    GraphResourceId, GraphResourceViewId, GraphState, Pass, PassKind, RenderGraph,
    RenderGraphBuilder, RenderGraphResources,
};
pub use pipeline::{
    ComputePipelineDescriptor, GraphicsPipelineDescriptor, PipelineCache, ShaderModule,
};
pub use resources::{RingAllocation, RingAllocator};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, ResourceDescriptor, ResourceState, Subresource,
    TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_render_graph_creation() {
        let graph = RenderGraph::new(Viewport::default());
        assert!(graph.passes().is_empty());
        assert_eq!(graph.state(), GraphState::Building);
    }

    #[test]
    fn test_dummy_device() {
        let device = Device::new(DeviceConfig::dummy()).unwrap();
        assert_eq!(device.backend_name(), "Dummy");
    }
}
