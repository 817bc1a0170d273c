//! Read-only resolver handed to execute callbacks.

use crate::device::{BufferId, Device, ResourceId, TextureId};
use crate::error::{GraphError, GraphicsError};

use super::resource::{GraphResource, GraphResourceId, GraphResourceView, GraphResourceViewId};

/// Resolves graph ids to device handles while a pass executes.
pub struct RenderGraphResources<'a> {
    pub(crate) resources: &'a [GraphResource],
    pub(crate) views: &'a [GraphResourceView],
    pub(crate) device: &'a Device,
    pub(crate) pass_offsets: &'a [Option<u32>],
}

impl RenderGraphResources<'_> {
    /// Device handle of a graph resource.
    pub fn resource(&self, id: GraphResourceId) -> Result<ResourceId, GraphError> {
        self.resources
            .get(id.0 as usize)
            .ok_or(GraphError::InvalidResource(id.0))?
            .handle
            .ok_or_else(|| GraphError::InvalidState(format!("graph resource {} is not compiled", id.0)))
    }

    /// Device handle of a graph buffer.
    pub fn buffer(&self, id: GraphResourceId) -> Result<BufferId, GraphError> {
        match self.resource(id)? {
            ResourceId::Buffer(buffer) => Ok(buffer),
            ResourceId::Texture(_) => Err(GraphError::WrongResourceType {
                resource: id.0,
                expected: "buffer",
            }),
        }
    }

    /// Device handle of a graph texture.
    pub fn texture(&self, id: GraphResourceId) -> Result<TextureId, GraphError> {
        match self.resource(id)? {
            ResourceId::Texture(texture) => Ok(texture),
            ResourceId::Buffer(_) => Err(GraphError::WrongResourceType {
                resource: id.0,
                expected: "texture",
            }),
        }
    }

    fn view(&self, view: GraphResourceViewId) -> Result<&GraphResourceView, GraphError> {
        self.views
            .get(view.0 as usize)
            .ok_or(GraphError::InvalidView(view.0))
    }

    /// Device handle backing a view.
    pub fn resource_view(&self, view: GraphResourceViewId) -> Result<ResourceId, GraphError> {
        self.view(view)?
            .handle
            .ok_or_else(|| GraphError::InvalidState(format!("graph view {} is not compiled", view.0)))
    }

    /// Device buffer backing a view.
    pub fn buffer_view(&self, view: GraphResourceViewId) -> Result<BufferId, GraphError> {
        let resource = self.view(view)?.resource;
        match self.resource_view(view)? {
            ResourceId::Buffer(buffer) => Ok(buffer),
            ResourceId::Texture(_) => Err(GraphError::WrongResourceType {
                resource: resource.0,
                expected: "buffer",
            }),
        }
    }

    /// Device texture backing a view.
    pub fn texture_view(&self, view: GraphResourceViewId) -> Result<TextureId, GraphError> {
        let resource = self.view(view)?.resource;
        match self.resource_view(view)? {
            ResourceId::Texture(texture) => Ok(texture),
            ResourceId::Buffer(_) => Err(GraphError::WrongResourceType {
                resource: resource.0,
                expected: "texture",
            }),
        }
    }

    /// Returns true if the view is over a buffer.
    pub fn is_buffer(&self, view: GraphResourceViewId) -> bool {
        self.view(view).is_ok_and(|v| v.desc.is_buffer())
    }

    /// Returns true if the view is over a texture.
    pub fn is_texture(&self, view: GraphResourceViewId) -> bool {
        self.view(view).is_ok_and(|v| v.desc.is_texture())
    }

    /// Bindless index of a resource's own descriptor.
    pub fn bindless_heap_index(&self, id: GraphResourceId) -> Result<u32, GraphicsError> {
        self.device.bindless_heap_index(self.resource(id)?)
    }

    /// Bindless index of a view's descriptor.
    pub fn view_bindless_heap_index(&self, view: GraphResourceViewId) -> Result<u32, GraphicsError> {
        self.device.bindless_heap_index(self.resource_view(view)?)
    }

    /// Byte offset of a pass's constants in the per-pass ring bound at `Srv1`.
    pub fn pass_constants_offset(&self, pass: usize) -> Option<u32> {
        self.pass_offsets.get(pass).copied().flatten()
    }

    /// Device the graph was compiled against.
    pub fn device(&self) -> &Device {
        self.device
    }
}
