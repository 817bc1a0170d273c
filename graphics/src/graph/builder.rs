//! Per-pass declaration API.
//!
//! A [`RenderGraphBuilder`] is handed to a pass's setup callback. Everything
//! it records is an intent: resources are allocated and views created only
//! when the graph compiles.

use crate::device::{Device, ResourceId};
use crate::error::{GraphError, GraphicsError};
use crate::pipeline::{ComputePipelineDescriptor, GraphicsPipelineDescriptor, ShaderModule};
use crate::types::{
    BufferDescriptor, BufferUsage, ResourceDescriptor, ResourceState, Subresource,
    TextureDescriptor, TextureUsage,
};

use super::pass::{PassKind, PassNode};
use super::resource::{
    GraphResource, GraphResourceId, GraphResourceView, GraphResourceViewId, ViewAccess,
};

/// Per-pass constants are reserved in multiples of this.
const CONSTANTS_ALIGNMENT: u64 = 16;

/// Declares the resources one pass creates, reads and writes.
pub struct RenderGraphBuilder<'a> {
    pub(crate) resources: &'a mut Vec<GraphResource>,
    pub(crate) views: &'a mut Vec<GraphResourceView>,
    pub(crate) node: &'a mut PassNode,
    pub(crate) kind: PassKind,
    pub(crate) pass_index: usize,
}

impl RenderGraphBuilder<'_> {
    /// Name of the pass being declared.
    pub fn pass_name(&self) -> &str {
        &self.node.name
    }

    /// Kind of the pass being declared.
    pub fn pass_kind(&self) -> PassKind {
        self.kind
    }

    fn push_resource(
        &mut self,
        desc: ResourceDescriptor,
        imported: Option<ResourceId>,
        imported_state: ResourceState,
    ) -> GraphResourceId {
        let id = GraphResourceId(self.resources.len() as u32);
        let name = match desc.label() {
            Some(label) => label.to_string(),
            None => format!("{}#{}", self.node.name, id.0),
        };
        self.resources.push(GraphResource {
            name,
            desc,
            imported,
            imported_state,
            pass: self.pass_index,
            handle: None,
        });
        id
    }

    /// Declare a graph-owned resource.
    pub fn create(&mut self, desc: impl Into<ResourceDescriptor>) -> GraphResourceId {
        let desc = desc.into();
        let state = desc.default_state();
        let id = self.push_resource(desc, None, state);
        self.node.created.push(id);
        id
    }

    /// Declare a graph-owned buffer.
    pub fn create_buffer(&mut self, desc: BufferDescriptor) -> GraphResourceId {
        self.create(desc)
    }

    /// Declare a graph-owned texture.
    pub fn create_texture(&mut self, desc: TextureDescriptor) -> GraphResourceId {
        self.create(desc)
    }

    /// Wrap an externally owned resource.
    ///
    /// The graph never releases it and returns it to its resting state after
    /// the last pass.
    pub fn import(
        &mut self,
        device: &Device,
        resource: impl Into<ResourceId>,
    ) -> Result<GraphResourceId, GraphicsError> {
        let resource = resource.into();
        let desc = device.resource_descriptor(resource)?;
        let state = device.resource_state(resource)?;
        Ok(self.push_resource(desc, Some(resource), state))
    }

    fn resource(&self, id: GraphResourceId) -> Result<&GraphResource, GraphError> {
        self.resources
            .get(id.0 as usize)
            .ok_or(GraphError::InvalidResource(id.0))
    }

    fn push_view(
        &mut self,
        resource: GraphResourceId,
        access: ViewAccess,
        subresource: Subresource,
        state: ResourceState,
        desc: ResourceDescriptor,
    ) -> GraphResourceViewId {
        let id = GraphResourceViewId(self.views.len() as u32);
        self.views.push(GraphResourceView {
            resource,
            pass: self.pass_index,
            access,
            subresource,
            state,
            desc,
            handle: None,
        });
        if access.is_write() {
            self.node.writes.push(id);
        } else {
            self.node.reads.push(id);
        }
        id
    }

    fn texture_desc(&self, id: GraphResourceId) -> Result<&TextureDescriptor, GraphError> {
        match &self.resource(id)?.desc {
            ResourceDescriptor::Texture(desc) => Ok(desc),
            ResourceDescriptor::Buffer(_) => Err(GraphError::WrongResourceType {
                resource: id.0,
                expected: "texture",
            }),
        }
    }

    fn check_mip(&self, id: GraphResourceId, mip: u32) -> Result<TextureDescriptor, GraphError> {
        let desc = self.texture_desc(id)?;
        if mip >= desc.mip_levels {
            return Err(GraphError::MipOutOfRange {
                resource: id.0,
                mip,
                mip_levels: desc.mip_levels,
            });
        }
        // The view's base mip is absolute within the allocation.
        Ok(desc.clone().with_mip_range(desc.base_mip + mip, 1))
    }

    fn require_kind(&self, kind: PassKind, what: &str) -> Result<(), GraphError> {
        if self.kind != kind {
            return Err(GraphError::WrongPassKind(format!(
                "{what} in {:?} pass '{}'",
                self.kind, self.node.name
            )));
        }
        Ok(())
    }

    /// Read the whole resource from shaders (or as index/vertex/indirect data
    /// for buffers of those usages).
    pub fn read(&mut self, id: GraphResourceId) -> Result<GraphResourceViewId, GraphError> {
        let (state, desc) = match &self.resource(id)?.desc {
            ResourceDescriptor::Buffer(desc) => match desc.usage {
                BufferUsage::Index
                | BufferUsage::Vertex
                | BufferUsage::IndirectArgs
                | BufferUsage::Upload => (
                    ResourceState::for_buffer_usage(desc.usage),
                    ResourceDescriptor::Buffer(desc.clone()),
                ),
                _ => (
                    ResourceState::ALL_SHADER_RESOURCE,
                    ResourceDescriptor::Buffer(desc.clone().with_usage(BufferUsage::ShaderRead)),
                ),
            },
            ResourceDescriptor::Texture(desc) => (
                shader_read_state(desc),
                ResourceDescriptor::Texture(desc.clone().with_usage(TextureUsage::ShaderRead)),
            ),
        };
        Ok(self.push_view(id, ViewAccess::Read, Subresource::All, state, desc))
    }

    /// Write the whole resource from shaders.
    pub fn write(&mut self, id: GraphResourceId) -> Result<GraphResourceViewId, GraphError> {
        let desc = match &self.resource(id)?.desc {
            ResourceDescriptor::Buffer(desc) => {
                ResourceDescriptor::Buffer(desc.clone().with_usage(BufferUsage::ShaderReadWrite))
            }
            ResourceDescriptor::Texture(desc) => ResourceDescriptor::Texture(
                desc.clone().with_usage(TextureUsage::ShaderReadWrite),
            ),
        };
        Ok(self.push_view(
            id,
            ViewAccess::Write,
            Subresource::All,
            ResourceState::UNORDERED_ACCESS,
            desc,
        ))
    }

    /// Read a buffer as indirect draw or dispatch arguments.
    pub fn read_indirect_args(
        &mut self,
        id: GraphResourceId,
    ) -> Result<GraphResourceViewId, GraphError> {
        let desc = match &self.resource(id)?.desc {
            ResourceDescriptor::Buffer(desc) => ResourceDescriptor::Buffer(desc.clone()),
            ResourceDescriptor::Texture(_) => {
                return Err(GraphError::WrongResourceType {
                    resource: id.0,
                    expected: "buffer",
                });
            }
        };
        Ok(self.push_view(
            id,
            ViewAccess::Read,
            Subresource::All,
            ResourceState::INDIRECT_ARGUMENT,
            desc,
        ))
    }

    /// Render to a color texture.
    pub fn render_target(&mut self, id: GraphResourceId) -> Result<GraphResourceViewId, GraphError> {
        self.require_kind(PassKind::Graphics, "render target")?;
        let desc = self.texture_desc(id)?;
        if desc.format.is_depth_stencil() {
            return Err(GraphError::WrongResourceType {
                resource: id.0,
                expected: "color texture",
            });
        }
        let format = desc.format;
        let desc = desc.clone().with_usage(TextureUsage::RenderTarget);
        let view = self.push_view(
            id,
            ViewAccess::Attachment,
            Subresource::All,
            ResourceState::RENDER_TARGET,
            ResourceDescriptor::Texture(desc),
        );
        self.node.color_targets.push(view);
        self.node.color_formats.push(format);
        Ok(view)
    }

    /// Use a depth texture as the depth attachment.
    pub fn depth_stencil_target(
        &mut self,
        id: GraphResourceId,
    ) -> Result<GraphResourceViewId, GraphError> {
        self.require_kind(PassKind::Graphics, "depth target")?;
        if self.node.depth_target.is_some() {
            return Err(GraphError::DuplicateDepthTarget(self.node.name.clone()));
        }
        let desc = self.texture_desc(id)?;
        if !desc.format.is_depth_stencil() {
            return Err(GraphError::WrongResourceType {
                resource: id.0,
                expected: "depth texture",
            });
        }
        let format = desc.format;
        let desc = desc.clone().with_usage(TextureUsage::DepthStencilTarget);
        let view = self.push_view(
            id,
            ViewAccess::Attachment,
            Subresource::All,
            ResourceState::DEPTH_WRITE,
            ResourceDescriptor::Texture(desc),
        );
        self.node.depth_target = Some(view);
        self.node.depth_format = Some(format);
        Ok(view)
    }

    /// Read one mip of a texture from shaders.
    pub fn read_texture(
        &mut self,
        id: GraphResourceId,
        mip: u32,
    ) -> Result<GraphResourceViewId, GraphError> {
        let desc = self.check_mip(id, mip)?;
        let state = shader_read_state(&desc);
        Ok(self.push_view(
            id,
            ViewAccess::Read,
            Subresource::Mip(mip),
            state,
            ResourceDescriptor::Texture(desc.with_usage(TextureUsage::ShaderRead)),
        ))
    }

    /// Write one mip of a texture from shaders.
    pub fn write_texture(
        &mut self,
        id: GraphResourceId,
        mip: u32,
    ) -> Result<GraphResourceViewId, GraphError> {
        let desc = self.check_mip(id, mip)?;
        Ok(self.push_view(
            id,
            ViewAccess::Write,
            Subresource::Mip(mip),
            ResourceState::UNORDERED_ACCESS,
            ResourceDescriptor::Texture(desc.with_usage(TextureUsage::ShaderReadWrite)),
        ))
    }

    /// Reserve `size` bytes of per-pass constants, written each frame with
    /// [`RenderGraph::set_pass_constants`](super::RenderGraph::set_pass_constants).
    pub fn reserve_constants(&mut self, size: u64) {
        self.node.constants_size += size.next_multiple_of(CONSTANTS_ALIGNMENT);
    }

    /// Graphics pipeline description prefilled with the pass's target formats.
    ///
    /// Declare the targets first.
    pub fn graphics_pipeline_descriptor(
        &self,
        vertex: ShaderModule,
        fragment: ShaderModule,
    ) -> Result<GraphicsPipelineDescriptor, GraphError> {
        self.require_kind(PassKind::Graphics, "graphics pipeline")?;
        let mut desc = GraphicsPipelineDescriptor::new(vertex, fragment)
            .with_label(self.node.name.clone());
        for format in &self.node.color_formats {
            desc = desc.with_color_format(*format);
        }
        if let Some(depth) = self.node.depth_format {
            desc = desc.with_depth(depth);
        }
        Ok(desc)
    }

    /// Compute pipeline description labelled after the pass.
    pub fn compute_pipeline_descriptor(
        &self,
        compute: ShaderModule,
    ) -> Result<ComputePipelineDescriptor, GraphError> {
        self.require_kind(PassKind::Compute, "compute pipeline")?;
        Ok(ComputePipelineDescriptor::new(compute).with_label(self.node.name.clone()))
    }
}

fn shader_read_state(desc: &TextureDescriptor) -> ResourceState {
    if desc.format.is_depth_stencil() {
        ResourceState::DEPTH_READ | ResourceState::ALL_SHADER_RESOURCE
    } else {
        ResourceState::ALL_SHADER_RESOURCE
    }
}
