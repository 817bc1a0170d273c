//! Render pass types.

use std::any::Any;

use smallvec::SmallVec;

use crate::command_list::CommandList;
use crate::error::{GraphError, GraphicsError};
use crate::types::TextureFormat;

use super::resource::{GraphResourceId, GraphResourceViewId};
use super::resources::RenderGraphResources;

/// Kind of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Rasterization pass with render targets.
    Graphics,
    /// Compute dispatch pass.
    Compute,
}

pub(crate) type ExecuteFn = Box<
    dyn FnMut(&dyn Any, &RenderGraphResources<'_>, &mut CommandList) -> Result<(), GraphicsError>,
>;

/// Declarations and callbacks of one pass.
pub struct PassNode {
    pub(crate) name: String,
    pub(crate) created: Vec<GraphResourceId>,
    pub(crate) reads: Vec<GraphResourceViewId>,
    pub(crate) writes: Vec<GraphResourceViewId>,
    pub(crate) color_targets: SmallVec<[GraphResourceViewId; 8]>,
    pub(crate) color_formats: SmallVec<[TextureFormat; 8]>,
    pub(crate) depth_target: Option<GraphResourceViewId>,
    pub(crate) depth_format: Option<TextureFormat>,
    /// Bytes reserved in the per-pass constants ring.
    pub(crate) constants_size: u64,
    pub(crate) data: Box<dyn Any>,
    pub(crate) execute: ExecuteFn,
}

impl PassNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            created: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            color_targets: SmallVec::new(),
            color_formats: SmallVec::new(),
            depth_target: None,
            depth_format: None,
            constants_size: 0,
            data: Box::new(()),
            execute: Box::new(|_, _, _| Ok(())),
        }
    }

    /// Pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resources the pass declared.
    pub fn created(&self) -> &[GraphResourceId] {
        &self.created
    }

    /// Views read by the pass.
    pub fn reads(&self) -> &[GraphResourceViewId] {
        &self.reads
    }

    /// Views written by the pass (attachments included).
    pub fn writes(&self) -> &[GraphResourceViewId] {
        &self.writes
    }

    /// Color attachments in declaration order.
    pub fn color_targets(&self) -> &[GraphResourceViewId] {
        &self.color_targets
    }

    /// Formats of the color attachments.
    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.color_formats
    }

    /// Depth attachment, if any.
    pub fn depth_target(&self) -> Option<GraphResourceViewId> {
        self.depth_target
    }

    /// Format of the depth attachment, if any.
    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth_format
    }

    /// Bytes of per-pass constants reserved.
    pub fn constants_size(&self) -> u64 {
        self.constants_size
    }
}

impl std::fmt::Debug for PassNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassNode")
            .field("name", &self.name)
            .field("created", &self.created)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("color_formats", &self.color_formats)
            .field("depth_format", &self.depth_format)
            .field("constants_size", &self.constants_size)
            .finish_non_exhaustive()
    }
}

/// A pass in the render graph.
///
/// Each variant carries the same declarations; the kind decides whether render
/// targets are bound before the execute callback runs.
#[derive(Debug)]
pub enum Pass {
    /// Graphics pass (vertex/fragment shaders, rasterization).
    Graphics(PassNode),
    /// Compute pass (compute shaders).
    Compute(PassNode),
}

impl Pass {
    pub(crate) fn new(kind: PassKind, node: PassNode) -> Self {
        match kind {
            PassKind::Graphics => Pass::Graphics(node),
            PassKind::Compute => Pass::Compute(node),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        self.node().name()
    }

    /// Kind of the pass.
    pub fn kind(&self) -> PassKind {
        match self {
            Pass::Graphics(_) => PassKind::Graphics,
            Pass::Compute(_) => PassKind::Compute,
        }
    }

    /// Declarations of the pass.
    pub fn node(&self) -> &PassNode {
        match self {
            Pass::Graphics(node) | Pass::Compute(node) => node,
        }
    }

    pub(crate) fn node_mut(&mut self) -> &mut PassNode {
        match self {
            Pass::Graphics(node) | Pass::Compute(node) => node,
        }
    }

    /// Check if this is a graphics pass.
    pub fn is_graphics(&self) -> bool {
        matches!(self, Pass::Graphics(_))
    }

    /// Check if this is a compute pass.
    pub fn is_compute(&self) -> bool {
        matches!(self, Pass::Compute(_))
    }

    /// Per-pass data, if it has type `T`.
    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.node().data.downcast_ref::<T>()
    }

    pub(crate) fn run(
        &mut self,
        resources: &RenderGraphResources<'_>,
        cmd: &mut CommandList,
    ) -> Result<(), GraphicsError> {
        let node = self.node_mut();
        (node.execute)(node.data.as_ref(), resources, cmd)
    }
}

/// Wrap a typed execute callback so it can be stored next to type-erased data.
pub(crate) fn erase_execute<T, E>(index: usize, mut execute: E) -> ExecuteFn
where
    T: 'static,
    E: FnMut(&T, &RenderGraphResources<'_>, &mut CommandList) -> Result<(), GraphicsError>
        + 'static,
{
    Box::new(move |data, resources, cmd| {
        let data = data
            .downcast_ref::<T>()
            .ok_or(GraphError::PassDataMismatch(index))?;
        execute(data, resources, cmd)
    })
}
