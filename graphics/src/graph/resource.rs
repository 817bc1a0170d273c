//! Graph-local resource and view records.

use crate::device::ResourceId;
use crate::types::{ResourceDescriptor, ResourceState, Subresource};

/// Index of a resource declared in the current compilation.
///
/// Only meaningful for the [`RenderGraph`](super::RenderGraph) that produced it
/// and only until the next `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphResourceId(pub(crate) u32);

impl GraphResourceId {
    /// Raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Index of a view declared in the current compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphResourceViewId(pub(crate) u32);

impl GraphResourceViewId {
    /// Raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// How a pass touches a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewAccess {
    /// Shader, index, vertex or indirect-argument read.
    Read,
    /// Exclusive shader write (unordered access).
    Write,
    /// Color or depth attachment write.
    Attachment,
}

impl ViewAccess {
    /// Returns true for both write kinds.
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// A resource declared by a pass, created by the graph or imported.
#[derive(Debug, Clone)]
pub struct GraphResource {
    pub(crate) name: String,
    pub(crate) desc: ResourceDescriptor,
    /// Device handle of an imported resource.
    pub(crate) imported: Option<ResourceId>,
    /// Resting state of an imported resource.
    pub(crate) imported_state: ResourceState,
    /// Pass that declared the resource.
    pub(crate) pass: usize,
    /// Device handle after compilation.
    pub(crate) handle: Option<ResourceId>,
}

impl GraphResource {
    /// Debug name (label or a generated one).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the whole resource.
    pub fn desc(&self) -> &ResourceDescriptor {
        &self.desc
    }

    /// Returns true if the resource is owned outside the graph.
    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }

    /// Index of the pass that declared the resource.
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Device handle, once compiled.
    pub fn handle(&self) -> Option<ResourceId> {
        self.handle
    }
}

/// One pass's use of one resource.
#[derive(Debug, Clone)]
pub struct GraphResourceView {
    pub(crate) resource: GraphResourceId,
    pub(crate) pass: usize,
    pub(crate) access: ViewAccess,
    pub(crate) subresource: Subresource,
    pub(crate) state: ResourceState,
    /// Descriptor of the device object backing the view.
    pub(crate) desc: ResourceDescriptor,
    /// Device handle after compilation; equals the resource's handle when
    /// `desc` matches the resource descriptor.
    pub(crate) handle: Option<ResourceId>,
}

impl GraphResourceView {
    /// Viewed resource.
    pub fn resource(&self) -> GraphResourceId {
        self.resource
    }

    /// Index of the pass using the view.
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Access kind.
    pub fn access(&self) -> ViewAccess {
        self.access
    }

    /// Part of the resource the view covers, relative to the resource's mips.
    pub fn subresource(&self) -> Subresource {
        self.subresource
    }

    /// State the resource must be in while the pass runs.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Descriptor of the device view.
    pub fn desc(&self) -> &ResourceDescriptor {
        &self.desc
    }

    /// Device handle, once compiled.
    pub fn handle(&self) -> Option<ResourceId> {
        self.handle
    }

    /// Returns true if the view covers `mip`.
    pub(crate) fn covers(&self, mip: u32) -> bool {
        match self.subresource {
            Subresource::All => true,
            Subresource::Mip(m) => m == mip,
        }
    }
}
