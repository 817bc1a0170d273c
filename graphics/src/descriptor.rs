//! Bindless descriptor tables.
//!
//! Every shader-addressable view of a resource owns one slot in a
//! [`DescriptorTable`]. The slot index doubles as the bindless index shaders
//! use to reach the resource, so it is only meaningful while the descriptor is
//! alive; the device routes frees through its deferred release queue.

use framegraph_core::pool::{Handle, HandlePool};

use crate::device::ResourceId;
use crate::error::GraphicsError;

/// Descriptor heaps owned by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Shader-visible bindless table (shader read and shader write views).
    Resource,
    /// Color attachment views.
    RenderTarget,
    /// Depth/stencil attachment views.
    DepthStencil,
}

impl DescriptorHeapKind {
    /// All heap kinds, in device order.
    pub const ALL: [Self; 3] = [Self::Resource, Self::RenderTarget, Self::DepthStencil];

    /// Heap a view kind lives in.
    pub fn for_view(view: DescriptorView) -> Self {
        match view {
            DescriptorView::ShaderRead | DescriptorView::ShaderWrite => Self::Resource,
            DescriptorView::RenderTarget => Self::RenderTarget,
            DescriptorView::DepthStencil => Self::DepthStencil,
        }
    }
}

/// Kind of view a descriptor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorView {
    /// Read-only shader view (SRV).
    ShaderRead,
    /// Read-write shader view (UAV).
    ShaderWrite,
    /// Color attachment view.
    RenderTarget,
    /// Depth/stencil attachment view.
    DepthStencil,
}

/// What a descriptor slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEntry {
    /// Resource the view belongs to.
    pub resource: ResourceId,
    /// View kind.
    pub view: DescriptorView,
}

/// Handle of a live descriptor slot.
pub type DescriptorId = Handle<DescriptorEntry>;

/// Fixed-capacity table of descriptors of one heap kind.
#[derive(Debug)]
pub struct DescriptorTable {
    kind: DescriptorHeapKind,
    capacity: u32,
    entries: HandlePool<DescriptorEntry>,
}

impl DescriptorTable {
    /// Create an empty table with room for `capacity` descriptors.
    pub fn new(kind: DescriptorHeapKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            entries: HandlePool::new(),
        }
    }

    /// Heap kind of this table.
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Maximum number of live descriptors.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no descriptor is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Claim a slot for `entry`.
    ///
    /// Freed slots are reused before the table grows, so slot indices stay
    /// below the capacity.
    pub fn allocate(&mut self, entry: DescriptorEntry) -> Result<DescriptorId, GraphicsError> {
        if self.entries.len() >= self.capacity as usize {
            log::error!(
                "{:?} descriptor heap exhausted ({} slots)",
                self.kind,
                self.capacity
            );
            return Err(GraphicsError::OutOfDescriptors(self.kind));
        }
        let id = self.entries.add(entry);
        log::trace!(
            "{:?} descriptor {} -> {:?} ({:?})",
            self.kind,
            id.index(),
            entry.resource,
            entry.view
        );
        Ok(id)
    }

    /// Release a slot immediately and return what it pointed at.
    pub fn free(&mut self, id: DescriptorId) -> Result<DescriptorEntry, GraphicsError> {
        Ok(self.entries.remove(id)?)
    }

    /// Look up a live descriptor.
    pub fn get(&self, id: DescriptorId) -> Result<&DescriptorEntry, GraphicsError> {
        Ok(self.entries.get(id)?)
    }

    /// Bindless index of a live descriptor.
    pub fn bindless_index(&self, id: DescriptorId) -> Result<u32, GraphicsError> {
        self.entries.get(id)?;
        Ok(id.index())
    }

    /// Iterate over live descriptors.
    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &DescriptorEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferId;

    fn entry(index: u32) -> DescriptorEntry {
        DescriptorEntry {
            resource: ResourceId::Buffer(BufferId::from_raw_parts(index, 0)),
            view: DescriptorView::ShaderRead,
        }
    }

    #[test]
    fn test_allocate_until_full() {
        let mut table = DescriptorTable::new(DescriptorHeapKind::Resource, 2);
        let a = table.allocate(entry(0)).unwrap();
        let b = table.allocate(entry(1)).unwrap();
        assert_eq!(table.bindless_index(a).unwrap(), 0);
        assert_eq!(table.bindless_index(b).unwrap(), 1);

        assert_eq!(
            table.allocate(entry(2)),
            Err(GraphicsError::OutOfDescriptors(DescriptorHeapKind::Resource))
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_free_reuses_slot() {
        let mut table = DescriptorTable::new(DescriptorHeapKind::RenderTarget, 4);
        let a = table.allocate(entry(0)).unwrap();
        assert_eq!(table.free(a).unwrap(), entry(0));

        let b = table.allocate(entry(1)).unwrap();
        assert_eq!(b.index(), a.index());
        assert!(table.get(a).is_err());
        assert!(table.bindless_index(a).is_err());
        assert_eq!(table.get(b).unwrap(), &entry(1));
    }

    #[test]
    fn test_double_free_fails() {
        let mut table = DescriptorTable::new(DescriptorHeapKind::DepthStencil, 1);
        let a = table.allocate(entry(0)).unwrap();
        table.free(a).unwrap();
        assert!(matches!(
            table.free(a),
            Err(GraphicsError::InvalidHandle(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_heap_for_view() {
        assert_eq!(
            DescriptorHeapKind::for_view(DescriptorView::ShaderWrite),
            DescriptorHeapKind::Resource
        );
        assert_eq!(
            DescriptorHeapKind::for_view(DescriptorView::DepthStencil),
            DescriptorHeapKind::DepthStencil
        );
    }
}
