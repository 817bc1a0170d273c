//! Render graph infrastructure.
//!
//! The render graph provides a declarative way to describe one frame's GPU
//! work. Each pass declares, through a [`RenderGraphBuilder`], the resources
//! it creates, reads and writes; compilation then:
//!
//! - rejects hazardous declarations (read/write in one pass, write after write)
//! - places graph-owned resources in a transient memory arena
//! - creates the device views passes asked for
//! - computes the minimal set of state transitions per subresource
//!
//! Each execution also brackets every pass with GPU timestamps; the results
//! come back through [`RenderGraph::pass_timings`] once the GPU has finished
//! the frame.
//!
//! Passes run strictly in registration order.
//!
//! # Lifecycle
//!
//! ```text
//! Building --compile--> Compiled --execute--> Executing --clear--> Building
//! ```
//!
//! # Example
//!
//! ```
//! use framegraph::command_list::{CommandList, QueueType};
//! use framegraph::device::{Device, DeviceConfig};
//! use framegraph::graph::RenderGraph;
//! use framegraph::types::{TextureDescriptor, TextureFormat, TextureUsage, Viewport};
//!
//! let mut device = Device::new(DeviceConfig::dummy()).unwrap();
//! let mut graph = RenderGraph::new(Viewport::from_dimensions(64, 64));
//!
//! graph
//!     .add_graphics_pass(
//!         "clear",
//!         |builder, target: &mut Option<_>| {
//!             let color = builder.create_texture(TextureDescriptor::new_2d(
//!                 64,
//!                 64,
//!                 TextureFormat::Rgba8Unorm,
//!                 TextureUsage::RenderTarget,
//!             ));
//!             *target = Some(builder.render_target(color)?);
//!             Ok(())
//!         },
//!         |_, _, cmd| {
//!             cmd.draw(3, 1);
//!             Ok(())
//!         },
//!     )
//!     .unwrap();
//!
//! graph.compile(&mut device, &[0u32; 4]).unwrap();
//!
//! let mut cmd = CommandList::new(QueueType::Graphics);
//! cmd.begin().unwrap();
//! graph.execute(&mut device, &mut cmd).unwrap();
//! cmd.close().unwrap();
//! device.submit(&mut cmd, QueueType::Graphics).unwrap();
//!
//! graph.clear(&mut device).unwrap();
//! ```

mod arena;
mod barriers;
mod builder;
mod pass;
mod resource;
mod resources;
mod timing;

use std::fmt::Write as _;

use bytemuck::Pod;
use framegraph_core::profiling::{profile_function, profile_scope};
use smallvec::SmallVec;

use crate::backend::AllocationInfo;
use crate::command_list::{BindSlot, CommandList, ResourceBarrier, TextureAttachment};
use crate::device::{BufferId, Device, ResourceId};
use crate::resources::RingAllocator;
use crate::types::{BufferDescriptor, ResourceDescriptor, ResourceState, Subresource, Viewport};

pub use crate::error::GraphError;
use crate::error::GraphicsError;

pub use arena::TransientArena;
pub use builder::RenderGraphBuilder;
pub use pass::{Pass, PassKind, PassNode};
pub use resource::{GraphResource, GraphResourceId, GraphResourceView, GraphResourceViewId, ViewAccess};
pub use resources::RenderGraphResources;
pub use timing::PassTiming;

use barriers::GraphBarrier;
use pass::erase_execute;
use timing::PassTimer;

/// Bytes of per-frame constants available per frame in flight.
pub const FRAME_CONSTANTS_CAPACITY: u64 = 64 * 1024;

/// Alignment of constants written into the rings.
const CONSTANTS_ALIGNMENT: u64 = 16;

/// Alignment of per-frame constants, which are bound at their ring offset.
const FRAME_CONSTANTS_ALIGNMENT: u64 = 256;

/// Lifecycle state of a [`RenderGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GraphState {
    /// Accepting passes.
    #[default]
    Building,
    /// Resources allocated and barriers placed.
    Compiled,
    /// Recorded at least once since compiling.
    Executing,
}

type BarrierList = SmallVec<[ResourceBarrier; 4]>;

/// The render graph describes one frame's GPU work.
///
/// # Construction
///
/// Passes are registered with [`add_graphics_pass`](Self::add_graphics_pass)
/// and [`add_compute_pass`](Self::add_compute_pass). The setup callback runs
/// immediately and declares resources; the execute callback runs during
/// [`execute`](Self::execute) with the declared ids resolved to device
/// handles.
///
/// # Constants
///
/// Three buffers are bound before the first pass:
///
/// | Slot | Content | Written by |
/// |------|---------|------------|
/// | `Cbv0` | global constants | [`compile`](Self::compile) |
/// | `Srv0` | per-frame constants | [`set_frame_constants`](Self::set_frame_constants) |
/// | `Srv1` | per-pass constants | [`set_pass_constants`](Self::set_pass_constants) |
#[derive(Debug)]
pub struct RenderGraph {
    state: GraphState,
    viewport: Viewport,
    passes: Vec<Pass>,
    resources: Vec<GraphResource>,
    views: Vec<GraphResourceView>,
    entry_barriers: Vec<BarrierList>,
    final_barriers: BarrierList,
    arena: TransientArena,
    globals: Option<BufferId>,
    frame_ring: Option<RingAllocator>,
    /// Device frame counter the frame ring was last rewound for.
    frame_ring_counter: Option<u64>,
    frame_constants_offset: u32,
    pass_ring: Option<RingAllocator>,
    /// Staged per-pass constants, sized to each pass's reservation.
    pass_constants: Vec<Vec<u8>>,
    timer: Option<PassTimer>,
    /// Latest completed pass timings.
    timings: Vec<PassTiming>,
}

impl RenderGraph {
    /// Create an empty graph rendering into `viewport`.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            state: GraphState::Building,
            viewport,
            passes: Vec::new(),
            resources: Vec::new(),
            views: Vec::new(),
            entry_barriers: Vec::new(),
            final_barriers: SmallVec::new(),
            arena: TransientArena::new(),
            globals: None,
            frame_ring: None,
            frame_ring_counter: None,
            frame_constants_offset: 0,
            pass_ring: None,
            pass_constants: Vec::new(),
            timer: None,
            timings: Vec::new(),
        }
    }

    fn invalid_state(&self, operation: &str) -> GraphError {
        GraphError::InvalidState(format!("cannot {operation} in state {:?}", self.state))
    }

    fn require_compiled(&self, operation: &str) -> Result<(), GraphError> {
        match self.state {
            GraphState::Compiled | GraphState::Executing => Ok(()),
            GraphState::Building => Err(self.invalid_state(operation)),
        }
    }

    /// Add a graphics pass.
    ///
    /// `setup` runs immediately; on failure nothing it declared is kept.
    /// Returns the pass data as left by `setup`.
    pub fn add_graphics_pass<T, S, E>(
        &mut self,
        name: impl Into<String>,
        setup: S,
        execute: E,
    ) -> Result<&T, GraphicsError>
    where
        T: Default + 'static,
        S: FnOnce(&mut RenderGraphBuilder<'_>, &mut T) -> Result<(), GraphicsError>,
        E: FnMut(&T, &RenderGraphResources<'_>, &mut CommandList) -> Result<(), GraphicsError>
            + 'static,
    {
        self.add_pass(PassKind::Graphics, name.into(), setup, execute)
    }

    /// Add a compute pass.
    ///
    /// See [`add_graphics_pass`](Self::add_graphics_pass).
    pub fn add_compute_pass<T, S, E>(
        &mut self,
        name: impl Into<String>,
        setup: S,
        execute: E,
    ) -> Result<&T, GraphicsError>
    where
        T: Default + 'static,
        S: FnOnce(&mut RenderGraphBuilder<'_>, &mut T) -> Result<(), GraphicsError>,
        E: FnMut(&T, &RenderGraphResources<'_>, &mut CommandList) -> Result<(), GraphicsError>
            + 'static,
    {
        self.add_pass(PassKind::Compute, name.into(), setup, execute)
    }

    fn add_pass<T, S, E>(
        &mut self,
        kind: PassKind,
        name: String,
        setup: S,
        execute: E,
    ) -> Result<&T, GraphicsError>
    where
        T: Default + 'static,
        S: FnOnce(&mut RenderGraphBuilder<'_>, &mut T) -> Result<(), GraphicsError>,
        E: FnMut(&T, &RenderGraphResources<'_>, &mut CommandList) -> Result<(), GraphicsError>
            + 'static,
    {
        if self.state != GraphState::Building {
            return Err(self.invalid_state("add a pass").into());
        }

        let index = self.passes.len();
        let resource_mark = self.resources.len();
        let view_mark = self.views.len();
        let mut node = PassNode::new(name);
        let mut data = T::default();

        let result = {
            let mut builder = RenderGraphBuilder {
                resources: &mut self.resources,
                views: &mut self.views,
                node: &mut node,
                kind,
                pass_index: index,
            };
            setup(&mut builder, &mut data)
        };
        if let Err(err) = result {
            log::debug!("Setup of pass '{}' failed: {}", node.name, err);
            self.resources.truncate(resource_mark);
            self.views.truncate(view_mark);
            return Err(err);
        }

        node.data = Box::new(data);
        node.execute = erase_execute::<T, E>(index, execute);
        log::trace!(
            "Added {:?} pass '{}' ({} reads, {} writes)",
            kind,
            node.name,
            node.reads.len(),
            node.writes.len()
        );
        self.passes.push(Pass::new(kind, node));
        Ok(self.pass_data::<T>(index)?)
    }

    /// Data of the pass at `index`.
    pub fn pass_data<T: 'static>(&self, index: usize) -> Result<&T, GraphError> {
        self.passes
            .get(index)
            .and_then(Pass::data::<T>)
            .ok_or(GraphError::PassDataMismatch(index))
    }

    /// Validate declarations, allocate resources and place barriers.
    ///
    /// `globals` is written once into the buffer bound at `Cbv0`. On failure
    /// the graph stays in [`GraphState::Building`] and everything allocated so
    /// far is released.
    pub fn compile<G: Pod>(&mut self, device: &mut Device, globals: &G) -> Result<(), GraphicsError> {
        profile_function!();
        if self.state != GraphState::Building {
            return Err(self.invalid_state("compile").into());
        }

        let names: Vec<&str> = self.passes.iter().map(Pass::name).collect();
        barriers::validate(&names, &self.resources, &self.views)?;

        if let Err(err) = self.compile_device_objects(device, bytemuck::bytes_of(globals)) {
            if let Err(cleanup) = self.release_device_objects(device) {
                log::error!("Cleanup after failed compile also failed: {}", cleanup);
            }
            self.entry_barriers.clear();
            self.final_barriers.clear();
            return Err(err);
        }

        self.state = GraphState::Compiled;
        log::debug!(
            "Compiled render graph: {} passes, {} resources, {} views, {} barriers, arena {} bytes",
            self.passes.len(),
            self.resources.len(),
            self.views.len(),
            self.barrier_count(),
            self.arena.used()
        );
        Ok(())
    }

    fn compile_device_objects(
        &mut self,
        device: &mut Device,
        globals: &[u8],
    ) -> Result<(), GraphicsError> {
        let plan = barriers::plan(self.passes.len(), &self.resources, &self.views);
        self.allocate_resources(device, &plan.start_states)?;
        self.create_views(device)?;

        self.entry_barriers = plan
            .entry
            .iter()
            .map(|barriers| self.device_barriers(barriers))
            .collect::<Result<_, _>>()?;
        self.final_barriers = self.device_barriers(&plan.final_barriers)?;

        self.create_constants(device, globals)
    }

    fn allocate_resources(
        &mut self,
        device: &mut Device,
        start_states: &[ResourceState],
    ) -> Result<(), GraphicsError> {
        profile_scope!("allocate_resources");
        let infos = self
            .resources
            .iter()
            .map(|resource| {
                if resource.is_imported() {
                    Ok(None)
                } else {
                    device.allocation_info(&resource.desc).map(Some)
                }
            })
            .collect::<Result<Vec<Option<AllocationInfo>>, GraphicsError>>()?;

        let mut total = 0u64;
        let mut alignment = 1u64;
        for info in infos.iter().flatten() {
            total = total.next_multiple_of(info.alignment.max(1)) + info.size;
            alignment = alignment.max(info.alignment);
        }
        self.arena.reserve(device, total, alignment)?;

        for (index, resource) in self.resources.iter_mut().enumerate() {
            if let Some(imported) = resource.imported {
                resource.handle = Some(imported);
                continue;
            }
            let Some(info) = infos[index] else {
                continue;
            };
            let offset = self.arena.allocate(info)?;
            let heap = self.arena.heap().ok_or(GraphicsError::OutOfMemory)?;
            let state = start_states[index];
            resource.handle = Some(match &resource.desc {
                ResourceDescriptor::Buffer(desc) => {
                    device.create_placed_buffer(heap, offset, desc, state)?.into()
                }
                ResourceDescriptor::Texture(desc) => {
                    device.create_placed_texture(heap, offset, desc, state)?.into()
                }
            });
        }
        Ok(())
    }

    fn create_views(&mut self, device: &mut Device) -> Result<(), GraphicsError> {
        for view in &mut self.views {
            let resource = &self.resources[view.resource.0 as usize];
            let Some(handle) = resource.handle else {
                continue;
            };
            if view.desc == resource.desc {
                view.handle = Some(handle);
                continue;
            }
            view.handle = Some(match (handle, &view.desc) {
                (ResourceId::Buffer(buffer), ResourceDescriptor::Buffer(desc)) => {
                    device.create_buffer_view(buffer, desc)?.into()
                }
                (ResourceId::Texture(texture), ResourceDescriptor::Texture(desc)) => {
                    device.create_texture_view(texture, desc)?.into()
                }
                _ => {
                    return Err(GraphicsError::Internal(format!(
                        "view of graph resource {} changes the resource kind",
                        view.resource.0
                    )));
                }
            });
        }
        Ok(())
    }

    fn device_barriers(&self, barriers: &[GraphBarrier]) -> Result<BarrierList, GraphicsError> {
        barriers
            .iter()
            .map(|barrier| {
                let resource = self.resources[barrier.resource.0 as usize]
                    .handle
                    .ok_or(GraphError::InvalidResource(barrier.resource.0))?;
                Ok(ResourceBarrier {
                    resource,
                    subresource: barrier.subresource,
                    before: barrier.before,
                    after: barrier.after,
                })
            })
            .collect()
    }

    fn create_constants(&mut self, device: &mut Device, globals: &[u8]) -> Result<(), GraphicsError> {
        let size = (globals.len() as u64).max(CONSTANTS_ALIGNMENT).next_multiple_of(CONSTANTS_ALIGNMENT);
        let desc = BufferDescriptor {
            raw: true,
            ..BufferDescriptor::upload(size)
        }
        .with_label("global constants");
        let buffer = device.create_buffer(&desc)?;
        self.globals = Some(buffer);
        device.write_buffer_data(buffer, 0, globals)?;

        self.frame_ring = Some(RingAllocator::new(
            device,
            FRAME_CONSTANTS_CAPACITY,
            "frame constants",
        )?);
        self.frame_ring_counter = None;
        self.frame_constants_offset = 0;

        self.pass_constants = self
            .passes
            .iter()
            .map(|pass| vec![0u8; pass.node().constants_size as usize])
            .collect();
        let reserved: u64 = self.passes.iter().map(|pass| pass.node().constants_size).sum();
        if reserved > 0 {
            self.pass_ring = Some(RingAllocator::new(device, reserved, "pass constants")?);
        }

        self.timer = PassTimer::new(device, self.passes.len())?;
        self.timings.clear();
        Ok(())
    }

    /// Write this frame's per-frame constants; the latest write is bound at
    /// `Srv0` by the next [`execute`](Self::execute).
    pub fn set_frame_constants<F: Pod>(
        &mut self,
        device: &mut Device,
        value: &F,
    ) -> Result<(), GraphicsError> {
        self.require_compiled("set frame constants")?;
        let ring = self
            .frame_ring
            .as_mut()
            .ok_or_else(|| GraphError::InvalidState("frame constants ring is missing".into()))?;
        if self.frame_ring_counter != Some(device.frame_counter()) {
            ring.begin_frame(device.frame_index());
            self.frame_ring_counter = Some(device.frame_counter());
        }
        self.frame_constants_offset =
            ring.alloc_and_copy(device, bytemuck::bytes_of(value), FRAME_CONSTANTS_ALIGNMENT)?;
        Ok(())
    }

    /// Stage constants for the pass at `pass`, copied into the per-pass ring
    /// by every [`execute`](Self::execute).
    ///
    /// The value must fit in what the pass reserved with
    /// [`RenderGraphBuilder::reserve_constants`].
    pub fn set_pass_constants<P: Pod>(&mut self, pass: usize, value: &P) -> Result<(), GraphicsError> {
        self.require_compiled("set pass constants")?;
        let bytes = bytemuck::bytes_of(value);
        let staged = self
            .pass_constants
            .get_mut(pass)
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("no pass with index {pass}")))?;
        if bytes.len() > staged.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} bytes of constants exceed the {} bytes pass {pass} reserved",
                bytes.len(),
                staged.len()
            )));
        }
        staged[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Record every pass into `cmd`.
    pub fn execute(&mut self, device: &mut Device, cmd: &mut CommandList) -> Result<(), GraphicsError> {
        profile_function!();
        self.require_compiled("execute")?;
        if !cmd.is_recording() {
            return Err(GraphicsError::InvalidState(format!(
                "command list is {:?}, not recording",
                cmd.state()
            )));
        }

        if let Some(timer) = &self.timer
            && let Some(timings) = timer.collect(device, self.passes.iter().map(Pass::name))?
        {
            self.timings = timings;
        }

        let mut pass_offsets: Vec<Option<u32>> = vec![None; self.passes.len()];
        if let Some(ring) = &mut self.pass_ring {
            ring.begin_frame(device.frame_index());
            for (index, staged) in self.pass_constants.iter().enumerate() {
                if !staged.is_empty() {
                    pass_offsets[index] = Some(ring.alloc_and_copy(device, staged, CONSTANTS_ALIGNMENT)?);
                }
            }
        }

        if let Some(globals) = self.globals {
            cmd.bind_to_slot(globals, BindSlot::Cbv0, 0);
        }
        if let Some(ring) = &self.frame_ring {
            cmd.bind_to_slot(ring.buffer(), BindSlot::Srv0, self.frame_constants_offset as u64);
        }
        if let Some(ring) = &self.pass_ring {
            cmd.bind_to_slot(ring.buffer(), BindSlot::Srv1, 0);
        }
        if let Some(timer) = &mut self.timer {
            timer.begin(device, cmd);
        }

        let resources = RenderGraphResources {
            resources: &self.resources,
            views: &self.views,
            device: &*device,
            pass_offsets: &pass_offsets,
        };
        for (index, pass) in self.passes.iter_mut().enumerate() {
            cmd.begin_marker(pass.name());
            if let Some(timer) = &self.timer {
                timer.pass_begin(cmd, index);
            }
            if let Some(barriers) = self.entry_barriers.get(index)
                && !barriers.is_empty()
            {
                cmd.barriers(barriers);
            }
            if let Pass::Graphics(node) = pass {
                let colors = node
                    .color_targets
                    .iter()
                    .map(|&view| {
                        Ok(TextureAttachment {
                            texture: resources.texture_view(view)?,
                            mip: 0,
                        })
                    })
                    .collect::<Result<SmallVec<[TextureAttachment; 8]>, GraphError>>()?;
                let depth = node
                    .depth_target
                    .map(|view| {
                        resources
                            .texture_view(view)
                            .map(|texture| TextureAttachment { texture, mip: 0 })
                    })
                    .transpose()?;
                if !colors.is_empty() || depth.is_some() {
                    cmd.set_render_targets(&colors, depth);
                }
                cmd.set_viewport_and_scissor(self.viewport);
            }
            pass.run(&resources, cmd)?;
            if let Some(timer) = &self.timer {
                timer.pass_end(cmd, index);
            }
            cmd.end_marker();
        }
        if !self.final_barriers.is_empty() {
            cmd.barriers(&self.final_barriers);
        }
        if let Some(timer) = &mut self.timer {
            timer.finish(device, cmd);
        }

        self.state = GraphState::Executing;
        Ok(())
    }

    /// Release everything the graph created and drop all passes.
    ///
    /// Releases go through the device's deferred path, so frames still in
    /// flight keep their resources.
    pub fn clear(&mut self, device: &mut Device) -> Result<(), GraphicsError> {
        profile_function!();
        let result = self.release_device_objects(device);
        self.passes.clear();
        self.resources.clear();
        self.views.clear();
        self.entry_barriers.clear();
        self.final_barriers.clear();
        self.pass_constants.clear();
        self.timings.clear();
        self.state = GraphState::Building;
        result
    }

    fn release_device_objects(&mut self, device: &mut Device) -> Result<(), GraphicsError> {
        let mut result = Ok(());
        let mut record = |released: Result<(), GraphicsError>| {
            if let Err(err) = released {
                log::error!("Failed to release render graph object: {}", err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        };

        for view in &mut self.views {
            let owner = self.resources[view.resource.0 as usize].handle;
            if let Some(handle) = view.handle.take()
                && Some(handle) != owner
            {
                record(release_resource(device, handle));
            }
        }
        for resource in &mut self.resources {
            let handle = resource.handle.take();
            if !resource.is_imported()
                && let Some(handle) = handle
            {
                record(release_resource(device, handle));
            }
        }
        if let Some(globals) = self.globals.take() {
            record(device.release_buffer(globals));
        }
        if let Some(ring) = self.frame_ring.take() {
            record(ring.release(device));
        }
        if let Some(ring) = self.pass_ring.take() {
            record(ring.release(device));
        }
        if let Some(timer) = self.timer.take() {
            record(timer.release(device));
        }
        record(self.arena.release(device));
        result
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Viewport graphics passes render into.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Change the viewport used by the next [`execute`](Self::execute).
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Get the number of passes in the graph.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Get all passes in the graph.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Declared resources.
    pub fn resources(&self) -> &[GraphResource] {
        &self.resources
    }

    /// Declared views.
    pub fn views(&self) -> &[GraphResourceView] {
        &self.views
    }

    /// Barriers recorded before the pass at `pass`.
    pub fn entry_barriers(&self, pass: usize) -> &[ResourceBarrier] {
        self.entry_barriers.get(pass).map_or(&[], |barriers| barriers.as_slice())
    }

    /// Barriers recorded after the last pass.
    pub fn final_barriers(&self) -> &[ResourceBarrier] {
        &self.final_barriers
    }

    /// Total number of barriers, entry and final.
    pub fn barrier_count(&self) -> usize {
        self.entry_barriers.iter().map(SmallVec::len).sum::<usize>() + self.final_barriers.len()
    }

    /// GPU time of every pass in the latest execution the GPU has finished,
    /// empty until one has.
    pub fn pass_timings(&self) -> &[PassTiming] {
        &self.timings
    }

    /// Memory arena backing graph-owned resources.
    pub fn arena(&self) -> &TransientArena {
        &self.arena
    }

    /// Graphviz DOT description of passes and resources.
    ///
    /// Read edges are green, write edges red. Compiled resources show their
    /// bindless index when they have one.
    pub fn to_graphviz(&self, device: &Device) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph render_graph {{");
        let _ = writeln!(dot, "  rankdir=LR;");
        for (index, pass) in self.passes.iter().enumerate() {
            let _ = writeln!(
                dot,
                "  pass{index} [label=\"{}\\n{:?}\" shape=box];",
                escape(pass.name()),
                pass.kind()
            );
        }
        for (index, resource) in self.resources.iter().enumerate() {
            let mut label = escape(resource.name());
            if resource.is_imported() {
                label.push_str("\\n(imported)");
            }
            if let Some(bindless) = resource
                .handle
                .and_then(|handle| device.bindless_heap_index(handle).ok())
            {
                let _ = write!(label, "\\nbindless {bindless}");
            }
            let _ = writeln!(dot, "  res{index} [label=\"{label}\" shape=ellipse];");
        }
        for view in &self.views {
            let label = match view.subresource {
                Subresource::All => String::new(),
                Subresource::Mip(mip) => format!(" label=\"mip {mip}\""),
            };
            let (from, to, color) = if view.access.is_write() {
                (format!("pass{}", view.pass), format!("res{}", view.resource.0), "red")
            } else {
                (format!("res{}", view.resource.0), format!("pass{}", view.pass), "green")
            };
            let _ = writeln!(dot, "  {from} -> {to} [color={color}{label}];");
        }
        dot.push_str("}\n");
        dot
    }
}

fn release_resource(device: &mut Device, resource: ResourceId) -> Result<(), GraphicsError> {
    match resource {
        ResourceId::Buffer(buffer) => device.release_buffer(buffer),
        ResourceId::Texture(texture) => device.release_texture(texture),
    }
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}
