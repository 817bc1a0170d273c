//! Integration tests for the device and the render graph.
//!
//! Every test runs on each backend and with two and three frames in flight.
//! Tests that record and inspect command streams only run where the recorded
//! commands are valid without pipelines (the dummy backend).
//!
//! ```bash
//! cargo test --test frame_graph_tests
//! cargo test --test frame_graph_tests --features vulkan-backend
//! ```

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use common::{Backend, CallbackLog, SCENARIO_SIZE, compute_then_graphics, create_device};
use framegraph::command_list::Command;
use framegraph::{
    BufferDescriptor, CommandList, DescriptorHeapKind, GraphError, GraphResourceId, GraphState,
    GraphicsError, QueueType, RenderGraph, ResourceId, ResourceState, Subresource, TextureDescriptor,
    TextureFormat, TextureUsage, Viewport,
};

fn occupancy(device: &framegraph::Device) -> [usize; 5] {
    [
        device.buffer_count(),
        device.texture_count(),
        device.descriptor_count(DescriptorHeapKind::Resource),
        device.descriptor_count(DescriptorHeapKind::RenderTarget),
        device.descriptor_count(DescriptorHeapKind::DepthStencil),
    ]
}

// ============================================================================
// Handles and deferred releases
// ============================================================================

#[rstest]
fn test_stale_handles_fail_loudly(
    #[values(Backend::Dummy, Backend::Vulkan)] backend: Backend,
    #[values(2, 3)] frame_count: u32,
) {
    let Some(mut device) = create_device(backend, frame_count) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let first = device
        .create_buffer(&BufferDescriptor::structured(16, 16).with_label("first"))
        .unwrap();
    device.release_buffer(first).unwrap();
    let second = device
        .create_buffer(&BufferDescriptor::structured(16, 16).with_label("second"))
        .unwrap();

    // The slot is reused but the old handle never aliases the new buffer.
    assert_ne!(first, second);
    assert!(matches!(
        device.buffer(first),
        Err(GraphicsError::InvalidHandle(_))
    ));
    assert_eq!(device.buffer(second).unwrap().desc().debug_name(), "second");
    assert!(device.release_buffer(first).is_err());

    let mut cmd = CommandList::new(QueueType::Graphics);
    cmd.begin().unwrap();
    cmd.clear_buffer(first, 0);
    cmd.close().unwrap();
    assert!(matches!(
        device.submit(&mut cmd, QueueType::Graphics),
        Err(GraphicsError::InvalidHandle(_))
    ));
}

#[rstest]
fn test_create_release_round_trip(
    #[values(Backend::Dummy, Backend::Vulkan)] backend: Backend,
    #[values(2, 3)] frame_count: u32,
) {
    let Some(mut device) = create_device(backend, frame_count) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let before = occupancy(&device);

    let buffer = device.create_buffer(&BufferDescriptor::byte_address(1024)).unwrap();
    let texture = device
        .create_texture(
            &TextureDescriptor::new_2d(64, 64, TextureFormat::Rgba8Unorm, TextureUsage::RenderTarget)
                .with_mips(3),
        )
        .unwrap();
    assert_ne!(occupancy(&device), before);

    device.release_buffer(buffer).unwrap();
    device.release_texture(texture).unwrap();
    assert!(device.pending_release_count() > 0);

    // Nothing is destroyed while the frames that could use it are in flight.
    for _ in 0..frame_count {
        device.on_update().unwrap();
        assert!(device.pending_release_count() > 0);
    }
    for _ in 0..2 {
        device.on_update().unwrap();
    }

    assert_eq!(device.pending_release_count(), 0);
    assert_eq!(occupancy(&device), before);
}

#[rstest]
fn test_upload_and_readback(
    #[values(Backend::Dummy, Backend::Vulkan)] backend: Backend,
    #[values(2, 3)] frame_count: u32,
) {
    let Some(mut device) = create_device(backend, frame_count) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data: Vec<u8> = (0..64u8).collect();
    let target = device.create_buffer(&BufferDescriptor::byte_address(64)).unwrap();
    let readback = device.create_buffer(&BufferDescriptor::readback(64)).unwrap();

    let mut cmd = CommandList::new(QueueType::Graphics);
    cmd.begin().unwrap();
    device.upload_buffer_data(&mut cmd, target, 0, &data).unwrap();
    cmd.copy_buffer(target, 0, readback, 0, 64);
    cmd.close().unwrap();
    device.submit(&mut cmd, QueueType::Graphics).unwrap();
    device.wait_idle().unwrap();

    assert_eq!(device.read_buffer_data(readback, 0, 64).unwrap(), data);

    // Upload buffers are recycled once their frame comes around again.
    for _ in 0..frame_count + 1 {
        device.on_update().unwrap();
    }
    assert!(device.upload_buffer_count() <= 1);
}

// ============================================================================
// Render graph
// ============================================================================

#[rstest]
fn test_compute_to_graphics_scenario(
    #[values(Backend::Dummy, Backend::Vulkan)] backend: Backend,
    #[values(2, 3)] frame_count: u32,
) {
    let Some(mut device) = create_device(backend, frame_count) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let log: CallbackLog = Arc::new(Mutex::new(Vec::new()));
    let (mut graph, field) = compute_then_graphics(&log).unwrap();
    graph.compile(&mut device, &[0.0f32; 4]).unwrap();
    assert_eq!(graph.state(), GraphState::Compiled);

    // The field starts in the state its writer needs.
    assert!(graph.entry_barriers(0).is_empty());
    let barriers = graph.entry_barriers(1);
    assert_eq!(barriers.len(), 1);
    let field_handle = graph.resources()[field.index() as usize].handle().unwrap();
    assert_eq!(barriers[0].resource, field_handle);
    assert_eq!(barriers[0].subresource, Subresource::All);
    assert_eq!(barriers[0].before, ResourceState::UNORDERED_ACCESS);
    assert!(barriers[0].after.is_read_only());

    let ResourceId::Texture(field_texture) = field_handle else {
        panic!("field is not a texture: {field_handle:?}");
    };
    assert_eq!(device.texture(field_texture).unwrap().desc().width, SCENARIO_SIZE);

    if backend != Backend::Dummy {
        return;
    }

    for frame in 0..frame_count * 2 {
        graph.set_frame_constants(&mut device, &[frame as f32; 4]).unwrap();
        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        graph.execute(&mut device, &mut cmd).unwrap();
        cmd.close().unwrap();

        let commands = cmd.commands();
        let dispatch = commands
            .iter()
            .position(|command| matches!(command, Command::Dispatch { .. }))
            .unwrap();
        let draw = commands
            .iter()
            .position(|command| matches!(command, Command::Draw { .. }))
            .unwrap();
        let between = commands[dispatch..draw]
            .iter()
            .filter_map(|command| match command {
                Command::Barriers(barriers) => Some(barriers.len()),
                _ => None,
            })
            .sum::<usize>();
        assert_eq!(between, 1);
        assert!(
            !commands[..dispatch]
                .iter()
                .any(|command| matches!(command, Command::Barriers(_)))
        );

        device.submit(&mut cmd, QueueType::Graphics).unwrap();
        device.on_update().unwrap();
    }

    let order = log.lock().clone();
    assert_eq!(order.len(), (frame_count * 4) as usize);
    for pair in order.chunks(2) {
        assert_eq!(pair, ["simulate", "shade"]);
    }

    graph.clear(&mut device).unwrap();
    for _ in 0..frame_count + 2 {
        device.on_update().unwrap();
    }
    assert_eq!(device.pending_release_count(), 0);
    assert_eq!(device.heap_count(), 0);
}

#[rstest]
fn test_graph_is_deterministic(#[values(2, 3)] frame_count: u32) {
    let record = || {
        let mut device = create_device(Backend::Dummy, frame_count).unwrap();
        let log: CallbackLog = Arc::new(Mutex::new(Vec::new()));
        let (mut graph, _) = compute_then_graphics(&log).unwrap();
        graph.compile(&mut device, &1u32).unwrap();

        let mut cmd = CommandList::new(QueueType::Graphics);
        cmd.begin().unwrap();
        graph.execute(&mut device, &mut cmd).unwrap();
        cmd.close().unwrap();
        let barriers: Vec<_> = (0..graph.pass_count())
            .map(|pass| graph.entry_barriers(pass).to_vec())
            .collect();
        (barriers, graph.final_barriers().to_vec(), cmd.commands().to_vec())
    };

    let first = record();
    for _ in 0..4 {
        assert_eq!(record(), first);
    }
}

#[rstest]
fn test_write_write_conflict(#[values(2, 3)] frame_count: u32) {
    let mut device = create_device(Backend::Dummy, frame_count).unwrap();
    let build = |with_reader: bool| {
        let mut graph = RenderGraph::new(Viewport::default());
        let buffer = (*graph
            .add_compute_pass(
                "produce",
                |builder, id: &mut Option<GraphResourceId>| {
                    let buffer = builder.create_buffer(BufferDescriptor::rw_structured(64, 16));
                    builder.write(buffer)?;
                    *id = Some(buffer);
                    Ok(())
                },
                |_, _, _| Ok(()),
            )
            .unwrap())
        .unwrap();
        if with_reader {
            graph
                .add_compute_pass(
                    "consume",
                    move |builder, _: &mut ()| {
                        builder.read(buffer)?;
                        Ok(())
                    },
                    |_, _, _| Ok(()),
                )
                .unwrap();
        }
        graph
            .add_compute_pass(
                "overwrite",
                move |builder, _: &mut ()| {
                    builder.write(buffer)?;
                    Ok(())
                },
                |_, _, _| Ok(()),
            )
            .unwrap();
        graph
    };

    for _ in 0..2 {
        let mut graph = build(false);
        let err = graph.compile(&mut device, &0u32).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::Graph(GraphError::WriteAfterWrite { .. })
        ));
        assert_eq!(graph.state(), GraphState::Building);
    }
    assert_eq!(device.buffer_count(), 0);

    let mut graph = build(true);
    graph.compile(&mut device, &0u32).unwrap();
    assert_eq!(graph.entry_barriers(1).len(), 1);
    assert_eq!(graph.entry_barriers(2).len(), 1);
}

#[rstest]
fn test_imported_resource_returns_to_resting_state(
    #[values(Backend::Dummy, Backend::Vulkan)] backend: Backend,
    #[values(2, 3)] frame_count: u32,
) {
    let Some(mut device) = create_device(backend, frame_count) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let texture = device
        .create_texture(&TextureDescriptor::new_2d(
            32,
            32,
            TextureFormat::Rgba16Float,
            TextureUsage::ShaderReadWrite,
        ))
        .unwrap();
    let resting = device.resource_state(texture).unwrap();

    let mut graph = RenderGraph::new(Viewport::from_dimensions(32, 32));
    let device_ref = &device;
    graph
        .add_graphics_pass(
            "sample",
            |builder, _: &mut ()| {
                let imported = builder.import(device_ref, texture)?;
                builder.read(imported)?;
                let color = builder.create_texture(TextureDescriptor::new_2d(
                    32,
                    32,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RenderTarget,
                ));
                builder.render_target(color)?;
                Ok(())
            },
            |_, _, _| Ok(()),
        )
        .unwrap();
    graph.compile(&mut device, &0u32).unwrap();

    let entry = graph.entry_barriers(0);
    assert_eq!(entry.len(), 1);
    assert_eq!(entry[0].before, resting);
    let last = graph.final_barriers();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].after, resting);
    assert_eq!(last[0].before, entry[0].after);

    graph.clear(&mut device).unwrap();
    assert!(device.texture(texture).is_ok());
}
