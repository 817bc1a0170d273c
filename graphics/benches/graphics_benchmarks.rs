use criterion::{Criterion, black_box, criterion_group, criterion_main};

use framegraph::{
    BufferDescriptor, CommandList, Device, DeviceConfig, GraphResourceId, QueueType, RenderGraph,
    RingAllocator, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};

/// Chain of `passes` compute passes, each reading the previous pass's buffer
/// and writing its own, ending in a graphics pass.
fn build_chain(passes: usize) -> RenderGraph {
    let mut graph = RenderGraph::new(Viewport::from_dimensions(256, 256));
    let mut previous: Option<GraphResourceId> = None;
    for i in 0..passes {
        let input = previous;
        previous = *graph
            .add_compute_pass(
                format!("pass_{i}"),
                move |builder, output: &mut Option<GraphResourceId>| {
                    if let Some(input) = input {
                        builder.read(input)?;
                    }
                    let buffer = builder.create_buffer(BufferDescriptor::rw_structured(1024, 16));
                    builder.write(buffer)?;
                    *output = Some(buffer);
                    Ok(())
                },
                |_, _, cmd| {
                    cmd.dispatch(16, 1, 1);
                    Ok(())
                },
            )
            .unwrap_or(&None);
    }
    let _ = graph.add_graphics_pass(
        "present",
        move |builder, _: &mut ()| {
            if let Some(input) = previous {
                builder.read(input)?;
            }
            let color = builder.create_texture(TextureDescriptor::new_2d(
                256,
                256,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RenderTarget,
            ));
            builder.render_target(color)?;
            Ok(())
        },
        |_, _, cmd| {
            cmd.draw(3, 1);
            Ok(())
        },
    );
    graph
}

fn dummy_device() -> Device {
    Device::new(DeviceConfig::dummy()).expect("dummy device")
}

// ---------------------------------------------------------------------------
// Render graph
// ---------------------------------------------------------------------------

fn bench_graph_build(c: &mut Criterion) {
    c.bench_function("render_graph_build_32_passes", |b| {
        b.iter(|| black_box(build_chain(32)));
    });
}

fn bench_graph_compile(c: &mut Criterion) {
    let mut device = dummy_device();
    c.bench_function("render_graph_compile_clear_32_passes", |b| {
        b.iter(|| {
            let mut graph = build_chain(32);
            graph.compile(&mut device, &0u32).expect("compile");
            black_box(graph.barrier_count());
            graph.clear(&mut device).expect("clear");
            device.on_update().expect("update");
        });
    });
}

fn bench_graph_execute(c: &mut Criterion) {
    let mut device = dummy_device();
    let mut graph = build_chain(32);
    graph.compile(&mut device, &0u32).expect("compile");

    c.bench_function("render_graph_execute_32_passes", |b| {
        b.iter(|| {
            let mut cmd = CommandList::new(QueueType::Graphics);
            cmd.begin().expect("begin");
            graph.execute(&mut device, &mut cmd).expect("execute");
            cmd.close().expect("close");
            device.submit(&mut cmd, QueueType::Graphics).expect("submit");
            device.on_update().expect("update");
        });
    });
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

fn bench_create_release_buffer(c: &mut Criterion) {
    let mut device = dummy_device();
    c.bench_function("device_create_release_buffer", |b| {
        b.iter(|| {
            let buffer = device
                .create_buffer(&BufferDescriptor::structured(256, 16))
                .expect("buffer");
            device.release_buffer(buffer).expect("release");
            device.on_update().expect("update");
        });
    });
}

fn bench_create_release_texture(c: &mut Criterion) {
    let mut device = dummy_device();
    let desc = TextureDescriptor::new_2d(512, 512, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead)
        .with_mips(4);
    c.bench_function("device_create_release_texture", |b| {
        b.iter(|| {
            let texture = device.create_texture(&desc).expect("texture");
            device.release_texture(texture).expect("release");
            device.on_update().expect("update");
        });
    });
}

fn bench_ring_allocate(c: &mut Criterion) {
    let mut device = dummy_device();
    let mut ring = RingAllocator::new(&mut device, 64 * 1024, "bench ring").expect("ring");
    let payload = [0u8; 64];
    c.bench_function("ring_alloc_and_copy_256", |b| {
        b.iter(|| {
            ring.begin_frame(device.frame_index());
            for _ in 0..256 {
                black_box(
                    ring.alloc_and_copy(&mut device, &payload, 16)
                        .expect("allocation"),
                );
            }
            device.on_update().expect("update");
        });
    });
}

criterion_group!(
    benches,
    bench_graph_build,
    bench_graph_compile,
    bench_graph_execute,
    bench_create_release_buffer,
    bench_create_release_texture,
    bench_ring_allocate,
);
criterion_main!(benches);
