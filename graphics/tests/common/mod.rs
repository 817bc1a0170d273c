//! Common utilities for device and render graph integration tests.
//!
//! Tests are parameterized over [`Backend`]; backends that are not compiled in
//! or cannot be created on this machine are skipped.

use std::sync::Arc;

use parking_lot::Mutex;

use framegraph::{
    BackendType, Device, DeviceConfig, GraphResourceId, GraphicsError, RenderGraph,
    TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};

/// Names of the pass callbacks in the order they ran.
pub type CallbackLog = Arc<Mutex<Vec<&'static str>>>;

/// Side of the textures used by the graph scenarios.
pub const SCENARIO_SIZE: u32 = 256;

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (records commands, no GPU work).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => cfg!(feature = "vulkan-backend"),
        }
    }

    fn backend_type(self) -> BackendType {
        match self {
            Backend::Dummy => BackendType::Dummy,
            Backend::Vulkan => BackendType::Vulkan,
        }
    }
}

/// Install the test logger once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a device, or `None` if the backend is unavailable here.
pub fn create_device(backend: Backend, frame_count: u32) -> Option<Device> {
    init_logging();
    if !backend.is_available() {
        return None;
    }
    let config = DeviceConfig::default()
        .with_backend(backend.backend_type())
        .with_frame_count(frame_count)
        .with_validation(false);
    match Device::new(config) {
        Ok(device) => Some(device),
        Err(e) => {
            log::warn!("Backend {:?} could not be created: {}", backend, e);
            None
        }
    }
}

/// Render graph used by the compute-to-graphics scenario.
///
/// Pass 0 (`simulate`) writes a shader read-write texture from compute.
/// Pass 1 (`shade`) reads it and renders into a separate color target.
/// Every callback appends its pass name to `log`.
pub fn compute_then_graphics(
    log: &CallbackLog,
) -> Result<(RenderGraph, GraphResourceId), GraphicsError> {
    let mut graph = RenderGraph::new(Viewport::from_dimensions(SCENARIO_SIZE, SCENARIO_SIZE));

    let compute_log = log.clone();
    let field = (*graph
        .add_compute_pass(
            "simulate",
            |builder, field: &mut Option<GraphResourceId>| {
                let texture = builder.create_texture(
                    TextureDescriptor::new_2d(
                        SCENARIO_SIZE,
                        SCENARIO_SIZE,
                        TextureFormat::Rgba16Float,
                        TextureUsage::ShaderReadWrite,
                    )
                    .with_label("field"),
                );
                builder.write(texture)?;
                *field = Some(texture);
                Ok(())
            },
            move |_, _, cmd| {
                compute_log.lock().push("simulate");
                cmd.dispatch(SCENARIO_SIZE / 8, SCENARIO_SIZE / 8, 1);
                Ok(())
            },
        )?)
        .ok_or_else(|| GraphicsError::Internal("simulate pass did not create its texture".into()))?;

    let graphics_log = log.clone();
    graph.add_graphics_pass(
        "shade",
        move |builder, _: &mut ()| {
            builder.read(field)?;
            let color = builder.create_texture(
                TextureDescriptor::new_2d(
                    SCENARIO_SIZE,
                    SCENARIO_SIZE,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RenderTarget,
                )
                .with_label("color"),
            );
            builder.render_target(color)?;
            Ok(())
        },
        move |_, _, cmd| {
            graphics_log.lock().push("shade");
            cmd.draw(3, 1);
            Ok(())
        },
    )?;

    Ok((graph, field))
}
