//! Pipeline descriptions and the content-addressed pipeline cache.
//!
//! Pipelines are expensive to build, so callers go through a [`PipelineCache`]
//! owned by whoever renders (there is no process-wide cache). The cache key is
//! an xxh3-128 digest of everything that affects the compiled pipeline: shader
//! bytecode, entry points, attachment formats and fixed-function state.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::device::{Device, PipelineId};
use crate::error::GraphicsError;
use crate::types::TextureFormat;

/// Compiled shader bytecode (SPIR-V for the Vulkan backend).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderModule {
    /// Bytecode.
    pub bytecode: Vec<u8>,
    /// Entry point name.
    pub entry_point: String,
}

impl ShaderModule {
    /// Create a module with the given entry point.
    pub fn new(bytecode: impl Into<Vec<u8>>, entry_point: impl Into<String>) -> Self {
        Self {
            bytecode: bytecode.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Create a module from SPIR-V words with entry point `main`.
    pub fn from_spirv(words: &[u32]) -> Self {
        Self::new(bytemuck::cast_slice::<u32, u8>(words).to_vec(), "main")
    }
}

/// Primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Triangle list.
    #[default]
    TriangleList,
    /// Triangle strip.
    TriangleStrip,
    /// Line list.
    LineList,
    /// Point list.
    PointList,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
}

/// Description of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Vertex stage.
    pub vertex: ShaderModule,
    /// Fragment stage.
    pub fragment: ShaderModule,
    /// Color attachment formats, in slot order.
    pub color_formats: SmallVec<[TextureFormat; 8]>,
    /// Depth attachment format.
    pub depth_format: Option<TextureFormat>,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Face culling.
    pub cull_mode: CullMode,
    /// Depth testing with `less-or-equal`.
    pub depth_test: bool,
    /// Depth writes.
    pub depth_write: bool,
}

impl GraphicsPipelineDescriptor {
    /// Create a descriptor with default fixed-function state and no attachments.
    pub fn new(vertex: ShaderModule, fragment: ShaderModule) -> Self {
        Self {
            label: None,
            vertex,
            fragment,
            color_formats: SmallVec::new(),
            depth_format: None,
            topology: PrimitiveTopology::default(),
            cull_mode: CullMode::default(),
            depth_test: false,
            depth_write: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a color attachment format.
    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    /// Set the depth format and enable depth test and writes.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self.depth_test = true;
        self.depth_write = true;
        self
    }

    /// Set the topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cull mode.
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }
}

/// Description of a compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Compute stage.
    pub compute: ShaderModule,
}

impl ComputePipelineDescriptor {
    /// Create a compute pipeline descriptor.
    pub fn new(compute: ShaderModule) -> Self {
        Self {
            label: None,
            compute,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Either kind of pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineDescriptor {
    /// Graphics pipeline.
    Graphics(GraphicsPipelineDescriptor),
    /// Compute pipeline.
    Compute(ComputePipelineDescriptor),
}

impl PipelineDescriptor {
    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Graphics(desc) => desc.label.as_deref(),
            Self::Compute(desc) => desc.label.as_deref(),
        }
    }

    /// Returns true for compute pipelines.
    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute(_))
    }

    /// Content hash used as cache key. Labels do not contribute.
    pub fn content_hash(&self) -> u128 {
        let mut hasher = Xxh3::new();
        match self {
            Self::Graphics(desc) => {
                hasher.update(b"graphics");
                hash_module(&mut hasher, &desc.vertex);
                hash_module(&mut hasher, &desc.fragment);
                hasher.update(&(desc.color_formats.len() as u32).to_le_bytes());
                for format in &desc.color_formats {
                    hasher.update(format!("{format:?}").as_bytes());
                }
                hasher.update(format!("{:?}", desc.depth_format).as_bytes());
                hasher.update(format!("{:?}/{:?}", desc.topology, desc.cull_mode).as_bytes());
                hasher.update(&[desc.depth_test as u8, desc.depth_write as u8]);
            }
            Self::Compute(desc) => {
                hasher.update(b"compute");
                hash_module(&mut hasher, &desc.compute);
            }
        }
        hasher.digest128()
    }
}

fn hash_module(hasher: &mut Xxh3, module: &ShaderModule) {
    hasher.update(&(module.bytecode.len() as u64).to_le_bytes());
    hasher.update(&module.bytecode);
    hasher.update(&(module.entry_point.len() as u32).to_le_bytes());
    hasher.update(module.entry_point.as_bytes());
}

/// Cache of pipelines keyed by content hash.
#[derive(Debug, Default)]
pub struct PipelineCache {
    lookup: FxHashMap<u128, PipelineId>,
    hits: u64,
    misses: u64,
}

impl PipelineCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached graphics pipeline for `desc`, building it on a miss.
    pub fn get_or_create_graphics(
        &mut self,
        device: &mut Device,
        desc: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, GraphicsError> {
        self.get_or_create(device, PipelineDescriptor::Graphics(desc.clone()))
    }

    /// Return the cached compute pipeline for `desc`, building it on a miss.
    pub fn get_or_create_compute(
        &mut self,
        device: &mut Device,
        desc: &ComputePipelineDescriptor,
    ) -> Result<PipelineId, GraphicsError> {
        self.get_or_create(device, PipelineDescriptor::Compute(desc.clone()))
    }

    fn get_or_create(
        &mut self,
        device: &mut Device,
        desc: PipelineDescriptor,
    ) -> Result<PipelineId, GraphicsError> {
        let key = desc.content_hash();
        // An entry whose pipeline was released behind our back is rebuilt.
        if let Some(&id) = self.lookup.get(&key)
            && device.pipeline(id).is_ok()
        {
            self.hits += 1;
            return Ok(id);
        }

        self.misses += 1;
        log::debug!(
            "Pipeline cache miss for {:?} (key {:032x})",
            desc.label(),
            key
        );
        let id = device.create_pipeline(desc)?;
        self.lookup.insert(key, id);
        Ok(id)
    }

    /// Number of cached pipelines.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that built a pipeline.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Release every cached pipeline through the device's deferred path.
    pub fn clear(&mut self, device: &mut Device) -> Result<(), GraphicsError> {
        for (_, id) in self.lookup.drain() {
            if device.pipeline(id).is_ok() {
                device.release_pipeline(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;

    fn module(byte: u8) -> ShaderModule {
        ShaderModule::new(vec![byte; 16], "main")
    }

    fn graphics(byte: u8) -> GraphicsPipelineDescriptor {
        GraphicsPipelineDescriptor::new(module(byte), module(byte + 1))
            .with_color_format(TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn test_hash_ignores_label() {
        let a = PipelineDescriptor::Graphics(graphics(1).with_label("a"));
        let b = PipelineDescriptor::Graphics(graphics(1).with_label("b"));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_covers_state() {
        let base = PipelineDescriptor::Graphics(graphics(1)).content_hash();
        let culled =
            PipelineDescriptor::Graphics(graphics(1).with_cull_mode(CullMode::None)).content_hash();
        let depth = PipelineDescriptor::Graphics(graphics(1).with_depth(TextureFormat::Depth32Float))
            .content_hash();
        let shader = PipelineDescriptor::Graphics(graphics(2)).content_hash();
        let entry = PipelineDescriptor::Compute(ComputePipelineDescriptor::new(ShaderModule::new(
            vec![1; 16],
            "cs_main",
        )))
        .content_hash();
        let compute =
            PipelineDescriptor::Compute(ComputePipelineDescriptor::new(module(1))).content_hash();

        assert_ne!(base, culled);
        assert_ne!(base, depth);
        assert_ne!(base, shader);
        assert_ne!(entry, compute);
    }

    #[test]
    fn test_cache_hits_and_misses() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut cache = PipelineCache::new();

        let a = cache.get_or_create_graphics(&mut device, &graphics(1)).unwrap();
        let b = cache
            .get_or_create_graphics(&mut device, &graphics(1).with_label("again"))
            .unwrap();
        let c = cache
            .get_or_create_compute(&mut device, &ComputePipelineDescriptor::new(module(9)))
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
        assert_eq!(device.pipeline_count(), 2);
    }

    #[test]
    fn test_independent_caches() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut first = PipelineCache::new();
        let mut second = PipelineCache::new();

        first.get_or_create_graphics(&mut device, &graphics(3)).unwrap();
        second.get_or_create_graphics(&mut device, &graphics(3)).unwrap();
        assert_eq!(first.misses(), 1);
        assert_eq!(second.misses(), 1);
    }

    #[test]
    fn test_released_pipeline_is_rebuilt() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut cache = PipelineCache::new();

        let a = cache.get_or_create_graphics(&mut device, &graphics(4)).unwrap();
        device.release_pipeline(a).unwrap();
        let b = cache.get_or_create_graphics(&mut device, &graphics(4)).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_clear_releases_pipelines() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut cache = PipelineCache::new();
        cache.get_or_create_graphics(&mut device, &graphics(5)).unwrap();

        cache.clear(&mut device).unwrap();
        assert!(cache.is_empty());
        assert_eq!(device.pipeline_count(), 0);
        assert_eq!(device.pending_release_count(), 1);
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let mut device = Device::new(DeviceConfig::dummy()).unwrap();
        let mut cache = PipelineCache::new();
        let desc = ComputePipelineDescriptor::new(ShaderModule::new(Vec::new(), "main"));
        assert!(matches!(
            cache.get_or_create_compute(&mut device, &desc),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(cache.is_empty());
    }
}
