//! Texture types and descriptors.

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, signed normalized.
    R8Snorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,
    /// 8-bit red channel, signed integer.
    R8Sint,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth.
    Depth24Plus,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24Plus
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel/block.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// How a texture is used for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureUsage {
    /// No implied view; copy source or destination only.
    #[default]
    General,
    /// Sampled in shaders.
    ShaderRead,
    /// Read-write storage image.
    ShaderReadWrite,
    /// Color attachment.
    RenderTarget,
    /// Depth/stencil attachment.
    DepthStencilTarget,
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    /// 2D texture, optionally an array.
    #[default]
    D2,
    /// Volume texture.
    D3,
    /// Cube map (six layers).
    Cube,
}

/// Descriptor for creating a texture or a texture view.
///
/// `base_mip` and `mip_levels` select the mip range a view exposes. For a
/// freshly created texture `base_mip` is zero.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Texture format.
    pub format: TextureFormat,
    /// Dimensionality.
    pub dimension: TextureDimension,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth for volume textures, layer count otherwise.
    pub depth_or_array_layers: u32,
    /// First mip exposed.
    pub base_mip: u32,
    /// Mip level count.
    pub mip_levels: u32,
    /// Usage.
    pub usage: TextureUsage,
}

impl PartialEq for TextureDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format
            && self.dimension == other.dimension
            && self.width == other.width
            && self.height == other.height
            && self.depth_or_array_layers == other.depth_or_array_layers
            && self.base_mip == other.base_mip
            && self.mip_levels == other.mip_levels
            && self.usage == other.usage
    }
}

impl Eq for TextureDescriptor {}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            format,
            dimension: TextureDimension::D2,
            width,
            height,
            depth_or_array_layers: 1,
            base_mip: 0,
            mip_levels: 1,
            usage,
        }
    }

    /// Create a new volume texture descriptor.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            dimension: TextureDimension::D3,
            depth_or_array_layers: depth,
            ..Self::new_2d(width, height, format, usage)
        }
    }

    /// Create a new cube map descriptor.
    pub fn new_cube(size: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Cube,
            depth_or_array_layers: 6,
            ..Self::new_2d(size, size, format, usage)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mips(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Restrict to a mip range, for views.
    pub fn with_mip_range(mut self, base_mip: u32, count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_levels = count;
        self
    }

    /// Set the usage, keeping extent and format.
    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Number of separately tracked subresources (one per mip).
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels
    }

    /// Full mip chain length for the extent.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = match self.dimension {
            TextureDimension::D3 => self.width.max(self.height).max(self.depth_or_array_layers),
            _ => self.width.max(self.height),
        };
        32 - largest.max(1).leading_zeros()
    }

    /// Extent of `mip` as `(width, height, depth)`.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let depth = match self.dimension {
            TextureDimension::D3 => (self.depth_or_array_layers >> mip).max(1),
            _ => 1,
        };
        ((self.width >> mip).max(1), (self.height >> mip).max(1), depth)
    }

    /// Number of layers for array and cube textures.
    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::D3 => 1,
            _ => self.depth_or_array_layers,
        }
    }

    /// Tightly packed byte size of one mip, all layers included.
    pub fn mip_size_bytes(&self, mip: u32) -> u64 {
        let (w, h, d) = self.mip_extent(mip);
        w as u64 * h as u64 * d as u64 * self.array_layers() as u64 * self.format.block_size() as u64
    }

    /// Label or a placeholder, for logs.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or("<unnamed texture>")
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, TextureFormat::default(), TextureUsage::General)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(TextureFormat::R8Unorm.block_size(), 1);
        assert_eq!(TextureFormat::Rgba8Unorm.block_size(), 4);
        assert_eq!(TextureFormat::Rgba32Float.block_size(), 16);
    }

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_mip_chain() {
        let desc = TextureDescriptor::new_2d(256, 128, TextureFormat::Rgba8Unorm, TextureUsage::ShaderRead);
        assert_eq!(desc.max_mip_levels(), 9);
        assert_eq!(desc.mip_extent(3), (32, 16, 1));
        assert_eq!(desc.mip_extent(8), (1, 1, 1));
        assert_eq!(desc.mip_size_bytes(1), 128 * 64 * 4);
    }

    #[test]
    fn test_cube_layers() {
        let desc = TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float, TextureUsage::ShaderRead);
        assert_eq!(desc.array_layers(), 6);
        assert_eq!(desc.mip_size_bytes(0), 64 * 64 * 6 * 8);
    }

    #[test]
    fn test_equality_ignores_label() {
        let a = TextureDescriptor::new_2d(4, 4, TextureFormat::R32Float, TextureUsage::ShaderReadWrite)
            .with_label("a");
        let b = a.clone().with_label("b");
        assert_eq!(a, b);
        assert_ne!(a, b.with_mip_range(0, 2));
    }
}
