//! Common types shared between backends

use std::fmt;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Number of color channels stored per texel.
    pub fn channel_count(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm | TextureFormat::Depth32Float => 1,
            TextureFormat::Depth24PlusStencil8 => 2,
            _ => 4,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const STORAGE_BINDING: Self = Self(1 << 3);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Layout of a texture's array layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D2,
    /// Six array layers, viewed as a cube by default
    Cube,
}

impl TextureKind {
    pub fn array_layers(&self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            kind: TextureKind::D2,
            width: 1,
            height: 1,
            mip_levels: 1,
            sample_count: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureViewDimension {
    D2,
    D2Array,
    Cube,
}

/// Texture view descriptor. `None` fields cover the whole texture.
#[derive(Debug, Clone, Default)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    pub dimension: Option<TextureViewDimension>,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

impl TextureViewDescriptor {
    /// Single mip level of every layer, as a 2D array (storage writes into cube faces)
    pub fn mip_layers(mip_level: u32, layers: u32) -> Self {
        Self {
            label: None,
            dimension: Some(TextureViewDimension::D2Array),
            base_mip_level: mip_level,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(layers),
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }

    pub fn components(&self) -> u32 {
        (self.size() / 4) as u32
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Entry point name every WGSL source uses for this stage
    pub fn entry_point(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
            ShaderStage::Compute => "cs_main",
        }
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub anisotropy_clamp: u16,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            anisotropy_clamp: 1,
            compare: None,
        }
    }
}

/// What the completeness check needs to know about one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
}

/// Framebuffer completeness status, numbered like the GL status enums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    IncompleteMultisample,
}

impl FramebufferStatus {
    pub fn code(&self) -> u32 {
        match self {
            FramebufferStatus::Complete => 0x8CD5,
            FramebufferStatus::IncompleteAttachment => 0x8CD6,
            FramebufferStatus::MissingAttachment => 0x8CD7,
            FramebufferStatus::IncompleteDimensions => 0x8CD9,
            FramebufferStatus::IncompleteMultisample => 0x8D56,
        }
    }

    pub fn is_complete(&self) -> bool {
        *self == FramebufferStatus::Complete
    }

    /// Completeness rules shared by every backend.
    ///
    /// `color` and `depth_stencil` are `None` for a missing view; an unknown view
    /// handle must be reported as `IncompleteAttachment` by the caller.
    pub fn evaluate(
        color: Option<&AttachmentInfo>,
        depth_stencil: Option<&AttachmentInfo>,
    ) -> Self {
        if color.is_none() && depth_stencil.is_none() {
            return FramebufferStatus::MissingAttachment;
        }
        if color.is_some_and(|c| c.format.is_depth() || c.width == 0 || c.height == 0) {
            return FramebufferStatus::IncompleteAttachment;
        }
        if depth_stencil.is_some_and(|d| !d.format.is_depth() || d.width == 0 || d.height == 0) {
            return FramebufferStatus::IncompleteAttachment;
        }
        if let (Some(c), Some(d)) = (color, depth_stencil) {
            if c.width != d.width || c.height != d.height {
                return FramebufferStatus::IncompleteDimensions;
            }
            if c.sample_count != d.sample_count {
                return FramebufferStatus::IncompleteMultisample;
            }
        }
        FramebufferStatus::Complete
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:04X})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32, samples: u32, format: TextureFormat) -> AttachmentInfo {
        AttachmentInfo {
            width,
            height,
            sample_count: samples,
            format,
        }
    }

    #[test]
    fn test_framebuffer_needs_an_attachment() {
        assert_eq!(
            FramebufferStatus::evaluate(None, None),
            FramebufferStatus::MissingAttachment
        );
    }

    #[test]
    fn test_framebuffer_color_only_is_complete() {
        let color = info(64, 64, 1, TextureFormat::Rgba16Float);
        assert!(FramebufferStatus::evaluate(Some(&color), None).is_complete());
    }

    #[test]
    fn test_framebuffer_rejects_mismatches() {
        let color = info(64, 64, 4, TextureFormat::Rgba16Float);
        let depth = info(32, 64, 4, TextureFormat::Depth24PlusStencil8);
        assert_eq!(
            FramebufferStatus::evaluate(Some(&color), Some(&depth)),
            FramebufferStatus::IncompleteDimensions
        );

        let depth = info(64, 64, 1, TextureFormat::Depth24PlusStencil8);
        assert_eq!(
            FramebufferStatus::evaluate(Some(&color), Some(&depth)),
            FramebufferStatus::IncompleteMultisample
        );

        let not_depth = info(64, 64, 4, TextureFormat::Rgba8Unorm);
        assert_eq!(
            FramebufferStatus::evaluate(Some(&color), Some(&not_depth)),
            FramebufferStatus::IncompleteAttachment
        );
    }

    #[test]
    fn test_framebuffer_status_display_has_code() {
        let text = FramebufferStatus::IncompleteMultisample.to_string();
        assert!(text.contains("0x8D56"));
    }

    #[test]
    fn test_texture_usage_flags() {
        let usage = TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING;
        assert!(usage.contains(TextureUsage::STORAGE_BINDING));
        assert!(!usage.contains(TextureUsage::RENDER_ATTACHMENT));
    }
}
