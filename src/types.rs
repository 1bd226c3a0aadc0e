//! Plain value types shared between the driver boundary and the subsystems.
//!
//! Object handles are opaque driver names. They are `Copy` and carry no
//! ownership: the structure that created a handle is the one that deletes it.

use std::num::NonZeroU32;

use bytemuck::{Pod, Zeroable};

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub NonZeroU32);
    };
}

driver_handle!(
    /// Driver name of a texture object.
    TextureId
);
driver_handle!(
    /// Driver name of a framebuffer object.
    FramebufferId
);
driver_handle!(
    /// Driver name of a depth renderbuffer.
    RenderbufferId
);
driver_handle!(
    /// Driver name of a linked shader program.
    ProgramId
);

/// A sprite vertex as laid out in the shared per-frame vertex buffer.
///
/// The third texture coordinate selects the layer when the bound texture is
/// a 2D array.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SpriteVertex {
    /// World or screen position.
    pub position: [f32; 3],
    /// `s`, `t` and the array layer.
    pub tex_coord: [f32; 3],
    /// RGBA, normalized on upload.
    pub color: [u8; 4],
}

impl SpriteVertex {
    /// Build a vertex sampling layer 0.
    #[must_use]
    pub fn new(position: [f32; 3], s: f32, t: f32, color: [u8; 4]) -> Self {
        Self {
            position,
            tex_coord: [s, t, 0.0],
            color,
        }
    }
}

/// Primitive topology for a draw call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
    TriangleFan,
    Lines,
}

/// Texture sampling filter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Blend factor, one side of a blend function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Source and destination blend factors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    /// Factor applied to the incoming fragment.
    pub src: BlendFactor,
    /// Factor applied to the framebuffer contents.
    pub dst: BlendFactor,
}

impl BlendFunc {
    /// Standard translucency.
    pub const ALPHA: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
    /// Colors already multiplied by alpha.
    pub const PREMULTIPLIED: Self = Self::new(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
    /// Alpha-weighted additive, used by glows and particles.
    pub const ADDITIVE: Self = Self::new(BlendFactor::SrcAlpha, BlendFactor::One);
    /// Pure additive.
    pub const ONE_ONE: Self = Self::new(BlendFactor::One, BlendFactor::One);
    /// Darkening multiply, used by shadows and decals.
    pub const MODULATE: Self = Self::new(BlendFactor::Zero, BlendFactor::OneMinusSrcColor);

    /// Pair two blend factors.
    #[must_use]
    pub const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self { src, dst }
    }
}

/// Depth comparison function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Face culling, folding the enable flag and the culled face together.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CullMode {
    Disabled,
    Front,
    Back,
}

/// Polygon offset presets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PolygonOffset {
    Disabled,
    /// Pulls decals and overlays towards the viewer.
    Standard,
    /// Pushes filled geometry back so outlines drawn on top win.
    Outline,
}

impl PolygonOffset {
    /// `(factor, units)` for `glPolygonOffset`, `None` when disabled.
    #[must_use]
    pub fn factor_units(self) -> Option<(f32, f32)> {
        match self {
            Self::Disabled => None,
            Self::Standard => Some((-1.0, -2.0)),
            Self::Outline => Some((1.0, 1.0)),
        }
    }
}

/// Fixed-function texture combine mode for one texture unit.
///
/// The modern backend ignores it; the legacy backend feeds it to the
/// texture environment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TexEnvMode {
    Replace,
    Modulate,
    Decal,
    Add,
    Blend,
}

/// Vertex layout activated together with a render state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum VertexLayout {
    None,
    /// [`SpriteVertex`] records from the shared vertex buffer.
    Sprite,
    /// Attribute-less full-screen quad, positions derived from the vertex id.
    Fullscreen,
}

/// Color texture storage format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ColorFormat {
    Rgba8,
    Rgb8,
    /// Half-float RGB for high dynamic range targets.
    Rgb16F,
}

/// Depth renderbuffer storage format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DepthFormat {
    Depth16,
    Depth24,
    Depth32,
    Depth32F,
}

/// Texture dimensionality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TextureKind {
    Texture2D,
    /// Layered texture, one layer per sprite frame.
    Texture2DArray,
}

/// Everything needed to allocate texture storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: ColorFormat,
    pub width: u32,
    pub height: u32,
    /// Layer count, `1` for plain 2D textures.
    pub layers: u32,
}

impl TextureDesc {
    /// A single-layer 2D texture.
    #[must_use]
    pub fn texture_2d(format: ColorFormat, width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::Texture2D,
            format,
            width,
            height,
            layers: 1,
        }
    }

    /// Bytes expected for a full upload of this texture.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        let texel = match self.format {
            ColorFormat::Rgba8 => 4,
            ColorFormat::Rgb8 => 3,
            ColorFormat::Rgb16F => 6,
        };
        self.width as usize * self.height as usize * self.layers as usize * texel
    }
}

/// Which framebuffer binding point an operation targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FramebufferTarget {
    Read,
    Draw,
    /// `GL_FRAMEBUFFER`: read and draw together.
    Both,
}

/// A framebuffer attachment point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Attachment {
    Color(u32),
    Depth,
}

/// Result of a framebuffer completeness check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    Unsupported,
    /// Any other status enum the driver returned.
    Other(u32),
}

impl FramebufferStatus {
    /// Whether the framebuffer can be rendered to.
    #[must_use]
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}

/// An integer pixel rectangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// A rectangle anchored at the origin.
    #[must_use]
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: gl_size(width),
            height: gl_size(height),
        }
    }
}

/// Window or render-target size in pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Viewport {
    /// A viewport of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero (minimized window).
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Convert a `u32` to `i32` for GL API calls, saturating at `i32::MAX`.
///
/// Viewport and texture dimensions never get near the limit in practice.
#[must_use]
pub fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
