//! The graphics-driver boundary.
//!
//! [`GlDriver`] is the complete set of driver calls the renderer makes. Both
//! addressing styles are present side by side: the `named_*` calls operate on
//! an object through its handle, the others act on whatever is bound to a
//! global binding point. Which of the two a subsystem uses is decided once by
//! [`Capabilities::resolve`](crate::caps::Capabilities::resolve), never at the
//! call site.

use std::collections::HashSet;

use crate::error::RenderError;
use crate::types::{
    Attachment, BlendFunc, CullMode, DepthFormat, DepthFunc, Filter, FramebufferId,
    FramebufferStatus, FramebufferTarget, PolygonOffset, Primitive, ProgramId, Rect,
    RenderbufferId, SpriteVertex, TexEnvMode, TextureDesc, TextureId, VertexLayout,
};

/// Reported GL version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
}

impl GlVersion {
    /// A version number.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether this version is `major.minor` or newer.
    #[must_use]
    pub fn at_least(self, major: u32, minor: u32) -> bool {
        self >= Self::new(major, minor)
    }
}

/// What the driver reported when probed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverInfo {
    /// `GL_VENDOR`.
    pub vendor: String,
    /// `GL_RENDERER`.
    pub renderer: String,
    /// Context version.
    pub version: GlVersion,
    /// OpenGL ES context.
    pub embedded: bool,
    /// Extension strings, e.g. `GL_ARB_framebuffer_object`.
    pub extensions: HashSet<String>,
    /// Entry points that failed to resolve even though the version or an
    /// extension advertises them.
    pub missing_entry_points: HashSet<&'static str>,
}

impl DriverInfo {
    /// Whether the named extension string was advertised.
    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Whether every listed entry point resolved.
    #[must_use]
    pub fn has_entry_points(&self, names: &[&'static str]) -> bool {
        names.iter().all(|name| !self.missing_entry_points.contains(name))
    }
}

/// Abort on a driver wrapper that has no implementation behind it.
///
/// Reaching this means a capability check was skipped: it is a programming
/// error, not a runtime condition.
#[track_caller]
pub(crate) fn unsupported(entry_point: &str) -> ! {
    log::error!("driver call {entry_point} issued without driver support");
    panic!("driver call {entry_point} issued without driver support");
}

/// Every driver call the renderer issues.
///
/// Implemented by the glow backend and by the recording driver the tests
/// use. Methods take `&mut self` because all rendering happens on the one
/// render thread.
pub trait GlDriver {
    /// Version, vendor strings and extensions.
    fn driver_info(&self) -> DriverInfo;

    // Textures.

    /// Allocate a texture and its storage, optionally uploading pixels.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceCreation`] if the driver cannot
    /// allocate the object.
    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, RenderError>;
    /// Release a texture.
    fn delete_texture(&mut self, texture: TextureId);
    /// Set minification and magnification filters.
    fn texture_filter(&mut self, texture: TextureId, min: Filter, mag: Filter);
    /// Clamp texture coordinates to the edge on both axes.
    fn texture_wrap_clamp(&mut self, texture: TextureId);
    /// Bind `texture` (or nothing) to texture unit `unit`.
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);

    // Framebuffers, bind-then-operate.

    /// `glGenFramebuffers`: the object exists only after its first bind.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceCreation`] on driver failure.
    fn gen_framebuffer(&mut self) -> Result<FramebufferId, RenderError>;
    /// Release a framebuffer of either addressing style.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    /// Bind a framebuffer, `None` meaning the default (screen) framebuffer.
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    /// Attach a texture level to the bound framebuffer.
    fn framebuffer_texture(
        &mut self,
        target: FramebufferTarget,
        attachment: Attachment,
        texture: TextureId,
        level: i32,
    );
    /// `glGenRenderbuffers`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceCreation`] on driver failure.
    fn gen_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError>;
    /// Release a renderbuffer.
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    /// Bind a renderbuffer, `None` unbinding.
    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>);
    /// Allocate storage for the bound renderbuffer.
    fn renderbuffer_storage(&mut self, format: DepthFormat, width: i32, height: i32);
    /// Attach a renderbuffer to the bound framebuffer.
    fn framebuffer_renderbuffer(
        &mut self,
        target: FramebufferTarget,
        attachment: Attachment,
        renderbuffer: RenderbufferId,
    );
    /// Completeness of the bound framebuffer.
    fn check_framebuffer_status(&mut self, target: FramebufferTarget) -> FramebufferStatus;
    /// Blit from the bound read framebuffer to the bound draw framebuffer.
    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, filter: Filter);

    // Framebuffers, named addressing.

    /// `glCreateFramebuffers`: usable by the named calls immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceCreation`] on driver failure.
    fn create_named_framebuffer(&mut self) -> Result<FramebufferId, RenderError>;
    /// Attach a texture level to `framebuffer`.
    fn named_framebuffer_texture(
        &mut self,
        framebuffer: FramebufferId,
        attachment: Attachment,
        texture: TextureId,
        level: i32,
    );
    /// Completeness of `framebuffer`.
    fn check_named_framebuffer_status(&mut self, framebuffer: FramebufferId)
        -> FramebufferStatus;
    /// Blit between two framebuffers by handle, `None` meaning the screen.
    fn blit_named_framebuffer(
        &mut self,
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        filter: Filter,
    );

    /// `glCreateRenderbuffers`.
    ///
    /// Drivers that do not expose it keep this default and list the entry
    /// point in [`DriverInfo::missing_entry_points`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceCreation`] on driver failure.
    fn create_named_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        unsupported("glCreateRenderbuffers")
    }
    /// `glNamedRenderbufferStorage`.
    fn named_renderbuffer_storage(
        &mut self,
        _renderbuffer: RenderbufferId,
        _format: DepthFormat,
        _width: i32,
        _height: i32,
    ) {
        unsupported("glNamedRenderbufferStorage");
    }
    /// `glNamedFramebufferRenderbuffer`.
    fn named_framebuffer_renderbuffer(
        &mut self,
        _framebuffer: FramebufferId,
        _attachment: Attachment,
        _renderbuffer: RenderbufferId,
    ) {
        unsupported("glNamedFramebufferRenderbuffer");
    }

    // Pipeline state.

    /// `GL_DEPTH_TEST` on or off.
    fn set_depth_test(&mut self, enabled: bool);
    /// Depth mask.
    fn set_depth_write(&mut self, enabled: bool);
    /// Depth comparison.
    fn set_depth_func(&mut self, func: DepthFunc);
    /// Face culling, disabled or front/back.
    fn set_cull_mode(&mut self, mode: CullMode);
    /// `GL_BLEND` on or off.
    fn set_blend_enabled(&mut self, enabled: bool);
    /// Source and destination blend factors.
    fn set_blend_func(&mut self, func: BlendFunc);
    /// Enable or disable a texture unit and set its combine mode.
    fn set_texture_unit(&mut self, unit: u32, enabled: bool, mode: TexEnvMode);
    /// Rasterized line width.
    fn set_line_width(&mut self, width: f32);
    /// Polygon offset mode.
    fn set_polygon_offset(&mut self, offset: PolygonOffset);
    /// Bind the vertex array and program for a layout.
    fn bind_vertex_layout(&mut self, layout: VertexLayout);

    // Drawing.

    /// Set the viewport.
    fn viewport(&mut self, rect: Rect);
    /// Clear the bound draw framebuffer's color, and depth if requested.
    fn clear(&mut self, color: [f32; 4], depth: bool);
    /// Column-major view-projection matrix used by the sprite layout.
    fn set_sprite_transform(&mut self, matrix: &[f32; 16]);
    /// Replace the contents of the shared sprite vertex buffer.
    fn upload_vertices(&mut self, vertices: &[SpriteVertex]);
    /// Replace the contents of the shared index buffer.
    fn upload_indices(&mut self, indices: &[u16]);
    /// Draw `count` vertices starting at `first` from the bound layout.
    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32);
    /// One `draw_arrays` per `(first, count)` pair, in a single call where supported.
    fn multi_draw_arrays(&mut self, mode: Primitive, firsts: &[i32], counts: &[i32]);
    /// Indexed multi-draw from the shared index buffer. `index_offsets` are in
    /// indices, not bytes.
    fn multi_draw_elements_base_vertex(
        &mut self,
        mode: Primitive,
        counts: &[i32],
        index_offsets: &[i32],
        base_vertices: &[i32],
    );
    /// Submit vertices from client memory, one primitive sequence.
    fn immediate_draw(&mut self, mode: Primitive, vertices: &[SpriteVertex]);

    // Programs.

    /// Compile and link a program from GLSL sources.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Shader`] with the driver log when compiling or
    /// linking fails.
    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramId, RenderError>;
    /// Release a program.
    fn delete_program(&mut self, program: ProgramId);
    /// Make `program` current. `None` returns to the layout's own program.
    fn use_program(&mut self, program: Option<ProgramId>);
    /// Set an integer or sampler uniform on `program`.
    fn uniform_i32(&mut self, program: ProgramId, name: &str, value: i32);
    /// Set a float uniform on `program`.
    fn uniform_f32(&mut self, program: ProgramId, name: &str, value: f32);

    /// Block until every queued command has executed. Diagnostics only.
    fn finish(&mut self);
}
