//! [`GlDriver`] over a [`glow`] context.
//!
//! Fixed-function behavior is emulated with one built-in sprite program: the
//! texture environment of unit 0 becomes the `u_texenv` uniform, and the
//! legacy client-memory draws stream through a second vertex array. Texture
//! edits happen on a scratch unit so they never disturb the bindings the
//! texture manager believes are in place.

use std::collections::HashMap;
use std::sync::Arc;

use glow::{HasContext, PixelUnpackData};

use crate::driver::{DriverInfo, GlDriver, GlVersion};
use crate::error::RenderError;
use crate::shaders;
use crate::types::{
    Attachment, BlendFactor, BlendFunc, ColorFormat, CullMode, DepthFormat, DepthFunc, Filter,
    FramebufferId, FramebufferStatus, FramebufferTarget, PolygonOffset, Primitive, ProgramId,
    Rect, RenderbufferId, SpriteVertex, TexEnvMode, TextureDesc, TextureId, TextureKind,
    VertexLayout,
};

/// Unit used for texture creation and parameter changes.
const SCRATCH_UNIT: u32 = 7;

/// Array textures bound "to unit N" live on unit N + this offset, so the
/// 2D and array samplers never share a unit.
const ARRAY_UNIT_OFFSET: u32 = 4;

/// Entry points glow does not wrap; capability resolution routes around them.
const UNWRAPPED_ENTRY_POINTS: [&str; 2] = ["glCreateRenderbuffers", "glNamedRenderbufferStorage"];

/// GL enum values are small enough that the cast is always safe.
#[expect(clippy::cast_possible_wrap)]
const fn gl_param(value: u32) -> i32 {
    value as i32
}

/// Sprite vertex stride, well within `i32` range.
#[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const SPRITE_STRIDE: i32 = std::mem::size_of::<SpriteVertex>() as i32;

fn primitive(mode: Primitive) -> u32 {
    match mode {
        Primitive::Triangles => glow::TRIANGLES,
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::TriangleFan => glow::TRIANGLE_FAN,
        Primitive::Lines => glow::LINES,
    }
}

fn filter(filter: Filter) -> u32 {
    match filter {
        Filter::Nearest => glow::NEAREST,
        Filter::Linear => glow::LINEAR,
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
    }
}

fn depth_func(func: DepthFunc) -> u32 {
    match func {
        DepthFunc::Never => glow::NEVER,
        DepthFunc::Less => glow::LESS,
        DepthFunc::Equal => glow::EQUAL,
        DepthFunc::LessEqual => glow::LEQUAL,
        DepthFunc::Greater => glow::GREATER,
        DepthFunc::NotEqual => glow::NOTEQUAL,
        DepthFunc::GreaterEqual => glow::GEQUAL,
        DepthFunc::Always => glow::ALWAYS,
    }
}

fn depth_format(format: DepthFormat) -> u32 {
    match format {
        DepthFormat::Depth16 => glow::DEPTH_COMPONENT16,
        DepthFormat::Depth24 => glow::DEPTH_COMPONENT24,
        DepthFormat::Depth32 => glow::DEPTH_COMPONENT32,
        DepthFormat::Depth32F => glow::DEPTH_COMPONENT32F,
    }
}

/// Internal format, pixel format and pixel type.
fn color_format(format: ColorFormat) -> (u32, u32, u32) {
    match format {
        ColorFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        ColorFormat::Rgb8 => (glow::RGB8, glow::RGB, glow::UNSIGNED_BYTE),
        ColorFormat::Rgb16F => (glow::RGB16F, glow::RGB, glow::HALF_FLOAT),
    }
}

fn framebuffer_target(target: FramebufferTarget) -> u32 {
    match target {
        FramebufferTarget::Read => glow::READ_FRAMEBUFFER,
        FramebufferTarget::Draw => glow::DRAW_FRAMEBUFFER,
        FramebufferTarget::Both => glow::FRAMEBUFFER,
    }
}

fn attachment(attachment: Attachment) -> u32 {
    match attachment {
        Attachment::Color(index) => glow::COLOR_ATTACHMENT0 + index,
        Attachment::Depth => glow::DEPTH_ATTACHMENT,
    }
}

fn status(value: u32) -> FramebufferStatus {
    match value {
        glow::FRAMEBUFFER_COMPLETE => FramebufferStatus::Complete,
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FramebufferStatus::IncompleteAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FramebufferStatus::MissingAttachment,
        glow::FRAMEBUFFER_UNSUPPORTED => FramebufferStatus::Unsupported,
        other => FramebufferStatus::Other(other),
    }
}

fn texture_target(kind: TextureKind) -> u32 {
    match kind {
        TextureKind::Texture2D => glow::TEXTURE_2D,
        TextureKind::Texture2DArray => glow::TEXTURE_2D_ARRAY,
    }
}

fn texenv_mode(enabled: bool, mode: TexEnvMode) -> i32 {
    if !enabled {
        return -1;
    }
    match mode {
        TexEnvMode::Replace => 0,
        TexEnvMode::Modulate => 1,
        TexEnvMode::Decal => 2,
        TexEnvMode::Add => 3,
        TexEnvMode::Blend => 4,
    }
}

fn creation_error(what: &'static str) -> impl FnOnce(String) -> RenderError {
    move |reason| RenderError::ResourceCreation { what, reason }
}

fn native_texture(texture: TextureId) -> glow::Texture {
    glow::NativeTexture(texture.0)
}

fn native_framebuffer(framebuffer: FramebufferId) -> glow::Framebuffer {
    glow::NativeFramebuffer(framebuffer.0)
}

fn native_renderbuffer(renderbuffer: RenderbufferId) -> glow::Renderbuffer {
    glow::NativeRenderbuffer(renderbuffer.0)
}

fn native_program(program: ProgramId) -> glow::Program {
    glow::NativeProgram(program.0)
}

/// Cached uniform locations for the sprite program.
struct SpriteUniforms {
    /// View-projection matrix.
    transform: Option<glow::UniformLocation>,
    /// Unit 0 combine mode, `-1` when texturing is off.
    texenv: Option<glow::UniformLocation>,
    /// Sample the array texture instead of the 2D one.
    array: Option<glow::UniformLocation>,
}

/// Driver backed by a live OpenGL context.
///
/// Only native (non-web) glow contexts are supported.
pub struct GlowDriver {
    gl: Arc<glow::Context>,

    /// Built-in program standing in for the fixed-function pipeline.
    sprite_program: glow::Program,
    sprite_uniforms: SpriteUniforms,

    /// Vertex array over the shared sprite vertex and index buffers.
    sprite_vao: glow::VertexArray,
    sprite_vbo: glow::Buffer,
    sprite_ebo: glow::Buffer,
    /// Vertex array for draws from client memory.
    stream_vao: glow::VertexArray,
    stream_vbo: glow::Buffer,
    /// Attribute-less vertex array for full-screen passes.
    empty_vao: glow::VertexArray,

    layout: VertexLayout,
    /// Program set through [`GlDriver::use_program`], overriding the layout's.
    program_override: Option<glow::Program>,
    texenv: i32,
    unit0_array: bool,
    sprite_uniforms_dirty: bool,
    depth_write: bool,

    texture_kinds: HashMap<TextureId, TextureKind>,
    uniform_cache: HashMap<(ProgramId, String), Option<glow::UniformLocation>>,
}

impl GlowDriver {
    /// Create the driver's built-in program and vertex arrays.
    ///
    /// # Safety
    ///
    /// The `gl` context must be current and valid. The caller must ensure
    /// that [`destroy`](Self::destroy) is called before the context is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Fails if the sprite program does not compile (the context lacks GLSL
    /// 1.40) or a vertex array cannot be created.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Result<Self, RenderError> {
        let sprite_program = unsafe {
            shaders::compile_program(
                &gl,
                shaders::SPRITE_VERTEX_SRC,
                shaders::SPRITE_FRAGMENT_SRC,
            )
        }?;

        let (sprite_uniforms, locations) = unsafe {
            let uniforms = SpriteUniforms {
                transform: gl.get_uniform_location(sprite_program, "u_transform"),
                texenv: gl.get_uniform_location(sprite_program, "u_texenv"),
                array: gl.get_uniform_location(sprite_program, "u_array"),
            };
            gl.use_program(Some(sprite_program));
            if let Some(location) = gl.get_uniform_location(sprite_program, "u_texture") {
                gl.uniform_1_i32(Some(&location), 0);
            }
            if let Some(location) = gl.get_uniform_location(sprite_program, "u_texture_array") {
                gl.uniform_1_i32(Some(&location), gl_param(ARRAY_UNIT_OFFSET));
            }
            gl.use_program(None);
            let locations = [
                gl.get_attrib_location(sprite_program, "a_position"),
                gl.get_attrib_location(sprite_program, "a_tex_coord"),
                gl.get_attrib_location(sprite_program, "a_color"),
            ];
            (uniforms, locations)
        };

        let (sprite_vao, sprite_vbo, sprite_ebo, stream_vao, stream_vbo, empty_vao) = unsafe {
            let sprite_vao = gl.create_vertex_array().map_err(creation_error("vertex array"))?;
            let sprite_vbo = gl.create_buffer().map_err(creation_error("buffer"))?;
            let sprite_ebo = gl.create_buffer().map_err(creation_error("buffer"))?;
            let stream_vao = gl.create_vertex_array().map_err(creation_error("vertex array"))?;
            let stream_vbo = gl.create_buffer().map_err(creation_error("buffer"))?;
            let empty_vao = gl.create_vertex_array().map_err(creation_error("vertex array"))?;

            Self::configure_sprite_attributes(&gl, sprite_vao, sprite_vbo, locations);
            gl.bind_vertex_array(Some(sprite_vao));
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(sprite_ebo));
            Self::configure_sprite_attributes(&gl, stream_vao, stream_vbo, locations);
            gl.bind_vertex_array(None);

            (sprite_vao, sprite_vbo, sprite_ebo, stream_vao, stream_vbo, empty_vao)
        };

        Ok(Self {
            gl,
            sprite_program,
            sprite_uniforms,
            sprite_vao,
            sprite_vbo,
            sprite_ebo,
            stream_vao,
            stream_vbo,
            empty_vao,
            layout: VertexLayout::None,
            program_override: None,
            texenv: -1,
            unit0_array: false,
            sprite_uniforms_dirty: true,
            depth_write: true,
            texture_kinds: HashMap::new(),
            uniform_cache: HashMap::new(),
        })
    }

    /// Point `vao`'s attributes at the sprite vertex layout in `vbo`.
    unsafe fn configure_sprite_attributes(
        gl: &glow::Context,
        vao: glow::VertexArray,
        vbo: glow::Buffer,
        locations: [Option<u32>; 3],
    ) {
        let [position, tex_coord, color] = locations;
        unsafe {
            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            if let Some(index) = position {
                gl.enable_vertex_attrib_array(index);
                gl.vertex_attrib_pointer_f32(index, 3, glow::FLOAT, false, SPRITE_STRIDE, 0);
            }
            if let Some(index) = tex_coord {
                gl.enable_vertex_attrib_array(index);
                gl.vertex_attrib_pointer_f32(index, 3, glow::FLOAT, false, SPRITE_STRIDE, 12);
            }
            if let Some(index) = color {
                gl.enable_vertex_attrib_array(index);
                gl.vertex_attrib_pointer_f32(index, 4, glow::UNSIGNED_BYTE, true, SPRITE_STRIDE, 24);
            }
        }
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    /// Clean up the driver's own GL objects.
    ///
    /// # Safety
    ///
    /// Must be called with the same GL context that was used to create the
    /// driver, and must be called exactly once.
    pub unsafe fn destroy(&self) {
        let gl = &self.gl;
        unsafe {
            gl.bind_vertex_array(None);
            gl.use_program(None);
            gl.delete_program(self.sprite_program);
            gl.delete_vertex_array(self.sprite_vao);
            gl.delete_vertex_array(self.stream_vao);
            gl.delete_vertex_array(self.empty_vao);
            gl.delete_buffer(self.sprite_vbo);
            gl.delete_buffer(self.sprite_ebo);
            gl.delete_buffer(self.stream_vbo);
        }
    }

    fn current_vao(&self) -> Option<glow::VertexArray> {
        match self.layout {
            VertexLayout::None => None,
            VertexLayout::Sprite => Some(self.sprite_vao),
            VertexLayout::Fullscreen => Some(self.empty_vao),
        }
    }

    fn current_program(&self) -> Option<glow::Program> {
        self.program_override.or(match self.layout {
            VertexLayout::Sprite => Some(self.sprite_program),
            VertexLayout::None | VertexLayout::Fullscreen => None,
        })
    }

    /// Push emulated fixed-function state before a sprite draw.
    fn prepare_draw(&mut self) {
        if self.program_override.is_some()
            || self.layout != VertexLayout::Sprite
            || !self.sprite_uniforms_dirty
        {
            return;
        }
        let gl = &self.gl;
        unsafe {
            gl.uniform_1_i32(self.sprite_uniforms.texenv.as_ref(), self.texenv);
            gl.uniform_1_i32(self.sprite_uniforms.array.as_ref(), i32::from(self.unit0_array));
        }
        self.sprite_uniforms_dirty = false;
    }

    fn with_scratch_texture(&self, texture: TextureId, edit: impl FnOnce(&glow::Context, u32)) {
        let target = texture_target(
            self.texture_kinds
                .get(&texture)
                .copied()
                .unwrap_or(TextureKind::Texture2D),
        );
        let gl: &glow::Context = &self.gl;
        unsafe {
            gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            gl.bind_texture(target, Some(native_texture(texture)));
        }
        edit(gl, target);
        unsafe { gl.bind_texture(target, None) };
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<glow::UniformLocation> {
        let gl = &self.gl;
        self.uniform_cache
            .entry((program, name.to_string()))
            .or_insert_with(|| unsafe { gl.get_uniform_location(native_program(program), name) })
            .clone()
    }
}

impl GlDriver for GlowDriver {
    fn driver_info(&self) -> DriverInfo {
        let gl = &self.gl;
        let version = gl.version();
        let (vendor, renderer) = unsafe {
            (
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
            )
        };
        DriverInfo {
            vendor,
            renderer,
            version: GlVersion::new(version.major, version.minor),
            embedded: version.is_embedded,
            extensions: gl.supported_extensions().clone(),
            missing_entry_points: UNWRAPPED_ENTRY_POINTS.into_iter().collect(),
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, RenderError> {
        let gl = &self.gl;
        let texture = unsafe { gl.create_texture() }.map_err(creation_error("texture"))?;
        let (internal, format, ty) = color_format(desc.format);
        let target = texture_target(desc.kind);
        let width = crate::types::gl_size(desc.width);
        let height = crate::types::gl_size(desc.height);

        unsafe {
            gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            gl.bind_texture(target, Some(texture));
            match desc.kind {
                TextureKind::Texture2D => gl.tex_image_2d(
                    target,
                    0,
                    gl_param(internal),
                    width,
                    height,
                    0,
                    format,
                    ty,
                    PixelUnpackData::Slice(pixels),
                ),
                TextureKind::Texture2DArray => gl.tex_image_3d(
                    target,
                    0,
                    gl_param(internal),
                    width,
                    height,
                    crate::types::gl_size(desc.layers),
                    0,
                    format,
                    ty,
                    PixelUnpackData::Slice(pixels),
                ),
            }
            // Incomplete mip chains sample black; start without mips.
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, gl_param(glow::LINEAR));
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, gl_param(glow::LINEAR));
            gl.bind_texture(target, None);
        }

        let id = TextureId(texture.0);
        self.texture_kinds.insert(id, desc.kind);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.texture_kinds.remove(&texture);
        unsafe { self.gl.delete_texture(native_texture(texture)) };
    }

    fn texture_filter(&mut self, texture: TextureId, min: Filter, mag: Filter) {
        self.with_scratch_texture(texture, |gl, target| unsafe {
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, gl_param(filter(min)));
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, gl_param(filter(mag)));
        });
    }

    fn texture_wrap_clamp(&mut self, texture: TextureId) {
        self.with_scratch_texture(texture, |gl, target| unsafe {
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, gl_param(glow::CLAMP_TO_EDGE));
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, gl_param(glow::CLAMP_TO_EDGE));
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        let kind = texture.and_then(|t| self.texture_kinds.get(&t).copied());
        let gl = &self.gl;
        unsafe {
            match kind {
                Some(TextureKind::Texture2DArray) => {
                    gl.active_texture(glow::TEXTURE0 + unit + ARRAY_UNIT_OFFSET);
                    gl.bind_texture(glow::TEXTURE_2D_ARRAY, texture.map(native_texture));
                }
                _ => {
                    gl.active_texture(glow::TEXTURE0 + unit);
                    gl.bind_texture(glow::TEXTURE_2D, texture.map(native_texture));
                }
            }
        }
        if unit == 0 {
            let array = kind == Some(TextureKind::Texture2DArray);
            if array != self.unit0_array {
                self.unit0_array = array;
                self.sprite_uniforms_dirty = true;
            }
        }
    }

    fn gen_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let framebuffer =
            unsafe { self.gl.create_framebuffer() }.map_err(creation_error("framebuffer"))?;
        Ok(FramebufferId(framebuffer.0))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        unsafe { self.gl.delete_framebuffer(native_framebuffer(framebuffer)) };
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        unsafe {
            self.gl.bind_framebuffer(
                framebuffer_target(target),
                framebuffer.map(native_framebuffer),
            );
        }
    }

    fn framebuffer_texture(
        &mut self,
        target: FramebufferTarget,
        point: Attachment,
        texture: TextureId,
        level: i32,
    ) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                framebuffer_target(target),
                attachment(point),
                glow::TEXTURE_2D,
                Some(native_texture(texture)),
                level,
            );
        }
    }

    fn gen_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        let renderbuffer =
            unsafe { self.gl.create_renderbuffer() }.map_err(creation_error("renderbuffer"))?;
        Ok(RenderbufferId(renderbuffer.0))
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        unsafe { self.gl.delete_renderbuffer(native_renderbuffer(renderbuffer)) };
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>) {
        unsafe {
            self.gl
                .bind_renderbuffer(glow::RENDERBUFFER, renderbuffer.map(native_renderbuffer));
        }
    }

    fn renderbuffer_storage(&mut self, format: DepthFormat, width: i32, height: i32) {
        unsafe {
            self.gl
                .renderbuffer_storage(glow::RENDERBUFFER, depth_format(format), width, height);
        }
    }

    fn framebuffer_renderbuffer(
        &mut self,
        target: FramebufferTarget,
        point: Attachment,
        renderbuffer: RenderbufferId,
    ) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                framebuffer_target(target),
                attachment(point),
                glow::RENDERBUFFER,
                Some(native_renderbuffer(renderbuffer)),
            );
        }
    }

    fn check_framebuffer_status(&mut self, target: FramebufferTarget) -> FramebufferStatus {
        status(unsafe { self.gl.check_framebuffer_status(framebuffer_target(target)) })
    }

    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, how: Filter) {
        unsafe {
            self.gl.blit_framebuffer(
                src.x,
                src.y,
                src.x + src.width,
                src.y + src.height,
                dst.x,
                dst.y,
                dst.x + dst.width,
                dst.y + dst.height,
                glow::COLOR_BUFFER_BIT,
                filter(how),
            );
        }
    }

    fn create_named_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let framebuffer = unsafe { self.gl.create_named_framebuffer() }
            .map_err(creation_error("framebuffer"))?;
        Ok(FramebufferId(framebuffer.0))
    }

    fn named_framebuffer_texture(
        &mut self,
        framebuffer: FramebufferId,
        point: Attachment,
        texture: TextureId,
        level: i32,
    ) {
        unsafe {
            self.gl.named_framebuffer_texture(
                Some(native_framebuffer(framebuffer)),
                attachment(point),
                Some(native_texture(texture)),
                level,
            );
        }
    }

    fn named_framebuffer_renderbuffer(
        &mut self,
        framebuffer: FramebufferId,
        point: Attachment,
        renderbuffer: RenderbufferId,
    ) {
        unsafe {
            self.gl.named_framebuffer_renderbuffer(
                Some(native_framebuffer(framebuffer)),
                attachment(point),
                glow::RENDERBUFFER,
                Some(native_renderbuffer(renderbuffer)),
            );
        }
    }

    fn check_named_framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus {
        status(unsafe {
            self.gl
                .check_named_framebuffer_status(Some(native_framebuffer(framebuffer)), glow::FRAMEBUFFER)
        })
    }

    fn blit_named_framebuffer(
        &mut self,
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        how: Filter,
    ) {
        unsafe {
            self.gl.blit_named_framebuffer(
                read.map(native_framebuffer),
                draw.map(native_framebuffer),
                src.x,
                src.y,
                src.x + src.width,
                src.y + src.height,
                dst.x,
                dst.y,
                dst.x + dst.width,
                dst.y + dst.height,
                glow::COLOR_BUFFER_BIT,
                filter(how),
            );
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::DEPTH_TEST);
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
        }
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
        unsafe { self.gl.depth_mask(enabled) };
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        unsafe { self.gl.depth_func(depth_func(func)) };
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        let gl = &self.gl;
        unsafe {
            match mode {
                CullMode::Disabled => gl.disable(glow::CULL_FACE),
                CullMode::Front => {
                    gl.enable(glow::CULL_FACE);
                    gl.cull_face(glow::FRONT);
                }
                CullMode::Back => {
                    gl.enable(glow::CULL_FACE);
                    gl.cull_face(glow::BACK);
                }
            }
        }
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::BLEND);
            } else {
                self.gl.disable(glow::BLEND);
            }
        }
    }

    fn set_blend_func(&mut self, func: BlendFunc) {
        unsafe {
            self.gl
                .blend_func(blend_factor(func.src), blend_factor(func.dst));
        }
    }

    fn set_texture_unit(&mut self, unit: u32, enabled: bool, mode: TexEnvMode) {
        // Only unit 0 feeds the sprite program.
        if unit != 0 {
            return;
        }
        let texenv = texenv_mode(enabled, mode);
        if texenv != self.texenv {
            self.texenv = texenv;
            self.sprite_uniforms_dirty = true;
        }
    }

    fn set_line_width(&mut self, width: f32) {
        unsafe { self.gl.line_width(width) };
    }

    fn set_polygon_offset(&mut self, offset: PolygonOffset) {
        let gl = &self.gl;
        unsafe {
            match offset.factor_units() {
                Some((factor, units)) => {
                    gl.enable(glow::POLYGON_OFFSET_FILL);
                    gl.polygon_offset(factor, units);
                }
                None => gl.disable(glow::POLYGON_OFFSET_FILL),
            }
        }
    }

    fn bind_vertex_layout(&mut self, layout: VertexLayout) {
        self.layout = layout;
        self.sprite_uniforms_dirty = true;
        let vao = self.current_vao();
        let program = self.current_program();
        unsafe {
            self.gl.bind_vertex_array(vao);
            self.gl.use_program(program);
        }
    }

    fn viewport(&mut self, rect: Rect) {
        unsafe { self.gl.viewport(rect.x, rect.y, rect.width, rect.height) };
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4], depth: bool) {
        let gl = &self.gl;
        unsafe {
            gl.clear_color(r, g, b, a);
            if depth {
                // Depth clears honor the write mask.
                gl.depth_mask(true);
                gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
                gl.depth_mask(self.depth_write);
            } else {
                gl.clear(glow::COLOR_BUFFER_BIT);
            }
        }
    }

    fn set_sprite_transform(&mut self, matrix: &[f32; 16]) {
        let gl = &self.gl;
        unsafe {
            gl.use_program(Some(self.sprite_program));
            gl.uniform_matrix_4_f32_slice(self.sprite_uniforms.transform.as_ref(), false, matrix);
            gl.use_program(self.current_program());
        }
    }

    fn upload_vertices(&mut self, vertices: &[SpriteVertex]) {
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.sprite_vbo));
            self.gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(vertices),
                glow::STREAM_DRAW,
            );
        }
    }

    fn upload_indices(&mut self, indices: &[u16]) {
        // The element buffer binding is vertex-array state.
        let gl = &self.gl;
        unsafe {
            gl.bind_vertex_array(Some(self.sprite_vao));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(indices),
                glow::STATIC_DRAW,
            );
            gl.bind_vertex_array(self.current_vao());
        }
    }

    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32) {
        self.prepare_draw();
        unsafe { self.gl.draw_arrays(primitive(mode), first, count) };
    }

    fn multi_draw_arrays(&mut self, mode: Primitive, firsts: &[i32], counts: &[i32]) {
        self.prepare_draw();
        for (&first, &count) in firsts.iter().zip(counts) {
            unsafe { self.gl.draw_arrays(primitive(mode), first, count) };
        }
    }

    fn multi_draw_elements_base_vertex(
        &mut self,
        mode: Primitive,
        counts: &[i32],
        index_offsets: &[i32],
        base_vertices: &[i32],
    ) {
        self.prepare_draw();
        for ((&count, &offset), &base) in counts.iter().zip(index_offsets).zip(base_vertices) {
            unsafe {
                self.gl.draw_elements_base_vertex(
                    primitive(mode),
                    count,
                    glow::UNSIGNED_SHORT,
                    // Byte offset of u16 indices.
                    offset * 2,
                    base,
                );
            }
        }
    }

    fn immediate_draw(&mut self, mode: Primitive, vertices: &[SpriteVertex]) {
        let Ok(count) = i32::try_from(vertices.len()) else {
            return;
        };
        self.prepare_draw();
        let gl = &self.gl;
        unsafe {
            gl.bind_vertex_array(Some(self.stream_vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.stream_vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(vertices),
                glow::STREAM_DRAW,
            );
            gl.draw_arrays(primitive(mode), 0, count);
            gl.bind_vertex_array(self.current_vao());
        }
    }

    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramId, RenderError> {
        let program = unsafe { shaders::compile_program(&self.gl, vertex_src, fragment_src) }?;
        Ok(ProgramId(program.0))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.uniform_cache.retain(|(owner, _), _| *owner != program);
        if self.program_override == Some(native_program(program)) {
            self.program_override = None;
        }
        unsafe { self.gl.delete_program(native_program(program)) };
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program_override = program.map(native_program);
        self.sprite_uniforms_dirty = true;
        let current = self.current_program();
        unsafe { self.gl.use_program(current) };
    }

    fn uniform_i32(&mut self, program: ProgramId, name: &str, value: i32) {
        let location = self.uniform_location(program, name);
        unsafe { self.gl.uniform_1_i32(location.as_ref(), value) };
    }

    fn uniform_f32(&mut self, program: ProgramId, name: &str, value: f32) {
        let location = self.uniform_location(program, name);
        unsafe { self.gl.uniform_1_f32(location.as_ref(), value) };
    }

    fn finish(&mut self) {
        unsafe { self.gl.finish() };
    }
}
