//! A [`GlDriver`] that records calls instead of talking to a GPU.
//!
//! It hands out fake object names, tracks which are still alive, mirrors
//! bound pipeline state and checks binding rules the real driver would
//! reject (named calls on generated names, bound calls with nothing bound).

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;

use crate::driver::{DriverInfo, GlDriver, GlVersion};
use crate::error::RenderError;
use crate::state::{RenderState, TextureUnitState, MAX_TEXTURE_UNITS};
use crate::types::{
    Attachment, BlendFunc, CullMode, DepthFormat, DepthFunc, Filter, FramebufferId,
    FramebufferStatus, FramebufferTarget, PolygonOffset, Primitive, ProgramId, Rect,
    RenderbufferId, SpriteVertex, TexEnvMode, TextureDesc, TextureId, VertexLayout,
};

/// One recorded driver call. Only calls the tests inspect carry arguments.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    TextureFilter(TextureId, Filter, Filter),
    TextureWrapClamp(TextureId),
    BindTexture(u32, Option<TextureId>),
    GenFramebuffer(FramebufferId),
    CreateNamedFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(FramebufferTarget, Option<FramebufferId>),
    FramebufferTexture(Attachment, TextureId),
    NamedFramebufferTexture(FramebufferId, Attachment, TextureId),
    GenRenderbuffer(RenderbufferId),
    CreateNamedRenderbuffer(RenderbufferId),
    DeleteRenderbuffer(RenderbufferId),
    BindRenderbuffer(Option<RenderbufferId>),
    RenderbufferStorage(DepthFormat, i32, i32),
    NamedRenderbufferStorage(RenderbufferId, DepthFormat, i32, i32),
    FramebufferRenderbuffer(Attachment, RenderbufferId),
    NamedFramebufferRenderbuffer(FramebufferId, Attachment, RenderbufferId),
    CheckStatus,
    Blit {
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        filter: Filter,
    },
    NamedBlit {
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        filter: Filter,
    },
    State,
    BindVertexLayout(VertexLayout),
    Viewport(Rect),
    Clear,
    SpriteTransform,
    UploadVertices(usize),
    UploadIndices(usize),
    DrawArrays(Primitive, i32, i32),
    MultiDrawArrays(Primitive, Vec<i32>, Vec<i32>),
    MultiDrawElementsBaseVertex(Primitive, Vec<i32>, Vec<i32>, Vec<i32>),
    ImmediateDraw(Primitive, usize),
    CompileProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    Uniform(ProgramId, String),
    Finish,
}

impl Call {
    pub(crate) fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawArrays(..)
                | Self::MultiDrawArrays(..)
                | Self::MultiDrawElementsBaseVertex(..)
                | Self::ImmediateDraw(..)
        )
    }
}

/// Pipeline state as the GPU would currently see it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PipelineMirror {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub cull: CullMode,
    pub blend_enabled: bool,
    pub blend_func: BlendFunc,
    pub texture_units: [TextureUnitState; MAX_TEXTURE_UNITS],
    pub line_width: f32,
    pub polygon_offset: PolygonOffset,
    pub layout: VertexLayout,
}

impl Default for PipelineMirror {
    /// OpenGL's initial state.
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: true,
            depth_func: DepthFunc::Less,
            cull: CullMode::Disabled,
            blend_enabled: false,
            blend_func: BlendFunc::new(
                crate::types::BlendFactor::One,
                crate::types::BlendFactor::Zero,
            ),
            texture_units: [TextureUnitState::DISABLED; MAX_TEXTURE_UNITS],
            line_width: 1.0,
            polygon_offset: PolygonOffset::Disabled,
            layout: VertexLayout::None,
        }
    }
}

impl PipelineMirror {
    /// Whether every field of `state` is in effect.
    pub(crate) fn matches(&self, state: &RenderState) -> bool {
        let blend_ok = match state.blend {
            Some(func) => self.blend_enabled && self.blend_func == func,
            None => !self.blend_enabled,
        };
        self.depth_test == state.depth_test
            && self.depth_write == state.depth_write
            && self.depth_func == state.depth_func
            && self.cull == state.cull
            && blend_ok
            && self.texture_units == state.texture_units
            && (self.line_width - state.line_width).abs() < f32::EPSILON
            && self.polygon_offset == state.polygon_offset
            && self.layout == state.vertex_layout
    }
}

pub(crate) struct RecordingDriver {
    pub info: DriverInfo,
    pub calls: Vec<Call>,
    pub pipeline: PipelineMirror,
    pub live_textures: HashSet<TextureId>,
    pub live_framebuffers: HashSet<FramebufferId>,
    pub live_renderbuffers: HashSet<RenderbufferId>,
    pub live_programs: HashSet<ProgramId>,
    /// Force every completeness check to fail.
    pub force_incomplete: bool,
    /// Force shader compilation to fail.
    pub fail_shaders: bool,
    pub bound_textures: HashMap<u32, TextureId>,
    pub uploaded_vertices: Vec<SpriteVertex>,
    next_name: u32,
    /// Names that became objects, either created or bound once.
    framebuffer_objects: HashSet<FramebufferId>,
    attachments: HashMap<FramebufferId, HashSet<Attachment>>,
    read_framebuffer: Option<FramebufferId>,
    draw_framebuffer: Option<FramebufferId>,
    bound_renderbuffer: Option<RenderbufferId>,
}

impl RecordingDriver {
    pub(crate) fn with_info(info: DriverInfo) -> Self {
        Self {
            info,
            calls: Vec::new(),
            pipeline: PipelineMirror::default(),
            live_textures: HashSet::new(),
            live_framebuffers: HashSet::new(),
            live_renderbuffers: HashSet::new(),
            live_programs: HashSet::new(),
            force_incomplete: false,
            fail_shaders: false,
            bound_textures: HashMap::new(),
            uploaded_vertices: Vec::new(),
            next_name: 0,
            framebuffer_objects: HashSet::new(),
            attachments: HashMap::new(),
            read_framebuffer: None,
            draw_framebuffer: None,
            bound_renderbuffer: None,
        }
    }

    pub(crate) fn version(major: u32, minor: u32, extensions: &[&str]) -> Self {
        Self::with_info(DriverInfo {
            vendor: "Recording".into(),
            renderer: "Recording driver".into(),
            version: GlVersion::new(major, minor),
            embedded: false,
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            missing_entry_points: HashSet::new(),
        })
    }

    /// A 4.6 driver with every feature.
    pub(crate) fn modern() -> Self {
        Self::version(4, 6, &[])
    }

    /// A 3.3 driver: core framebuffers, no direct state access.
    pub(crate) fn bind_only() -> Self {
        Self::version(3, 3, &[])
    }

    pub(crate) fn missing(mut self, entry_points: &[&'static str]) -> Self {
        self.info.missing_entry_points.extend(entry_points.iter().copied());
        self
    }

    pub(crate) fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub(crate) fn draw_calls(&self) -> Vec<&Call> {
        self.calls.iter().filter(|call| call.is_draw()).collect()
    }

    pub(crate) fn no_leaks(&self) -> bool {
        self.live_textures.is_empty()
            && self.live_framebuffers.is_empty()
            && self.live_renderbuffers.is_empty()
    }

    fn name(&mut self) -> NonZeroU32 {
        self.next_name += 1;
        NonZeroU32::new(self.next_name).unwrap_or(NonZeroU32::MIN)
    }

    fn bound(&self, target: FramebufferTarget) -> Option<FramebufferId> {
        match target {
            FramebufferTarget::Read => self.read_framebuffer,
            FramebufferTarget::Draw | FramebufferTarget::Both => self.draw_framebuffer,
        }
    }

    fn require_bound(&self, target: FramebufferTarget, call: &str) -> FramebufferId {
        self.bound(target)
            .unwrap_or_else(|| panic!("{call} with the default framebuffer bound"))
    }

    fn require_object(&self, framebuffer: FramebufferId, call: &str) {
        assert!(
            self.framebuffer_objects.contains(&framebuffer),
            "{call} on {framebuffer:?}, which is not a framebuffer object yet"
        );
    }

    fn status_of(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let has_color = self
            .attachments
            .get(&framebuffer)
            .is_some_and(|a| a.iter().any(|a| matches!(a, Attachment::Color(_))));
        if self.force_incomplete {
            FramebufferStatus::IncompleteAttachment
        } else if has_color {
            FramebufferStatus::Complete
        } else {
            FramebufferStatus::MissingAttachment
        }
    }
}

impl GlDriver for RecordingDriver {
    fn driver_info(&self) -> DriverInfo {
        self.info.clone()
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, RenderError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::ResourceCreation {
                what: "texture",
                reason: "zero-sized".into(),
            });
        }
        if let Some(pixels) = pixels {
            assert_eq!(pixels.len(), desc.byte_len(), "upload size mismatch");
        }
        let texture = TextureId(self.name());
        self.live_textures.insert(texture);
        self.calls.push(Call::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        assert!(self.live_textures.remove(&texture), "double delete of {texture:?}");
        self.calls.push(Call::DeleteTexture(texture));
    }

    fn texture_filter(&mut self, texture: TextureId, min: Filter, mag: Filter) {
        self.calls.push(Call::TextureFilter(texture, min, mag));
    }

    fn texture_wrap_clamp(&mut self, texture: TextureId) {
        self.calls.push(Call::TextureWrapClamp(texture));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => {
                assert!(self.live_textures.contains(&texture), "bind of dead {texture:?}");
                self.bound_textures.insert(unit, texture);
            }
            None => {
                self.bound_textures.remove(&unit);
            }
        }
        self.calls.push(Call::BindTexture(unit, texture));
    }

    fn gen_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let framebuffer = FramebufferId(self.name());
        self.live_framebuffers.insert(framebuffer);
        self.calls.push(Call::GenFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        assert!(
            self.live_framebuffers.remove(&framebuffer),
            "double delete of {framebuffer:?}"
        );
        self.framebuffer_objects.remove(&framebuffer);
        self.attachments.remove(&framebuffer);
        if self.read_framebuffer == Some(framebuffer) {
            self.read_framebuffer = None;
        }
        if self.draw_framebuffer == Some(framebuffer) {
            self.draw_framebuffer = None;
        }
        self.calls.push(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        if let Some(framebuffer) = framebuffer {
            assert!(
                self.live_framebuffers.contains(&framebuffer),
                "bind of dead {framebuffer:?}"
            );
            self.framebuffer_objects.insert(framebuffer);
        }
        match target {
            FramebufferTarget::Read => self.read_framebuffer = framebuffer,
            FramebufferTarget::Draw => self.draw_framebuffer = framebuffer,
            FramebufferTarget::Both => {
                self.read_framebuffer = framebuffer;
                self.draw_framebuffer = framebuffer;
            }
        }
        self.calls.push(Call::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture(
        &mut self,
        target: FramebufferTarget,
        attachment: Attachment,
        texture: TextureId,
        _level: i32,
    ) {
        let framebuffer = self.require_bound(target, "glFramebufferTexture2D");
        self.attachments.entry(framebuffer).or_default().insert(attachment);
        self.calls.push(Call::FramebufferTexture(attachment, texture));
    }

    fn gen_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        let renderbuffer = RenderbufferId(self.name());
        self.live_renderbuffers.insert(renderbuffer);
        self.calls.push(Call::GenRenderbuffer(renderbuffer));
        Ok(renderbuffer)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        assert!(
            self.live_renderbuffers.remove(&renderbuffer),
            "double delete of {renderbuffer:?}"
        );
        self.calls.push(Call::DeleteRenderbuffer(renderbuffer));
    }

    fn bind_renderbuffer(&mut self, renderbuffer: Option<RenderbufferId>) {
        self.bound_renderbuffer = renderbuffer;
        self.calls.push(Call::BindRenderbuffer(renderbuffer));
    }

    fn renderbuffer_storage(&mut self, format: DepthFormat, width: i32, height: i32) {
        assert!(
            self.bound_renderbuffer.is_some(),
            "glRenderbufferStorage with no renderbuffer bound"
        );
        self.calls.push(Call::RenderbufferStorage(format, width, height));
    }

    fn framebuffer_renderbuffer(
        &mut self,
        target: FramebufferTarget,
        attachment: Attachment,
        renderbuffer: RenderbufferId,
    ) {
        let framebuffer = self.require_bound(target, "glFramebufferRenderbuffer");
        self.attachments.entry(framebuffer).or_default().insert(attachment);
        self.calls.push(Call::FramebufferRenderbuffer(attachment, renderbuffer));
    }

    fn check_framebuffer_status(&mut self, target: FramebufferTarget) -> FramebufferStatus {
        let framebuffer = self.require_bound(target, "glCheckFramebufferStatus");
        self.calls.push(Call::CheckStatus);
        self.status_of(framebuffer)
    }

    fn blit_framebuffer(&mut self, src: Rect, dst: Rect, filter: Filter) {
        self.calls.push(Call::Blit {
            read: self.read_framebuffer,
            draw: self.draw_framebuffer,
            src,
            dst,
            filter,
        });
    }

    fn create_named_framebuffer(&mut self) -> Result<FramebufferId, RenderError> {
        let framebuffer = FramebufferId(self.name());
        self.live_framebuffers.insert(framebuffer);
        self.framebuffer_objects.insert(framebuffer);
        self.calls.push(Call::CreateNamedFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn named_framebuffer_texture(
        &mut self,
        framebuffer: FramebufferId,
        attachment: Attachment,
        texture: TextureId,
        _level: i32,
    ) {
        self.require_object(framebuffer, "glNamedFramebufferTexture");
        self.attachments.entry(framebuffer).or_default().insert(attachment);
        self.calls
            .push(Call::NamedFramebufferTexture(framebuffer, attachment, texture));
    }

    fn check_named_framebuffer_status(
        &mut self,
        framebuffer: FramebufferId,
    ) -> FramebufferStatus {
        self.require_object(framebuffer, "glCheckNamedFramebufferStatus");
        self.calls.push(Call::CheckStatus);
        self.status_of(framebuffer)
    }

    fn blit_named_framebuffer(
        &mut self,
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        filter: Filter,
    ) {
        self.calls.push(Call::NamedBlit {
            read,
            draw,
            src,
            dst,
            filter,
        });
    }

    fn create_named_renderbuffer(&mut self) -> Result<RenderbufferId, RenderError> {
        let renderbuffer = RenderbufferId(self.name());
        self.live_renderbuffers.insert(renderbuffer);
        self.calls.push(Call::CreateNamedRenderbuffer(renderbuffer));
        Ok(renderbuffer)
    }

    fn named_renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferId,
        format: DepthFormat,
        width: i32,
        height: i32,
    ) {
        self.calls
            .push(Call::NamedRenderbufferStorage(renderbuffer, format, width, height));
    }

    fn named_framebuffer_renderbuffer(
        &mut self,
        framebuffer: FramebufferId,
        attachment: Attachment,
        renderbuffer: RenderbufferId,
    ) {
        self.require_object(framebuffer, "glNamedFramebufferRenderbuffer");
        self.attachments.entry(framebuffer).or_default().insert(attachment);
        self.calls.push(Call::NamedFramebufferRenderbuffer(
            framebuffer,
            attachment,
            renderbuffer,
        ));
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.pipeline.depth_test = enabled;
        self.calls.push(Call::State);
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.pipeline.depth_write = enabled;
        self.calls.push(Call::State);
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        self.pipeline.depth_func = func;
        self.calls.push(Call::State);
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.pipeline.cull = mode;
        self.calls.push(Call::State);
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        self.pipeline.blend_enabled = enabled;
        self.calls.push(Call::State);
    }

    fn set_blend_func(&mut self, func: BlendFunc) {
        self.pipeline.blend_func = func;
        self.calls.push(Call::State);
    }

    fn set_texture_unit(&mut self, unit: u32, enabled: bool, mode: TexEnvMode) {
        self.pipeline.texture_units[unit as usize] = TextureUnitState { enabled, mode };
        self.calls.push(Call::State);
    }

    fn set_line_width(&mut self, width: f32) {
        self.pipeline.line_width = width;
        self.calls.push(Call::State);
    }

    fn set_polygon_offset(&mut self, offset: PolygonOffset) {
        self.pipeline.polygon_offset = offset;
        self.calls.push(Call::State);
    }

    fn bind_vertex_layout(&mut self, layout: VertexLayout) {
        self.pipeline.layout = layout;
        self.calls.push(Call::BindVertexLayout(layout));
    }

    fn viewport(&mut self, rect: Rect) {
        self.calls.push(Call::Viewport(rect));
    }

    fn clear(&mut self, _color: [f32; 4], _depth: bool) {
        self.calls.push(Call::Clear);
    }

    fn set_sprite_transform(&mut self, _matrix: &[f32; 16]) {
        self.calls.push(Call::SpriteTransform);
    }

    fn upload_vertices(&mut self, vertices: &[SpriteVertex]) {
        self.uploaded_vertices = vertices.to_vec();
        self.calls.push(Call::UploadVertices(vertices.len()));
    }

    fn upload_indices(&mut self, indices: &[u16]) {
        self.calls.push(Call::UploadIndices(indices.len()));
    }

    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32) {
        self.calls.push(Call::DrawArrays(mode, first, count));
    }

    fn multi_draw_arrays(&mut self, mode: Primitive, firsts: &[i32], counts: &[i32]) {
        assert_eq!(firsts.len(), counts.len());
        self.calls
            .push(Call::MultiDrawArrays(mode, firsts.to_vec(), counts.to_vec()));
    }

    fn multi_draw_elements_base_vertex(
        &mut self,
        mode: Primitive,
        counts: &[i32],
        index_offsets: &[i32],
        base_vertices: &[i32],
    ) {
        assert_eq!(counts.len(), index_offsets.len());
        assert_eq!(counts.len(), base_vertices.len());
        self.calls.push(Call::MultiDrawElementsBaseVertex(
            mode,
            counts.to_vec(),
            index_offsets.to_vec(),
            base_vertices.to_vec(),
        ));
    }

    fn immediate_draw(&mut self, mode: Primitive, vertices: &[SpriteVertex]) {
        self.calls.push(Call::ImmediateDraw(mode, vertices.len()));
    }

    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramId, RenderError> {
        assert!(vertex_src.starts_with("#version"));
        assert!(fragment_src.starts_with("#version"));
        if self.fail_shaders {
            return Err(RenderError::Shader("forced failure".into()));
        }
        let program = ProgramId(self.name());
        self.live_programs.insert(program);
        self.calls.push(Call::CompileProgram(program));
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        assert!(self.live_programs.remove(&program));
        self.calls.push(Call::DeleteProgram(program));
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.calls.push(Call::UseProgram(program));
    }

    fn uniform_i32(&mut self, program: ProgramId, name: &str, _value: i32) {
        self.calls.push(Call::Uniform(program, name.to_string()));
    }

    fn uniform_f32(&mut self, program: ProgramId, name: &str, _value: f32) {
        self.calls.push(Call::Uniform(program, name.to_string()));
    }

    fn finish(&mut self) {
        self.calls.push(Call::Finish);
    }
}
