//! Final-image composition.
//!
//! Per frame the compositor moves through three phases. `screen_draw_start`
//! binds the 3D target, `switch_to_2d` moves to the 2D target (or the
//! screen), and `post_process_screen` merges whatever was drawn off-screen
//! onto the screen, either with a blit or with a full-screen shader pass.

use std::collections::HashMap;

use bitflags::bitflags;
use log::{debug, warn};

use crate::caps::Capabilities;
use crate::config::{FramebufferMode, RendererConfig};
use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::framebuffer::{FramebufferManager, FramebufferSettings, FramebufferSlot};
use crate::shaders::post_process_sources;
use crate::state::{StateHandle, StateRegistry};
use crate::texture::TextureManager;
use crate::types::{BlendFunc, CullMode, Filter, Primitive, ProgramId, Rect, VertexLayout, Viewport};

bitflags! {
    /// Features of a composite shader variant.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct PostProcessFlags: u32 {
        /// Sample the 3D scene target.
        const SAMPLE_3D = 1;
        /// Sample the 2D overlay target.
        const SAMPLE_2D = 2;
        /// Apply gamma and contrast.
        const PALETTE = 4;
        /// Tone-map the scene.
        const TONEMAP = 8;
    }
}

/// Where the compositor is within the frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompositorPhase {
    /// Between frames.
    Idle,
    /// 3D drawing, off-screen or to the screen.
    SceneTargetBound,
    /// 2D drawing, up to the final composite.
    ScreenCompositing,
}

/// A 256-entry color ramp for the display hardware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GammaRamp(pub [u16; 256]);

impl GammaRamp {
    /// Whether the ramp maps every value to itself.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == build_gamma_ramp(1.0, 1.0)
    }
}

/// Build the ramp applying `gamma` then `contrast`, matching the composite
/// shader's palette step.
#[must_use]
pub fn build_gamma_ramp(gamma: f32, contrast: f32) -> GammaRamp {
    let gamma = if gamma > 0.0 { gamma } else { 1.0 };
    let mut ramp = [0u16; 256];
    for (i, entry) in (0u8..=255).zip(ramp.iter_mut()) {
        let value = (f32::from(i) / 255.0).powf(1.0 / gamma) * contrast;
        // Clamped to [0, 65535] before the cast.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
        *entry = scaled;
    }
    GammaRamp(ramp)
}

/// How the off-screen targets reached the screen this frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompositePass {
    /// Everything was drawn straight to the screen.
    Direct,
    /// The 3D target was copied with a framebuffer blit.
    Blit,
    /// A composite shader pass ran with these flags.
    Shader(PostProcessFlags),
    /// Off-screen drawing happened but no path could put it on the screen.
    Dropped,
}

/// What [`Compositor::post_process_screen`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeOutcome {
    /// The composite, whether it ran at the switch to 2D or at the end.
    pub pass: CompositePass,
    /// A ramp the caller must load into the display hardware. Set only when
    /// it differs from the last one handed out.
    pub ramp: Option<GammaRamp>,
}

impl CompositeOutcome {
    /// Whether the palette was applied by the composite shader.
    #[must_use]
    pub fn palette_in_shader(&self) -> bool {
        matches!(self.pass, CompositePass::Shader(flags) if flags.contains(PostProcessFlags::PALETTE))
    }
}

/// Frame-scoped collaborators the compositor works through.
pub struct Targets<'a, D> {
    /// Driver every call goes to.
    pub driver: &'a mut D,
    /// Registry holding the composite states.
    pub states: &'a mut StateRegistry,
    /// Owner of the off-screen slots.
    pub framebuffers: &'a mut FramebufferManager,
    /// Owner of the slots' color textures.
    pub textures: &'a mut TextureManager,
}

/// Routes 3D and 2D drawing to off-screen targets and merges them.
pub struct Compositor {
    phase: CompositorPhase,
    scene_active: bool,
    hud_active: bool,
    pass: CompositePass,
    settings: Option<FramebufferSettings>,
    programs: HashMap<PostProcessFlags, Option<ProgramId>>,
    opaque_state: StateHandle,
    overlay_state: StateHandle,
    programmable: bool,
    clip_control: bool,
    hardware_ramp: Option<GammaRamp>,
}

impl Compositor {
    /// Register the composite render states.
    ///
    /// # Errors
    ///
    /// Fails if the registry is sealed or already holds the states.
    pub fn new(caps: &Capabilities, states: &mut StateRegistry) -> Result<Self, RenderError> {
        let opaque_state = states.register("postprocess", None, |state| {
            state.depth_test = false;
            state.depth_write = false;
            state.cull = CullMode::Disabled;
            state.blend = None;
            state.vertex_layout = VertexLayout::Fullscreen;
        })?;
        let overlay_state = states.register("postprocess.overlay", Some(opaque_state), |state| {
            state.blend = Some(BlendFunc::PREMULTIPLIED);
        })?;
        Ok(Self {
            phase: CompositorPhase::Idle,
            scene_active: false,
            hud_active: false,
            pass: CompositePass::Direct,
            settings: None,
            programs: HashMap::new(),
            opaque_state,
            overlay_state,
            programmable: caps.programmable,
            clip_control: caps.clip_control,
            hardware_ramp: None,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CompositorPhase {
        self.phase
    }

    /// Whether 3D drawing goes to the off-screen scene target this frame.
    #[must_use]
    pub fn is_3d_active(&self) -> bool {
        self.scene_active
    }

    /// Whether 2D drawing goes to the off-screen overlay target this frame.
    #[must_use]
    pub fn is_2d_active(&self) -> bool {
        self.hud_active
    }

    /// Size of the 3D target for a window of `screen`.
    #[must_use]
    pub fn scene_size(config: &RendererConfig, screen: Viewport) -> (u32, u32) {
        let scale = config.effective_render_scale();
        let scaled = |extent: u32| {
            // Scale is at most 4, so the product fits comfortably.
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let value = (extent as f32 * scale).round() as u32;
            value.max(1)
        };
        (scaled(screen.width), scaled(screen.height))
    }

    fn framebuffer_settings(&self, config: &RendererConfig) -> FramebufferSettings {
        FramebufferSettings {
            hdr: config.hdr,
            depth_format: config.depth_format,
            reversed_depth: config.reversed_depth && self.clip_control,
        }
    }

    /// Begin the frame: bind the 3D target when post-processing is on,
    /// creating or resizing it as needed, otherwise the screen.
    ///
    /// Returns whether an off-screen target is bound.
    pub fn screen_draw_start<D: GlDriver>(
        &mut self,
        targets: &mut Targets<'_, D>,
        config: &RendererConfig,
        screen: Viewport,
    ) -> bool {
        if self.phase != CompositorPhase::Idle {
            warn!("Frame started in {:?}, previous frame was not composited", self.phase);
        }
        self.phase = CompositorPhase::SceneTargetBound;
        self.scene_active = false;
        self.hud_active = false;
        self.pass = CompositePass::Direct;

        // Format changes rebuild both targets at the next ensure.
        let settings = self.framebuffer_settings(config);
        if self.settings.is_some_and(|previous| previous != settings) {
            debug!("Framebuffer settings changed, recreating targets");
            targets
                .framebuffers
                .delete_all(targets.driver, targets.textures);
        }
        self.settings = Some(settings);

        // Without shaders the scene can only reach the screen by blit.
        let composable = self.programmable || targets.framebuffers.can_blit();
        if config.framebuffers != FramebufferMode::Off
            && targets.framebuffers.available()
            && composable
        {
            let (width, height) = Self::scene_size(config, screen);
            if targets.framebuffers.ensure(
                targets.driver,
                targets.textures,
                FramebufferSlot::Standard,
                width,
                height,
                settings,
            ) {
                targets
                    .framebuffers
                    .start_using(targets.driver, FramebufferSlot::Standard);
                targets.driver.viewport(Rect::sized(width, height));
                self.scene_active = true;
                return true;
            }
        }

        targets.framebuffers.start_using_screen(targets.driver);
        targets
            .driver
            .viewport(Rect::sized(screen.width, screen.height));
        false
    }

    /// Move from 3D to 2D drawing.
    ///
    /// Returns `true` when the 2D target is bound; the caller must then
    /// clear it and set its viewport. Returns `false` after binding the
    /// screen and restoring the window viewport. The 2D target is only used
    /// in full mode with a programmable pipeline, since only the shader can
    /// blend it over the scene. Otherwise the 3D target is composited onto
    /// the screen first.
    pub fn switch_to_2d<D: GlDriver>(
        &mut self,
        targets: &mut Targets<'_, D>,
        config: &RendererConfig,
        screen: Viewport,
    ) -> bool {
        self.phase = CompositorPhase::ScreenCompositing;

        if config.framebuffers == FramebufferMode::Full
            && self.programmable
            && targets.framebuffers.available()
        {
            let settings = self.framebuffer_settings(config);
            if targets.framebuffers.ensure(
                targets.driver,
                targets.textures,
                FramebufferSlot::Hud,
                screen.width,
                screen.height,
                settings,
            ) {
                targets
                    .framebuffers
                    .start_using(targets.driver, FramebufferSlot::Hud);
                self.hud_active = true;
                return true;
            }
        }

        if self.scene_active {
            self.composite(targets, config, screen);
            self.scene_active = false;
        }

        targets.framebuffers.start_using_screen(targets.driver);
        targets
            .driver
            .viewport(Rect::sized(screen.width, screen.height));
        false
    }

    /// Finish the frame: merge the off-screen targets onto the screen.
    ///
    /// Whenever the composite did not apply gamma and contrast itself, they
    /// go to the display hardware ramp instead. While the shader applies
    /// them, a previously loaded ramp is reset to identity so the palette is
    /// not applied twice.
    pub fn post_process_screen<D: GlDriver>(
        &mut self,
        targets: &mut Targets<'_, D>,
        config: &RendererConfig,
        screen: Viewport,
    ) -> CompositeOutcome {
        if self.scene_active || self.hud_active {
            self.composite(targets, config, screen);
        }
        let mut outcome = CompositeOutcome {
            pass: self.pass,
            ramp: None,
        };
        let wanted = if outcome.palette_in_shader() {
            build_gamma_ramp(1.0, 1.0)
        } else {
            build_gamma_ramp(config.gamma, config.contrast)
        };
        outcome.ramp = self.update_hardware_ramp(wanted);

        self.phase = CompositorPhase::Idle;
        self.scene_active = false;
        self.hud_active = false;
        self.pass = CompositePass::Direct;
        outcome
    }

    /// `Some(wanted)` when it differs from the loaded ramp.
    fn update_hardware_ramp(&mut self, wanted: GammaRamp) -> Option<GammaRamp> {
        let current = match &self.hardware_ramp {
            Some(loaded) => *loaded == wanted,
            None => wanted.is_identity(),
        };
        if current {
            return None;
        }
        self.hardware_ramp = Some(wanted.clone());
        Some(wanted)
    }

    fn composite<D: GlDriver>(
        &mut self,
        targets: &mut Targets<'_, D>,
        config: &RendererConfig,
        screen: Viewport,
    ) {
        self.pass = self.composite_pass(targets, config, screen);
    }

    fn composite_pass<D: GlDriver>(
        &mut self,
        targets: &mut Targets<'_, D>,
        config: &RendererConfig,
        screen: Viewport,
    ) -> CompositePass {
        let mut flags = PostProcessFlags::empty();
        flags.set(PostProcessFlags::SAMPLE_3D, self.scene_active);
        flags.set(PostProcessFlags::SAMPLE_2D, self.hud_active);
        flags.set(PostProcessFlags::PALETTE, config.wants_palette());
        flags.set(
            PostProcessFlags::TONEMAP,
            config.tonemap && self.scene_active,
        );

        targets.framebuffers.start_using_screen(targets.driver);
        targets
            .driver
            .viewport(Rect::sized(screen.width, screen.height));

        // Only the scene target may be blitted; a lone overlay would wipe
        // the 3D image already on the screen.
        let blittable = flags == PostProcessFlags::SAMPLE_3D && targets.framebuffers.can_blit();
        if blittable && (config.prefer_blit || !self.programmable) {
            return self.blit_scene(targets, screen);
        }

        let Some(program) = self.program(targets.driver, flags) else {
            // The blit loses the effects; the palette moves to the hardware
            // ramp and tone mapping is skipped.
            if self.scene_active && targets.framebuffers.can_blit() {
                if self.hud_active {
                    warn!("No composite program for {flags:?}, 2D overlay dropped");
                }
                return self.blit_scene(targets, screen);
            }
            warn!("No composite path for {flags:?}, off-screen image dropped");
            return CompositePass::Dropped;
        };

        let state = if flags.contains(PostProcessFlags::SAMPLE_3D) {
            self.opaque_state
        } else {
            self.overlay_state
        };
        targets.states.apply(targets.driver, state);
        targets.driver.use_program(Some(program));

        for (flag, slot, unit, uniform) in [
            (PostProcessFlags::SAMPLE_3D, FramebufferSlot::Standard, 0u8, "u_scene"),
            (PostProcessFlags::SAMPLE_2D, FramebufferSlot::Hud, 1u8, "u_hud"),
        ] {
            if !flags.contains(flag) {
                continue;
            }
            let Some(texture) = targets.framebuffers.texture_reference(slot, 0) else {
                continue;
            };
            let filter = if targets.framebuffers.dimensions(slot)
                == Some((screen.width, screen.height))
            {
                Filter::Nearest
            } else {
                Filter::Linear
            };
            targets
                .textures
                .set_filtering(targets.driver, texture, filter, filter);
            targets
                .textures
                .bind_to_unit(targets.driver, u32::from(unit), Some(texture));
            targets
                .driver
                .uniform_i32(program, uniform, i32::from(unit));
        }
        if flags.contains(PostProcessFlags::PALETTE) {
            targets.driver.uniform_f32(program, "u_gamma", config.gamma);
            targets
                .driver
                .uniform_f32(program, "u_contrast", config.contrast);
        }

        targets.driver.draw_arrays(Primitive::TriangleStrip, 0, 4);
        targets.driver.use_program(None);
        CompositePass::Shader(flags)
    }

    fn blit_scene<D: GlDriver>(
        &self,
        targets: &mut Targets<'_, D>,
        screen: Viewport,
    ) -> CompositePass {
        targets.framebuffers.blit_simple(
            targets.driver,
            FramebufferSlot::Standard,
            FramebufferSlot::None,
            screen,
        );
        targets.framebuffers.start_using_screen(targets.driver);
        CompositePass::Blit
    }

    /// The program for `flags`, compiled on first use. A failed compile is
    /// remembered so it is not retried every frame.
    fn program<D: GlDriver>(&mut self, driver: &mut D, flags: PostProcessFlags) -> Option<ProgramId> {
        if !self.programmable {
            return None;
        }
        *self.programs.entry(flags).or_insert_with(|| {
            let (vertex, fragment) = post_process_sources(flags);
            match driver.compile_program(vertex, &fragment) {
                Ok(program) => {
                    debug!("Compiled composite program {flags:?}");
                    Some(program)
                }
                Err(err) => {
                    warn!("Composite program {flags:?} failed: {err}");
                    None
                }
            }
        })
    }

    /// Forget the frame in progress, e.g. after framebuffers were disabled.
    pub fn reset(&mut self) {
        self.phase = CompositorPhase::Idle;
        self.scene_active = false;
        self.hud_active = false;
        self.pass = CompositePass::Direct;
    }

    /// Delete every compiled program.
    pub fn destroy<D: GlDriver>(&mut self, driver: &mut D) {
        for program in self.programs.drain().filter_map(|(_, program)| program) {
            driver.delete_program(program);
        }
        self.reset();
    }
}
