//! The renderer context: every subsystem and the driver, owned together.
//!
//! A frame runs [`Renderer::begin_frame`], 3D drawing,
//! [`Renderer::switch_to_2d`], 2D drawing, then [`Renderer::end_frame`].
//! Sprite batches are flushed at both transitions so each lands in the
//! target it was reserved for.

use log::{info, warn};

use crate::caps::Capabilities;
use crate::compositor::{CompositeOutcome, Compositor, Targets};
use crate::config::{BackendPreference, RendererConfig};
use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::framebuffer::{FramebufferManager, FramebufferSettings, FramebufferSlot};
use crate::sprite::{BatchCategory, BatchDesc, DispatchMode, FlushStats, SpriteBatcher};
use crate::state::{StateHandle, StateRegistry};
use crate::texture::{TextureManager, TextureRef};
use crate::types::{BlendFunc, Primitive, Rect, SpriteVertex, Viewport};

/// Renderer state for one GL context.
///
/// Several renderers can coexist, each over its own driver.
pub struct Renderer<D: GlDriver> {
    driver: D,
    caps: Capabilities,
    states: StateRegistry,
    textures: TextureManager,
    framebuffers: FramebufferManager,
    compositor: Compositor,
    sprites: SpriteBatcher,
    screen: Viewport,
}

fn dispatch_mode(config: &RendererConfig, caps: &Capabilities) -> DispatchMode {
    match config.backend {
        BackendPreference::Legacy => DispatchMode::Immediate,
        BackendPreference::Auto if !caps.programmable => DispatchMode::Immediate,
        BackendPreference::Modern if !caps.programmable => {
            warn!("Modern backend requested without shader support, using legacy draws");
            DispatchMode::Immediate
        }
        BackendPreference::Auto | BackendPreference::Modern => DispatchMode::Buffered,
    }
}

fn default_batches() -> [(BatchCategory, BatchDesc); 6] {
    [
        (
            BatchCategory::Sprites,
            BatchDesc::billboards(BlendFunc::ALPHA, None),
        ),
        (
            BatchCategory::Particles,
            BatchDesc::billboards(BlendFunc::ADDITIVE, None),
        ),
        (
            BatchCategory::Sparks,
            BatchDesc {
                primitive: Primitive::TriangleFan,
                ..BatchDesc::billboards(BlendFunc::ADDITIVE, None)
            },
        ),
        (
            BatchCategory::Flashes,
            BatchDesc {
                primitive: Primitive::Triangles,
                ..BatchDesc::billboards(BlendFunc::ADDITIVE, None)
            },
        ),
        (
            BatchCategory::Coronas,
            BatchDesc {
                depth_test: false,
                ..BatchDesc::billboards(BlendFunc::ONE_ONE, None)
            },
        ),
        (
            BatchCategory::Images,
            BatchDesc {
                depth_test: false,
                ..BatchDesc::billboards(BlendFunc::ALPHA, None)
            },
        ),
    ]
}

impl<D: GlDriver> Renderer<D> {
    /// Probe `driver` and build every subsystem with the built-in render
    /// states only.
    ///
    /// # Errors
    ///
    /// Fails if the built-in states cannot be registered.
    pub fn new(driver: D, config: &RendererConfig) -> Result<Self, RenderError> {
        Self::with_states(driver, config, |_| Ok(()))
    }

    /// Like [`new`](Self::new), letting `register` add render states before
    /// the registry is sealed.
    ///
    /// # Errors
    ///
    /// Fails if any registration fails, including those made by `register`.
    pub fn with_states(
        driver: D,
        config: &RendererConfig,
        register: impl FnOnce(&mut StateRegistry) -> Result<(), RenderError>,
    ) -> Result<Self, RenderError> {
        let info = driver.driver_info();
        info!(
            "GL {}.{}{}: {} / {}",
            info.version.major,
            info.version.minor,
            if info.embedded { " ES" } else { "" },
            info.vendor,
            info.renderer
        );
        let caps = Capabilities::resolve(&info);

        if config.reversed_depth && !caps.clip_control {
            warn!("Reversed depth requested without clip control, using standard depth");
        }
        let mut states = StateRegistry::new(config.reversed_depth && caps.clip_control);

        let mode = dispatch_mode(config, &caps);
        info!("Sprite dispatch: {mode:?}");
        let mut sprites = SpriteBatcher::new(&caps, mode);
        for (category, desc) in default_batches() {
            sprites.initialize_batch(&mut states, category, desc)?;
        }

        let compositor = Compositor::new(&caps, &mut states)?;
        register(&mut states)?;
        states.seal();

        Ok(Self {
            framebuffers: FramebufferManager::new(&caps),
            textures: TextureManager::new(),
            driver,
            caps,
            states,
            compositor,
            sprites,
            screen: Viewport::new(0, 0),
        })
    }

    /// Start a frame for a window of `screen`.
    ///
    /// Binds the off-screen 3D target when post-processing is on and it can
    /// be created, otherwise the screen, then clears it. Returns whether the
    /// off-screen target is in use.
    pub fn begin_frame(&mut self, config: &RendererConfig, screen: Viewport) -> bool {
        self.screen = screen;
        self.sprites.reset();
        let offscreen = self.compositor.screen_draw_start(
            &mut Targets {
                driver: &mut self.driver,
                states: &mut self.states,
                framebuffers: &mut self.framebuffers,
                textures: &mut self.textures,
            },
            config,
            screen,
        );
        self.driver.clear([0.0, 0.0, 0.0, 1.0], true);
        offscreen
    }

    /// Flush 3D sprites and move to 2D drawing.
    ///
    /// Returns whether 2D goes to its own off-screen target, which is then
    /// cleared to transparent.
    pub fn switch_to_2d(&mut self, config: &RendererConfig) -> bool {
        self.flush_sprites();
        let screen = self.screen;
        let hud = self.compositor.switch_to_2d(
            &mut Targets {
                driver: &mut self.driver,
                states: &mut self.states,
                framebuffers: &mut self.framebuffers,
                textures: &mut self.textures,
            },
            config,
            screen,
        );
        if hud {
            self.driver.viewport(Rect::sized(screen.width, screen.height));
            self.driver.clear([0.0; 4], false);
        }
        hud
    }

    /// Flush 2D sprites and composite the frame onto the screen.
    ///
    /// A [`CompositeOutcome::ramp`] must be loaded into the display's gamma
    /// ramp by the caller.
    pub fn end_frame(&mut self, config: &RendererConfig) -> CompositeOutcome {
        self.flush_sprites();
        let screen = self.screen;
        self.compositor.post_process_screen(
            &mut Targets {
                driver: &mut self.driver,
                states: &mut self.states,
                framebuffers: &mut self.framebuffers,
                textures: &mut self.textures,
            },
            config,
            screen,
        )
    }

    /// Reserve sprite vertices; see [`SpriteBatcher::add_entry_specific`].
    pub fn reserve_sprites(
        &mut self,
        category: BatchCategory,
        count: usize,
        texture: Option<TextureRef>,
        layer: u16,
    ) -> Option<&mut [SpriteVertex]> {
        self.sprites
            .add_entry_specific(category, count, texture, layer)
    }

    /// Draw every pending sprite now.
    pub fn flush_sprites(&mut self) -> FlushStats {
        self.sprites
            .flush(&mut self.driver, &mut self.states, &mut self.textures)
    }

    /// Column-major view-projection matrix for the sprite batches.
    pub fn set_sprite_transform(&mut self, matrix: &[f32; 16]) {
        self.driver.set_sprite_transform(matrix);
    }

    /// Apply a registered render state. Returns the driver calls issued.
    pub fn apply_state(&mut self, handle: StateHandle) -> usize {
        self.states.apply(&mut self.driver, handle)
    }

    /// Look up a render state by name.
    #[must_use]
    pub fn find_state(&self, name: &str) -> Option<StateHandle> {
        self.states.find(name)
    }

    /// Every registered state name, for a state dump.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.names()
    }

    /// Create a framebuffer in `slot` with the formats `config` selects.
    ///
    /// Returns `false` if the slot is taken or creation failed.
    pub fn create_framebuffer(
        &mut self,
        slot: FramebufferSlot,
        width: u32,
        height: u32,
        config: &RendererConfig,
    ) -> bool {
        let settings = FramebufferSettings {
            hdr: config.hdr,
            depth_format: config.depth_format,
            reversed_depth: config.reversed_depth && self.caps.clip_control,
        };
        self.framebuffers.create(
            &mut self.driver,
            &mut self.textures,
            slot,
            width,
            height,
            settings,
        )
    }

    /// Decode an image and upload it as a texture.
    ///
    /// # Errors
    ///
    /// See [`TextureManager::load_image`].
    pub fn load_texture(&mut self, name: &str, bytes: &[u8]) -> Result<TextureRef, RenderError> {
        self.textures.load_image(&mut self.driver, name, bytes)
    }

    /// Stop using framebuffers for the rest of the context's life, e.g.
    /// after repeated creation failures. Every slot is released.
    pub fn disable_framebuffers(&mut self) {
        self.framebuffers
            .disable(&mut self.driver, &mut self.textures);
        self.caps.disable_framebuffers();
        self.compositor.reset();
    }

    /// Block until the GPU is idle, for frame timing diagnostics.
    pub fn sync_for_timing(&mut self) {
        self.driver.finish();
    }

    /// Release every GPU object the renderer owns and hand the driver back.
    pub fn shutdown(mut self) -> D {
        self.sprites.reset();
        self.compositor.destroy(&mut self.driver);
        self.framebuffers
            .delete_all(&mut self.driver, &mut self.textures);
        self.textures.delete_all(&mut self.driver);
        info!("Renderer shut down");
        self.driver
    }

    /// The driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The driver, for draws outside the batcher. Call
    /// [`StateRegistry::invalidate`] through [`states_mut`](Self::states_mut)
    /// after changing pipeline state directly.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Resolved driver capabilities.
    #[must_use]
    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// The render-state registry.
    #[must_use]
    pub fn states(&self) -> &StateRegistry {
        &self.states
    }

    /// The registry, e.g. to invalidate its cache.
    pub fn states_mut(&mut self) -> &mut StateRegistry {
        &mut self.states
    }

    /// Textures owned by this renderer.
    #[must_use]
    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    /// Framebuffer slots.
    #[must_use]
    pub fn framebuffers(&self) -> &FramebufferManager {
        &self.framebuffers
    }

    /// Frame compositor, for phase and target queries.
    #[must_use]
    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// The sprite batcher.
    #[must_use]
    pub fn sprites(&self) -> &SpriteBatcher {
        &self.sprites
    }

    /// Window size of the current frame.
    #[must_use]
    pub fn screen(&self) -> Viewport {
        self.screen
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compositor::{CompositePass, CompositorPhase, PostProcessFlags};
    use crate::config::FramebufferMode;
    use crate::recording::{Call, RecordingDriver};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quad(renderer: &mut Renderer<RecordingDriver>, category: BatchCategory) {
        let vertices = renderer.reserve_sprites(category, 4, None, 0).unwrap();
        for (vertex, x) in vertices.iter_mut().zip([0.0, 1.0, 0.0, 1.0]) {
            vertex.color = [255; 4];
            vertex.position[0] = x;
        }
    }

    #[test]
    fn full_frame_composites_both_targets() {
        init_logger();
        let config = RendererConfig::default();
        let mut renderer = Renderer::new(RecordingDriver::modern(), &config).unwrap();
        let screen = Viewport::new(640, 480);

        assert!(renderer.begin_frame(&config, screen));
        assert!(renderer.compositor().is_3d_active());
        quad(&mut renderer, BatchCategory::Sprites);

        assert!(renderer.switch_to_2d(&config));
        assert!(renderer.compositor().is_2d_active());
        assert_eq!(renderer.driver().draw_calls().len(), 1);
        quad(&mut renderer, BatchCategory::Images);

        let outcome = renderer.end_frame(&config);
        assert_eq!(
            outcome,
            CompositeOutcome {
                pass: CompositePass::Shader(PostProcessFlags::SAMPLE_3D | PostProcessFlags::SAMPLE_2D),
                ramp: None,
            }
        );
        assert_eq!(renderer.compositor().phase(), CompositorPhase::Idle);
        // Scene sprites, overlay images, then the composite quad.
        assert_eq!(renderer.driver().draw_calls().len(), 3);
    }

    #[test]
    fn hud_target_is_cleared_at_screen_size() {
        let config = RendererConfig {
            render_scale: 0.5,
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::new(RecordingDriver::modern(), &config).unwrap();
        renderer.begin_frame(&config, Viewport::new(800, 600));
        assert_eq!(
            renderer.framebuffers().dimensions(FramebufferSlot::Standard),
            Some((400, 300))
        );
        renderer.driver_mut().clear_calls();

        assert!(renderer.switch_to_2d(&config));
        let calls = &renderer.driver().calls;
        let viewport = calls.iter().position(|c| *c == Call::Viewport(Rect::sized(800, 600)));
        let clear = calls.iter().rposition(|c| *c == Call::Clear);
        assert!(viewport.unwrap() < clear.unwrap());
    }

    #[test]
    fn legacy_preference_draws_immediately() {
        let config = RendererConfig {
            backend: BackendPreference::Legacy,
            framebuffers: FramebufferMode::Off,
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::new(RecordingDriver::modern(), &config).unwrap();
        assert_eq!(renderer.sprites().mode(), DispatchMode::Immediate);

        assert!(!renderer.begin_frame(&config, Viewport::new(320, 240)));
        quad(&mut renderer, BatchCategory::Particles);
        let stats = renderer.flush_sprites();
        assert_eq!(stats.draw_calls, 1);
        assert!(matches!(
            renderer.driver().draw_calls()[..],
            [Call::ImmediateDraw(Primitive::TriangleStrip, 4)]
        ));
        assert!(!renderer
            .driver()
            .calls
            .iter()
            .any(|c| matches!(c, Call::UploadVertices(_))));
    }

    #[test]
    fn old_drivers_fall_back_to_legacy_dispatch() {
        let config = RendererConfig {
            backend: BackendPreference::Modern,
            ..RendererConfig::default()
        };
        let renderer =
            Renderer::new(RecordingDriver::version(2, 1, &["GL_EXT_framebuffer_object"]), &config)
                .unwrap();
        assert!(!renderer.caps().programmable);
        assert_eq!(renderer.sprites().mode(), DispatchMode::Immediate);
    }

    #[test]
    fn built_in_states_are_registered_and_sealed() {
        let renderer = Renderer::new(RecordingDriver::modern(), &RendererConfig::default()).unwrap();
        let names: Vec<&str> = renderer.state_names().collect();
        assert_eq!(names[0], "default");
        for name in ["sprites.textured", "images.untextured", "postprocess"] {
            assert!(names.contains(&name), "{name} missing");
        }
        assert!(renderer.states().is_sealed());
    }

    #[test]
    fn extra_states_register_before_sealing() {
        let mut renderer = Renderer::with_states(
            RecordingDriver::modern(),
            &RendererConfig::default(),
            |states| {
                states.register("sky", None, |state| state.depth_write = false)?;
                Ok(())
            },
        )
        .unwrap();
        let sky = renderer.find_state("sky").unwrap();
        renderer.states_mut().invalidate();
        assert!(renderer.apply_state(sky) > 0);
        assert!(!renderer.driver().pipeline.depth_write);
        assert_eq!(renderer.apply_state(sky), 0);
    }

    #[test]
    fn duplicate_extra_state_fails_construction() {
        let result = Renderer::with_states(
            RecordingDriver::modern(),
            &RendererConfig::default(),
            |states| states.register("postprocess", None, |_| {}).map(|_| ()),
        );
        assert!(matches!(result, Err(RenderError::DuplicateState(_))));
    }

    #[test]
    fn disabling_framebuffers_releases_slots() {
        let config = RendererConfig {
            gamma: 1.4,
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::new(RecordingDriver::modern(), &config).unwrap();
        renderer.begin_frame(&config, Viewport::new(640, 480));
        renderer.switch_to_2d(&config);
        renderer.disable_framebuffers();
        assert!(renderer.driver().no_leaks());
        assert!(!renderer.caps().has_framebuffers());
        assert_eq!(renderer.compositor().phase(), CompositorPhase::Idle);

        assert!(!renderer.begin_frame(&config, Viewport::new(640, 480)));
        assert!(!renderer.switch_to_2d(&config));
        let outcome = renderer.end_frame(&config);
        assert_eq!(outcome.pass, CompositePass::Direct);
        assert!(outcome.ramp.is_some());
    }

    #[test]
    fn fixed_function_frame_reaches_the_screen() {
        init_logger();
        let config = RendererConfig::default();
        let mut renderer =
            Renderer::new(RecordingDriver::version(2, 1, &["GL_ARB_framebuffer_object"]), &config)
                .unwrap();
        assert!(!renderer.caps().programmable);

        assert!(renderer.begin_frame(&config, Viewport::new(640, 480)));
        quad(&mut renderer, BatchCategory::Sprites);
        assert!(!renderer.switch_to_2d(&config));
        assert!(!renderer.compositor().is_2d_active());
        let blit = renderer
            .driver()
            .calls
            .iter()
            .position(|c| matches!(c, Call::Blit { .. }));
        assert!(blit.is_some());

        // 2D goes straight to the screen, after the scene.
        quad(&mut renderer, BatchCategory::Images);
        let outcome = renderer.end_frame(&config);
        assert_eq!(outcome.pass, CompositePass::Blit);
        let last_draw = renderer.driver().calls.iter().rposition(Call::is_draw);
        assert!(blit < last_draw);
        assert!(renderer
            .framebuffers()
            .dimensions(FramebufferSlot::Hud)
            .is_none());
    }

    #[test]
    fn shutdown_releases_everything() {
        let config = RendererConfig::default();
        let mut renderer = Renderer::new(RecordingDriver::modern(), &config).unwrap();
        renderer.begin_frame(&config, Viewport::new(640, 480));
        renderer.switch_to_2d(&config);
        renderer.end_frame(&config);
        assert!(!renderer.create_framebuffer(FramebufferSlot::None, 16, 16, &config));

        let driver = renderer.shutdown();
        assert!(driver.no_leaks());
        assert!(driver.live_programs.is_empty());
    }

    #[test]
    fn undecodable_texture_is_reported() {
        let mut renderer =
            Renderer::new(RecordingDriver::modern(), &RendererConfig::default()).unwrap();
        let result = renderer.load_texture("gfx/broken.tga", b"not an image");
        assert!(matches!(result, Err(RenderError::ImageDecode { .. })));
        assert_eq!(renderer.textures().live_count(), 0);
    }

    #[test]
    fn timing_sync_finishes_the_pipeline() {
        let mut renderer =
            Renderer::new(RecordingDriver::modern(), &RendererConfig::default()).unwrap();
        renderer.sync_for_timing();
        assert_eq!(renderer.driver().calls.last(), Some(&Call::Finish));
    }
}
