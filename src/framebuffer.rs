//! Off-screen framebuffer slots.
//!
//! The renderer uses a fixed handful of framebuffers, each identified by a
//! [`FramebufferSlot`]. A slot is either absent or complete: construction
//! happens inside [`FramebufferManager::create`] and anything that fails
//! half way is torn down before returning. Resizing is delete-then-create.

use log::{debug, warn};

use crate::caps::{Capabilities, FramebufferFunctions};
use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::texture::{TextureManager, TextureRef};
use crate::types::{
    Attachment, ColorFormat, DepthFormat, Filter, FramebufferId, FramebufferStatus,
    FramebufferTarget, Rect, RenderbufferId, TextureDesc, Viewport,
};

/// Logical framebuffer identities.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FramebufferSlot {
    /// The default framebuffer (the screen). Never created or deleted.
    None,
    /// Target for the 3D scene.
    Standard,
    /// Target for the 2D overlay.
    Hud,
}

impl FramebufferSlot {
    const COUNT: usize = 3;

    /// Every slot, in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::None, Self::Standard, Self::Hud];

    fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::Standard => 1,
            Self::Hud => 2,
        }
    }

    /// Whether the slot gets a depth renderbuffer.
    #[must_use]
    pub fn needs_depth(self) -> bool {
        self == Self::Standard
    }

    fn label(self) -> &'static str {
        match self {
            Self::None => "screen",
            Self::Standard => "standard",
            Self::Hud => "hud",
        }
    }
}

/// Settings read at creation time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FramebufferSettings {
    /// Half-float color targets.
    pub hdr: bool,
    /// Configured depth format, see [`choose_depth_format`].
    pub depth_format: u8,
    /// Reversed depth with clip control is in effect.
    pub reversed_depth: bool,
}

/// Pick the depth renderbuffer format.
///
/// | configured | result                                              |
/// |------------|-----------------------------------------------------|
/// | `1`        | 16-bit                                              |
/// | `2`        | 24-bit                                              |
/// | `3`        | 32-bit                                              |
/// | `4`        | 32-bit float                                        |
/// | other      | best: 32-bit float with reversed depth, else 32-bit |
///
/// A float result is demoted to 32-bit fixed when the driver cannot store
/// float depth.
#[must_use]
pub fn choose_depth_format(configured: u8, reversed_depth: bool, depth32f: bool) -> DepthFormat {
    let wanted = match configured {
        1 => DepthFormat::Depth16,
        2 => DepthFormat::Depth24,
        3 => DepthFormat::Depth32,
        4 => DepthFormat::Depth32F,
        _ if reversed_depth => DepthFormat::Depth32F,
        _ => DepthFormat::Depth32,
    };
    if wanted == DepthFormat::Depth32F && !depth32f {
        DepthFormat::Depth32
    } else {
        wanted
    }
}

/// Pick the color texture format.
#[must_use]
pub fn choose_color_format(hdr: bool, slot: FramebufferSlot) -> ColorFormat {
    if hdr {
        ColorFormat::Rgb16F
    } else if slot == FramebufferSlot::Standard {
        ColorFormat::Rgb8
    } else {
        ColorFormat::Rgba8
    }
}

/// One framebuffer's resources. All-zero means absent.
#[derive(Clone, Debug, Default, PartialEq)]
struct SlotData {
    handle: Option<FramebufferId>,
    color: Vec<TextureRef>,
    depth: Option<(RenderbufferId, DepthFormat)>,
    width: u32,
    height: u32,
    status: Option<FramebufferStatus>,
}

/// Resources allocated while a slot is being built.
#[derive(Default)]
struct Partial {
    handle: Option<FramebufferId>,
    color: Option<TextureRef>,
    depth: Option<RenderbufferId>,
}

impl Partial {
    fn release<D: GlDriver>(self, driver: &mut D, textures: &mut TextureManager) {
        if let Some(renderbuffer) = self.depth {
            driver.delete_renderbuffer(renderbuffer);
        }
        if let Some(texture) = self.color {
            textures.delete(driver, texture);
        }
        if let Some(framebuffer) = self.handle {
            driver.delete_framebuffer(framebuffer);
        }
    }
}

/// Owner of every off-screen framebuffer slot.
pub struct FramebufferManager {
    slots: [SlotData; FramebufferSlot::COUNT],
    functions: Option<FramebufferFunctions>,
    depth32f: bool,
}

impl FramebufferManager {
    /// A manager with every slot absent.
    #[must_use]
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            slots: Default::default(),
            functions: caps.framebuffers,
            depth32f: caps.depth32f,
        }
    }

    /// Whether framebuffer objects can be created at all.
    #[must_use]
    pub fn available(&self) -> bool {
        self.functions.is_some()
    }

    /// Whether [`blit_simple`](Self::blit_simple) will do anything.
    #[must_use]
    pub fn can_blit(&self) -> bool {
        self.functions.as_ref().is_some_and(FramebufferFunctions::can_blit)
    }

    /// Build the framebuffer for `slot` at `width`×`height`.
    ///
    /// Returns `false` without touching anything if framebuffers are
    /// unavailable, `slot` is the screen or already live, or a dimension is
    /// zero. Returns `false` after releasing everything it allocated if the
    /// result is incomplete. The screen is bound on return.
    pub fn create<D: GlDriver>(
        &mut self,
        driver: &mut D,
        textures: &mut TextureManager,
        slot: FramebufferSlot,
        width: u32,
        height: u32,
        settings: FramebufferSettings,
    ) -> bool {
        let Some(functions) = self.functions else {
            return false;
        };
        if slot == FramebufferSlot::None || self.is_live(slot) || width == 0 || height == 0 {
            return false;
        }

        let mut partial = Partial::default();
        let result = Self::build(
            &functions,
            driver,
            textures,
            &mut partial,
            slot,
            width,
            height,
            settings,
            self.depth32f,
        );
        driver.bind_framebuffer(FramebufferTarget::Both, None);

        match result {
            Ok((status, depth_format)) if status.is_complete() => {
                let (Some(handle), Some(color)) = (partial.handle, partial.color) else {
                    unreachable!("complete framebuffer without handle or color");
                };
                debug!(
                    "Created {} framebuffer {width}x{height}, depth {depth_format:?}",
                    slot.label()
                );
                self.slots[slot.index()] = SlotData {
                    handle: Some(handle),
                    color: vec![color],
                    depth: partial.depth.zip(depth_format),
                    width,
                    height,
                    status: Some(status),
                };
                true
            }
            Ok((status, _)) => {
                warn!(
                    "{} framebuffer {width}x{height} incomplete: {status:?}",
                    slot.label()
                );
                partial.release(driver, textures);
                false
            }
            Err(err) => {
                warn!("Failed to create {} framebuffer: {err}", slot.label());
                partial.release(driver, textures);
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build<D: GlDriver>(
        functions: &FramebufferFunctions,
        driver: &mut D,
        textures: &mut TextureManager,
        partial: &mut Partial,
        slot: FramebufferSlot,
        width: u32,
        height: u32,
        settings: FramebufferSettings,
        depth32f: bool,
    ) -> Result<(FramebufferStatus, Option<DepthFormat>), RenderError> {
        let desc = TextureDesc::texture_2d(choose_color_format(settings.hdr, slot), width, height);
        let color = textures.create(driver, slot.label(), desc, None)?;
        partial.color = Some(color);
        textures.set_filtering(driver, color, Filter::Linear, Filter::Linear);
        textures.set_wrap_clamp(driver, color);
        let Some(color_id) = textures.id(color) else {
            unreachable!("texture invalid right after creation");
        };

        let framebuffer = functions.create_framebuffer(driver)?;
        partial.handle = Some(framebuffer);
        functions.attach_texture(driver, framebuffer, Attachment::Color(0), color_id, 0);

        let mut depth_format = None;
        if slot.needs_depth() {
            let format =
                choose_depth_format(settings.depth_format, settings.reversed_depth, depth32f);
            let renderbuffer = functions.create_depth_renderbuffer(
                driver,
                format,
                crate::types::gl_size(width),
                crate::types::gl_size(height),
            )?;
            partial.depth = Some(renderbuffer);
            functions.attach_renderbuffer(driver, framebuffer, Attachment::Depth, renderbuffer);
            depth_format = Some(format);
        }

        Ok((functions.check_status(driver, framebuffer), depth_format))
    }

    /// Release everything `slot` owns. No-op for the screen and for absent
    /// slots.
    pub fn delete<D: GlDriver>(
        &mut self,
        driver: &mut D,
        textures: &mut TextureManager,
        slot: FramebufferSlot,
    ) {
        if slot == FramebufferSlot::None || !self.is_live(slot) {
            return;
        }
        let data = std::mem::take(&mut self.slots[slot.index()]);
        if let Some((renderbuffer, _)) = data.depth {
            driver.delete_renderbuffer(renderbuffer);
        }
        for texture in data.color {
            textures.delete(driver, texture);
        }
        if let Some(framebuffer) = data.handle {
            driver.delete_framebuffer(framebuffer);
        }
        debug!("Deleted {} framebuffer", slot.label());
    }

    /// Release every slot.
    pub fn delete_all<D: GlDriver>(&mut self, driver: &mut D, textures: &mut TextureManager) {
        for slot in FramebufferSlot::ALL {
            self.delete(driver, textures, slot);
        }
    }

    /// Release every slot and refuse further creation.
    pub fn disable<D: GlDriver>(&mut self, driver: &mut D, textures: &mut TextureManager) {
        self.delete_all(driver, textures);
        self.functions = None;
        warn!("Framebuffers disabled");
    }

    /// Make sure `slot` is live at exactly `width`×`height`, recreating it if
    /// the size changed.
    pub fn ensure<D: GlDriver>(
        &mut self,
        driver: &mut D,
        textures: &mut TextureManager,
        slot: FramebufferSlot,
        width: u32,
        height: u32,
        settings: FramebufferSettings,
    ) -> bool {
        if self.is_live(slot) {
            if self.dimensions(slot) == Some((width, height)) {
                return true;
            }
            self.delete(driver, textures, slot);
        }
        self.create(driver, textures, slot, width, height, settings)
    }

    /// Bind `slot` as the draw target. The screen slot binds the default
    /// framebuffer; an absent slot is ignored.
    pub fn start_using<D: GlDriver>(&self, driver: &mut D, slot: FramebufferSlot) {
        if slot == FramebufferSlot::None {
            self.start_using_screen(driver);
        } else if let Some(handle) = self.slots[slot.index()].handle {
            driver.bind_framebuffer(FramebufferTarget::Both, Some(handle));
        }
    }

    /// Bind the screen as the draw target.
    pub fn start_using_screen<D: GlDriver>(&self, driver: &mut D) {
        driver.bind_framebuffer(FramebufferTarget::Both, None);
    }

    /// Color attachment `attachment` of `slot`, if live.
    #[must_use]
    pub fn texture_reference(&self, slot: FramebufferSlot, attachment: usize) -> Option<TextureRef> {
        self.slots[slot.index()].color.get(attachment).copied()
    }

    /// Copy color from `source` to `dest`; either may be the screen.
    ///
    /// Filtering is nearest when the rectangles match exactly and linear
    /// otherwise. Does nothing if blitting is unsupported or a non-screen
    /// slot is absent.
    pub fn blit_simple<D: GlDriver>(
        &self,
        driver: &mut D,
        source: FramebufferSlot,
        dest: FramebufferSlot,
        screen: Viewport,
    ) {
        let Some(functions) = self.functions.filter(FramebufferFunctions::can_blit) else {
            return;
        };
        let (Some(src_size), Some(dst_size)) =
            (self.extent(source, screen), self.extent(dest, screen))
        else {
            return;
        };
        let filter = if src_size == dst_size {
            Filter::Nearest
        } else {
            Filter::Linear
        };
        functions.blit(
            driver,
            self.handle(source),
            self.handle(dest),
            Rect::sized(src_size.0, src_size.1),
            Rect::sized(dst_size.0, dst_size.1),
            filter,
        );
    }

    /// Whether `slot` currently holds a complete framebuffer.
    #[must_use]
    pub fn is_live(&self, slot: FramebufferSlot) -> bool {
        self.slots[slot.index()].handle.is_some()
    }

    /// Size of a live slot.
    #[must_use]
    pub fn dimensions(&self, slot: FramebufferSlot) -> Option<(u32, u32)> {
        let data = &self.slots[slot.index()];
        data.handle.map(|_| (data.width, data.height))
    }

    /// Depth format of a live slot with depth.
    #[must_use]
    pub fn depth_format(&self, slot: FramebufferSlot) -> Option<DepthFormat> {
        self.slots[slot.index()].depth.map(|(_, format)| format)
    }

    /// Completeness recorded at creation.
    #[must_use]
    pub fn status(&self, slot: FramebufferSlot) -> Option<FramebufferStatus> {
        self.slots[slot.index()].status
    }

    fn handle(&self, slot: FramebufferSlot) -> Option<FramebufferId> {
        self.slots[slot.index()].handle
    }

    fn extent(&self, slot: FramebufferSlot, screen: Viewport) -> Option<(u32, u32)> {
        if slot == FramebufferSlot::None {
            Some((screen.width, screen.height))
        } else {
            self.dimensions(slot)
        }
    }

    #[cfg(test)]
    fn is_zeroed(&self, slot: FramebufferSlot) -> bool {
        self.slots[slot.index()] == SlotData::default()
    }
}
