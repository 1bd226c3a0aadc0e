//! Capability resolution.
//!
//! The driver is probed once at startup. Framebuffer support comes in three
//! tiers tried in order (core 3.0, `GL_ARB_framebuffer_object`,
//! `GL_EXT_framebuffer_object`); a tier is only taken when every one of its
//! entry points resolved. Direct state access is probed independently and
//! decided per function, so a driver with named framebuffers but no named
//! renderbuffers mixes both styles. The result is a [`FramebufferFunctions`]
//! table that hides the choice from every caller.

use log::{info, warn};

use crate::driver::{unsupported, DriverInfo, GlDriver};
use crate::error::RenderError;
use crate::types::{
    Attachment, DepthFormat, Filter, FramebufferId, FramebufferStatus, FramebufferTarget, Rect,
    RenderbufferId, TextureId,
};

const CORE_FRAMEBUFFER_ENTRY_POINTS: &[&str] = &[
    "glGenFramebuffers",
    "glDeleteFramebuffers",
    "glBindFramebuffer",
    "glFramebufferTexture2D",
    "glCheckFramebufferStatus",
    "glGenRenderbuffers",
    "glDeleteRenderbuffers",
    "glBindRenderbuffer",
    "glRenderbufferStorage",
    "glFramebufferRenderbuffer",
];

const EXT_FRAMEBUFFER_ENTRY_POINTS: &[&str] = &[
    "glGenFramebuffersEXT",
    "glDeleteFramebuffersEXT",
    "glBindFramebufferEXT",
    "glFramebufferTexture2DEXT",
    "glCheckFramebufferStatusEXT",
    "glGenRenderbuffersEXT",
    "glDeleteRenderbuffersEXT",
    "glBindRenderbufferEXT",
    "glRenderbufferStorageEXT",
    "glFramebufferRenderbufferEXT",
];

/// Which framebuffer-object tier the driver provides.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramebufferTier {
    /// OpenGL 3.0 core.
    Core,
    /// `GL_ARB_framebuffer_object`.
    Arb,
    /// `GL_EXT_framebuffer_object`.
    Ext,
}

/// How a framebuffer operation reaches its object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Addressing {
    /// Operate on the handle directly.
    Named,
    /// Bind to a global binding point first, then operate.
    Bound,
}

/// The resolved framebuffer function table.
///
/// One [`Addressing`] per operation. Methods dispatch on it so callers never
/// look at capabilities again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FramebufferFunctions {
    /// Tier the entry points were taken from.
    pub tier: FramebufferTier,
    /// Framebuffer creation, and with it every later framebuffer call.
    pub create_framebuffer: Addressing,
    /// Texture attachment.
    pub framebuffer_texture: Addressing,
    /// Completeness check.
    pub check_status: Addressing,
    /// Renderbuffer creation.
    pub create_renderbuffer: Addressing,
    /// Renderbuffer storage allocation.
    pub renderbuffer_storage: Addressing,
    /// Renderbuffer attachment.
    pub framebuffer_renderbuffer: Addressing,
    /// `None` when neither blit function is available.
    pub blit: Option<Addressing>,
}

impl FramebufferFunctions {
    /// Allocate a framebuffer object.
    ///
    /// # Errors
    ///
    /// Propagates the driver's allocation failure.
    pub fn create_framebuffer<D: GlDriver>(
        &self,
        driver: &mut D,
    ) -> Result<FramebufferId, RenderError> {
        match self.create_framebuffer {
            Addressing::Named => driver.create_named_framebuffer(),
            Addressing::Bound => {
                let framebuffer = driver.gen_framebuffer()?;
                // A generated name only becomes an object once bound.
                driver.bind_framebuffer(FramebufferTarget::Both, Some(framebuffer));
                Ok(framebuffer)
            }
        }
    }

    /// Attach level `level` of `texture` to `framebuffer`.
    pub fn attach_texture<D: GlDriver>(
        &self,
        driver: &mut D,
        framebuffer: FramebufferId,
        attachment: Attachment,
        texture: TextureId,
        level: i32,
    ) {
        match self.framebuffer_texture {
            Addressing::Named => {
                driver.named_framebuffer_texture(framebuffer, attachment, texture, level);
            }
            Addressing::Bound => {
                driver.bind_framebuffer(FramebufferTarget::Both, Some(framebuffer));
                driver.framebuffer_texture(FramebufferTarget::Both, attachment, texture, level);
            }
        }
    }

    /// Allocate a renderbuffer object with depth storage.
    ///
    /// # Errors
    ///
    /// Propagates the driver's allocation failure.
    pub fn create_depth_renderbuffer<D: GlDriver>(
        &self,
        driver: &mut D,
        format: DepthFormat,
        width: i32,
        height: i32,
    ) -> Result<RenderbufferId, RenderError> {
        let renderbuffer = match self.create_renderbuffer {
            Addressing::Named => driver.create_named_renderbuffer()?,
            Addressing::Bound => driver.gen_renderbuffer()?,
        };
        match self.renderbuffer_storage {
            Addressing::Named => {
                driver.named_renderbuffer_storage(renderbuffer, format, width, height);
            }
            Addressing::Bound => {
                driver.bind_renderbuffer(Some(renderbuffer));
                driver.renderbuffer_storage(format, width, height);
                driver.bind_renderbuffer(None);
            }
        }
        Ok(renderbuffer)
    }

    /// Attach a renderbuffer to `framebuffer`.
    pub fn attach_renderbuffer<D: GlDriver>(
        &self,
        driver: &mut D,
        framebuffer: FramebufferId,
        attachment: Attachment,
        renderbuffer: RenderbufferId,
    ) {
        match self.framebuffer_renderbuffer {
            Addressing::Named => {
                driver.named_framebuffer_renderbuffer(framebuffer, attachment, renderbuffer);
            }
            Addressing::Bound => {
                driver.bind_framebuffer(FramebufferTarget::Both, Some(framebuffer));
                driver.framebuffer_renderbuffer(FramebufferTarget::Both, attachment, renderbuffer);
            }
        }
    }

    /// Completeness of `framebuffer`.
    pub fn check_status<D: GlDriver>(
        &self,
        driver: &mut D,
        framebuffer: FramebufferId,
    ) -> FramebufferStatus {
        match self.check_status {
            Addressing::Named => driver.check_named_framebuffer_status(framebuffer),
            Addressing::Bound => {
                driver.bind_framebuffer(FramebufferTarget::Both, Some(framebuffer));
                driver.check_framebuffer_status(FramebufferTarget::Both)
            }
        }
    }

    /// Copy color from `read` to `draw`, `None` meaning the screen.
    ///
    /// # Panics
    ///
    /// Panics if blitting is unsupported; check [`Self::can_blit`] first.
    pub fn blit<D: GlDriver>(
        &self,
        driver: &mut D,
        read: Option<FramebufferId>,
        draw: Option<FramebufferId>,
        src: Rect,
        dst: Rect,
        filter: Filter,
    ) {
        match self.blit {
            Some(Addressing::Named) => {
                driver.blit_named_framebuffer(read, draw, src, dst, filter);
            }
            Some(Addressing::Bound) => {
                driver.bind_framebuffer(FramebufferTarget::Read, read);
                driver.bind_framebuffer(FramebufferTarget::Draw, draw);
                driver.blit_framebuffer(src, dst, filter);
            }
            None => unsupported("glBlitFramebuffer"),
        }
    }

    /// Whether either blit function is available.
    #[must_use]
    pub fn can_blit(&self) -> bool {
        self.blit.is_some()
    }
}

/// Process-wide capability flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// `None` when no framebuffer tier is usable.
    pub framebuffers: Option<FramebufferFunctions>,
    /// `GL_DEPTH_COMPONENT32F` renderbuffers.
    pub depth32f: bool,
    /// `glClipControl`, needed for reversed depth.
    pub clip_control: bool,
    /// `glDrawElementsBaseVertex` family.
    pub base_vertex: bool,
    /// `glMultiDrawArrays`.
    pub multi_draw_arrays: bool,
    /// GLSL 1.40 programs.
    pub programmable: bool,
}

impl Capabilities {
    /// Resolve capabilities from a driver probe.
    #[must_use]
    pub fn resolve(info: &DriverInfo) -> Self {
        let version = info.version;
        let desktop = !info.embedded;

        let framebuffers = resolve_framebuffer_tier(info).map(|tier| {
            resolve_framebuffer_functions(info, tier)
        });

        let caps = Self {
            framebuffers,
            depth32f: (desktop && version.at_least(3, 0))
                || info.has_extension("GL_ARB_depth_buffer_float"),
            clip_control: (desktop && version.at_least(4, 5))
                || info.has_extension("GL_ARB_clip_control"),
            base_vertex: ((desktop && version.at_least(3, 2))
                || info.has_extension("GL_ARB_draw_elements_base_vertex"))
                && info.has_entry_points(&["glDrawElementsBaseVertex"]),
            multi_draw_arrays: desktop
                && version.at_least(1, 4)
                && info.has_entry_points(&["glMultiDrawArrays"]),
            programmable: desktop && version.at_least(3, 1),
        };

        match &caps.framebuffers {
            Some(functions) => info!(
                "Framebuffers: {:?} tier, blit {:?}, texture attach {:?}",
                functions.tier, functions.blit, functions.framebuffer_texture
            ),
            None => warn!("Framebuffer objects unavailable, rendering to the screen only"),
        }
        caps
    }

    /// Framebuffers are usable.
    #[must_use]
    pub fn has_framebuffers(&self) -> bool {
        self.framebuffers.is_some()
    }

    /// Blit between framebuffers is usable.
    #[must_use]
    pub fn can_blit(&self) -> bool {
        self.framebuffers.as_ref().is_some_and(FramebufferFunctions::can_blit)
    }

    /// Drop framebuffer support, e.g. after a lost context.
    pub fn disable_framebuffers(&mut self) {
        self.framebuffers = None;
    }
}

fn resolve_framebuffer_tier(info: &DriverInfo) -> Option<FramebufferTier> {
    let core = !info.embedded && info.version.at_least(3, 0);
    if core && info.has_entry_points(CORE_FRAMEBUFFER_ENTRY_POINTS) {
        return Some(FramebufferTier::Core);
    }
    if info.has_extension("GL_ARB_framebuffer_object")
        && info.has_entry_points(CORE_FRAMEBUFFER_ENTRY_POINTS)
    {
        return Some(FramebufferTier::Arb);
    }
    if info.has_extension("GL_EXT_framebuffer_object")
        && info.has_entry_points(EXT_FRAMEBUFFER_ENTRY_POINTS)
    {
        return Some(FramebufferTier::Ext);
    }
    None
}

fn resolve_framebuffer_functions(info: &DriverInfo, tier: FramebufferTier) -> FramebufferFunctions {
    let dsa = (!info.embedded && info.version.at_least(4, 5))
        || info.has_extension("GL_ARB_direct_state_access");
    let named = |entry_points: &[&'static str]| {
        if dsa && info.has_entry_points(entry_points) {
            Addressing::Named
        } else {
            Addressing::Bound
        }
    };

    // Named calls on a framebuffer are only valid on objects made by
    // glCreateFramebuffers; a generated name is not an object until bound.
    let create_framebuffer = named(&["glCreateFramebuffers"]);
    let on_framebuffer = |entry_points: &[&'static str]| match create_framebuffer {
        Addressing::Named => named(entry_points),
        Addressing::Bound => Addressing::Bound,
    };
    let create_renderbuffer = named(&["glCreateRenderbuffers"]);
    let renderbuffer_storage = match create_renderbuffer {
        Addressing::Named => named(&["glNamedRenderbufferStorage"]),
        Addressing::Bound => Addressing::Bound,
    };

    let blit_bound = match tier {
        FramebufferTier::Core | FramebufferTier::Arb => {
            info.has_entry_points(&["glBlitFramebuffer"])
        }
        FramebufferTier::Ext => {
            info.has_extension("GL_EXT_framebuffer_blit")
                && info.has_entry_points(&["glBlitFramebufferEXT"])
        }
    };
    let blit = if dsa && info.has_entry_points(&["glBlitNamedFramebuffer"]) {
        Some(Addressing::Named)
    } else if blit_bound {
        Some(Addressing::Bound)
    } else {
        None
    };

    FramebufferFunctions {
        tier,
        create_framebuffer,
        framebuffer_texture: on_framebuffer(&["glNamedFramebufferTexture"]),
        check_status: on_framebuffer(&["glCheckNamedFramebufferStatus"]),
        create_renderbuffer,
        renderbuffer_storage,
        framebuffer_renderbuffer: on_framebuffer(&["glNamedFramebufferRenderbuffer"]),
        blit,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::driver::GlVersion;

    fn info(major: u32, minor: u32, extensions: &[&str], missing: &[&'static str]) -> DriverInfo {
        DriverInfo {
            vendor: "test".into(),
            renderer: "test".into(),
            version: GlVersion::new(major, minor),
            embedded: false,
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            missing_entry_points: missing.iter().copied().collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn modern_driver_uses_named_addressing_everywhere() {
        let caps = Capabilities::resolve(&info(4, 6, &[], &[]));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.tier, FramebufferTier::Core);
        assert_eq!(functions.create_framebuffer, Addressing::Named);
        assert_eq!(functions.framebuffer_texture, Addressing::Named);
        assert_eq!(functions.renderbuffer_storage, Addressing::Named);
        assert_eq!(functions.blit, Some(Addressing::Named));
        assert!(caps.depth32f && caps.clip_control && caps.base_vertex && caps.programmable);
    }

    #[test]
    fn core_without_dsa_binds_then_operates() {
        let caps = Capabilities::resolve(&info(3, 3, &[], &[]));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.tier, FramebufferTier::Core);
        assert_eq!(functions.create_framebuffer, Addressing::Bound);
        assert_eq!(functions.check_status, Addressing::Bound);
        assert_eq!(functions.blit, Some(Addressing::Bound));
        assert!(!caps.clip_control);
    }

    #[test]
    fn missing_core_entry_point_falls_through_to_ext() {
        let caps = Capabilities::resolve(&info(
            3,
            0,
            &["GL_ARB_framebuffer_object", "GL_EXT_framebuffer_object"],
            &["glCheckFramebufferStatus"],
        ));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.tier, FramebufferTier::Ext);
        // EXT blit needs its own extension.
        assert_eq!(functions.blit, None);
    }

    #[test]
    fn arb_extension_on_old_driver() {
        let caps = Capabilities::resolve(&info(2, 1, &["GL_ARB_framebuffer_object"], &[]));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.tier, FramebufferTier::Arb);
        assert!(!caps.programmable);
        assert!(!caps.depth32f);
    }

    #[test]
    fn incomplete_ext_tier_is_never_partially_used() {
        let caps = Capabilities::resolve(&info(
            2,
            1,
            &["GL_EXT_framebuffer_object", "GL_EXT_framebuffer_blit"],
            &["glRenderbufferStorageEXT"],
        ));
        assert!(!caps.has_framebuffers());
        assert!(!caps.can_blit());
    }

    #[test]
    fn named_framebuffer_calls_require_created_objects() {
        let caps = Capabilities::resolve(&info(4, 5, &[], &["glCreateFramebuffers"]));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.create_framebuffer, Addressing::Bound);
        assert_eq!(functions.framebuffer_texture, Addressing::Bound);
        assert_eq!(functions.framebuffer_renderbuffer, Addressing::Bound);
        // Renderbuffers are resolved on their own.
        assert_eq!(functions.create_renderbuffer, Addressing::Named);
    }

    #[test]
    fn mixed_named_and_bound_renderbuffers() {
        let caps = Capabilities::resolve(&info(
            4,
            6,
            &[],
            &["glCreateRenderbuffers", "glNamedRenderbufferStorage"],
        ));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.framebuffer_texture, Addressing::Named);
        assert_eq!(functions.create_renderbuffer, Addressing::Bound);
        assert_eq!(functions.renderbuffer_storage, Addressing::Bound);
        assert_eq!(functions.framebuffer_renderbuffer, Addressing::Named);
    }

    #[test]
    fn dsa_extension_on_older_core() {
        let caps = Capabilities::resolve(&info(3, 3, &["GL_ARB_direct_state_access"], &[]));
        let functions = caps.framebuffers.unwrap_or_else(|| panic!("no framebuffers"));
        assert_eq!(functions.framebuffer_texture, Addressing::Named);
    }

    #[test]
    fn disabling_drops_blit_too() {
        let mut caps = Capabilities::resolve(&info(4, 6, &[], &[]));
        assert!(caps.can_blit());
        caps.disable_framebuffers();
        assert!(!caps.has_framebuffers());
        assert!(!caps.can_blit());
    }
}
