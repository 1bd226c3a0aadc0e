//! Renderer configuration, mirroring the console variables that drive the
//! framebuffer and post-processing paths.
//!
//! The configuration is owned by the caller and read on every frame, so a
//! change takes effect at the next [`Renderer::begin_frame`].
//!
//! [`Renderer::begin_frame`]: crate::Renderer::begin_frame

use serde::Deserialize;

/// How off-screen framebuffers are used for the frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramebufferMode {
    /// Draw straight to the screen.
    Off,
    /// 3D scene and 2D overlay each get their own off-screen target.
    #[default]
    Full,
    /// Only the 3D scene is rendered off-screen; 2D goes to the screen.
    SceneOnly,
}

/// Which draw backend to run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Modern when the driver can compile shaders, legacy otherwise.
    #[default]
    Auto,
    /// Immediate-mode draws with fixed-function texture environments.
    Legacy,
    /// Indexed and multi-draw submission from one shared vertex buffer.
    Modern,
}

/// Renderer settings read each frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Off-screen framebuffer routing.
    pub framebuffers: FramebufferMode,
    /// Use half-float color targets.
    pub hdr: bool,
    /// Depth buffer format: 0 best, 1 16-bit, 2 24-bit, 3 32-bit, 4 32-bit float.
    pub depth_format: u8,
    /// Apply gamma/contrast in the composite shader instead of the hardware ramp.
    pub palette_post_process: bool,
    /// Prefer a framebuffer blit over the shader pass when no effect is needed.
    pub prefer_blit: bool,
    /// Tone-map HDR scene colors into display range.
    pub tonemap: bool,
    /// Scale of the 3D target relative to the window, in `(0, 4]`.
    pub render_scale: f32,
    /// Display gamma, `1.0` for none.
    pub gamma: f32,
    /// Contrast multiplier, `1.0` for none.
    pub contrast: f32,
    /// Reversed depth via clip control. Experimental and off by default.
    pub reversed_depth: bool,
    /// Sprite dispatch path.
    pub backend: BackendPreference,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            framebuffers: FramebufferMode::Full,
            hdr: false,
            depth_format: 0,
            palette_post_process: true,
            prefer_blit: false,
            tonemap: false,
            render_scale: 1.0,
            gamma: 1.0,
            contrast: 1.0,
            reversed_depth: false,
            backend: BackendPreference::Auto,
        }
    }
}

impl RendererConfig {
    /// Render scale clamped to the supported range; non-finite values fall
    /// back to `1.0`.
    #[must_use]
    pub fn effective_render_scale(&self) -> f32 {
        if self.render_scale.is_finite() && self.render_scale > 0.0 {
            self.render_scale.min(4.0)
        } else {
            1.0
        }
    }

    /// Whether the composite pass needs to remap colors.
    #[must_use]
    pub fn wants_palette(&self) -> bool {
        self.palette_post_process
            && ((self.gamma - 1.0).abs() > f32::EPSILON
                || (self.contrast - 1.0).abs() > f32::EPSILON)
    }
}
