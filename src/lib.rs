//! Framebuffer, render-state and sprite-batching layer for an OpenGL
//! first-person-shooter client.
//!
//! Everything hangs off a [`Renderer`], which owns a [`GlDriver`] and the
//! subsystems built on it:
//!
//! - **Capabilities** ([`caps`]): the framebuffer tier (core, ARB or EXT)
//!   and the addressing style of every framebuffer operation are resolved
//!   once from the driver probe, so callers never branch on capability.
//! - **Framebuffers** ([`framebuffer`]): a fixed set of slots, each a color
//!   texture plus an optional depth renderbuffer, created, resized, bound
//!   and blitted through the resolved function table.
//! - **Render states** ([`state`]): named, immutable descriptors applied as a
//!   unit, with redundant driver calls skipped.
//! - **Sprites** ([`sprite`]): per-frame vertex reservation into categories,
//!   merged into as few draws as the driver allows without reordering.
//! - **Compositor** ([`compositor`]): routes 3D and 2D drawing to off-screen
//!   targets and merges them onto the screen with a blit or a shader pass.
//!
//! # Backends
//!
//! With the default `glow` feature, [`GlowDriver`] runs everything on a
//! live context through [glow]. Without it the crate is driver-agnostic:
//! any [`GlDriver`] implementation works.
//!
//! # Safety
//!
//! Creating a [`GlowDriver`] requires a valid, current OpenGL context and is
//! `unsafe`. Past that point the [`GlDriver`] boundary is safe.
//!
//! [glow]: https://docs.rs/glow

pub mod caps;
pub mod compositor;
pub mod config;
pub mod driver;
mod error;
pub mod framebuffer;
#[cfg(feature = "glow")]
mod glow_driver;
#[cfg(test)]
mod recording;
mod renderer;
pub mod shaders;
pub mod sprite;
pub mod state;
pub mod texture;
pub mod types;

pub use caps::Capabilities;
pub use compositor::{CompositeOutcome, CompositePass, GammaRamp, PostProcessFlags};
pub use config::{BackendPreference, FramebufferMode, RendererConfig};
pub use driver::{DriverInfo, GlDriver, GlVersion};
pub use error::RenderError;
pub use framebuffer::FramebufferSlot;
#[cfg(feature = "glow")]
pub use glow_driver::GlowDriver;
pub use renderer::Renderer;
pub use sprite::{BatchCategory, FlushStats};
pub use state::{RenderState, StateHandle};
pub use texture::TextureRef;
pub use types::{SpriteVertex, Viewport};
