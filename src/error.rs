//! Error type shared by every subsystem.
//!
//! Only recoverable conditions live here. Calling a driver wrapper with no
//! available implementation is a programming error and panics instead.

use thiserror::Error;

/// Recoverable failures reported by the renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A driver extension or entry point the operation needs is absent.
    #[error("required driver capability missing: {0}")]
    CapabilityMissing(&'static str),

    /// A GPU object could not be created or came back incomplete.
    #[error("failed to create {what}: {reason}")]
    ResourceCreation {
        /// Kind of object, e.g. `"framebuffer"`.
        what: &'static str,
        /// Driver message or status.
        reason: String,
    },

    /// Image bytes handed to the texture loader could not be decoded.
    #[error("failed to decode image `{name}`: {source}")]
    ImageDecode {
        /// Texture name the image was loaded under.
        name: String,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Shader compilation or program linking failed.
    #[error("shader error: {0}")]
    Shader(String),

    /// A render state with this name already exists.
    #[error("render state `{0}` is already registered")]
    DuplicateState(String),

    /// Registration attempted after the registry was sealed.
    #[error("render state `{0}` registered after initialization")]
    RegistrySealed(String),

    /// A per-frame buffer or batch limit was reached.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),
}
