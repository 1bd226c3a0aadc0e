//! Texture ownership and loading.
//!
//! Textures are owned by the [`TextureManager`]; everybody else holds a
//! [`TextureRef`], a generation-checked index that turns invalid once the
//! texture is deleted instead of aliasing whatever reuses the slot.

use log::{debug, trace};

use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::state::MAX_TEXTURE_UNITS;
use crate::types::{ColorFormat, Filter, TextureDesc, TextureId};

/// Non-owning reference to a managed texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureRef {
    index: u32,
    generation: u32,
}

struct TextureEntry {
    id: Option<TextureId>,
    generation: u32,
    name: String,
    desc: TextureDesc,
}

/// Owns every texture created through the renderer.
#[derive(Default)]
pub struct TextureManager {
    entries: Vec<TextureEntry>,
    free: Vec<u32>,
    bound: [Option<TextureId>; MAX_TEXTURE_UNITS],
}

impl TextureManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a texture, optionally uploading `pixels`.
    ///
    /// # Errors
    ///
    /// Fails on zero dimensions, a pixel slice of the wrong length, or a
    /// driver allocation failure.
    pub fn create<D: GlDriver>(
        &mut self,
        driver: &mut D,
        name: &str,
        desc: TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureRef, RenderError> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::ResourceCreation {
                what: "texture",
                reason: format!("{name} has a zero dimension"),
            });
        }
        if let Some(pixels) = pixels {
            if pixels.len() != desc.byte_len() {
                return Err(RenderError::ResourceCreation {
                    what: "texture",
                    reason: format!(
                        "{name}: {} bytes supplied, {} expected",
                        pixels.len(),
                        desc.byte_len()
                    ),
                });
            }
        }

        let id = driver.create_texture(&desc, pixels)?;
        trace!("Created texture {name} ({}x{})", desc.width, desc.height);

        let reference = if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.id = Some(id);
            entry.name = name.to_string();
            entry.desc = desc;
            TextureRef {
                index,
                generation: entry.generation,
            }
        } else {
            let index = u32::try_from(self.entries.len())
                .map_err(|_| RenderError::CapacityExceeded("textures"))?;
            self.entries.push(TextureEntry {
                id: Some(id),
                generation: 0,
                name: name.to_string(),
                desc,
            });
            TextureRef {
                index,
                generation: 0,
            }
        };
        Ok(reference)
    }

    /// Decode PNG, JPEG or TGA bytes and upload them as an RGBA8 texture
    /// with linear filtering.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ImageDecode`] for unreadable bytes, or any
    /// error from [`create`](Self::create).
    pub fn load_image<D: GlDriver>(
        &mut self,
        driver: &mut D,
        name: &str,
        bytes: &[u8],
    ) -> Result<TextureRef, RenderError> {
        let image = image::load_from_memory(bytes)
            .map_err(|source| RenderError::ImageDecode {
                name: name.to_string(),
                source,
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        let desc = TextureDesc::texture_2d(ColorFormat::Rgba8, width, height);
        let texture = self.create(driver, name, desc, Some(image.as_raw().as_slice()))?;
        self.set_filtering(driver, texture, Filter::Linear, Filter::Linear);
        Ok(texture)
    }

    /// Release a texture. Stale references are ignored.
    pub fn delete<D: GlDriver>(&mut self, driver: &mut D, texture: TextureRef) {
        let Some(entry) = self.entry_mut(texture) else {
            return;
        };
        let Some(id) = entry.id.take() else {
            return;
        };
        entry.generation = entry.generation.wrapping_add(1);
        debug!("Deleting texture {}", entry.name);
        driver.delete_texture(id);
        for unit in &mut self.bound {
            if *unit == Some(id) {
                *unit = None;
            }
        }
        self.free.push(texture.index);
    }

    /// Release every texture.
    pub fn delete_all<D: GlDriver>(&mut self, driver: &mut D) {
        let live: Vec<TextureRef> = self.iter_live().collect();
        for texture in live {
            self.delete(driver, texture);
        }
    }

    /// Set minification and magnification filters.
    pub fn set_filtering<D: GlDriver>(
        &mut self,
        driver: &mut D,
        texture: TextureRef,
        min: Filter,
        mag: Filter,
    ) {
        if let Some(id) = self.id(texture) {
            driver.texture_filter(id, min, mag);
        }
    }

    /// Clamp both texture coordinates to the edge.
    pub fn set_wrap_clamp<D: GlDriver>(&mut self, driver: &mut D, texture: TextureRef) {
        if let Some(id) = self.id(texture) {
            driver.texture_wrap_clamp(id);
        }
    }

    /// Bind a texture to `unit`, skipping the call when it is already bound.
    /// An invalid reference unbinds the unit.
    ///
    /// Returns whether a driver call was made.
    pub fn bind_to_unit<D: GlDriver>(
        &mut self,
        driver: &mut D,
        unit: u32,
        texture: Option<TextureRef>,
    ) -> bool {
        let id = texture.and_then(|t| self.id(t));
        let slot = &mut self.bound[unit as usize];
        if *slot == id {
            return false;
        }
        *slot = id;
        driver.bind_texture(unit, id);
        true
    }

    /// Forget the binding cache.
    pub fn invalidate_bindings(&mut self) {
        self.bound = [None; MAX_TEXTURE_UNITS];
    }

    /// Whether `texture` still refers to a live texture.
    #[must_use]
    pub fn is_valid(&self, texture: TextureRef) -> bool {
        self.id(texture).is_some()
    }

    /// Driver name behind a live reference.
    #[must_use]
    pub fn id(&self, texture: TextureRef) -> Option<TextureId> {
        self.entries
            .get(texture.index as usize)
            .filter(|entry| entry.generation == texture.generation)
            .and_then(|entry| entry.id)
    }

    /// Storage description of a live texture.
    #[must_use]
    pub fn desc(&self, texture: TextureRef) -> Option<&TextureDesc> {
        self.entry(texture).map(|entry| &entry.desc)
    }

    /// Name a live texture was created under.
    #[must_use]
    pub fn name(&self, texture: TextureRef) -> Option<&str> {
        self.entry(texture).map(|entry| entry.name.as_str())
    }

    /// Number of live textures.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.id.is_some()).count()
    }

    fn iter_live(&self) -> impl Iterator<Item = TextureRef> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.id.map(|_| TextureRef {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                generation: entry.generation,
            })
        })
    }

    fn entry(&self, texture: TextureRef) -> Option<&TextureEntry> {
        self.entries
            .get(texture.index as usize)
            .filter(|entry| entry.generation == texture.generation && entry.id.is_some())
    }

    fn entry_mut(&mut self, texture: TextureRef) -> Option<&mut TextureEntry> {
        self.entries
            .get_mut(texture.index as usize)
            .filter(|entry| entry.generation == texture.generation)
    }
}
