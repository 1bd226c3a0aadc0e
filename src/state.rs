//! Render-state registry.
//!
//! Every combination of pipeline settings the renderer draws with is built
//! once at startup as a named [`RenderState`]. Drawing code never toggles
//! individual GL switches; it applies a whole state, and the registry issues
//! only the driver calls whose values differ from what is already bound.

use log::debug;

use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::types::{BlendFunc, CullMode, DepthFunc, PolygonOffset, TexEnvMode, VertexLayout};

/// Texture units a render state configures.
pub const MAX_TEXTURE_UNITS: usize = 4;

/// Enable flag and combine mode for one texture unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TextureUnitState {
    pub enabled: bool,
    pub mode: TexEnvMode,
}

impl TextureUnitState {
    /// Unit switched off, modulate combine (GL's initial state).
    pub const DISABLED: Self = Self {
        enabled: false,
        mode: TexEnvMode::Modulate,
    };

    /// Unit switched on with the given combine mode.
    #[must_use]
    pub const fn enabled(mode: TexEnvMode) -> Self {
        Self {
            enabled: true,
            mode,
        }
    }
}

/// A complete pipeline configuration applied as one unit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderState {
    /// Depth testing on.
    pub depth_test: bool,
    /// Depth mask.
    pub depth_write: bool,
    /// Comparison used when depth testing.
    pub depth_func: DepthFunc,
    /// Culled faces.
    pub cull: CullMode,
    /// `None` disables blending.
    pub blend: Option<BlendFunc>,
    /// Units 0 to [`MAX_TEXTURE_UNITS`] - 1.
    pub texture_units: [TextureUnitState; MAX_TEXTURE_UNITS],
    /// Width of line primitives.
    pub line_width: f32,
    /// Depth offset preset.
    pub polygon_offset: PolygonOffset,
    /// Vertex array and program bound with the state.
    pub vertex_layout: VertexLayout,
}

impl RenderState {
    /// The state every other state derives from: opaque, depth-tested,
    /// back-face culled, untextured.
    #[must_use]
    pub fn base(reversed_depth: bool) -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_func: if reversed_depth {
                DepthFunc::GreaterEqual
            } else {
                DepthFunc::LessEqual
            },
            cull: CullMode::Back,
            blend: None,
            texture_units: [TextureUnitState::DISABLED; MAX_TEXTURE_UNITS],
            line_width: 1.0,
            polygon_offset: PolygonOffset::Disabled,
            vertex_layout: VertexLayout::None,
        }
    }
}

/// Opaque reference to a registered state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateHandle(u16);

/// What the registry believes the GPU currently has bound. `None` means
/// unknown, which forces the next apply to set the field.
#[derive(Clone, Debug, Default)]
struct BoundState {
    depth_test: Option<bool>,
    depth_write: Option<bool>,
    depth_func: Option<DepthFunc>,
    cull: Option<CullMode>,
    blend_enabled: Option<bool>,
    blend_func: Option<BlendFunc>,
    texture_units: [Option<TextureUnitState>; MAX_TEXTURE_UNITS],
    line_width: Option<f32>,
    polygon_offset: Option<PolygonOffset>,
    vertex_layout: Option<VertexLayout>,
}

/// Record `want` in `slot` and report whether it changed.
fn changed<T: PartialEq + Copy>(slot: &mut Option<T>, want: T) -> bool {
    if *slot == Some(want) {
        false
    } else {
        *slot = Some(want);
        true
    }
}

/// Table of named, immutable render states.
pub struct StateRegistry {
    states: Vec<(String, RenderState)>,
    sealed: bool,
    bound: BoundState,
    last_applied: Option<StateHandle>,
}

impl StateRegistry {
    /// Handle of the state every registry starts with.
    pub const DEFAULT: StateHandle = StateHandle(0);

    /// A registry holding only the `"default"` state.
    #[must_use]
    pub fn new(reversed_depth: bool) -> Self {
        Self {
            states: vec![("default".to_string(), RenderState::base(reversed_depth))],
            sealed: false,
            bound: BoundState::default(),
            last_applied: None,
        }
    }

    /// Register a state derived from `base` (the default state if `None`),
    /// modified by `configure`.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or the registry has been sealed.
    pub fn register(
        &mut self,
        name: &str,
        base: Option<StateHandle>,
        configure: impl FnOnce(&mut RenderState),
    ) -> Result<StateHandle, RenderError> {
        if self.sealed {
            return Err(RenderError::RegistrySealed(name.to_string()));
        }
        if self.find(name).is_some() {
            return Err(RenderError::DuplicateState(name.to_string()));
        }
        let mut state = *self.get(base.unwrap_or(Self::DEFAULT));
        configure(&mut state);

        let handle = u16::try_from(self.states.len())
            .map(StateHandle)
            .map_err(|_| RenderError::CapacityExceeded("render states"))?;
        debug!("Registered render state {name} as {handle:?}");
        self.states.push((name.to_string(), state));
        Ok(handle)
    }

    /// Freeze the table; later registrations fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether [`seal`](Self::seal) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Look up a state by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<StateHandle> {
        self.states
            .iter()
            .position(|(n, _)| n == name)
            .and_then(|i| u16::try_from(i).ok())
            .map(StateHandle)
    }

    /// The descriptor behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was not issued by this registry.
    #[must_use]
    pub fn get(&self, handle: StateHandle) -> &RenderState {
        match self.states.get(usize::from(handle.0)) {
            Some((_, state)) => state,
            None => panic!("render state {handle:?} was never registered"),
        }
    }

    /// Name of the state behind `handle`, if any.
    #[must_use]
    pub fn name(&self, handle: StateHandle) -> Option<&str> {
        self.states
            .get(usize::from(handle.0))
            .map(|(name, _)| name.as_str())
    }

    /// Registered state names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|(name, _)| name.as_str())
    }

    /// Handle most recently applied, unless the cache was invalidated since.
    #[must_use]
    pub fn current(&self) -> Option<StateHandle> {
        self.last_applied
    }

    /// Forget what is bound, e.g. after code outside the registry touched
    /// pipeline state. The next apply sets every field.
    pub fn invalidate(&mut self) {
        self.bound = BoundState::default();
        self.last_applied = None;
    }

    /// Make the GPU pipeline match the state behind `handle`.
    ///
    /// Returns the number of driver calls issued.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was not issued by this registry.
    pub fn apply<D: GlDriver>(&mut self, driver: &mut D, handle: StateHandle) -> usize {
        let state = *self.get(handle);
        let bound = &mut self.bound;
        let mut calls = 0;

        if changed(&mut bound.depth_test, state.depth_test) {
            driver.set_depth_test(state.depth_test);
            calls += 1;
        }
        if changed(&mut bound.depth_write, state.depth_write) {
            driver.set_depth_write(state.depth_write);
            calls += 1;
        }
        if changed(&mut bound.depth_func, state.depth_func) {
            driver.set_depth_func(state.depth_func);
            calls += 1;
        }
        if changed(&mut bound.cull, state.cull) {
            driver.set_cull_mode(state.cull);
            calls += 1;
        }
        if changed(&mut bound.blend_enabled, state.blend.is_some()) {
            driver.set_blend_enabled(state.blend.is_some());
            calls += 1;
        }
        // The blend function is left alone while blending is off.
        if let Some(func) = state.blend {
            if changed(&mut bound.blend_func, func) {
                driver.set_blend_func(func);
                calls += 1;
            }
        }
        for (unit, (slot, want)) in bound
            .texture_units
            .iter_mut()
            .zip(state.texture_units)
            .enumerate()
        {
            if changed(slot, want) {
                // MAX_TEXTURE_UNITS is tiny.
                #[allow(clippy::cast_possible_truncation)]
                driver.set_texture_unit(unit as u32, want.enabled, want.mode);
                calls += 1;
            }
        }
        if bound
            .line_width
            .is_none_or(|width| (width - state.line_width).abs() > f32::EPSILON)
        {
            bound.line_width = Some(state.line_width);
            driver.set_line_width(state.line_width);
            calls += 1;
        }
        if changed(&mut bound.polygon_offset, state.polygon_offset) {
            driver.set_polygon_offset(state.polygon_offset);
            calls += 1;
        }
        if changed(&mut bound.vertex_layout, state.vertex_layout) {
            driver.bind_vertex_layout(state.vertex_layout);
            calls += 1;
        }

        self.last_applied = Some(handle);
        calls
    }
}
