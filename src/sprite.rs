//! Per-frame sprite and billboard batching.
//!
//! Drawing code reserves vertices for a category and fills them in place.
//! Every category shares one vertex buffer; within a category each
//! reservation is a sub-run with its own texture and array layer. On flush,
//! categories are drawn in the order they were initialized and sub-runs in
//! the order they were added. Consecutive sub-runs sharing a texture are
//! merged into one draw where the driver allows it; nothing is sorted.

use std::ops::Range;

use log::{debug, trace};

use crate::caps::Capabilities;
use crate::driver::GlDriver;
use crate::error::RenderError;
use crate::state::{RenderState, StateHandle, StateRegistry, TextureUnitState};
use crate::texture::{TextureManager, TextureRef};
use crate::types::{BlendFunc, CullMode, Primitive, SpriteVertex, TexEnvMode, VertexLayout};

/// Vertices the shared buffer holds per frame.
pub const MAX_VERTICES: usize = 1 << 16;

/// Sub-runs a single category holds per frame.
pub const MAX_RUNS_PER_BATCH: usize = 8192;

/// Kinds of batched geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BatchCategory {
    /// Camera-facing entity sprites.
    Sprites,
    /// Classic point particles drawn as quads.
    Particles,
    /// Sparks, 9 vertices each.
    Sparks,
    /// Muzzle and explosion flashes, 18 vertices each.
    Flashes,
    /// Light coronas, additive.
    Coronas,
    /// Screen-space images.
    Images,
}

impl BatchCategory {
    const COUNT: usize = 6;

    /// Every category.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Sprites,
        Self::Particles,
        Self::Sparks,
        Self::Flashes,
        Self::Coronas,
        Self::Images,
    ];

    fn index(self) -> usize {
        match self {
            Self::Sprites => 0,
            Self::Particles => 1,
            Self::Sparks => 2,
            Self::Flashes => 3,
            Self::Coronas => 4,
            Self::Images => 5,
        }
    }

    /// Name used for the category's render states.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Sprites => "sprites",
            Self::Particles => "particles",
            Self::Sparks => "sparks",
            Self::Flashes => "flashes",
            Self::Coronas => "coronas",
            Self::Images => "images",
        }
    }
}

/// How batched vertices reach the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fixed-function path: vertices are handed over per draw.
    Immediate,
    /// Vertices are uploaded once per flush and drawn from the buffer.
    Buffered,
}

/// Per-category configuration passed to [`SpriteBatcher::initialize_batch`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BatchDesc {
    /// `None` draws opaque.
    pub blend: Option<BlendFunc>,
    /// Texture used by entries that do not name one.
    pub default_texture: Option<TextureRef>,
    /// Layout the batch's vertices are read through.
    pub layout: VertexLayout,
    /// How each entry's vertices are assembled.
    pub primitive: Primitive,
    /// Test against the scene depth.
    pub depth_test: bool,
    /// Write depth; translucent batches leave it off.
    pub depth_write: bool,
}

impl BatchDesc {
    /// Blended, depth-tested quads without depth writes.
    #[must_use]
    pub fn billboards(blend: BlendFunc, default_texture: Option<TextureRef>) -> Self {
        Self {
            blend: Some(blend),
            default_texture,
            layout: VertexLayout::Sprite,
            primitive: Primitive::TriangleStrip,
            depth_test: true,
            depth_write: false,
        }
    }

    fn configure(&self, state: &mut RenderState) {
        state.blend = self.blend;
        state.depth_test = self.depth_test;
        state.depth_write = self.depth_write;
        state.cull = CullMode::Disabled;
        state.vertex_layout = self.layout;
        state.texture_units[0] = TextureUnitState::enabled(TexEnvMode::Modulate);
    }
}

/// Driver work done by one [`SpriteBatcher::flush`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Draw submissions, counting a multi-draw once.
    pub draw_calls: usize,
    /// Driver calls issued while applying render states.
    pub state_calls: usize,
    /// Texture bindings that reached the driver.
    pub texture_binds: usize,
    /// Vertices submitted.
    pub vertices: usize,
}

/// Ranges of consecutive equal items.
///
/// `[A, A, B, A]` yields `[0..2, 2..3, 3..4]`.
#[must_use]
pub fn contiguous_runs<T: PartialEq>(items: &[T]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=items.len() {
        if i == items.len() || items[i] != items[start] {
            runs.push(start..i);
            start = i;
        }
    }
    runs
}

/// A precomputed triangle- or line-list decomposition of one sub-run shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Primitive the indices are drawn with.
    pub mode: Primitive,
    /// First index in the shared index buffer.
    pub offset: usize,
    /// Index count.
    pub len: usize,
}

/// Index lists for the sub-run shapes drawn often enough to be worth
/// indexing: quads (4), sparks (9) and flashes (18).
pub struct IndexTopologies {
    indices: Vec<u16>,
    entries: Vec<(Primitive, usize, Topology)>,
}

impl IndexTopologies {
    /// Vertex counts with a precomputed topology.
    pub const VERTEX_COUNTS: [usize; 3] = [4, 9, 18];

    /// Build the index lists for every shape and primitive.
    #[must_use]
    pub fn new() -> Self {
        let mut indices = Vec::new();
        let mut entries = Vec::new();
        for primitive in [
            Primitive::TriangleStrip,
            Primitive::TriangleFan,
            Primitive::Triangles,
            Primitive::Lines,
        ] {
            for count in Self::VERTEX_COUNTS {
                if let Some((mode, list)) = list_indices(primitive, count) {
                    entries.push((
                        primitive,
                        count,
                        Topology {
                            mode,
                            offset: indices.len(),
                            len: list.len(),
                        },
                    ));
                    indices.extend(list);
                }
            }
        }
        Self { indices, entries }
    }

    /// Topology for sub-runs of `vertices` vertices drawn as `primitive`.
    #[must_use]
    pub fn lookup(&self, primitive: Primitive, vertices: usize) -> Option<Topology> {
        self.entries
            .iter()
            .find(|(p, count, _)| *p == primitive && *count == vertices)
            .map(|(_, _, topology)| *topology)
    }

    /// The shared index buffer contents.
    #[must_use]
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }
}

impl Default for IndexTopologies {
    fn default() -> Self {
        Self::new()
    }
}

fn list_indices(primitive: Primitive, count: usize) -> Option<(Primitive, Vec<u16>)> {
    let n = u16::try_from(count).ok()?;
    match primitive {
        Primitive::TriangleStrip if n >= 3 => {
            let list = (0..n - 2)
                .flat_map(|i| {
                    if i % 2 == 0 {
                        [i, i + 1, i + 2]
                    } else {
                        [i + 1, i, i + 2]
                    }
                })
                .collect();
            Some((Primitive::Triangles, list))
        }
        Primitive::TriangleFan if n >= 3 => {
            let list = (1..n - 1).flat_map(|i| [0, i, i + 1]).collect();
            Some((Primitive::Triangles, list))
        }
        Primitive::Triangles if n % 3 == 0 => Some((Primitive::Triangles, (0..n).collect())),
        Primitive::Lines if n % 2 == 0 => Some((Primitive::Lines, (0..n).collect())),
        _ => None,
    }
}

fn is_list(primitive: Primitive) -> bool {
    matches!(primitive, Primitive::Triangles | Primitive::Lines)
}

fn gl_int(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Copy, Clone, Debug)]
struct BatchConfig {
    primitive: Primitive,
    default_texture: Option<TextureRef>,
    textured: StateHandle,
    untextured: StateHandle,
}

#[derive(Copy, Clone, Debug)]
struct SubRun {
    texture: Option<TextureRef>,
    first: usize,
    count: usize,
}

#[derive(Default)]
struct Batch {
    config: Option<BatchConfig>,
    runs: Vec<SubRun>,
}

/// Accumulates sprite geometry for one frame.
pub struct SpriteBatcher {
    batches: [Batch; BatchCategory::COUNT],
    order: Vec<BatchCategory>,
    vertices: Vec<SpriteVertex>,
    topologies: IndexTopologies,
    indices_uploaded: bool,
    mode: DispatchMode,
    base_vertex: bool,
    multi_draw_arrays: bool,
}

impl SpriteBatcher {
    /// An empty batcher dispatching with `mode`.
    #[must_use]
    pub fn new(caps: &Capabilities, mode: DispatchMode) -> Self {
        Self {
            batches: Default::default(),
            order: Vec::new(),
            vertices: Vec::with_capacity(4096),
            topologies: IndexTopologies::new(),
            indices_uploaded: false,
            mode,
            base_vertex: caps.base_vertex,
            multi_draw_arrays: caps.multi_draw_arrays,
        }
    }

    /// Dispatch mode in use.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Configure `category` and register its textured and untextured
    /// states. Categories flush in the order they are initialized.
    ///
    /// # Errors
    ///
    /// Fails if the category is already initialized or the registry rejects
    /// the states.
    pub fn initialize_batch(
        &mut self,
        states: &mut StateRegistry,
        category: BatchCategory,
        desc: BatchDesc,
    ) -> Result<(), RenderError> {
        let batch = &mut self.batches[category.index()];
        if batch.config.is_some() {
            return Err(RenderError::DuplicateState(format!(
                "sprite batch {}",
                category.label()
            )));
        }
        let label = category.label();
        let textured = states.register(&format!("{label}.textured"), None, |state| {
            desc.configure(state);
        })?;
        let untextured = states.register(&format!("{label}.untextured"), Some(textured), |state| {
            state.texture_units[0] = TextureUnitState::DISABLED;
        })?;
        batch.config = Some(BatchConfig {
            primitive: desc.primitive,
            default_texture: desc.default_texture,
            textured,
            untextured,
        });
        self.order.push(category);
        Ok(())
    }

    /// Whether `category` has been initialized.
    #[must_use]
    pub fn is_initialized(&self, category: BatchCategory) -> bool {
        self.batches[category.index()].config.is_some()
    }

    /// Reserve `count` vertices drawn with the category's default texture.
    pub fn add_entry(
        &mut self,
        category: BatchCategory,
        count: usize,
    ) -> Option<&mut [SpriteVertex]> {
        self.add_entry_specific(category, count, None, 0)
    }

    /// Reserve `count` vertices drawn with `texture` (the default if `None`)
    /// at array layer `layer`.
    ///
    /// The reserved vertices come back with the layer already filled in.
    /// Returns `None` when the frame is out of room; the entry is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `category` was never initialized.
    pub fn add_entry_specific(
        &mut self,
        category: BatchCategory,
        count: usize,
        texture: Option<TextureRef>,
        layer: u16,
    ) -> Option<&mut [SpriteVertex]> {
        match self.reserve(category, count, texture, layer) {
            Ok(range) => Some(&mut self.vertices[range]),
            Err(err) => {
                trace!("Dropped {count} {} vertices: {err}", category.label());
                None
            }
        }
    }

    fn reserve(
        &mut self,
        category: BatchCategory,
        count: usize,
        texture: Option<TextureRef>,
        layer: u16,
    ) -> Result<Range<usize>, RenderError> {
        let batch = &mut self.batches[category.index()];
        assert!(
            batch.config.is_some(),
            "sprite batch {} was never initialized",
            category.label()
        );
        let first = self.vertices.len();
        if count == 0 {
            return Ok(first..first);
        }
        if first + count > MAX_VERTICES {
            return Err(RenderError::CapacityExceeded("sprite vertices"));
        }
        if batch.runs.len() >= MAX_RUNS_PER_BATCH {
            return Err(RenderError::CapacityExceeded("sprite runs"));
        }

        let mut vertex = SpriteVertex::default();
        vertex.tex_coord[2] = f32::from(layer);
        self.vertices.resize(first + count, vertex);
        batch.runs.push(SubRun {
            texture,
            first,
            count,
        });
        Ok(first..first + count)
    }

    /// Vertices reserved so far this frame.
    #[must_use]
    pub fn pending_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Forget that the index buffer was uploaded, e.g. after the driver's
    /// buffers were recreated.
    pub fn invalidate(&mut self) {
        self.indices_uploaded = false;
    }

    /// Draw everything reserved this frame, then reset.
    ///
    /// An empty frame issues no driver calls.
    pub fn flush<D: GlDriver>(
        &mut self,
        driver: &mut D,
        states: &mut StateRegistry,
        textures: &mut TextureManager,
    ) -> FlushStats {
        let mut stats = FlushStats::default();
        if self.vertices.is_empty() {
            self.reset();
            return stats;
        }

        if self.mode == DispatchMode::Buffered {
            if self.base_vertex && !self.indices_uploaded {
                driver.upload_indices(self.topologies.indices());
                self.indices_uploaded = true;
            }
            driver.upload_vertices(&self.vertices);
        }
        stats.vertices = self.vertices.len();

        for &category in &self.order {
            let batch = &self.batches[category.index()];
            if batch.runs.is_empty() {
                continue;
            }
            let Some(config) = batch.config else {
                unreachable!("ordered batch without configuration");
            };
            self.draw_batch(driver, states, textures, &config, &batch.runs, &mut stats);
        }

        debug!(
            "Sprite flush: {} vertices, {} draws, {} binds",
            stats.vertices, stats.draw_calls, stats.texture_binds
        );
        self.reset();
        stats
    }

    /// Drop every reservation without drawing.
    pub fn reset(&mut self) {
        self.vertices.clear();
        for batch in &mut self.batches {
            batch.runs.clear();
        }
    }

    fn draw_batch<D: GlDriver>(
        &self,
        driver: &mut D,
        states: &mut StateRegistry,
        textures: &mut TextureManager,
        config: &BatchConfig,
        runs: &[SubRun],
        stats: &mut FlushStats,
    ) {
        let keys: Vec<Option<TextureRef>> = runs
            .iter()
            .map(|run| {
                run.texture
                    .or(config.default_texture)
                    .filter(|texture| textures.is_valid(*texture))
            })
            .collect();
        let groups = contiguous_runs(&keys);

        if runs.len() == 1 {
            Self::bind(driver, states, textures, config, keys[0], stats);
            self.draw_span(driver, config.primitive, &runs[0], stats);
            return;
        }

        if let Some(topology) = self.indexed_topology(config.primitive, runs) {
            for group in groups {
                Self::bind(driver, states, textures, config, keys[group.start], stats);
                let runs = &runs[group];
                let counts = vec![gl_int(topology.len); runs.len()];
                let offsets = vec![gl_int(topology.offset); runs.len()];
                let bases: Vec<i32> = runs.iter().map(|run| gl_int(run.first)).collect();
                driver.multi_draw_elements_base_vertex(topology.mode, &counts, &offsets, &bases);
                stats.draw_calls += 1;
            }
            return;
        }

        for group in groups {
            Self::bind(driver, states, textures, config, keys[group.start], stats);
            self.draw_group(driver, config.primitive, &runs[group], stats);
        }
    }

    fn indexed_topology(&self, primitive: Primitive, runs: &[SubRun]) -> Option<Topology> {
        if self.mode != DispatchMode::Buffered || !self.base_vertex {
            return None;
        }
        let count = runs[0].count;
        if runs.iter().any(|run| run.count != count) {
            return None;
        }
        self.topologies.lookup(primitive, count)
    }

    fn bind<D: GlDriver>(
        driver: &mut D,
        states: &mut StateRegistry,
        textures: &mut TextureManager,
        config: &BatchConfig,
        texture: Option<TextureRef>,
        stats: &mut FlushStats,
    ) {
        let state = if texture.is_some() {
            config.textured
        } else {
            config.untextured
        };
        stats.state_calls += states.apply(driver, state);
        if texture.is_some() && textures.bind_to_unit(driver, 0, texture) {
            stats.texture_binds += 1;
        }
    }

    fn draw_span<D: GlDriver>(
        &self,
        driver: &mut D,
        primitive: Primitive,
        run: &SubRun,
        stats: &mut FlushStats,
    ) {
        match self.mode {
            DispatchMode::Buffered => {
                driver.draw_arrays(primitive, gl_int(run.first), gl_int(run.count));
            }
            DispatchMode::Immediate => {
                driver.immediate_draw(primitive, &self.vertices[run.first..run.first + run.count]);
            }
        }
        stats.draw_calls += 1;
    }

    /// Draw consecutive sub-runs sharing a texture.
    fn draw_group<D: GlDriver>(
        &self,
        driver: &mut D,
        primitive: Primitive,
        runs: &[SubRun],
        stats: &mut FlushStats,
    ) {
        // Sub-runs of one batch are adjacent in the buffer only when nothing
        // else was reserved in between.
        let adjacent = runs
            .windows(2)
            .all(|pair| pair[0].first + pair[0].count == pair[1].first);
        if is_list(primitive) && adjacent {
            let first = runs[0].first;
            let last = &runs[runs.len() - 1];
            let span = SubRun {
                texture: None,
                first,
                count: last.first + last.count - first,
            };
            self.draw_span(driver, primitive, &span, stats);
            return;
        }

        if self.mode == DispatchMode::Buffered && self.multi_draw_arrays {
            let firsts: Vec<i32> = runs.iter().map(|run| gl_int(run.first)).collect();
            let counts: Vec<i32> = runs.iter().map(|run| gl_int(run.count)).collect();
            driver.multi_draw_arrays(primitive, &firsts, &counts);
            stats.draw_calls += 1;
        } else {
            for run in runs {
                self.draw_span(driver, primitive, run, stats);
            }
        }
    }
}
