// vellum/canvas/src/geometry.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The baked product of a [`GeometryBuilder`](crate::GeometryBuilder): a
//! self-contained bag of vertices, sub-paths, render groups and glyphs that
//! can be submitted to a [`Canvas`](crate::Canvas) many times at a fraction
//! of the build cost.
//!
//! All cross-references inside a geometry are integer ranges into its own
//! tables; nothing points at anything.

use vellum_atlas::glyph::{FontRasterizer, GlyphAtlas, GlyphKey};
use vellum_color::ColorU;
use vellum_content::RenderStyle;
use vellum_geometry::vector::Vector2F;
use vellum_gpu::data::{BlendOp, PayloadRange};

/// One tessellated vertex. Color and paint parameters are attached later,
/// when a canvas packs the geometry for a frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderVertex {
    pub pos: Vector2F,
    /// Coverage coordinate used by analytic anti-aliasing.
    pub uv: Vector2F,
    /// Position mapped into paint space at build time.
    pub paint_uv: Vector2F,
}

/// Vertex ranges of one flattened sub-path inside the owning geometry: the
/// fill fan and the stroke (or fill-fringe) strip.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubPath {
    pub first_fill_vertex: u32,
    pub fill_count: u32,
    pub first_stroke_vertex: u32,
    pub stroke_count: u32,
}

/// What a render group's vertices represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    Fill,
    Stroke,
    /// A raw triangle list authored directly, three vertices per triangle.
    Triangles,
    Glyphs,
}

/// Custom renderer selection recorded on a group: drawer id plus a byte
/// range inside the geometry's side buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CustomRenderInfo {
    pub drawer: u16,
    pub payload: PayloadRange,
}

impl CustomRenderInfo {
    #[inline]
    pub fn is_default(self) -> bool {
        self.drawer == 0
    }
}

/// A renderable run of sub-paths (or glyphs) sharing one style and blend
/// op. Groups are replayed by the canvas in order.
#[derive(Clone, Copy, Debug)]
pub struct RenderGroup {
    pub kind: GroupKind,
    pub style_index: u16,
    pub op: BlendOp,
    /// A convex fill renders as a single fan with no cover pass.
    pub convex: bool,

    pub first_path: u32,
    pub path_count: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub first_glyph: u32,
    pub glyph_count: u32,

    pub custom: CustomRenderInfo,

    pub bounds_min: Vector2F,
    pub bounds_max: Vector2F,
}

/// One glyph placed in local space. The quad corners are fixed at build
/// time; UVs and the atlas page are resolved by
/// [`Geometry::prepare_glyphs_for_rendering`] so that glyph cache rebuilds
/// never invalidate the geometry itself.
#[derive(Clone, Copy, Debug)]
pub struct RenderGlyph {
    pub key: GlyphKey,
    /// Quad corners in submission order: upper-left, upper-right,
    /// lower-right, lower-left. Four because the transform may rotate.
    pub coords: [Vector2F; 4],
    pub uv_min: Vector2F,
    pub uv_max: Vector2F,
    pub page: u32,
    /// Modulation color.
    pub color: ColorU,
}

/// Cached renderable geometry.
///
/// Exclusively owned by its builder while being written; shared-read and
/// immutable afterwards, except for the glyph UV refresh. Bounds cover
/// every vertex and glyph corner.
pub struct Geometry {
    pub(crate) styles: Vec<RenderStyle>,
    pub(crate) paths: Vec<SubPath>,
    pub(crate) groups: Vec<RenderGroup>,
    pub(crate) vertices: Vec<RenderVertex>,
    pub(crate) glyphs: Vec<RenderGlyph>,
    pub(crate) renderer_data: Vec<u8>,

    pub(crate) used_glyph_pages_mask: u64,
    pub(crate) glyph_cache_version: u32,

    pub(crate) bounds_min: Vector2F,
    pub(crate) bounds_max: Vector2F,
}

impl Geometry {
    pub fn new() -> Geometry {
        Geometry {
            styles: vec![],
            paths: vec![],
            groups: vec![],
            vertices: vec![],
            glyphs: vec![],
            renderer_data: vec![],
            used_glyph_pages_mask: 0,
            glyph_cache_version: 0,
            bounds_min: Vector2F::splat(f32::MAX),
            bounds_max: Vector2F::splat(f32::MIN),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.glyphs.is_empty()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn vertices(&self) -> &[RenderVertex] {
        &self.vertices
    }

    #[inline]
    pub fn paths(&self) -> &[SubPath] {
        &self.paths
    }

    #[inline]
    pub fn groups(&self) -> &[RenderGroup] {
        &self.groups
    }

    #[inline]
    pub fn glyphs(&self) -> &[RenderGlyph] {
        &self.glyphs
    }

    #[inline]
    pub fn styles(&self) -> &[RenderStyle] {
        &self.styles
    }

    #[inline]
    pub fn renderer_data(&self) -> &[u8] {
        &self.renderer_data
    }

    /// Bitmask of the glyph atlas pages referenced by any glyph, as of the
    /// last UV resolve.
    #[inline]
    pub fn glyph_pages_mask(&self) -> u64 {
        self.used_glyph_pages_mask
    }

    /// The glyph atlas version the stored UVs belong to.
    #[inline]
    pub fn glyph_cache_version(&self) -> u32 {
        self.glyph_cache_version
    }

    #[inline]
    pub fn bounds_min(&self) -> Vector2F {
        self.bounds_min
    }

    #[inline]
    pub fn bounds_max(&self) -> Vector2F {
        self.bounds_max
    }

    /// Removes all content but keeps the allocations for reuse.
    pub fn reset(&mut self) {
        self.styles.clear();
        self.paths.clear();
        self.groups.clear();
        self.vertices.clear();
        self.glyphs.clear();
        self.renderer_data.clear();
        self.used_glyph_pages_mask = 0;
        self.glyph_cache_version = 0;
        self.bounds_min = Vector2F::splat(f32::MAX);
        self.bounds_max = Vector2F::splat(f32::MIN);
    }

    /// Interns a style by content hash, returning its index in the style
    /// table.
    pub(crate) fn intern_style(&mut self, style: &RenderStyle) -> u16 {
        if let Some(index) = self
            .styles
            .iter()
            .position(|existing| existing.hash == style.hash && existing == style)
        {
            return index as u16;
        }
        assert!(self.styles.len() < u16::MAX as usize);
        self.styles.push(*style);
        (self.styles.len() - 1) as u16
    }

    pub(crate) fn union_bounds(&mut self, min: Vector2F, max: Vector2F) {
        self.bounds_min = self.bounds_min.min(min);
        self.bounds_max = self.bounds_max.max(max);
    }

    /// Makes sure every glyph is present in the atlas and carries current
    /// UVs. Cheap when the cached atlas version is still current. Must be
    /// called before submitting a glyph-bearing geometry to a canvas whose
    /// atlas has been rebuilt.
    pub fn prepare_glyphs_for_rendering(
        &mut self,
        atlas: &GlyphAtlas,
        rasterizer: &dyn FontRasterizer,
    ) {
        if self.glyphs.is_empty() {
            return;
        }

        let mut update = match atlas.begin_update(&mut self.glyph_cache_version) {
            Some(update) => update,
            None => return,
        };

        // An insertion can force an atlas rebuild mid-resolve, invalidating
        // placements already handed out in this pass; retry until the
        // version holds still.
        for attempt in 0.. {
            let version_before = update.version();
            let mut pages_mask = 0;

            for glyph in &mut self.glyphs {
                let placement = update.map_glyph(&glyph.key, rasterizer);
                glyph.uv_min = placement.uv_min;
                glyph.uv_max = placement.uv_max;
                glyph.page = placement.page;
                pages_mask |= 1 << placement.page;
            }

            if update.version() == version_before {
                self.used_glyph_pages_mask = pages_mask;
                self.glyph_cache_version = version_before;
                return;
            }

            if attempt == 2 {
                warn!(
                    "glyph atlas too small for a single geometry ({} glyphs); \
                     some UVs are stale",
                    self.glyphs.len()
                );
                self.used_glyph_pages_mask = pages_mask;
                self.glyph_cache_version = update.version();
                return;
            }
        }
    }
}

impl Default for Geometry {
    #[inline]
    fn default() -> Geometry {
        Geometry::new()
    }
}
