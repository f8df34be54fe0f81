// vellum/canvas/src/canvas.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The per-frame compositor. Accepts geometries, glyph runs and raw quads,
//! culls against the scissor, packs paints into the parameters array, and
//! emits the final flat vertex/index/batch stream for the renderer.
//!
//! Batches are emitted strictly in submission order; nothing is reordered.

use crate::baked::BakedGeometry;
use crate::builder::GeometryBuilder;
use crate::geometry::{Geometry, GroupKind, RenderGroup, RenderVertex};
use crate::storage::Storage;
use crate::PlaceError;
use arrayvec::ArrayVec;
use fxhash::FxHashMap;
use vellum_atlas::glyph::{GlyphAtlas, MAX_GLYPH_PAGES};
use vellum_color::ColorU;
use vellum_content::RenderStyle;
use vellum_geometry::transform2d::{Transform2F, TransformClass};
use vellum_geometry::vector::{vec2f, Vector2F};
use vellum_gpu::command::{CommandWriter, CustomDrawerRegistry};
use vellum_gpu::data::{
    Batch, BatchKind, BlendOp, ImageRef, ImageSource, PaintParams, PayloadRange, Vertex,
    NO_IMAGE, WRAP_CUSTOM_UV, WRAP_U, WRAP_V,
};

/// Glyph quads buffered between batch flushes.
const GLYPH_RING_CAPACITY: usize = 64;

/// Externally tessellated vertex data accepted by
/// [`Canvas::place_raw`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RawVertex {
    pub pos: Vector2F,
    pub uv: Vector2F,
    pub color: ColorU,
}

/// A view over externally built vertex/index data.
#[derive(Clone, Copy)]
pub struct RawGeometry<'a> {
    pub vertices: &'a [RawVertex],
    pub indices: &'a [u16],
}

/// The per-frame compositor.
///
/// A canvas is single-threaded and frame-scoped: it owns its vertex, index,
/// paint and batch pools for the duration of one frame and is cleared on
/// [`Canvas::clear`] or drop.
pub struct Canvas<'a> {
    glyph_atlas: &'a GlyphAtlas,
    custom_drawers: Option<&'a CustomDrawerRegistry>,

    width: f32,
    height: f32,

    pixel_offset: Vector2F,
    pixel_scale: f32,
    has_pixel_transform: bool,

    transform: Transform2F,
    transform_class: TransformClass,
    pixel_transform: Transform2F,
    pixel_transform_class: TransformClass,

    alpha: f32,

    scissor_rect: (Vector2F, Vector2F),
    scissor_stack: Vec<(Vector2F, Vector2F)>,
    pixel_scissor_rect: (Vector2F, Vector2F),
    scissor_shader_values: [f32; 4],
    empty_scissor: bool,

    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    params: Vec<PaintParams>,
    images: Vec<ImageRef>,
    batches: Vec<Batch>,
    payload: Vec<u8>,

    params_map: FxHashMap<(u64, u32), u32>,
    image_map: FxHashMap<ImageSource, u32>,
    style_mapping: Vec<i32>,

    glyph_page_params: [i32; MAX_GLYPH_PAGES as usize],
    mapped_glyph_pages: u64,

    culled_geometries: u32,
    culled_glyphs: u32,
}

impl<'a> Canvas<'a> {
    pub fn new(
        width: u32,
        height: u32,
        glyph_atlas: &'a GlyphAtlas,
        pixel_offset: Vector2F,
        pixel_scale: f32,
    ) -> Canvas<'a> {
        let mut canvas = Canvas {
            glyph_atlas,
            custom_drawers: None,
            width: width as f32,
            height: height as f32,
            pixel_offset,
            pixel_scale,
            has_pixel_transform: pixel_scale != 1.0 || !pixel_offset.is_zero(),
            transform: Transform2F::default(),
            transform_class: TransformClass::Identity,
            pixel_transform: Transform2F::default(),
            pixel_transform_class: TransformClass::Identity,
            alpha: 1.0,
            scissor_rect: (Vector2F::zero(), vec2f(width as f32, height as f32)),
            scissor_stack: vec![],
            pixel_scissor_rect: (Vector2F::zero(), Vector2F::zero()),
            scissor_shader_values: [0.0; 4],
            empty_scissor: false,
            vertices: vec![],
            indices: vec![],
            params: vec![],
            images: vec![],
            batches: vec![],
            payload: vec![],
            params_map: FxHashMap::default(),
            image_map: FxHashMap::default(),
            style_mapping: vec![],
            glyph_page_params: [-1; MAX_GLYPH_PAGES as usize],
            mapped_glyph_pages: 0,
            culled_geometries: 0,
            culled_glyphs: 0,
        };
        canvas.update_pixel_transform();
        canvas.update_scissor();
        canvas
    }

    /// Registers the drawer table used to validate custom batches.
    pub fn set_custom_drawers(&mut self, registry: &'a CustomDrawerRegistry) {
        self.custom_drawers = Some(registry);
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height
    }

    /// Number of whole geometries rejected by scissor culling so far.
    #[inline]
    pub fn culled_geometries(&self) -> u32 {
        self.culled_geometries
    }

    /// Number of individual glyphs rejected by scissor culling so far.
    #[inline]
    pub fn culled_glyphs(&self) -> u32 {
        self.culled_glyphs
    }

    // Frame output, in submission order.

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn params(&self) -> &[PaintParams] {
        &self.params
    }

    #[inline]
    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    #[inline]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Opaque payload bytes referenced by custom batches.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Discards the frame's output and restores the initial placement,
    /// alpha and scissor.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.params.clear();
        self.images.clear();
        self.batches.clear();
        self.payload.clear();
        self.params_map.clear();
        self.image_map.clear();
        self.glyph_page_params = [-1; MAX_GLYPH_PAGES as usize];
        self.mapped_glyph_pages = 0;

        self.alpha = 1.0;
        self.transform = Transform2F::default();
        self.update_pixel_transform();

        self.scissor_stack.clear();
        self.scissor_rect = (Vector2F::zero(), vec2f(self.width, self.height));
        self.update_scissor();
    }

    /// Sends the finished frame to the renderer.
    pub fn finish(&self, writer: &mut dyn CommandWriter) {
        writer.upload_vertices(&self.vertices);
        writer.upload_indices(&self.indices);
        writer.upload_params(&self.params);
        writer.upload_image_table(&self.images);
        writer.draw_batches(&self.batches, &self.payload);
    }

    // Placement

    /// Sets the placement transform applied to subsequently placed
    /// geometries.
    pub fn placement(&mut self, transform: Transform2F) {
        self.transform = transform;
        self.update_pixel_transform();
    }

    /// Convenience placement: translation plus uniform scale.
    pub fn placement_translated(&mut self, tx: f32, ty: f32, scale: f32) {
        self.placement(
            Transform2F::from_scale(Vector2F::splat(scale))
                .post_translate(vec2f(tx, ty)),
        );
    }

    /// Changes the surface pixel snapping applied on top of placement.
    pub fn pixel_placement(&mut self, pixel_offset: Vector2F, pixel_scale: f32) {
        if self.pixel_offset != pixel_offset || self.pixel_scale != pixel_scale {
            self.pixel_offset = pixel_offset;
            self.pixel_scale = pixel_scale;
            self.has_pixel_transform = pixel_scale != 1.0 || !pixel_offset.is_zero();
            self.update_pixel_transform();
            self.update_scissor();
        }
    }

    /// Alpha multiplier applied to every subsequently packed paint.
    #[inline]
    pub fn alpha_multiplier(&mut self, alpha: f32) {
        self.alpha = alpha;
    }

    fn update_pixel_transform(&mut self) {
        self.transform_class = self.transform.class();

        self.pixel_transform = if self.has_pixel_transform {
            self.transform
                .post_translate(self.pixel_offset)
                .post_scale(Vector2F::splat(self.pixel_scale))
        } else {
            self.transform
        };
        self.pixel_transform_class = self.pixel_transform.class();
    }

    // Scissor

    /// Restores the scissor to the full surface.
    pub fn reset_scissor(&mut self) {
        self.scissor_rect = (Vector2F::zero(), vec2f(self.width, self.height));
        self.update_scissor();
    }

    /// Saves the current scissor rectangle.
    pub fn push_scissor(&mut self) {
        self.scissor_stack.push(self.scissor_rect);
    }

    /// Restores the most recently pushed scissor rectangle.
    pub fn pop_scissor(&mut self) {
        match self.scissor_stack.pop() {
            Some(rect) => {
                self.scissor_rect = rect;
                self.update_scissor();
            }
            None => warn!("pop_scissor on an empty stack; ignored"),
        }
    }

    /// Replaces the scissor. Returns false if the new scissor is empty.
    pub fn set_scissor(&mut self, min: Vector2F, max: Vector2F) -> bool {
        self.scissor_rect = (min, max);
        self.update_scissor();
        !self.empty_scissor
    }

    /// Intersects the scissor with the given bounds. Returns false if the
    /// result is empty; emission stays suppressed until the scissor grows
    /// again (typically via `pop_scissor`).
    pub fn intersect_scissor(&mut self, min: Vector2F, max: Vector2F) -> bool {
        self.scissor_rect.0 = self.scissor_rect.0.max(min);
        self.scissor_rect.1 = self.scissor_rect.1.min(max);
        self.update_scissor();
        !self.empty_scissor
    }

    #[inline]
    pub fn is_scissor_empty(&self) -> bool {
        self.empty_scissor
    }

    /// Tests canvas-space bounds against the current scissor.
    pub fn test_scissor_bounds(&self, min: Vector2F, max: Vector2F) -> bool {
        !(min.x > self.scissor_rect.1.x
            || min.y > self.scissor_rect.1.y
            || max.x < self.scissor_rect.0.x
            || max.y < self.scissor_rect.0.y)
    }

    fn update_scissor(&mut self) {
        let (min, max) = self.scissor_rect;
        let (pixel_min, pixel_max) = if self.has_pixel_transform {
            (
                (min + self.pixel_offset).scale(self.pixel_scale),
                (max + self.pixel_offset).scale(self.pixel_scale),
            )
        } else {
            (min, max)
        };
        self.pixel_scissor_rect = (pixel_min, pixel_max);

        if pixel_max.x >= pixel_min.x + 1.0 && pixel_max.y > pixel_min.y + 1.0 {
            self.empty_scissor = false;
            let extents = (pixel_max - pixel_min).scale(0.5);
            // Encoded as (-center, 1/half-extent): fragment culling is one
            // multiply-add on the precomputed clip UV.
            self.scissor_shader_values = [
                -(pixel_min.x + extents.x),
                -(pixel_min.y + extents.y),
                1.0 / extents.x,
                1.0 / extents.y,
            ];
        } else {
            self.empty_scissor = true;
            self.scissor_shader_values = [0.0; 4];
        }
    }

    fn test_pixel_scissor(&self, min: Vector2F, max: Vector2F) -> bool {
        !(min.x > self.pixel_scissor_rect.1.x
            || min.y > self.pixel_scissor_rect.1.y
            || max.x < self.pixel_scissor_rect.0.x
            || max.y < self.pixel_scissor_rect.0.y)
    }

    fn transform_bounds(&self, min: Vector2F, max: Vector2F) -> (Vector2F, Vector2F) {
        match self.transform_class {
            TransformClass::Identity => (min, max),
            TransformClass::Translation => {
                let t = self.transform.translation();
                (min + t, max + t)
            }
            TransformClass::General => {
                let corners = [
                    self.transform.transform_point(min),
                    self.transform.transform_point(vec2f(max.x, min.y)),
                    self.transform.transform_point(max),
                    self.transform.transform_point(vec2f(min.x, max.y)),
                ];
                let mut out_min = corners[0];
                let mut out_max = corners[0];
                for corner in &corners[1..] {
                    out_min = out_min.min(*corner);
                    out_max = out_max.max(*corner);
                }
                (out_min, out_max)
            }
        }
    }

    // Paint packing

    fn pack_image_ref(&mut self, source: ImageSource, needs_wrapping: bool) -> u32 {
        if let Some(&index) = self.image_map.get(&source) {
            if needs_wrapping {
                self.images[index as usize].needs_wrapping = true;
            }
            return index;
        }
        let index = self.images.len() as u32;
        self.images.push(ImageRef { source, needs_wrapping });
        self.image_map.insert(source, index);
        index
    }

    /// Packs one paint parameters row, interning by `(style hash, alpha)`.
    fn pack_params(&mut self, style: &RenderStyle, alpha: f32) -> u32 {
        let key = (style.hash, alpha.to_bits());
        if let Some(&id) = self.params_map.get(&key) {
            return id;
        }

        let mut row = PaintParams {
            inner_color: style.inner_color.to_linear().premultiply(alpha),
            outer_color: style.outer_color.to_linear().premultiply(alpha),
            base: style.base,
            extent: style.extent,
            ..PaintParams::default()
        };

        if style.wrap_u {
            row.wrap_type |= WRAP_U;
        }
        if style.wrap_v {
            row.wrap_type |= WRAP_V;
        }
        if style.custom_uv {
            row.wrap_type |= WRAP_CUSTOM_UV;
        }

        match style.image {
            None => {
                row.radius = style.radius;
                row.feather = style.feather;
                row.feather_half = style.feather * 0.5;
                row.feather_inv = 1.0 / f32::max(0.0001, style.feather);
                row.uv_min = Vector2F::zero();
                row.uv_max = Vector2F::splat(1.0);
                row.image_ref = NO_IMAGE;
            }
            Some(entry) => {
                row.uv_min = style.uv_min;
                row.uv_max = style.uv_max;
                row.image_ref = self.pack_image_ref(
                    ImageSource::AtlasPage { atlas: entry.atlas, page: entry.page },
                    style.wrap_u | style.wrap_v,
                );
            }
        }

        let id = self.params.len() as u32;
        self.params.push(row);
        self.params_map.insert(key, id);
        id
    }

    /// A parameters row that samples a glyph page directly through the
    /// vertex UV.
    fn pack_direct_texture_params(&mut self, page: u32) -> u32 {
        let image_ref = self.pack_image_ref(ImageSource::GlyphPage { page }, false);
        let id = self.params.len() as u32;
        self.params.push(PaintParams {
            wrap_type: WRAP_CUSTOM_UV,
            image_ref,
            ..PaintParams::default()
        });
        id
    }

    fn map_new_glyph_pages(&mut self, mut new_pages: u64) {
        while new_pages != 0 {
            let page = new_pages.trailing_zeros();
            let params_id = self.pack_direct_texture_params(page);
            self.glyph_page_params[page as usize] = params_id as i32;
            self.mapped_glyph_pages |= 1 << page;
            new_pages &= new_pages - 1;
        }
    }

    // Vertex and index packing

    fn calc_scissor_uv(&self, vertex: &mut Vertex) {
        let [sx, sy, sz, sw] = self.scissor_shader_values;
        vertex.clip_uv = vec2f((vertex.pos.x + sx) * sz, (vertex.pos.y + sy) * sw);
    }

    fn pack_vertices(&mut self, source: &[RenderVertex], params_id: u16) -> u32 {
        let first_vertex = self.vertices.len() as u32;
        match self.pixel_transform_class {
            TransformClass::Identity => {
                for src in source {
                    let mut vertex = Vertex {
                        pos: src.pos,
                        uv: src.uv,
                        paint_uv: src.paint_uv,
                        clip_uv: Vector2F::zero(),
                        color: ColorU::white(),
                        params_id,
                        padding: 0,
                    };
                    self.calc_scissor_uv(&mut vertex);
                    self.vertices.push(vertex);
                }
            }
            TransformClass::Translation => {
                let t = self.pixel_transform.translation();
                for src in source {
                    let mut vertex = Vertex {
                        pos: vec2f(src.pos.x + t.x, src.pos.y + t.y),
                        uv: src.uv,
                        paint_uv: src.paint_uv,
                        clip_uv: Vector2F::zero(),
                        color: ColorU::white(),
                        params_id,
                        padding: 0,
                    };
                    self.calc_scissor_uv(&mut vertex);
                    self.vertices.push(vertex);
                }
            }
            TransformClass::General => {
                for src in source {
                    let mut vertex = Vertex {
                        pos: self.pixel_transform.transform_point(src.pos),
                        uv: src.uv,
                        paint_uv: src.paint_uv,
                        clip_uv: Vector2F::zero(),
                        color: ColorU::white(),
                        params_id,
                        padding: 0,
                    };
                    self.calc_scissor_uv(&mut vertex);
                    self.vertices.push(vertex);
                }
            }
        }
        first_vertex
    }

    fn pack_raw_vertices(&mut self, source: &[RawVertex], params_id: u16) -> u32 {
        let first_vertex = self.vertices.len() as u32;
        for src in source {
            let pos = match self.pixel_transform_class {
                TransformClass::Identity => src.pos,
                TransformClass::Translation => src.pos + self.pixel_transform.translation(),
                TransformClass::General => self.pixel_transform.transform_point(src.pos),
            };
            let mut vertex = Vertex {
                pos,
                uv: src.uv,
                paint_uv: src.uv,
                clip_uv: Vector2F::zero(),
                color: src.color,
                params_id,
                padding: 0,
            };
            self.calc_scissor_uv(&mut vertex);
            self.vertices.push(vertex);
        }
        first_vertex
    }

    /// Fan triangulation over `count` perimeter vertices.
    fn pack_triangle_fan(&mut self, base_vertex: u32, count: u32) -> u32 {
        let first_index = self.indices.len() as u32;
        for j in 2..count {
            self.indices.push(base_vertex);
            self.indices.push(base_vertex + j - 1);
            self.indices.push(base_vertex + j);
        }
        first_index
    }

    /// Triangle-strip expansion over `count` vertices.
    fn pack_triangle_strip(&mut self, base_vertex: u32, count: u32) -> u32 {
        let first_index = self.indices.len() as u32;
        for j in 2..count {
            if j & 1 == 1 {
                self.indices.push(base_vertex + j);
                self.indices.push(base_vertex + j - 1);
                self.indices.push(base_vertex + j - 2);
            } else {
                self.indices.push(base_vertex + j - 2);
                self.indices.push(base_vertex + j - 1);
                self.indices.push(base_vertex + j);
            }
        }
        first_index
    }

    /// Triangle-strip expansion that also closes the strip back onto its
    /// first vertex pair (fill fringes are closed rings).
    fn pack_triangle_strip_loop(&mut self, base_vertex: u32, count: u32) -> u32 {
        let first_index = self.pack_triangle_strip(base_vertex, count);
        if count >= 4 {
            self.indices.push(base_vertex + count - 2);
            self.indices.push(base_vertex + count - 1);
            self.indices.push(base_vertex);
            self.indices.push(base_vertex + count - 1);
            self.indices.push(base_vertex + 1);
            self.indices.push(base_vertex);
        }
        first_index
    }

    /// Two triangles per four-vertex quad.
    fn pack_triangle_quads(&mut self, base_vertex: u32, quad_count: u32) -> u32 {
        let first_index = self.indices.len() as u32;
        const QUAD_PATTERN: [u32; 6] = [0, 1, 2, 0, 2, 3];
        for quad in 0..quad_count {
            for &offset in &QUAD_PATTERN {
                self.indices.push(base_vertex + quad * 4 + offset);
            }
        }
        first_index
    }

    /// Raw triangle list: vertices are already in triangle order.
    fn pack_sequential(&mut self, base_vertex: u32, count: u32) -> u32 {
        let first_index = self.indices.len() as u32;
        for j in 0..count {
            self.indices.push(base_vertex + j);
        }
        first_index
    }

    // Batch emission

    /// Resolves the batch kind and payload for a group's custom drawer, or
    /// `None` if the drawer is unregistered and the batch must be dropped.
    fn resolve_custom(
        &mut self,
        geometry: &Geometry,
        group: &RenderGroup,
    ) -> Option<(u16, PayloadRange)> {
        if group.custom.is_default() {
            return Some((0, PayloadRange::default()));
        }

        let registered = self
            .custom_drawers
            .map_or(false, |registry| registry.is_registered(group.custom.drawer));
        if !registered {
            warn!(
                "unknown custom drawer {}; dropping batch",
                group.custom.drawer
            );
            return None;
        }

        let payload = &geometry.renderer_data[group.custom.payload.offset as usize
            ..(group.custom.payload.offset + group.custom.payload.size) as usize];
        let offset = self.payload.len() as u32;
        self.payload.extend_from_slice(payload);
        Some((group.custom.drawer, PayloadRange { offset, size: payload.len() as u32 }))
    }

    fn push_batch(
        &mut self,
        first_index: u32,
        op: BlendOp,
        kind: BatchKind,
        custom: (u16, PayloadRange),
    ) {
        let index_count = self.indices.len() as u32 - first_index;
        if index_count == 0 {
            return;
        }
        let kind = if custom.0 != 0 { BatchKind::Custom } else { kind };
        self.batches.push(Batch {
            first_index,
            index_count,
            op,
            kind,
            custom_drawer: custom.0,
            custom_payload: custom.1,
        });
    }

    // Geometry submission

    /// Submits a prepared geometry under the current placement, scissor and
    /// alpha. Culled geometries emit nothing.
    pub fn place(&mut self, geometry: &Geometry) {
        if self.empty_scissor || geometry.is_empty() {
            return;
        }

        let (bounds_min, bounds_max) =
            self.transform_bounds(geometry.bounds_min(), geometry.bounds_max());
        if !self.test_scissor_bounds(bounds_min, bounds_max) {
            self.culled_geometries += 1;
            return;
        }

        if !geometry.glyphs.is_empty()
            && geometry.glyph_cache_version() != self.glyph_atlas.version()
        {
            warn!(
                "glyph UVs are stale (geometry version {}, atlas version {}); \
                 call prepare_glyphs_for_rendering before placing",
                geometry.glyph_cache_version(),
                self.glyph_atlas.version()
            );
        }

        let new_pages = geometry.glyph_pages_mask() & !self.mapped_glyph_pages;
        if new_pages != 0 {
            self.map_new_glyph_pages(new_pages);
        }

        self.style_mapping.clear();
        self.style_mapping.resize(geometry.styles().len(), -1);

        for group_index in 0..geometry.groups().len() {
            let group = geometry.groups()[group_index];

            let params_id = if group.kind != GroupKind::Glyphs {
                let style_slot = group.style_index as usize;
                let mapped = self.style_mapping[style_slot];
                if mapped >= 0 {
                    mapped as u32
                } else {
                    let style = geometry.styles()[style_slot];
                    let id = self.pack_params(&style, self.alpha);
                    self.style_mapping[style_slot] = id as i32;
                    id
                }
            } else {
                0
            };
            assert!(params_id <= u16::MAX as u32);

            match group.kind {
                GroupKind::Fill => self.render_fill(geometry, &group, params_id as u16),
                GroupKind::Stroke => self.render_stroke(geometry, &group, params_id as u16),
                GroupKind::Triangles => {
                    self.render_triangles(geometry, &group, params_id as u16)
                }
                GroupKind::Glyphs => self.render_glyphs(geometry, &group),
            }
        }
    }

    /// Convenience: finishes a builder, places the resulting geometry, and
    /// hands the geometry back for reuse. Equivalent to `into_geometry`
    /// followed by [`Canvas::place`].
    pub fn place_builder(&mut self, builder: GeometryBuilder) -> Geometry {
        let geometry = builder.into_geometry();
        self.place(&geometry);
        geometry
    }

    fn render_fill(&mut self, geometry: &Geometry, group: &RenderGroup, params_id: u16) {
        let custom = match self.resolve_custom(geometry, group) {
            Some(custom) => custom,
            None => return,
        };

        let range = group.first_vertex as usize..(group.first_vertex + group.vertex_count) as usize;
        let base = self.pack_vertices(&geometry.vertices()[range], params_id);

        let paths = &geometry.paths()
            [group.first_path as usize..(group.first_path + group.path_count) as usize];

        if group.convex {
            // One batch covers the fan and its fringe ring.
            let first_index = self.indices.len() as u32;
            for sub_path in paths {
                if sub_path.fill_count > 0 {
                    let at = base + (sub_path.first_fill_vertex - group.first_vertex);
                    self.pack_triangle_fan(at, sub_path.fill_count);
                }
            }
            for sub_path in paths {
                if sub_path.stroke_count > 0 {
                    let at = base + (sub_path.first_stroke_vertex - group.first_vertex);
                    self.pack_triangle_strip_loop(at, sub_path.stroke_count);
                }
            }
            self.push_batch(first_index, group.op, BatchKind::ConvexFill, custom);
            return;
        }

        // Stencil masks per sub-path.
        for sub_path in paths {
            if sub_path.fill_count > 0 {
                let at = base + (sub_path.first_fill_vertex - group.first_vertex);
                let first_index = self.pack_triangle_fan(at, sub_path.fill_count);
                self.push_batch(first_index, group.op, BatchKind::ConcaveMask, custom);
            }
        }

        // The cover quad is the last four vertices of the group.
        let cover_base = base + group.vertex_count - 4;
        let first_index = self.pack_triangle_fan(cover_base, 4);
        self.push_batch(first_index, group.op, BatchKind::ConcaveFill, custom);

        // Fringe strips render on top as plain geometry.
        let first_index = self.indices.len() as u32;
        for sub_path in paths {
            if sub_path.stroke_count > 0 {
                let at = base + (sub_path.first_stroke_vertex - group.first_vertex);
                self.pack_triangle_strip_loop(at, sub_path.stroke_count);
            }
        }
        self.push_batch(first_index, group.op, BatchKind::ConvexFill, custom);
    }

    fn render_stroke(&mut self, geometry: &Geometry, group: &RenderGroup, params_id: u16) {
        let custom = match self.resolve_custom(geometry, group) {
            Some(custom) => custom,
            None => return,
        };

        let range = group.first_vertex as usize..(group.first_vertex + group.vertex_count) as usize;
        let base = self.pack_vertices(&geometry.vertices()[range], params_id);

        let paths = &geometry.paths()
            [group.first_path as usize..(group.first_path + group.path_count) as usize];

        let first_index = self.indices.len() as u32;
        for sub_path in paths {
            if sub_path.stroke_count > 0 {
                let at = base + (sub_path.first_stroke_vertex - group.first_vertex);
                self.pack_triangle_strip(at, sub_path.stroke_count);
            }
        }
        self.push_batch(first_index, group.op, BatchKind::ConvexFill, custom);
    }

    fn render_triangles(&mut self, geometry: &Geometry, group: &RenderGroup, params_id: u16) {
        let custom = match self.resolve_custom(geometry, group) {
            Some(custom) => custom,
            None => return,
        };

        let range = group.first_vertex as usize..(group.first_vertex + group.vertex_count) as usize;
        let base = self.pack_vertices(&geometry.vertices()[range], params_id);
        let first_index = self.pack_sequential(base, group.vertex_count);
        self.push_batch(first_index, group.op, BatchKind::ConvexFill, custom);
    }

    fn render_glyphs(&mut self, geometry: &Geometry, group: &RenderGroup) {
        let mut ring: ArrayVec<[Vertex; GLYPH_RING_CAPACITY * 4]> = ArrayVec::new();
        let mut ring_page = None;

        let glyphs = &geometry.glyphs()
            [group.first_glyph as usize..(group.first_glyph + group.glyph_count) as usize];

        for glyph in glyphs {
            let mut pos = glyph.coords;
            if self.pixel_transform_class == TransformClass::General {
                for corner in &mut pos {
                    *corner = self.pixel_transform.transform_point(*corner);
                }
            } else {
                let t = self.pixel_transform.translation();
                for corner in &mut pos {
                    *corner = *corner + t;
                }
            }

            let quad_min = pos[0].min(pos[2]);
            let quad_max = pos[0].max(pos[2]);
            if !self.test_pixel_scissor(quad_min, quad_max) {
                self.culled_glyphs += 1;
                continue;
            }

            // A draw samples exactly one page; page changes force a flush.
            if ring.is_full() || (ring_page.is_some() && ring_page != Some(glyph.page)) {
                self.flush_glyph_ring(&mut ring);
                ring_page = None;
            }

            let params_id = self.glyph_page_params[glyph.page as usize];
            debug_assert!(
                params_id >= 0,
                "glyph page {} not mapped; was prepare_glyphs_for_rendering called?",
                glyph.page
            );
            if params_id < 0 {
                continue;
            }
            ring_page = Some(glyph.page);

            let color = modulate(glyph.color, self.alpha);
            let uvs = [
                glyph.uv_min,
                vec2f(glyph.uv_max.x, glyph.uv_min.y),
                glyph.uv_max,
                vec2f(glyph.uv_min.x, glyph.uv_max.y),
            ];
            for i in 0..4 {
                let mut vertex = Vertex {
                    pos: pos[i],
                    uv: uvs[i],
                    paint_uv: uvs[i],
                    clip_uv: Vector2F::zero(),
                    color,
                    params_id: params_id as u16,
                    padding: 0,
                };
                self.calc_scissor_uv(&mut vertex);
                ring.push(vertex);
            }
        }

        self.flush_glyph_ring(&mut ring);
    }

    /// Glyph batches always composite `SourceOver`.
    fn flush_glyph_ring(&mut self, ring: &mut ArrayVec<[Vertex; GLYPH_RING_CAPACITY * 4]>) {
        if ring.is_empty() {
            return;
        }

        let base_vertex = self.vertices.len() as u32;
        self.vertices.extend_from_slice(ring);
        let quad_count = ring.len() as u32 / 4;
        let first_index = self.pack_triangle_quads(base_vertex, quad_count);
        self.push_batch(
            first_index,
            BlendOp::SourceOver,
            BatchKind::ConvexFill,
            (0, PayloadRange::default()),
        );
        ring.clear();
    }

    // Raw geometry

    /// Places externally built vertex/index data under the given style.
    /// With a non-zero `custom_drawer` the batch is routed to that drawer,
    /// carrying a copy of `payload`.
    pub fn place_raw(
        &mut self,
        style: &RenderStyle,
        geometry: RawGeometry,
        custom_drawer: u16,
        payload: &[u8],
        op: BlendOp,
        alpha: f32,
    ) {
        if self.empty_scissor {
            return;
        }
        if geometry.indices.is_empty() || geometry.vertices.is_empty() {
            return;
        }

        if custom_drawer != 0 {
            let registered = self
                .custom_drawers
                .map_or(false, |registry| registry.is_registered(custom_drawer));
            if !registered {
                warn!("unknown custom drawer {}; dropping batch", custom_drawer);
                return;
            }
        }

        let params_id = self.pack_params(style, self.alpha * alpha);
        assert!(params_id <= u16::MAX as u32);

        // Tightly pack only the vertex range the indices actually use.
        let mut min_vertex = u16::MAX;
        let mut max_vertex = 0;
        for &index in geometry.indices {
            min_vertex = min_vertex.min(index);
            max_vertex = max_vertex.max(index);
        }
        debug_assert!(min_vertex <= max_vertex);

        let base_vertex = self.pack_raw_vertices(
            &geometry.vertices[min_vertex as usize..=max_vertex as usize],
            params_id as u16,
        );

        let first_index = self.indices.len() as u32;
        for &index in geometry.indices {
            self.indices
                .push(base_vertex + (index - min_vertex) as u32);
        }

        let custom_payload = if custom_drawer != 0 && !payload.is_empty() {
            let offset = self.payload.len() as u32;
            self.payload.extend_from_slice(payload);
            PayloadRange { offset, size: payload.len() as u32 }
        } else {
            PayloadRange::default()
        };

        self.push_batch(
            first_index,
            op,
            BatchKind::ConvexFill,
            (custom_drawer, custom_payload),
        );
    }

    /// Draws an axis-aligned quad with the given style and UVs.
    pub fn custom_quad(
        &mut self,
        style: &RenderStyle,
        min: Vector2F,
        max: Vector2F,
        uv_min: Vector2F,
        uv_max: Vector2F,
        color: ColorU,
        op: BlendOp,
    ) {
        let vertices = [
            RawVertex { pos: min, uv: uv_min, color },
            RawVertex { pos: vec2f(max.x, min.y), uv: vec2f(uv_max.x, uv_min.y), color },
            RawVertex { pos: max, uv: uv_max, color },
            RawVertex { pos: vec2f(min.x, max.y), uv: vec2f(uv_min.x, uv_max.y), color },
        ];
        let indices = [0, 1, 2, 0, 2, 3];
        self.place_raw(
            style,
            RawGeometry { vertices: &vertices, indices: &indices },
            0,
            &[],
            op,
            1.0,
        );
    }

    /// Draws a quad through a registered custom drawer.
    pub fn custom_quad_drawer(
        &mut self,
        custom_drawer: u16,
        payload: &[u8],
        min: Vector2F,
        max: Vector2F,
        uv_min: Vector2F,
        uv_max: Vector2F,
        color: ColorU,
        op: BlendOp,
    ) {
        let style = vellum_content::solid_color(ColorU::white());
        let vertices = [
            RawVertex { pos: min, uv: uv_min, color },
            RawVertex { pos: vec2f(max.x, min.y), uv: vec2f(uv_max.x, uv_min.y), color },
            RawVertex { pos: max, uv: uv_max, color },
            RawVertex { pos: vec2f(min.x, max.y), uv: vec2f(uv_min.x, uv_max.y), color },
        ];
        let indices = [0, 1, 2, 0, 2, 3];
        self.place_raw(
            &style,
            RawGeometry { vertices: &vertices, indices: &indices },
            custom_drawer,
            payload,
            op,
            1.0,
        );
    }

    // Baked geometry

    /// Appends a baked geometry to the frame. Fails without emitting
    /// anything if the baked data no longer matches the storage's atlas
    /// layout.
    pub fn place_baked(
        &mut self,
        baked: &BakedGeometry,
        storage: &Storage,
    ) -> Result<(), PlaceError> {
        if baked.atlas_version() != storage.layout_version() {
            return Err(PlaceError::StaleBakedGeometry);
        }

        if self.empty_scissor {
            return Ok(());
        }

        let (bounds_min, bounds_max) =
            self.transform_bounds(baked.bounds_min(), baked.bounds_max());
        if !self.test_scissor_bounds(bounds_min, bounds_max) {
            self.culled_geometries += 1;
            return Ok(());
        }

        let vertex_base = self.vertices.len() as u32;
        let index_base = self.indices.len() as u32;
        let params_base = self.params.len() as u32;
        let image_base = self.images.len() as u32;
        let payload_base = self.payload.len() as u32;

        assert!(params_base + baked.params().len() as u32 <= u16::MAX as u32);

        for src in baked.vertices() {
            let pos = match self.pixel_transform_class {
                TransformClass::Identity => src.pos,
                TransformClass::Translation => src.pos + self.pixel_transform.translation(),
                TransformClass::General => self.pixel_transform.transform_point(src.pos),
            };
            let mut vertex = Vertex {
                pos,
                params_id: src.params_id + params_base as u16,
                ..*src
            };
            self.calc_scissor_uv(&mut vertex);
            self.vertices.push(vertex);
        }

        for &index in baked.indices() {
            self.indices.push(index + vertex_base);
        }

        for row in baked.params() {
            let mut row = *row;
            if row.image_ref != NO_IMAGE {
                row.image_ref += image_base;
            }
            self.params.push(row);
        }

        self.images.extend_from_slice(baked.images());
        self.payload.extend_from_slice(baked.payload());

        for batch in baked.batches() {
            let mut batch = *batch;
            batch.first_index += index_base;
            if !batch.custom_payload.is_empty() {
                batch.custom_payload.offset += payload_base;
            }
            self.batches.push(batch);
        }

        Ok(())
    }
}

fn modulate(color: ColorU, alpha: f32) -> ColorU {
    if alpha >= 1.0 {
        color
    } else {
        let a = (color.a as f32 * alpha).round().max(0.0).min(255.0) as u8;
        color.with_alpha(a)
    }
}
