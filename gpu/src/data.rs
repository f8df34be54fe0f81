// vellum/gpu/src/data.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Flat data the canvas hands to the renderer: vertices, draw batches and
//! the paint parameters array.

use vellum_color::{ColorF, ColorU};
use vellum_geometry::vector::Vector2F;

/// Sentinel for a paint parameters row that samples no image.
pub const NO_IMAGE: u32 = !0;

/// Wrap bit: repeat the paint horizontally.
pub const WRAP_U: u32 = 1;
/// Wrap bit: repeat the paint vertically.
pub const WRAP_V: u32 = 2;
/// Wrap bit: sample with the vertex UV directly instead of the paint
/// transform (glyph pages and raw quads).
pub const WRAP_CUSTOM_UV: u32 = 4;

/// One renderer-facing vertex. `clip_uv` holds the precomputed scissor
/// coordinate so fragment culling is a single multiply-add.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Vertex {
    pub pos: Vector2F,
    pub uv: Vector2F,
    pub paint_uv: Vector2F,
    pub clip_uv: Vector2F,
    pub color: ColorU,
    pub params_id: u16,
    pub padding: u16,
}

/// Raster composite operation, determining how source pixels are mixed with
/// the destination. Implemented with the classical blend factor scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendOp {
    /// Src=One, Dest=Zero. Values are copied directly.
    Copy,
    /// Src=SrcAlpha, Dest=1-SrcAlpha. Straight alpha blending; prefer
    /// `SourceOver` where the source is premultiplied.
    Blend,
    /// Src=One, Dest=1-SrcAlpha. Composition of premultiplied images.
    SourceOver,
    /// Src=DestAlpha, Dest=Zero.
    SourceIn,
    /// Src=1-DestAlpha, Dest=Zero.
    SourceOut,
    /// Src=DestAlpha, Dest=1-SrcAlpha.
    SourceAtop,
    /// Src=1-DestAlpha, Dest=One.
    DestinationOver,
    /// Src=Zero, Dest=SrcAlpha.
    DestinationIn,
    /// Src=Zero, Dest=1-SrcAlpha.
    DestinationOut,
    /// Src=1-DestAlpha, Dest=SrcAlpha.
    DestinationAtop,
    /// Src=One, Dest=One.
    Additive,
    /// Src=1-DestAlpha, Dest=1-SrcAlpha.
    Xor,
}

impl Default for BlendOp {
    #[inline]
    fn default() -> BlendOp {
        BlendOp::SourceOver
    }
}

/// How a batch's triangles are to be rasterized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchKind {
    /// Plain triangles, no stencil involved.
    ConvexFill,
    /// Stencil increment/decrement pass of a concave fill.
    ConcaveMask,
    /// Cover pass writing color where the stencil is non-zero.
    ConcaveFill,
    /// Handled by an externally registered drawer.
    Custom,
}

/// A byte range inside the custom-renderer side buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadRange {
    pub offset: u32,
    pub size: u32,
}

impl PayloadRange {
    #[inline]
    pub fn is_empty(self) -> bool {
        self.size == 0
    }
}

/// One draw call. Batches are consumed strictly in submission order.
#[derive(Clone, Copy, Debug)]
pub struct Batch {
    pub first_index: u32,
    pub index_count: u32,
    pub op: BlendOp,
    pub kind: BatchKind,
    pub custom_drawer: u16,
    pub custom_payload: PayloadRange,
}

impl Batch {
    #[inline]
    pub fn new(first_index: u32, index_count: u32, op: BlendOp, kind: BatchKind) -> Batch {
        Batch {
            first_index,
            index_count,
            op,
            kind,
            custom_drawer: 0,
            custom_payload: PayloadRange::default(),
        }
    }
}

/// One row of the paint parameters array. Colors are premultiplied and in
/// linear space; the feather derivatives are precomputed so the fragment
/// shader never divides.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct PaintParams {
    pub inner_color: ColorF,
    pub outer_color: ColorF,
    pub base: Vector2F,
    pub extent: Vector2F,
    pub uv_min: Vector2F,
    pub uv_max: Vector2F,
    pub wrap_type: u32,
    pub radius: f32,
    pub feather: f32,
    pub feather_half: f32,
    pub feather_inv: f32,
    pub image_ref: u32,
}

impl Default for PaintParams {
    fn default() -> PaintParams {
        PaintParams {
            inner_color: ColorF::white(),
            outer_color: ColorF::white(),
            base: Vector2F::zero(),
            extent: Vector2F::zero(),
            uv_min: Vector2F::zero(),
            uv_max: Vector2F::splat(1.0),
            wrap_type: 0,
            radius: 0.0,
            feather: 0.0,
            feather_half: 0.0,
            feather_inv: 0.0,
            image_ref: NO_IMAGE,
        }
    }
}

/// What texture an image reference resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// A page of an image atlas, by atlas index and page index.
    AtlasPage { atlas: u32, page: u32 },
    /// A page of the glyph atlas.
    GlyphPage { page: u32 },
}

/// One entry of the per-frame image reference table. Identical images used by
/// several paints share a single entry.
#[derive(Clone, Copy, Debug)]
pub struct ImageRef {
    pub source: ImageSource,
    pub needs_wrapping: bool,
}
