// vellum/canvas/src/storage.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The storage facade: owns the image atlases and the glyph atlas, bakes
//! geometries against them, and reports atlas rebuilds so callers know when
//! cached bakes must be regenerated.

use crate::baked::BakedGeometry;
use crate::canvas::Canvas;
use crate::geometry::Geometry;
use std::sync::Arc;
use vellum_atlas::glyph::{FontRasterizer, GlyphAtlas};
use vellum_atlas::image::{ImageAtlas, ImageData, ImageEntry, ImageId};
use vellum_atlas::AtlasError;
use vellum_geometry::vector::Vector2F;

/// Index of an image atlas created through a [`Storage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageAtlasIndex(pub u32);

/// Half-extent of the unclipped surface used when baking.
const BAKE_EXTENT: f32 = (1 << 22) as f32;

/// Owns the texture atlases backing a set of canvases and baked
/// geometries.
///
/// Keep images of different lifetimes in separate atlases (static UI icons
/// in one, dynamic thumbnails in another) so churn in one does not rebuild
/// the other.
pub struct Storage {
    image_atlases: Vec<Option<ImageAtlas>>,
    glyph_atlas: GlyphAtlas,
    last_layout_version: u64,
}

impl Storage {
    pub fn new(glyph_page_size: i32, glyph_page_count: u32) -> Storage {
        let mut storage = Storage {
            image_atlases: vec![],
            glyph_atlas: GlyphAtlas::new(glyph_page_size, glyph_page_count),
            last_layout_version: 0,
        };
        storage.last_layout_version = storage.layout_version();
        storage
    }

    #[inline]
    pub fn glyph_atlas(&self) -> &GlyphAtlas {
        &self.glyph_atlas
    }

    /// Creates an image atlas and returns its index.
    pub fn create_atlas(
        &mut self,
        page_size: i32,
        page_count: u32,
        debug_name: &str,
    ) -> ImageAtlasIndex {
        let index = match self.image_atlases.iter().position(|slot| slot.is_none()) {
            Some(index) => index,
            None => {
                self.image_atlases.push(None);
                self.image_atlases.len() - 1
            }
        };
        let atlas = ImageAtlas::new(index as u32, page_size, page_count, debug_name);
        // A new atlas contributes its initial version to the combined
        // layout; creating one is not a rebuild.
        self.last_layout_version += atlas.version() as u64;
        self.image_atlases[index] = Some(atlas);
        ImageAtlasIndex(index as u32)
    }

    /// Destroys an atlas. Entries pointing into it become dangling; callers
    /// are expected to have dropped them.
    pub fn destroy_atlas(&mut self, index: ImageAtlasIndex) {
        match self.image_atlases.get_mut(index.0 as usize) {
            Some(slot) if slot.is_some() => {
                let version = slot.as_ref().unwrap().version() as u64;
                self.last_layout_version = self.last_layout_version.saturating_sub(version);
                *slot = None;
            }
            _ => warn!("destroy_atlas: no atlas at index {}", index.0),
        }
    }

    #[inline]
    pub fn image_atlas(&self, index: ImageAtlasIndex) -> Option<&ImageAtlas> {
        self.image_atlases
            .get(index.0 as usize)
            .and_then(|slot| slot.as_ref())
    }

    /// Places an image in the given atlas. Fails with `OutOfAtlasSpace` if
    /// it cannot fit even after a rebuild.
    pub fn register_image(
        &self,
        index: ImageAtlasIndex,
        data: Arc<ImageData>,
        wrap_eligible: bool,
        border: i32,
    ) -> Result<ImageEntry, AtlasError> {
        match self.image_atlas(index) {
            Some(atlas) => atlas.register_image(data, wrap_eligible, border),
            None => Err(AtlasError::OutOfAtlasSpace),
        }
    }

    pub fn unregister_image(&self, index: ImageAtlasIndex, id: ImageId) {
        if let Some(atlas) = self.image_atlas(index) {
            atlas.unregister_image(id);
        }
    }

    /// A monotone version covering every atlas this storage owns. Any
    /// rebuild anywhere advances it, and everything baked under an older
    /// value is stale.
    pub fn layout_version(&self) -> u64 {
        let mut version = self.glyph_atlas.version() as u64;
        for slot in &self.image_atlases {
            if let Some(atlas) = slot {
                version += atlas.version() as u64;
            }
        }
        version
    }

    /// Housekeeping: reports whether any atlas was rebuilt since the last
    /// call. On `true`, every [`BakedGeometry`] produced earlier is invalid
    /// and must be re-baked.
    pub fn conditional_rebuild(&mut self) -> bool {
        let version = self.layout_version();
        let rebuilt = version != self.last_layout_version;
        if rebuilt {
            debug!(
                "storage layout advanced from {} to {}; cached bakes invalidated",
                self.last_layout_version, version
            );
            self.last_layout_version = version;
        }
        rebuilt
    }

    /// Resolves a geometry against the current atlas layout and freezes the
    /// renderer-facing result. The bake is valid until
    /// [`Storage::layout_version`] advances.
    pub fn bake(
        &self,
        geometry: &mut Geometry,
        rasterizer: &dyn FontRasterizer,
    ) -> BakedGeometry {
        geometry.prepare_glyphs_for_rendering(&self.glyph_atlas, rasterizer);

        let mut canvas = Canvas::new(1, 1, &self.glyph_atlas, Vector2F::zero(), 1.0);
        canvas.set_scissor(Vector2F::splat(-BAKE_EXTENT), Vector2F::splat(BAKE_EXTENT));
        canvas.place(geometry);

        BakedGeometry {
            vertices: canvas.vertices().to_vec(),
            indices: canvas.indices().to_vec(),
            params: canvas.params().to_vec(),
            images: canvas.images().to_vec(),
            batches: canvas.batches().to_vec(),
            payload: canvas.payload().to_vec(),
            bounds_min: geometry.bounds_min(),
            bounds_max: geometry.bounds_max(),
            atlas_version: self.layout_version(),
        }
    }
}
