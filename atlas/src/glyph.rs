// vellum/atlas/src/glyph.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The glyph atlas: per-size glyph bitmaps rasterized on demand into RGBA
//! pages.
//!
//! Consumers resolve glyph UVs through the two-phase update protocol:
//! [`GlyphAtlas::begin_update`] hands out an update guard when the caller's
//! cached version is stale (or when the caller has unresolved glyphs),
//! glyphs are mapped through the guard, and dropping the guard ends the
//! update. Mapping never fails from the caller's perspective: a glyph that
//! cannot be rasterized or placed gets a zero-size placement and draws as
//! blank.

use crate::shelf::ShelfPacker;
use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard};
use vellum_geometry::rect::RectF;
use vellum_geometry::vector::{vec2f, Vector2F, Vector2I};

/// Opaque handle to a loaded font, assigned by the font subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FontHandle(pub u32);

/// Identity of a rasterized glyph: font, pixel size, glyph index and style
/// bits (bold, oblique and similar synthesis flags).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlyphKey {
    pub font: FontHandle,
    pub size_px: u16,
    pub glyph_index: u32,
    pub style_flags: u8,
}

/// Placement metrics reported by the rasterizer: offset from the pen
/// position to the bitmap origin, and the pen advance.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlyphMetrics {
    pub offset: Vector2F,
    pub advance: f32,
}

/// Pixel layout of a rasterized glyph bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlyphFormat {
    /// Coverage only; expanded to white RGBA on upload.
    Alpha8,
    /// Full color (emoji and similar).
    Rgba8,
}

/// A glyph bitmap plus metrics, as produced by the font subsystem.
pub struct RasterizedGlyph {
    pub size: Vector2I,
    pub format: GlyphFormat,
    pub pixels: Vec<u8>,
    pub metrics: GlyphMetrics,
}

/// The seam to the font subsystem. The atlas calls this on cache misses;
/// everything else about fonts is opaque to the canvas.
pub trait FontRasterizer {
    /// Rasterizes one glyph, or `None` if the font cannot produce it.
    fn rasterize(&self, key: &GlyphKey) -> Option<RasterizedGlyph>;
}

/// Horizontal alignment of a shaped text run relative to its origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// One glyph of a shaped run: its identity plus the rectangle its bitmap
/// covers, relative to the run origin.
#[derive(Clone, Copy, Debug)]
pub struct ShapedGlyph {
    pub key: GlyphKey,
    pub rect: RectF,
}

/// Text shaping, implemented by the font subsystem. Shaping maps a UTF-8
/// string to positioned glyphs; the canvas engine never inspects the text
/// itself.
pub trait TextShaper {
    fn shape_text(
        &self,
        font: FontHandle,
        size_px: u16,
        text: &str,
        align: TextAlign,
    ) -> Vec<ShapedGlyph>;
}

/// Where a glyph landed: page index plus the UV rectangle of its bitmap.
/// A zero-size placement means the glyph draws as blank.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlyphPlacement {
    pub page: u32,
    pub uv_min: Vector2F,
    pub uv_max: Vector2F,
    pub size: Vector2I,
    pub metrics: GlyphMetrics,
}

impl GlyphPlacement {
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }
}

struct Page {
    packer: ShelfPacker,
    pixels: Vec<u8>,
}

impl Page {
    fn new(page_size: i32) -> Page {
        Page {
            packer: ShelfPacker::new(Vector2I::splat(page_size)),
            pixels: vec![0; (page_size as usize) * (page_size as usize) * 4],
        }
    }

    fn clear(&mut self) {
        self.packer.clear();
        for byte in &mut self.pixels {
            *byte = 0;
        }
    }
}

struct Inner {
    pages: Vec<Page>,
    glyphs: FxHashMap<GlyphKey, GlyphPlacement>,
    version: u32,
}

/// A multi-page glyph cache with version-based invalidation.
///
/// At most 64 pages are supported so that a whole-atlas page set fits in a
/// `u64` usage mask.
pub struct GlyphAtlas {
    inner: Mutex<Inner>,
    page_size: i32,
}

/// The maximum page count of a glyph atlas.
pub const MAX_GLYPH_PAGES: u32 = 64;

impl GlyphAtlas {
    pub fn new(page_size: i32, page_count: u32) -> GlyphAtlas {
        assert!(page_size > 0);
        assert!(page_count > 0 && page_count <= MAX_GLYPH_PAGES);
        let pages = (0..page_count).map(|_| Page::new(page_size)).collect();
        GlyphAtlas {
            inner: Mutex::new(Inner {
                pages,
                glyphs: FxHashMap::default(),
                version: 1,
            }),
            page_size,
        }
    }

    #[inline]
    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    #[inline]
    pub fn page_count(&self) -> u32 {
        self.inner.lock().pages.len() as u32
    }

    /// The current cache version. Advances only when a rebuild relocates
    /// glyphs, never on plain insertion.
    #[inline]
    pub fn version(&self) -> u32 {
        self.inner.lock().version
    }

    /// First phase of a UV resolve. If `cached_version` is current the
    /// caller's UVs are still valid and `None` is returned. Otherwise the
    /// atlas lock is taken, `cached_version` is updated, and the returned
    /// guard maps glyphs until it is dropped.
    pub fn begin_update(&self, cached_version: &mut u32) -> Option<GlyphAtlasUpdate> {
        let inner = self.inner.lock();
        if *cached_version == inner.version {
            return None;
        }
        *cached_version = inner.version;
        Some(GlyphAtlasUpdate { inner, page_size: self.page_size })
    }

    /// Read access to a page's RGBA pixels, for texture upload.
    pub fn page_pixels(&self, page: u32) -> Option<impl std::ops::Deref<Target = [u8]> + '_> {
        let inner = self.inner.lock();
        if (page as usize) < inner.pages.len() {
            Some(MutexGuard::map(inner, |inner| {
                &mut inner.pages[page as usize].pixels[..]
            }))
        } else {
            None
        }
    }
}

/// Exclusive access to the atlas for the duration of one UV resolve.
/// Dropping the guard ends the update and releases the atlas lock.
pub struct GlyphAtlasUpdate<'a> {
    inner: MutexGuard<'a, Inner>,
    page_size: i32,
}

impl<'a> GlyphAtlasUpdate<'a> {
    /// The version the mapped placements belong to. May advance mid-update
    /// if an insertion forces a rebuild, so read it after the last
    /// `map_glyph` call.
    #[inline]
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Resolves one glyph to its current placement, rasterizing and placing
    /// it on a miss.
    pub fn map_glyph(
        &mut self,
        key: &GlyphKey,
        rasterizer: &dyn FontRasterizer,
    ) -> GlyphPlacement {
        if let Some(placement) = self.inner.glyphs.get(key) {
            return *placement;
        }

        let rasterized = match rasterizer.rasterize(key) {
            Some(rasterized) => rasterized,
            None => {
                // Unrasterizable glyphs draw as blank forever.
                let placement = GlyphPlacement::default();
                self.inner.glyphs.insert(*key, placement);
                return placement;
            }
        };

        let placement = match self.place(&rasterized) {
            Some(placement) => placement,
            None => {
                self.rebuild();
                match self.place(&rasterized) {
                    Some(placement) => placement,
                    None => {
                        log::warn!("glyph atlas: glyph {:?} too large for a page", key);
                        GlyphPlacement { metrics: rasterized.metrics, ..Default::default() }
                    }
                }
            }
        };

        self.inner.glyphs.insert(*key, placement);
        placement
    }

    fn place(&mut self, rasterized: &RasterizedGlyph) -> Option<GlyphPlacement> {
        if rasterized.size.x == 0 || rasterized.size.y == 0 {
            // Whitespace glyphs occupy no atlas space.
            return Some(GlyphPlacement { metrics: rasterized.metrics, ..Default::default() });
        }

        let page_size = self.page_size;
        for (page_index, page) in self.inner.pages.iter_mut().enumerate() {
            if let Some(origin) = page.packer.allocate(rasterized.size) {
                blit_glyph(&mut page.pixels, page_size, origin, rasterized);
                let inv = 1.0 / page_size as f32;
                return Some(GlyphPlacement {
                    page: page_index as u32,
                    uv_min: vec2f(origin.x as f32 * inv, origin.y as f32 * inv),
                    uv_max: vec2f(
                        (origin.x + rasterized.size.x) as f32 * inv,
                        (origin.y + rasterized.size.y) as f32 * inv,
                    ),
                    size: rasterized.size,
                    metrics: rasterized.metrics,
                });
            }
        }
        None
    }

    /// Reclaims every page and forgets all placements. Evicted glyphs are
    /// re-rasterized on their next use; the version bump makes every cached
    /// UV re-resolve first.
    fn rebuild(&mut self) {
        self.inner.version += 1;
        log::debug!(
            "glyph atlas: rebuild to version {} ({} glyphs evicted)",
            self.inner.version,
            self.inner.glyphs.len()
        );
        self.inner.glyphs.clear();
        for page in &mut self.inner.pages {
            page.clear();
        }
    }
}

/// Copies a glyph bitmap into a page, expanding alpha-only coverage to
/// white RGBA.
fn blit_glyph(page_pixels: &mut [u8], page_size: i32, origin: Vector2I, glyph: &RasterizedGlyph) {
    for row in 0..glyph.size.y {
        let dst_start = (((origin.y + row) * page_size + origin.x) as usize) * 4;
        match glyph.format {
            GlyphFormat::Rgba8 => {
                let src_start = (row * glyph.size.x) as usize * 4;
                let count = glyph.size.x as usize * 4;
                page_pixels[dst_start..dst_start + count]
                    .copy_from_slice(&glyph.pixels[src_start..src_start + count]);
            }
            GlyphFormat::Alpha8 => {
                let src_start = (row * glyph.size.x) as usize;
                for col in 0..glyph.size.x as usize {
                    let alpha = glyph.pixels[src_start + col];
                    let dst = dst_start + col * 4;
                    page_pixels[dst] = 255;
                    page_pixels[dst + 1] = 255;
                    page_pixels[dst + 2] = 255;
                    page_pixels[dst + 3] = alpha;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_geometry::vector::vec2i;

    /// Rasterizes every glyph as an opaque square of the keyed pixel size.
    pub(crate) struct SquareRasterizer;

    impl FontRasterizer for SquareRasterizer {
        fn rasterize(&self, key: &GlyphKey) -> Option<RasterizedGlyph> {
            let side = key.size_px as i32;
            Some(RasterizedGlyph {
                size: vec2i(side, side),
                format: GlyphFormat::Alpha8,
                pixels: vec![255; (side * side) as usize],
                metrics: GlyphMetrics { offset: vec2f(0.0, -side as f32), advance: side as f32 },
            })
        }
    }

    fn key(glyph_index: u32, size_px: u16) -> GlyphKey {
        GlyphKey { font: FontHandle(1), size_px, glyph_index, style_flags: 0 }
    }

    #[test]
    fn test_hit_does_not_bump_version() {
        let atlas = GlyphAtlas::new(64, 1);
        let mut cached = 0;
        {
            let mut update = atlas.begin_update(&mut cached).unwrap();
            let first = update.map_glyph(&key(1, 16), &SquareRasterizer);
            let again = update.map_glyph(&key(1, 16), &SquareRasterizer);
            assert_eq!(first, again);
        }
        assert_eq!(atlas.version(), 1);
        assert_eq!(cached, 1);
        // Up to date now; no second update is needed.
        assert!(atlas.begin_update(&mut cached).is_none());
    }

    #[test]
    fn test_overflow_rebuilds_and_bumps_version() {
        let atlas = GlyphAtlas::new(32, 1);
        let mut cached = 0;
        let mut update = atlas.begin_update(&mut cached).unwrap();
        // Two 32px glyphs cannot share a 32px page.
        update.map_glyph(&key(1, 32), &SquareRasterizer);
        let second = update.map_glyph(&key(2, 32), &SquareRasterizer);
        assert!(!second.is_blank());
        assert_eq!(update.version(), 2);
    }

    #[test]
    fn test_unrasterizable_glyph_is_blank() {
        struct NoGlyphs;
        impl FontRasterizer for NoGlyphs {
            fn rasterize(&self, _: &GlyphKey) -> Option<RasterizedGlyph> {
                None
            }
        }

        let atlas = GlyphAtlas::new(32, 1);
        let mut cached = 0;
        let mut update = atlas.begin_update(&mut cached).unwrap();
        assert!(update.map_glyph(&key(7, 12), &NoGlyphs).is_blank());
    }
}
