// vellum/atlas/src/image.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The image atlas: user raster images packed onto RGBA pages.

use crate::shelf::ShelfPacker;
use crate::AtlasError;
use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use vellum_geometry::vector::{vec2f, Vector2F, Vector2I};

/// Pixel layout of a decoded input image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba8,
    Rgb8,
}

impl ImageFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ImageFormat::Rgba8 => 4,
            ImageFormat::Rgb8 => 3,
        }
    }
}

/// A decoded raster image supplied by the caller. The atlas never decodes;
/// it only copies pixels.
#[derive(Clone)]
pub struct ImageData {
    pub size: Vector2I,
    pub format: ImageFormat,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(size: Vector2I, format: ImageFormat, pixels: Vec<u8>) -> ImageData {
        assert_eq!(pixels.len(), size.area() as usize * format.bytes_per_pixel());
        ImageData { size, format, pixels }
    }

    /// A solid-color RGBA image, handy in tests.
    pub fn from_color(size: Vector2I, rgba: [u8; 4]) -> ImageData {
        let mut pixels = Vec::with_capacity(size.area() as usize * 4);
        for _ in 0..size.area() {
            pixels.extend_from_slice(&rgba);
        }
        ImageData::new(size, ImageFormat::Rgba8, pixels)
    }
}

/// Stable identity of a registered image, valid across atlas rebuilds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Placement of a registered image: which page it lives on and the UV
/// rectangle it occupies there. Stale after an atlas rebuild; re-resolve
/// through [`ImageAtlas::placement`] when the version has advanced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageEntry {
    pub id: ImageId,
    /// Index of the owning atlas, as assigned at atlas creation.
    pub atlas: u32,
    pub page: u32,
    pub uv_min: Vector2F,
    pub uv_max: Vector2F,
    pub size: Vector2I,
    pub wrap_eligible: bool,
}

impl Hash for ImageEntry {
    fn hash<H>(&self, hasher: &mut H) where H: Hasher {
        self.id.hash(hasher);
        self.atlas.hash(hasher);
        self.page.hash(hasher);
        self.uv_min.x.to_bits().hash(hasher);
        self.uv_min.y.to_bits().hash(hasher);
        self.uv_max.x.to_bits().hash(hasher);
        self.uv_max.y.to_bits().hash(hasher);
        self.wrap_eligible.hash(hasher);
    }
}

struct Page {
    packer: ShelfPacker,
    pixels: Vec<u8>,
    /// A wrap-eligible image owns the whole page; nothing else lands on it.
    dedicated: bool,
    occupied: bool,
}

impl Page {
    fn new(page_size: i32) -> Page {
        Page {
            packer: ShelfPacker::new(Vector2I::splat(page_size)),
            pixels: vec![0; (page_size as usize) * (page_size as usize) * 4],
            dedicated: false,
            occupied: false,
        }
    }

    fn clear(&mut self) {
        self.packer.clear();
        for byte in &mut self.pixels {
            *byte = 0;
        }
        self.dedicated = false;
        self.occupied = false;
    }
}

struct Registered {
    data: Arc<ImageData>,
    wrap_eligible: bool,
    border: i32,
    entry: ImageEntry,
}

struct Inner {
    pages: Vec<Page>,
    images: FxHashMap<ImageId, Registered>,
    next_id: u32,
    version: u32,
}

/// A multi-page RGBA image atlas.
///
/// Registration takes the atlas-wide lock; lookups are cheap map reads under
/// the same lock. The lock is a leaf and is never held across calls into
/// caller code.
pub struct ImageAtlas {
    inner: Mutex<Inner>,
    index: u32,
    page_size: i32,
    debug_name: String,
}

impl ImageAtlas {
    /// Creates an atlas. `index` identifies it in paint parameter rows when
    /// several atlases coexist; storages assign it.
    pub fn new(index: u32, page_size: i32, page_count: u32, debug_name: &str) -> ImageAtlas {
        assert!(page_size > 0 && page_count > 0);
        let pages = (0..page_count).map(|_| Page::new(page_size)).collect();
        ImageAtlas {
            inner: Mutex::new(Inner {
                pages,
                images: FxHashMap::default(),
                next_id: 1,
                version: 1,
            }),
            index,
            page_size,
            debug_name: debug_name.to_string(),
        }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    #[inline]
    pub fn page_count(&self) -> u32 {
        self.inner.lock().pages.len() as u32
    }

    /// The current layout version. Bumped by every rebuild; all placements
    /// handed out under an older version are stale.
    #[inline]
    pub fn version(&self) -> u32 {
        self.inner.lock().version
    }

    /// Copies `data` into a free rectangle and returns its placement.
    ///
    /// Wrap-eligible images are granted a dedicated page so that texture
    /// wrap addressing stays inside the image. If nothing fits, the atlas is
    /// rebuilt (repacking every live image and bumping the version) and the
    /// placement is retried once before giving up.
    pub fn register_image(
        &self,
        data: Arc<ImageData>,
        wrap_eligible: bool,
        border: i32,
    ) -> Result<ImageEntry, AtlasError> {
        let padded = data.size + Vector2I::splat(border * 2);
        if padded.x > self.page_size || padded.y > self.page_size {
            return Err(AtlasError::ImageTooLarge);
        }

        let mut inner = self.inner.lock();
        let id = ImageId(inner.next_id);
        inner.next_id += 1;

        let entry = match self.place(&mut inner, id, &data, wrap_eligible, border) {
            Some(entry) => entry,
            None => {
                self.rebuild(&mut inner);
                self.place(&mut inner, id, &data, wrap_eligible, border)
                    .ok_or(AtlasError::OutOfAtlasSpace)?
            }
        };

        inner.images.insert(id, Registered { data, wrap_eligible, border, entry });
        Ok(entry)
    }

    /// Forgets the image. Its pixels stay on the page until the next
    /// rebuild reclaims them.
    pub fn unregister_image(&self, id: ImageId) {
        self.inner.lock().images.remove(&id);
    }

    /// The current placement of a registered image.
    pub fn placement(&self, id: ImageId) -> Option<ImageEntry> {
        self.inner.lock().images.get(&id).map(|registered| registered.entry)
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

    fn place(
        &self,
        inner: &mut Inner,
        id: ImageId,
        data: &ImageData,
        wrap_eligible: bool,
        border: i32,
    ) -> Option<ImageEntry> {
        let page_size = self.page_size;
        let padded = data.size + Vector2I::splat(border * 2);

        let (page_index, origin) = if wrap_eligible {
            // Wrapping requires exclusive ownership of a page.
            let page_index = inner
                .pages
                .iter()
                .position(|page| !page.occupied)?;
            let page = &mut inner.pages[page_index];
            let origin = page.packer.allocate(padded)?;
            page.dedicated = true;
            page.occupied = true;
            (page_index, origin)
        } else {
            let mut found = None;
            for (page_index, page) in inner.pages.iter_mut().enumerate() {
                if page.dedicated {
                    continue;
                }
                if let Some(origin) = page.packer.allocate(padded) {
                    page.occupied = true;
                    found = Some((page_index, origin));
                    break;
                }
            }
            found?
        };

        let page = &mut inner.pages[page_index];
        blit(&mut page.pixels, page_size, origin + Vector2I::splat(border), data);

        let inv = 1.0 / page_size as f32;
        let uv_origin = origin + Vector2I::splat(border);
        let entry = ImageEntry {
            id,
            atlas: self.index,
            page: page_index as u32,
            uv_min: vec2f(uv_origin.x as f32 * inv, uv_origin.y as f32 * inv),
            uv_max: vec2f(
                (uv_origin.x + data.size.x) as f32 * inv,
                (uv_origin.y + data.size.y) as f32 * inv,
            ),
            size: data.size,
            wrap_eligible,
        };
        Some(entry)
    }

    /// Clears every page and repacks all live images, tallest first. Bumps
    /// the layout version, invalidating all previously handed-out UVs.
    fn rebuild(&self, inner: &mut Inner) {
        inner.version += 1;
        log::debug!(
            "image atlas {:?}: rebuild to version {} ({} live images)",
            self.debug_name,
            inner.version,
            inner.images.len()
        );

        for page in &mut inner.pages {
            page.clear();
        }

        let mut ids: Vec<ImageId> = inner.images.keys().cloned().collect();
        ids.sort_by_key(|id| {
            let registered = &inner.images[id];
            // Wrap images first (they need whole pages), then tallest first.
            (!registered.wrap_eligible, -registered.data.size.y, *id)
        });

        for id in ids {
            let (data, wrap_eligible, border) = {
                let registered = &inner.images[&id];
                (registered.data.clone(), registered.wrap_eligible, registered.border)
            };
            match self.place(inner, id, &data, wrap_eligible, border) {
                Some(entry) => inner.images.get_mut(&id).unwrap().entry = entry,
                None => {
                    log::warn!(
                        "image atlas {:?}: image {:?} lost during rebuild",
                        self.debug_name,
                        id
                    );
                    inner.images.remove(&id);
                }
            }
        }
    }
}

/// Copies an image into a page buffer, expanding RGB to RGBA on the fly.
fn blit(page_pixels: &mut [u8], page_size: i32, origin: Vector2I, data: &ImageData) {
    let bpp = data.format.bytes_per_pixel();
    for row in 0..data.size.y {
        let src_start = (row * data.size.x) as usize * bpp;
        let dst_start = (((origin.y + row) * page_size + origin.x) as usize) * 4;
        match data.format {
            ImageFormat::Rgba8 => {
                let count = data.size.x as usize * 4;
                page_pixels[dst_start..dst_start + count]
                    .copy_from_slice(&data.pixels[src_start..src_start + count]);
            }
            ImageFormat::Rgb8 => {
                for col in 0..data.size.x as usize {
                    let src = src_start + col * 3;
                    let dst = dst_start + col * 4;
                    page_pixels[dst..dst + 3].copy_from_slice(&data.pixels[src..src + 3]);
                    page_pixels[dst + 3] = 255;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageAtlas, ImageData};
    use crate::AtlasError;
    use std::sync::Arc;
    use vellum_geometry::vector::vec2i;

    fn checker(size: i32) -> Arc<ImageData> {
        Arc::new(ImageData::from_color(vec2i(size, size), [255, 0, 255, 255]))
    }

    #[test]
    fn test_register_and_lookup() {
        let atlas = ImageAtlas::new(0, 64, 2, "test");
        let entry = atlas.register_image(checker(16), false, 0).unwrap();
        assert_eq!(atlas.placement(entry.id), Some(entry));
        assert!(entry.uv_max.x > entry.uv_min.x);
        assert_eq!(atlas.version(), 1);
    }

    #[test]
    fn test_wrap_images_get_dedicated_pages() {
        let atlas = ImageAtlas::new(0, 64, 2, "test");
        let wrap = atlas.register_image(checker(16), true, 0).unwrap();
        let plain = atlas.register_image(checker(16), false, 0).unwrap();
        assert_ne!(wrap.page, plain.page);

        // Both pages are now taken (one dedicated, one in use); a second
        // wrap image has nowhere to go even after a rebuild.
        let overflow = atlas.register_image(checker(16), true, 0);
        assert_eq!(overflow, Err(AtlasError::OutOfAtlasSpace));
    }

    #[test]
    fn test_rebuild_bumps_version() {
        let atlas = ImageAtlas::new(0, 32, 1, "test");
        // Fill the single page so the next registration forces a rebuild.
        for _ in 0..2 {
            atlas.register_image(checker(16), false, 0).unwrap();
        }
        let before = atlas.version();
        // This cannot fit even after repacking, but the attempt forces a
        // rebuild, which invalidates every placement handed out so far.
        assert_eq!(
            atlas.register_image(checker(32), false, 0),
            Err(AtlasError::OutOfAtlasSpace)
        );
        assert_eq!(atlas.version(), before + 1);
    }

    #[test]
    fn test_too_large_rejected() {
        let atlas = ImageAtlas::new(0, 32, 1, "test");
        assert_eq!(
            atlas.register_image(checker(33), false, 0),
            Err(AtlasError::ImageTooLarge)
        );
    }
}
