// vellum/content/src/style.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `RenderStyle` value type and its factories.
//!
//! A style carries everything the paint model needs to color fragments:
//! solid colors, linear/box/radial gradients, and atlas-backed image
//! patterns. Styles are small, copied freely, and interned by their content
//! hash wherever many of them meet (the geometry style table, the canvas
//! paint parameters array).

use fxhash::FxHasher64;
use std::hash::{Hash, Hasher};
use vellum_atlas::image::ImageEntry;
use vellum_color::ColorU;
use vellum_geometry::rect::RectF;
use vellum_geometry::transform2d::Transform2F;
use vellum_geometry::vector::{vec2f, Vector2F};

/// The far-plane extent used to turn a linear gradient into a half-open
/// band in paint space.
const GRADIENT_LARGE: f32 = 1.0e5;

/// A paint. Everything needed to color fragments of a fill, stroke, glyph
/// run or raw quad.
///
/// After mutating any field by hand, call [`RenderStyle::recompute_hash`];
/// the factories in this module do so for you. Equality is content
/// equality; the hash exists so containers can bucket styles cheaply.
#[derive(Clone, Copy, Debug)]
pub struct RenderStyle {
    /// Maps post-transform vertex positions into paint space.
    pub xform: Transform2F,
    /// Whether `xform` must be applied; identity paints skip the multiply.
    pub xform_needed: bool,

    /// Reference point of the paint in paint space.
    pub base: Vector2F,
    /// Half-extent of a box gradient, or the band length of a linear one.
    pub extent: Vector2F,
    /// UV rectangle inside the atlas page, for image paints.
    pub uv_min: Vector2F,
    pub uv_max: Vector2F,

    /// Corner radius (box) or inner radius (radial).
    pub radius: f32,
    /// Width of the gradient transition band.
    pub feather: f32,
    pub inner_color: ColorU,
    pub outer_color: ColorU,
    pub wrap_u: bool,
    pub wrap_v: bool,
    /// Sample with the vertex UV directly, bypassing the paint transform.
    pub custom_uv: bool,

    pub image: Option<ImageEntry>,

    /// Content hash over every field above. Maintained by
    /// [`RenderStyle::recompute_hash`].
    pub hash: u64,
}

impl Default for RenderStyle {
    #[inline]
    fn default() -> RenderStyle {
        solid_color(ColorU::white())
    }
}

impl RenderStyle {
    /// Recomputes the content hash. Must be called after any field
    /// mutation; every factory ends with it.
    pub fn recompute_hash(&mut self) {
        let mut hasher = FxHasher64::default();
        hash_transform(&self.xform, &mut hasher);
        self.xform_needed.hash(&mut hasher);
        hash_vector(self.base, &mut hasher);
        hash_vector(self.extent, &mut hasher);
        hash_vector(self.uv_min, &mut hasher);
        hash_vector(self.uv_max, &mut hasher);
        self.radius.to_bits().hash(&mut hasher);
        self.feather.to_bits().hash(&mut hasher);
        self.inner_color.hash(&mut hasher);
        self.outer_color.hash(&mut hasher);
        self.wrap_u.hash(&mut hasher);
        self.wrap_v.hash(&mut hasher);
        self.custom_uv.hash(&mut hasher);
        self.image.hash(&mut hasher);
        self.hash = hasher.finish();
    }

    /// Returns this style with both colors' alpha scaled by `alpha`.
    pub fn with_modulated_alpha(mut self, alpha: f32) -> RenderStyle {
        let scale = |a: u8| (a as f32 * alpha).round().max(0.0).min(255.0) as u8;
        self.inner_color = self.inner_color.with_alpha(scale(self.inner_color.a));
        self.outer_color = self.outer_color.with_alpha(scale(self.outer_color.a));
        self.recompute_hash();
        self
    }
}

impl PartialEq for RenderStyle {
    fn eq(&self, other: &RenderStyle) -> bool {
        self.xform == other.xform
            && self.xform_needed == other.xform_needed
            && self.base == other.base
            && self.extent == other.extent
            && self.uv_min == other.uv_min
            && self.uv_max == other.uv_max
            && self.radius == other.radius
            && self.feather == other.feather
            && self.inner_color == other.inner_color
            && self.outer_color == other.outer_color
            && self.wrap_u == other.wrap_u
            && self.wrap_v == other.wrap_v
            && self.custom_uv == other.custom_uv
            && self.image == other.image
    }
}

fn hash_vector<H>(vector: Vector2F, hasher: &mut H) where H: Hasher {
    vector.x.to_bits().hash(hasher);
    vector.y.to_bits().hash(hasher);
}

fn hash_transform<H>(transform: &Transform2F, hasher: &mut H) where H: Hasher {
    let matrix = transform.matrix();
    matrix.m11.to_bits().hash(hasher);
    matrix.m12.to_bits().hash(hasher);
    matrix.m21.to_bits().hash(hasher);
    matrix.m22.to_bits().hash(hasher);
    hash_vector(transform.translation(), hasher);
}

fn base_style() -> RenderStyle {
    RenderStyle {
        xform: Transform2F::default(),
        xform_needed: false,
        base: Vector2F::zero(),
        extent: Vector2F::zero(),
        uv_min: Vector2F::zero(),
        uv_max: Vector2F::splat(1.0),
        radius: 0.0,
        feather: 1.0,
        inner_color: ColorU::white(),
        outer_color: ColorU::white(),
        wrap_u: false,
        wrap_v: false,
        custom_uv: false,
        image: None,
        hash: 0,
    }
}

/// A paint with a single solid color.
pub fn solid_color(color: ColorU) -> RenderStyle {
    let mut style = base_style();
    style.inner_color = color;
    style.outer_color = color;
    style.recompute_hash();
    style
}

/// A linear gradient running from `start` (inner color) to `end` (outer
/// color).
pub fn linear_gradient(
    start: Vector2F,
    end: Vector2F,
    inner_color: ColorU,
    outer_color: ColorU,
) -> RenderStyle {
    let delta = end - start;
    let length = delta.length();
    let axis = if length > 0.0001 {
        delta.scale(1.0 / length)
    } else {
        vec2f(0.0, 1.0)
    };

    // Paint space has the gradient running along +y, entering the
    // transition band `GRADIENT_LARGE` units from the origin.
    let paint_to_world = Transform2F::row_major(
        axis.y,
        axis.x,
        -axis.x,
        axis.y,
        start.x - axis.x * GRADIENT_LARGE,
        start.y - axis.y * GRADIENT_LARGE,
    );

    let mut style = base_style();
    style.xform = paint_to_world.inverse();
    style.xform_needed = true;
    style.extent = vec2f(GRADIENT_LARGE, GRADIENT_LARGE + length * 0.5);
    style.radius = 0.0;
    style.feather = f32::max(1.0, length);
    style.inner_color = inner_color;
    style.outer_color = outer_color;
    style.recompute_hash();
    style
}

/// A feathered rounded-rectangle gradient, useful for drop shadows and
/// highlights. `rect` is the rectangle, `radius` its corner radius and
/// `feather` how blurry the border is.
pub fn box_gradient(
    rect: RectF,
    radius: f32,
    feather: f32,
    inner_color: ColorU,
    outer_color: ColorU,
) -> RenderStyle {
    let mut style = base_style();
    style.xform = Transform2F::from_translation(-rect.center());
    style.xform_needed = true;
    style.extent = rect.size().scale(0.5);
    style.radius = radius;
    style.feather = f32::max(1.0, feather);
    style.inner_color = inner_color;
    style.outer_color = outer_color;
    style.recompute_hash();
    style
}

/// A radial gradient around `center`, transitioning from the inner color at
/// `inner_radius` to the outer color at `outer_radius`.
pub fn radial_gradient(
    center: Vector2F,
    inner_radius: f32,
    outer_radius: f32,
    inner_color: ColorU,
    outer_color: ColorU,
) -> RenderStyle {
    let mut style = base_style();
    style.xform = Transform2F::from_translation(-center);
    style.xform_needed = true;
    style.extent = Vector2F::splat(outer_radius);
    style.radius = inner_radius;
    style.feather = outer_radius - inner_radius;
    style.inner_color = inner_color;
    style.outer_color = outer_color;
    style.recompute_hash();
    style
}

/// Projection settings for an image pattern.
#[derive(Clone, Copy, Debug)]
pub struct ImagePatternSettings {
    /// Rotation around the pivot, in radians.
    pub angle: f32,
    pub offset: Vector2F,
    pub scale: Vector2F,
    pub pivot: Vector2F,
    pub wrap_u: bool,
    pub wrap_v: bool,
    pub alpha: u8,
    /// Optional sub-rectangle of the image, in image pixels, to sample
    /// instead of the whole entry.
    pub sub_rect: Option<RectF>,
}

impl Default for ImagePatternSettings {
    #[inline]
    fn default() -> ImagePatternSettings {
        ImagePatternSettings {
            angle: 0.0,
            offset: Vector2F::zero(),
            scale: Vector2F::splat(1.0),
            pivot: Vector2F::zero(),
            wrap_u: false,
            wrap_v: false,
            alpha: 255,
            sub_rect: None,
        }
    }
}

impl ImagePatternSettings {
    #[inline]
    pub fn scale(mut self, scale: f32) -> ImagePatternSettings {
        self.scale = Vector2F::splat(scale);
        self
    }

    #[inline]
    pub fn offset(mut self, x: f32, y: f32) -> ImagePatternSettings {
        self.offset = vec2f(x, y);
        self
    }

    #[inline]
    pub fn angle(mut self, angle: f32) -> ImagePatternSettings {
        self.angle = angle;
        self
    }

    #[inline]
    pub fn pivot(mut self, x: f32, y: f32) -> ImagePatternSettings {
        self.pivot = vec2f(x, y);
        self
    }

    #[inline]
    pub fn alpha(mut self, alpha: u8) -> ImagePatternSettings {
        self.alpha = alpha;
        self
    }

    #[inline]
    pub fn wrap(mut self) -> ImagePatternSettings {
        self.wrap_u = true;
        self.wrap_v = true;
        self
    }

    #[inline]
    pub fn clamp(mut self) -> ImagePatternSettings {
        self.wrap_u = false;
        self.wrap_v = false;
        self
    }

    #[inline]
    pub fn sub_rect(mut self, rect: RectF) -> ImagePatternSettings {
        self.sub_rect = Some(rect);
        self
    }
}

/// An image pattern over an atlas entry. The paint transform maps
/// post-transform vertex positions to unit UVs over one tile of the image;
/// wrapping beyond the first tile is honored only for entries registered as
/// wrap-eligible.
pub fn image_pattern(entry: ImageEntry, settings: &ImagePatternSettings) -> RenderStyle {
    let tile_size = entry.size.to_f32().scale_xy(settings.scale);

    // Unit UV -> world: scale to tile pixels, swing around the pivot, then
    // drop at the offset.
    let paint_to_world = Transform2F::from_scale(tile_size)
        .post_translate(-settings.pivot)
        .post_rotate(settings.angle)
        .post_translate(settings.offset + settings.pivot);

    let (wrap_u, wrap_v) = if (settings.wrap_u || settings.wrap_v) && !entry.wrap_eligible {
        log::warn!(
            "image pattern: wrap requested for image {:?} not registered as wrap-eligible; \
             clamping",
            entry.id
        );
        (false, false)
    } else {
        (settings.wrap_u, settings.wrap_v)
    };

    let (uv_min, uv_max) = match settings.sub_rect {
        None => (entry.uv_min, entry.uv_max),
        Some(sub_rect) => {
            let image_size = entry.size.to_f32();
            let uv_span = entry.uv_max - entry.uv_min;
            let scale = vec2f(uv_span.x / image_size.x, uv_span.y / image_size.y);
            (
                entry.uv_min + sub_rect.origin().scale_xy(scale),
                entry.uv_min + sub_rect.lower_right().scale_xy(scale),
            )
        }
    };

    let mut style = base_style();
    style.xform = paint_to_world.inverse();
    style.xform_needed = true;
    style.base = settings.offset;
    style.extent = tile_size;
    style.uv_min = uv_min;
    style.uv_max = uv_max;
    style.radius = 0.0;
    style.feather = 1.0;
    style.inner_color = ColorU::white().with_alpha(settings.alpha);
    style.outer_color = ColorU::white().with_alpha(settings.alpha);
    style.wrap_u = wrap_u;
    style.wrap_v = wrap_v;
    style.image = Some(entry);
    style.recompute_hash();
    style
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_color::ColorU;
    use vellum_geometry::vector::vec2f;

    #[test]
    fn test_equal_payload_equal_hash() {
        let a = linear_gradient(vec2f(0.0, 0.0), vec2f(100.0, 0.0),
                                ColorU::white(), ColorU::black());
        let b = linear_gradient(vec2f(0.0, 0.0), vec2f(100.0, 0.0),
                                ColorU::white(), ColorU::black());
        assert_eq!(a, b);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_different_paints_differ() {
        let a = solid_color(ColorU::white());
        let b = solid_color(ColorU::black());
        assert_ne!(a, b);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_tracks_mutation() {
        let mut style = solid_color(ColorU::white());
        let old_hash = style.hash;
        style.inner_color = ColorU::black();
        style.recompute_hash();
        assert_ne!(style.hash, old_hash);
    }

    #[test]
    fn test_radial_gradient_parameters() {
        let style = radial_gradient(vec2f(50.0, 50.0), 20.0, 80.0,
                                    ColorU::white(), ColorU::black());
        assert_eq!(style.radius, 20.0);
        assert_eq!(style.feather, 60.0);
        assert!(style.xform_needed);
        // Paint space is centered on the gradient.
        assert!(style.xform.transform_point(vec2f(50.0, 50.0)).approx_eq(vec2f(0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_linear_gradient_paint_space() {
        let style = linear_gradient(vec2f(10.0, 0.0), vec2f(110.0, 0.0),
                                    ColorU::white(), ColorU::black());
        // The start point maps to the edge of the transition band.
        let start_in_paint = style.xform.transform_point(vec2f(10.0, 0.0));
        assert!(f32::abs(start_in_paint.y - 1.0e5) < 0.5);
        assert_eq!(style.feather, 100.0);
    }

    #[test]
    fn test_modulated_alpha() {
        let style = solid_color(ColorU::new(10, 20, 30, 200)).with_modulated_alpha(0.5);
        assert_eq!(style.inner_color.a, 100);
        assert_eq!(style.inner_color.r, 10);
    }
}
