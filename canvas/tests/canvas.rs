// vellum/canvas/tests/canvas.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end scenarios over the builder → geometry → canvas pipeline.

use std::sync::Arc;
use vellum_atlas::glyph::{
    FontHandle, FontRasterizer, GlyphAtlas, GlyphFormat, GlyphKey, GlyphMetrics, RasterizedGlyph,
    ShapedGlyph,
};
use vellum_atlas::image::ImageData;
use vellum_canvas::{Canvas, GeometryBuilder, PlaceError, Storage};
use vellum_color::ColorU;
use vellum_content::{image_pattern, radial_gradient, solid_color, ImagePatternSettings};
use vellum_geometry::rect::RectF;
use vellum_geometry::vector::{vec2f, vec2i, Vector2F};
use vellum_gpu::command::CustomDrawerRegistry;
use vellum_gpu::data::{BatchKind, BlendOp};

/// Rasterizes every glyph as an opaque square of the keyed pixel size.
struct SquareRasterizer;

impl FontRasterizer for SquareRasterizer {
    fn rasterize(&self, key: &GlyphKey) -> Option<RasterizedGlyph> {
        let side = key.size_px as i32;
        Some(RasterizedGlyph {
            size: vec2i(side, side),
            format: GlyphFormat::Alpha8,
            pixels: vec![255; (side * side) as usize],
            metrics: GlyphMetrics {
                offset: vec2f(0.0, -side as f32),
                advance: side as f32,
            },
        })
    }
}

fn glyph_key(glyph_index: u32, size_px: u16) -> GlyphKey {
    GlyphKey {
        font: FontHandle(1),
        size_px,
        glyph_index,
        style_flags: 0,
    }
}

fn default_atlas() -> GlyphAtlas {
    GlyphAtlas::new(256, 4)
}

#[test]
fn test_fill_triangle_single_convex_batch() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.fill_color(ColorU::from_rgb(255, 0, 0));
    builder.begin_path();
    builder.move_to(10.0, 10.0);
    builder.line_to(90.0, 10.0);
    builder.line_to(50.0, 90.0);
    builder.close_path();
    builder.fill();
    let geometry = builder.into_geometry();

    assert_eq!(geometry.bounds_min(), vec2f(10.0, 10.0));
    assert_eq!(geometry.bounds_max(), vec2f(90.0, 90.0));

    canvas.place(&geometry);

    assert_eq!(canvas.batches().len(), 1);
    let batch = canvas.batches()[0];
    assert_eq!(batch.kind, BatchKind::ConvexFill);
    assert_eq!(batch.op, BlendOp::SourceOver);
    assert_eq!(canvas.vertices().len(), 3);
    assert_eq!(batch.index_count, 3);
}

#[test]
fn test_fill_triangle_antialiased_still_one_batch() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.antialiasing(true);
    builder.fill_color(ColorU::from_rgb(255, 0, 0));
    builder.begin_path();
    builder.move_to(10.0, 10.0);
    builder.line_to(90.0, 10.0);
    builder.line_to(50.0, 90.0);
    builder.close_path();
    builder.fill();
    let geometry = builder.into_geometry();

    canvas.place(&geometry);

    // Fan plus fringe ring share a single convex batch.
    assert_eq!(canvas.batches().len(), 1);
    assert_eq!(canvas.vertices().len(), 9);
    assert_eq!(canvas.batches()[0].kind, BatchKind::ConvexFill);
}

#[test]
fn test_concave_fill_masks_then_cover() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(1024, 1024, &atlas, Vector2F::zero(), 1.0);

    // Two overlapping triangles in one path: concave as a group.
    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.move_to(400.0, 400.0);
    builder.line_to(600.0, 400.0);
    builder.line_to(500.0, 560.0);
    builder.close_path();
    builder.move_to(400.0, 520.0);
    builder.line_to(600.0, 520.0);
    builder.line_to(500.0, 360.0);
    builder.close_path();
    builder.fill();
    let geometry = builder.into_geometry();

    let group = geometry.groups()[0];
    assert!(!group.convex);

    canvas.place(&geometry);

    let kinds: Vec<BatchKind> = canvas.batches().iter().map(|batch| batch.kind).collect();
    assert_eq!(
        kinds,
        vec![BatchKind::ConcaveMask, BatchKind::ConcaveMask, BatchKind::ConcaveFill]
    );

    // The cover quad spans the group bounds.
    let cover = canvas.batches()[2];
    assert_eq!(cover.index_count, 6);
}

#[test]
fn test_star_path_is_not_convex() {
    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    let center = vec2f(512.0, 512.0);
    let points = 10;
    for i in 0..points * 2 {
        let angle = i as f32 * std::f32::consts::PI / points as f32;
        let radius = if i % 2 == 0 { 200.0 } else { 80.0 };
        let pos = center + vec2f(angle.cos(), angle.sin()).scale(radius);
        if i == 0 {
            builder.move_to(pos.x, pos.y);
        } else {
            builder.line_to(pos.x, pos.y);
        }
    }
    builder.close_path();
    builder.fill();
    let geometry = builder.into_geometry();
    assert!(!geometry.groups()[0].convex);
}

#[test]
fn test_radial_gradient_parameter_packing() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(256, 256, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.fill_paint(radial_gradient(
        vec2f(100.0, 60.0),
        20.0,
        80.0,
        ColorU::white(),
        ColorU::black(),
    ));
    builder.begin_path();
    builder.rounded_rect(0.0, 0.0, 200.0, 120.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();

    canvas.place(&geometry);

    assert_eq!(canvas.params().len(), 1);
    let row = canvas.params()[0];
    assert_eq!(row.wrap_type, 0);
    assert_eq!(row.radius, 20.0);
    assert_eq!(row.feather, 60.0);
    assert_eq!(row.feather_half, 30.0);
    assert!(f32::abs(row.feather_inv - 1.0 / 60.0) < 1e-7);
}

#[test]
fn test_scissor_culls_whole_geometry() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);
    assert!(canvas.intersect_scissor(vec2f(0.0, 0.0), vec2f(50.0, 50.0)));
    canvas.placement_translated(60.0, 60.0, 1.0);

    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.rect(0.0, 0.0, 200.0, 200.0);
    builder.fill();
    let geometry = builder.into_geometry();

    canvas.place(&geometry);

    assert!(canvas.batches().is_empty());
    assert!(canvas.vertices().is_empty());
    assert_eq!(canvas.culled_geometries(), 1);
}

#[test]
fn test_scissor_push_pop_restores() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    canvas.push_scissor();
    assert!(!canvas.intersect_scissor(vec2f(200.0, 200.0), vec2f(300.0, 300.0)));
    assert!(canvas.is_scissor_empty());
    canvas.pop_scissor();
    assert!(!canvas.is_scissor_empty());

    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.rect(10.0, 10.0, 20.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();
    canvas.place(&geometry);
    assert!(!canvas.batches().is_empty());
}

#[test]
fn test_empty_scissor_suppresses_silently() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);
    assert!(!canvas.set_scissor(vec2f(50.0, 50.0), vec2f(50.0, 50.0)));

    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.rect(10.0, 10.0, 20.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();
    canvas.place(&geometry);

    assert!(canvas.batches().is_empty());
    assert_eq!(canvas.culled_geometries(), 0);
}

#[test]
fn test_translation_placement_offsets_both_axes() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);
    canvas.placement_translated(5.0, 7.0, 1.0);

    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.rect(10.0, 10.0, 10.0, 10.0);
    builder.fill();
    let geometry = builder.into_geometry();
    canvas.place(&geometry);

    assert_eq!(canvas.vertices()[0].pos, vec2f(15.0, 17.0));
}

#[test]
fn test_paint_interning_across_places() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.fill_paint(solid_color(ColorU::from_rgb(10, 20, 30)));
    builder.begin_path();
    builder.rect(10.0, 10.0, 20.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();

    canvas.place(&geometry);
    canvas.place(&geometry);

    assert_eq!(canvas.batches().len(), 2);
    assert_eq!(canvas.params().len(), 1);
}

#[test]
fn test_glyph_batches_split_on_page_change() {
    // 32-pixel pages: a 24-pixel glyph fills most of a page, so the second
    // one lands on the next page.
    let atlas = GlyphAtlas::new(32, 2);

    let mut builder = GeometryBuilder::new();
    let glyphs = [
        ShapedGlyph {
            key: glyph_key(1, 24),
            rect: RectF::new(vec2f(10.0, 10.0), vec2f(24.0, 24.0)),
        },
        ShapedGlyph {
            key: glyph_key(2, 24),
            rect: RectF::new(vec2f(40.0, 10.0), vec2f(24.0, 24.0)),
        },
        ShapedGlyph {
            key: glyph_key(3, 8),
            rect: RectF::new(vec2f(70.0, 10.0), vec2f(8.0, 8.0)),
        },
    ];
    builder.print(&glyphs);
    let mut geometry = builder.into_geometry();

    geometry.prepare_glyphs_for_rendering(&atlas, &SquareRasterizer);
    let pages: Vec<u32> = geometry.glyphs().iter().map(|glyph| glyph.page).collect();
    assert_eq!(pages, vec![0, 1, 0]);
    assert_eq!(geometry.glyph_pages_mask(), 0b11);

    let mut canvas = Canvas::new(200, 200, &atlas, Vector2F::zero(), 1.0);
    canvas.place(&geometry);

    // One flush per page change.
    assert_eq!(canvas.batches().len(), 3);
    for batch in canvas.batches() {
        assert_eq!(batch.op, BlendOp::SourceOver);
        assert_eq!(batch.kind, BatchKind::ConvexFill);
        assert_eq!(batch.index_count, 6);
    }
    assert_eq!(canvas.vertices().len(), 12);
}

#[test]
fn test_baked_geometry_stale_after_atlas_rebuild() {
    let mut storage = Storage::new(256, 2);
    let icons = storage.create_atlas(64, 1, "icons");

    let entry = storage
        .register_image(
            icons,
            Arc::new(ImageData::from_color(vec2i(16, 16), [255, 255, 255, 255])),
            false,
            0,
        )
        .unwrap();

    let mut builder = GeometryBuilder::new();
    builder.fill_paint(image_pattern(entry, &ImagePatternSettings::default()));
    builder.begin_path();
    builder.rect(0.0, 0.0, 64.0, 64.0);
    builder.fill();
    let mut geometry = builder.into_geometry();

    let baked = storage.bake(&mut geometry, &SquareRasterizer);
    assert!(!baked.is_empty());
    assert!(!storage.conditional_rebuild());

    // A fresh canvas accepts the bake while the layout holds.
    let glyph_atlas_version_guard = storage.layout_version();
    {
        let mut canvas = Canvas::new(128, 128, storage.glyph_atlas(), Vector2F::zero(), 1.0);
        canvas.place_baked(&baked, &storage).unwrap();
        assert!(!canvas.batches().is_empty());
    }
    assert_eq!(storage.layout_version(), glyph_atlas_version_guard);

    // Two 48-pixel images cannot share a 64-pixel page: the attempt forces
    // a rebuild even though it ultimately fails.
    storage
        .register_image(
            icons,
            Arc::new(ImageData::from_color(vec2i(48, 48), [0, 0, 0, 255])),
            false,
            0,
        )
        .unwrap();
    let overflow = storage.register_image(
        icons,
        Arc::new(ImageData::from_color(vec2i(48, 48), [0, 0, 0, 255])),
        false,
        0,
    );
    assert!(overflow.is_err());
    assert!(storage.conditional_rebuild());

    let mut canvas = Canvas::new(128, 128, storage.glyph_atlas(), Vector2F::zero(), 1.0);
    assert_eq!(
        canvas.place_baked(&baked, &storage),
        Err(PlaceError::StaleBakedGeometry)
    );
    assert!(canvas.batches().is_empty());
}

#[test]
fn test_custom_drawer_batches() {
    let atlas = default_atlas();
    let mut registry = CustomDrawerRegistry::new();
    let drawer = registry.register("glow-outline").unwrap();

    let mut builder = GeometryBuilder::new();
    builder.select_renderer(drawer, &[1, 2, 3, 4]);
    builder.begin_path();
    builder.rect(10.0, 10.0, 20.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();

    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);
    canvas.set_custom_drawers(&registry);
    canvas.place(&geometry);

    assert_eq!(canvas.batches().len(), 1);
    let batch = canvas.batches()[0];
    assert_eq!(batch.kind, BatchKind::Custom);
    assert_eq!(batch.custom_drawer, drawer);
    assert_eq!(batch.custom_payload.size, 4);
    assert_eq!(&canvas.payload()[..4], &[1, 2, 3, 4]);
}

#[test]
fn test_unknown_custom_drawer_drops_batch() {
    let atlas = default_atlas();

    let mut builder = GeometryBuilder::new();
    builder.select_renderer(17, &[9, 9]);
    builder.begin_path();
    builder.rect(10.0, 10.0, 20.0, 20.0);
    builder.fill();
    let geometry = builder.into_geometry();

    // No registry attached: the drawer cannot be validated.
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);
    canvas.place(&geometry);
    assert!(canvas.batches().is_empty());
}

#[test]
fn test_raw_quad_batch() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    let style = solid_color(ColorU::from_rgb(0, 128, 255));
    canvas.custom_quad(
        &style,
        vec2f(10.0, 10.0),
        vec2f(30.0, 30.0),
        vec2f(0.0, 0.0),
        vec2f(1.0, 1.0),
        ColorU::white(),
        BlendOp::Blend,
    );

    assert_eq!(canvas.batches().len(), 1);
    let batch = canvas.batches()[0];
    assert_eq!(batch.kind, BatchKind::ConvexFill);
    assert_eq!(batch.op, BlendOp::Blend);
    assert_eq!(batch.index_count, 6);
    assert_eq!(canvas.vertices().len(), 4);
    // Raw vertices keep their authored color.
    assert_eq!(canvas.vertices()[0].color, ColorU::white());
}

#[test]
fn test_round_join_stroke_single_batch() {
    let atlas = default_atlas();
    let mut canvas = Canvas::new(400, 400, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.stroke_color(ColorU::black(), 12.0);
    builder.line_join(vellum_canvas::LineJoin::Round);
    builder.line_cap(vellum_canvas::LineCap::Round);
    builder.begin_path();
    builder.move_to(50.0, 50.0);
    builder.line_to(200.0, 60.0);
    builder.line_to(80.0, 180.0);
    builder.line_to(250.0, 300.0);
    builder.stroke();
    let geometry = builder.into_geometry();

    assert_eq!(geometry.groups().len(), 1);
    assert!(geometry.vertex_count() > 8);

    canvas.place(&geometry);
    assert_eq!(canvas.batches().len(), 1);
    assert_eq!(canvas.batches()[0].kind, BatchKind::ConvexFill);
}

#[test]
fn test_finish_hands_frame_to_writer() {
    use vellum_gpu::command::CommandWriter;
    use vellum_gpu::data::{Batch, ImageRef, PaintParams, Vertex};

    #[derive(Default)]
    struct CapturingWriter {
        vertices: usize,
        indices: usize,
        params: usize,
        images: usize,
        batches: Vec<BatchKind>,
    }

    impl CommandWriter for CapturingWriter {
        fn upload_vertices(&mut self, vertices: &[Vertex]) {
            self.vertices = vertices.len();
        }
        fn upload_indices(&mut self, indices: &[u32]) {
            self.indices = indices.len();
        }
        fn upload_params(&mut self, params: &[PaintParams]) {
            self.params = params.len();
        }
        fn upload_image_table(&mut self, images: &[ImageRef]) {
            self.images = images.len();
        }
        fn draw_batches(&mut self, batches: &[Batch], _payload: &[u8]) {
            self.batches = batches.iter().map(|batch| batch.kind).collect();
        }
    }

    let atlas = default_atlas();
    let mut canvas = Canvas::new(100, 100, &atlas, Vector2F::zero(), 1.0);

    let mut builder = GeometryBuilder::new();
    builder.begin_path();
    builder.rect(10.0, 10.0, 30.0, 30.0);
    builder.fill();
    canvas.place_builder(builder);

    let mut writer = CapturingWriter::default();
    canvas.finish(&mut writer);

    assert_eq!(writer.vertices, 4);
    assert_eq!(writer.indices, 6);
    assert_eq!(writer.params, 1);
    assert_eq!(writer.images, 0);
    assert_eq!(writer.batches, vec![BatchKind::ConvexFill]);
}

#[test]
fn test_print_text_shapes_through_the_font_seam() {
    use vellum_atlas::glyph::{TextAlign, TextShaper};

    /// Lays every character out as a fixed-advance square.
    struct MonospaceShaper;

    impl TextShaper for MonospaceShaper {
        fn shape_text(
            &self,
            font: FontHandle,
            size_px: u16,
            text: &str,
            align: TextAlign,
        ) -> Vec<ShapedGlyph> {
            let advance = size_px as f32;
            let width = advance * text.chars().count() as f32;
            let start = match align {
                TextAlign::Left => 0.0,
                TextAlign::Center => -width * 0.5,
                TextAlign::Right => -width,
            };
            text.chars()
                .enumerate()
                .map(|(i, c)| ShapedGlyph {
                    key: GlyphKey {
                        font,
                        size_px,
                        glyph_index: c as u32,
                        style_flags: 0,
                    },
                    rect: RectF::new(
                        vec2f(start + i as f32 * advance, -advance),
                        Vector2F::splat(advance),
                    ),
                })
                .collect()
        }
    }

    let atlas = GlyphAtlas::new(128, 1);
    let mut builder = GeometryBuilder::new();
    builder.print_text(
        &MonospaceShaper,
        FontHandle(1),
        16,
        "abc",
        TextAlign::Left,
        vec2f(20.0, 100.0),
    );
    let mut geometry = builder.into_geometry();
    assert_eq!(geometry.glyphs().len(), 3);

    geometry.prepare_glyphs_for_rendering(&atlas, &SquareRasterizer);

    let mut canvas = Canvas::new(200, 200, &atlas, Vector2F::zero(), 1.0);
    canvas.place(&geometry);

    // All three glyphs fit one page and flush as a single quad batch.
    assert_eq!(canvas.batches().len(), 1);
    assert_eq!(canvas.vertices().len(), 12);
    assert_eq!(canvas.vertices()[0].pos, vec2f(20.0, 84.0));
}
