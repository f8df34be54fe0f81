// vellum/canvas/src/builder.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The geometry builder: the immediate-mode path API that tessellates into
//! an owned [`Geometry`].
//!
//! Drawing a shape starts with `begin_path()`, which clears the current
//! command stream. Sub-paths are then authored with `move_to`/`line_to`/
//! `bezier_to` and the shape helpers, and finally emitted with `fill()` or
//! `stroke()` under the current render state. Solid shapes should wind
//! counterclockwise and holes clockwise; `path_winding` overrides the
//! winding of the current sub-path.
//!
//! All coordinates are transformed by the current transform at submission
//! time, so transform changes between submissions are free.

use crate::cache::{self, PathCache, PathPoint, PointFlags};
use crate::geometry::{
    CustomRenderInfo, Geometry, GroupKind, RenderGlyph, RenderGroup, RenderVertex, SubPath,
};
use smallvec::SmallVec;
use std::f32::consts::PI;
use vellum_atlas::glyph::{FontHandle, ShapedGlyph, TextAlign, TextShaper};
use vellum_color::ColorU;
use vellum_content::{solid_color, RenderStyle};
use vellum_geometry::rect::RectF;
use vellum_geometry::transform2d::Transform2F;
use vellum_geometry::vector::{vec2f, Vector2F};
use vellum_gpu::data::{BlendOp, PayloadRange};

/// How the ends of open strokes are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineCap {
    Butt,
    Square,
    Round,
}

/// How stroke corners are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineJoin {
    Bevel,
    Round,
    Miter,
}

/// Sub-path orientation. Solid shapes want `CCW`, holes want `CW`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winding {
    CCW,
    CW,
}

/// Control-point distance for a 90° circular arc approximated by one cubic.
const KAPPA90: f32 = 0.5522847493;

/// Coalescing distance between consecutive flattened points.
const MIN_POINT_DIST: f32 = 0.01;

/// Bézier flattening tolerance.
const TESS_TOLERANCE: f32 = 0.25;

/// Hard cap on every builder stack; pushing past it is a programmer error.
const MAX_STACK_DEPTH: usize = 32;

const CMD_MOVE_TO: f32 = 0.0;
const CMD_LINE_TO: f32 = 1.0;
const CMD_BEZIER_TO: f32 = 2.0;
const CMD_CLOSE: f32 = 3.0;
const CMD_WINDING: f32 = 4.0;

/// Everything `fill()`/`stroke()`/`print()` read from the builder at
/// emission time. Saved and restored as one unit by `push_state`.
#[derive(Clone, Copy)]
pub struct RenderState {
    pub fill_style: RenderStyle,
    pub stroke_style: RenderStyle,
    pub op: BlendOp,
    pub line_join: LineJoin,
    pub line_cap: LineCap,
    pub stroke_width: f32,
    pub miter_limit: f32,
    pub alpha: f32,
    pub anti_alias: bool,
    pub fringe_width: f32,
    /// Modulation color for glyphs and raw triangles.
    pub color: ColorU,
}

impl Default for RenderState {
    fn default() -> RenderState {
        RenderState {
            fill_style: solid_color(ColorU::white()),
            stroke_style: solid_color(ColorU::white()),
            op: BlendOp::SourceOver,
            line_join: LineJoin::Miter,
            line_cap: LineCap::Butt,
            stroke_width: 1.0,
            miter_limit: 10.0,
            alpha: 1.0,
            anti_alias: false,
            fringe_width: 0.5,
            color: ColorU::white(),
        }
    }
}

/// Builds a renderable [`Geometry`] step by step.
///
/// The builder owns the geometry it writes; [`GeometryBuilder::into_geometry`]
/// releases it. Reuse an old geometry's allocations with
/// [`GeometryBuilder::with_geometry`].
pub struct GeometryBuilder {
    geometry: Geometry,

    state: RenderState,
    transform: Transform2F,
    transform_inverse: Transform2F,
    transform_inverse_valid: bool,
    style_pivot: Vector2F,
    custom_renderer: CustomRenderInfo,

    state_stack: SmallVec<[RenderState; 4]>,
    transform_stack: SmallVec<[Transform2F; 4]>,
    pivot_stack: SmallVec<[Vector2F; 4]>,
    renderer_stack: SmallVec<[CustomRenderInfo; 4]>,

    commands: SmallVec<[f32; 256]>,
    /// Last authored point, in untransformed coordinates.
    prev_position: Vector2F,
    has_subpath: bool,

    cache: PathCache,
}

impl GeometryBuilder {
    pub fn new() -> GeometryBuilder {
        GeometryBuilder::with_geometry(Geometry::new())
    }

    /// Starts building into `geometry`, reusing its allocations. The
    /// geometry's previous content is kept; callers wanting a fresh start
    /// should `reset()` it first.
    pub fn with_geometry(geometry: Geometry) -> GeometryBuilder {
        GeometryBuilder {
            geometry,
            state: RenderState::default(),
            transform: Transform2F::default(),
            transform_inverse: Transform2F::default(),
            transform_inverse_valid: true,
            style_pivot: Vector2F::zero(),
            custom_renderer: CustomRenderInfo::default(),
            state_stack: SmallVec::new(),
            transform_stack: SmallVec::new(),
            pivot_stack: SmallVec::new(),
            renderer_stack: SmallVec::new(),
            commands: SmallVec::new(),
            prev_position: Vector2F::zero(),
            has_subpath: false,
            cache: PathCache::new(MIN_POINT_DIST, TESS_TOLERANCE),
        }
    }

    /// Finishes building and releases the geometry.
    pub fn into_geometry(self) -> Geometry {
        self.geometry
    }

    /// Clears the rendering state, transform and stacks. Does not touch the
    /// output geometry.
    pub fn reset(&mut self) {
        self.state = RenderState::default();
        self.transform = Transform2F::default();
        self.transform_inverse = Transform2F::default();
        self.transform_inverse_valid = true;
        self.style_pivot = Vector2F::zero();
        self.custom_renderer = CustomRenderInfo::default();
        self.state_stack.clear();
        self.transform_stack.clear();
        self.pivot_stack.clear();
        self.renderer_stack.clear();
        self.commands.clear();
        self.has_subpath = false;
    }

    // Render state

    #[inline]
    pub fn state(&self) -> &RenderState {
        &self.state
    }

    #[inline]
    pub fn fill_style(&self) -> &RenderStyle {
        &self.state.fill_style
    }

    #[inline]
    pub fn stroke_style(&self) -> &RenderStyle {
        &self.state.stroke_style
    }

    /// Sets the composite operation. The blend mode is recorded on emitted
    /// groups, so backgrounds, content and frames can share one geometry.
    #[inline]
    pub fn blending(&mut self, op: BlendOp) {
        self.state.op = op;
    }

    pub fn push_state(&mut self) {
        assert!(self.state_stack.len() < MAX_STACK_DEPTH, "render state stack overflow");
        self.state_stack.push(self.state);
    }

    pub fn pop_state(&mut self) {
        match self.state_stack.pop() {
            Some(state) => self.state = state,
            None => warn!("pop_state on an empty stack; ignored"),
        }
    }

    pub fn reset_state(&mut self) {
        self.state = RenderState::default();
    }

    /// Sets the stroke style to a solid color of the given width.
    pub fn stroke_color(&mut self, color: ColorU, width: f32) {
        self.state.stroke_style = solid_color(color);
        self.state.stroke_width = width;
    }

    /// Sets the stroke style to a paint: a gradient or an image pattern.
    pub fn stroke_paint(&mut self, style: RenderStyle, width: f32) {
        self.state.stroke_style = style;
        self.state.stroke_width = width;
    }

    /// Sets the fill style to a solid color.
    pub fn fill_color(&mut self, color: ColorU) {
        self.state.fill_style = solid_color(color);
    }

    /// Sets the fill style to a paint: a gradient or an image pattern.
    pub fn fill_paint(&mut self, style: RenderStyle) {
        self.state.fill_style = style;
    }

    /// Controls when a sharp miter corner falls back to a bevel.
    #[inline]
    pub fn miter_limit(&mut self, limit: f32) {
        self.state.miter_limit = limit;
    }

    #[inline]
    pub fn line_cap(&mut self, cap: LineCap) {
        self.state.line_cap = cap;
    }

    #[inline]
    pub fn line_join(&mut self, join: LineJoin) {
        self.state.line_join = join;
    }

    /// Transparency applied to everything emitted; already transparent
    /// paints become proportionally more transparent.
    #[inline]
    pub fn global_alpha(&mut self, alpha: f32) {
        self.state.alpha = alpha;
    }

    #[inline]
    pub fn antialiasing(&mut self, enabled: bool) {
        self.state.anti_alias = enabled;
    }

    /// Modulation color for glyphs and raw triangles.
    #[inline]
    pub fn color(&mut self, color: ColorU) {
        self.state.color = color;
    }

    // Transforms

    #[inline]
    pub fn transform(&self) -> &Transform2F {
        &self.transform
    }

    fn set_transform(&mut self, transform: Transform2F) {
        self.transform = transform;
        self.transform_inverse_valid = false;
    }

    pub fn reset_transform(&mut self) {
        self.set_transform(Transform2F::default());
    }

    pub fn push_transform(&mut self) {
        assert!(self.transform_stack.len() < MAX_STACK_DEPTH, "transform stack overflow");
        self.transform_stack.push(self.transform);
    }

    pub fn pop_transform(&mut self) {
        match self.transform_stack.pop() {
            Some(transform) => self.set_transform(transform),
            None => warn!("pop_transform on an empty stack; ignored"),
        }
    }

    /// Multiplies the current coordinate system from the left by the given
    /// matrix.
    pub fn apply_transform(&mut self, m11: f32, m12: f32, m21: f32, m22: f32, m31: f32, m32: f32) {
        let transform = Transform2F::row_major(m11, m12, m21, m22, m31, m32);
        self.set_transform(transform.post_mul(&self.transform));
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        let transform = Transform2F::from_translation(vec2f(x, y)).post_mul(&self.transform);
        self.set_transform(transform);
    }

    /// Translates in output space, ignoring the current rotation and scale.
    pub fn offset(&mut self, x: f32, y: f32) {
        let transform = self.transform.offset(vec2f(x, y));
        self.set_transform(transform);
    }

    pub fn rotate(&mut self, angle: f32) {
        let transform = Transform2F::from_rotation(angle).post_mul(&self.transform);
        self.set_transform(transform);
    }

    pub fn skew_x(&mut self, angle: f32) {
        let transform = Transform2F::from_skew_x(angle).post_mul(&self.transform);
        self.set_transform(transform);
    }

    pub fn skew_y(&mut self, angle: f32) {
        let transform = Transform2F::from_skew_y(angle).post_mul(&self.transform);
        self.set_transform(transform);
    }

    pub fn scale(&mut self, x: f32, y: f32) {
        let transform = Transform2F::from_scale(vec2f(x, y)).post_mul(&self.transform);
        self.set_transform(transform);
    }

    fn inverse_transform(&mut self) -> Transform2F {
        if !self.transform_inverse_valid {
            self.transform_inverse = self.transform.inverse();
            self.transform_inverse_valid = true;
        }
        self.transform_inverse
    }

    // Style pivot

    /// Sets the anchor point for paint pattern application.
    pub fn style_pivot(&mut self, x: f32, y: f32) {
        self.style_pivot = vec2f(x, y);
    }

    pub fn reset_style_pivot(&mut self) {
        self.style_pivot = Vector2F::zero();
        self.pivot_stack.clear();
    }

    pub fn push_style_pivot(&mut self) {
        assert!(self.pivot_stack.len() < MAX_STACK_DEPTH, "style pivot stack overflow");
        self.pivot_stack.push(self.style_pivot);
    }

    pub fn pop_style_pivot(&mut self) {
        match self.pivot_stack.pop() {
            Some(pivot) => self.style_pivot = pivot,
            None => warn!("pop_style_pivot on an empty stack; ignored"),
        }
    }

    // Custom renderers

    /// Routes subsequent emissions to an externally registered drawer. The
    /// payload bytes are copied into the geometry's side buffer and handed
    /// back to the drawer at render time.
    pub fn select_renderer(&mut self, drawer: u16, payload: &[u8]) {
        let payload_range = if payload.is_empty() {
            PayloadRange::default()
        } else {
            let offset = self.geometry.renderer_data.len() as u32;
            self.geometry.renderer_data.extend_from_slice(payload);
            PayloadRange { offset, size: payload.len() as u32 }
        };
        self.custom_renderer = CustomRenderInfo { drawer, payload: payload_range };
    }

    /// Returns to the built-in pipeline.
    pub fn select_default_renderer(&mut self) {
        self.custom_renderer = CustomRenderInfo::default();
    }

    pub fn push_renderer(&mut self) {
        assert!(self.renderer_stack.len() < MAX_STACK_DEPTH, "renderer stack overflow");
        self.renderer_stack.push(self.custom_renderer);
    }

    pub fn pop_renderer(&mut self) {
        match self.renderer_stack.pop() {
            Some(renderer) => self.custom_renderer = renderer,
            None => warn!("pop_renderer on an empty stack; ignored"),
        }
    }

    // Path authoring

    /// Clears the current path and sub-paths.
    pub fn begin_path(&mut self) {
        self.commands.clear();
        self.cache.reset();
        self.has_subpath = false;
    }

    /// Starts a new sub-path at the given point.
    pub fn move_to(&mut self, x: f32, y: f32) {
        self.has_subpath = true;
        self.append_commands(&mut [CMD_MOVE_TO, x, y]);
    }

    /// Adds a line segment from the last point to the given point.
    pub fn line_to(&mut self, x: f32, y: f32) {
        if !self.has_subpath {
            warn!("line_to with no current sub-path; ignored");
            return;
        }
        self.append_commands(&mut [CMD_LINE_TO, x, y]);
    }

    /// Adds a cubic Bézier from the last point via two control points.
    pub fn bezier_to(&mut self, c1x: f32, c1y: f32, c2x: f32, c2y: f32, x: f32, y: f32) {
        if !self.has_subpath {
            warn!("bezier_to with no current sub-path; ignored");
            return;
        }
        self.append_commands(&mut [CMD_BEZIER_TO, c1x, c1y, c2x, c2y, x, y]);
    }

    /// Adds a quadratic Bézier from the last point via one control point,
    /// by promotion to a cubic.
    pub fn quad_to(&mut self, cx: f32, cy: f32, x: f32, y: f32) {
        if !self.has_subpath {
            warn!("quad_to with no current sub-path; ignored");
            return;
        }
        let p = self.prev_position;
        self.append_commands(&mut [
            CMD_BEZIER_TO,
            p.x + 2.0 / 3.0 * (cx - p.x),
            p.y + 2.0 / 3.0 * (cy - p.y),
            x + 2.0 / 3.0 * (cx - x),
            y + 2.0 / 3.0 * (cy - y),
            x,
            y,
        ]);
    }

    /// Adds an arc segment at the corner defined by the last path point and
    /// two more points, with the given fillet radius.
    pub fn arc_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, radius: f32) {
        if !self.has_subpath {
            warn!("arc_to with no current sub-path; ignored");
            return;
        }

        let p0 = self.prev_position;
        let p1 = vec2f(x1, y1);
        let p2 = vec2f(x2, y2);

        if p0.approx_eq(p1, MIN_POINT_DIST)
            || p1.approx_eq(p2, MIN_POINT_DIST)
            || dist_point_segment(p1, p0, p2) < MIN_POINT_DIST * MIN_POINT_DIST
            || radius < MIN_POINT_DIST
        {
            self.line_to(x1, y1);
            return;
        }

        let d0 = (p0 - p1).normalize();
        let d1 = (p2 - p1).normalize();
        let angle = f32::acos(d0.dot(d1));
        let dist = radius / f32::tan(angle / 2.0);

        if dist > 10000.0 {
            self.line_to(x1, y1);
            return;
        }

        let (center, a0, a1, dir) = if d1.x * d0.y - d0.x * d1.y > 0.0 {
            (
                vec2f(p1.x + d0.x * dist + d0.y * radius, p1.y + d0.y * dist - d0.x * radius),
                f32::atan2(d0.x, -d0.y),
                f32::atan2(-d1.x, d1.y),
                Winding::CW,
            )
        } else {
            (
                vec2f(p1.x + d0.x * dist - d0.y * radius, p1.y + d0.y * dist + d0.x * radius),
                f32::atan2(-d0.x, d0.y),
                f32::atan2(d1.x, -d1.y),
                Winding::CCW,
            )
        };

        self.arc(center.x, center.y, radius, a0, a1, dir);
    }

    /// Adds a circle-arc sub-path around `(cx, cy)` from angle `a0` to
    /// `a1` (radians), swept in direction `dir`.
    pub fn arc(&mut self, cx: f32, cy: f32, r: f32, a0: f32, a1: f32, dir: Winding) {
        let join = self.has_subpath;

        // Clamp the sweep.
        let mut da = a1 - a0;
        if dir == Winding::CW {
            if f32::abs(da) >= PI * 2.0 {
                da = PI * 2.0;
            } else {
                while da < 0.0 {
                    da += PI * 2.0;
                }
            }
        } else if f32::abs(da) >= PI * 2.0 {
            da = -PI * 2.0;
        } else {
            while da > 0.0 {
                da -= PI * 2.0;
            }
        }

        // One cubic per quarter turn.
        let ndivs = i32::max(1, i32::min((f32::abs(da) / (PI * 0.5) + 0.5) as i32, 5));
        let hda = (da / ndivs as f32) / 2.0;
        let mut kappa = f32::abs(4.0 / 3.0 * (1.0 - f32::cos(hda)) / f32::sin(hda));
        if dir == Winding::CCW {
            kappa = -kappa;
        }

        let mut commands: SmallVec<[f32; 64]> = SmallVec::new();
        let mut prev_pos = Vector2F::zero();
        let mut prev_tan = Vector2F::zero();
        for i in 0..=ndivs {
            let a = a0 + da * (i as f32 / ndivs as f32);
            let (sin, cos) = a.sin_cos();
            let pos = vec2f(cx + cos * r, cy + sin * r);
            let tan = vec2f(-sin * r * kappa, cos * r * kappa);

            if i == 0 {
                commands.push(if join { CMD_LINE_TO } else { CMD_MOVE_TO });
                commands.push(pos.x);
                commands.push(pos.y);
            } else {
                commands.push(CMD_BEZIER_TO);
                commands.push(prev_pos.x + prev_tan.x);
                commands.push(prev_pos.y + prev_tan.y);
                commands.push(pos.x - tan.x);
                commands.push(pos.y - tan.y);
                commands.push(pos.x);
                commands.push(pos.y);
            }
            prev_pos = pos;
            prev_tan = tan;
        }

        self.has_subpath = true;
        self.append_commands(&mut commands);
    }

    /// Adds a rectangle sub-path.
    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.has_subpath = true;
        self.append_commands(&mut [
            CMD_MOVE_TO, x, y,
            CMD_LINE_TO, x, y + h,
            CMD_LINE_TO, x + w, y + h,
            CMD_LINE_TO, x + w, y,
            CMD_CLOSE,
        ]);
    }

    /// Adds a rounded rectangle sub-path with one radius for all corners.
    pub fn rounded_rect(&mut self, x: f32, y: f32, w: f32, h: f32, r: f32) {
        self.rounded_rect_varying(x, y, w, h, r, r, r, r);
    }

    /// Adds a rounded rectangle sub-path with per-corner radii.
    pub fn rounded_rect_varying(
        &mut self,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        rad_top_left: f32,
        rad_top_right: f32,
        rad_bottom_right: f32,
        rad_bottom_left: f32,
    ) {
        if rad_top_left < 0.1 && rad_top_right < 0.1 && rad_bottom_right < 0.1
            && rad_bottom_left < 0.1
        {
            self.rect(x, y, w, h);
            return;
        }

        let half_w = f32::abs(w) * 0.5;
        let half_h = f32::abs(h) * 0.5;
        let sign_w = if w < 0.0 { -1.0 } else { 1.0 };
        let sign_h = if h < 0.0 { -1.0 } else { 1.0 };
        let rx_bl = f32::min(rad_bottom_left, half_w) * sign_w;
        let ry_bl = f32::min(rad_bottom_left, half_h) * sign_h;
        let rx_br = f32::min(rad_bottom_right, half_w) * sign_w;
        let ry_br = f32::min(rad_bottom_right, half_h) * sign_h;
        let rx_tl = f32::min(rad_top_left, half_w) * sign_w;
        let ry_tl = f32::min(rad_top_left, half_h) * sign_h;
        let rx_tr = f32::min(rad_top_right, half_w) * sign_w;
        let ry_tr = f32::min(rad_top_right, half_h) * sign_h;
        let k = 1.0 - KAPPA90;

        self.has_subpath = true;
        self.append_commands(&mut [
            CMD_MOVE_TO, x, y + ry_tl,
            CMD_LINE_TO, x, y + h - ry_bl,
            CMD_BEZIER_TO, x, y + h - ry_bl * k, x + rx_bl * k, y + h, x + rx_bl, y + h,
            CMD_LINE_TO, x + w - rx_br, y + h,
            CMD_BEZIER_TO, x + w - rx_br * k, y + h, x + w, y + h - ry_br * k, x + w,
                y + h - ry_br,
            CMD_LINE_TO, x + w, y + ry_tr,
            CMD_BEZIER_TO, x + w, y + ry_tr * k, x + w - rx_tr * k, y, x + w - rx_tr, y,
            CMD_LINE_TO, x + rx_tl, y,
            CMD_BEZIER_TO, x + rx_tl * k, y, x, y + ry_tl * k, x, y + ry_tl,
            CMD_CLOSE,
        ]);
    }

    /// Adds an ellipse sub-path.
    pub fn ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32) {
        self.has_subpath = true;
        self.append_commands(&mut [
            CMD_MOVE_TO, cx - rx, cy,
            CMD_BEZIER_TO, cx - rx, cy + ry * KAPPA90, cx - rx * KAPPA90, cy + ry, cx, cy + ry,
            CMD_BEZIER_TO, cx + rx * KAPPA90, cy + ry, cx + rx, cy + ry * KAPPA90, cx + rx, cy,
            CMD_BEZIER_TO, cx + rx, cy - ry * KAPPA90, cx + rx * KAPPA90, cy - ry, cx, cy - ry,
            CMD_BEZIER_TO, cx - rx * KAPPA90, cy - ry, cx - rx, cy - ry * KAPPA90, cx - rx, cy,
            CMD_CLOSE,
        ]);
    }

    /// Adds a circle sub-path.
    #[inline]
    pub fn circle(&mut self, cx: f32, cy: f32, r: f32) {
        self.ellipse(cx, cy, r, r);
    }

    /// Closes the current sub-path with a line segment.
    pub fn close_path(&mut self) {
        self.append_commands(&mut [CMD_CLOSE]);
    }

    /// Overrides the winding of the current sub-path.
    pub fn path_winding(&mut self, dir: Winding) {
        self.append_commands(&mut [CMD_WINDING, winding_to_f32(dir)]);
    }

    fn append_commands(&mut self, vals: &mut [f32]) {
        // Track the untransformed tail for quad_to/arc_to.
        let tag = vals[0];
        if tag != CMD_CLOSE && tag != CMD_WINDING {
            self.prev_position = vec2f(vals[vals.len() - 2], vals[vals.len() - 1]);
        }

        // Pre-transform every coordinate pair.
        let mut i = 0;
        while i < vals.len() {
            match vals[i] as u32 {
                0 | 1 => {
                    // MoveTo / LineTo
                    let p = self.transform.transform_point(vec2f(vals[i + 1], vals[i + 2]));
                    vals[i + 1] = p.x;
                    vals[i + 2] = p.y;
                    i += 3;
                }
                2 => {
                    for k in 0..3 {
                        let at = i + 1 + k * 2;
                        let p = self.transform.transform_point(vec2f(vals[at], vals[at + 1]));
                        vals[at] = p.x;
                        vals[at + 1] = p.y;
                    }
                    i += 7;
                }
                3 => i += 1,
                _ => i += 2,
            }
        }

        self.commands.extend_from_slice(vals);
    }

    fn flatten_paths(&mut self) {
        self.cache.reset();

        let commands = &self.commands;
        let cache = &mut self.cache;
        let mut i = 0;
        while i < commands.len() {
            match commands[i] as u32 {
                0 => {
                    cache.add_path();
                    cache.add_point(vec2f(commands[i + 1], commands[i + 2]), PointFlags::CORNER);
                    i += 3;
                }
                1 => {
                    cache.add_point(vec2f(commands[i + 1], commands[i + 2]), PointFlags::CORNER);
                    i += 3;
                }
                2 => {
                    if let Some(last) = cache.points.last() {
                        let p1 = last.pos;
                        cache.add_bezier(
                            p1,
                            vec2f(commands[i + 1], commands[i + 2]),
                            vec2f(commands[i + 3], commands[i + 4]),
                            vec2f(commands[i + 5], commands[i + 6]),
                            0,
                            PointFlags::CORNER,
                        );
                    }
                    i += 7;
                }
                3 => {
                    cache.close_path();
                    i += 1;
                }
                _ => {
                    cache.set_winding(winding_from_f32(commands[i + 1]));
                    i += 2;
                }
            }
        }

        cache.compute_deltas();
    }

    // Emission

    fn effective_style(style: &RenderStyle, alpha: f32) -> RenderStyle {
        if alpha >= 1.0 {
            *style
        } else {
            style.with_modulated_alpha(alpha)
        }
    }

    /// Emits the current path, filled with the current fill style.
    pub fn fill(&mut self) {
        self.flatten_paths();

        let state = self.state;
        let fringe = if state.anti_alias { state.fringe_width } else { 0.0 };
        // Joins are classified at fringe width whether or not a fringe is
        // emitted, and always mitered; 2.4 is steep enough that only needle
        // corners bevel.
        self.cache.compute_joins(state.fringe_width, LineJoin::Miter, 2.4);

        if self.cache.points.is_empty() {
            return;
        }

        let style = Self::effective_style(&state.fill_style, state.alpha);
        let style_index = self.geometry.intern_style(&style);

        let first_path = self.geometry.paths.len() as u32;
        let first_vertex = self.geometry.vertices.len() as u32;
        let first_emitted = first_vertex as usize;
        let mut bounds = Bounds::empty();

        let convex = self.cache.paths.len() == 1 && self.cache.paths[0].convex;
        let woff = 0.5 * fringe;

        let expected = self.cache.expected_fill_vertex_count(fringe > 0.0)
            + if convex { 0 } else { 4 };
        self.geometry.vertices.reserve(expected);

        let cache = &self.cache;
        let geometry = &mut self.geometry;

        // Fill fans for every sub-path, then fringe strips, then (for
        // concave groups) the four-vertex cover quad.
        let mut sub_paths: SmallVec<[SubPath; 8]> = SmallVec::new();
        for path in &cache.paths {
            if path.count < 3 {
                sub_paths.push(SubPath::default());
                continue;
            }
            let points = &cache.points[path.first..path.first + path.count];

            let fan_start = geometry.vertices.len() as u32;
            if fringe > 0.0 {
                let mut prev = path.count - 1;
                for i in 0..path.count {
                    let p0 = points[prev];
                    let p1 = points[i];
                    if p1.flags.contains(PointFlags::BEVEL) {
                        if p1.flags.contains(PointFlags::LEFT) {
                            emit(geometry, &mut bounds, p1.pos + p1.dm.scale(woff), 0.5, 1.0);
                        } else {
                            let l0 = p1.pos + p0.d.perp().scale(woff);
                            let l1 = p1.pos + p1.d.perp().scale(woff);
                            emit(geometry, &mut bounds, l0, 0.5, 1.0);
                            emit(geometry, &mut bounds, l1, 0.5, 1.0);
                        }
                    } else {
                        emit(geometry, &mut bounds, p1.pos + p1.dm.scale(woff), 0.5, 1.0);
                    }
                    prev = i;
                }
            } else {
                for point in points {
                    emit(geometry, &mut bounds, point.pos, 0.5, 1.0);
                }
            }
            let fill_count = geometry.vertices.len() as u32 - fan_start;

            sub_paths.push(SubPath {
                first_fill_vertex: fan_start,
                fill_count,
                first_stroke_vertex: 0,
                stroke_count: 0,
            });
        }

        if fringe > 0.0 {
            // Convex shapes get only half a fringe, fading from the fan
            // edge outward, so they render without stenciling.
            let (lw, lu) = if convex { (woff, 0.5) } else { (fringe + woff, 0.0) };
            let rw = fringe - woff;
            let ru = 1.0;

            for (path_index, path) in cache.paths.iter().enumerate() {
                if path.count < 3 {
                    continue;
                }
                let points = &cache.points[path.first..path.first + path.count];
                let strip_start = geometry.vertices.len() as u32;

                let mut prev = path.count - 1;
                for i in 0..path.count {
                    let p0 = points[prev];
                    let p1 = points[i];
                    if p1
                        .flags
                        .intersects(PointFlags::BEVEL | PointFlags::INNER_BEVEL)
                    {
                        bevel_join(geometry, &mut bounds, &p0, &p1, lw, rw, lu, ru);
                    } else {
                        emit(geometry, &mut bounds, p1.pos + p1.dm.scale(lw), lu, 1.0);
                        emit(geometry, &mut bounds, p1.pos - p1.dm.scale(rw), ru, 1.0);
                    }
                    prev = i;
                }

                let sub_path = &mut sub_paths[path_index];
                sub_path.first_stroke_vertex = strip_start;
                sub_path.stroke_count = geometry.vertices.len() as u32 - strip_start;
            }
        }

        if geometry.vertices.len() == first_emitted {
            return;
        }

        // The cover quad for the stencil fill pass spans the group bounds.
        if !convex {
            let (min, max) = (bounds.min, bounds.max);
            emit(geometry, &mut bounds, min, 0.5, 1.0);
            emit(geometry, &mut bounds, vec2f(max.x, min.y), 0.5, 1.0);
            emit(geometry, &mut bounds, max, 0.5, 1.0);
            emit(geometry, &mut bounds, vec2f(min.x, max.y), 0.5, 1.0);
        }

        geometry.paths.extend_from_slice(&sub_paths);

        let vertex_count = geometry.vertices.len() as u32 - first_vertex;
        debug_assert!(vertex_count as usize <= expected);
        self.apply_paint_uv(first_emitted, &style);

        let group = RenderGroup {
            kind: GroupKind::Fill,
            style_index,
            op: state.op,
            convex,
            first_path,
            path_count: self.geometry.paths.len() as u32 - first_path,
            first_vertex,
            vertex_count,
            first_glyph: 0,
            glyph_count: 0,
            custom: self.custom_renderer,
            bounds_min: bounds.min,
            bounds_max: bounds.max,
        };
        self.geometry.groups.push(group);
        self.geometry.union_bounds(bounds.min, bounds.max);
    }

    /// Emits the current path, stroked with the current stroke style.
    pub fn stroke(&mut self) {
        let state = self.state;
        let scale = self.transform.approx_scale();
        let stroke_width = vellum_geometry::util::clamp(state.stroke_width * scale, 0.0, 200.0);

        if stroke_width <= 0.0 {
            return;
        }

        self.flatten_paths();
        if self.cache.points.is_empty() {
            return;
        }

        let fringe = if state.anti_alias { state.fringe_width } else { 0.0 };
        let half_width = stroke_width * 0.5 + fringe * 0.5;
        let (u0, u1) = if fringe > 0.0 { (0.0, 1.0) } else { (0.5, 0.5) };
        let ncap = cache::curve_divs(half_width, PI, self.cache.tess_tol());

        self.cache
            .compute_joins(half_width, state.line_join, state.miter_limit);

        let style = Self::effective_style(&state.stroke_style, state.alpha);
        let style_index = self.geometry.intern_style(&style);

        let first_path = self.geometry.paths.len() as u32;
        let first_vertex = self.geometry.vertices.len() as u32;
        let mut bounds = Bounds::empty();

        let expected =
            self.cache
                .expected_stroke_vertex_count(state.line_join, state.line_cap, half_width);
        self.geometry.vertices.reserve(expected);

        let cache = &self.cache;
        let geometry = &mut self.geometry;

        for path in &cache.paths {
            if path.count < 2 {
                geometry.paths.push(SubPath::default());
                continue;
            }
            let points = &cache.points[path.first..path.first + path.count];
            let strip_start = geometry.vertices.len() as u32;

            let looped = path.closed;
            let (start, end) = if looped {
                (0, path.count)
            } else {
                (1, path.count - 1)
            };

            let mut p0_index = if looped { path.count - 1 } else { 0 };

            if !looped {
                let p0 = points[0];
                let p1 = points[1];
                let d = (p1.pos - p0.pos).normalize();
                match state.line_cap {
                    LineCap::Butt => {
                        butt_cap_start(geometry, &mut bounds, &p0, d, half_width,
                                       -fringe * 0.5, fringe, u0, u1)
                    }
                    LineCap::Square => {
                        butt_cap_start(geometry, &mut bounds, &p0, d, half_width,
                                       half_width - fringe, fringe, u0, u1)
                    }
                    LineCap::Round => {
                        round_cap_start(geometry, &mut bounds, &p0, d, half_width, ncap, u0, u1)
                    }
                }
            }

            for i in start..end {
                let p0 = points[p0_index];
                let p1 = points[i];
                if p1
                    .flags
                    .intersects(PointFlags::BEVEL | PointFlags::INNER_BEVEL)
                {
                    if state.line_join == LineJoin::Round {
                        round_join(geometry, &mut bounds, &p0, &p1, half_width, half_width,
                                   u0, u1, ncap);
                    } else {
                        bevel_join(geometry, &mut bounds, &p0, &p1, half_width, half_width,
                                   u0, u1);
                    }
                } else {
                    emit(geometry, &mut bounds, p1.pos + p1.dm.scale(half_width), u0, 1.0);
                    emit(geometry, &mut bounds, p1.pos - p1.dm.scale(half_width), u1, 1.0);
                }
                p0_index = i;
            }

            if looped {
                // Close the strip by repeating the first pair.
                let first = geometry.vertices[strip_start as usize];
                let second = geometry.vertices[strip_start as usize + 1];
                let (fp, fu) = (first.pos, first.uv);
                let (sp, su) = (second.pos, second.uv);
                emit(geometry, &mut bounds, fp, fu.x, fu.y);
                emit(geometry, &mut bounds, sp, su.x, su.y);
            } else {
                let p0 = points[path.count - 2];
                let p1 = points[path.count - 1];
                let d = (p1.pos - p0.pos).normalize();
                match state.line_cap {
                    LineCap::Butt => {
                        butt_cap_end(geometry, &mut bounds, &p1, d, half_width,
                                     -fringe * 0.5, fringe, u0, u1)
                    }
                    LineCap::Square => {
                        butt_cap_end(geometry, &mut bounds, &p1, d, half_width,
                                     half_width - fringe, fringe, u0, u1)
                    }
                    LineCap::Round => {
                        round_cap_end(geometry, &mut bounds, &p1, d, half_width, ncap, u0, u1)
                    }
                }
            }

            geometry.paths.push(SubPath {
                first_fill_vertex: 0,
                fill_count: 0,
                first_stroke_vertex: strip_start,
                stroke_count: geometry.vertices.len() as u32 - strip_start,
            });
        }

        let vertex_count = self.geometry.vertices.len() as u32 - first_vertex;
        if vertex_count == 0 {
            self.geometry.paths.truncate(first_path as usize);
            return;
        }
        debug_assert!(vertex_count as usize <= expected);

        self.apply_paint_uv(first_vertex as usize, &style);

        let group = RenderGroup {
            kind: GroupKind::Stroke,
            style_index,
            op: state.op,
            convex: false,
            first_path,
            path_count: self.geometry.paths.len() as u32 - first_path,
            first_vertex,
            vertex_count,
            first_glyph: 0,
            glyph_count: 0,
            custom: self.custom_renderer,
            bounds_min: bounds.min,
            bounds_max: bounds.max,
        };
        self.geometry.groups.push(group);
        self.geometry.union_bounds(bounds.min, bounds.max);
    }

    /// Emits a raw triangle list (three vertices per triangle) under the
    /// current fill style. Positions are in local space; UVs pass through.
    pub fn triangles(&mut self, vertices: &[(Vector2F, Vector2F)]) {
        if vertices.len() < 3 {
            return;
        }

        let state = self.state;
        let style = Self::effective_style(&state.fill_style, state.alpha);
        let style_index = self.geometry.intern_style(&style);

        let first_vertex = self.geometry.vertices.len() as u32;
        let mut bounds = Bounds::empty();

        for &(pos, uv) in vertices {
            let world = self.transform.transform_point(pos);
            bounds.add(world);
            self.geometry.vertices.push(RenderVertex {
                pos: world,
                uv,
                paint_uv: Vector2F::zero(),
            });
        }

        self.apply_paint_uv(first_vertex as usize, &style);

        let group = RenderGroup {
            kind: GroupKind::Triangles,
            style_index,
            op: state.op,
            convex: true,
            first_path: 0,
            path_count: 0,
            first_vertex,
            vertex_count: self.geometry.vertices.len() as u32 - first_vertex,
            first_glyph: 0,
            glyph_count: 0,
            custom: self.custom_renderer,
            bounds_min: bounds.min,
            bounds_max: bounds.max,
        };
        self.geometry.groups.push(group);
        self.geometry.union_bounds(bounds.min, bounds.max);
    }

    /// Shapes `text` through the font subsystem and inserts the resulting
    /// glyph run at `origin`.
    pub fn print_text(
        &mut self,
        shaper: &dyn TextShaper,
        font: FontHandle,
        size_px: u16,
        text: &str,
        align: TextAlign,
        origin: Vector2F,
    ) {
        let mut shaped = shaper.shape_text(font, size_px, text, align);
        for glyph in &mut shaped {
            glyph.rect = RectF::new(glyph.rect.origin() + origin, glyph.rect.size());
        }
        self.print(&shaped);
    }

    /// Inserts a run of shaped glyphs, transformed by the current
    /// transform and modulated by the current color. Atlas UVs are resolved
    /// at submission time, not here, so glyph cache rebuilds never
    /// invalidate the geometry.
    pub fn print(&mut self, glyphs: &[ShapedGlyph]) {
        if glyphs.is_empty() {
            return;
        }

        let state = self.state;
        let color = modulate_alpha(state.color, state.alpha);
        let first_glyph = self.geometry.glyphs.len() as u32;
        let mut bounds = Bounds::empty();

        for glyph in glyphs {
            let rect = glyph.rect;
            let coords = [
                self.transform.transform_point(rect.origin()),
                self.transform.transform_point(rect.upper_right()),
                self.transform.transform_point(rect.lower_right()),
                self.transform.transform_point(rect.lower_left()),
            ];
            for corner in &coords {
                bounds.add(*corner);
            }
            self.geometry.glyphs.push(RenderGlyph {
                key: glyph.key,
                coords,
                uv_min: Vector2F::zero(),
                uv_max: Vector2F::zero(),
                page: 0,
                color,
            });
        }

        let group = RenderGroup {
            kind: GroupKind::Glyphs,
            style_index: 0,
            op: state.op,
            convex: false,
            first_path: 0,
            path_count: 0,
            first_vertex: 0,
            vertex_count: 0,
            first_glyph,
            glyph_count: self.geometry.glyphs.len() as u32 - first_glyph,
            custom: self.custom_renderer,
            bounds_min: bounds.min,
            bounds_max: bounds.max,
        };
        self.geometry.groups.push(group);
        self.geometry.union_bounds(bounds.min, bounds.max);

        // New glyphs carry no UVs yet; force the next resolve.
        self.geometry.glyph_cache_version = 0;
    }

    fn apply_paint_uv(&mut self, first_vertex: usize, style: &RenderStyle) {
        let inverse = self.inverse_transform();
        let pivot = self.style_pivot;
        for vertex in &mut self.geometry.vertices[first_vertex..] {
            let local = inverse.transform_point(vertex.pos) - pivot;
            vertex.paint_uv = if style.xform_needed {
                style.xform.transform_point(local)
            } else {
                local
            };
        }
    }
}

impl Default for GeometryBuilder {
    #[inline]
    fn default() -> GeometryBuilder {
        GeometryBuilder::new()
    }
}

// Expansion helpers. These write raw tessellation vertices; paint UVs are
// applied in a later pass over the emitted range.

struct Bounds {
    min: Vector2F,
    max: Vector2F,
}

impl Bounds {
    fn empty() -> Bounds {
        Bounds {
            min: Vector2F::splat(f32::MAX),
            max: Vector2F::splat(f32::MIN),
        }
    }

    #[inline]
    fn add(&mut self, pos: Vector2F) {
        self.min = self.min.min(pos);
        self.max = self.max.max(pos);
    }
}

#[inline]
fn emit(geometry: &mut Geometry, bounds: &mut Bounds, pos: Vector2F, u: f32, v: f32) {
    bounds.add(pos);
    geometry.vertices.push(RenderVertex {
        pos,
        uv: vec2f(u, v),
        paint_uv: Vector2F::zero(),
    });
}

/// Picks the two outer-edge positions of a join: the offset edge endpoints
/// when the inner side is beveled, the miter point otherwise.
fn choose_bevel(
    bevel: bool,
    p0: &PathPoint,
    p1: &PathPoint,
    w: f32,
) -> (Vector2F, Vector2F) {
    if bevel {
        (p1.pos + p0.d.perp().scale(w), p1.pos + p1.d.perp().scale(w))
    } else {
        (p1.pos + p1.dm.scale(w), p1.pos + p1.dm.scale(w))
    }
}

fn bevel_join(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p0: &PathPoint,
    p1: &PathPoint,
    lw: f32,
    rw: f32,
    lu: f32,
    ru: f32,
) {
    let dl0 = p0.d.perp();
    let dl1 = p1.d.perp();

    if p1.flags.contains(PointFlags::LEFT) {
        let (l0, l1) =
            choose_bevel(p1.flags.contains(PointFlags::INNER_BEVEL), p0, p1, lw);

        emit(geometry, bounds, l0, lu, 1.0);
        emit(geometry, bounds, p1.pos - dl0.scale(rw), ru, 1.0);

        if p1.flags.contains(PointFlags::BEVEL) {
            emit(geometry, bounds, l0, lu, 1.0);
            emit(geometry, bounds, p1.pos - dl0.scale(rw), ru, 1.0);
            emit(geometry, bounds, l1, lu, 1.0);
            emit(geometry, bounds, p1.pos - dl1.scale(rw), ru, 1.0);
        } else {
            let r0 = p1.pos - p1.dm.scale(rw);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
            emit(geometry, bounds, p1.pos - dl0.scale(rw), ru, 1.0);
            emit(geometry, bounds, r0, ru, 1.0);
            emit(geometry, bounds, r0, ru, 1.0);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
            emit(geometry, bounds, p1.pos - dl1.scale(rw), ru, 1.0);
        }

        emit(geometry, bounds, l1, lu, 1.0);
        emit(geometry, bounds, p1.pos - dl1.scale(rw), ru, 1.0);
    } else {
        let (r0, r1) =
            choose_bevel(p1.flags.contains(PointFlags::INNER_BEVEL), p0, p1, -rw);

        emit(geometry, bounds, p1.pos + dl0.scale(lw), lu, 1.0);
        emit(geometry, bounds, r0, ru, 1.0);

        if p1.flags.contains(PointFlags::BEVEL) {
            emit(geometry, bounds, p1.pos + dl0.scale(lw), lu, 1.0);
            emit(geometry, bounds, r0, ru, 1.0);
            emit(geometry, bounds, p1.pos + dl1.scale(lw), lu, 1.0);
            emit(geometry, bounds, r1, ru, 1.0);
        } else {
            let l0 = p1.pos + p1.dm.scale(lw);
            emit(geometry, bounds, p1.pos + dl0.scale(lw), lu, 1.0);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
            emit(geometry, bounds, l0, lu, 1.0);
            emit(geometry, bounds, l0, lu, 1.0);
            emit(geometry, bounds, p1.pos + dl1.scale(lw), lu, 1.0);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
        }

        emit(geometry, bounds, p1.pos + dl1.scale(lw), lu, 1.0);
        emit(geometry, bounds, r1, ru, 1.0);
    }
}

fn round_join(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p0: &PathPoint,
    p1: &PathPoint,
    lw: f32,
    rw: f32,
    lu: f32,
    ru: f32,
    ncap: usize,
) {
    let dl0 = p0.d.perp();
    let dl1 = p1.d.perp();

    if p1.flags.contains(PointFlags::LEFT) {
        let (l0, l1) =
            choose_bevel(p1.flags.contains(PointFlags::INNER_BEVEL), p0, p1, lw);
        let a0 = f32::atan2(-dl0.y, -dl0.x);
        let mut a1 = f32::atan2(-dl1.y, -dl1.x);
        if a1 > a0 {
            a1 -= PI * 2.0;
        }

        emit(geometry, bounds, l0, lu, 1.0);
        emit(geometry, bounds, p1.pos - dl0.scale(rw), ru, 1.0);

        let n = usize::max(2, usize::min(
            f32::ceil(((a0 - a1) / PI) * ncap as f32) as usize,
            ncap,
        ));
        for i in 0..n {
            let t = i as f32 / (n - 1) as f32;
            let a = a0 + t * (a1 - a0);
            let r = p1.pos + vec2f(f32::cos(a), f32::sin(a)).scale(rw);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
            emit(geometry, bounds, r, ru, 1.0);
        }

        emit(geometry, bounds, l1, lu, 1.0);
        emit(geometry, bounds, p1.pos - dl1.scale(rw), ru, 1.0);
    } else {
        let (r0, r1) =
            choose_bevel(p1.flags.contains(PointFlags::INNER_BEVEL), p0, p1, -rw);
        let a0 = f32::atan2(dl0.y, dl0.x);
        let mut a1 = f32::atan2(dl1.y, dl1.x);
        if a1 < a0 {
            a1 += PI * 2.0;
        }

        emit(geometry, bounds, p1.pos + dl0.scale(lw), lu, 1.0);
        emit(geometry, bounds, r0, ru, 1.0);

        let n = usize::max(2, usize::min(
            f32::ceil(((a1 - a0) / PI) * ncap as f32) as usize,
            ncap,
        ));
        for i in 0..n {
            let t = i as f32 / (n - 1) as f32;
            let a = a0 + t * (a1 - a0);
            let l = p1.pos + vec2f(f32::cos(a), f32::sin(a)).scale(lw);
            emit(geometry, bounds, l, lu, 1.0);
            emit(geometry, bounds, p1.pos, 0.5, 1.0);
        }

        emit(geometry, bounds, p1.pos + dl1.scale(lw), lu, 1.0);
        emit(geometry, bounds, r1, ru, 1.0);
    }
}

fn butt_cap_start(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p: &PathPoint,
    d: Vector2F,
    w: f32,
    distance: f32,
    aa: f32,
    u0: f32,
    u1: f32,
) {
    let pos = p.pos - d.scale(distance);
    let dl = d.perp();
    emit(geometry, bounds, pos + dl.scale(w) - d.scale(aa), u0, 0.0);
    emit(geometry, bounds, pos - dl.scale(w) - d.scale(aa), u1, 0.0);
    emit(geometry, bounds, pos + dl.scale(w), u0, 1.0);
    emit(geometry, bounds, pos - dl.scale(w), u1, 1.0);
}

fn butt_cap_end(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p: &PathPoint,
    d: Vector2F,
    w: f32,
    distance: f32,
    aa: f32,
    u0: f32,
    u1: f32,
) {
    let pos = p.pos + d.scale(distance);
    let dl = d.perp();
    emit(geometry, bounds, pos + dl.scale(w), u0, 1.0);
    emit(geometry, bounds, pos - dl.scale(w), u1, 1.0);
    emit(geometry, bounds, pos + dl.scale(w) + d.scale(aa), u0, 0.0);
    emit(geometry, bounds, pos - dl.scale(w) + d.scale(aa), u1, 0.0);
}

fn round_cap_start(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p: &PathPoint,
    d: Vector2F,
    w: f32,
    ncap: usize,
    u0: f32,
    u1: f32,
) {
    let dl = d.perp();
    for i in 0..ncap {
        let a = i as f32 / (ncap - 1) as f32 * PI;
        let (ax, ay) = (f32::cos(a) * w, f32::sin(a) * w);
        emit(geometry, bounds, p.pos - dl.scale(ax) - d.scale(ay), u0, 1.0);
        emit(geometry, bounds, p.pos, 0.5, 1.0);
    }
    emit(geometry, bounds, p.pos + dl.scale(w), u0, 1.0);
    emit(geometry, bounds, p.pos - dl.scale(w), u1, 1.0);
}

fn round_cap_end(
    geometry: &mut Geometry,
    bounds: &mut Bounds,
    p: &PathPoint,
    d: Vector2F,
    w: f32,
    ncap: usize,
    u0: f32,
    u1: f32,
) {
    let dl = d.perp();
    emit(geometry, bounds, p.pos + dl.scale(w), u0, 1.0);
    emit(geometry, bounds, p.pos - dl.scale(w), u1, 1.0);
    for i in 0..ncap {
        let a = i as f32 / (ncap - 1) as f32 * PI;
        let (ax, ay) = (f32::cos(a) * w, f32::sin(a) * w);
        emit(geometry, bounds, p.pos, 0.5, 1.0);
        emit(geometry, bounds, p.pos + dl.scale(ax) + d.scale(ay), u0, 1.0);
    }
}

fn modulate_alpha(color: ColorU, alpha: f32) -> ColorU {
    if alpha >= 1.0 {
        color
    } else {
        let a = (color.a as f32 * alpha).round().max(0.0).min(255.0) as u8;
        color.with_alpha(a)
    }
}

/// Squared distance from `p` to the segment `ab`.
fn dist_point_segment(p: Vector2F, a: Vector2F, b: Vector2F) -> f32 {
    let ab = b - a;
    let ap = p - a;
    let d = ab.square_length();
    let mut t = if d > 0.0 { ap.dot(ab) / d } else { 0.0 };
    t = t.max(0.0).min(1.0);
    let closest = a + ab.scale(t);
    (p - closest).square_length()
}

#[inline]
fn winding_to_f32(winding: Winding) -> f32 {
    match winding {
        Winding::CCW => 0.0,
        Winding::CW => 1.0,
    }
}

#[inline]
fn winding_from_f32(value: f32) -> Winding {
    if value == 0.0 {
        Winding::CCW
    } else {
        Winding::CW
    }
}

#[cfg(test)]
mod tests {
    use super::{GeometryBuilder, LineCap};
    use crate::geometry::GroupKind;
    use quickcheck::quickcheck;
    use vellum_color::ColorU;
    use vellum_geometry::vector::{vec2f, Vector2F};

    /// Shoelace area over a convex fan's perimeter vertices.
    fn fan_area(points: &[Vector2F]) -> f32 {
        let mut area = 0.0;
        for i in 0..points.len() {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            area += a.x * b.y - b.x * a.y;
        }
        f32::abs(area) * 0.5
    }

    #[test]
    fn test_transform_push_pop_is_exact() {
        let mut builder = GeometryBuilder::new();
        builder.rotate(0.3);
        builder.translate(12.5, -3.25);
        let before = *builder.transform();
        builder.push_transform();
        builder.scale(2.0, 3.0);
        builder.rotate(1.0);
        builder.pop_transform();
        assert_eq!(*builder.transform(), before);
    }

    #[test]
    fn test_rect_fill_is_convex_fan() {
        let mut builder = GeometryBuilder::new();
        builder.fill_color(ColorU::from_rgb(255, 0, 0));
        builder.begin_path();
        builder.rect(10.0, 20.0, 30.0, 40.0);
        builder.fill();
        let geometry = builder.into_geometry();

        assert_eq!(geometry.groups().len(), 1);
        let group = geometry.groups()[0];
        assert_eq!(group.kind, GroupKind::Fill);
        assert!(group.convex);
        assert_eq!(group.vertex_count, 4);
        assert_eq!(geometry.bounds_min(), vec2f(10.0, 20.0));
        assert_eq!(geometry.bounds_max(), vec2f(40.0, 60.0));

        let points: Vec<Vector2F> =
            geometry.vertices().iter().map(|vertex| vertex.pos).collect();
        assert!(f32::abs(fan_area(&points) - 30.0 * 40.0) < 1e-3);
    }

    #[test]
    fn test_rounded_rect_zero_radius_matches_rect() {
        let mut with_radius = GeometryBuilder::new();
        with_radius.begin_path();
        with_radius.rounded_rect(5.0, 5.0, 20.0, 10.0, 0.0);
        with_radius.fill();
        let rounded = with_radius.into_geometry();

        let mut plain = GeometryBuilder::new();
        plain.begin_path();
        plain.rect(5.0, 5.0, 20.0, 10.0);
        plain.fill();
        let rect = plain.into_geometry();

        assert_eq!(rounded.vertices().len(), rect.vertices().len());
        for (a, b) in rounded.vertices().iter().zip(rect.vertices().iter()) {
            assert_eq!(a.pos, b.pos);
        }
    }

    #[test]
    fn test_circle_fill_area_within_one_percent() {
        let mut builder = GeometryBuilder::new();
        builder.begin_path();
        builder.circle(100.0, 100.0, 20.0);
        builder.fill();
        let geometry = builder.into_geometry();

        let points: Vec<Vector2F> =
            geometry.vertices().iter().map(|vertex| vertex.pos).collect();
        let area = fan_area(&points);
        let exact = std::f32::consts::PI * 20.0 * 20.0;
        assert!(
            f32::abs(area - exact) / exact < 0.01,
            "polygon area {} vs circle area {}",
            area,
            exact
        );
    }

    #[test]
    fn test_zero_width_stroke_emits_nothing() {
        let mut builder = GeometryBuilder::new();
        builder.stroke_color(ColorU::black(), 0.0);
        builder.begin_path();
        builder.rect(0.0, 0.0, 10.0, 10.0);
        builder.stroke();
        let geometry = builder.into_geometry();
        assert!(geometry.is_empty());
        assert!(geometry.groups().is_empty());
    }

    #[test]
    fn test_open_stroke_has_caps() {
        let mut builder = GeometryBuilder::new();
        builder.stroke_color(ColorU::black(), 4.0);
        builder.line_cap(LineCap::Butt);
        builder.begin_path();
        builder.move_to(0.0, 0.0);
        builder.line_to(100.0, 0.0);
        builder.stroke();
        let geometry = builder.into_geometry();

        assert_eq!(geometry.groups().len(), 1);
        let group = geometry.groups()[0];
        assert_eq!(group.kind, GroupKind::Stroke);
        // Two cap quads; no interior joins on a straight segment.
        assert_eq!(group.vertex_count, 8);
        // The stroke expands half the width to each side.
        assert_eq!(geometry.bounds_min(), vec2f(0.0, -2.0));
        assert_eq!(geometry.bounds_max(), vec2f(100.0, 2.0));
    }

    #[test]
    fn test_styles_interned_across_fills() {
        let mut builder = GeometryBuilder::new();
        builder.fill_color(ColorU::from_rgb(1, 2, 3));
        builder.begin_path();
        builder.rect(0.0, 0.0, 10.0, 10.0);
        builder.fill();
        builder.begin_path();
        builder.rect(20.0, 0.0, 10.0, 10.0);
        builder.fill();
        let geometry = builder.into_geometry();

        assert_eq!(geometry.groups().len(), 2);
        assert_eq!(geometry.styles().len(), 1);
        assert_eq!(geometry.groups()[0].style_index, geometry.groups()[1].style_index);
    }

    #[test]
    fn test_line_to_without_subpath_is_ignored() {
        let mut builder = GeometryBuilder::new();
        builder.begin_path();
        builder.line_to(10.0, 10.0);
        builder.fill();
        let geometry = builder.into_geometry();
        assert!(geometry.is_empty());
    }

    #[test]
    fn test_antialiased_triangle_vertex_count() {
        let mut builder = GeometryBuilder::new();
        builder.antialiasing(true);
        builder.begin_path();
        builder.move_to(10.0, 10.0);
        builder.line_to(90.0, 10.0);
        builder.line_to(50.0, 90.0);
        builder.close_path();
        builder.fill();
        let geometry = builder.into_geometry();

        let group = geometry.groups()[0];
        assert!(group.convex);
        // Three fan vertices plus a six-vertex fringe ring.
        assert_eq!(group.vertex_count, 9);
    }

    #[test]
    fn test_group_bounds_contain_group_vertices() {
        let mut builder = GeometryBuilder::new();
        builder.begin_path();
        builder.circle(40.0, 40.0, 25.0);
        builder.fill();
        builder.stroke_color(ColorU::black(), 3.0);
        builder.begin_path();
        builder.move_to(0.0, 0.0);
        builder.line_to(80.0, 10.0);
        builder.line_to(40.0, 70.0);
        builder.stroke();
        let geometry = builder.into_geometry();

        for group in geometry.groups() {
            let range = group.first_vertex as usize
                ..(group.first_vertex + group.vertex_count) as usize;
            for vertex in &geometry.vertices()[range] {
                assert!(vertex.pos.x >= group.bounds_min.x - 1e-4);
                assert!(vertex.pos.y >= group.bounds_min.y - 1e-4);
                assert!(vertex.pos.x <= group.bounds_max.x + 1e-4);
                assert!(vertex.pos.y <= group.bounds_max.y + 1e-4);
            }
        }
    }

    quickcheck! {
        fn prop_geometry_bounds_contain_all_vertices(
            x: f32, y: f32, w: f32, h: f32
        ) -> bool {
            if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
                return true;
            }
            let (x, y) = (x % 1000.0, y % 1000.0);
            let (w, h) = (1.0 + w.abs() % 500.0, 1.0 + h.abs() % 500.0);

            let mut builder = GeometryBuilder::new();
            builder.begin_path();
            builder.rect(x, y, w, h);
            builder.fill();
            let geometry = builder.into_geometry();

            geometry.vertices().iter().all(|vertex| {
                vertex.pos.x >= geometry.bounds_min().x
                    && vertex.pos.y >= geometry.bounds_min().y
                    && vertex.pos.x <= geometry.bounds_max().x
                    && vertex.pos.y <= geometry.bounds_max().y
            })
        }
    }
}
