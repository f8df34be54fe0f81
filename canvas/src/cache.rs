// vellum/canvas/src/cache.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The path cache: flattened sub-paths ready for fill and stroke expansion.
//!
//! Curves arrive as cubic Béziers and leave as polylines whose points carry
//! the per-corner data the expanders need: unit direction to the next point,
//! edge length, the extrusion bisector, and join flags.

use crate::builder::{LineCap, LineJoin, Winding};
use std::f32::consts::PI;
use vellum_geometry::vector::Vector2F;

bitflags! {
    /// Per-point classification computed during flattening and join
    /// analysis.
    pub struct PointFlags: u8 {
        /// An authored corner (as opposed to a point introduced by curve
        /// subdivision).
        const CORNER = 0x01;
        /// The path turns left at this point.
        const LEFT = 0x02;
        /// The inner side of the join folds over and must be beveled.
        const INNER_BEVEL = 0x04;
        /// The outer side of the join is beveled rather than mitered.
        const BEVEL = 0x08;
    }
}

/// One flattened point.
#[derive(Clone, Copy, Debug)]
pub struct PathPoint {
    pub pos: Vector2F,
    /// Unit direction to the next point (wrapping around for closed paths).
    pub d: Vector2F,
    /// Length of the edge starting here.
    pub len: f32,
    /// Extrusion bisector, pre-scaled for miter extension.
    pub dm: Vector2F,
    pub flags: PointFlags,
}

impl PathPoint {
    fn new(pos: Vector2F, flags: PointFlags) -> PathPoint {
        PathPoint {
            pos,
            d: Vector2F::zero(),
            len: 0.0,
            dm: Vector2F::zero(),
            flags,
        }
    }
}

/// One flattened sub-path: a range of points plus the derived facts the
/// emitters switch on.
#[derive(Clone, Copy, Debug)]
pub struct CachedPath {
    pub first: usize,
    pub count: usize,
    pub closed: bool,
    pub convex: bool,
    pub bevel_count: usize,
    pub winding: Winding,
}

/// Flattened sub-paths, reused between `fill`/`stroke` emissions.
pub struct PathCache {
    pub paths: Vec<CachedPath>,
    pub points: Vec<PathPoint>,
    min_point_dist: f32,
    tess_tol: f32,
}

impl PathCache {
    pub fn new(min_point_dist: f32, tess_tol: f32) -> PathCache {
        PathCache {
            paths: vec![],
            points: vec![],
            min_point_dist,
            tess_tol,
        }
    }

    pub fn reset(&mut self) {
        self.paths.clear();
        self.points.clear();
    }

    pub fn add_path(&mut self) {
        let first = self.points.len();
        self.paths.push(CachedPath {
            first,
            count: 0,
            closed: false,
            convex: false,
            bevel_count: 0,
            winding: Winding::CCW,
        });
    }

    pub fn close_path(&mut self) {
        if let Some(path) = self.paths.last_mut() {
            path.closed = true;
        }
    }

    pub fn set_winding(&mut self, winding: Winding) {
        if let Some(path) = self.paths.last_mut() {
            path.winding = winding;
        }
    }

    /// Appends a point, coalescing with the previous one when they are
    /// within `min_point_dist`; coalescing ORs the flags together.
    pub fn add_point(&mut self, pos: Vector2F, flags: PointFlags) {
        let path = match self.paths.last_mut() {
            Some(path) => path,
            None => return,
        };

        if path.count > 0 {
            if let Some(last) = self.points.last_mut() {
                if pos.approx_eq(last.pos, self.min_point_dist) {
                    last.flags |= flags;
                    return;
                }
            }
        }

        self.points.push(PathPoint::new(pos, flags));
        path.count += 1;
    }

    /// Adaptive subdivision of a cubic Bézier by de Casteljau halving.
    /// Recursion stops when the control points are within tolerance of the
    /// chord, or at depth 10; the terminal point inherits `flags`.
    pub fn add_bezier(
        &mut self,
        p1: Vector2F,
        p2: Vector2F,
        p3: Vector2F,
        p4: Vector2F,
        level: u32,
        flags: PointFlags,
    ) {
        if level > 10 {
            self.add_point(p4, flags);
            return;
        }

        let p12 = (p1 + p2).scale(0.5);
        let p23 = (p2 + p3).scale(0.5);
        let p34 = (p3 + p4).scale(0.5);
        let p123 = (p12 + p23).scale(0.5);
        let p234 = (p23 + p34).scale(0.5);
        let p1234 = (p123 + p234).scale(0.5);

        let d40 = p4 - p1;
        let d2 = f32::abs((p2.x - p4.x) * d40.y - (p2.y - p4.y) * d40.x);
        let d3 = f32::abs((p3.x - p4.x) * d40.y - (p3.y - p4.y) * d40.x);
        if (d2 + d3) * (d2 + d3) < self.tess_tol * d40.square_length() {
            self.add_point(p4, flags);
            return;
        }

        self.add_bezier(p1, p12, p123, p1234, level + 1, PointFlags::empty());
        self.add_bezier(p1234, p234, p34, p4, level + 1, flags);
    }

    /// Close repair, winding repair, and per-point direction/length.
    pub fn compute_deltas(&mut self) {
        for path in &mut self.paths {
            if path.count <= 1 {
                continue;
            }

            // If the first and last points coincide, drop the duplicate and
            // mark the path closed.
            {
                let first = self.points[path.first].pos;
                let last = self.points[path.first + path.count - 1].pos;
                if first.approx_eq(last, self.min_point_dist) {
                    path.closed = true;
                    path.count -= 1;
                }
            }

            // Enforce the requested winding.
            if path.count > 2 {
                let points = &mut self.points[path.first..path.first + path.count];
                let area = path_area(points);
                let backwards = match path.winding {
                    Winding::CCW => area < 0.0,
                    Winding::CW => area > 0.0,
                };
                if backwards {
                    points.reverse();
                }
            }

            for i in 0..path.count {
                let next = self.points[path.first + (i + 1) % path.count].pos;
                let point = &mut self.points[path.first + i];
                point.d = next - point.pos;
                point.len = point.d.length();
                if point.len > 0.0 {
                    point.d = point.d.scale(1.0 / point.len);
                }
            }
        }
    }

    /// Classifies every corner for the given stroke (or fringe) width and
    /// join policy, counts bevels, and decides convexity.
    pub fn compute_joins(&mut self, width: f32, line_join: LineJoin, miter_limit: f32) {
        let inv_width = if width > 0.0 { 1.0 / width } else { 0.0 };

        for path in &mut self.paths {
            if path.count <= 1 {
                continue;
            }

            let points = &mut self.points[path.first..path.first + path.count];
            let mut left_turns = 0;
            path.bevel_count = 0;

            let mut prev = path.count - 1;
            for i in 0..path.count {
                let p0 = points[prev];
                let point = &mut points[i];

                // Extrusion bisector of the two adjoining edge normals,
                // scaled so a miter lands where the offset edges meet. The
                // scale is capped to keep near-reversals finite.
                let dm = (p0.d.perp() + point.d.perp()).scale(0.5);
                let dmr2 = dm.square_length();
                point.dm = if dmr2 > 0.000001 {
                    dm.scale(f32::min(600.0, 1.0 / dmr2))
                } else {
                    Vector2F::zero()
                };

                point.flags &= PointFlags::CORNER;

                let cross = point.d.x * p0.d.y - p0.d.x * point.d.y;
                if cross > 0.0 {
                    left_turns += 1;
                    point.flags |= PointFlags::LEFT;
                }

                let limit = f32::max(1.01, f32::min(p0.len, point.len) * inv_width);
                if dmr2 * limit * limit < 1.0 {
                    point.flags |= PointFlags::INNER_BEVEL;
                }

                if point.flags.contains(PointFlags::CORNER) {
                    if dmr2 * miter_limit * miter_limit < 1.0
                        || line_join == LineJoin::Bevel
                        || line_join == LineJoin::Round
                    {
                        point.flags |= PointFlags::BEVEL;
                    }
                }

                if point
                    .flags
                    .intersects(PointFlags::BEVEL | PointFlags::INNER_BEVEL)
                {
                    path.bevel_count += 1;
                }

                prev = i;
            }

            // Convexity is conservative: every turn goes left and no corner
            // needs an inner bevel.
            let inner_bevels = points
                .iter()
                .filter(|point| point.flags.contains(PointFlags::INNER_BEVEL))
                .count();
            path.convex = left_turns == path.count && inner_bevels == 0;
        }
    }

    /// Exact upper bound on the vertices `stroke` emission produces.
    pub fn expected_stroke_vertex_count(
        &self,
        line_join: LineJoin,
        line_cap: LineCap,
        stroke_width: f32,
    ) -> usize {
        let ncap = curve_divs(stroke_width, PI, self.tess_tol);

        let mut count = 0;
        for path in &self.paths {
            if line_join == LineJoin::Round {
                count += (path.count + path.bevel_count * (ncap + 2) + 1) * 2;
            } else {
                count += (path.count + path.bevel_count * 5 + 1) * 2;
            }

            if !path.closed {
                if line_cap == LineCap::Round {
                    count += (ncap * 2 + 2) * 2;
                } else {
                    count += (3 + 3) * 2;
                }
            }
        }
        count
    }

    /// Exact upper bound on the vertices `fill` emission produces.
    pub fn expected_fill_vertex_count(&self, has_fringe: bool) -> usize {
        let mut count = 0;
        for path in &self.paths {
            count += path.count + path.bevel_count + 1;
            if has_fringe {
                count += (path.count + path.bevel_count * 5 + 1) * 2;
            }
        }
        count
    }

    #[inline]
    pub fn tess_tol(&self) -> f32 {
        self.tess_tol
    }
}

/// Twice the signed area of the triangle `abc`. Positive for left turns.
#[inline]
fn triangle_area2(a: Vector2F, b: Vector2F, c: Vector2F) -> f32 {
    let ab = b - a;
    let ac = c - a;
    ac.x * ab.y - ab.x * ac.y
}

fn path_area(points: &[PathPoint]) -> f32 {
    let mut area = 0.0;
    for i in 2..points.len() {
        area += triangle_area2(points[0].pos, points[i - 1].pos, points[i].pos);
    }
    area * 0.5
}

/// Number of subdivisions that keep a circular arc of radius `r` within
/// `tol` of the true curve.
pub fn curve_divs(r: f32, arc: f32, tol: f32) -> usize {
    let da = f32::acos(r / (r + tol)) * 2.0;
    usize::max(2, f32::ceil(arc / da) as usize)
}

#[cfg(test)]
mod tests {
    use super::{PathCache, PointFlags};
    use crate::builder::{LineJoin, Winding};
    use vellum_geometry::vector::{vec2f, Vector2F};

    fn cache() -> PathCache {
        PathCache::new(0.01, 0.25)
    }

    fn square(cache: &mut PathCache, reversed: bool) {
        cache.add_path();
        let mut corners = vec![
            vec2f(0.0, 0.0),
            vec2f(10.0, 0.0),
            vec2f(10.0, 10.0),
            vec2f(0.0, 10.0),
        ];
        if reversed {
            corners.reverse();
        }
        for corner in corners {
            cache.add_point(corner, PointFlags::CORNER);
        }
        cache.close_path();
    }

    #[test]
    fn test_winding_repair() {
        // The same square, submitted in both orders, must end up identical
        // after winding repair.
        let mut forward = cache();
        square(&mut forward, false);
        forward.compute_deltas();

        let mut backward = cache();
        square(&mut backward, true);
        backward.compute_deltas();

        let lhs: Vec<Vector2F> = forward.points.iter().map(|point| point.pos).collect();
        let rhs: Vec<Vector2F> = backward.points.iter().map(|point| point.pos).collect();
        // Reversal preserves the point set and fixes orientation; the
        // starting corner may differ.
        assert_eq!(lhs.len(), rhs.len());
        for pos in &lhs {
            assert!(rhs.iter().any(|other| other.approx_eq(*pos, 1e-6)));
        }
    }

    #[test]
    fn test_duplicate_endpoint_closes_path() {
        let mut cache = cache();
        cache.add_path();
        cache.add_point(vec2f(0.0, 0.0), PointFlags::CORNER);
        cache.add_point(vec2f(10.0, 0.0), PointFlags::CORNER);
        cache.add_point(vec2f(5.0, 8.0), PointFlags::CORNER);
        cache.add_point(vec2f(0.0, 0.0), PointFlags::CORNER);
        cache.compute_deltas();

        let path = cache.paths[0];
        assert!(path.closed);
        assert_eq!(path.count, 3);
    }

    #[test]
    fn test_bezier_within_tolerance() {
        let mut cache = cache();
        cache.add_path();
        let p1 = vec2f(0.0, 0.0);
        let p2 = vec2f(30.0, 60.0);
        let p3 = vec2f(70.0, 60.0);
        let p4 = vec2f(100.0, 0.0);
        cache.add_point(p1, PointFlags::CORNER);
        cache.add_bezier(p1, p2, p3, p4, 0, PointFlags::CORNER);

        // Every emitted point must sit near the exact curve: sample the
        // curve densely and check the polyline points against it.
        assert!(cache.points.len() > 4);
        for point in &cache.points {
            let mut best = f32::MAX;
            for i in 0..=1000 {
                let t = i as f32 / 1000.0;
                let it = 1.0 - t;
                let pos = p1.scale(it * it * it)
                    + p2.scale(3.0 * it * it * t)
                    + p3.scale(3.0 * it * t * t)
                    + p4.scale(t * t * t);
                best = best.min((pos - point.pos).length());
            }
            assert!(best < 0.5, "flattened point {:?} strays {} from curve", point.pos, best);
        }
    }

    #[test]
    fn test_square_is_convex() {
        let mut cache = cache();
        square(&mut cache, false);
        cache.compute_deltas();
        cache.compute_joins(0.5, LineJoin::Miter, 2.4);
        assert!(cache.paths[0].convex);
    }

    #[test]
    fn test_concave_polygon_detected() {
        let mut cache = cache();
        cache.add_path();
        for corner in &[
            vec2f(0.0, 0.0),
            vec2f(10.0, 0.0),
            vec2f(5.0, 5.0), // dent
            vec2f(10.0, 10.0),
            vec2f(0.0, 10.0),
        ] {
            cache.add_point(*corner, PointFlags::CORNER);
        }
        cache.close_path();
        cache.set_winding(Winding::CCW);
        cache.compute_deltas();
        cache.compute_joins(0.5, LineJoin::Miter, 2.4);
        assert!(!cache.paths[0].convex);
    }

    #[test]
    fn test_fill_count_is_upper_bound() {
        let mut cache = cache();
        square(&mut cache, false);
        cache.compute_deltas();
        cache.compute_joins(0.5, LineJoin::Miter, 2.4);
        assert!(cache.expected_fill_vertex_count(false) >= 4);
        assert!(cache.expected_fill_vertex_count(true) >= 4 + 8);
    }
}
