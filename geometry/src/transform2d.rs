// vellum/geometry/src/transform2d.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! 2D affine transforms with fast-path classification.

use crate::rect::RectF;
use crate::vector::{vec2f, Vector2F};

/// A 2x2 matrix, in row-major order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix2x2F {
    pub m11: f32,
    pub m12: f32,
    pub m21: f32,
    pub m22: f32,
}

impl Default for Matrix2x2F {
    #[inline]
    fn default() -> Matrix2x2F {
        Matrix2x2F::from_scale(Vector2F::splat(1.0))
    }
}

impl Matrix2x2F {
    #[inline]
    pub fn from_scale(scale: Vector2F) -> Matrix2x2F {
        Matrix2x2F { m11: scale.x, m12: 0.0, m21: 0.0, m22: scale.y }
    }

    #[inline]
    pub fn from_rotation(theta: f32) -> Matrix2x2F {
        let (sin, cos) = theta.sin_cos();
        Matrix2x2F::row_major(cos, -sin, sin, cos)
    }

    #[inline]
    pub fn row_major(m11: f32, m12: f32, m21: f32, m22: f32) -> Matrix2x2F {
        Matrix2x2F { m11, m12, m21, m22 }
    }

    #[inline]
    pub fn post_mul(&self, other: &Matrix2x2F) -> Matrix2x2F {
        Matrix2x2F::row_major(
            other.m11 * self.m11 + other.m12 * self.m21,
            other.m11 * self.m12 + other.m12 * self.m22,
            other.m21 * self.m11 + other.m22 * self.m21,
            other.m21 * self.m12 + other.m22 * self.m22,
        )
    }

    #[inline]
    pub fn pre_mul(&self, other: &Matrix2x2F) -> Matrix2x2F {
        other.post_mul(self)
    }

    #[inline]
    pub fn adjugate(&self) -> Matrix2x2F {
        Matrix2x2F::row_major(self.m22, -self.m12, -self.m21, self.m11)
    }

    #[inline]
    pub fn transform_point(&self, point: Vector2F) -> Vector2F {
        vec2f(
            self.m11 * point.x + self.m12 * point.y,
            self.m21 * point.x + self.m22 * point.y,
        )
    }

    #[inline]
    pub fn det(&self) -> f32 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    #[inline]
    pub fn inverse(&self) -> Matrix2x2F {
        let adj = self.adjugate();
        let inv_det = 1.0 / self.det();
        Matrix2x2F::row_major(
            adj.m11 * inv_det,
            adj.m12 * inv_det,
            adj.m21 * inv_det,
            adj.m22 * inv_det,
        )
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Matrix2x2F::default()
    }
}

/// How a transform affects points, used to select per-batch fast paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransformClass {
    /// The transform maps every point to itself.
    Identity,
    /// The linear part is identity; only the translation applies.
    Translation,
    /// The full 2x3 multiply is required.
    General,
}

/// An affine transform. The classification is recomputed whenever the matrix
/// or translation changes, so it is always in sync with the payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2F {
    matrix: Matrix2x2F,
    vector: Vector2F,
    class: TransformClass,
}

impl Default for Transform2F {
    #[inline]
    fn default() -> Transform2F {
        Transform2F::from_scale(Vector2F::splat(1.0))
    }
}

impl Transform2F {
    #[inline]
    fn classified(matrix: Matrix2x2F, vector: Vector2F) -> Transform2F {
        let class = if !matrix.is_identity() {
            TransformClass::General
        } else if !vector.is_zero() {
            TransformClass::Translation
        } else {
            TransformClass::Identity
        };
        Transform2F { matrix, vector, class }
    }

    #[inline]
    pub fn from_scale(scale: Vector2F) -> Transform2F {
        Transform2F::classified(Matrix2x2F::from_scale(scale), Vector2F::default())
    }

    #[inline]
    pub fn from_rotation(theta: f32) -> Transform2F {
        Transform2F::classified(Matrix2x2F::from_rotation(theta), Vector2F::default())
    }

    #[inline]
    pub fn from_translation(vector: Vector2F) -> Transform2F {
        Transform2F::classified(Matrix2x2F::default(), vector)
    }

    /// Shear parallel to the x axis by `angle` radians.
    #[inline]
    pub fn from_skew_x(angle: f32) -> Transform2F {
        Transform2F::classified(Matrix2x2F::row_major(1.0, angle.tan(), 0.0, 1.0),
                                Vector2F::default())
    }

    /// Shear parallel to the y axis by `angle` radians.
    #[inline]
    pub fn from_skew_y(angle: f32) -> Transform2F {
        Transform2F::classified(Matrix2x2F::row_major(1.0, 0.0, angle.tan(), 1.0),
                                Vector2F::default())
    }

    #[inline]
    pub fn row_major(m11: f32, m12: f32, m21: f32, m22: f32, m31: f32, m32: f32) -> Transform2F {
        Transform2F::classified(Matrix2x2F::row_major(m11, m12, m21, m22), vec2f(m31, m32))
    }

    #[inline]
    pub fn matrix(&self) -> Matrix2x2F {
        self.matrix
    }

    #[inline]
    pub fn translation(&self) -> Vector2F {
        self.vector
    }

    #[inline]
    pub fn class(&self) -> TransformClass {
        self.class
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.class == TransformClass::Identity
    }

    #[inline]
    pub fn transform_point(&self, point: Vector2F) -> Vector2F {
        match self.class {
            TransformClass::Identity => point,
            TransformClass::Translation => point + self.vector,
            TransformClass::General => self.matrix.transform_point(point) + self.vector,
        }
    }

    /// Transforms a rect and returns the axis-aligned hull of its corners.
    pub fn transform_rect(&self, rect: RectF) -> RectF {
        match self.class {
            TransformClass::Identity => rect,
            TransformClass::Translation => {
                RectF::from_points(rect.origin() + self.vector, rect.lower_right() + self.vector)
            }
            TransformClass::General => {
                let upper_left = self.transform_point(rect.origin());
                let upper_right = self.transform_point(rect.upper_right());
                let lower_left = self.transform_point(rect.lower_left());
                let lower_right = self.transform_point(rect.lower_right());
                let min = upper_left.min(upper_right).min(lower_left).min(lower_right);
                let max = upper_left.max(upper_right).max(lower_left).max(lower_right);
                RectF::from_points(min, max)
            }
        }
    }

    /// Applies `self` first, then `other`.
    #[inline]
    pub fn post_mul(&self, other: &Transform2F) -> Transform2F {
        let matrix = self.matrix.post_mul(&other.matrix);
        let vector = other.matrix.transform_point(self.vector) + other.vector;
        Transform2F::classified(matrix, vector)
    }

    #[inline]
    pub fn pre_mul(&self, other: &Transform2F) -> Transform2F {
        other.post_mul(self)
    }

    #[inline]
    pub fn post_translate(&self, vector: Vector2F) -> Transform2F {
        self.post_mul(&Transform2F::from_translation(vector))
    }

    #[inline]
    pub fn post_rotate(&self, theta: f32) -> Transform2F {
        self.post_mul(&Transform2F::from_rotation(theta))
    }

    #[inline]
    pub fn post_scale(&self, scale: Vector2F) -> Transform2F {
        self.post_mul(&Transform2F::from_scale(scale))
    }

    /// Adds a translation in device space, leaving the linear part alone.
    #[inline]
    pub fn offset(&self, vector: Vector2F) -> Transform2F {
        Transform2F::classified(self.matrix, self.vector + vector)
    }

    pub fn inverse(&self) -> Transform2F {
        match self.class {
            TransformClass::Identity => *self,
            TransformClass::Translation => Transform2F::from_translation(-self.vector),
            TransformClass::General => {
                let matrix_inv = self.matrix.inverse();
                let vector = -matrix_inv.transform_point(self.vector);
                Transform2F::classified(matrix_inv, vector)
            }
        }
    }

    /// The average of the transform's axis scale factors, used to scale
    /// tessellation tolerances.
    #[inline]
    pub fn approx_scale(&self) -> f32 {
        let sx = vec2f(self.matrix.m11, self.matrix.m21).length();
        let sy = vec2f(self.matrix.m12, self.matrix.m22).length();
        (sx + sy) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::{Transform2F, TransformClass};
    use crate::vector::vec2f;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_classification() {
        assert_eq!(Transform2F::default().class(), TransformClass::Identity);
        assert_eq!(Transform2F::from_translation(vec2f(1.0, 2.0)).class(),
                   TransformClass::Translation);
        assert_eq!(Transform2F::from_scale(vec2f(2.0, 2.0)).class(), TransformClass::General);
        // Composing a translation with its inverse restores the identity class.
        let t = Transform2F::from_translation(vec2f(3.0, 0.0));
        assert_eq!(t.post_mul(&t.inverse()).class(), TransformClass::Identity);
    }

    #[test]
    fn test_post_mul_order() {
        let scale = Transform2F::from_scale(vec2f(2.0, 2.0));
        let translate = Transform2F::from_translation(vec2f(10.0, 0.0));
        // Scale first, then translate.
        let combined = scale.post_mul(&translate);
        assert!(combined.transform_point(vec2f(1.0, 1.0)).approx_eq(vec2f(12.0, 2.0), 1e-6));
    }

    #[test]
    fn test_inverse_round_trip() {
        let transform = Transform2F::from_rotation(FRAC_PI_2)
            .post_scale(vec2f(3.0, 0.5))
            .post_translate(vec2f(-4.0, 7.0));
        let point = vec2f(13.0, -5.0);
        let round_tripped = transform.inverse().transform_point(transform.transform_point(point));
        assert!(round_tripped.approx_eq(point, 1e-4));
    }
}
