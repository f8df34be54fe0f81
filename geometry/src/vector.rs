// vellum/geometry/src/vector.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! 2D point and vector types.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// 2D points with 32-bit floating point coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector2F {
    pub x: f32,
    pub y: f32,
}

/// A convenience alias for `Vector2F::new()`.
#[inline]
pub fn vec2f(x: f32, y: f32) -> Vector2F {
    Vector2F::new(x, y)
}

impl Vector2F {
    #[inline]
    pub fn new(x: f32, y: f32) -> Vector2F {
        Vector2F { x, y }
    }

    #[inline]
    pub fn splat(value: f32) -> Vector2F {
        Vector2F { x: value, y: value }
    }

    #[inline]
    pub fn zero() -> Vector2F {
        Vector2F::default()
    }

    #[inline]
    pub fn x(self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(self) -> f32 {
        self.y
    }

    #[inline]
    pub fn set_x(&mut self, x: f32) {
        self.x = x;
    }

    #[inline]
    pub fn set_y(&mut self, y: f32) {
        self.y = y;
    }

    #[inline]
    pub fn min(self, other: Vector2F) -> Vector2F {
        Vector2F::new(self.x.min(other.x), self.y.min(other.y))
    }

    #[inline]
    pub fn max(self, other: Vector2F) -> Vector2F {
        Vector2F::new(self.x.max(other.x), self.y.max(other.y))
    }

    #[inline]
    pub fn clamp(self, min_val: Vector2F, max_val: Vector2F) -> Vector2F {
        self.max(min_val).min(max_val)
    }

    #[inline]
    pub fn det(self, other: Vector2F) -> f32 {
        self.x * other.y - self.y * other.x
    }

    #[inline]
    pub fn dot(self, other: Vector2F) -> f32 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    pub fn scale(self, factor: f32) -> Vector2F {
        Vector2F::new(self.x * factor, self.y * factor)
    }

    #[inline]
    pub fn scale_xy(self, factors: Vector2F) -> Vector2F {
        Vector2F::new(self.x * factors.x, self.y * factors.y)
    }

    #[inline]
    pub fn floor(self) -> Vector2F {
        Vector2F::new(self.x.floor(), self.y.floor())
    }

    #[inline]
    pub fn ceil(self) -> Vector2F {
        Vector2F::new(self.x.ceil(), self.y.ceil())
    }

    /// Treats this point as a vector and calculates its squared length.
    #[inline]
    pub fn square_length(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Treats this point as a vector and calculates its length.
    #[inline]
    pub fn length(self) -> f32 {
        f32::sqrt(self.square_length())
    }

    /// Treats this point as a vector and normalizes it.
    #[inline]
    pub fn normalize(self) -> Vector2F {
        self.scale(1.0 / self.length())
    }

    /// Rotates this vector by 90° counterclockwise (in a y-down coordinate
    /// system), yielding the edge normal used for extrusion.
    #[inline]
    pub fn perp(self) -> Vector2F {
        Vector2F::new(self.y, -self.x)
    }

    /// Swaps y and x.
    #[inline]
    pub fn yx(self) -> Vector2F {
        Vector2F::new(self.y, self.x)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self == Vector2F::default()
    }

    #[inline]
    pub fn lerp(self, other: Vector2F, t: f32) -> Vector2F {
        self + (other - self).scale(t)
    }

    /// Returns true if both coordinates are within `tolerance` of `other`.
    #[inline]
    pub fn approx_eq(self, other: Vector2F, tolerance: f32) -> bool {
        f32::abs(self.x - other.x) < tolerance && f32::abs(self.y - other.y) < tolerance
    }

    #[inline]
    pub fn to_i32(self) -> Vector2I {
        Vector2I::new(self.x as i32, self.y as i32)
    }
}

impl Add<Vector2F> for Vector2F {
    type Output = Vector2F;
    #[inline]
    fn add(self, other: Vector2F) -> Vector2F {
        Vector2F::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign<Vector2F> for Vector2F {
    #[inline]
    fn add_assign(&mut self, other: Vector2F) {
        *self = *self + other
    }
}

impl Sub<Vector2F> for Vector2F {
    type Output = Vector2F;
    #[inline]
    fn sub(self, other: Vector2F) -> Vector2F {
        Vector2F::new(self.x - other.x, self.y - other.y)
    }
}

impl SubAssign<Vector2F> for Vector2F {
    #[inline]
    fn sub_assign(&mut self, other: Vector2F) {
        *self = *self - other
    }
}

impl Mul<Vector2F> for Vector2F {
    type Output = Vector2F;
    #[inline]
    fn mul(self, other: Vector2F) -> Vector2F {
        Vector2F::new(self.x * other.x, self.y * other.y)
    }
}

impl Mul<f32> for Vector2F {
    type Output = Vector2F;
    #[inline]
    fn mul(self, factor: f32) -> Vector2F {
        self.scale(factor)
    }
}

impl Neg for Vector2F {
    type Output = Vector2F;
    #[inline]
    fn neg(self) -> Vector2F {
        Vector2F::new(-self.x, -self.y)
    }
}

/// 2D points with 32-bit signed integer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Vector2I {
    pub x: i32,
    pub y: i32,
}

/// A convenience alias for `Vector2I::new()`.
#[inline]
pub fn vec2i(x: i32, y: i32) -> Vector2I {
    Vector2I::new(x, y)
}

impl Vector2I {
    #[inline]
    pub fn new(x: i32, y: i32) -> Vector2I {
        Vector2I { x, y }
    }

    #[inline]
    pub fn splat(value: i32) -> Vector2I {
        Vector2I { x: value, y: value }
    }

    #[inline]
    pub fn x(self) -> i32 {
        self.x
    }

    #[inline]
    pub fn y(self) -> i32 {
        self.y
    }

    #[inline]
    pub fn scale(self, factor: i32) -> Vector2I {
        Vector2I::new(self.x * factor, self.y * factor)
    }

    #[inline]
    pub fn area(self) -> i64 {
        self.x as i64 * self.y as i64
    }

    #[inline]
    pub fn to_f32(self) -> Vector2F {
        Vector2F::new(self.x as f32, self.y as f32)
    }
}

impl Add<Vector2I> for Vector2I {
    type Output = Vector2I;
    #[inline]
    fn add(self, other: Vector2I) -> Vector2I {
        Vector2I::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign<Vector2I> for Vector2I {
    #[inline]
    fn add_assign(&mut self, other: Vector2I) {
        *self = *self + other
    }
}

impl Sub<Vector2I> for Vector2I {
    type Output = Vector2I;
    #[inline]
    fn sub(self, other: Vector2I) -> Vector2I {
        Vector2I::new(self.x - other.x, self.y - other.y)
    }
}

#[cfg(test)]
mod tests {
    use super::{vec2f, Vector2F};

    #[test]
    fn test_perp_is_ccw_normal() {
        assert_eq!(vec2f(1.0, 0.0).perp(), vec2f(0.0, -1.0));
        assert_eq!(vec2f(0.0, 1.0).perp(), vec2f(1.0, 0.0));
    }

    #[test]
    fn test_normalize() {
        let v = vec2f(3.0, 4.0).normalize();
        assert!(f32::abs(v.length() - 1.0) < 1e-6);
        assert!(v.approx_eq(vec2f(0.6, 0.8), 1e-6));
    }

    #[test]
    fn test_lerp_endpoints() {
        let (a, b) = (vec2f(1.0, 2.0), vec2f(5.0, -2.0));
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), vec2f(3.0, 0.0));
    }

    #[test]
    fn test_det_sign() {
        assert!(Vector2F::new(1.0, 0.0).det(Vector2F::new(0.0, 1.0)) > 0.0);
        assert!(Vector2F::new(0.0, 1.0).det(Vector2F::new(1.0, 0.0)) < 0.0);
    }
}
