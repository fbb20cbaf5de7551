// THEORY:
// `Vec2` and `Polar` are the "dumb" value types of the vector side of the engine,
// the same role `Pixel` plays for colour data. Gradient, edge and motion stages all
// produce 2D vectors; visual consumers often want them as (angle, magnitude).
// The two forms are separate types so a field's representation is always explicit,
// and converting between them is a plain `From` in either direction.

use std::ops::{Add, AddAssign, Div, Mul, Sub};

/// A Cartesian 2D vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

/// A 2D vector in polar form: `angle` in radians from the +x axis, `magnitude >= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Polar {
    pub angle: f32,
    pub magnitude: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const ONE: Vec2 = Vec2 { x: 1.0, y: 1.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    #[inline]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Componentwise product.
    #[inline]
    pub fn hadamard(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x * other.x, self.y * other.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_polar(self) -> Polar {
        Polar::from(self)
    }
}

impl Polar {
    pub const fn new(angle: f32, magnitude: f32) -> Self {
        Self { angle, magnitude }
    }

    pub fn to_cartesian(self) -> Vec2 {
        Vec2::from(self)
    }
}

impl From<Vec2> for Polar {
    fn from(v: Vec2) -> Self {
        Polar {
            angle: v.y.atan2(v.x),
            magnitude: v.length(),
        }
    }
}

impl From<Polar> for Vec2 {
    fn from(p: Polar) -> Self {
        let (sin, cos) = p.angle.sin_cos();
        Vec2::new(p.magnitude * cos, p.magnitude * sin)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    #[inline]
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    #[inline]
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    #[inline]
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;
    #[inline]
    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn polar_of_axis_vectors() {
        let p = Polar::from(Vec2::new(0.0, 2.0));
        assert!((p.angle - FRAC_PI_2).abs() < 1e-6);
        assert!((p.magnitude - 2.0).abs() < 1e-6);
    }

    #[test]
    fn polar_conversion_returns_the_same_vector() {
        for v in [Vec2::new(3.0, -4.0), Vec2::new(-0.25, 0.5), Vec2::ZERO] {
            let back = Vec2::from(v.to_polar());
            assert!((back.x - v.x).abs() < 1e-5, "{v:?} -> {back:?}");
            assert!((back.y - v.y).abs() < 1e-5, "{v:?} -> {back:?}");
        }
    }

    #[test]
    fn hadamard_is_componentwise() {
        let v = Vec2::new(2.0, -3.0).hadamard(Vec2::new(0.5, 2.0));
        assert_eq!(v, Vec2::new(1.0, -6.0));
    }
}
