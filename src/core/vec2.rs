//! Fixed-Point 2D Vector

use std::fmt;
use std::ops::{Add, Sub};
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, FIXED_SCALE, fixed_mul, fixed_clamp};

/// 2D vector with Q16.16 components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component
    pub x: Fixed,
    /// Y component
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer components.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
        }
    }

    /// Scale by an integer factor.
    #[inline]
    pub fn scale_int(self, scalar: i32) -> Self {
        Self {
            x: self.x.wrapping_mul(scalar),
            y: self.y.wrapping_mul(scalar),
        }
    }

    /// Squared distance to another point. Comparisons against squared radii
    /// keep square roots out of the step.
    #[inline]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x.wrapping_sub(other.x);
        let dy = self.y.wrapping_sub(other.y);
        fixed_mul(dx, dx).wrapping_add(fixed_mul(dy, dy))
    }

    /// Clamp both components into `[-half_extent, half_extent]`.
    #[inline]
    pub fn clamp_box(self, half_extent: Fixed) -> Self {
        Self {
            x: fixed_clamp(self.x, -half_extent, half_extent),
            y: fixed_clamp(self.y, -half_extent, half_extent),
        }
    }

    /// Convert to float tuple for presentation.
    #[inline]
    pub fn to_floats(self) -> (f32, f32) {
        (
            self.x as f32 / FIXED_ONE as f32,
            self.y as f32 / FIXED_ONE as f32,
        )
    }
}

impl Add for FixedVec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x.wrapping_add(rhs.x),
            y: self.y.wrapping_add(rhs.y),
        }
    }
}

impl Sub for FixedVec2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x.wrapping_sub(rhs.x),
            y: self.y.wrapping_sub(rhs.y),
        }
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy) = self.to_floats();
        write!(f, "Vec2({:.3}, {:.3})", fx, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_vec2_arithmetic() {
        let a = FixedVec2::from_ints(3, 4);
        let b = FixedVec2::from_ints(1, 2);
        assert_eq!(a + b, FixedVec2::from_ints(4, 6));
        assert_eq!(a - b, FixedVec2::from_ints(2, 2));
        assert_eq!(b.scale_int(-3), FixedVec2::from_ints(-3, -6));
    }

    #[test]
    fn test_vec2_distance_squared() {
        let a = FixedVec2::ZERO;
        let b = FixedVec2::from_ints(3, 4);
        assert_eq!(a.distance_squared(b), to_fixed(25.0));
    }

    #[test]
    fn test_vec2_clamp_box() {
        let v = FixedVec2::from_ints(30, -5).clamp_box(to_fixed(10.0));
        assert_eq!(v, FixedVec2::from_ints(10, -5));
    }
}
