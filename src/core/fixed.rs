//! Q16.16 Fixed-Point Arithmetic
//!
//! Simulation math never touches floats. Every position, speed and radius is
//! a Q16.16 value stored in an `i32`, so a tick computes the same bits on
//! every platform.
//!
//! ```text
//! [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]
//!     16 integer bits   16 fraction bits
//! ```

/// Q16.16 fixed-point number stored as i32.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

// =============================================================================
// ARENA DEFAULTS (integer literals only)
// =============================================================================

/// Arena half-extent on both axes: 20.0
pub const ARENA_HALF_EXTENT: Fixed = 20 * FIXED_ONE;

/// Distance travelled per tick along an axis at full input: 1.0
pub const MOVE_SPEED: Fixed = FIXED_ONE;

/// Item capture radius: 1.5
pub const CAPTURE_RADIUS: Fixed = FIXED_ONE + FIXED_HALF;

/// Distance between neighbouring spawn points: 2.0
pub const SPAWN_SPACING: Fixed = 2 * FIXED_ONE;

// =============================================================================
// CORE OPERATIONS
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// Only for constants and configuration. Never inside a step.
///
/// ```
/// use ticksync::core::fixed::{to_fixed, FIXED_ONE};
/// const SPEED: i32 = to_fixed(2.5);
/// assert_eq!(SPEED, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers through an i64 intermediate.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Clamp a fixed-point number to `[min, max]`.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.max(min).min(max)
}
