//! Core deterministic primitives.
//!
//! Integer-only math, a carried RNG and state hashing. Nothing in here reads
//! the clock or the environment.

pub mod fixed;
pub mod vec2;
pub mod rng;
pub mod hash;

pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash};
