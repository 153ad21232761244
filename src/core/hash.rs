//! State Hashing
//!
//! SHA-256 over a fixed field order. Server and clients compare these hashes
//! to detect a simulation that has silently diverged.

use sha2::{Sha256, Digest};
use super::fixed::Fixed;
use super::vec2::FixedVec2;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for simulation state.
///
/// Order of updates is part of the hash definition.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for simulation state.
    pub fn for_simulation_state() -> Self {
        Self::new(b"TICKSYNC_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a FixedVec2.
    #[inline]
    pub fn update_vec2(&mut self, value: FixedVec2) {
        self.update_fixed(value.x);
        self.update_fixed(value.y);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a state hash. Tick and RNG state are always hashed first, then
/// `add_state` appends the rest in its own fixed order.
pub fn compute_state_hash<F>(tick: u32, rng_state: [u64; 2], add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_simulation_state();
    hasher.update_u32(tick);
    hasher.update_u64(rng_state[0]);
    hasher.update_u64(rng_state[1]);
    add_state(&mut hasher);
    hasher.finalize()
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };
        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_compute_state_hash() {
        let make = |tick| {
            compute_state_hash(tick, [1, 2], |hasher| {
                hasher.update_vec2(FixedVec2::new(to_fixed(5.0), 0));
                hasher.update_u8(1);
            })
        };

        assert_eq!(make(100), make(100));
        assert_ne!(make(100), make(101));
    }

    #[test]
    fn test_short_hex() {
        let hash = [0xabu8; 32];
        assert_eq!(short_hex(&hash), "abababab");
    }
}
