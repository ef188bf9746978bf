//! Seed policy for sampler nodes.

use rand::Rng;

/// Exclusive upper bound of generated seeds (2^63).
pub const SEED_BOUND: u64 = 1 << 63;

/// Return the requested seed, or draw a fresh one when absent or zero.
pub fn resolve_seed(requested: Option<u64>) -> u64 {
    match requested {
        Some(seed) if seed != 0 => seed,
        _ => rand::rng().random_range(0..SEED_BOUND),
    }
}
