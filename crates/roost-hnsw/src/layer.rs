//! HNSW level assignment.
//!
//! The level of a node is drawn from the usual exponential distribution,
//! but the draw is seeded by the node's id. Inserting the same vectors in the
//! same id order therefore always yields the same graph, which is what lets
//! a rebuilt index answer queries exactly like the one it replaces.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws the level for node `id`.
///
/// Uses floor(-ln(uniform(0,1)) * m_L) with m_L = 1/ln(M), so the
/// probability of reaching level L is roughly 1/M^L.
pub fn assign_level(id: u64, seed: u64, m: usize, max_layers: usize) -> usize {
    let m_l = 1.0 / (m.max(2) as f64).ln();

    let mut rng = StdRng::seed_from_u64(seed ^ id.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let uniform: f64 = rng.gen_range(0.0001..1.0); // Avoid ln(0)

    let level = (-uniform.ln() * m_l).floor() as usize;
    level.min(max_layers.saturating_sub(1))
}
