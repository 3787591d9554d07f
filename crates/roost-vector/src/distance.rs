//! Distance functions for vector similarity.
//!
//! Stores rank neighbors by cosine distance; Euclidean and inner product are
//! available for indexes configured differently. All functions return a value
//! where lower means more similar.

use serde::{Deserialize, Serialize};

/// Distance function enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    /// Cosine distance: 1 - (a · b) / (||a|| * ||b||), in [0, 2]
    #[default]
    Cosine,
    /// Euclidean (L2) distance: sqrt(sum((a[i] - b[i])^2))
    Euclidean,
    /// Negated dot product, so that larger products sort first.
    InnerProduct,
}

impl DistanceFunction {
    /// Compute distance between two vectors of equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
            Self::InnerProduct => -inner_product(a, b),
        }
    }
}

/// Euclidean (L2) distance.
///
/// ```
/// use roost_vector::euclidean_distance;
///
/// let d = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]);
/// assert!((d - 5.0).abs() < 1e-6);
/// ```
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Cosine distance.
///
/// Zero vectors have no direction; they are treated as orthogonal to
/// everything (distance 1.0).
///
/// ```
/// use roost_vector::cosine_distance;
///
/// assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]) < 1e-6);
/// assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
/// ```
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f32, 0.0f32, 0.0f32), |acc, (x, y)| {
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return 1.0;
    }

    1.0 - (dot / denom).clamp(-1.0, 1.0)
}

/// Dot product.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
