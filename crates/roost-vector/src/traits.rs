//! Core traits for vector indices.
//!
//! `VectorIndex` is append-only: ids are dense, assigned by the owner of the
//! data, and never removed. Both the exact brute-force index and the HNSW
//! graph implement it.

use crate::Result;

/// Dense vector identifier, allocated contiguously from 0 per store.
pub type VectorId = u64;

/// A match returned from vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// The vector ID.
    pub id: VectorId,
    /// Distance (lower = more similar).
    pub distance: f32,
}

impl VectorMatch {
    pub fn new(id: VectorId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for VectorMatch {}

impl PartialOrd for VectorMatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VectorMatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ties fall back to the id so equal-distance results are stable.
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Common interface for append-only vector indices.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; internal synchronization is the
/// responsibility of each implementation.
pub trait VectorIndex: Send + Sync {
    /// Insert a vector under a new id.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The vector dimension doesn't match the index dimension
    /// - The vector contains NaN or infinite values
    /// - The id is already present
    fn insert(&self, id: VectorId, vector: &[f32]) -> Result<()>;

    /// Search for the k nearest neighbors of `query`.
    ///
    /// Returns up to `k` matches, sorted by distance (ascending).
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    /// Get a vector by id.
    fn get(&self, id: VectorId) -> Option<Vec<f32>>;

    /// Check if a vector exists.
    fn contains(&self, id: VectorId) -> bool;

    /// Number of vectors in the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of vectors in this index.
    fn dimensions(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_match_ordering() {
        let mut matches = vec![
            VectorMatch::new(7, 1.0),
            VectorMatch::new(2, 2.0),
            VectorMatch::new(9, 0.5),
            VectorMatch::new(3, 1.0),
        ];
        matches.sort();

        let ids: Vec<_> = matches.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![9, 3, 7, 2]);
    }
}
