//! Brute force vector index.
//!
//! Exact linear scan. Serves as the ground truth when measuring HNSW recall
//! and when checking that a rebuilt index answers like the original.

use crate::distance::DistanceFunction;
use crate::traits::{VectorId, VectorIndex, VectorMatch};
use crate::{validate_vector, Result, VectorError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Brute force vector index.
///
/// # Performance
///
/// - Insert: O(log n)
/// - Search: O(n * d) where n = vectors, d = dimensions
pub struct BruteForceIndex {
    vectors: RwLock<BTreeMap<VectorId, Vec<f32>>>,
    dimensions: usize,
    distance: DistanceFunction,
}

impl BruteForceIndex {
    /// Create a new brute force index.
    ///
    /// ```
    /// use roost_vector::{BruteForceIndex, DistanceFunction};
    ///
    /// let index = BruteForceIndex::new(1024, DistanceFunction::Cosine);
    /// ```
    pub fn new(dimensions: usize, distance: DistanceFunction) -> Self {
        Self {
            vectors: RwLock::new(BTreeMap::new()),
            dimensions,
            distance,
        }
    }

    /// Builds an index from `(id, vector)` pairs.
    pub fn from_pairs<'a, I>(dimensions: usize, distance: DistanceFunction, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (VectorId, &'a [f32])>,
    {
        let index = Self::new(dimensions, distance);
        for (id, vector) in pairs {
            index.insert(id, vector)?;
        }
        Ok(index)
    }

    pub fn distance_function(&self) -> DistanceFunction {
        self.distance
    }
}

impl VectorIndex for BruteForceIndex {
    fn insert(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimensions)?;

        let mut vectors = self.vectors.write();
        if vectors.contains_key(&id) {
            return Err(VectorError::DuplicateId(id));
        }
        vectors.insert(id, vector.to_vec());
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        validate_vector(query, self.dimensions)?;

        if k == 0 {
            return Ok(vec![]);
        }

        let vectors = self.vectors.read();
        let mut results: Vec<VectorMatch> = vectors
            .iter()
            .map(|(&id, v)| VectorMatch::new(id, self.distance.distance(query, v)))
            .collect();

        results.sort();
        results.truncate(k);
        Ok(results)
    }

    fn get(&self, id: VectorId) -> Option<Vec<f32>> {
        self.vectors.read().get(&id).cloned()
    }

    fn contains(&self, id: VectorId) -> bool {
        self.vectors.read().contains_key(&id)
    }

    fn len(&self) -> usize {
        self.vectors.read().len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
