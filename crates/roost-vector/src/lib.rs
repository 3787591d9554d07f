//! Vector primitives shared by roost stores.
//!
//! This crate provides:
//!
//! - **Distance functions**: Cosine (default for stores), Euclidean (L2),
//!   Inner Product
//! - **Codec**: the little-endian `f32` byte layout used for the durable
//!   vector blobs and content hashing
//! - **VectorIndex trait**: append-only interface implemented by the exact
//!   [`BruteForceIndex`] and by the HNSW graph in `roost-hnsw`
//!
//! Vector ids are dense `u64`s allocated by the record store; indexes never
//! delete or replace an id once inserted.
//!
//! # Example
//!
//! ```
//! use roost_vector::{BruteForceIndex, DistanceFunction, VectorIndex};
//!
//! let index = BruteForceIndex::new(4, DistanceFunction::Cosine);
//! index.insert(0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
//! index.insert(1, &[0.0, 1.0, 0.0, 0.0]).unwrap();
//!
//! let results = index.search(&[0.9, 0.1, 0.0, 0.0], 1).unwrap();
//! assert_eq!(results[0].id, 0);
//! ```

mod brute;
mod codec;
mod distance;
mod traits;

pub use brute::BruteForceIndex;
pub use codec::{decode_f32_le, encode_f32_le};
pub use distance::{cosine_distance, euclidean_distance, inner_product, DistanceFunction};
pub use traits::{VectorId, VectorIndex, VectorMatch};

/// Error type for vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector id {0} already present")]
    DuplicateId(VectorId),

    #[error("Vector id {got} out of order (expected {expected})")]
    OutOfOrder { expected: VectorId, got: VectorId },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Malformed vector blob: {len} bytes is not a multiple of 4")]
    MalformedBlob { len: usize },
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Checks that `vector` has `dimensions` finite components.
pub fn validate_vector(vector: &[f32], dimensions: usize) -> Result<()> {
    if vector.len() != dimensions {
        return Err(VectorError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }

    if let Some((i, v)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        let what = if v.is_nan() { "NaN" } else { "Inf" };
        return Err(VectorError::InvalidVector(format!("{} at index {}", what, i)));
    }

    Ok(())
}
