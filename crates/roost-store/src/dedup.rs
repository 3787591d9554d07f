//! Content-addressed vector deduplication.
//!
//! A vector's identity is the SHA-256 of its little-endian `f32` bytes.
//! Identical vectors share one row and one index entry however many records
//! point at them.

use crate::error::{Result, StoreError};
use crate::record_store::WriteTxn;
use roost_vector::{encode_f32_le, validate_vector, VectorError, VectorId};
use sha2::{Digest, Sha256};

/// Hex SHA-256 over the vector's little-endian byte layout.
pub fn content_hash(vector: &[f32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encode_f32_le(vector));
    hex::encode(hasher.finalize())
}

/// Result of registering one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Hash already stored; no row written, no index insert.
    Existing(VectorId),
    /// New row written; index insert staged for commit.
    Added(VectorId),
}

impl DedupOutcome {
    pub fn vector_id(self) -> VectorId {
        match self {
            DedupOutcome::Existing(id) | DedupOutcome::Added(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, DedupOutcome::Added(_))
    }
}

/// Registers `vector` in the open transaction, reusing the id of an
/// identical stored vector.
///
/// Fails with `HashCollisionSuspected` if a stored vector has the same hash
/// but different bytes; nothing is written in that case.
pub fn dedupe_and_register(txn: &mut WriteTxn<'_>, vector: &[f32]) -> Result<DedupOutcome> {
    if vector.is_empty() {
        return Err(VectorError::InvalidVector("empty vector".into()).into());
    }
    let dimension = txn.vector_dimension()?.unwrap_or(vector.len());
    validate_vector(vector, dimension)?;
    let hash = content_hash(vector);

    if let Some(stored) = txn.find_vector_by_hash(&hash)? {
        if stored.dimension != vector.len() || encode_f32_le(&stored.vector) != encode_f32_le(vector)
        {
            tracing::warn!(
                content_hash = %hash,
                stored_dimension = stored.dimension,
                dimension = vector.len(),
                "hash collision suspected, vector skipped"
            );
            return Err(StoreError::HashCollisionSuspected { content_hash: hash });
        }
        return Ok(DedupOutcome::Existing(stored.vector_id));
    }

    let (id, inserted) = txn.register_vector_if_absent(&hash, vector)?;
    if !inserted {
        return Ok(DedupOutcome::Existing(id));
    }
    txn.stage_index_insert(id, vector.to_vec());
    Ok(DedupOutcome::Added(id))
}
