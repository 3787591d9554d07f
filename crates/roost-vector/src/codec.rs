//! Byte layout for durable vector blobs.
//!
//! Vectors are stored as consecutive little-endian `f32`s. The same bytes
//! feed the content hash, so the layout must never change for a given
//! schema version.

use crate::{Result, VectorError};

/// Encodes a vector as little-endian `f32` bytes.
pub fn encode_f32_le(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes little-endian `f32` bytes produced by [`encode_f32_le`].
pub fn decode_f32_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(VectorError::MalformedBlob { len: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
