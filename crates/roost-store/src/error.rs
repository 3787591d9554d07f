use crate::config::ConfigError;
use roost_hnsw::HnswError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index error: {0}")]
    Index(HnswError),

    #[error("Vector error: {0}")]
    Vector(#[from] roost_vector::VectorError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vector index corrupt: {reason}")]
    IndexCorrupt { reason: String },

    #[error("Source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Hash collision suspected for content hash {content_hash}")]
    HashCollisionSuspected { content_hash: String },

    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaVersionMismatch { found: u32, expected: u32 },

    #[error("Store is locked by another writer: {path}")]
    Locked { path: PathBuf },

    #[error("Store opened read-only")]
    ReadOnly,

    #[error("Store kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<HnswError> for StoreError {
    fn from(e: HnswError) -> Self {
        match e {
            HnswError::Corrupt { reason } => StoreError::IndexCorrupt { reason },
            other => StoreError::Index(other),
        }
    }
}

impl StoreError {
    /// Whether the error is confined to one source, vector or index and the
    /// surrounding operation can carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::IndexCorrupt { .. }
                | StoreError::SourceUnavailable { .. }
                | StoreError::HashCollisionSuspected { .. }
                | StoreError::SchemaVersionMismatch { .. }
                | StoreError::Locked { .. }
        )
    }

    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_index_maps_to_index_corrupt() {
        let e: StoreError = HnswError::Corrupt {
            reason: "bad crc".into(),
        }
        .into();
        assert!(matches!(e, StoreError::IndexCorrupt { ref reason } if reason == "bad crc"));
        assert!(e.is_recoverable());

        let e: StoreError = HnswError::ReadOnly.into();
        assert!(matches!(e, StoreError::Index(HnswError::ReadOnly)));
        assert!(!e.is_recoverable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(StoreError::source_unavailable("/a", "gone").is_recoverable());
        assert!(StoreError::SchemaVersionMismatch {
            found: 2,
            expected: 1
        }
        .is_recoverable());
        assert!(!StoreError::ReadOnly.is_recoverable());
        assert!(!StoreError::InvalidData("x".into()).is_recoverable());
    }
}
