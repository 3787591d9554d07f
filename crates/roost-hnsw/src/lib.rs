//! HNSW (Hierarchical Navigable Small World) index for roost stores.
//!
//! Provides approximate nearest neighbor (ANN) search using the HNSW
//! algorithm. HNSW builds a multi-layer graph where:
//!
//! - Higher layers have fewer nodes (exponential decay)
//! - Each layer is a navigable small-world graph
//! - Search starts at top layer and descends
//!
//! # Layout
//!
//! ```text
//! HnswIndex   in-memory graph, dense append-only ids
//!     |
//! DiskIndex   graph.snap (checksummed snapshot) + inserts.log (CRC framed)
//! ```
//!
//! Every insert is appended to the log before it reaches the graph. The log
//! is folded into a fresh snapshot by [`DiskIndex::consolidate`]. On open,
//! a torn or corrupt log tail is truncated and everything before it kept.
//!
//! # Parameters
//!
//! - `M`: Max connections per node per layer (default: 16)
//! - `ef_construction`: Beam width during index building (default: 200)
//! - `ef_search`: Beam width during search (default: 100)
//! - `max_layers`: Maximum number of layers (default: 16)
//!
//! # Example
//!
//! ```
//! use roost_hnsw::{HnswConfig, HnswIndex};
//! use roost_vector::{DistanceFunction, VectorIndex};
//!
//! let index = HnswIndex::new(128, DistanceFunction::Euclidean, HnswConfig::default());
//!
//! index.insert(0, &[1.0; 128]).unwrap();
//! index.insert(1, &[2.0; 128]).unwrap();
//!
//! let results = index.search(&[1.5; 128], 10).unwrap();
//! assert_eq!(results.len(), 2);
//! ```

mod disk;
mod graph;
mod index;
mod layer;
mod persist;

pub use disk::{DiskIndex, DiskIndexConfig, OpenReport};
pub use graph::{Graph, NodeId};
pub use index::{HnswConfig, HnswIndex};
pub use persist::{INSERT_LOG_FILE, SNAPSHOT_FILE};

use std::io;

/// Error type for HNSW operations.
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("Vector error: {0}")]
    Vector(#[from] roost_vector::VectorError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Index corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Index opened read-only")]
    ReadOnly,
}

/// Result type for HNSW operations.
pub type Result<T> = std::result::Result<T, HnswError>;
