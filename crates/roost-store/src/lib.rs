//! Hierarchical record stores for classifier output.
//!
//! A *session* store sits next to the raw inputs it was produced from; an
//! *aggregate* store sits at an ancestor directory and merges the sessions
//! and aggregates below it. Every store is a directory holding:
//!
//! ```text
//! roost_session.db | roost_aggregate.db    records, vectors, bookkeeping
//! roost_session.idx | roost_aggregate.idx  HNSW index over the vectors
//! ```
//!
//! The SQLite database is authoritative. Vectors are stored once per
//! distinct content (SHA-256 over the `f32` bytes) under dense ids
//! `0..n`, and the index is a cache that can always be rebuilt from them.
//!
//! # Components
//!
//! - [`RecordStore`]: records, vector blobs, source registrations, unit status
//! - [`dedupe_and_register`]: content-addressed vector registration
//! - [`Store`]: record store + index + writer lock, checked on open
//! - [`ConsistencyManager`]: catch-up, corruption detection, rebuild, audit
//! - [`HierarchyWalker`]: directory classification and source discovery
//! - [`SyncEngine`]: incremental, idempotent merge into an aggregate
//! - [`Ingestor`]: one transaction per classifier input unit
//!
//! # Example
//!
//! ```no_run
//! use roost_store::{HierarchyWalker, RoostConfig, Store, StoreKind, SyncEngine, TraversalMode};
//!
//! # fn main() -> roost_store::Result<()> {
//! let config = RoostConfig::default();
//! let mut aggregate = Store::open("/data/2024", StoreKind::Aggregate, &config)?;
//!
//! let sources: Vec<_> = HierarchyWalker::discover(aggregate.dir(), TraversalMode::SourceDiscovery)?
//!     .into_iter()
//!     .map(|s| s.path)
//!     .collect();
//! let summary = SyncEngine::new(config.sync.clone()).sync(&mut aggregate, &sources)?;
//! println!("imported {} records", summary.records_imported);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consistency;
pub mod dedup;
pub mod error;
pub mod hierarchy;
pub mod ingest;
pub mod model;
pub mod record_store;
pub mod schema;
pub mod store;
pub mod sync;

pub use config::{ConfigError, IndexConfig, RoostConfig, StoreConfig, SyncConfig};
pub use consistency::{AuditReport, ConsistencyManager, ConsistencyOutcome};
pub use dedup::{content_hash, dedupe_and_register, DedupOutcome};
pub use error::{Result, StoreError};
pub use hierarchy::{classify, stores_in, DirKind, DiscoveredStore, HierarchyWalker, TraversalMode};
pub use ingest::{IngestReport, Ingestor};
pub use model::{
    Provenance, Record, RecordFields, SourceRegistration, StoreKind, StoredUnit, UnitMetadata,
    UnitProgress, UnitStatus,
};
pub use record_store::{RecordStore, StoredVector, WriteTxn};
pub use schema::SCHEMA_VERSION;
pub use store::{IndexState, Store, LOCK_FILE};
pub use sync::{SourceFailure, SyncEngine, SyncOptions, SyncSummary};
