//! A store directory: record database, vector index and writer lock.
//!
//! ```text
//! <dir>/
//!   .roost.lock               advisory writer lock
//!   roost_<kind>.db           RecordStore (authoritative)
//!   roost_<kind>.idx/         DiskIndex (derived, rebuildable)
//! ```

use crate::config::RoostConfig;
use crate::consistency::{ConsistencyManager, ConsistencyOutcome};
use crate::error::{Result, StoreError};
use crate::model::{Record, StoreKind};
use crate::record_store::{RecordStore, WriteTxn};
use fs2::FileExt;
use roost_hnsw::{DiskIndex, HnswError};
use roost_observe::{Meter, NoopMeter};
use roost_vector::{VectorId, VectorMatch};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const LOCK_FILE: &str = ".roost.lock";

/// Availability of the vector index.
pub enum IndexState {
    Ready(DiskIndex),
    /// Queries are refused; records can still be written.
    Corrupt { reason: String },
}

impl IndexState {
    pub fn is_ready(&self) -> bool {
        matches!(self, IndexState::Ready(_))
    }
}

impl std::fmt::Debug for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Ready(disk) => write!(f, "Ready({} vectors)", disk.len()),
            IndexState::Corrupt { reason } => write!(f, "Corrupt({reason})"),
        }
    }
}

/// An opened session or aggregate store.
pub struct Store {
    dir: PathBuf,
    kind: StoreKind,
    records: RecordStore,
    index: IndexState,
    config: RoostConfig,
    meter: Arc<dyn Meter>,
    open_outcome: ConsistencyOutcome,
    _lock: Option<File>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the store in `dir` for writing, creating it as `kind` if needed.
    pub fn open(dir: impl AsRef<Path>, kind: StoreKind, config: &RoostConfig) -> Result<Self> {
        Self::open_with_meter(dir, kind, config, Arc::new(NoopMeter))
    }

    pub fn open_with_meter(
        dir: impl AsRef<Path>,
        kind: StoreKind,
        config: &RoostConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let lock = acquire_lock(dir)?;
        let records = RecordStore::open(dir.join(kind.db_file()), kind)?;
        let index = load_index(
            DiskIndex::open_with_meter(dir.join(kind.index_dir()), config.index_config(), meter.clone())
                .map(|(disk, _)| disk),
        )?;

        let mut store = Self {
            dir: dir.to_path_buf(),
            kind,
            records,
            index,
            config: config.clone(),
            meter: meter.clone(),
            open_outcome: ConsistencyOutcome::Healthy,
            _lock: Some(lock),
        };

        let outcome =
            ConsistencyManager::new(meter, config.store.auto_rebuild).check_on_open(&mut store)?;
        tracing::info!(
            dir = %store.dir.display(),
            kind = %kind,
            vectors = store.index_len(),
            outcome = ?outcome,
            "store opened"
        );
        store.open_outcome = outcome;
        Ok(store)
    }

    /// Opens an existing store for reading without taking the writer lock.
    ///
    /// Works regardless of schema version. The index is checked but never
    /// repaired.
    pub fn open_read_only(dir: impl AsRef<Path>, kind: StoreKind, config: &RoostConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let records = RecordStore::open_read_only(dir.join(kind.db_file()))?;
        if records.kind() != kind {
            return Err(StoreError::KindMismatch {
                expected: kind.to_string(),
                found: records.kind().to_string(),
            });
        }
        let index = load_index(
            DiskIndex::open_read_only(dir.join(kind.index_dir()), config.index_config())
                .map(|(disk, _)| disk),
        )?;

        let meter: Arc<dyn Meter> = Arc::new(NoopMeter);
        let mut store = Self {
            dir: dir.to_path_buf(),
            kind,
            records,
            index,
            config: config.clone(),
            meter: meter.clone(),
            open_outcome: ConsistencyOutcome::Healthy,
            _lock: None,
        };
        store.open_outcome = ConsistencyManager::new(meter, false).check_on_open(&mut store)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Directory of a sync source, from the key kept in its registration
    /// and in the provenance of its records.
    pub fn resolve_source(&self, source_path: &Path) -> PathBuf {
        if source_path.is_absolute() {
            source_path.to_path_buf()
        } else if source_path == Path::new(".") {
            self.dir.clone()
        } else {
            self.dir.join(source_path)
        }
    }

    pub fn config(&self) -> &RoostConfig {
        &self.config
    }

    pub fn meter(&self) -> Arc<dyn Meter> {
        self.meter.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.records.is_read_only()
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn index_state(&self) -> &IndexState {
        &self.index
    }

    pub(crate) fn index_state_mut(&mut self) -> &mut IndexState {
        &mut self.index
    }

    pub(crate) fn set_index_state(&mut self, state: IndexState) {
        self.index = state;
    }

    pub fn index_dir(&self) -> PathBuf {
        self.dir.join(self.kind.index_dir())
    }

    /// What the consistency check found when the store was opened.
    pub fn open_outcome(&self) -> &ConsistencyOutcome {
        &self.open_outcome
    }

    /// Vectors in the index, `None` while it is corrupt.
    pub fn index_len(&self) -> Option<usize> {
        match &self.index {
            IndexState::Ready(disk) => Some(disk.len()),
            IndexState::Corrupt { .. } => None,
        }
    }

    /// Runs `f` as one unit of work.
    ///
    /// The transaction commits if `f` succeeds and rolls back otherwise.
    /// Index inserts staged by `f` are applied only after the commit.
    pub fn write<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        let mut txn = self.records.begin()?;
        let value = f(&mut txn)?;
        let staged = txn.commit()?;
        self.apply_staged(staged);
        Ok(value)
    }

    fn apply_staged(&mut self, staged: Vec<(VectorId, Vec<f32>)>) {
        if staged.is_empty() {
            return;
        }
        let result = match &mut self.index {
            IndexState::Ready(disk) => disk.insert_batch(&staged),
            IndexState::Corrupt { .. } => {
                tracing::debug!(count = staged.len(), "index unavailable, inserts deferred to rebuild");
                return;
            }
        };
        if let Err(e) = result {
            // Rows are committed; the index is behind until reopened or rebuilt
            tracing::warn!(dir = %self.dir.display(), error = %e, "index append failed");
            self.index = IndexState::Corrupt {
                reason: format!("append failed: {e}"),
            };
        }
    }

    /// k nearest stored vectors. Refused while the index is corrupt.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        match &self.index {
            IndexState::Ready(disk) => Ok(disk.query(vector, k)?),
            IndexState::Corrupt { reason } => Err(StoreError::IndexCorrupt {
                reason: reason.clone(),
            }),
        }
    }

    /// k nearest vectors together with the records that reference them.
    pub fn query_records(&self, vector: &[f32], k: usize) -> Result<Vec<(VectorMatch, Vec<Record>)>> {
        let mut out = Vec::new();
        for m in self.query(vector, k)? {
            let records = self.records.records_for_vector(m.id)?;
            out.push((m, records));
        }
        Ok(out)
    }

    /// Folds the index insert log into a snapshot.
    pub fn consolidate_index(&mut self) -> Result<()> {
        match &mut self.index {
            IndexState::Ready(disk) => Ok(disk.consolidate()?),
            IndexState::Corrupt { reason } => Err(StoreError::IndexCorrupt {
                reason: reason.clone(),
            }),
        }
    }

    /// Rebuilds the index from the record store.
    pub fn rebuild_index(&mut self) -> Result<()> {
        ConsistencyManager::new(self.meter.clone(), false).rebuild(self)?;
        Ok(())
    }
}

fn load_index(opened: std::result::Result<DiskIndex, HnswError>) -> Result<IndexState> {
    match opened {
        Ok(disk) => Ok(IndexState::Ready(disk)),
        Err(HnswError::Corrupt { reason }) => Ok(IndexState::Corrupt { reason }),
        Err(HnswError::Serialization(e)) => Ok(IndexState::Corrupt {
            reason: format!("undecodable snapshot: {e}"),
        }),
        Err(e) => Err(e.into()),
    }
}

fn acquire_lock(dir: &Path) -> Result<File> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    file.try_lock_exclusive()
        .map_err(|_| StoreError::Locked { path: path.clone() })?;
    Ok(file)
}
