//! Disk-resident HNSW index.
//!
//! A `DiskIndex` owns one directory holding `graph.snap` and `inserts.log`.
//! Inserts are made durable in the log before they reach the in-memory
//! graph; `consolidate` folds the log into a new snapshot.

use crate::index::{HnswConfig, HnswIndex};
use crate::persist::{
    read_snapshot, recover_log, remove_snapshot, write_snapshot, InsertLog, LogEntry, Snapshot,
};
use crate::{HnswError, Result};
use roost_observe::{obs_count, obs_hist, IndexEvt, IndexKind, Meter, NoopMeter, VizEvent};
use roost_vector::{DistanceFunction, VectorId, VectorIndex, VectorMatch};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Largest distance at which a stored vector still counts as found by the
/// smoke query.
const SMOKE_TOLERANCE: f32 = 1e-4;

fn default_consolidate_every() -> usize {
    1024
}

/// Configuration of a disk index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIndexConfig {
    #[serde(default)]
    pub hnsw: HnswConfig,

    #[serde(default)]
    pub distance: DistanceFunction,

    /// Logged inserts that trigger a consolidation (0 disables).
    #[serde(default = "default_consolidate_every")]
    pub consolidate_every: usize,
}

impl Default for DiskIndexConfig {
    fn default() -> Self {
        Self {
            hnsw: HnswConfig::default(),
            distance: DistanceFunction::Cosine,
            consolidate_every: default_consolidate_every(),
        }
    }
}

/// What opening the index found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenReport {
    /// Vectors restored from the snapshot.
    pub snapshot_vectors: u64,
    /// Log entries applied on top of the snapshot.
    pub replayed: u64,
    /// Log entries already covered by the snapshot.
    pub stale_skipped: u64,
    /// Bytes of torn log tail dropped.
    pub bytes_truncated: u64,
}

/// HNSW index persisted in a directory.
pub struct DiskIndex {
    dir: PathBuf,
    config: DiskIndexConfig,
    /// `None` until the first vector fixes the dimension.
    index: Option<HnswIndex>,
    /// `None` for read-only handles.
    log: Option<InsertLog>,
    /// Entries in the log since the last snapshot.
    logged: usize,
    meter: Arc<dyn Meter>,
}

impl DiskIndex {
    /// Opens (or creates) the index in `dir` for writing.
    pub fn open(dir: impl AsRef<Path>, config: DiskIndexConfig) -> Result<(Self, OpenReport)> {
        Self::open_with_meter(dir, config, Arc::new(NoopMeter))
    }

    pub fn open_with_meter(
        dir: impl AsRef<Path>,
        config: DiskIndexConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<(Self, OpenReport)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Self::load(dir, config, true, meter)
    }

    /// Opens the index without taking write access. The log is replayed but
    /// never truncated; a missing directory yields an empty index.
    pub fn open_read_only(
        dir: impl AsRef<Path>,
        config: DiskIndexConfig,
    ) -> Result<(Self, OpenReport)> {
        Self::load(dir.as_ref(), config, false, Arc::new(NoopMeter))
    }

    /// Replaces whatever is in `dir` with an index built from `vectors`.
    ///
    /// `vectors` must yield ids `0, 1, 2, ...` in order.
    pub fn create_from<I>(
        dir: impl AsRef<Path>,
        config: DiskIndexConfig,
        meter: Arc<dyn Meter>,
        vectors: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (VectorId, Vec<f32>)>,
    {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut disk = Self {
            dir: dir.to_path_buf(),
            config,
            index: None,
            log: Some(InsertLog::open(dir)?),
            logged: 0,
            meter,
        };
        disk.rebuild_from(vectors)?;
        Ok(disk)
    }

    fn load(
        dir: &Path,
        config: DiskIndexConfig,
        writable: bool,
        meter: Arc<dyn Meter>,
    ) -> Result<(Self, OpenReport)> {
        config.hnsw.validate()?;
        let mut report = OpenReport::default();

        let mut index = match read_snapshot(dir)? {
            Some(snapshot) => {
                if snapshot.distance != config.distance {
                    return Err(HnswError::Corrupt {
                        reason: format!(
                            "snapshot uses {:?} distance, configured {:?}",
                            snapshot.distance, config.distance
                        ),
                    });
                }
                let index = HnswIndex::from_graph(
                    snapshot.dimensions,
                    snapshot.distance,
                    config.hnsw.clone(),
                    snapshot.graph,
                )?;
                report.snapshot_vectors = index.len() as u64;
                Some(index)
            }
            None => None,
        };

        let scan = recover_log(dir, writable)?;
        report.bytes_truncated = scan.file_len - scan.valid_len;

        for entry in &scan.entries {
            let len = index.as_ref().map(|i| i.len()).unwrap_or(0) as VectorId;
            if entry.id < len {
                // Logged before the snapshot that already holds it
                report.stale_skipped += 1;
                continue;
            }
            if entry.id > len {
                return Err(HnswError::Corrupt {
                    reason: format!("insert log jumps from id {} to {}", len, entry.id),
                });
            }

            let idx = index.get_or_insert_with(|| {
                HnswIndex::new(entry.vector.len(), config.distance, config.hnsw.clone())
            });
            idx.insert(entry.id, &entry.vector)
                .map_err(|e| HnswError::Corrupt {
                    reason: format!("replaying id {}: {}", entry.id, e),
                })?;
            report.replayed += 1;
        }

        let log = if writable {
            Some(InsertLog::open(dir)?)
        } else {
            None
        };

        let disk = Self {
            dir: dir.to_path_buf(),
            config,
            index,
            log,
            logged: scan.entries.len(),
            meter,
        };

        if report.bytes_truncated > 0 {
            tracing::warn!(
                dir = %disk.dir.display(),
                bytes = report.bytes_truncated,
                "truncated torn insert log tail"
            );
            disk.emit(IndexKind::TailTruncated {
                bytes: report.bytes_truncated,
            });
        }
        tracing::debug!(
            dir = %disk.dir.display(),
            vectors = disk.len(),
            replayed = report.replayed,
            "index opened"
        );
        disk.emit(IndexKind::Opened);

        Ok((disk, report))
    }

    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &DiskIndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.index.as_ref().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension, known once the first vector is stored.
    pub fn dimensions(&self) -> Option<usize> {
        self.index.as_ref().map(|i| i.dimensions())
    }

    pub fn is_read_only(&self) -> bool {
        self.log.is_none()
    }

    pub fn get(&self, id: VectorId) -> Option<Vec<f32>> {
        self.index.as_ref().and_then(|i| i.get(id))
    }

    pub fn insert(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        self.insert_batch(&[(id, vector.to_vec())])
    }

    /// Appends vectors with consecutive ids starting at `len()`.
    ///
    /// The whole batch is validated before anything is written, then logged
    /// with one fsync.
    pub fn insert_batch(&mut self, items: &[(VectorId, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        if self.log.is_none() {
            return Err(HnswError::ReadOnly);
        }

        let dims = self.dimensions().unwrap_or(items[0].1.len());
        let mut expected = self.len() as VectorId;
        for (id, vector) in items {
            roost_vector::validate_vector(vector, dims)?;
            if *id < expected {
                return Err(roost_vector::VectorError::DuplicateId(*id).into());
            }
            if *id > expected {
                return Err(roost_vector::VectorError::OutOfOrder {
                    expected,
                    got: *id,
                }
                .into());
            }
            expected += 1;
        }

        let entries: Vec<LogEntry> = items
            .iter()
            .map(|(id, vector)| LogEntry {
                id: *id,
                vector: vector.clone(),
            })
            .collect();
        if let Some(log) = self.log.as_mut() {
            log.append(&entries)?;
        }

        let distance = self.config.distance;
        let hnsw = self.config.hnsw.clone();
        let index = self
            .index
            .get_or_insert_with(|| HnswIndex::new(dims, distance, hnsw));
        for entry in &entries {
            index.insert(entry.id, &entry.vector)?;
        }
        self.logged += entries.len();

        obs_count!(self.meter, "index_vectors_appended", &[], entries.len());
        self.emit(IndexKind::Appended {
            count: entries.len() as u32,
        });

        if self.config.consolidate_every > 0 && self.logged >= self.config.consolidate_every {
            self.consolidate()?;
        }
        Ok(())
    }

    /// Writes the current graph as the new snapshot and empties the log.
    ///
    /// Levels depend only on ids, so the graph grown by appends in id order
    /// is the one a full rebuild would produce. Idempotent.
    pub fn consolidate(&mut self) -> Result<()> {
        if self.log.is_none() {
            return Err(HnswError::ReadOnly);
        }
        if self.logged == 0 {
            return Ok(());
        }

        let start = Instant::now();
        self.write_current_snapshot()?;
        let ms = start.elapsed().as_millis() as u32;
        obs_hist!(self.meter, "index_consolidate_ms", &[], ms);

        tracing::info!(
            dir = %self.dir.display(),
            vectors = self.len(),
            folded = self.logged,
            ms,
            "index consolidated"
        );
        self.logged = 0;
        self.emit(IndexKind::Consolidated { ms });
        Ok(())
    }

    /// Discards the current contents and builds the index from `vectors`,
    /// which must yield ids `0, 1, 2, ...` in order.
    pub fn rebuild_from<I>(&mut self, vectors: I) -> Result<()>
    where
        I: IntoIterator<Item = (VectorId, Vec<f32>)>,
    {
        if self.log.is_none() {
            return Err(HnswError::ReadOnly);
        }
        self.config.hnsw.validate()?;

        let mut fresh: Option<HnswIndex> = None;
        for (id, vector) in vectors {
            let index = fresh.get_or_insert_with(|| {
                HnswIndex::new(vector.len(), self.config.distance, self.config.hnsw.clone())
            });
            index.insert(id, &vector)?;
        }

        self.index = fresh;
        self.write_current_snapshot()?;
        self.logged = 0;

        tracing::info!(dir = %self.dir.display(), vectors = self.len(), "index rebuilt");
        self.emit(IndexKind::Rebuilt);
        Ok(())
    }

    fn write_current_snapshot(&mut self) -> Result<()> {
        match &self.index {
            Some(index) => {
                let snapshot = Snapshot {
                    dimensions: index.dimensions(),
                    distance: index.distance_function(),
                    graph: index.graph(),
                };
                write_snapshot(&self.dir, &snapshot)?;
            }
            None => remove_snapshot(&self.dir)?,
        }
        // Entries older than the snapshot are skipped on replay, so a crash
        // before this reset is harmless.
        if let Some(log) = self.log.as_mut() {
            log.reset()?;
        }
        Ok(())
    }

    /// k nearest stored vectors, closest first.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        match &self.index {
            Some(index) => Ok(index.search(vector, k)?),
            None => Ok(vec![]),
        }
    }

    /// Structural check of the graph plus a smoke query for a few stored
    /// vectors, each of which must come back at (near) zero distance.
    pub fn self_check(&self) -> Result<()> {
        let Some(index) = &self.index else {
            return Ok(());
        };
        index.check_structure()?;

        let len = index.len() as VectorId;
        let mut probes = vec![0, len / 2, len.saturating_sub(1)];
        probes.dedup();

        for id in probes {
            let vector = index.get(id).ok_or_else(|| HnswError::Corrupt {
                reason: format!("vector {} missing", id),
            })?;
            if vector.iter().all(|x| *x == 0.0) {
                // A zero vector is not at distance 0 from itself under cosine
                continue;
            }
            let found = index.search(&vector, 1)?;
            match found.first() {
                Some(m) if m.distance <= SMOKE_TOLERANCE => {}
                Some(m) => {
                    return Err(HnswError::Corrupt {
                        reason: format!(
                            "smoke query for vector {} found {} at distance {}",
                            id, m.id, m.distance
                        ),
                    })
                }
                None => {
                    return Err(HnswError::Corrupt {
                        reason: format!("smoke query for vector {} returned nothing", id),
                    })
                }
            }
        }
        Ok(())
    }

    fn emit(&self, kind: IndexKind) {
        self.meter.emit(VizEvent::Index(IndexEvt {
            vectors: self.len() as u64,
            kind,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{INSERT_LOG_FILE, SNAPSHOT_FILE};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config(consolidate_every: usize) -> DiskIndexConfig {
        DiskIndexConfig {
            hnsw: HnswConfig {
                m: 8,
                m_max0: 16,
                ef_construction: 64,
                ef_search: 32,
                max_layers: 8,
                seed: 3,
            },
            distance: DistanceFunction::Cosine,
            consolidate_every,
        }
    }

    fn vector(i: u64) -> Vec<f32> {
        vec![
            (i as f32 * 0.37).sin(),
            (i as f32 * 0.11).cos(),
            (i % 7) as f32 - 3.0,
            1.0,
        ]
    }

    fn items(range: std::ops::Range<u64>) -> Vec<(VectorId, Vec<f32>)> {
        range.map(|i| (i, vector(i))).collect()
    }

    #[test]
    fn test_insert_and_reopen_from_log() {
        let dir = TempDir::new().unwrap();
        {
            let (mut disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            assert_eq!(report, OpenReport::default());
            assert!(disk.is_empty());
            assert_eq!(disk.dimensions(), None);

            disk.insert_batch(&items(0..10)).unwrap();
            disk.insert(10, &vector(10)).unwrap();
        }

        let (disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(disk.len(), 11);
        assert_eq!(report.replayed, 11);
        assert_eq!(report.snapshot_vectors, 0);
        assert_eq!(disk.dimensions(), Some(4));
        assert_eq!(disk.query(&vector(4), 1).unwrap()[0].id, 4);
    }

    #[test]
    fn test_consolidate_writes_snapshot_and_empties_log() {
        let dir = TempDir::new().unwrap();
        {
            let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            disk.insert_batch(&items(0..20)).unwrap();
            disk.consolidate().unwrap();
            disk.consolidate().unwrap();
            disk.insert_batch(&items(20..25)).unwrap();
        }

        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        let (disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(report.snapshot_vectors, 20);
        assert_eq!(report.replayed, 5);
        assert_eq!(disk.len(), 25);
        disk.self_check().unwrap();
    }

    #[test]
    fn test_auto_consolidation() {
        let dir = TempDir::new().unwrap();
        let (mut disk, _) = DiskIndex::open(dir.path(), test_config(8)).unwrap();
        disk.insert_batch(&items(0..5)).unwrap();
        disk.insert_batch(&items(5..9)).unwrap();

        let log_len = fs::metadata(dir.path().join(INSERT_LOG_FILE)).unwrap().len();
        assert_eq!(log_len, 0);
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
    }

    #[test]
    fn test_batch_validated_before_write() {
        let dir = TempDir::new().unwrap();
        let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        disk.insert_batch(&items(0..3)).unwrap();

        let gap = vec![(3, vector(3)), (5, vector(5))];
        assert!(disk.insert_batch(&gap).is_err());
        let bad_dims = vec![(3, vec![1.0, 2.0])];
        assert!(disk.insert_batch(&bad_dims).is_err());
        assert_eq!(disk.len(), 3);

        drop(disk);
        let (disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(disk.len(), 3);
    }

    #[test]
    fn test_torn_log_tail_recovered() {
        let dir = TempDir::new().unwrap();
        {
            let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            disk.insert_batch(&items(0..6)).unwrap();
        }

        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join(INSERT_LOG_FILE))
            .unwrap();
        log.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
        drop(log);

        let (mut disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(report.bytes_truncated, 7);
        assert_eq!(disk.len(), 6);

        // Appends continue cleanly after truncation
        disk.insert(6, &vector(6)).unwrap();
        drop(disk);
        let (disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(report.bytes_truncated, 0);
        assert_eq!(disk.len(), 7);
    }

    #[test]
    fn test_stale_log_entries_skipped() {
        let dir = TempDir::new().unwrap();
        let stale_log = {
            let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            disk.insert_batch(&items(0..4)).unwrap();
            let log = fs::read(dir.path().join(INSERT_LOG_FILE)).unwrap();
            disk.consolidate().unwrap();
            log
        };

        // Crash between snapshot rename and log reset
        fs::write(dir.path().join(INSERT_LOG_FILE), stale_log).unwrap();

        let (disk, report) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        assert_eq!(disk.len(), 4);
        assert_eq!(report.stale_skipped, 4);
        assert_eq!(report.replayed, 0);
    }

    #[test]
    fn test_rebuild_reproduces_queries() {
        let dir = TempDir::new().unwrap();
        let (mut disk, _) = DiskIndex::open(dir.path(), test_config(16)).unwrap();
        for chunk in items(0..120).chunks(7) {
            disk.insert_batch(chunk).unwrap();
        }

        let probes: Vec<Vec<f32>> = (500..510).map(vector).collect();
        let before: Vec<_> = probes.iter().map(|p| disk.query(p, 5).unwrap()).collect();

        let rebuilt_dir = TempDir::new().unwrap();
        let rebuilt = DiskIndex::create_from(
            rebuilt_dir.path(),
            test_config(16),
            Arc::new(NoopMeter),
            items(0..120),
        )
        .unwrap();
        let after: Vec<_> = probes.iter().map(|p| rebuilt.query(p, 5).unwrap()).collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_read_only_open() {
        let dir = TempDir::new().unwrap();
        {
            let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            disk.insert_batch(&items(0..3)).unwrap();
        }

        let (mut disk, _) = DiskIndex::open_read_only(dir.path(), test_config(0)).unwrap();
        assert!(disk.is_read_only());
        assert_eq!(disk.len(), 3);
        assert!(matches!(disk.insert(3, &vector(3)), Err(HnswError::ReadOnly)));

        let missing = dir.path().join("nope");
        let (empty, _) = DiskIndex::open_read_only(&missing, test_config(0)).unwrap();
        assert!(empty.is_empty());
        assert!(!missing.exists());
    }

    #[test]
    fn test_corrupt_snapshot_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
            disk.insert_batch(&items(0..10)).unwrap();
            disk.consolidate().unwrap();
        }
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut data = fs::read(&path).unwrap();
        let n = data.len();
        data[n / 2] ^= 0x01;
        fs::write(&path, data).unwrap();

        assert!(matches!(
            DiskIndex::open(dir.path(), test_config(0)),
            Err(HnswError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_self_check_on_empty_and_filled() {
        let dir = TempDir::new().unwrap();
        let (mut disk, _) = DiskIndex::open(dir.path(), test_config(0)).unwrap();
        disk.self_check().unwrap();
        disk.insert_batch(&items(0..50)).unwrap();
        disk.self_check().unwrap();
    }
}
