//! Agreement between the record store and its vector index.
//!
//! The record store is authoritative. On open the index is self-checked and
//! compared against it: a short index is caught up from the missing tail,
//! anything else that disagrees marks the index corrupt and optionally
//! rebuilds it from scratch.

use crate::dedup::content_hash;
use crate::error::{Result, StoreError};
use crate::store::{IndexState, Store};
use roost_hnsw::DiskIndex;
use roost_observe::{obs_gauge, ConsistencyEvt, ConsistencyKind, Meter, VizEvent};
use roost_vector::VectorId;
use std::sync::Arc;
use std::time::Instant;

const CATCH_UP_PAGE: usize = 1024;

/// What the open-time check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyOutcome {
    Healthy,
    /// Index was behind; the missing vectors were appended.
    CaughtUp { missing: u64 },
    /// Index left unusable; queries are refused until rebuilt.
    Corrupt { reason: String },
    /// Index was corrupt and has been rebuilt.
    Rebuilt { vectors: u64 },
}

/// Findings of a full store audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub vector_count: u64,
    pub record_count: u64,
    /// Ids missing from `0..=max(vector_id)`.
    pub id_gaps: u64,
    /// Content hashes stored more than once.
    pub duplicate_hashes: u64,
    /// Vectors whose blob does not hash to their stored hash or dimension.
    pub hash_mismatches: Vec<VectorId>,
    /// Records pointing at a vector id with no row.
    pub orphaned_records: Vec<i64>,
    /// Vectors no record references.
    pub unreferenced_vectors: u64,
    /// Index length, `None` while the index is corrupt.
    pub index_len: Option<u64>,
    /// Ids whose index vector differs from the stored blob.
    pub index_mismatches: Vec<VectorId>,
    pub index_error: Option<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.id_gaps == 0
            && self.duplicate_hashes == 0
            && self.hash_mismatches.is_empty()
            && self.orphaned_records.is_empty()
            && self.index_mismatches.is_empty()
            && self.index_error.is_none()
            && self.index_len == Some(self.vector_count)
    }
}

pub struct ConsistencyManager {
    meter: Arc<dyn Meter>,
    auto_rebuild: bool,
}

impl ConsistencyManager {
    pub fn new(meter: Arc<dyn Meter>, auto_rebuild: bool) -> Self {
        Self {
            meter,
            auto_rebuild,
        }
    }

    /// Self-checks the index and reconciles it with the record store.
    ///
    /// Read-only stores are inspected but never repaired.
    pub fn check_on_open(&self, store: &mut Store) -> Result<ConsistencyOutcome> {
        let count = store.records().vector_count()?;

        let verdict = match store.index_state() {
            IndexState::Corrupt { reason } => Err(reason.clone()),
            IndexState::Ready(disk) => match disk.self_check() {
                Ok(()) => Ok(disk.len() as u64),
                Err(e) => Err(e.to_string()),
            },
        };

        let reason = match verdict {
            Ok(len) if len == count => {
                self.emit(count, ConsistencyKind::Healthy);
                return Ok(ConsistencyOutcome::Healthy);
            }
            Ok(len) if len < count && store.is_read_only() => {
                tracing::warn!(
                    dir = %store.dir().display(),
                    index = len,
                    records = count,
                    "read-only index is behind, newest vectors are not searchable"
                );
                return Ok(ConsistencyOutcome::Healthy);
            }
            Ok(len) if len < count => match self.catch_up(store, len) {
                Ok(missing) => return Ok(ConsistencyOutcome::CaughtUp { missing }),
                Err(e) => format!("catch-up failed: {e}"),
            },
            Ok(len) => format!("index holds {len} vectors, record store {count}"),
            Err(reason) => reason,
        };

        tracing::warn!(dir = %store.dir().display(), %reason, "vector index corrupt");
        self.emit(count, ConsistencyKind::CorruptDetected);
        store.set_index_state(IndexState::Corrupt {
            reason: reason.clone(),
        });

        if self.auto_rebuild && !store.is_read_only() {
            let vectors = self.rebuild(store)?;
            return Ok(ConsistencyOutcome::Rebuilt { vectors });
        }
        Ok(ConsistencyOutcome::Corrupt { reason })
    }

    /// Appends vectors `from..count` to a healthy index.
    fn catch_up(&self, store: &mut Store, from: u64) -> Result<u64> {
        let count = store.records().vector_count()?;
        let mut next = from;

        while next < count {
            let page = store.records().vectors_from(next, CATCH_UP_PAGE)?;
            if page.is_empty() {
                break;
            }
            let batch: Vec<(VectorId, Vec<f32>)> =
                page.into_iter().map(|v| (v.vector_id, v.vector)).collect();
            next += batch.len() as u64;

            match store.index_state_mut() {
                IndexState::Ready(disk) => disk.insert_batch(&batch)?,
                IndexState::Corrupt { reason } => {
                    return Err(StoreError::IndexCorrupt {
                        reason: reason.clone(),
                    })
                }
            }
        }

        let missing = next - from;
        tracing::info!(dir = %store.dir().display(), missing, "index caught up");
        self.emit(count, ConsistencyKind::CatchUp { missing });
        Ok(missing)
    }

    /// Replaces the index with one built from every stored vector in id
    /// order. Returns the number of vectors indexed.
    pub fn rebuild(&self, store: &mut Store) -> Result<u64> {
        if store.is_read_only() {
            return Err(StoreError::ReadOnly);
        }

        let start = Instant::now();
        let vectors = store.records().all_vectors_ordered()?;
        let n = vectors.len() as u64;

        // Release the old handle before its files are replaced
        store.set_index_state(IndexState::Corrupt {
            reason: "rebuild in progress".into(),
        });
        let disk = DiskIndex::create_from(
            store.index_dir(),
            store.config().index_config(),
            self.meter.clone(),
            vectors,
        )?;
        store.set_index_state(IndexState::Ready(disk));

        let ms = start.elapsed().as_millis() as u32;
        tracing::info!(dir = %store.dir().display(), vectors = n, ms, "index rebuilt");
        self.emit(n, ConsistencyKind::Rebuilt { ms });
        Ok(n)
    }

    /// Checks every invariant tying records, vectors and the index together.
    pub fn audit(&self, store: &Store) -> Result<AuditReport> {
        let records = store.records();
        let conn = records.conn();

        let mut report = AuditReport {
            vector_count: records.vector_count()?,
            record_count: records.record_count()?,
            ..Default::default()
        };

        let next_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(vector_id) + 1, 0) FROM vectors",
            [],
            |row| row.get(0),
        )?;
        report.id_gaps = (next_id as u64).saturating_sub(report.vector_count);

        let dupes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT content_hash FROM vectors \
             GROUP BY content_hash HAVING COUNT(*) > 1)",
            [],
            |row| row.get(0),
        )?;
        report.duplicate_hashes = dupes as u64;

        let mut stmt = conn.prepare(
            "SELECT r.id FROM records r LEFT JOIN vectors v ON v.vector_id = r.vector_id \
             WHERE r.vector_id IS NOT NULL AND v.vector_id IS NULL ORDER BY r.id",
        )?;
        report.orphaned_records = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let unreferenced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors v WHERE NOT EXISTS \
             (SELECT 1 FROM records r WHERE r.vector_id = v.vector_id)",
            [],
            |row| row.get(0),
        )?;
        report.unreferenced_vectors = unreferenced as u64;

        let disk = match store.index_state() {
            IndexState::Ready(disk) => {
                report.index_len = Some(disk.len() as u64);
                if let Err(e) = disk.self_check() {
                    report.index_error = Some(e.to_string());
                }
                Some(disk)
            }
            IndexState::Corrupt { reason } => {
                report.index_error = Some(reason.clone());
                None
            }
        };

        let mut from = 0;
        loop {
            let page = records.vectors_from(from, CATCH_UP_PAGE)?;
            let Some(last) = page.last() else { break };
            from = last.vector_id + 1;

            for stored in &page {
                if content_hash(&stored.vector) != stored.content_hash
                    || stored.vector.len() != stored.dimension
                {
                    report.hash_mismatches.push(stored.vector_id);
                }
                if let Some(disk) = disk {
                    if disk.len() as u64 > stored.vector_id
                        && disk.get(stored.vector_id).as_deref() != Some(stored.vector.as_slice())
                    {
                        report.index_mismatches.push(stored.vector_id);
                    }
                }
            }
        }

        Ok(report)
    }

    fn emit(&self, vectors: u64, kind: ConsistencyKind) {
        obs_gauge!(self.meter, "store_vectors", &[], vectors);
        self.meter
            .emit(VizEvent::Consistency(ConsistencyEvt { vectors, kind }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoostConfig;
    use crate::dedup::dedupe_and_register;
    use crate::model::{RecordFields, StoreKind};
    use chrono::{TimeZone, Utc};
    use roost_observe::NoopMeter;
    use tempfile::TempDir;

    fn fields() -> RecordFields {
        let t = Utc.with_ymd_and_hms(2024, 4, 2, 6, 0, 0).unwrap();
        RecordFields {
            source_file: "a.wav".into(),
            segment_start: t,
            segment_end: t,
            timezone: "UTC".into(),
            label: "Parus major".into(),
            local_label: Some("Kohlmeise".into()),
            score: 0.9,
        }
    }

    fn filled_store(dir: &TempDir, n: usize) -> Store {
        let mut store = Store::open(dir.path(), StoreKind::Session, &RoostConfig::default()).unwrap();
        store
            .write(|txn| {
                for i in 0..n {
                    let v = dedupe_and_register(txn, &[i as f32, 1.0, 0.5])?;
                    txn.register_record(&fields(), Some(v.vector_id()), None)?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_healthy_store_audits_clean() {
        let dir = TempDir::new().unwrap();
        let store = filled_store(&dir, 12);
        let report = ConsistencyManager::new(Arc::new(NoopMeter), false)
            .audit(&store)
            .unwrap();

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.vector_count, 12);
        assert_eq!(report.index_len, Some(12));
    }

    #[test]
    fn test_audit_flags_tampered_blob() {
        let dir = TempDir::new().unwrap();
        let store = filled_store(&dir, 3);
        store
            .records()
            .conn()
            .execute(
                "UPDATE vectors SET blob = ?1 WHERE vector_id = 1",
                [roost_vector::encode_f32_le(&[9.0, 9.0, 9.0])],
            )
            .unwrap();

        let report = ConsistencyManager::new(Arc::new(NoopMeter), false)
            .audit(&store)
            .unwrap();
        assert_eq!(report.hash_mismatches, vec![1]);
        assert_eq!(report.index_mismatches, vec![1]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_rebuild_restores_ready_state() {
        let dir = TempDir::new().unwrap();
        let mut store = filled_store(&dir, 20);
        let probe = [3.0, 1.0, 0.5];
        let before = store.query(&probe, 5).unwrap();

        store.set_index_state(IndexState::Corrupt {
            reason: "simulated".into(),
        });
        assert!(matches!(
            store.query(&probe, 5),
            Err(StoreError::IndexCorrupt { .. })
        ));

        let n = ConsistencyManager::new(Arc::new(NoopMeter), false)
            .rebuild(&mut store)
            .unwrap();
        assert_eq!(n, 20);
        assert_eq!(store.query(&probe, 5).unwrap(), before);
    }
}
