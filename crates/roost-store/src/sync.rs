//! Incremental import of session and aggregate stores into an aggregate.
//!
//! Each source is tracked by a `SourceRegistration` row in the aggregate
//! holding the highest imported record id and a chained checksum over
//! everything imported so far. A pass imports only records above the
//! watermark, one aggregate transaction per source.
//!
//! Sources are keyed by their directory relative to the aggregate, so a tree
//! moved or mounted elsewhere keeps its registrations. A session sharing the
//! aggregate's directory is keyed `.`.

use crate::config::SyncConfig;
use crate::dedup::{dedupe_and_register, DedupOutcome};
use crate::error::{Result, StoreError};
use crate::hierarchy::classify;
use crate::model::{Provenance, SourceRegistration, StoreKind};
use crate::record_store::RecordStore;
use crate::schema::SCHEMA_VERSION;
use crate::store::Store;
use chrono::Utc;
use roost_observe::{obs_count, Meter, NoopMeter, SyncEvt, SyncKind, VizEvent};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-call sync options.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Checked before each source; when set the pass stops cleanly.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SyncOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// A source that could not be imported this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: PathBuf,
    pub message: String,
}

/// Totals for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub sources_scanned: u64,
    pub sources_skipped_unchanged: u64,
    pub sources_imported: u64,
    pub records_imported: u64,
    pub vectors_deduplicated: u64,
    pub vectors_added: u64,
    /// Unit metadata rows new to the aggregate.
    pub units_imported: u64,
    /// Vectors skipped because of a suspected hash collision.
    pub integrity_warnings: u64,
    pub errors: Vec<SourceFailure>,
    /// The pass stopped early on request.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct ImportStats {
    records: u64,
    vectors_added: u64,
    vectors_deduplicated: u64,
    units: u64,
    integrity_warnings: u64,
}

enum SourceOutcome {
    Unchanged,
    Imported(ImportStats),
}

/// SHA-256 chain seeded with the previous checksum.
struct ChecksumChain {
    hasher: Sha256,
}

impl ChecksumChain {
    fn new(previous: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        Self { hasher }
    }

    fn push(&mut self, record_id: i64, content_hash: Option<&str>) {
        self.hasher.update(record_id.to_le_bytes());
        self.hasher.update(content_hash.unwrap_or("-").as_bytes());
        self.hasher.update([0u8]);
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    meter: Arc<dyn Meter>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            meter: Arc::new(NoopMeter),
        }
    }

    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = meter;
        self
    }

    /// Imports new records from every source into `aggregate`.
    pub fn sync(&self, aggregate: &mut Store, sources: &[PathBuf]) -> Result<SyncSummary> {
        self.sync_with(aggregate, sources, &SyncOptions::default())
    }

    /// Like [`sync`](Self::sync), honouring `options`.
    ///
    /// Sources are processed in path order. A failing source is rolled back
    /// and reported in the summary; only store-wide failures abort the pass.
    pub fn sync_with(
        &self,
        aggregate: &mut Store,
        sources: &[PathBuf],
        options: &SyncOptions,
    ) -> Result<SyncSummary> {
        if aggregate.kind() != StoreKind::Aggregate {
            return Err(StoreError::KindMismatch {
                expected: StoreKind::Aggregate.to_string(),
                found: aggregate.kind().to_string(),
            });
        }
        let aggregate_dir = std::fs::canonicalize(aggregate.dir())?;

        let mut ordered = sources.to_vec();
        ordered.sort();
        ordered.dedup();

        self.emit(0, SyncKind::PassStart {
            sources: ordered.len() as u32,
        });
        tracing::info!(
            aggregate = %aggregate_dir.display(),
            sources = ordered.len(),
            "sync pass started"
        );

        let mut summary = SyncSummary::default();
        for (i, source) in ordered.iter().enumerate() {
            let pos = i as u32;
            if options.cancelled() {
                tracing::info!(remaining = ordered.len() - i, "sync cancelled");
                summary.cancelled = true;
                break;
            }
            summary.sources_scanned += 1;

            match self.sync_source(aggregate, &aggregate_dir, source) {
                Ok(SourceOutcome::Unchanged) => {
                    tracing::debug!(source = %source.display(), "source unchanged");
                    summary.sources_skipped_unchanged += 1;
                    self.emit(pos, SyncKind::SourceSkipped);
                }
                Ok(SourceOutcome::Imported(stats)) => {
                    tracing::info!(
                        source = %source.display(),
                        records = stats.records,
                        vectors_added = stats.vectors_added,
                        vectors_deduplicated = stats.vectors_deduplicated,
                        "source imported"
                    );
                    summary.sources_imported += 1;
                    summary.records_imported += stats.records;
                    summary.vectors_added += stats.vectors_added;
                    summary.vectors_deduplicated += stats.vectors_deduplicated;
                    summary.units_imported += stats.units;
                    summary.integrity_warnings += stats.integrity_warnings;
                    obs_count!(self.meter, "sync_records_imported", &[], stats.records);
                    self.emit(pos, SyncKind::SourceImported {
                        records: stats.records,
                        vectors_added: stats.vectors_added,
                        vectors_deduplicated: stats.vectors_deduplicated,
                    });
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(source = %source.display(), error = %e, "source skipped");
                    summary.errors.push(SourceFailure {
                        source: source.clone(),
                        message: e.to_string(),
                    });
                    self.emit(pos, SyncKind::SourceFailed);
                }
                Err(e) => return Err(e),
            }
        }

        self.emit(ordered.len() as u32, SyncKind::PassFinish {
            imported: summary.sources_imported as u32,
            failed: summary.errors.len() as u32,
        });
        tracing::info!(
            scanned = summary.sources_scanned,
            imported = summary.sources_imported,
            skipped = summary.sources_skipped_unchanged,
            records = summary.records_imported,
            errors = summary.errors.len(),
            "sync pass finished"
        );
        Ok(summary)
    }

    fn sync_source(
        &self,
        aggregate: &mut Store,
        aggregate_dir: &Path,
        source: &Path,
    ) -> Result<SourceOutcome> {
        let source_dir = std::fs::canonicalize(source)
            .map_err(|e| StoreError::source_unavailable(source, e))?;

        // The aggregate's own directory is a source only through a session beside it
        let kind = if source_dir == aggregate_dir {
            if !source_dir.join(StoreKind::Session.db_file()).is_file() {
                return Err(StoreError::source_unavailable(
                    &source_dir,
                    "source is the aggregate being built",
                ));
            }
            StoreKind::Session
        } else {
            classify(&source_dir)
                .store_kind()
                .ok_or_else(|| StoreError::source_unavailable(&source_dir, "not a store directory"))?
        };
        let key = source_key(aggregate_dir, &source_dir);

        let src = RecordStore::open_read_only(source_dir.join(kind.db_file()))
            .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;
        let version = src
            .schema_version()
            .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;
        if version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        let registration = aggregate.records().source_registration(&key)?;
        let (watermark, previous_checksum, imported_before, units_seen) = match &registration {
            Some(reg) => (
                reg.high_watermark,
                reg.content_checksum.clone(),
                reg.records_imported,
                reg.units_seen,
            ),
            None => (0, String::new(), 0, 0),
        };
        let source_units = src
            .unit_count()
            .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;

        // Nothing above the watermark leaves the chained checksum unchanged
        let pending = src
            .records_with_hash_after(watermark, 1)
            .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;
        if pending.is_empty() && source_units == units_seen {
            return Ok(SourceOutcome::Unchanged);
        }

        let page_size = self.config.page_size;
        aggregate.write(|txn| {
            let mut stats = ImportStats::default();
            let mut chain = ChecksumChain::new(&previous_checksum);
            let mut cursor = watermark;

            loop {
                let page = src
                    .records_with_hash_after(cursor, page_size)
                    .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;
                if page.is_empty() {
                    break;
                }

                for (record, hash) in page {
                    cursor = record.id;
                    chain.push(record.id, hash.as_deref());

                    let vector_id = match record.vector_id {
                        None => None,
                        Some(vid) => {
                            let stored = src
                                .vector(vid)
                                .map_err(|e| StoreError::source_unavailable(&source_dir, e))?
                                .ok_or_else(|| {
                                    StoreError::source_unavailable(
                                        &source_dir,
                                        format!("record {} references missing vector {}", record.id, vid),
                                    )
                                })?;
                            match dedupe_and_register(txn, &stored.vector) {
                                Ok(DedupOutcome::Added(id)) => {
                                    stats.vectors_added += 1;
                                    Some(id)
                                }
                                Ok(DedupOutcome::Existing(id)) => {
                                    stats.vectors_deduplicated += 1;
                                    Some(id)
                                }
                                Err(StoreError::HashCollisionSuspected { .. }) => {
                                    stats.integrity_warnings += 1;
                                    None
                                }
                                Err(StoreError::Vector(e)) => {
                                    return Err(StoreError::source_unavailable(
                                        &source_dir,
                                        format!("record {}: {e}", record.id),
                                    ))
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    };

                    let provenance = Provenance {
                        source_path: key.clone(),
                        source_record_id: record.id,
                    };
                    txn.register_record(&record.fields, vector_id, Some(&provenance))?;
                    stats.records += 1;
                }
            }

            if source_units != units_seen {
                let units = src
                    .units()
                    .map_err(|e| StoreError::source_unavailable(&source_dir, e))?;
                for unit in &units {
                    let origin = nested_key(&key, unit.source_path.as_deref());
                    txn.register_unit(&unit.metadata, Some(&origin))?;
                }
                stats.units = source_units.saturating_sub(units_seen);
            }

            let content_checksum = if stats.records > 0 {
                chain.finish()
            } else {
                previous_checksum.clone()
            };
            txn.upsert_source_registration(&SourceRegistration {
                source_path: key.clone(),
                high_watermark: cursor,
                content_checksum,
                records_imported: imported_before + stats.records,
                units_seen: source_units,
                last_synced_at: Utc::now(),
            })?;
            Ok(SourceOutcome::Imported(stats))
        })
    }

    fn emit(&self, source: u32, kind: SyncKind) {
        self.meter.emit(VizEvent::Sync(SyncEvt { source, kind }));
    }
}

/// Registration key of `source_dir`: relative to the aggregate when inside
/// it, `.` for the aggregate's own directory, absolute otherwise.
fn source_key(aggregate_dir: &Path, source_dir: &Path) -> PathBuf {
    match source_dir.strip_prefix(aggregate_dir) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => source_dir.to_path_buf(),
    }
}

/// Key, relative to this aggregate, of a row a source itself synced from
/// `inner` (`None` when the source ingested it).
fn nested_key(outer: &Path, inner: Option<&Path>) -> PathBuf {
    let here = Path::new(".");
    match inner {
        None => outer.to_path_buf(),
        Some(inner) if inner.is_absolute() => inner.to_path_buf(),
        Some(inner) if inner == here => outer.to_path_buf(),
        Some(inner) if outer == here => inner.to_path_buf(),
        Some(inner) => outer.join(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keys() {
        let agg = Path::new("/mnt/card/2024");
        assert_eq!(source_key(agg, agg), PathBuf::from("."));
        assert_eq!(source_key(agg, &agg.join("site1/a")), PathBuf::from("site1/a"));
        assert_eq!(
            source_key(agg, Path::new("/mnt/other")),
            PathBuf::from("/mnt/other")
        );

        assert_eq!(nested_key(Path::new("M"), None), PathBuf::from("M"));
        assert_eq!(nested_key(Path::new("M"), Some(Path::new("A"))), PathBuf::from("M/A"));
        assert_eq!(nested_key(Path::new("M"), Some(Path::new("."))), PathBuf::from("M"));
        assert_eq!(nested_key(Path::new("."), Some(Path::new("A"))), PathBuf::from("A"));
        assert_eq!(
            nested_key(Path::new("M"), Some(Path::new("/mnt/other"))),
            PathBuf::from("/mnt/other")
        );
    }

    #[test]
    fn test_checksum_chain_depends_on_history() {
        let mut a = ChecksumChain::new("");
        a.push(1, Some("h1"));
        let first = a.finish();

        let mut b = ChecksumChain::new("");
        b.push(1, Some("h1"));
        assert_eq!(b.finish(), first);

        let mut c = ChecksumChain::new("other");
        c.push(1, Some("h1"));
        assert_ne!(c.finish(), first);

        let mut d = ChecksumChain::new("");
        d.push(1, None);
        assert_ne!(d.finish(), first);
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let options = SyncOptions {
            cancel: Some(flag.clone()),
        };
        assert!(!options.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(options.cancelled());
        assert!(!SyncOptions::default().cancelled());
    }
}
