//! Classifier-facing writes into a session store.
//!
//! One input unit (typically a recording) is one transaction: its metadata,
//! records, their vectors and its `completed` status commit together or not
//! at all.

use crate::dedup::{dedupe_and_register, DedupOutcome};
use crate::error::{Result, StoreError};
use crate::model::{RecordFields, UnitMetadata};
use crate::store::Store;
use roost_observe::obs_count;
use std::collections::HashSet;

/// Counts for one ingested unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub records: u64,
    pub vectors_added: u64,
    pub vectors_deduplicated: u64,
    /// Vectors dropped on a suspected hash collision; their records are kept.
    pub integrity_warnings: u64,
}

pub struct Ingestor;

impl Ingestor {
    /// Writes the classifier output for `unit`.
    ///
    /// The unit is marked `processing` first, so a crash leaves it visible
    /// as unfinished. On failure nothing from the unit is kept and it is
    /// marked `failed`.
    pub fn ingest_unit(
        store: &mut Store,
        unit: &str,
        items: Vec<(RecordFields, Option<Vec<f32>>)>,
    ) -> Result<IngestReport> {
        Self::ingest(store, unit, None, items)
    }

    /// Like [`ingest_unit`](Self::ingest_unit), registering the recording's
    /// metadata in the same transaction.
    pub fn ingest_recording(
        store: &mut Store,
        metadata: &UnitMetadata,
        items: Vec<(RecordFields, Option<Vec<f32>>)>,
    ) -> Result<IngestReport> {
        Self::ingest(store, &metadata.unit, Some(metadata), items)
    }

    fn ingest(
        store: &mut Store,
        unit: &str,
        metadata: Option<&UnitMetadata>,
        items: Vec<(RecordFields, Option<Vec<f32>>)>,
    ) -> Result<IngestReport> {
        store.records_mut().mark_processing(unit)?;

        let result = store.write(|txn| {
            if let Some(metadata) = metadata {
                txn.register_unit(metadata, None)?;
            }
            let mut report = IngestReport::default();
            for (fields, vector) in &items {
                let vector_id = match vector {
                    None => None,
                    Some(v) => match dedupe_and_register(txn, v) {
                        Ok(DedupOutcome::Added(id)) => {
                            report.vectors_added += 1;
                            Some(id)
                        }
                        Ok(DedupOutcome::Existing(id)) => {
                            report.vectors_deduplicated += 1;
                            Some(id)
                        }
                        Err(StoreError::HashCollisionSuspected { .. }) => {
                            report.integrity_warnings += 1;
                            None
                        }
                        Err(e) => return Err(e),
                    },
                };
                txn.register_record(fields, vector_id, None)?;
                report.records += 1;
            }
            txn.mark_completed(unit)?;
            Ok(report)
        });

        match result {
            Ok(report) => {
                obs_count!(store.meter(), "ingest_records", &[], report.records);
                tracing::debug!(
                    unit,
                    records = report.records,
                    vectors_added = report.vectors_added,
                    "unit ingested"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(unit, error = %e, "unit failed");
                if let Err(mark) = store.records_mut().mark_failed(unit, &e.to_string()) {
                    tracing::warn!(unit, error = %mark, "could not record unit failure");
                }
                Err(e)
            }
        }
    }

    /// `units` minus the ones already completed, order preserved.
    pub fn pending_units<'a>(store: &Store, units: &'a [String]) -> Result<Vec<&'a str>> {
        let done: HashSet<String> = store.records().completed_units()?.into_iter().collect();
        Ok(units
            .iter()
            .filter(|u| !done.contains(u.as_str()))
            .map(String::as_str)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoostConfig;
    use crate::model::{StoreKind, UnitStatus};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn fields(label: &str) -> RecordFields {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 4, 30, 0).unwrap();
        RecordFields {
            source_file: "dawn.wav".into(),
            segment_start: t,
            segment_end: t + chrono::Duration::seconds(3),
            timezone: "Europe/Berlin".into(),
            label: label.into(),
            local_label: None,
            score: 0.8,
        }
    }

    #[test]
    fn test_ingest_dedupes_within_unit() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path(), StoreKind::Session, &RoostConfig::default()).unwrap();

        let report = Ingestor::ingest_unit(
            &mut store,
            "dawn.wav",
            vec![
                (fields("Erithacus rubecula"), Some(vec![0.1, 0.9])),
                (fields("Erithacus rubecula"), Some(vec![0.1, 0.9])),
                (fields("Turdus merula"), Some(vec![0.7, 0.2])),
                (fields("noise"), None),
            ],
        )
        .unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.vectors_added, 2);
        assert_eq!(report.vectors_deduplicated, 1);
        assert_eq!(store.records().vector_count().unwrap(), 2);
        assert_eq!(store.index_len(), Some(2));

        let progress = store.records().unit_progress("dawn.wav").unwrap().unwrap();
        assert_eq!(progress.status, UnitStatus::Completed);
    }

    #[test]
    fn test_failed_unit_keeps_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path(), StoreKind::Session, &RoostConfig::default()).unwrap();

        let err = Ingestor::ingest_unit(
            &mut store,
            "broken.wav",
            vec![
                (fields("a"), Some(vec![0.1, 0.9])),
                (fields("b"), Some(vec![f32::NAN, 0.0])),
            ],
        );
        assert!(err.is_err());
        assert_eq!(store.records().record_count().unwrap(), 0);
        assert_eq!(store.records().vector_count().unwrap(), 0);

        let progress = store.records().unit_progress("broken.wav").unwrap().unwrap();
        assert_eq!(progress.status, UnitStatus::Failed);
        assert!(progress.error_message.is_some());
    }

    #[test]
    fn test_recording_metadata_commits_with_records() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path(), StoreKind::Session, &RoostConfig::default()).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 2, 30, 0).unwrap();
        let mut meta = UnitMetadata::new("dawn.wav", t, t.naive_utc() + chrono::Duration::hours(2), "Europe/Berlin");
        meta.battery_voltage = Some(4.2);

        Ingestor::ingest_recording(&mut store, &meta, vec![(fields("x"), Some(vec![0.3, 0.4]))])
            .unwrap();
        assert_eq!(store.records().unit("dawn.wav").unwrap(), Some(meta.clone()));
        assert_eq!(
            store.records().unit_progress("dawn.wav").unwrap().unwrap().status,
            UnitStatus::Completed
        );

        let mut broken = meta.clone();
        broken.unit = "broken.wav".into();
        assert!(Ingestor::ingest_recording(
            &mut store,
            &broken,
            vec![(fields("y"), Some(vec![f32::INFINITY, 0.0]))]
        )
        .is_err());
        assert!(store.records().unit("broken.wav").unwrap().is_none());
        assert_eq!(store.records().unit_count().unwrap(), 1);
    }

    #[test]
    fn test_pending_units_skips_completed() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path(), StoreKind::Session, &RoostConfig::default()).unwrap();
        Ingestor::ingest_unit(&mut store, "b.wav", vec![(fields("x"), None)]).unwrap();

        let units = vec!["a.wav".to_string(), "b.wav".to_string(), "c.wav".to_string()];
        assert_eq!(
            Ingestor::pending_units(&store, &units).unwrap(),
            vec!["a.wav", "c.wav"]
        );
    }
}
