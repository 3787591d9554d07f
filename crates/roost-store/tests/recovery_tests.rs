//! Index recovery and store-level invariants.
//!
//! The record database is authoritative; every test here damages or
//! desynchronises the derived index and checks that reopening the store
//! brings it back to agreement.

use roost_store::{
    ConsistencyOutcome, IndexState, Ingestor, RoostConfig, Store, StoreError, StoreKind,
};
use roost_testkit::generators::{clustered_vectors, random_vectors, record_fields};
use roost_testkit::IndexFault;
use roost_vector::VectorMatch;
use std::path::Path;
use tempfile::TempDir;

fn fill(dir: &Path, config: &RoostConfig, vectors: &[Vec<f32>]) -> Store {
    let mut store = Store::open(dir, StoreKind::Session, config).unwrap();
    let items = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (record_fields("fill.wav", i), Some(v.clone())))
        .collect();
    Ingestor::ingest_unit(&mut store, "fill.wav", items).unwrap();
    store
}

fn probe_results(store: &Store, probes: &[Vec<f32>]) -> Vec<Vec<VectorMatch>> {
    probes.iter().map(|p| store.query(p, 5).unwrap()).collect()
}

fn no_auto_rebuild() -> RoostConfig {
    let mut config = RoostConfig::default();
    config.store.auto_rebuild = false;
    config
}

// ============================================================================
// Contiguity and dedup
// ============================================================================

#[test]
fn test_vector_ids_stay_contiguous_across_units() {
    let tmp = TempDir::new().unwrap();
    let pool = random_vectors(6, 4, 3);
    let mut store = Store::open(tmp.path(), StoreKind::Session, &RoostConfig::default()).unwrap();

    for unit in 0..5 {
        let name = format!("u{unit}.wav");
        let items = (0..8)
            .map(|i| (record_fields(&name, i), Some(pool[(unit * 3 + i) % pool.len()].clone())))
            .collect();
        Ingestor::ingest_unit(&mut store, &name, items).unwrap();
    }

    let n = store.records().vector_count().unwrap();
    assert_eq!(n, 6);
    let ids: Vec<_> = store
        .records()
        .vectors_from(0, 100)
        .unwrap()
        .into_iter()
        .map(|v| v.vector_id)
        .collect();
    assert_eq!(ids, (0..n).collect::<Vec<_>>());
    assert_eq!(store.index_len(), Some(n as usize));
    assert_eq!(store.records().record_count().unwrap(), 40);
}

// ============================================================================
// Crash between commit and index apply
// ============================================================================

#[test]
fn test_torn_log_tail_is_caught_up() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let index_dir = fill(tmp.path(), &config, &random_vectors(30, 8, 1)).index_dir();

    IndexFault::TruncateLog(3).inject(&index_dir).unwrap();

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::CaughtUp { missing: 1 });
    assert_eq!(store.index_len(), Some(30));
}

#[test]
fn test_lost_log_is_caught_up() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let index_dir = fill(tmp.path(), &config, &random_vectors(12, 8, 2)).index_dir();

    IndexFault::ClearLog.inject(&index_dir).unwrap();

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::CaughtUp { missing: 12 });
    assert_eq!(store.index_len(), Some(12));
}

#[test]
fn test_garbage_log_tail_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let index_dir = fill(tmp.path(), &config, &random_vectors(5, 8, 4)).index_dir();

    IndexFault::GarbageLogTail.inject(&index_dir).unwrap();

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::Healthy);
    assert_eq!(store.index_len(), Some(5));
}

#[test]
fn test_missing_index_is_regenerated() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let index_dir = fill(tmp.path(), &config, &random_vectors(9, 4, 5)).index_dir();

    IndexFault::DropIndex.inject(&index_dir).unwrap();

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::CaughtUp { missing: 9 });
    assert_eq!(store.index_len(), Some(9));
}

// ============================================================================
// Corruption and rebuild
// ============================================================================

#[test]
fn test_rebuild_reproduces_probe_results() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let vectors = clustered_vectors(200, 16, 8, 21);
    let probes = random_vectors(10, 16, 22);

    let mut store = fill(tmp.path(), &config, &vectors);
    store.consolidate_index().unwrap();
    let expected = probe_results(&store, &probes);
    let index_dir = store.index_dir();
    drop(store);

    IndexFault::FlipSnapshotByte.inject(&index_dir).unwrap();

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::Rebuilt { vectors: 200 });
    assert_eq!(probe_results(&store, &probes), expected);
}

#[test]
fn test_corrupt_index_refuses_queries_but_accepts_writes() {
    let tmp = TempDir::new().unwrap();
    let config = no_auto_rebuild();
    let vectors = random_vectors(20, 8, 31);
    let probes = random_vectors(4, 8, 32);

    let mut store = fill(tmp.path(), &config, &vectors);
    store.consolidate_index().unwrap();
    let index_dir = store.index_dir();
    drop(store);
    IndexFault::FlipSnapshotByte.inject(&index_dir).unwrap();

    let mut store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert!(matches!(store.open_outcome(), ConsistencyOutcome::Corrupt { .. }));
    assert!(!store.index_state().is_ready());
    assert!(matches!(
        store.query(&probes[0], 3),
        Err(StoreError::IndexCorrupt { .. })
    ));

    let extra = random_vectors(3, 8, 33);
    let items = extra
        .iter()
        .enumerate()
        .map(|(i, v)| (record_fields("late.wav", i), Some(v.clone())))
        .collect();
    Ingestor::ingest_unit(&mut store, "late.wav", items).unwrap();
    assert_eq!(store.records().vector_count().unwrap(), 23);

    store.rebuild_index().unwrap();
    assert!(matches!(store.index_state(), IndexState::Ready(_)));
    assert_eq!(store.index_len(), Some(23));
    let hits = store.query(&extra[1], 1).unwrap();
    assert_eq!(hits[0].id, 21);
}

#[test]
fn test_index_ahead_of_records_is_rebuilt() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let store = fill(tmp.path(), &config, &random_vectors(6, 4, 41));
    let db = store.records().path().to_path_buf();
    drop(store);

    // Lose the newest vector from the database but not from the index
    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute("DELETE FROM records WHERE vector_id = 5", []).unwrap();
    conn.execute("DELETE FROM vectors WHERE vector_id = 5", []).unwrap();
    drop(conn);

    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::Rebuilt { vectors: 5 });
    assert_eq!(store.index_len(), Some(5));
}

// ============================================================================
// Read-only access and locking
// ============================================================================

#[test]
fn test_read_only_open_never_repairs() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let index_dir = fill(tmp.path(), &config, &random_vectors(7, 4, 51)).index_dir();
    IndexFault::ClearLog.inject(&index_dir).unwrap();

    let ro = Store::open_read_only(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(ro.open_outcome(), &ConsistencyOutcome::Healthy);
    assert_eq!(ro.index_len(), Some(0));
    drop(ro);

    // The writer open still sees the gap
    let store = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(store.open_outcome(), &ConsistencyOutcome::CaughtUp { missing: 7 });
}

#[test]
fn test_writer_lock_is_exclusive() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let first = Store::open(tmp.path(), StoreKind::Session, &config).unwrap();

    let err = Store::open(tmp.path(), StoreKind::Session, &config).unwrap_err();
    assert!(matches!(err, StoreError::Locked { .. }));
    assert!(err.is_recoverable());

    drop(first);
    assert!(Store::open(tmp.path(), StoreKind::Session, &config).is_ok());
}

#[test]
fn test_unknown_schema_version_opens_read_only() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    let db = fill(tmp.path(), &config, &random_vectors(3, 4, 61))
        .records()
        .path()
        .to_path_buf();

    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute(
        "UPDATE store_metadata SET value = '99' WHERE key = 'schema_version'",
        [],
    )
    .unwrap();
    drop(conn);

    assert!(matches!(
        Store::open(tmp.path(), StoreKind::Session, &config),
        Err(StoreError::SchemaVersionMismatch { found: 99, expected: 1 })
    ));

    let ro = Store::open_read_only(tmp.path(), StoreKind::Session, &config).unwrap();
    assert_eq!(ro.records().record_count().unwrap(), 3);
    assert_eq!(ro.records().schema_version().unwrap(), 99);
}

#[test]
fn test_kind_mismatch_is_refused() {
    let tmp = TempDir::new().unwrap();
    let config = RoostConfig::default();
    drop(Store::open(tmp.path(), StoreKind::Session, &config).unwrap());

    let db = tmp.path().join(StoreKind::Session.db_file());
    assert!(matches!(
        roost_store::RecordStore::open(&db, StoreKind::Aggregate),
        Err(StoreError::KindMismatch { .. })
    ));
}
