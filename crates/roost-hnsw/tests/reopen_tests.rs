//! Reopening a disk index must reproduce the index that was closed,
//! whatever mix of logged and snapshotted inserts it held.

use proptest::prelude::*;
use roost_hnsw::{DiskIndex, DiskIndexConfig};
use roost_vector::VectorId;
use tempfile::TempDir;

const DIM: usize = 6;

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<Vec<f32>>>> {
    let vector = prop::collection::vec(-1.0f32..1.0, DIM);
    prop::collection::vec(prop::collection::vec(vector, 1..12), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_reopen_matches_closed_index(
        batches in batches_strategy(),
        consolidate_every in 0usize..16,
    ) {
        let dir = TempDir::new().unwrap();
        let config = DiskIndexConfig {
            consolidate_every,
            ..Default::default()
        };

        let (mut index, _) = DiskIndex::open(dir.path(), config.clone()).unwrap();
        let mut next: VectorId = 0;
        let mut all = Vec::new();
        for batch in &batches {
            let items: Vec<_> = batch
                .iter()
                .map(|v| {
                    let item = (next, v.clone());
                    next += 1;
                    item
                })
                .collect();
            index.insert_batch(&items).unwrap();
            all.extend(items);
        }

        let probe = &all[all.len() / 2].1;
        let before = index.query(probe, 5).unwrap();
        drop(index);

        let (reopened, report) = DiskIndex::open(dir.path(), config).unwrap();
        prop_assert_eq!(reopened.len(), all.len());
        prop_assert_eq!(report.bytes_truncated, 0);
        prop_assert_eq!(
            report.snapshot_vectors + report.replayed,
            all.len() as u64
        );
        for (id, v) in &all {
            let got = reopened.get(*id);
            prop_assert_eq!(got.as_deref(), Some(v.as_slice()));
        }
        prop_assert_eq!(reopened.query(probe, 5).unwrap(), before);
        prop_assert!(reopened.self_check().is_ok());
    }
}

#[test]
fn test_rebuild_from_matches_incremental_build() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let vectors: Vec<(VectorId, Vec<f32>)> = (0..64)
        .map(|i| {
            let x = i as f32;
            (i, vec![x.sin(), x.cos(), (x * 0.3).sin(), 1.0, 0.5, (x * 0.7).cos()])
        })
        .collect();

    let (mut incremental, _) = DiskIndex::open(dir_a.path(), DiskIndexConfig::default()).unwrap();
    for (id, v) in &vectors {
        incremental.insert(*id, v).unwrap();
    }

    let (mut rebuilt, _) = DiskIndex::open(dir_b.path(), DiskIndexConfig::default()).unwrap();
    rebuilt.insert(0, &[9.0; DIM]).unwrap();
    rebuilt.rebuild_from(vectors.clone()).unwrap();

    assert_eq!(rebuilt.len(), 64);
    for (_, probe) in vectors.iter().step_by(7) {
        assert_eq!(
            rebuilt.query(probe, 4).unwrap(),
            incremental.query(probe, 4).unwrap()
        );
    }
}
