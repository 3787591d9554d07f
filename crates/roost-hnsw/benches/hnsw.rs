//! HNSW benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use roost_hnsw::{DiskIndex, DiskIndexConfig, HnswConfig, HnswIndex};
use roost_vector::{DistanceFunction, VectorIndex};
use tempfile::TempDir;

fn generate_vectors(n: usize, dims: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| {
            (0..dims)
                .map(|j| (((i + 1) * (j + 7)) % 101) as f32 / 101.0 - 0.5)
                .collect()
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_insert");

    for n in [100, 1000].iter() {
        let vectors = generate_vectors(*n, 128);
        let config = HnswConfig::default();

        group.bench_with_input(BenchmarkId::from_parameter(n), n, |bencher, _| {
            bencher.iter(|| {
                let index = HnswIndex::new(128, DistanceFunction::Cosine, config.clone());
                for (i, vec) in vectors.iter().enumerate() {
                    index.insert(i as u64, black_box(vec)).unwrap();
                }
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");

    for n in [1000, 10000].iter() {
        let vectors = generate_vectors(*n, 128);
        let index = HnswIndex::new(128, DistanceFunction::Cosine, HnswConfig::default());

        for (i, vec) in vectors.iter().enumerate() {
            index.insert(i as u64, vec).unwrap();
        }

        let query: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), n, |bencher, _| {
            bencher.iter(|| index.search(black_box(&query), 10).unwrap())
        });
    }

    group.finish();
}

fn bench_disk_append(c: &mut Criterion) {
    let vectors = generate_vectors(256, 128);

    c.bench_function("disk_index_append_batch/256", |bencher| {
        bencher.iter(|| {
            let dir = TempDir::new().unwrap();
            let config = DiskIndexConfig {
                consolidate_every: 0,
                ..Default::default()
            };
            let (mut disk, _) = DiskIndex::open(dir.path(), config).unwrap();
            let batch: Vec<(u64, Vec<f32>)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u64, v.clone()))
                .collect();
            disk.insert_batch(black_box(&batch)).unwrap();
        })
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_disk_append);
criterion_main!(benches);
