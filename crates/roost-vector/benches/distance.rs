//! Benchmarks for distance functions and the vector blob codec.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use roost_vector::{cosine_distance, decode_f32_le, encode_f32_le, euclidean_distance};

fn generate_vectors(dims: usize) -> (Vec<f32>, Vec<f32>) {
    let a: Vec<f32> = (0..dims).map(|i| (i as f32) * 0.1).collect();
    let b: Vec<f32> = (0..dims).map(|i| (i as f32) * 0.2 + 0.5).collect();
    (a, b)
}

fn bench_cosine(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine_distance");

    for dims in [128, 512, 1024].iter() {
        let (a, b) = generate_vectors(*dims);
        group.bench_with_input(BenchmarkId::from_parameter(dims), dims, |bencher, _| {
            bencher.iter(|| cosine_distance(black_box(&a), black_box(&b)))
        });
    }

    group.finish();
}

fn bench_euclidean(c: &mut Criterion) {
    let mut group = c.benchmark_group("euclidean_distance");

    for dims in [128, 512, 1024].iter() {
        let (a, b) = generate_vectors(*dims);
        group.bench_with_input(BenchmarkId::from_parameter(dims), dims, |bencher, _| {
            bencher.iter(|| euclidean_distance(black_box(&a), black_box(&b)))
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let (a, _) = generate_vectors(1024);
    let bytes = encode_f32_le(&a);

    c.bench_function("encode_f32_le/1024", |bencher| {
        bencher.iter(|| encode_f32_le(black_box(&a)))
    });
    c.bench_function("decode_f32_le/1024", |bencher| {
        bencher.iter(|| decode_f32_le(black_box(&bytes)))
    });
}

criterion_group!(benches, bench_cosine, bench_euclidean, bench_codec);
criterion_main!(benches);
