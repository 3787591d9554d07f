//! Deterministic data for store tests.
//!
//! Everything here is seeded so a failing test reproduces exactly.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roost_store::{RecordFields, UnitMetadata};

const LABELS: &[&str] = &[
    "Erithacus rubecula",
    "Turdus merula",
    "Parus major",
    "Fringilla coelebs",
    "Sylvia atricapilla",
];

/// `n` vectors of `dim` components in `[-1, 1)`, reproducible from `seed`.
pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

/// `n` vectors drawn around `centers` fixed centres, so near neighbours exist.
pub fn clustered_vectors(n: usize, dim: usize, centers: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let hubs = random_vectors(centers.max(1), dim, seed ^ 0x5eed);
    (0..n)
        .map(|i| {
            hubs[i % hubs.len()]
                .iter()
                .map(|c| c + rng.gen_range(-0.05f32..0.05))
                .collect()
        })
        .collect()
}

/// Plausible detection fields for the `i`-th record of a unit.
pub fn record_fields(unit: &str, i: usize) -> RecordFields {
    let base = Utc.with_ymd_and_hms(2024, 4, 2, 5, 0, 0).single().unwrap_or_default();
    let start = base + Duration::seconds(3 * i as i64);
    RecordFields {
        source_file: unit.to_string(),
        segment_start: start,
        segment_end: start + Duration::seconds(3),
        timezone: "Europe/Berlin".into(),
        label: LABELS[i % LABELS.len()].into(),
        local_label: None,
        score: 0.5 + (i % 5) as f64 / 10.0,
    }
}

/// Recorder metadata for the `i`-th unit of a session, ten minutes apart.
pub fn unit_metadata(unit: &str, i: usize) -> UnitMetadata {
    let base = Utc.with_ymd_and_hms(2024, 4, 2, 3, 0, 0).single().unwrap_or_default();
    let start = base + Duration::minutes(10 * i as i64);
    let mut meta = UnitMetadata::new(unit, start, start.naive_utc() + Duration::hours(2), "Europe/Berlin");
    meta.serial = Some("24F319046907D2D6".into());
    meta.gps_lat = Some(49.19);
    meta.gps_lon = Some(16.61);
    meta.sample_rate = Some(48_000);
    meta.channels = Some(1);
    meta.bit_depth = Some(16);
    meta.duration_seconds = Some(600.0);
    meta.battery_voltage = Some(4.1);
    meta.firmware = Some("1.8.1".into());
    meta
}

/// Finite vectors of exactly `dim` components.
pub fn vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, dim)
}

/// Sequences of picks into a small pool, producing plenty of duplicates.
pub fn duplicate_heavy_picks(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..pool.max(1), 1..max_len.max(2))
}
