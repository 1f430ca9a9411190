use std::collections::BTreeSet;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tempfile::tempdir;
use tracksleuth::analysis::{fingerprint_channel, hashing::Fingerprint};
use tracksleuth::config::{FingerprintSettings, IndexSettings};
use tracksleuth::index::{FingerprintIndex, SqliteIndex};

const SECONDS: f32 = 10.0;

fn synthetic_channel(settings: &FingerprintSettings, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    let sample_rate = settings.sample_rate as f32;
    let len = (SECONDS * sample_rate) as usize;
    let segment = (settings.sample_rate / 4) as usize;
    let mut freqs = [440.0_f32; 3];
    (0..len)
        .map(|i| {
            if i % segment == 0 {
                for freq in &mut freqs {
                    *freq = 200.0 + rng.random_range(0..60) as f32 * 80.0;
                }
            }
            let t = i as f32 / sample_rate;
            let value: f32 = freqs
                .iter()
                .map(|freq| (2.0 * std::f32::consts::PI * freq * t).sin() * 6_000.0)
                .sum();
            value as i16
        })
        .collect()
}

fn bench_fingerprint_channel(c: &mut Criterion) {
    let settings = FingerprintSettings::default();
    let samples = synthetic_channel(&settings, 1);
    c.bench_with_input(
        BenchmarkId::new("fingerprint_channel", SECONDS as u32),
        &samples,
        |b, samples| {
            b.iter(|| fingerprint_channel(black_box(samples), &settings));
        },
    );
}

fn bench_index_lookup(c: &mut Criterion) {
    let settings = FingerprintSettings::default();
    let dir = tempdir().expect("tempdir");
    let index = SqliteIndex::open(&dir.path().join("bench.db"), &IndexSettings::default())
        .expect("index open");
    for seed in 0..4 {
        let hashes = fingerprint_channel(&synthetic_channel(&settings, seed), &settings);
        let audio_id = index
            .insert_audio(&format!("track-{seed}"), &format!("{seed:040x}"), hashes.len() as u64)
            .expect("insert audio");
        index.insert_hashes(&audio_id, &hashes).expect("insert hashes");
        index.set_audio_fingerprinted(&audio_id).expect("mark fingerprinted");
    }
    let query: BTreeSet<Fingerprint> =
        fingerprint_channel(&synthetic_channel(&settings, 2), &settings);
    c.bench_with_input(
        BenchmarkId::new("index_lookup", query.len()),
        &query,
        |b, query| {
            b.iter(|| index.lookup(black_box(query)).expect("lookup"));
        },
    );
}

criterion_group!(benches, bench_fingerprint_channel, bench_index_lookup);
criterion_main!(benches);
