use std::f32::consts::PI;
use std::path::Path;

use rand::{Rng, SeedableRng, rngs::StdRng};

pub const TEST_SAMPLE_RATE: u32 = 8_000;

/// Write 16-bit PCM channels (all the same length) as one interleaved WAV.
pub fn write_test_wav(path: &Path, sample_rate: u32, channels: &[Vec<i16>]) {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel[frame]).expect("write wav sample");
        }
    }
    writer.finalize().expect("finalize wav");
}

/// Deterministic "music": a new chord of two or three tones every quarter
/// second over light noise.
pub fn synthetic_track(seed: u64, seconds: f32, sample_rate: u32) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (seconds * sample_rate as f32) as usize;
    let segment = (sample_rate / 4) as usize;
    let mut samples = Vec::with_capacity(len);
    let mut chord: Vec<f32> = Vec::new();
    for i in 0..len {
        if i % segment == 0 {
            let voices = rng.random_range(2..=3);
            chord = (0..voices)
                .map(|_| 300.0 + rng.random_range(0..24) as f32 * 140.0)
                .collect();
        }
        let t = i as f32 / sample_rate as f32;
        let tone: f32 = chord
            .iter()
            .map(|freq| (2.0 * PI * freq * t).sin() * 5_000.0)
            .sum();
        let noise = rng.random_range(-150.0..150.0_f32);
        samples.push((tone + noise).clamp(i16::MIN as f32, i16::MAX as f32) as i16);
    }
    samples
}
