//! Fingerprinting pipeline: STFT spectrogram, peak picking and pair hashing.

pub mod hashing;
pub mod numeric;
pub mod peaks;
pub mod spectrogram;

use std::collections::BTreeSet;

use crate::config::FingerprintSettings;
use hashing::{Fingerprint, generate_hashes};
use peaks::extract_peaks;
use spectrogram::build_spectrogram;

/// Fingerprint a single channel sampled at `settings.sample_rate`.
pub fn fingerprint_channel(samples: &[i16], settings: &FingerprintSettings) -> BTreeSet<Fingerprint> {
    let spec = build_spectrogram(
        samples,
        settings.sample_rate,
        settings.window_size,
        settings.hop_size(),
    );
    let peaks = extract_peaks(&spec, &settings.peak_params());
    let hashes = generate_hashes(&peaks, &settings.hash_params());
    tracing::debug!(
        frames = spec.frame_count(),
        peaks = peaks.len(),
        hashes = hashes.len(),
        "Fingerprinted channel"
    );
    hashes
}

/// Fingerprint every channel and merge the results into one set.
pub fn fingerprint_channels(
    channels: &[Vec<i16>],
    settings: &FingerprintSettings,
) -> BTreeSet<Fingerprint> {
    let mut merged = BTreeSet::new();
    for channel in channels {
        merged.extend(fingerprint_channel(channel, settings));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chirps(sample_rate: u32, seconds: f32) -> Vec<i16> {
        let len = (sample_rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let step = (t * 4.0) as usize;
                let freq = 300.0 + ((step * 7919) % 40) as f32 * 90.0;
                let v = (2.0 * std::f32::consts::PI * freq * t).sin() * 8_000.0
                    + (2.0 * std::f32::consts::PI * (freq * 1.5 + 40.0) * t).sin() * 5_000.0;
                v as i16
            })
            .collect()
    }

    #[test]
    fn fingerprinting_is_deterministic() {
        let settings = FingerprintSettings::default();
        let samples = chirps(settings.sample_rate, 3.0);
        let a = fingerprint_channel(&samples, &settings);
        let b = fingerprint_channel(&samples, &settings);
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn silence_and_empty_buffers_produce_no_hashes() {
        let settings = FingerprintSettings::default();
        assert!(fingerprint_channel(&[], &settings).is_empty());
        assert!(fingerprint_channel(&vec![0; 44_100], &settings).is_empty());
    }

    #[test]
    fn identical_channels_merge_to_single_set() {
        let settings = FingerprintSettings::default();
        let samples = chirps(settings.sample_rate, 2.0);
        let single = fingerprint_channel(&samples, &settings);
        let merged = fingerprint_channels(&[samples.clone(), samples], &settings);
        assert_eq!(single, merged);
    }
}
