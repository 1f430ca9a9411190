//! Small numeric helpers shared by the spectrogram, peak and matching code.

use std::f32::consts::PI;

/// Symmetric Hann window of `length` taps.
pub(crate) fn hann_window(length: usize) -> Vec<f32> {
    if length <= 1 {
        return vec![1.0_f32; length.max(1)];
    }
    let denom = (length - 1) as f32;
    (0..length)
        .map(|n| 0.5_f32 * (1.0 - (2.0 * PI * n as f32 / denom).cos()))
        .collect()
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10_f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// Convert a power value to decibels; silence and invalid input map to 0 dB.
pub(crate) fn power_to_db(power: f32) -> f32 {
    let db = 10.0 * power.log10();
    if db.is_finite() { db } else { 0.0 }
}

/// Sliding maximum over `values` with a window of `radius` cells on each side.
///
/// Edges use the cells that exist, so the output has the same length.
pub(crate) fn sliding_max(values: &[f32], radius: usize, out: &mut Vec<f32>) {
    out.clear();
    out.reserve(values.len());
    for idx in 0..values.len() {
        let start = idx.saturating_sub(radius);
        let end = (idx + radius + 1).min(values.len());
        let max = values[start..end]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        out.push(max);
    }
}
