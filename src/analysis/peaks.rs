//! Local-maximum detection over the spectrogram.

use std::collections::VecDeque;

use super::numeric::sliding_max;
use super::spectrogram::Spectrogram;

/// A constellation point: a local maximum of the spectrogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub freq_bin: u32,
    pub time_bin: u32,
    pub magnitude: f32,
}

/// Local-maximum filter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParams {
    /// Full neighborhood span along the frequency axis, in bins.
    pub freq_neighborhood: usize,
    /// Full neighborhood span along the time axis, in frames.
    pub time_neighborhood: usize,
    /// Values at or below this level never become peaks.
    pub amplitude_floor: f32,
}

impl PeakParams {
    fn freq_radius(&self) -> usize {
        (self.freq_neighborhood / 2).max(1)
    }

    fn time_radius(&self) -> usize {
        (self.time_neighborhood / 2).max(1)
    }
}

/// Find the peaks of `spec`, in time order (then frequency order).
///
/// A cell qualifies when it exceeds the floor and no cell in its rectangular
/// neighborhood is larger. Equal-valued qualifying cells that fall inside each
/// other's neighborhoods form a plateau and are reported once, at the member
/// with the lowest time bin, then the lowest frequency bin.
pub fn extract_peaks(spec: &Spectrogram, params: &PeakParams) -> Vec<Peak> {
    let frames = spec.frame_count();
    let bins = spec.bin_count();
    if frames == 0 || bins == 0 {
        return Vec::new();
    }
    let freq_radius = params.freq_radius();
    let time_radius = params.time_radius();
    let neighborhood_max = neighborhood_max(spec, freq_radius, time_radius);
    let is_candidate = |t: usize, f: usize| {
        let value = spec.get(t, f);
        value > params.amplitude_floor && value >= neighborhood_max[t * bins + f]
    };

    let mut claimed = vec![false; frames * bins];
    let mut peaks = Vec::new();
    let mut queue = VecDeque::new();
    for t in 0..frames {
        for f in 0..bins {
            if claimed[t * bins + f] || !is_candidate(t, f) {
                continue;
            }
            let value = spec.get(t, f);
            peaks.push(Peak {
                freq_bin: f as u32,
                time_bin: t as u32,
                magnitude: value,
            });
            claimed[t * bins + f] = true;
            queue.push_back((t, f));
            // Claim the rest of the plateau so it is not reported again.
            while let Some((ct, cf)) = queue.pop_front() {
                let t_end = (ct + time_radius + 1).min(frames);
                let f_end = (cf + freq_radius + 1).min(bins);
                for nt in ct.saturating_sub(time_radius)..t_end {
                    for nf in cf.saturating_sub(freq_radius)..f_end {
                        let idx = nt * bins + nf;
                        if !claimed[idx] && spec.get(nt, nf) == value && is_candidate(nt, nf) {
                            claimed[idx] = true;
                            queue.push_back((nt, nf));
                        }
                    }
                }
            }
        }
    }
    peaks
}

/// Separable rectangular maximum filter: frequency pass, then time pass.
fn neighborhood_max(spec: &Spectrogram, freq_radius: usize, time_radius: usize) -> Vec<f32> {
    let frames = spec.frame_count();
    let bins = spec.bin_count();
    let mut by_freq = Vec::with_capacity(frames * bins);
    let mut row = Vec::with_capacity(bins);
    for t in 0..frames {
        sliding_max(spec.frame(t), freq_radius, &mut row);
        by_freq.extend_from_slice(&row);
    }

    let mut result = vec![0.0_f32; frames * bins];
    let mut column = Vec::with_capacity(frames);
    let mut filtered = Vec::with_capacity(frames);
    for f in 0..bins {
        column.clear();
        column.extend((0..frames).map(|t| by_freq[t * bins + f]));
        sliding_max(&column, time_radius, &mut filtered);
        for (t, value) in filtered.iter().enumerate() {
            result[t * bins + f] = *value;
        }
    }
    result
}
