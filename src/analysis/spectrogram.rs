//! Short-time Fourier transform producing a dB power spectrogram.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use super::numeric::{hann_window, power_to_db};

/// Decibel-scaled power grid, one row of `bins` values per analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    bins: usize,
    values: Vec<f32>,
}

impl Spectrogram {
    pub fn frame_count(&self) -> usize {
        if self.bins == 0 {
            0
        } else {
            self.values.len() / self.bins
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frame(&self, time: usize) -> &[f32] {
        &self.values[time * self.bins..(time + 1) * self.bins]
    }

    pub fn get(&self, time: usize, freq: usize) -> f32 {
        self.values[time * self.bins + freq]
    }

    #[cfg(test)]
    pub(crate) fn from_frames(frames: Vec<Vec<f32>>) -> Self {
        let bins = frames.first().map(Vec::len).unwrap_or(0);
        Self {
            bins,
            values: frames.into_iter().flatten().collect(),
        }
    }
}

/// Short-time Fourier transform of `samples`.
///
/// Only full windows are analyzed, so a buffer shorter than `window_size`
/// produces an empty spectrogram. Each frame keeps the `window_size / 2`
/// non-redundant bins, scaled like a one-sided power spectral density and
/// converted to decibels.
pub fn build_spectrogram(
    samples: &[i16],
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
) -> Spectrogram {
    let window_size = window_size.max(2);
    let hop_size = hop_size.max(1);
    let bins = window_size / 2;
    if samples.len() < window_size {
        return Spectrogram {
            bins,
            values: Vec::new(),
        };
    }

    let frames = (samples.len() - window_size) / hop_size + 1;
    let window = hann_window(window_size);
    let window_energy: f32 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sample_rate.max(1) as f32 * window_energy.max(f32::EPSILON));
    let fft: Arc<dyn Fft<f32>> = FftPlanner::<f32>::new().plan_fft_forward(window_size);
    let mut buffer = vec![Complex::new(0.0_f32, 0.0); window_size];
    let mut scratch = vec![Complex::new(0.0_f32, 0.0); fft.get_inplace_scratch_len()];
    let mut values = Vec::with_capacity(frames * bins);

    for frame in 0..frames {
        let start = frame * hop_size;
        fill_windowed(&mut buffer, &samples[start..start + window_size], &window);
        fft.process_with_scratch(&mut buffer, &mut scratch);
        for (bin, c) in buffer[..bins].iter().enumerate() {
            let mut power = (c.re * c.re + c.im * c.im) * scale;
            if bin > 0 {
                power *= 2.0;
            }
            values.push(power_to_db(power));
        }
    }

    Spectrogram { bins, values }
}

fn fill_windowed(target: &mut [Complex<f32>], samples: &[i16], window: &[f32]) {
    for ((cell, &sample), &win) in target.iter_mut().zip(samples).zip(window) {
        *cell = Complex::new(sample as f32 * win, 0.0);
    }
}
