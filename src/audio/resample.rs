/// Linear-interpolation resampler for `i16` channels.
///
/// Good enough to line a stray file up with the fingerprint sample rate; no
/// anti-aliasing is applied.
pub(crate) fn resample_linear(samples: &[i16], input_rate: u32, output_rate: u32) -> Vec<i16> {
    let input_rate = input_rate.max(1);
    let output_rate = output_rate.max(1);
    if samples.is_empty() || input_rate == output_rate {
        return samples.to_vec();
    }
    let duration_seconds = samples.len() as f64 / input_rate as f64;
    let out_len = (duration_seconds * output_rate as f64).round().max(1.0) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * input_rate as f64 / output_rate as f64;
            lerp_sample(samples, pos)
        })
        .collect()
}

fn lerp_sample(samples: &[i16], pos: f64) -> i16 {
    let idx0 = (pos.floor().max(0.0) as usize).min(samples.len() - 1);
    let frac = (pos - idx0 as f64).clamp(0.0, 1.0);
    let idx1 = idx0.saturating_add(1).min(samples.len() - 1);
    let a = samples[idx0] as f64;
    let b = samples[idx1] as f64;
    (a + (b - a) * frac)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsampling_interpolates_between_samples() {
        let out = resample_linear(&[0, 1_000], 1, 2);
        assert_eq!(out, vec![0, 500, 1_000, 1_000]);
    }

    #[test]
    fn matching_rates_and_empty_input_pass_through() {
        assert_eq!(resample_linear(&[3, 4, 5], 44_100, 44_100), vec![3, 4, 5]);
        assert!(resample_linear(&[], 22_050, 44_100).is_empty());
    }

    #[test]
    fn downsampling_halves_length() {
        let input: Vec<i16> = (0..100).collect();
        let out = resample_linear(&input, 48_000, 24_000);
        assert_eq!(out.len(), 50);
        assert_eq!(out[10], 20);
    }
}
