pub(super) const MAX_WORKER_COUNT: u32 = 64;
pub(super) const MIN_WINDOW_SIZE: usize = 64;
pub(super) const MAX_WINDOW_SIZE: usize = 1 << 16;
pub(super) const MAX_OVERLAP_RATIO: f32 = 0.95;

pub(super) fn clamp_worker_count(value: u32) -> u32 {
    value.min(MAX_WORKER_COUNT)
}

pub(super) fn clamp_window_size(value: usize) -> usize {
    value
        .clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE)
        .next_power_of_two()
        .min(MAX_WINDOW_SIZE)
}

pub(super) fn clamp_overlap_ratio(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, MAX_OVERLAP_RATIO)
    } else {
        default_overlap_ratio()
    }
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_sample_rate() -> u32 {
    44_100
}

pub(super) fn default_window_size() -> usize {
    4_096
}

pub(super) fn default_overlap_ratio() -> f32 {
    0.5
}

pub(super) fn default_fan_out() -> usize {
    15
}

pub(super) fn default_peak_neighborhood() -> usize {
    20
}

pub(super) fn default_amplitude_floor() -> f32 {
    10.0
}

pub(super) fn default_min_time_delta() -> u32 {
    0
}

pub(super) fn default_max_time_delta() -> u32 {
    200
}

pub(super) fn default_min_freq_delta() -> u32 {
    0
}

pub(super) fn default_digest_hex_len() -> usize {
    20
}

pub(super) fn default_top_n() -> usize {
    2
}

pub(super) fn default_min_confidence() -> f32 {
    0.05
}

pub(super) fn default_pool_size() -> usize {
    4
}

pub(super) fn default_batch_size() -> usize {
    1_000
}

pub(super) fn default_checkout_timeout_ms() -> u64 {
    5_000
}

pub(super) fn default_worker_count() -> u32 {
    0
}

pub(super) fn default_job_timeout_secs() -> u64 {
    600
}

pub(super) fn default_extensions() -> Vec<String> {
    ["wav", "mp3", "flac", "ogg"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
