//! Pairing peaks into SHA-1 landmark digests.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::peaks::Peak;

/// Truncated digest of a peak pair, tagged with the anchor frame.
///
/// Digests are lowercase hex; the same digest legitimately appears at many
/// offsets and across unrelated recordings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub offset: u32,
}

/// Pairing rules for the combinatorial hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Maximum pairs emitted per anchor peak.
    pub fan_out: usize,
    pub min_time_delta: u32,
    pub max_time_delta: u32,
    /// Pairs must differ by strictly more than this many bins.
    pub min_freq_delta: u32,
    /// Hex characters kept from the SHA-1 digest.
    pub digest_hex_len: usize,
}

/// Pair every anchor with up to `fan_out` later peaks inside the target zone.
pub fn generate_hashes(peaks: &[Peak], params: &HashParams) -> BTreeSet<Fingerprint> {
    let mut sorted: Vec<(u32, u32)> = peaks.iter().map(|p| (p.time_bin, p.freq_bin)).collect();
    sorted.sort_unstable();

    let mut hashes = BTreeSet::new();
    for (idx, &(anchor_time, anchor_freq)) in sorted.iter().enumerate() {
        let mut paired = 0usize;
        for &(target_time, target_freq) in &sorted[idx + 1..] {
            if paired >= params.fan_out {
                break;
            }
            let time_delta = target_time - anchor_time;
            if time_delta > params.max_time_delta {
                break;
            }
            if time_delta < params.min_time_delta
                || anchor_freq.abs_diff(target_freq) <= params.min_freq_delta
            {
                continue;
            }
            hashes.insert(Fingerprint {
                digest: pair_digest(anchor_freq, target_freq, time_delta, params.digest_hex_len),
                offset: anchor_time,
            });
            paired += 1;
        }
    }
    hashes
}

/// Hex SHA-1 of `"{freq1}|{freq2}|{time_delta}"`, cut to `hex_len` characters.
pub fn pair_digest(freq1: u32, freq2: u32, time_delta: u32, hex_len: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{freq1}|{freq2}|{time_delta}").as_bytes());
    let mut hex = String::with_capacity(40);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(hex_len.min(hex.len()));
    hex
}
