//! Audio file ingestion: decoding to per-channel `i16` buffers and content hashing.

mod decode;
mod resample;

use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

pub use decode::DecodeError;

const HASH_BLOCK_SIZE: usize = 1 << 20;

/// Decoded channels at the requested sample rate plus the file's SHA-1.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<i16>>,
    pub sample_rate: u32,
    pub content_hash: String,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f32 {
        let frames = self.channels.first().map(Vec::len).unwrap_or(0);
        frames as f32 / self.sample_rate.max(1) as f32
    }
}

/// Decode `path` into channels at `target_rate`, limited to `limit_seconds`.
pub fn read(
    path: &Path,
    limit_seconds: Option<f32>,
    target_rate: u32,
) -> Result<DecodedAudio, DecodeError> {
    let content_hash = content_hash(path)?;
    Ok(DecodedAudio {
        channels: read_channels(path, limit_seconds, target_rate)?,
        sample_rate: target_rate,
        content_hash,
    })
}

/// Decode `path` without hashing it.
///
/// Files stored at another rate are resampled linearly; expect weaker matches
/// for those.
pub fn read_channels(
    path: &Path,
    limit_seconds: Option<f32>,
    target_rate: u32,
) -> Result<Vec<Vec<i16>>, DecodeError> {
    let raw = decode::decode_file(path, limit_seconds)?;
    let channels = raw.deinterleave();
    if raw.sample_rate == target_rate {
        return Ok(channels);
    }
    tracing::warn!(
        "Resampling {} from {} Hz to {} Hz",
        path.display(),
        raw.sample_rate,
        target_rate
    );
    Ok(channels
        .iter()
        .map(|channel| resample::resample_linear(channel, raw.sample_rate, target_rate))
        .collect())
}

/// Lowercase hex SHA-1 of the raw file bytes, read in 1 MiB blocks.
pub fn content_hash(path: &Path) -> Result<String, DecodeError> {
    let io_error = |source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_error)?;
    let mut hasher = Sha1::new();
    let mut block = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut block).map_err(io_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    let mut hex = String::with_capacity(40);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Display name for a file: its name without the extension.
pub fn audio_name_from_path(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
