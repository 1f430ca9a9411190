//! TOML-backed settings for fingerprinting, matching, the index and imports.

mod defaults;
mod io;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::hashing::HashParams;
use crate::analysis::peaks::PeakParams;
use defaults::*;

pub use io::{CONFIG_FILE_NAME, config_path, load_from_path, load_or_default, save_to_path};

/// Errors that may occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        /// Directory path that failed to create.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to write a config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Path that failed to write.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML serialization error.
        source: toml::ser::Error,
    },
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Complete application settings as stored in `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Spectrogram, peak and hash parameters.
    #[serde(default)]
    pub fingerprint: FingerprintSettings,
    /// Alignment and ranking parameters.
    #[serde(default)]
    pub matching: MatchingSettings,
    /// Fingerprint index storage parameters.
    #[serde(default)]
    pub index: IndexSettings,
    /// Batch import parameters.
    #[serde(default)]
    pub import: ImportSettings,
}

impl Settings {
    /// Clamp every section into a usable range.
    pub fn normalized(self) -> Self {
        Self {
            fingerprint: self.fingerprint.normalized(),
            matching: self.matching.normalized(),
            index: self.index.normalized(),
            import: self.import.normalized(),
        }
    }
}

/// Parameters shared by fingerprinting and querying.
///
/// Offsets stored in the index are frame indices, so the sample rate, window
/// and overlap used at import time must match the ones used for recognition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintSettings {
    /// Sample rate every channel is fingerprinted at.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// STFT window length in samples (power of two).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Fraction of each window shared with the next one.
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f32,
    /// How many later peaks each anchor peak is paired with.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Frequency span (bins) of the local-maximum neighborhood.
    #[serde(default = "default_peak_neighborhood")]
    pub peak_neighborhood_freq: usize,
    /// Time span (frames) of the local-maximum neighborhood.
    #[serde(default = "default_peak_neighborhood")]
    pub peak_neighborhood_time: usize,
    /// Minimum decibel level for a peak.
    #[serde(default = "default_amplitude_floor")]
    pub amplitude_floor: f32,
    /// Smallest anchor-to-target frame distance that forms a hash.
    #[serde(default = "default_min_time_delta")]
    pub min_time_delta: u32,
    /// Largest anchor-to-target frame distance that forms a hash.
    #[serde(default = "default_max_time_delta")]
    pub max_time_delta: u32,
    /// Paired peaks must differ by more than this many bins.
    #[serde(default = "default_min_freq_delta")]
    pub min_freq_delta: u32,
    /// Number of hex characters kept from each digest.
    #[serde(default = "default_digest_hex_len")]
    pub digest_hex_len: usize,
    /// Only fingerprint the first N seconds of each file (`None` = whole file).
    #[serde(default)]
    pub fingerprint_limit: Option<f32>,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            window_size: default_window_size(),
            overlap_ratio: default_overlap_ratio(),
            fan_out: default_fan_out(),
            peak_neighborhood_freq: default_peak_neighborhood(),
            peak_neighborhood_time: default_peak_neighborhood(),
            amplitude_floor: default_amplitude_floor(),
            min_time_delta: default_min_time_delta(),
            max_time_delta: default_max_time_delta(),
            min_freq_delta: default_min_freq_delta(),
            digest_hex_len: default_digest_hex_len(),
            fingerprint_limit: None,
        }
    }
}

impl FingerprintSettings {
    /// Clamp values into ranges the pipeline can work with.
    pub fn normalized(mut self) -> Self {
        self.sample_rate = self.sample_rate.max(1);
        self.window_size = clamp_window_size(self.window_size);
        self.overlap_ratio = clamp_overlap_ratio(self.overlap_ratio);
        self.fan_out = self.fan_out.max(1);
        self.max_time_delta = self.max_time_delta.max(self.min_time_delta);
        self.digest_hex_len = self.digest_hex_len.clamp(1, 40);
        if !self.amplitude_floor.is_finite() {
            self.amplitude_floor = default_amplitude_floor();
        }
        self.fingerprint_limit = self
            .fingerprint_limit
            .filter(|limit| limit.is_finite() && *limit > 0.0);
        self
    }

    /// Samples between the starts of consecutive windows.
    pub fn hop_size(&self) -> usize {
        let hop = self.window_size as f32 * (1.0 - self.overlap_ratio);
        (hop.round() as usize).max(1)
    }

    /// Wall-clock length of one frame step.
    pub fn seconds_per_frame(&self) -> f64 {
        self.hop_size() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn peak_params(&self) -> PeakParams {
        PeakParams {
            freq_neighborhood: self.peak_neighborhood_freq,
            time_neighborhood: self.peak_neighborhood_time,
            amplitude_floor: self.amplitude_floor,
        }
    }

    pub fn hash_params(&self) -> HashParams {
        HashParams {
            fan_out: self.fan_out,
            min_time_delta: self.min_time_delta,
            max_time_delta: self.max_time_delta,
            min_freq_delta: self.min_freq_delta,
            digest_hex_len: self.digest_hex_len,
        }
    }

    /// Settings that decide whether stored offsets and digests stay comparable.
    pub fn index_signature(&self) -> String {
        format!(
            "sample_rate={};window={};hop={};digest_len={}",
            self.sample_rate,
            self.window_size,
            self.hop_size(),
            self.digest_hex_len
        )
    }
}

/// Ranking and filtering applied to recognition results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSettings {
    /// Number of ranked candidates returned per recognition.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Results below this input confidence are dropped.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Persist each recognition to the audit tables.
    #[serde(default = "default_true")]
    pub record_matches: bool,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_confidence: default_min_confidence(),
            record_matches: default_true(),
        }
    }
}

impl MatchingSettings {
    pub fn normalized(mut self) -> Self {
        self.top_n = self.top_n.max(1);
        self.min_confidence = if self.min_confidence.is_finite() {
            self.min_confidence.clamp(0.0, 1.0)
        } else {
            default_min_confidence()
        };
        self
    }
}

/// SQLite index location and connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSettings {
    /// Database file; defaults to `index.db` in the app directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Rows per insert chunk and digests per lookup query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a checkout waits for a free connection.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: default_pool_size(),
            batch_size: default_batch_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
        }
    }
}

impl IndexSettings {
    pub fn normalized(mut self) -> Self {
        self.pool_size = self.pool_size.clamp(1, 64);
        // SQLite caps bound parameters per statement at 32766.
        self.batch_size = self.batch_size.clamp(1, 30_000);
        self
    }
}

/// Directory import behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSettings {
    /// Worker thread count (0 = one per available core).
    #[serde(default = "default_worker_count")]
    pub workers: u32,
    /// File extensions picked up when scanning directories.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Longest a single file may take before it is abandoned.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            extensions: default_extensions(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl ImportSettings {
    pub fn normalized(mut self) -> Self {
        self.workers = clamp_worker_count(self.workers);
        self.job_timeout_secs = self.job_timeout_secs.max(1);
        self.extensions = self
            .extensions
            .into_iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }
}
