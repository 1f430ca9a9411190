//! Library exports for the CLI, benchmarks and integration tests.
/// Spectrogram, peak and hash generation.
pub mod analysis;
/// Application directory helpers.
pub mod app_dirs;
/// Audio decoding and content hashing.
pub mod audio;
/// TOML-backed settings.
pub mod config;
/// Import and recognition workflows.
pub mod engine;
/// SQLite fingerprint index.
pub mod index;
/// Logging setup.
pub mod logging;
/// Offset alignment and ranking.
pub mod matching;

pub use engine::{Engine, EngineError, FingerprintOutcome, ImportSummary};
pub use matching::{MatchResult, RecognitionReport};
