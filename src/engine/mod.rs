//! Import and recognition workflows on top of the fingerprint index.

mod fingerprinted;
mod scan;
mod worker_pool;

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::analysis::{self, hashing::Fingerprint};
use crate::app_dirs::{self, AppDirError};
use crate::audio::{self, DecodeError};
use crate::config::{FingerprintSettings, Settings};
use crate::index::{
    AudioRecord, FingerprintIndex, IndexError, IndexLookup, MatchedInformation, QueryAudio,
    SqliteIndex,
};
use crate::matching::{self, MatchResult, RecognitionReport};

pub use fingerprinted::FingerprintedSet;
use worker_pool::JobOutcome;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    /// True when the index could not be reached, as opposed to bad input.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::Index(err) if err.is_unavailable())
    }
}

/// Result of importing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FingerprintOutcome {
    Stored {
        audio_id: String,
        audio_name: String,
        hashes: usize,
    },
    /// The file's content hash is already fingerprinted.
    Skipped {
        audio_name: String,
        content_hash: String,
    },
}

/// Totals for a directory import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub discovered: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failed: Vec<ImportFailure>,
    /// Files abandoned after running past the per-file timeout; each is
    /// also listed in `failed`.
    pub timed_out: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub path: PathBuf,
    pub error: String,
}

/// What a worker hands back for one file.
enum FileFingerprint {
    Known {
        audio_name: String,
        content_hash: String,
    },
    Fresh {
        audio_name: String,
        content_hash: String,
        hashes: BTreeSet<Fingerprint>,
    },
}

/// Owns the settings, the index and the fingerprinted-file membership set.
pub struct Engine {
    settings: Settings,
    index: SqliteIndex,
    fingerprinted: FingerprintedSet,
}

impl Engine {
    /// Open the index named by `settings` (or the default app location).
    pub fn open(settings: Settings) -> Result<Self, EngineError> {
        let path = match &settings.index.database_path {
            Some(path) => path.clone(),
            None => app_dirs::default_index_path()?,
        };
        let index = SqliteIndex::open(&path, &settings.index)?;
        Self::with_index(settings, index)
    }

    /// Wrap an already opened index.
    pub fn with_index(settings: Settings, index: SqliteIndex) -> Result<Self, EngineError> {
        let settings = settings.normalized();
        index.ensure_parameters(&settings.fingerprint)?;
        let fingerprinted = FingerprintedSet::load(&index)?;
        tracing::info!(
            "Opened fingerprint index {} ({} fingerprinted file(s))",
            index.path().display(),
            fingerprinted.len()
        );
        Ok(Self {
            settings,
            index,
            fingerprinted,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &SqliteIndex {
        &self.index
    }

    pub fn fingerprinted(&self) -> &FingerprintedSet {
        &self.fingerprinted
    }

    /// Reload the fingerprinted-file set from the index.
    pub fn refresh_fingerprinted(&mut self) -> Result<(), IndexError> {
        self.fingerprinted = FingerprintedSet::load(&self.index)?;
        Ok(())
    }

    /// Fingerprint already decoded channels at the configured sample rate.
    pub fn fingerprint_samples(&self, channels: &[Vec<i16>]) -> BTreeSet<Fingerprint> {
        analysis::fingerprint_channels(channels, &self.settings.fingerprint)
    }

    /// Import one file, skipping it if its content was fingerprinted before.
    pub fn fingerprint_file(
        &mut self,
        path: &Path,
        audio_name: Option<&str>,
    ) -> Result<FingerprintOutcome, EngineError> {
        let audio_name = audio_name
            .map(str::to_string)
            .unwrap_or_else(|| audio::audio_name_from_path(path));
        match fingerprint_job(path, audio_name, &self.fingerprinted, &self.settings.fingerprint)? {
            FileFingerprint::Known {
                audio_name,
                content_hash,
            } => {
                tracing::info!("{audio_name} already fingerprinted, skipping");
                Ok(FingerprintOutcome::Skipped {
                    audio_name,
                    content_hash,
                })
            }
            FileFingerprint::Fresh {
                audio_name,
                content_hash,
                hashes,
            } => Ok(self.store_fingerprints(&audio_name, &content_hash, &hashes)?),
        }
    }

    /// Import every matching file under `dir` on a worker pool.
    ///
    /// Workers decode and fingerprint; results are written here, one file at a
    /// time. Per-file failures are collected in the summary. An unreachable
    /// index aborts the import.
    pub fn fingerprint_directory(
        &mut self,
        dir: &Path,
        extensions: &[String],
        workers: Option<usize>,
    ) -> Result<ImportSummary, EngineError> {
        let extensions = if extensions.is_empty() {
            self.settings.import.extensions.clone()
        } else {
            extensions.to_vec()
        };
        let files = scan::find_files(dir, &extensions).map_err(|source| EngineError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        let worker_count = workers
            .filter(|count| *count >= 1)
            .unwrap_or_else(|| worker_pool::worker_count_with_override(self.settings.import.workers));
        let timeout = Duration::from_secs(self.settings.import.job_timeout_secs);
        tracing::info!(
            "Fingerprinting {} file(s) under {} with {worker_count} worker(s)",
            files.len(),
            dir.display()
        );

        let mut summary = ImportSummary {
            discovered: files.len(),
            ..ImportSummary::default()
        };
        let snapshot = self.fingerprinted.clone();
        let fingerprint_settings = self.settings.fingerprint.clone();
        let labels = files.clone();
        let mut storage_error: Option<IndexError> = None;

        worker_pool::run_jobs(
            files,
            worker_count,
            timeout,
            move |path: PathBuf| {
                let audio_name = audio::audio_name_from_path(&path);
                fingerprint_job(&path, audio_name, &snapshot, &fingerprint_settings)
            },
            |index, outcome| {
                let path = &labels[index];
                let fingerprint = match outcome {
                    JobOutcome::Finished(Ok(fingerprint)) => fingerprint,
                    JobOutcome::Finished(Err(err)) => {
                        tracing::warn!("Failed to fingerprint {}: {err}", path.display());
                        summary.failed.push(ImportFailure {
                            path: path.clone(),
                            error: err.to_string(),
                        });
                        return ControlFlow::Continue(());
                    }
                    JobOutcome::Panicked(message) => {
                        tracing::error!("Fingerprint worker panicked on {}: {message}", path.display());
                        summary.failed.push(ImportFailure {
                            path: path.clone(),
                            error: format!("worker panicked: {message}"),
                        });
                        return ControlFlow::Continue(());
                    }
                    JobOutcome::TimedOut => {
                        tracing::warn!(
                            "Gave up on {} after {}s",
                            path.display(),
                            timeout.as_secs()
                        );
                        summary.timed_out += 1;
                        summary.failed.push(ImportFailure {
                            path: path.clone(),
                            error: format!("timed out after {}s", timeout.as_secs()),
                        });
                        return ControlFlow::Continue(());
                    }
                };
                let (audio_name, content_hash, hashes) = match fingerprint {
                    FileFingerprint::Known { audio_name, .. } => {
                        tracing::info!("{audio_name} already fingerprinted, skipping");
                        summary.skipped += 1;
                        return ControlFlow::Continue(());
                    }
                    FileFingerprint::Fresh {
                        audio_name,
                        content_hash,
                        hashes,
                    } => (audio_name, content_hash, hashes),
                };
                match self.store_fingerprints(&audio_name, &content_hash, &hashes) {
                    Ok(FingerprintOutcome::Stored { .. }) => summary.stored += 1,
                    Ok(FingerprintOutcome::Skipped { .. }) => summary.skipped += 1,
                    Err(err) if err.is_unavailable() => {
                        storage_error = Some(err);
                        return ControlFlow::Break(());
                    }
                    Err(err) => {
                        tracing::warn!("Failed to store {}: {err}", path.display());
                        summary.failed.push(ImportFailure {
                            path: path.clone(),
                            error: err.to_string(),
                        });
                    }
                }
                ControlFlow::Continue(())
            },
        );
        if let Some(err) = storage_error {
            return Err(err.into());
        }
        tracing::info!(
            "Import finished: {} stored, {} skipped, {} failed",
            summary.stored,
            summary.skipped,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Write one file's hashes: record, postings, completion flag, then the
    /// membership refresh. A half-written record is removed on failure.
    pub fn store_fingerprints(
        &mut self,
        audio_name: &str,
        content_hash: &str,
        hashes: &BTreeSet<Fingerprint>,
    ) -> Result<FingerprintOutcome, IndexError> {
        if self.fingerprinted.contains(content_hash) {
            tracing::info!("{audio_name} already fingerprinted, skipping");
            return Ok(FingerprintOutcome::Skipped {
                audio_name: audio_name.to_string(),
                content_hash: content_hash.to_string(),
            });
        }
        let audio_id = self
            .index
            .insert_audio(audio_name, content_hash, hashes.len() as u64)?;
        let written = self
            .index
            .insert_hashes(&audio_id, hashes)
            .and_then(|_| self.index.set_audio_fingerprinted(&audio_id));
        if let Err(err) = written {
            if let Err(cleanup) = self.index.delete_audios(std::slice::from_ref(&audio_id)) {
                tracing::warn!("Could not remove partial record {audio_id}: {cleanup}");
            }
            return Err(err);
        }
        self.refresh_fingerprinted()?;
        tracing::info!("Fingerprinted {audio_name} ({} hashes)", hashes.len());
        Ok(FingerprintOutcome::Stored {
            audio_id,
            audio_name: audio_name.to_string(),
            hashes: hashes.len(),
        })
    }

    /// Look up `hashes` in the index and time the query.
    pub fn find_matches(
        &self,
        hashes: &BTreeSet<Fingerprint>,
    ) -> Result<(IndexLookup, Duration), IndexError> {
        let started = Instant::now();
        let lookup = self.index.lookup(hashes)?;
        Ok((lookup, started.elapsed()))
    }

    /// Rank a lookup into at most `top_n` results.
    pub fn align_matches(
        &self,
        lookup: &IndexLookup,
        queried_hashes: usize,
    ) -> Result<Vec<MatchResult>, IndexError> {
        matching::align_matches(
            lookup,
            queried_hashes,
            self.settings.matching.top_n,
            self.settings.fingerprint.seconds_per_frame(),
            |audio_id| self.index.audio_by_id(audio_id),
        )
    }

    /// Recognize already decoded channels.
    ///
    /// Every channel is fingerprinted and the hashes are merged before a
    /// single lookup. Results below the configured input confidence are
    /// dropped.
    pub fn recognize_channels(&self, channels: &[Vec<i16>]) -> Result<RecognitionReport, EngineError> {
        let started = Instant::now();
        let hashes = self.fingerprint_samples(channels);
        let fingerprint_time = started.elapsed();

        let (lookup, query_time) = self.find_matches(&hashes)?;

        let align_started = Instant::now();
        let mut results = self.align_matches(&lookup, hashes.len())?;
        let min_confidence = f64::from(self.settings.matching.min_confidence);
        results.retain(|result| result.input_confidence >= min_confidence);
        let align_time = align_started.elapsed();

        Ok(RecognitionReport {
            total_time: started.elapsed().as_secs_f64(),
            fingerprint_time: fingerprint_time.as_secs_f64(),
            query_time: query_time.as_secs_f64(),
            align_time: align_time.as_secs_f64(),
            results,
        })
    }

    /// Decode and recognize `path`, logging the outcome when enabled.
    pub fn recognize_file(&self, path: &Path) -> Result<RecognitionReport, EngineError> {
        let decoded = audio::read(
            path,
            self.settings.fingerprint.fingerprint_limit,
            self.settings.fingerprint.sample_rate,
        )?;
        let report = self.recognize_channels(&decoded.channels)?;
        tracing::info!(
            "Recognized {} in {:.3}s: {} result(s)",
            path.display(),
            report.total_time,
            report.results.len()
        );
        if self.settings.matching.record_matches {
            let query = QueryAudio {
                name: audio::audio_name_from_path(path),
                file_sha1: decoded.content_hash,
                format: path
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default(),
                storage_path: path.display().to_string(),
            };
            if let Err(err) = self.index.record_recognition(&query, &report) {
                tracing::warn!("Could not log recognition of {}: {err}", path.display());
            }
        }
        Ok(report)
    }

    pub fn fingerprinted_audios(&self) -> Result<Vec<AudioRecord>, IndexError> {
        self.index.fingerprinted_audios()
    }

    /// Fingerprinted audios stored under `audio_name`.
    pub fn source_audios_by_name(&self, audio_name: &str) -> Result<Vec<AudioRecord>, IndexError> {
        self.index.audios_by_name(audio_name)
    }

    /// Delete audios with their hashes, then refresh the membership set.
    pub fn delete_audios(&mut self, audio_ids: &[String]) -> Result<usize, IndexError> {
        let removed = self.index.delete_audios(audio_ids)?;
        self.refresh_fingerprinted()?;
        tracing::info!("Deleted {removed} audio record(s)");
        Ok(removed)
    }

    /// Logged recognitions, newest first; `min_confidence` defaults to the
    /// configured matching threshold.
    pub fn matched_history(
        &self,
        min_confidence: Option<f64>,
        limit: usize,
    ) -> Result<Vec<MatchedInformation>, IndexError> {
        let min_confidence =
            min_confidence.unwrap_or_else(|| f64::from(self.settings.matching.min_confidence));
        self.index.matched_history(min_confidence, limit)
    }
}

fn fingerprint_job(
    path: &Path,
    audio_name: String,
    known: &FingerprintedSet,
    settings: &FingerprintSettings,
) -> Result<FileFingerprint, DecodeError> {
    let content_hash = audio::content_hash(path)?;
    if known.contains(&content_hash) {
        return Ok(FileFingerprint::Known {
            audio_name,
            content_hash,
        });
    }
    let channels = audio::read_channels(path, settings.fingerprint_limit, settings.sample_rate)?;
    Ok(FileFingerprint::Fresh {
        audio_name,
        content_hash,
        hashes: analysis::fingerprint_channels(&channels, settings),
    })
}
