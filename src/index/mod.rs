//! Fingerprint index: hash postings, audio records and the recognition log.

mod audit;
mod memory;
mod pool;
mod schema;
mod sqlite;
mod util;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::hashing::Fingerprint;

pub use audit::{MatchedInformation, QueryAudio, RelatedAudio};
pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Errors returned by the fingerprint index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The database could not be reached (open failure, lock contention, pool exhausted).
    #[error("Fingerprint index unavailable: {0}")]
    Unavailable(String),
    #[error("Could not create index directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("Malformed fingerprint digest: {0:?}")]
    InvalidDigest(String),
    #[error("Index was built with {stored}, but the current settings use {requested}")]
    ParameterMismatch { stored: String, requested: String },
}

impl IndexError {
    /// True when the failure is about reaching storage rather than the request itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::CreateDir { .. })
    }
}

/// One fingerprinted source recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRecord {
    pub audio_id: String,
    pub audio_name: String,
    pub file_sha1: String,
    pub total_hashes: u64,
    pub fingerprinted: bool,
    pub date_created: String,
}

/// A stored posting whose digest matched a query hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashMatch {
    pub audio_id: String,
    /// Stored offset minus query offset, in frames.
    pub offset_difference: i64,
}

/// Result of a batched digest lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexLookup {
    /// One entry per stored posting and query offset sharing its digest.
    pub matches: Vec<HashMatch>,
    /// Stored postings hit per audio, each counted once.
    pub dedup_hashes: BTreeMap<String, usize>,
}

impl IndexLookup {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Storage contract the recognition pipeline relies on.
///
/// Audio records, the fingerprinted flag and the recognition log are
/// inherent to [`SqliteIndex`]; [`MemoryIndex`] carries postings only.
pub trait FingerprintIndex: Send + Sync {
    /// Store `hashes` for `audio_id`; duplicates of existing postings are ignored.
    ///
    /// Returns the number of postings that were new.
    fn insert_hashes(
        &self,
        audio_id: &str,
        hashes: &BTreeSet<Fingerprint>,
    ) -> Result<usize, IndexError>;

    /// Find every stored posting sharing a digest with `hashes`.
    fn lookup(&self, hashes: &BTreeSet<Fingerprint>) -> Result<IndexLookup, IndexError>;
}

/// Map each normalized digest to all query offsets that produced it.
pub fn group_query_offsets(
    hashes: &BTreeSet<Fingerprint>,
) -> Result<BTreeMap<String, Vec<u32>>, IndexError> {
    let mut grouped: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for hash in hashes {
        grouped
            .entry(normalize_digest(&hash.digest)?)
            .or_default()
            .push(hash.offset);
    }
    Ok(grouped)
}

/// Lowercase a digest, rejecting anything that is not non-empty hex.
pub fn normalize_digest(digest: &str) -> Result<String, IndexError> {
    if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IndexError::InvalidDigest(digest.to_string()));
    }
    Ok(digest.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(digest: &str, offset: u32) -> Fingerprint {
        Fingerprint {
            digest: digest.to_string(),
            offset,
        }
    }

    #[test]
    fn grouping_collects_offsets_per_normalized_digest() {
        let hashes: BTreeSet<_> = [fp("ABCD", 3), fp("abcd", 9), fp("0f0f", 1)]
            .into_iter()
            .collect();
        let grouped = group_query_offsets(&hashes).unwrap();
        assert_eq!(grouped.len(), 2);
        let mut offsets = grouped["abcd"].clone();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![3, 9]);
        assert_eq!(grouped["0f0f"], vec![1]);
    }

    #[test]
    fn non_hex_digest_is_rejected() {
        assert!(matches!(
            normalize_digest("xyz"),
            Err(IndexError::InvalidDigest(_))
        ));
        assert!(normalize_digest("").is_err());
    }

    fn shared_postings_behave_alike(index: &dyn FingerprintIndex, audio_id: &str) {
        let stored: BTreeSet<_> = [fp("aa01", 10), fp("bb02", 20), fp("cc03", 30)]
            .into_iter()
            .collect();
        assert_eq!(index.insert_hashes(audio_id, &stored).unwrap(), 3);
        assert_eq!(index.insert_hashes(audio_id, &stored).unwrap(), 0);

        let query: BTreeSet<_> = [fp("AA01", 4), fp("cc03", 28), fp("dd04", 1)]
            .into_iter()
            .collect();
        let lookup = index.lookup(&query).unwrap();
        let mut diffs: Vec<i64> = lookup.matches.iter().map(|m| m.offset_difference).collect();
        diffs.sort_unstable();
        assert_eq!(diffs, vec![2, 6]);
        assert_eq!(lookup.dedup_hashes.get(audio_id), Some(&2));
        assert!(index.lookup(&BTreeSet::new()).unwrap().is_empty());
        assert!(matches!(
            index.lookup(&[fp("q", 0)].into_iter().collect()),
            Err(IndexError::InvalidDigest(_))
        ));
    }

    #[test]
    fn memory_and_sqlite_indexes_agree() {
        shared_postings_behave_alike(&MemoryIndex::new(), "memory-audio");

        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteIndex::open(
            &dir.path().join("index.db"),
            &crate::config::IndexSettings::default(),
        )
        .unwrap();
        let audio_id = sqlite.insert_audio("song", &"ab".repeat(20), 3).unwrap();
        sqlite.set_audio_fingerprinted(&audio_id).unwrap();
        shared_postings_behave_alike(&sqlite, &audio_id);
    }

    #[test]
    fn unavailable_is_distinct_from_bad_input() {
        assert!(IndexError::Unavailable("pool".into()).is_unavailable());
        assert!(!IndexError::InvalidDigest("x".into()).is_unavailable());
    }
}
