//! Process-local postings store for tests and throwaway sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    FingerprintIndex, HashMatch, IndexError, IndexLookup, group_query_offsets, normalize_digest,
};
use crate::analysis::hashing::Fingerprint;

/// Postings keyed by normalized digest, each a set of `(audio_id, offset)`.
///
/// Nothing is persisted and there are no audio records; every stored audio
/// is treated as finished.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    postings: Mutex<BTreeMap<String, BTreeSet<(String, u32)>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored postings across all audios.
    pub fn posting_count(&self) -> Result<usize, IndexError> {
        Ok(self.postings()?.values().map(BTreeSet::len).sum())
    }

    /// Drop every posting of `audio_id`; returns how many were removed.
    pub fn remove_audio(&self, audio_id: &str) -> Result<usize, IndexError> {
        let mut postings = self.postings()?;
        let mut removed = 0;
        postings.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(id, _)| id != audio_id);
            removed += before - entries.len();
            !entries.is_empty()
        });
        Ok(removed)
    }

    fn postings(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<String, BTreeSet<(String, u32)>>>, IndexError> {
        self.postings
            .lock()
            .map_err(|_| IndexError::Unavailable("memory index lock poisoned".to_string()))
    }
}

impl FingerprintIndex for MemoryIndex {
    fn insert_hashes(
        &self,
        audio_id: &str,
        hashes: &BTreeSet<Fingerprint>,
    ) -> Result<usize, IndexError> {
        let rows = hashes
            .iter()
            .map(|hash| Ok((normalize_digest(&hash.digest)?, hash.offset)))
            .collect::<Result<Vec<_>, IndexError>>()?;
        let mut postings = self.postings()?;
        let mut inserted = 0;
        for (digest, offset) in rows {
            if postings
                .entry(digest)
                .or_default()
                .insert((audio_id.to_string(), offset))
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn lookup(&self, hashes: &BTreeSet<Fingerprint>) -> Result<IndexLookup, IndexError> {
        let query_offsets = group_query_offsets(hashes)?;
        let mut result = IndexLookup::default();
        if query_offsets.is_empty() {
            return Ok(result);
        }
        let postings = self.postings()?;
        for (digest, offsets) in &query_offsets {
            let Some(entries) = postings.get(digest) else {
                continue;
            };
            for (audio_id, stored_offset) in entries {
                *result.dedup_hashes.entry(audio_id.clone()).or_default() += 1;
                for &query_offset in offsets {
                    result.matches.push(HashMatch {
                        audio_id: audio_id.clone(),
                        offset_difference: i64::from(*stored_offset) - i64::from(query_offset),
                    });
                }
            }
        }
        Ok(result)
    }
}
