//! Offset-histogram alignment: turn raw digest hits into ranked matches.

use serde::{Deserialize, Serialize};

use crate::analysis::numeric::round_to;
use crate::index::{AudioRecord, HashMatch, IndexLookup};

/// One ranked candidate as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub audio_id: String,
    pub audio_name: String,
    /// Distinct hashes generated from the query.
    pub input_total_hashes: usize,
    /// Hashes stored for this audio at import time.
    pub fingerprinted_hashes_in_db: u64,
    /// Stored postings of this audio hit by the query.
    pub hashes_matched_in_input: usize,
    pub input_confidence: f64,
    pub fingerprinted_confidence: f64,
    /// Winning offset difference, in frames.
    pub offset: i64,
    pub offset_seconds: f64,
    pub file_sha1: String,
}

/// Timings (seconds) and ranked results of one recognition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionReport {
    pub total_time: f64,
    pub fingerprint_time: f64,
    pub query_time: f64,
    pub align_time: f64,
    pub results: Vec<MatchResult>,
}

/// The offset bin that won for one audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedCandidate {
    pub audio_id: String,
    pub offset: i64,
    pub votes: usize,
}

/// Best offset per audio, strongest first.
///
/// Ties on votes within an audio go to the smallest offset; ties across
/// audios go to the smaller audio id.
pub fn rank_candidates(matches: &[HashMatch]) -> Vec<AlignedCandidate> {
    let mut sorted: Vec<&HashMatch> = matches.iter().collect();
    sorted.sort_unstable();

    let mut best: Vec<AlignedCandidate> = Vec::new();
    let mut idx = 0;
    while idx < sorted.len() {
        let current = sorted[idx];
        let mut end = idx + 1;
        while end < sorted.len() && sorted[end] == current {
            end += 1;
        }
        let votes = end - idx;
        match best.last_mut() {
            Some(last) if last.audio_id == current.audio_id => {
                if votes > last.votes {
                    last.offset = current.offset_difference;
                    last.votes = votes;
                }
            }
            _ => best.push(AlignedCandidate {
                audio_id: current.audio_id.clone(),
                offset: current.offset_difference,
                votes,
            }),
        }
        idx = end;
    }
    // Stable sort keeps audio-id order among equal vote counts.
    best.sort_by(|a, b| b.votes.cmp(&a.votes));
    best
}

/// Build a result for `candidate`, or `None` when there is nothing to score:
/// no matched postings, no stored hashes or an empty query.
pub fn score_candidate(
    candidate: &AlignedCandidate,
    record: &AudioRecord,
    hashes_matched: usize,
    queried_hashes: usize,
    seconds_per_frame: f64,
) -> Option<MatchResult> {
    if hashes_matched == 0 || record.total_hashes == 0 || queried_hashes == 0 {
        return None;
    }
    Some(MatchResult {
        audio_id: candidate.audio_id.clone(),
        audio_name: record.audio_name.clone(),
        input_total_hashes: queried_hashes,
        fingerprinted_hashes_in_db: record.total_hashes,
        hashes_matched_in_input: hashes_matched,
        input_confidence: round_to(hashes_matched as f64 / queried_hashes as f64, 2),
        fingerprinted_confidence: round_to(hashes_matched as f64 / record.total_hashes as f64, 2),
        offset: candidate.offset,
        offset_seconds: round_to(candidate.offset as f64 * seconds_per_frame, 5),
        file_sha1: record.file_sha1.clone(),
    })
}

/// Rank `lookup` and return up to `top_n` scored results.
///
/// `resolve` fetches the stored record for an audio id. Candidates whose
/// record is missing, has no stored hashes or has no matched postings are
/// skipped and do not use up a slot.
pub fn align_matches<E>(
    lookup: &IndexLookup,
    queried_hashes: usize,
    top_n: usize,
    seconds_per_frame: f64,
    mut resolve: impl FnMut(&str) -> Result<Option<AudioRecord>, E>,
) -> Result<Vec<MatchResult>, E> {
    let mut results = Vec::new();
    if top_n == 0 {
        return Ok(results);
    }
    for candidate in rank_candidates(&lookup.matches) {
        let Some(record) = resolve(&candidate.audio_id)? else {
            tracing::warn!("Matched audio {} has no stored record", candidate.audio_id);
            continue;
        };
        let hashes_matched = lookup
            .dedup_hashes
            .get(&candidate.audio_id)
            .copied()
            .unwrap_or(0);
        let Some(result) = score_candidate(
            &candidate,
            &record,
            hashes_matched,
            queried_hashes,
            seconds_per_frame,
        ) else {
            continue;
        };
        results.push(result);
        if results.len() >= top_n {
            break;
        }
    }
    Ok(results)
}
