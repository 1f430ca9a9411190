//! Recognition log: what was queried, how long it took, and what it matched.

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::util::{self, map_sql_error};
use super::{IndexError, SqliteIndex};
use crate::matching::RecognitionReport;

/// The file a recognition was run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAudio {
    pub name: String,
    pub file_sha1: String,
    /// Lowercase file extension, empty when unknown.
    pub format: String,
    pub storage_path: String,
}

/// One logged recognition with its ranked matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedInformation {
    pub matched_id: String,
    pub audio_id: String,
    pub audio_name: String,
    pub total_time: f64,
    pub fingerprint_time: f64,
    pub query_time: f64,
    pub align_time: f64,
    pub date_created: String,
    pub related_audios: Vec<RelatedAudio>,
    /// Name of the best-ranked related audio.
    pub most_similar: Option<String>,
    /// Fingerprinted confidence of `most_similar`.
    pub confidence: Option<f64>,
}

/// A ranked match stored alongside a logged recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedAudio {
    pub related_audio_id: String,
    pub related_audio_name: String,
    pub matched_id: String,
    pub input_total_hashes: u64,
    pub fingerprinted_hashes_in_db: u64,
    pub hashes_matched_in_input: u64,
    pub input_confidence: f64,
    pub fingerprinted_confidence: f64,
    pub offset: i64,
    pub offset_seconds: f64,
    pub file_sha1: String,
}

impl SqliteIndex {
    /// Number of logged query files with this content hash.
    pub fn count_matched_audios_by_sha1(&self, file_sha1: &str) -> Result<u64, IndexError> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM matched_audios WHERE file_sha1 = ?1",
                params![file_sha1.to_ascii_lowercase()],
                |row| row.get(0),
            )
            .map_err(map_sql_error)?;
        Ok(count.max(0) as u64)
    }

    /// Log a recognition and its results in one transaction.
    ///
    /// Returns `None` without writing when this query file was logged before.
    pub fn record_recognition(
        &self,
        query: &QueryAudio,
        report: &RecognitionReport,
    ) -> Result<Option<String>, IndexError> {
        let file_sha1 = query.file_sha1.to_ascii_lowercase();
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(map_sql_error)?;
        let already_logged: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM matched_audios WHERE file_sha1 = ?1",
                params![file_sha1],
                |row| row.get(0),
            )
            .map_err(map_sql_error)?;
        if already_logged > 0 {
            tracing::debug!("Recognition of {} already logged", query.name);
            return Ok(None);
        }

        let now = util::now_timestamp();
        let audio_id = util::new_record_id();
        let matched_id = util::new_record_id();
        tx.execute(
            "INSERT INTO matched_audios (audio_id, audio_name, file_sha1, format, storage_path, date_created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                audio_id,
                query.name,
                file_sha1,
                query.format,
                query.storage_path,
                now
            ],
        )
        .map_err(map_sql_error)?;
        tx.execute(
            "INSERT INTO matched_information
                (matched_id, audio_id, audio_name, total_time, fingerprint_time, query_time, align_time, date_created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                matched_id,
                audio_id,
                query.name,
                report.total_time,
                report.fingerprint_time,
                report.query_time,
                report.align_time,
                now
            ],
        )
        .map_err(map_sql_error)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO related_audios
                        (related_id, matched_id, match_rank, related_audio_id, related_audio_name,
                         input_total_hashes, fingerprinted_hashes_in_db, hashes_matched_in_input,
                         input_confidence, fingerprinted_confidence, frame_offset, offset_seconds, file_sha1)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )
                .map_err(map_sql_error)?;
            for (rank, result) in report.results.iter().enumerate() {
                stmt.execute(params![
                    util::new_record_id(),
                    matched_id,
                    rank as i64,
                    result.audio_id,
                    result.audio_name,
                    result.input_total_hashes as i64,
                    result.fingerprinted_hashes_in_db as i64,
                    result.hashes_matched_in_input as i64,
                    result.input_confidence,
                    result.fingerprinted_confidence,
                    result.offset,
                    result.offset_seconds,
                    result.file_sha1
                ])
                .map_err(map_sql_error)?;
            }
        }
        tx.commit().map_err(map_sql_error)?;
        Ok(Some(matched_id))
    }

    /// Most recent recognitions, newest first.
    ///
    /// Related audios below `min_confidence` (fingerprinted confidence) are
    /// left out; a recognition whose matches are all filtered keeps an empty
    /// list and no `most_similar`.
    pub fn matched_history(
        &self,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<MatchedInformation>, IndexError> {
        let conn = self.connection()?;
        let mut info_stmt = conn
            .prepare_cached(
                "SELECT matched_id, audio_id, audio_name, total_time, fingerprint_time,
                        query_time, align_time, date_created
                 FROM matched_information
                 ORDER BY date_created DESC, rowid DESC
                 LIMIT ?1",
            )
            .map_err(map_sql_error)?;
        let mut history = info_stmt
            .query_map(params![limit.min(i64::MAX as usize) as i64], map_information_row)
            .map_err(map_sql_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_error)?;

        let mut related_stmt = conn
            .prepare_cached(
                "SELECT related_audio_id, related_audio_name, matched_id, input_total_hashes,
                        fingerprinted_hashes_in_db, hashes_matched_in_input, input_confidence,
                        fingerprinted_confidence, frame_offset, offset_seconds, file_sha1
                 FROM related_audios
                 WHERE matched_id = ?1 AND fingerprinted_confidence >= ?2
                 ORDER BY match_rank",
            )
            .map_err(map_sql_error)?;
        for info in &mut history {
            info.related_audios = related_stmt
                .query_map(params![info.matched_id, min_confidence], map_related_row)
                .map_err(map_sql_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sql_error)?;
            if let Some(best) = info.related_audios.first() {
                info.most_similar = Some(best.related_audio_name.clone());
                info.confidence = Some(best.fingerprinted_confidence);
            }
        }
        Ok(history)
    }
}

fn map_information_row(row: &Row<'_>) -> rusqlite::Result<MatchedInformation> {
    Ok(MatchedInformation {
        matched_id: row.get(0)?,
        audio_id: row.get(1)?,
        audio_name: row.get(2)?,
        total_time: row.get(3)?,
        fingerprint_time: row.get(4)?,
        query_time: row.get(5)?,
        align_time: row.get(6)?,
        date_created: row.get(7)?,
        related_audios: Vec::new(),
        most_similar: None,
        confidence: None,
    })
}

fn map_related_row(row: &Row<'_>) -> rusqlite::Result<RelatedAudio> {
    let count = |idx: usize| row.get::<_, i64>(idx).map(|value| value.max(0) as u64);
    Ok(RelatedAudio {
        related_audio_id: row.get(0)?,
        related_audio_name: row.get(1)?,
        matched_id: row.get(2)?,
        input_total_hashes: count(3)?,
        fingerprinted_hashes_in_db: count(4)?,
        hashes_matched_in_input: count(5)?,
        input_confidence: row.get(6)?,
        fingerprinted_confidence: row.get(7)?,
        offset: row.get(8)?,
        offset_seconds: row.get(9)?,
        file_sha1: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::matching::MatchResult;
    use tempfile::tempdir;

    fn index(dir: &std::path::Path) -> SqliteIndex {
        SqliteIndex::open(&dir.join("index.db"), &IndexSettings::default()).unwrap()
    }

    fn source(index: &SqliteIndex, name: &str) -> String {
        let id = index.insert_audio(name, "00ff", 100).unwrap();
        index.set_audio_fingerprinted(&id).unwrap();
        id
    }

    fn result(audio_id: &str, name: &str, fingerprinted_confidence: f64) -> MatchResult {
        MatchResult {
            audio_id: audio_id.to_string(),
            audio_name: name.to_string(),
            input_total_hashes: 200,
            fingerprinted_hashes_in_db: 100,
            hashes_matched_in_input: 40,
            input_confidence: 0.2,
            fingerprinted_confidence,
            offset: 12,
            offset_seconds: 0.55728,
            file_sha1: "00ff".to_string(),
        }
    }

    fn query(sha1: &str) -> QueryAudio {
        QueryAudio {
            name: "clip".to_string(),
            file_sha1: sha1.to_string(),
            format: "wav".to_string(),
            storage_path: "/tmp/clip.wav".to_string(),
        }
    }

    fn report(results: Vec<MatchResult>) -> RecognitionReport {
        RecognitionReport {
            total_time: 0.5,
            fingerprint_time: 0.3,
            query_time: 0.15,
            align_time: 0.05,
            results,
        }
    }

    #[test]
    fn history_names_the_top_ranked_match() {
        let dir = tempdir().unwrap();
        let index = index(dir.path());
        let first = source(&index, "first");
        let second = source(&index, "second");
        let logged = index
            .record_recognition(
                &query("abcd"),
                &report(vec![result(&first, "first", 0.4), result(&second, "second", 0.9)]),
            )
            .unwrap();
        assert!(logged.is_some());

        let history = index.matched_history(0.0, 20).unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.audio_name, "clip");
        assert_eq!(entry.related_audios.len(), 2);
        assert_eq!(entry.most_similar.as_deref(), Some("first"));
        assert_eq!(entry.confidence, Some(0.4));
    }

    #[test]
    fn history_filters_related_audios_by_confidence() {
        let dir = tempdir().unwrap();
        let index = index(dir.path());
        let first = source(&index, "first");
        let second = source(&index, "second");
        index
            .record_recognition(
                &query("abcd"),
                &report(vec![result(&first, "first", 0.4), result(&second, "second", 0.9)]),
            )
            .unwrap();
        let history = index.matched_history(0.5, 20).unwrap();
        assert_eq!(history[0].related_audios.len(), 1);
        assert_eq!(history[0].most_similar.as_deref(), Some("second"));

        let history = index.matched_history(0.95, 20).unwrap();
        assert!(history[0].related_audios.is_empty());
        assert_eq!(history[0].most_similar, None);
    }

    #[test]
    fn same_query_file_is_logged_once() {
        let dir = tempdir().unwrap();
        let index = index(dir.path());
        assert!(
            index
                .record_recognition(&query("ABCD"), &report(Vec::new()))
                .unwrap()
                .is_some()
        );
        assert!(
            index
                .record_recognition(&query("abcd"), &report(Vec::new()))
                .unwrap()
                .is_none()
        );
        assert_eq!(index.count_matched_audios_by_sha1("abcd").unwrap(), 1);
        assert_eq!(index.matched_history(0.0, 20).unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_source_drops_its_related_rows() {
        let dir = tempdir().unwrap();
        let index = index(dir.path());
        let gone = source(&index, "gone");
        index
            .record_recognition(&query("abcd"), &report(vec![result(&gone, "gone", 0.4)]))
            .unwrap();
        index.delete_audios(&[gone]).unwrap();
        let history = index.matched_history(0.0, 20).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].related_audios.is_empty());
    }
}
