use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::pool::{ConnectionPool, PooledConnection};
use super::util::{self, map_sql_error};
use super::{
    AudioRecord, FingerprintIndex, HashMatch, IndexError, IndexLookup, group_query_offsets,
    normalize_digest, schema,
};
use crate::analysis::hashing::Fingerprint;
use crate::config::{FingerprintSettings, IndexSettings};

/// Three bound parameters per row keeps this under SQLite's 32766 limit.
const MAX_INSERT_ROWS: usize = 10_000;
/// Ids per `DELETE ... IN (...)` statement.
const DELETE_CHUNK: usize = 1_000;

const AUDIO_COLUMNS: &str =
    "audio_id, audio_name, file_sha1, total_hashes, fingerprinted, date_created";

/// Fingerprint index stored in a single SQLite file.
pub struct SqliteIndex {
    pool: ConnectionPool,
    batch_size: usize,
}

impl SqliteIndex {
    /// Open (or create) the index at `path`.
    ///
    /// Records left unfingerprinted by an interrupted import are removed.
    pub fn open(path: &Path, settings: &IndexSettings) -> Result<Self, IndexError> {
        util::create_parent_if_needed(path)?;
        let index = Self {
            pool: ConnectionPool::new(
                path,
                settings.pool_size,
                Duration::from_millis(settings.checkout_timeout_ms),
            ),
            batch_size: settings.batch_size.max(1),
        };
        {
            let conn = index.pool.checkout()?;
            schema::apply_schema(&conn)?;
        }
        let removed = index.delete_unfingerprinted_audios()?;
        if removed > 0 {
            tracing::info!("Removed {removed} partially imported audio record(s)");
        }
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// Fail with `ParameterMismatch` if the index was built with other settings.
    pub fn ensure_parameters(&self, settings: &FingerprintSettings) -> Result<(), IndexError> {
        let conn = self.pool.checkout()?;
        schema::check_parameters(&conn, &settings.index_signature())
    }

    pub(super) fn connection(&self) -> Result<PooledConnection<'_>, IndexError> {
        self.pool.checkout()
    }

    /// Create an unfingerprinted record and return its id.
    pub fn insert_audio(
        &self,
        audio_name: &str,
        file_sha1: &str,
        total_hashes: u64,
    ) -> Result<String, IndexError> {
        let audio_id = util::new_record_id();
        let conn = self.pool.checkout()?;
        conn.execute(
            "INSERT INTO audios (audio_id, audio_name, fingerprinted, file_sha1, total_hashes, date_created)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![
                audio_id,
                audio_name,
                file_sha1.to_ascii_lowercase(),
                total_hashes as i64,
                util::now_timestamp()
            ],
        )
        .map_err(map_sql_error)?;
        Ok(audio_id)
    }

    pub fn set_audio_fingerprinted(&self, audio_id: &str) -> Result<(), IndexError> {
        let conn = self.pool.checkout()?;
        conn.execute(
            "UPDATE audios SET fingerprinted = 1 WHERE audio_id = ?1",
            params![audio_id],
        )
        .map_err(map_sql_error)?;
        Ok(())
    }

    pub fn audio_by_id(&self, audio_id: &str) -> Result<Option<AudioRecord>, IndexError> {
        let conn = self.pool.checkout()?;
        conn.query_row(
            &format!("SELECT {AUDIO_COLUMNS} FROM audios WHERE audio_id = ?1"),
            params![audio_id],
            map_audio_row,
        )
        .optional()
        .map_err(map_sql_error)
    }

    /// Every fully fingerprinted audio, oldest first.
    pub fn fingerprinted_audios(&self) -> Result<Vec<AudioRecord>, IndexError> {
        self.query_audios(
            &format!(
                "SELECT {AUDIO_COLUMNS} FROM audios WHERE fingerprinted = 1
                 ORDER BY date_created, audio_id"
            ),
            &[],
        )
    }

    /// Fingerprinted audios whose name matches exactly.
    pub fn audios_by_name(&self, audio_name: &str) -> Result<Vec<AudioRecord>, IndexError> {
        self.query_audios(
            &format!(
                "SELECT {AUDIO_COLUMNS} FROM audios
                 WHERE fingerprinted = 1 AND audio_name = ?1
                 ORDER BY date_created, audio_id"
            ),
            &[audio_name],
        )
    }

    /// Content hashes of every fully fingerprinted audio.
    pub fn fingerprinted_content_hashes(&self) -> Result<HashSet<String>, IndexError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn
            .prepare_cached("SELECT file_sha1 FROM audios WHERE fingerprinted = 1")
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_sql_error)?;
        rows.collect::<Result<HashSet<_>, _>>()
            .map_err(map_sql_error)
    }

    /// Delete audios and, through the cascade, their fingerprints.
    pub fn delete_audios(&self, audio_ids: &[String]) -> Result<usize, IndexError> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction().map_err(map_sql_error)?;
        let mut removed = 0;
        for chunk in audio_ids.chunks(DELETE_CHUNK) {
            let sql = format!(
                "DELETE FROM audios WHERE audio_id IN ({})",
                util::placeholders(chunk.len())
            );
            removed += tx
                .execute(&sql, params_from_iter(chunk.iter()))
                .map_err(map_sql_error)?;
        }
        tx.commit().map_err(map_sql_error)?;
        Ok(removed)
    }

    pub fn delete_unfingerprinted_audios(&self) -> Result<usize, IndexError> {
        let conn = self.pool.checkout()?;
        conn.execute("DELETE FROM audios WHERE fingerprinted = 0", [])
            .map_err(map_sql_error)
    }

    pub fn audio_count(&self) -> Result<u64, IndexError> {
        self.count("SELECT COUNT(*) FROM audios WHERE fingerprinted = 1")
    }

    pub fn fingerprint_count(&self) -> Result<u64, IndexError> {
        self.count("SELECT COUNT(*) FROM fingerprints")
    }

    /// Remove every audio, fingerprint and recognition record.
    pub fn empty(&self) -> Result<(), IndexError> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction().map_err(map_sql_error)?;
        tx.execute_batch(
            "DELETE FROM related_audios;
             DELETE FROM matched_information;
             DELETE FROM matched_audios;
             DELETE FROM fingerprints;
             DELETE FROM audios;",
        )
        .map_err(map_sql_error)?;
        schema::clear_parameters(&tx)?;
        tx.commit().map_err(map_sql_error)
    }

    fn count(&self, sql: &str) -> Result<u64, IndexError> {
        let conn = self.pool.checkout()?;
        let count: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(map_sql_error)?;
        Ok(count.max(0) as u64)
    }

    fn query_audios(&self, sql: &str, args: &[&str]) -> Result<Vec<AudioRecord>, IndexError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare_cached(sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), map_audio_row)
            .map_err(map_sql_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_sql_error)
    }
}

impl FingerprintIndex for SqliteIndex {
    fn insert_hashes(
        &self,
        audio_id: &str,
        hashes: &BTreeSet<Fingerprint>,
    ) -> Result<usize, IndexError> {
        let rows = hashes
            .iter()
            .map(|hash| Ok((normalize_digest(&hash.digest)?, i64::from(hash.offset))))
            .collect::<Result<Vec<_>, IndexError>>()?;
        let rows_per_statement = self.batch_size.min(MAX_INSERT_ROWS);
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction().map_err(map_sql_error)?;
        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let values = vec!["(?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT OR IGNORE INTO fingerprints (hash, audio_id, frame_offset) VALUES {values}"
            );
            let mut stmt = tx.prepare_cached(&sql).map_err(map_sql_error)?;
            let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() * 3);
            for (digest, offset) in chunk {
                bound.push(digest);
                bound.push(&audio_id);
                bound.push(offset);
            }
            inserted += stmt
                .execute(bound.as_slice())
                .map_err(map_sql_error)?;
        }
        tx.commit().map_err(map_sql_error)?;
        tracing::debug!(
            "Stored {inserted} new of {} hashes for audio {audio_id}",
            hashes.len()
        );
        Ok(inserted)
    }

    fn lookup(&self, hashes: &BTreeSet<Fingerprint>) -> Result<IndexLookup, IndexError> {
        let query_offsets = group_query_offsets(hashes)?;
        let digests: Vec<&String> = query_offsets.keys().collect();
        let mut result = IndexLookup::default();
        if digests.is_empty() {
            return Ok(result);
        }
        let conn = self.pool.checkout()?;
        for chunk in digests.chunks(self.batch_size) {
            let sql = format!(
                "SELECT f.hash, f.audio_id, f.frame_offset FROM fingerprints f \
                 JOIN audios a ON a.audio_id = f.audio_id \
                 WHERE a.fingerprinted = 1 AND f.hash IN ({})",
                util::placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(map_sql_error)?;
            let mut rows = stmt
                .query(params_from_iter(chunk.iter()))
                .map_err(map_sql_error)?;
            while let Some(row) = rows.next().map_err(map_sql_error)? {
                let digest: String = row.get(0).map_err(map_sql_error)?;
                let audio_id: String = row.get(1).map_err(map_sql_error)?;
                let stored_offset: i64 = row.get(2).map_err(map_sql_error)?;
                let Some(offsets) = query_offsets.get(&digest) else {
                    continue;
                };
                *result.dedup_hashes.entry(audio_id.clone()).or_default() += 1;
                for &query_offset in offsets {
                    result.matches.push(HashMatch {
                        audio_id: audio_id.clone(),
                        offset_difference: stored_offset - i64::from(query_offset),
                    });
                }
            }
        }
        Ok(result)
    }
}

fn map_audio_row(row: &Row<'_>) -> rusqlite::Result<AudioRecord> {
    Ok(AudioRecord {
        audio_id: row.get(0)?,
        audio_name: row.get(1)?,
        file_sha1: row.get(2)?,
        total_hashes: row.get::<_, i64>(3)?.max(0) as u64,
        fingerprinted: row.get::<_, i64>(4)? != 0,
        date_created: row.get(5)?,
    })
}
