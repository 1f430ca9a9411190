use rusqlite::{Connection, OptionalExtension, params};

use super::IndexError;
use super::util::map_sql_error;

const PARAMETERS_KEY: &str = "fingerprint_parameters";

pub(super) fn apply_schema(connection: &Connection) -> Result<(), IndexError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS audios (
                audio_id TEXT PRIMARY KEY,
                audio_name TEXT NOT NULL,
                fingerprinted INTEGER NOT NULL DEFAULT 0,
                file_sha1 TEXT NOT NULL,
                total_hashes INTEGER NOT NULL DEFAULT 0,
                date_created TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_audios_file_sha1 ON audios (file_sha1);
             CREATE INDEX IF NOT EXISTS idx_audios_name ON audios (audio_name);
             CREATE TABLE IF NOT EXISTS fingerprints (
                hash TEXT NOT NULL,
                audio_id TEXT NOT NULL REFERENCES audios(audio_id) ON DELETE CASCADE,
                frame_offset INTEGER NOT NULL,
                UNIQUE(audio_id, frame_offset, hash)
             );
             CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints (hash);
             CREATE TABLE IF NOT EXISTS matched_audios (
                audio_id TEXT PRIMARY KEY,
                audio_name TEXT NOT NULL,
                file_sha1 TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT '',
                storage_path TEXT NOT NULL DEFAULT '',
                date_created TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_matched_audios_file_sha1
                ON matched_audios (file_sha1);
             CREATE TABLE IF NOT EXISTS matched_information (
                matched_id TEXT PRIMARY KEY,
                audio_id TEXT NOT NULL REFERENCES matched_audios(audio_id) ON DELETE CASCADE,
                audio_name TEXT NOT NULL,
                total_time REAL NOT NULL,
                fingerprint_time REAL NOT NULL,
                query_time REAL NOT NULL,
                align_time REAL NOT NULL,
                date_created TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS related_audios (
                related_id TEXT PRIMARY KEY,
                matched_id TEXT NOT NULL
                    REFERENCES matched_information(matched_id) ON DELETE CASCADE,
                match_rank INTEGER NOT NULL,
                related_audio_id TEXT NOT NULL REFERENCES audios(audio_id) ON DELETE CASCADE,
                related_audio_name TEXT NOT NULL,
                input_total_hashes INTEGER NOT NULL,
                fingerprinted_hashes_in_db INTEGER NOT NULL,
                hashes_matched_in_input INTEGER NOT NULL,
                input_confidence REAL NOT NULL,
                fingerprinted_confidence REAL NOT NULL,
                frame_offset INTEGER NOT NULL,
                offset_seconds REAL NOT NULL,
                file_sha1 TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_related_audios_matched_id
                ON related_audios (matched_id, match_rank);",
        )
        .map_err(map_sql_error)
}

/// Record `parameters` on first use and reject later opens that disagree.
///
/// Stored offsets and digests are only comparable when produced by the same
/// sample rate, window, hop and digest width.
pub(super) fn check_parameters(connection: &Connection, parameters: &str) -> Result<(), IndexError> {
    let stored: Option<String> = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![PARAMETERS_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql_error)?;
    match stored {
        Some(stored) if stored == parameters => Ok(()),
        Some(stored) => Err(IndexError::ParameterMismatch {
            stored,
            requested: parameters.to_string(),
        }),
        None => {
            connection
                .execute(
                    "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                    params![PARAMETERS_KEY, parameters],
                )
                .map_err(map_sql_error)?;
            Ok(())
        }
    }
}

pub(super) fn clear_parameters(connection: &Connection) -> Result<(), IndexError> {
    connection
        .execute("DELETE FROM metadata WHERE key = ?1", params![PARAMETERS_KEY])
        .map_err(map_sql_error)?;
    Ok(())
}
