use std::path::Path;

use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use super::IndexError;

/// Translate rusqlite errors, folding contention and open failures into `Unavailable`.
pub(super) fn map_sql_error(err: rusqlite::Error) -> IndexError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, message)
            if matches!(
                sql_err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ) =>
        {
            IndexError::Unavailable(message.unwrap_or_else(|| sql_err.to_string()))
        }
        other => IndexError::Sql(other),
    }
}

pub(super) fn create_parent_if_needed(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|source| IndexError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// `?, ?, ?` style placeholder list for `count` values.
pub(super) fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 3);
    for idx in 0..count {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}

pub(super) fn new_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(super) fn now_timestamp() -> String {
    const FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(FORMAT).unwrap_or_else(|_| now.unix_timestamp().to_string())
}
