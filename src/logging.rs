//! Tracing setup for the `tracksleuth` binary.
//!
//! Command output goes to stdout as JSON, so log lines go to stderr and to a
//! per-run file under the app's `logs` directory. Only the newest
//! `MAX_LOG_FILES` run logs are kept.

use std::{
    fs::{self, OpenOptions},
    io::IsTerminal,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};

const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "tracksleuth";
/// Filter override read before `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "TRACKSLEUTH_LOG";
const DEFAULT_FILTER: &str = "tracksleuth=info,warn";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("No log directory: {0}")]
    AppDir(#[from] AppDirError),
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> LoggingError {
    let path = path.to_path_buf();
    move |source| LoggingError::Io {
        action,
        path,
        source,
    }
}

/// Install the stderr + run-file subscriber. Later calls are no-ops.
///
/// Failures are returned so `main` can carry on with no logging.
pub fn init() -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let log_dir = app_dirs::logs_dir()?;
    let log_file_name = run_log_name(now_local_or_utc());
    let log_path = log_dir.join(&log_file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(io_error("create log file", &log_path))?;
    prune_run_logs(&log_dir, MAX_LOG_FILES)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(rolling::never(&log_dir, log_file_name));
    let timer = build_timer();
    let stderr_layer = fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_timer(timer.clone())
        .with_writer(std::io::stderr);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_timer(timer)
        .with_writer(file_writer);

    tracing::subscriber::set_global_default(
        Registry::default()
            .with(env_filter(std::env::var(LOG_FILTER_ENV).ok().as_deref()))
            .with(stderr_layer)
            .with(file_layer),
    )?;
    let _ = LOG_GUARD.set(guard);

    tracing::debug!("Run log at {}", log_path.display());
    Ok(())
}

/// `TRACKSLEUTH_LOG`, then `RUST_LOG`, then info for this crate and warn elsewhere.
fn env_filter(explicit: Option<&str>) -> EnvFilter {
    explicit
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Delete the oldest `tracksleuth_*.log` files so at most `keep` remain.
fn prune_run_logs(dir: &Path, keep: usize) -> Result<usize, LoggingError> {
    let mut runs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(io_error("read log directory", dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_run_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    runs.sort();
    let excess = runs.len().saturating_sub(keep);
    for (_, path) in runs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(io_error("remove old log", &path))?;
    }
    Ok(excess)
}

fn is_run_log(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|ext| ext.to_str()) == Some("log")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

fn run_log_name(now: OffsetDateTime) -> String {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now
        .format(NAME_FORMAT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("{LOG_FILE_PREFIX}_{stamp}.log")
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn run_log_name_has_timestamp_and_prefix() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(run_log_name(fixed), "tracksleuth_2023-11-14_22-13-20.log");
    }

    #[test]
    fn prune_only_touches_run_logs() {
        let dir = tempdir().unwrap();
        for idx in 0..12 {
            fs::write(dir.path().join(format!("tracksleuth_{idx}.log")), "").unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        fs::write(dir.path().join("other_tool.log"), "keep").unwrap();

        assert_eq!(prune_run_logs(dir.path(), 10).unwrap(), 2);
        let remaining_runs = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_run_log(&entry.path()))
            .count();
        assert_eq!(remaining_runs, 10);
        assert!(!dir.path().join("tracksleuth_0.log").exists());
        assert!(!dir.path().join("tracksleuth_1.log").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("other_tool.log").exists());
    }

    #[test]
    fn prune_reports_unreadable_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent");
        let err = prune_run_logs(&missing, 3).unwrap_err();
        assert!(matches!(err, LoggingError::Io { action: "read log directory", .. }));
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn explicit_filter_directives_are_used() {
        let filter = env_filter(Some("tracksleuth=trace")).to_string();
        assert!(filter.contains("tracksleuth=trace"));
    }
}
