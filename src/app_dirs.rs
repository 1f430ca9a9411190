//! Application directory helpers anchored to a single `.tracksleuth` folder.
//!
//! Config, logs and the default fingerprint index live here. The root defaults
//! to the OS config directory and can be redirected with
//! `TRACKSLEUTH_CONFIG_HOME` (tests, portable setups) or a process override.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".tracksleuth";
/// Environment variable that relocates the config base directory.
pub const CONFIG_HOME_ENV: &str = "TRACKSLEUTH_CONFIG_HOME";
/// File name of the default SQLite fingerprint index.
pub const INDEX_FILE_NAME: &str = "index.db";

static APP_ROOT_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.tracksleuth` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let path = match app_root_override() {
        Some(path) => path,
        None => config_base_dir()
            .ok_or(AppDirError::NoBaseDir)?
            .join(APP_DIR_NAME),
    };
    ensure_dir(path)
}

/// Return the logs directory inside the app root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Default location of the fingerprint index database.
pub fn default_index_path() -> Result<PathBuf, AppDirError> {
    Ok(app_root_dir()?.join(INDEX_FILE_NAME))
}

/// Point the app root at an explicit directory for the rest of the process.
pub fn set_app_root_override(path: PathBuf) -> Result<(), AppDirError> {
    let path = ensure_dir(path)?;
    if let Ok(mut guard) = APP_ROOT_OVERRIDE.lock() {
        *guard = Some(path);
    }
    Ok(())
}

fn app_root_override() -> Option<PathBuf> {
    APP_ROOT_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
}

fn config_base_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
fn clear_app_root_override() {
    let mut guard = APP_ROOT_OVERRIDE
        .lock()
        .expect("app root override mutex poisoned");
    *guard = None;
}
