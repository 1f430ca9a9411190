#![allow(dead_code)]

pub mod env;
pub mod wav;

use std::path::Path;

use tracksleuth::config::Settings;

/// Small, fast settings shared by the integration tests.
pub fn test_settings(db_path: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.fingerprint.sample_rate = wav::TEST_SAMPLE_RATE;
    settings.fingerprint.window_size = 1_024;
    settings.index.database_path = Some(db_path.to_path_buf());
    settings.import.workers = 2;
    settings
}
