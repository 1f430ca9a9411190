mod support;

use support::{
    env::ConfigHomeGuard,
    test_settings,
    wav::{TEST_SAMPLE_RATE, synthetic_track, write_test_wav},
};
use tempfile::tempdir;
use tracksleuth::{Engine, FingerprintOutcome, app_dirs};

#[test]
fn directory_import_stores_new_files_and_skips_known_ones() {
    let dir = tempdir().unwrap();
    let library = dir.path().join("library");
    for (idx, name) in ["a.wav", "nested/b.WAV", "nested/deeper/c.wav"].iter().enumerate() {
        write_test_wav(
            &library.join(name),
            TEST_SAMPLE_RATE,
            &[synthetic_track(100 + idx as u64, 4.0, TEST_SAMPLE_RATE)],
        );
    }
    std::fs::write(library.join("notes.txt"), b"not audio").unwrap();

    let mut engine = Engine::open(test_settings(&dir.path().join("index.db"))).unwrap();
    let first = engine.fingerprint_directory(&library, &[], Some(3)).unwrap();
    assert_eq!(first.discovered, 3);
    assert_eq!(first.stored, 3);
    assert!(first.failed.is_empty());
    assert_eq!(first.timed_out, 0);

    let mut names: Vec<_> = engine
        .fingerprinted_audios()
        .unwrap()
        .into_iter()
        .map(|audio| audio.audio_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);

    let second = engine.fingerprint_directory(&library, &[], Some(2)).unwrap();
    assert_eq!(second.stored, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(engine.index().audio_count().unwrap(), 3);
}

#[test]
fn undecodable_files_are_reported_without_stopping_the_batch() {
    let dir = tempdir().unwrap();
    let library = dir.path().join("library");
    write_test_wav(
        &library.join("good.wav"),
        TEST_SAMPLE_RATE,
        &[synthetic_track(200, 4.0, TEST_SAMPLE_RATE)],
    );
    std::fs::write(library.join("broken.wav"), b"RIFF? not really").unwrap();

    let mut engine = Engine::open(test_settings(&dir.path().join("index.db"))).unwrap();
    let summary = engine.fingerprint_directory(&library, &[], Some(2)).unwrap();
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].path.ends_with("broken.wav"));
    assert_eq!(engine.index().audio_count().unwrap(), 1);
}

#[test]
fn identical_files_in_one_batch_are_stored_once() {
    let dir = tempdir().unwrap();
    let library = dir.path().join("library");
    let samples = synthetic_track(300, 4.0, TEST_SAMPLE_RATE);
    write_test_wav(&library.join("original.wav"), TEST_SAMPLE_RATE, &[samples.clone()]);
    write_test_wav(&library.join("copy.wav"), TEST_SAMPLE_RATE, &[samples]);

    let mut engine = Engine::open(test_settings(&dir.path().join("index.db"))).unwrap();
    let summary = engine.fingerprint_directory(&library, &[], Some(2)).unwrap();
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(engine.fingerprinted().len(), 1);
}

#[test]
fn extension_filter_limits_the_scan() {
    let dir = tempdir().unwrap();
    let library = dir.path().join("library");
    write_test_wav(
        &library.join("keep.wav"),
        TEST_SAMPLE_RATE,
        &[synthetic_track(400, 3.0, TEST_SAMPLE_RATE)],
    );
    write_test_wav(
        &library.join("ignored.wave"),
        TEST_SAMPLE_RATE,
        &[synthetic_track(401, 3.0, TEST_SAMPLE_RATE)],
    );
    let mut engine = Engine::open(test_settings(&dir.path().join("index.db"))).unwrap();
    let summary = engine
        .fingerprint_directory(&library, &["wav".to_string()], Some(1))
        .unwrap();
    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.stored, 1);
}

#[test]
fn single_file_import_respects_custom_name_and_content_hash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("take-3.wav");
    write_test_wav(&path, TEST_SAMPLE_RATE, &[synthetic_track(500, 4.0, TEST_SAMPLE_RATE)]);
    let mut engine = Engine::open(test_settings(&dir.path().join("index.db"))).unwrap();

    let outcome = engine.fingerprint_file(&path, Some("Final Mix")).unwrap();
    let FingerprintOutcome::Stored { audio_id, hashes, .. } = outcome else {
        panic!("expected a stored outcome");
    };
    assert!(hashes > 0);
    let record = engine.index().audio_by_id(&audio_id).unwrap().unwrap();
    assert_eq!(record.audio_name, "Final Mix");
    assert_eq!(record.total_hashes, hashes as u64);
    assert_eq!(
        record.file_sha1,
        tracksleuth::audio::content_hash(&path).unwrap()
    );
    assert_eq!(engine.source_audios_by_name("Final Mix").unwrap().len(), 1);

    let again = engine.fingerprint_file(&path, None).unwrap();
    assert!(matches!(again, FingerprintOutcome::Skipped { .. }));
}

#[test]
fn default_index_lives_in_the_app_directory() {
    let dir = tempdir().unwrap();
    let _guard = ConfigHomeGuard::set(dir.path().to_path_buf());
    let mut settings = test_settings(&dir.path().join("unused.db"));
    settings.index.database_path = None;

    let engine = Engine::open(settings).unwrap();
    let expected = dir.path().join(app_dirs::APP_DIR_NAME).join(app_dirs::INDEX_FILE_NAME);
    assert_eq!(engine.index().path(), expected.as_path());
    assert!(expected.exists());
}
