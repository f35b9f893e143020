//! Tests for `src/logging.rs`.

use std::path::PathBuf;

use socialconnector::logging::{install, LogSink, LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn only_long_running_commands_write_files() {
    let dir = PathBuf::from("/tmp/logs");
    assert_eq!(
        LogSink::select(true, Some(dir.clone())),
        LogSink::ConsoleAndFiles(dir.clone())
    );
    assert_eq!(LogSink::select(false, Some(dir)), LogSink::Console);
    assert_eq!(LogSink::select(true, None), LogSink::Console);
}

#[test]
fn file_sink_creates_dir_and_rotated_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can be installed once per process, so this is
    // the only test in this binary that installs one.
    let guard = install(&LogSink::ConsoleAndFiles(logs_dir.clone()), "debug")
        .expect("logging should initialise");
    tracing::info!(platform = "loopback", "hello from the logging test");
    drop(guard);

    assert!(logs_dir.exists(), "logs directory should be created");
    let entries: Vec<String> = std::fs::read_dir(&logs_dir)
        .expect("logs dir readable")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|name| name.starts_with(LOG_FILE_PREFIX)));
}
