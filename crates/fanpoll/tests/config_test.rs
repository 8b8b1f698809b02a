//! Loading configuration files from disk

use std::io::Write;
use std::time::Duration;

use fanpoll::{PollError, PollerConfig};

#[test]
fn test_from_file_overrides_and_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "poll_interval_secs: 15\n\
         point_concurrency: 4\n\
         probe:\n  attempts: 5\n\
         control:\n  procedure: ${{FANPOLL_TEST_PROC:-dbo.pendingWork}}\n"
    )
    .unwrap();

    let config = PollerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.poll_interval(), Duration::from_secs(15));
    assert_eq!(config.point_concurrency, 4);
    assert_eq!(config.probe.attempts, 5);
    assert_eq!(config.probe.port, 1433);
    assert_eq!(config.control.procedure, "dbo.pendingWork");
    assert_eq!(config.control.log_table, "log");
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = PollerConfig::from_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, PollError::Config(_)));
}
