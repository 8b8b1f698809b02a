//! Unit tests for fanpoll-rdbc error module

use fanpoll_rdbc::error::{Error, ErrorCategory};

#[test]
fn test_retriable_categories() {
    assert!(Error::connection("refused").is_retriable());
    assert!(Error::timeout("slow").is_retriable());
    assert!(!Error::query("syntax").is_retriable());
    assert!(!Error::schema("missing column").is_retriable());
    assert!(!Error::authentication("login failed").is_retriable());
}

#[test]
fn test_categories() {
    assert_eq!(Error::query("x").category(), ErrorCategory::Query);
    assert_eq!(Error::bulk_load("t", "x").category(), ErrorCategory::BulkLoad);
    assert_eq!(Error::config("x").category(), ErrorCategory::Configuration);
    assert_eq!(
        Error::type_conversion("x").category(),
        ErrorCategory::TypeConversion
    );
}

#[test]
fn test_display_messages() {
    assert_eq!(
        Error::bulk_load("results", "column count mismatch").to_string(),
        "bulk load into results failed: column count mismatch"
    );
    assert!(Error::query_with_sql("Invalid object name 'x'", "SELECT * FROM x")
        .to_string()
        .contains("Invalid object name 'x'"));
}

#[test]
fn test_connection_with_source() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err = Error::connection_with_source("cannot reach server", io);
    assert!(std::error::Error::source(&err).is_some());
}
