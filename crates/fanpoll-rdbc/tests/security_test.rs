//! Unit tests for fanpoll-rdbc security module

use fanpoll_rdbc::security::{
    escape_string_literal, validate_object_name, validate_sql_identifier, Credentials,
};

#[test]
fn test_identifier_rules() {
    assert!(validate_sql_identifier("dtStart").is_ok());
    assert!(validate_sql_identifier(&"a".repeat(128)).is_ok());
    assert!(validate_sql_identifier(&"a".repeat(129)).is_err());
    assert!(validate_sql_identifier("has space").is_err());
}

#[test]
fn test_object_names() {
    assert!(validate_object_name("results").is_ok());
    assert!(validate_object_name("dbo.results").is_ok());
    assert!(validate_object_name("[stage].[results]").is_ok());
    assert!(validate_object_name("archive.dbo.results").is_ok());
    assert!(validate_object_name("a.b.c.d").is_err());
    assert!(validate_object_name("results; DROP TABLE log").is_err());
    assert!(validate_object_name("").is_err());
}

#[test]
fn test_escape_string_literal() {
    assert_eq!(escape_string_literal("it's"), "it''s");
    assert_eq!(escape_string_literal("plain"), "plain");
}

#[test]
fn test_credentials_redacted() {
    let creds = Credentials::new("reader", "hunter2");
    assert_eq!(creds.login(), "reader");
    assert_eq!(creds.expose_password(), "hunter2");
    assert!(!format!("{:?}", creds).contains("hunter2"));
}
