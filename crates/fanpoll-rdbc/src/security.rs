//! Security utilities for fanpoll-rdbc.
//!
//! Provides:
//! - Identifier validation for parameter names, table names and procedures
//! - String literal escaping for SQL string contexts
//! - `Credentials`: a login/password pair whose password never reaches logs

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Validate a single SQL identifier (parameter name, column, table part).
///
/// - Must not be empty
/// - Maximum 128 characters (SQL Server `sysname`)
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use fanpoll_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("requests").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE log--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 128 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 128)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Validate a possibly qualified object name such as `results`,
/// `dbo.results` or `[stage].[results]`.
///
/// Each dot-separated part is validated with [`validate_sql_identifier`]
/// after removing one pair of surrounding brackets; at most three parts
/// (database.schema.object) are accepted.
pub fn validate_object_name(name: &str) -> crate::Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 {
        return Err(Error::config(format!(
            "Invalid object name '{}': too many qualifiers",
            name
        )));
    }
    for part in parts {
        let bare = part
            .strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .unwrap_or(part);
        validate_sql_identifier(bare)
            .map_err(|_| Error::schema(format!("Invalid object name '{}'", name)))?;
    }
    Ok(())
}

/// Escape a string value for safe placement inside an `N'...'` literal.
///
/// Replaces `'` with `''`. Used only for statement text that must itself be
/// passed as a string (the body handed to `sp_executesql`); values are
/// always bound as protocol parameters.
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Login and password used to open a connection
///
/// The password is held in a [`SecretString`] and is zeroized when the last
/// owner drops it. `Debug` never prints it.
#[derive(Clone)]
pub struct Credentials {
    login: String,
    password: SecretString,
}

impl Credentials {
    /// Create credentials
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: SecretString::new(password.into().into_boxed_str()),
        }
    }

    /// Login name
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Expose the password.
    ///
    /// Use sparingly - only when handing it to the authentication handshake.
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_qualified() {
        assert!(validate_object_name("results").is_ok());
        assert!(validate_object_name("dbo.results").is_ok());
        assert!(validate_object_name("[stage].[results_2024]").is_ok());
        assert!(validate_object_name("db.dbo.results").is_ok());
    }

    #[test]
    fn test_object_name_rejects_injection() {
        assert!(validate_object_name("results; DROP TABLE log").is_err());
        assert!(validate_object_name("a.b.c.d").is_err());
        assert!(validate_object_name("dbo.").is_err());
        assert!(validate_object_name("[dbo").is_err());
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("it's"), "it''s");
        assert_eq!(escape_string_literal("plain"), "plain");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("poller", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("poller"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(creds.expose_password(), "hunter2");
    }
}
