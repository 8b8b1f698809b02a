//! Error types for fanpoll-rdbc
//!
//! Provides granular error classification so callers can tell transient
//! connectivity problems from failures of a single statement:
//! - Retriable errors (connection, timeout)
//! - Non-retriable errors (query, schema, type conversion)

use std::fmt;
use thiserror::Error;

/// Result type for fanpoll-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Timeout errors (retriable)
    Timeout,
    /// Authentication failure
    Authentication,
    /// Configuration error
    Configuration,
    /// Schema-related errors (missing columns, bad identifiers)
    Schema,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Bulk load into a destination table failed
    BulkLoad,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for fanpoll-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query { message: String, sql: Option<String> },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (column missing, invalid identifier)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Bulk load failed
    #[error("bulk load into {table} failed: {message}")]
    BulkLoad { table: String, message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::BulkLoad { .. } => ErrorCategory::BulkLoad,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a bulk load error
    pub fn bulk_load(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BulkLoad {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Timeout => write!(f, "timeout"),
            Self::Authentication => write!(f, "authentication"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::BulkLoad => write!(f, "bulk_load"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());

        assert!(!ErrorCategory::Query.is_retriable());
        assert!(!ErrorCategory::Schema.is_retriable());
        assert!(!ErrorCategory::BulkLoad.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("Invalid object name 'nope'", "SELECT * FROM nope");
        assert!(err.to_string().contains("Invalid object name"));

        let err = Error::bulk_load("dbo.results", "column count mismatch");
        assert_eq!(
            err.to_string(),
            "bulk load into dbo.results failed: column count mismatch"
        );
    }
}
