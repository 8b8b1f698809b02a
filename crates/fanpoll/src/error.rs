//! Error types for fanpoll
//!
//! Only iteration-level failures travel through these types. Failures that
//! can be isolated to a point, a (request, point) pair or a request are
//! recorded as text on the matching row instead.

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, PollError>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum PollError {
    /// Database error from the control store or a point
    #[error(transparent)]
    Database(#[from] fanpoll_rdbc::Error),

    /// A point-list file could not be read
    #[error("cannot read point list '{path}': {source}")]
    PointList {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A loaded result set does not have the expected shape
    #[error("unexpected result set: {0}")]
    Schema(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A point did not answer any reachability probe
    #[error("point '{point}' at {address} did not answer {attempts} reachability probes")]
    Unreachable {
        point: String,
        address: String,
        attempts: u32,
    },

    /// A worker task died before reporting
    #[error("worker failed: {0}")]
    Worker(String),
}

impl PollError {
    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this is a connectivity problem with a database
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_retriable())
    }
}
