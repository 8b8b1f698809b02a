//! # fanpoll-rdbc
//!
//! Relational database connectivity for the fanpoll polling orchestrator.
//!
//! This crate provides the narrow surface the orchestrator needs from a
//! database: run a statement and get tables back, bulk-load a table, and open
//! connections from a connection string plus out-of-band credentials.
//!
//! ## Features
//!
//! - **Value model**: scalar `Value`s and positional `Table`s
//! - **Typed parameters**: declared types resolved from stored type codes
//! - **Named binding**: `@name` parameters bound through `sp_executesql`
//! - **Capability traits**: `Connection` / `ConnectionFactory`, so callers are
//!   agnostic of the backend
//! - **SQL Server**: tiberius-based backend with bulk load
//! - **Testing**: in-memory mock endpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fanpoll_rdbc::prelude::*;
//!
//! let factory = SqlServerConnectionFactory;
//! let config = ConnectionConfig::new("Server=10.0.0.5;Database=sales")
//!     .with_credentials(Credentials::new("reader", "secret"))
//!     .with_query_timeout(Duration::from_secs(300));
//!
//! let conn = factory.connect(&config).await?;
//! let bound = bind_named("SELECT * FROM orders WHERE day = @day", &params)?;
//! let table = conn.query(&bound.sql, &bound.values).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlserver` (default) - SQL Server support via tiberius

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod params;
pub mod security;
pub mod testing;
pub mod types;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{Param, ParamType, Table, Value};

    pub use crate::connection::{
        redact_connection_string, Connection, ConnectionConfig, ConnectionFactory,
    };

    pub use crate::params::{bind_named, BoundQuery};

    pub use crate::security::{
        escape_string_literal, validate_object_name, validate_sql_identifier, Credentials,
    };

    #[cfg(feature = "sqlserver")]
    pub use crate::sqlserver::{SqlServerConnection, SqlServerConnectionFactory};
}

pub use error::{Error, Result};
pub use types::{Table, Value};
