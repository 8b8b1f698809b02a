//! Control-store surface
//!
//! [`ControlStore`] is everything the engine asks of the control database:
//! the pending batch, log-row creation, the change-tracked write-back and
//! connections for destination loads. [`SqlControlStore`] implements it over
//! the [`Gatekeeper`]'s shared connection.

use async_trait::async_trait;
use fanpoll_rdbc::connection::Connection;
use fanpoll_rdbc::{Table, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::{ControlConfig, PollerConfig};
use crate::error::{PollError, Result};
use crate::gatekeeper::Gatekeeper;
use crate::model::{LogRow, Request, RequestId};

/// Columns returned for every inserted log row
pub const LOG_COLUMNS: [&str; 6] = ["logRowId", "reqId", "pointId", "dtStart", "dtFinish", "errMsg"];

/// Operations the engine needs from the control store
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Make sure the shared connection is open
    async fn ensure_open(&self) -> Result<()>;

    /// Replace the shared connection after a failure
    async fn reconnect(&self) -> Result<()>;

    /// Run the pending-work procedure and return its result sets
    async fn fetch_pending(&self) -> Result<Vec<Table>>;

    /// Create one log row per (request, point) pair and return them with
    /// their assigned `logRowId`s, in the [`LOG_COLUMNS`] layout
    async fn insert_log_rows(&self, pairs: &[(RequestId, String)]) -> Result<Table>;

    /// Persist timings and errors of log rows
    async fn update_log_rows(&self, rows: &[LogRow]) -> Result<u64>;

    /// Persist timings and errors of requests
    async fn update_requests(&self, rows: &[Request]) -> Result<u64>;

    /// Read the point connection-string template
    async fn point_connection_template(&self) -> Result<String>;

    /// The shared connection, for the one destination load allowed to use it
    async fn shared_connection(&self) -> Result<Arc<dyn Connection>>;

    /// A private connection for a destination load; the caller closes it
    async fn open_connection(&self) -> Result<Box<dyn Connection>>;
}

/// [`ControlStore`] backed by a SQL Server control database
pub struct SqlControlStore {
    gatekeeper: Arc<Gatekeeper>,
    control: ControlConfig,
    chunk_size: usize,
}

impl SqlControlStore {
    /// Create a store over a gatekeeper
    pub fn new(gatekeeper: Arc<Gatekeeper>, config: &PollerConfig) -> Self {
        Self {
            gatekeeper,
            control: config.control.clone(),
            chunk_size: config.insert_chunk_size,
        }
    }
}

/// `INSERT ... OUTPUT ... VALUES (@P1, @P2), (@P3, @P4), ...`
fn insert_statement(log_table: &str, rows: usize) -> String {
    let outputs = LOG_COLUMNS
        .iter()
        .map(|c| format!("inserted.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = (0..rows)
        .map(|i| format!("(@P{}, @P{})", 2 * i + 1, 2 * i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} (reqId, pointId) OUTPUT {} VALUES {}",
        log_table, outputs, values
    )
}

#[async_trait]
impl ControlStore for SqlControlStore {
    async fn ensure_open(&self) -> Result<()> {
        self.gatekeeper.ensure_open().await.map(|_| ())
    }

    async fn reconnect(&self) -> Result<()> {
        self.gatekeeper.reconnect().await.map(|_| ())
    }

    async fn fetch_pending(&self) -> Result<Vec<Table>> {
        let conn = self.gatekeeper.ensure_open().await?;
        let sql = format!("EXEC {}", self.control.procedure);
        Ok(conn.query_multiple(&sql, &[]).await?)
    }

    async fn insert_log_rows(&self, pairs: &[(RequestId, String)]) -> Result<Table> {
        let conn = self.gatekeeper.ensure_open().await?;
        let mut inserted = Table::new(LOG_COLUMNS);

        for chunk in pairs.chunks(self.chunk_size) {
            let sql = insert_statement(&self.control.log_table, chunk.len());
            let params: Vec<Value> = chunk
                .iter()
                .flat_map(|(request, point)| [Value::Int32(*request), Value::from(point.as_str())])
                .collect();

            let rows = conn.query(&sql, &params).await?;
            if rows.columns().len() != LOG_COLUMNS.len() {
                return Err(PollError::schema(format!(
                    "log insert returned {} columns, expected {}",
                    rows.columns().len(),
                    LOG_COLUMNS.len()
                )));
            }
            debug!(rows = rows.len(), "inserted log rows");
            for row in rows.rows() {
                inserted.push_row(row.clone());
            }
        }

        Ok(inserted)
    }

    async fn update_log_rows(&self, rows: &[LogRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.gatekeeper.ensure_open().await?;
        let sql = format!(
            "UPDATE {} SET dtStart = @P1, dtFinish = @P2, errMsg = @P3 WHERE logRowId = @P4",
            self.control.log_table
        );
        let statements: Vec<(String, Vec<Value>)> = rows
            .iter()
            .map(|row| {
                (
                    sql.clone(),
                    vec![
                        Value::from(row.started_at),
                        Value::from(row.finished_at),
                        Value::from(row.error.clone()),
                        Value::Int64(row.id),
                    ],
                )
            })
            .collect();
        Ok(conn.execute_batch(&statements).await?.iter().sum())
    }

    async fn update_requests(&self, rows: &[Request]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.gatekeeper.ensure_open().await?;
        let sql = format!(
            "UPDATE {} SET dtStart = @P1, dtFinish = @P2, errMsg = @P3 WHERE reqId = @P4",
            self.control.request_table
        );
        let statements: Vec<(String, Vec<Value>)> = rows
            .iter()
            .map(|row| {
                (
                    sql.clone(),
                    vec![
                        Value::from(row.started_at),
                        Value::from(row.finished_at),
                        Value::from(row.error.clone()),
                        Value::Int32(row.id),
                    ],
                )
            })
            .collect();
        Ok(conn.execute_batch(&statements).await?.iter().sum())
    }

    async fn point_connection_template(&self) -> Result<String> {
        let conn = self.gatekeeper.ensure_open().await?;
        let table = conn.query(&self.control.settings_query, &[]).await?;
        table
            .get(0, 0)
            .and_then(Value::as_string)
            .filter(|template| !template.trim().is_empty())
            .ok_or_else(|| PollError::schema("settings query returned no point connection template"))
    }

    async fn shared_connection(&self) -> Result<Arc<dyn Connection>> {
        self.gatekeeper.ensure_open().await
    }

    async fn open_connection(&self) -> Result<Box<dyn Connection>> {
        self.gatekeeper.open_private().await
    }
}
