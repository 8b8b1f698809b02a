//! Testing utilities for connections
//!
//! In-memory stand-ins for a database endpoint, so connection consumers can
//! be exercised without a server.
//!
//! # Example
//!
//! ```rust,ignore
//! use fanpoll_rdbc::testing::*;
//!
//! let factory = MockConnectionFactory::new();
//! factory
//!     .endpoint("10.0.0.1")
//!     .respond("SELECT", vec![Table::new(["n"]).with_row(vec![Value::Int32(1)])]);
//!
//! let conn = factory.connect(&ConnectionConfig::new("10.0.0.1")).await?;
//! let table = conn.query("SELECT 1 AS n", &[]).await?;
//! assert_eq!(table.len(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};
use crate::types::{Table, Value};

// ============================================================================
// In-flight Gauge
// ============================================================================

/// Counts calls in progress and remembers the highest count seen
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Endpoint
// ============================================================================

#[derive(Debug, Clone)]
enum MockResponse {
    Tables(Vec<Table>),
    Fail(String),
}

/// Shared state behind every connection opened to one address
#[derive(Debug)]
pub struct MockEndpoint {
    responses: Mutex<Vec<(String, MockResponse)>>,
    failing_tables: Mutex<HashSet<String>>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    bulk_loads: Mutex<Vec<(String, Table)>>,
    logins: Mutex<Vec<Option<String>>>,
    refuse: AtomicBool,
    valid: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    latency: Mutex<Duration>,
    in_flight: Arc<InFlight>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::with_gauge(Arc::default())
    }
}

impl MockEndpoint {
    fn with_gauge(in_flight: Arc<InFlight>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            failing_tables: Mutex::new(HashSet::new()),
            statements: Mutex::new(Vec::new()),
            bulk_loads: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            in_flight,
        }
    }

    /// Create a new endpoint
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer statements containing `pattern` with `tables`
    ///
    /// Patterns are checked in registration order; the first match wins.
    pub fn respond(&self, pattern: impl Into<String>, tables: Vec<Table>) -> &Self {
        self.responses
            .lock()
            .push((pattern.into(), MockResponse::Tables(tables)));
        self
    }

    /// Fail statements containing `pattern` with `message`
    pub fn fail(&self, pattern: impl Into<String>, message: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .push((pattern.into(), MockResponse::Fail(message.into())));
        self
    }

    /// Fail every bulk load into `table`
    pub fn fail_bulk_load(&self, table: impl Into<String>) -> &Self {
        self.failing_tables.lock().insert(table.into());
        self
    }

    /// Refuse (or accept again) new connections
    pub fn refuse_connections(&self, refuse: bool) -> &Self {
        self.refuse.store(refuse, Ordering::SeqCst);
        self
    }

    /// Mark open connections as broken (or healthy again)
    pub fn set_valid(&self, valid: bool) -> &Self {
        self.valid.store(valid, Ordering::SeqCst);
        self
    }

    /// Hold every query, execute and bulk load for `latency`
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = latency;
        self
    }

    /// Highest number of calls in progress at once
    ///
    /// Endpoints handed out by one [`MockConnectionFactory`] share a single
    /// count, so this is the peak across all of them.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, with its parameters
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().clone()
    }

    /// Number of executed statements containing `pattern`
    pub fn statement_count(&self, pattern: &str) -> usize {
        self.statements
            .lock()
            .iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .count()
    }

    /// Every bulk load so far, as (table, batch)
    pub fn bulk_loads(&self) -> Vec<(String, Table)> {
        self.bulk_loads.lock().clone()
    }

    /// All rows bulk-loaded into `table`, in arrival order
    pub fn rows_loaded_into(&self, table: &str) -> Vec<Vec<Value>> {
        self.bulk_loads
            .lock()
            .iter()
            .filter(|(t, _)| t == table)
            .flat_map(|(_, batch)| batch.rows().to_vec())
            .collect()
    }

    /// Logins presented by each successful connect
    pub fn logins(&self) -> Vec<Option<String>> {
        self.logins.lock().clone()
    }

    /// Number of connections opened
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    async fn busy(&self) -> InFlightGuard {
        let guard = self.in_flight.enter();
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Table>> {
        self.statements
            .lock()
            .push((sql.to_string(), params.to_vec()));

        let responses = self.responses.lock();
        match responses.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, MockResponse::Tables(tables))) => Ok(tables.clone()),
            Some((_, MockResponse::Fail(message))) => Err(Error::query_with_sql(message.clone(), sql)),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Mock Connection
// ============================================================================

/// A connection to a [`MockEndpoint`]
#[derive(Debug, Clone)]
pub struct MockConnection {
    endpoint: Arc<MockEndpoint>,
}

impl MockConnection {
    /// Connect directly to an endpoint
    pub fn new(endpoint: Arc<MockEndpoint>) -> Self {
        endpoint.opened.fetch_add(1, Ordering::SeqCst);
        Self { endpoint }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Table> {
        let _busy = self.endpoint.busy().await;
        Ok(self
            .endpoint
            .run(sql, params)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn query_multiple(&self, sql: &str, params: &[Value]) -> Result<Vec<Table>> {
        let _busy = self.endpoint.busy().await;
        self.endpoint.run(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let _busy = self.endpoint.busy().await;
        self.endpoint.run(sql, params).map(|_| 1)
    }

    async fn bulk_insert(&self, table: &str, batch: &Table) -> Result<u64> {
        let _busy = self.endpoint.busy().await;
        if self.endpoint.failing_tables.lock().contains(table) {
            return Err(Error::bulk_load(table, "mock bulk load failure"));
        }
        self.endpoint
            .bulk_loads
            .lock()
            .push((table.to_string(), batch.clone()));
        Ok(batch.len() as u64)
    }

    async fn is_valid(&self) -> bool {
        self.endpoint.valid.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.endpoint.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Mock Factory
// ============================================================================

/// Factory routing each connection string to its own [`MockEndpoint`]
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    endpoints: Mutex<HashMap<String, Arc<MockEndpoint>>>,
    in_flight: Arc<InFlight>,
}

impl MockConnectionFactory {
    /// Create a new factory
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Endpoint for a connection string, created on first use
    pub fn endpoint(&self, url: &str) -> Arc<MockEndpoint> {
        self.endpoints
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(MockEndpoint::with_gauge(self.in_flight.clone())))
            .clone()
    }

    /// Highest number of calls in progress at once across all endpoints
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let endpoint = self.endpoint(&config.url);
        if endpoint.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection(format!(
                "mock endpoint '{}' refused the connection",
                config.url
            )));
        }
        endpoint
            .logins
            .lock()
            .push(config.credentials.as_ref().map(|c| c.login().to_string()));
        Ok(Box::new(MockConnection::new(endpoint)))
    }
}
