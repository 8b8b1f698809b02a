//! Testing utilities for the engine
//!
//! - [`MockControlStore`]: queued batches, generated log row ids, recorded
//!   inserts and write-backs, destination loads into a mock endpoint
//! - [`MockProber`]: per-address reachability
//! - [`BatchFixture`]: builds the four result sets of a pending batch
//!
//! # Example
//!
//! ```rust,ignore
//! use fanpoll::testing::*;
//!
//! let store = MockControlStore::new();
//! store.push_batch(
//!     BatchFixture::new()
//!         .request(1, "SELECT * FROM sales", "daily_sales")
//!         .point_list("/lists/north.txt", "poller", "secret")
//!         .build(),
//! );
//! ```

use async_trait::async_trait;
use fanpoll_rdbc::connection::Connection;
use fanpoll_rdbc::testing::{MockConnection, MockEndpoint};
use fanpoll_rdbc::{Table, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::model::{LogRow, LogRowId, Request, RequestId};
use crate::probe::Prober;
use crate::store::{ControlStore, LOG_COLUMNS};

// ============================================================================
// Batch Fixture
// ============================================================================

/// Builder for the result sets the pending-work procedure returns
#[derive(Debug, Clone)]
pub struct BatchFixture {
    requests: Table,
    params: Table,
    log: Table,
    lists: Table,
}

impl Default for BatchFixture {
    fn default() -> Self {
        Self {
            requests: Table::new(["reqId", "text", "dstTable"]),
            params: Table::new(["reqId", "name", "typeId", "value"]),
            log: Table::new(LOG_COLUMNS),
            lists: Table::new(["path", "login", "password"]),
        }
    }
}

impl BatchFixture {
    /// Start an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request
    pub fn request(mut self, id: RequestId, query: &str, destination: &str) -> Self {
        self.requests.push_row(vec![
            Value::Int32(id),
            Value::from(query),
            Value::from(destination),
        ]);
        self
    }

    /// Add a parameter to a request
    pub fn param(mut self, request: RequestId, name: &str, type_code: i64, value: Value) -> Self {
        self.params.push_row(vec![
            Value::Int32(request),
            Value::from(name),
            Value::Int64(type_code),
            value,
        ]);
        self
    }

    /// Add a pending log row left over from an earlier iteration
    pub fn log_row(mut self, id: LogRowId, request: RequestId, point: &str) -> Self {
        self.log.push_row(vec![
            Value::Int64(id),
            Value::Int32(request),
            Value::from(point),
            Value::Null,
            Value::Null,
            Value::Null,
        ]);
        self
    }

    /// Add a point-list descriptor
    pub fn point_list(mut self, path: &str, login: &str, password: &str) -> Self {
        self.lists.push_row(vec![
            Value::from(path),
            Value::from(login),
            Value::from(password),
        ]);
        self
    }

    /// The four result sets
    pub fn build(self) -> Vec<Table> {
        vec![self.requests, self.params, self.log, self.lists]
    }
}

// ============================================================================
// Mock Control Store
// ============================================================================

/// In-memory [`ControlStore`]
///
/// Batches are served in the order they were pushed; an empty queue means
/// no pending work. Destination loads go to [`MockControlStore::destination`].
pub struct MockControlStore {
    batches: Mutex<VecDeque<std::result::Result<Vec<Table>, String>>>,
    next_log_row_id: AtomicI64,
    inserts: Mutex<Vec<Vec<(RequestId, String)>>>,
    log_updates: Mutex<Vec<LogRow>>,
    request_updates: Mutex<Vec<Request>>,
    failing_updates: Mutex<Option<String>>,
    template: Mutex<Option<String>>,
    destination: Arc<MockEndpoint>,
    shared: Mutex<Option<Arc<dyn Connection>>>,
    private_opened: AtomicUsize,
    fetches: AtomicUsize,
    reconnects: AtomicUsize,
}

impl MockControlStore {
    /// Create a store; generated log row ids start at 1000
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(VecDeque::new()),
            next_log_row_id: AtomicI64::new(1000),
            inserts: Mutex::new(Vec::new()),
            log_updates: Mutex::new(Vec::new()),
            request_updates: Mutex::new(Vec::new()),
            failing_updates: Mutex::new(None),
            template: Mutex::new(Some("{0}".into())),
            destination: MockEndpoint::new(),
            shared: Mutex::new(None),
            private_opened: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
        })
    }

    /// Queue a batch
    pub fn push_batch(&self, sets: Vec<Table>) {
        self.batches.lock().push_back(Ok(sets));
    }

    /// Queue a failing fetch
    pub fn push_failure(&self, message: impl Into<String>) {
        self.batches.lock().push_back(Err(message.into()));
    }

    /// Fail every write-back with `message`
    pub fn fail_updates(&self, message: impl Into<String>) {
        *self.failing_updates.lock() = Some(message.into());
    }

    /// Set (or clear) the point connection template
    pub fn set_template(&self, template: Option<&str>) {
        *self.template.lock() = template.map(str::to_string);
    }

    /// Endpoint receiving destination loads
    pub fn destination(&self) -> Arc<MockEndpoint> {
        self.destination.clone()
    }

    /// Pairs passed to each log-row insert
    pub fn inserts(&self) -> Vec<Vec<(RequestId, String)>> {
        self.inserts.lock().clone()
    }

    /// Every log row written back, latest last
    pub fn log_updates(&self) -> Vec<LogRow> {
        self.log_updates.lock().clone()
    }

    /// Latest write-back of each log row
    pub fn log_state(&self) -> HashMap<LogRowId, LogRow> {
        self.log_updates
            .lock()
            .iter()
            .map(|row| (row.id, row.clone()))
            .collect()
    }

    /// Every request written back, latest last
    pub fn request_updates(&self) -> Vec<Request> {
        self.request_updates.lock().clone()
    }

    /// Private connections opened for destination loads
    pub fn private_connections_opened(&self) -> usize {
        self.private_opened.load(Ordering::SeqCst)
    }

    /// Pending-work fetches so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Reconnects so far
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn check_updates(&self) -> Result<()> {
        match self.failing_updates.lock().as_ref() {
            Some(message) => Err(fanpoll_rdbc::Error::connection(message.clone()).into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlStore for MockControlStore {
    async fn ensure_open(&self) -> Result<()> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_pending(&self) -> Result<Vec<Table>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.batches.lock().pop_front() {
            Some(Ok(sets)) => Ok(sets),
            Some(Err(message)) => Err(fanpoll_rdbc::Error::connection(message).into()),
            None => Ok(Vec::new()),
        }
    }

    async fn insert_log_rows(&self, pairs: &[(RequestId, String)]) -> Result<Table> {
        self.inserts.lock().push(pairs.to_vec());
        let mut table = Table::new(LOG_COLUMNS);
        for (request, point) in pairs {
            let id = self.next_log_row_id.fetch_add(1, Ordering::SeqCst);
            table.push_row(vec![
                Value::Int64(id),
                Value::Int32(*request),
                Value::from(point.as_str()),
                Value::Null,
                Value::Null,
                Value::Null,
            ]);
        }
        Ok(table)
    }

    async fn update_log_rows(&self, rows: &[LogRow]) -> Result<u64> {
        self.check_updates()?;
        self.log_updates.lock().extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn update_requests(&self, rows: &[Request]) -> Result<u64> {
        self.check_updates()?;
        self.request_updates.lock().extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn point_connection_template(&self) -> Result<String> {
        self.template
            .lock()
            .clone()
            .ok_or_else(|| crate::error::PollError::schema("no point connection template"))
    }

    async fn shared_connection(&self) -> Result<Arc<dyn Connection>> {
        let mut shared = self.shared.lock();
        let conn = shared
            .get_or_insert_with(|| Arc::new(MockConnection::new(self.destination.clone())));
        Ok(conn.clone())
    }

    async fn open_connection(&self) -> Result<Box<dyn Connection>> {
        self.private_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection::new(self.destination.clone())))
    }
}

// ============================================================================
// Mock Prober
// ============================================================================

/// [`Prober`] with scripted reachability
#[derive(Debug, Default)]
pub struct MockProber {
    unreachable: Mutex<HashSet<String>>,
    failures_left: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl MockProber {
    /// Every address reachable
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Never answer probes for `address`
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().insert(address.to_string());
    }

    /// Fail the first `failures` probes of `address`
    pub fn fail_first(&self, address: &str, failures: u32) {
        self.failures_left
            .lock()
            .insert(address.to_string(), failures);
    }

    /// Probes sent to `address`
    pub fn attempts(&self, address: &str) -> u32 {
        self.attempts.lock().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, address: &str) -> bool {
        *self.attempts.lock().entry(address.to_string()).or_insert(0) += 1;
        if self.unreachable.lock().contains(address) {
            return false;
        }
        let mut failures = self.failures_left.lock();
        match failures.get_mut(address) {
            Some(left) if *left > 0 => {
                *left -= 1;
                false
            }
            _ => true,
        }
    }
}
