//! In-memory model of one batch
//!
//! Rows are addressed by stable keys (`reqId`, `logRowId`) and only their
//! fields change after loading, so concurrent phases never restructure a
//! table. [`TrackedTable`] remembers which rows changed so only those are
//! written back.

use chrono::NaiveDateTime;
use fanpoll_rdbc::security::Credentials;
use indexmap::IndexMap;
use std::fmt;
use std::hash::Hash;

/// Request identity (`reqId`)
pub type RequestId = i32;

/// Log row identity (`logRowId`), assigned by the control store
pub type LogRowId = i64;

/// Current local time, the clock every timestamp in the batch uses
pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// A row with a stable identity
pub trait Keyed {
    /// Key type
    type Key: Copy + Eq + Hash + fmt::Debug;

    /// Identity of this row
    fn key(&self) -> Self::Key;
}

/// A parameterized query awaiting execution against points
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub query: String,
    /// Destination table for results
    pub destination: String,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub error: Option<String>,
}

impl Keyed for Request {
    type Key = RequestId;

    fn key(&self) -> RequestId {
        self.id
    }
}

/// A stored parameter, not yet resolved to a declared type
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRow {
    pub name: String,
    /// Type code as stored in the control store
    pub type_code: i64,
    pub value: fanpoll_rdbc::Value,
}

/// The record of running one request at one point
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub id: LogRowId,
    pub request: RequestId,
    pub point: String,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub error: Option<String>,
}

impl LogRow {
    /// Whether the row still waits for execution
    pub fn is_pending(&self) -> bool {
        self.started_at.is_none()
    }
}

impl Keyed for LogRow {
    type Key = LogRowId;

    fn key(&self) -> LogRowId {
        self.id
    }
}

/// A point-list file and the credentials for every point it names
#[derive(Debug, Clone)]
pub struct PointList {
    pub path: String,
    pub credentials: Credentials,
}

/// A keyed table that tracks which rows were modified since loading
#[derive(Debug)]
pub struct TrackedTable<T: Keyed> {
    rows: IndexMap<T::Key, (T, bool)>,
}

impl<T: Keyed> Default for TrackedTable<T> {
    fn default() -> Self {
        Self {
            rows: IndexMap::new(),
        }
    }
}

impl<T: Keyed> TrackedTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unmodified row; a duplicate key is rejected and returned
    pub fn insert(&mut self, row: T) -> std::result::Result<(), T::Key> {
        let key = row.key();
        if self.rows.contains_key(&key) {
            return Err(key);
        }
        self.rows.insert(key, (row, false));
        Ok(())
    }

    /// Look up a row
    pub fn get(&self, key: T::Key) -> Option<&T> {
        self.rows.get(&key).map(|(row, _)| row)
    }

    /// Whether a row exists
    pub fn contains(&self, key: T::Key) -> bool {
        self.rows.contains_key(&key)
    }

    /// Change a row in place and mark it modified; false if absent
    pub fn update<F>(&mut self, key: T::Key, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.rows.get_mut(&key) {
            Some((row, modified)) => {
                f(row);
                *modified = true;
                true
            }
            None => false,
        }
    }

    /// Rows in load order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values().map(|(row, _)| row)
    }

    /// Keys in load order
    pub fn keys(&self) -> impl Iterator<Item = T::Key> + '_ {
        self.rows.keys().copied()
    }

    /// Rows modified since loading
    pub fn modified(&self) -> impl Iterator<Item = &T> {
        self.rows
            .values()
            .filter(|(_, modified)| *modified)
            .map(|(row, _)| row)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
