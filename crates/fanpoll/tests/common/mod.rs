//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use fanpoll::testing::{MockControlStore, MockProber};
use fanpoll::{Pipeline, PollerConfig};
use fanpoll_rdbc::testing::MockConnectionFactory;
use fanpoll_rdbc::{Table, Value};
use tempfile::TempDir;

pub const SALES: &str = "SELECT day, total FROM sales";
pub const STOCK: &str = "SELECT sku, qty FROM stock";

/// Mock control store, mock points and a directory for point-list files
pub struct Harness {
    pub store: Arc<MockControlStore>,
    pub factory: Arc<MockConnectionFactory>,
    pub prober: Arc<MockProber>,
    pub config: PollerConfig,
    dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MockControlStore::new(),
            factory: MockConnectionFactory::new(),
            prober: MockProber::new(),
            config: PollerConfig::default(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Write a point-list file and return its path
    pub fn write_list(&self, file: &str, points: &[(&str, &str)]) -> String {
        let path = self.dir.path().join(file);
        let content: String = points
            .iter()
            .map(|(name, address)| format!("{}\t{}\tignored\n", name, address))
            .collect();
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Pipeline whose point connection string is the bare address
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.store.clone(),
            self.factory.clone(),
            self.prober.clone(),
            &self.config,
            "{0}",
        )
    }

    /// Answer `pattern` at `address` with `rows` rows
    pub fn point_returns(&self, address: &str, pattern: &str, rows: i32) {
        self.factory
            .endpoint(address)
            .respond(pattern, vec![numbers(rows)]);
    }
}

/// A one-column result with values 1..=n
pub fn numbers(n: i32) -> Table {
    let mut table = Table::new(["n"]);
    for i in 1..=n {
        table.push_row(vec![Value::Int32(i)]);
    }
    table
}
