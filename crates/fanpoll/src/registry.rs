//! Point registry
//!
//! Points are rebuilt every iteration from the point-list files named in the
//! batch. Each list file carries one credential pair shared by every point it
//! names. On a fresh batch one log row is created per (request, point) pair;
//! on a resumed batch the existing pending rows are re-attached and rows
//! whose point has disappeared are failed.

use fanpoll_rdbc::security::Credentials;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::batch::{Batch, LogColumns};
use crate::error::{PollError, Result};
use crate::model::{now, LogRow, LogRowId, RequestId};
use crate::store::ControlStore;

/// Error recorded on log rows whose point is no longer listed
pub const POINT_MISSING: &str = "point missing from registry";

/// One record of a point-list file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRecord {
    pub name: String,
    pub address: String,
}

/// Parse point-list text: one tab-separated record per line
///
/// Fields past the address are ignored. Blank lines are skipped, as are
/// records with fewer than two fields (with a warning).
pub fn parse_point_list(content: &str, source: &str) -> Vec<PointRecord> {
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        match (fields.next(), fields.next()) {
            (Some(name), Some(address)) if !name.trim().is_empty() => {
                records.push(PointRecord {
                    name: name.trim().to_string(),
                    address: address.trim().to_string(),
                });
            }
            _ => warn!(list = source, line = index + 1, "skipping malformed point record"),
        }
    }
    records
}

/// Read and parse a point-list file
pub async fn read_point_list(path: &str) -> Result<Vec<PointRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PollError::PointList {
            path: path.to_string(),
            source,
        })?;
    Ok(parse_point_list(&content, path))
}

/// Work waiting at a point for one request
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub log_row_id: LogRowId,
    pub request: RequestId,
    pub started_at: Option<chrono::NaiveDateTime>,
    pub finished_at: Option<chrono::NaiveDateTime>,
    pub error: Option<String>,
}

impl LogEntry {
    /// Fail without running: start and finish are both now
    pub fn fail(&mut self, error: impl Into<String>) {
        let at = now();
        self.started_at = Some(at);
        self.finished_at = Some(at);
        self.error = Some(error.into());
    }
}

impl From<&LogRow> for LogEntry {
    fn from(row: &LogRow) -> Self {
        Self {
            log_row_id: row.id,
            request: row.request,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error.clone(),
        }
    }
}

/// A remote endpoint and the work pending there
#[derive(Debug, Clone)]
pub struct Point {
    pub name: String,
    pub address: String,
    /// Shared with every point from the same list file
    pub credentials: Arc<Credentials>,
    /// Pending entries keyed by request
    pub pending: BTreeMap<RequestId, LogEntry>,
}

/// Resolves the points of a batch and assigns their pending work
pub struct PointRegistry {
    store: Arc<dyn ControlStore>,
}

impl PointRegistry {
    /// Create a registry
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self { store }
    }

    /// Build the batch's points, each carrying only its pending log entries
    ///
    /// Points are returned in first-listed order. A point named in several
    /// list files takes the address and credentials of the last one.
    pub async fn resolve(&self, batch: &mut Batch) -> Result<Vec<Point>> {
        // A resumed batch only runs the points its log rows name
        let filter: Option<HashSet<String>> = if batch.log.is_empty() {
            None
        } else {
            Some(batch.log.iter().map(|row| row.point.clone()).collect())
        };

        let mut points: IndexMap<String, Point> = IndexMap::new();
        for list in &batch.point_lists {
            let records = read_point_list(&list.path).await?;
            let credentials = Arc::new(list.credentials.clone());
            debug!(list = %list.path, records = records.len(), "read point list");

            for record in records {
                if filter.as_ref().is_some_and(|f| !f.contains(&record.name)) {
                    continue;
                }
                if points.contains_key(&record.name) {
                    debug!(point = %record.name, list = %list.path, "point listed again, last listing wins");
                }
                points.insert(
                    record.name.clone(),
                    Point {
                        name: record.name,
                        address: record.address,
                        credentials: credentials.clone(),
                        pending: BTreeMap::new(),
                    },
                );
            }
        }

        match filter {
            None => self.create_log_rows(batch, &points).await?,
            Some(_) => fail_missing_points(batch, &points),
        }

        for row in batch.log.iter().filter(|row| row.is_pending()) {
            if !batch.requests.contains(row.request) {
                debug!(log_row_id = row.id, request = row.request, "log row for unknown request");
                continue;
            }
            if let Some(point) = points.get_mut(&row.point) {
                point.pending.insert(row.request, LogEntry::from(row));
            }
        }

        Ok(points.into_values().collect())
    }

    async fn create_log_rows(&self, batch: &mut Batch, points: &IndexMap<String, Point>) -> Result<()> {
        let pairs: Vec<(RequestId, String)> = batch
            .requests
            .keys()
            .flat_map(|request| points.keys().map(move |point| (request, point.clone())))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }

        let inserted = self.store.insert_log_rows(&pairs).await?;
        LogColumns::resolve(&inserted)?.parse_into(&inserted, &mut batch.log)?;
        info!(
            requests = batch.requests.len(),
            points = points.len(),
            log_rows = inserted.len(),
            "created log rows"
        );
        Ok(())
    }
}

fn fail_missing_points(batch: &mut Batch, points: &IndexMap<String, Point>) {
    let missing: Vec<LogRowId> = batch
        .log
        .iter()
        .filter(|row| row.is_pending() && !points.contains_key(&row.point))
        .map(|row| row.id)
        .collect();

    for id in missing {
        batch.log.update(id, |row| {
            let at = now();
            row.started_at = Some(at);
            row.finished_at = Some(at);
            row.error = Some(POINT_MISSING.to_string());
            warn!(log_row_id = row.id, point = %row.point, "{}", POINT_MISSING);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_list() {
        let content = "store-1\t10.0.0.1\tnorth\r\n\nstore-2\t10.0.0.2\nbroken-line\n\t10.0.0.9\n";
        let records = parse_point_list(content, "test");

        assert_eq!(
            records,
            vec![
                PointRecord {
                    name: "store-1".into(),
                    address: "10.0.0.1".into()
                },
                PointRecord {
                    name: "store-2".into(),
                    address: "10.0.0.2".into()
                },
            ]
        );
    }

    #[test]
    fn test_log_entry_fail_uses_one_timestamp() {
        let mut entry = LogEntry {
            log_row_id: 1,
            request: 1,
            started_at: None,
            finished_at: None,
            error: None,
        };
        entry.fail("unreachable");
        assert_eq!(entry.started_at, entry.finished_at);
        assert_eq!(entry.error.as_deref(), Some("unreachable"));
    }

    #[tokio::test]
    async fn test_missing_list_file_is_an_error() {
        let err = read_point_list("/nonexistent/points.txt").await.unwrap_err();
        assert!(matches!(err, PollError::PointList { .. }));
    }
}
