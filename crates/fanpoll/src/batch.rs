//! Batch loading
//!
//! The pending-work procedure returns four result sets: requests, their
//! parameters, pre-existing pending log rows and point-list descriptors.
//! Column ordinals are resolved by name the first time a set carries rows and
//! reused for the rest of the process lifetime.

use fanpoll_rdbc::security::Credentials;
use fanpoll_rdbc::{Table, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{PollError, Result};
use crate::model::{LogRow, LogRowId, ParamRow, PointList, Request, RequestId, TrackedTable};
use crate::store::ControlStore;

/// One iteration's unit of work
#[derive(Debug, Default)]
pub struct Batch {
    pub requests: TrackedTable<Request>,
    pub parameters: HashMap<RequestId, Vec<ParamRow>>,
    pub log: TrackedTable<LogRow>,
    pub point_lists: Vec<PointList>,
}

impl Batch {
    /// Parameters of a request (empty if it has none)
    pub fn parameters_of(&self, request: RequestId) -> &[ParamRow] {
        self.parameters
            .get(&request)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn text(table: &Table, row: usize, col: usize, what: &str) -> Result<String> {
    table
        .get(row, col)
        .and_then(Value::as_string)
        .ok_or_else(|| PollError::schema(format!("{} is missing in row {}", what, row)))
}

fn integer(table: &Table, row: usize, col: usize, what: &str) -> Result<i64> {
    table
        .get(row, col)
        .and_then(Value::as_i64)
        .ok_or_else(|| PollError::schema(format!("{} is not an integer in row {}", what, row)))
}

fn request_id(table: &Table, row: usize, col: usize) -> Result<RequestId> {
    let id = integer(table, row, col, "reqId")?;
    RequestId::try_from(id).map_err(|_| PollError::schema(format!("reqId {} out of range", id)))
}

fn optional_text(table: &Table, row: usize, col: Option<usize>) -> Option<String> {
    col.and_then(|c| table.get(row, c)).and_then(Value::as_string)
}

fn optional_time(table: &Table, row: usize, col: Option<usize>) -> Option<chrono::NaiveDateTime> {
    col.and_then(|c| table.get(row, c)).and_then(Value::as_datetime)
}

/// Column ordinals of the request result set
#[derive(Debug, Clone, Copy)]
struct RequestColumns {
    id: usize,
    query: usize,
    destination: usize,
}

impl RequestColumns {
    fn resolve(table: &Table) -> Result<Self> {
        Ok(Self {
            id: table.require_column("reqId")?,
            query: table.require_column("text")?,
            destination: table.require_column("dstTable")?,
        })
    }

    fn parse(&self, table: &Table) -> Result<TrackedTable<Request>> {
        let mut requests = TrackedTable::new();
        for row in 0..table.len() {
            let request = Request {
                id: request_id(table, row, self.id)?,
                query: text(table, row, self.query, "request text")?,
                destination: text(table, row, self.destination, "dstTable")?,
                started_at: None,
                finished_at: None,
                error: None,
            };
            requests
                .insert(request)
                .map_err(|id| PollError::schema(format!("duplicate reqId {}", id)))?;
        }
        Ok(requests)
    }
}

/// Column ordinals of the parameter result set
#[derive(Debug, Clone, Copy)]
struct ParamColumns {
    request: usize,
    name: usize,
    type_code: usize,
    value: usize,
}

impl ParamColumns {
    fn resolve(table: &Table) -> Result<Self> {
        Ok(Self {
            request: table.require_column("reqId")?,
            name: table.require_column("name")?,
            type_code: table.require_column("typeId")?,
            value: table.require_column("value")?,
        })
    }

    fn parse(&self, table: &Table) -> Result<HashMap<RequestId, Vec<ParamRow>>> {
        let mut params: HashMap<RequestId, Vec<ParamRow>> = HashMap::new();
        for row in 0..table.len() {
            params
                .entry(request_id(table, row, self.request)?)
                .or_default()
                .push(ParamRow {
                    name: text(table, row, self.name, "parameter name")?,
                    type_code: integer(table, row, self.type_code, "typeId")?,
                    value: table.get(row, self.value).cloned().unwrap_or(Value::Null),
                });
        }
        Ok(params)
    }
}

/// Column ordinals of a log result set
///
/// Also used for the rows returned when log rows are inserted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogColumns {
    id: usize,
    request: usize,
    point: usize,
    started_at: Option<usize>,
    finished_at: Option<usize>,
    error: Option<usize>,
}

impl LogColumns {
    pub(crate) fn resolve(table: &Table) -> Result<Self> {
        Ok(Self {
            id: table.require_column("logRowId")?,
            request: table.require_column("reqId")?,
            point: table.require_column("pointId")?,
            started_at: table.column_index("dtStart"),
            finished_at: table.column_index("dtFinish"),
            error: table.column_index("errMsg"),
        })
    }

    pub(crate) fn parse(&self, table: &Table) -> Result<Vec<LogRow>> {
        (0..table.len())
            .map(|row| {
                Ok(LogRow {
                    id: integer(table, row, self.id, "logRowId")? as LogRowId,
                    request: request_id(table, row, self.request)?,
                    point: text(table, row, self.point, "pointId")?,
                    started_at: optional_time(table, row, self.started_at),
                    finished_at: optional_time(table, row, self.finished_at),
                    error: optional_text(table, row, self.error),
                })
            })
            .collect()
    }

    pub(crate) fn parse_into(&self, table: &Table, log: &mut TrackedTable<LogRow>) -> Result<()> {
        for row in self.parse(table)? {
            log.insert(row)
                .map_err(|id| PollError::schema(format!("duplicate logRowId {}", id)))?;
        }
        Ok(())
    }
}

/// Column ordinals of the point-list descriptor result set
#[derive(Debug, Clone, Copy)]
struct ListColumns {
    path: usize,
    login: usize,
    password: usize,
}

impl ListColumns {
    fn resolve(table: &Table) -> Result<Self> {
        Ok(Self {
            path: table.require_column("path")?,
            login: table.require_column("login")?,
            password: table.require_column("password")?,
        })
    }

    fn parse(&self, table: &Table) -> Result<Vec<PointList>> {
        (0..table.len())
            .map(|row| {
                Ok(PointList {
                    path: text(table, row, self.path, "point-list path")?,
                    credentials: Credentials::new(
                        optional_text(table, row, Some(self.login)).unwrap_or_default(),
                        optional_text(table, row, Some(self.password)).unwrap_or_default(),
                    ),
                })
            })
            .collect()
    }
}

/// Column ordinals of the four result sets
///
/// Each set's ordinals are resolved the first time that set carries rows.
/// A set without rows is never parsed, so its columns are not required.
#[derive(Debug, Default)]
struct BatchLayout {
    requests: OnceLock<RequestColumns>,
    params: OnceLock<ParamColumns>,
    log: OnceLock<LogColumns>,
    lists: OnceLock<ListColumns>,
}

fn columns_of<T: Copy>(
    cell: &OnceLock<T>,
    table: &Table,
    resolve: fn(&Table) -> Result<T>,
) -> Result<Option<T>> {
    if table.is_empty() {
        return Ok(None);
    }
    if let Some(columns) = cell.get() {
        return Ok(Some(*columns));
    }
    let columns = resolve(table)?;
    debug!(columns = ?table.columns(), "resolved result set layout");
    Ok(Some(*cell.get_or_init(|| columns)))
}

/// Loads the pending batch from the control store
pub struct BatchLoader {
    store: Arc<dyn ControlStore>,
    layout: BatchLayout,
}

impl BatchLoader {
    /// Create a loader
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self {
            store,
            layout: BatchLayout::default(),
        }
    }

    /// Run the pending-work query once
    ///
    /// Returns `None` when there are no pending requests.
    pub async fn load(&self) -> Result<Option<Batch>> {
        let sets = self.store.fetch_pending().await?;
        if sets.first().map_or(true, Table::is_empty) {
            debug!("no pending requests");
            return Ok(None);
        }
        if sets.len() < 4 {
            return Err(PollError::schema(format!(
                "pending-work query returned {} result sets, expected 4",
                sets.len()
            )));
        }

        let layout = &self.layout;
        let requests = match columns_of(&layout.requests, &sets[0], RequestColumns::resolve)? {
            Some(columns) => columns.parse(&sets[0])?,
            None => TrackedTable::new(),
        };
        let parameters = match columns_of(&layout.params, &sets[1], ParamColumns::resolve)? {
            Some(columns) => columns.parse(&sets[1])?,
            None => HashMap::new(),
        };
        let mut log = TrackedTable::new();
        if let Some(columns) = columns_of(&layout.log, &sets[2], LogColumns::resolve)? {
            columns.parse_into(&sets[2], &mut log)?;
        }
        let point_lists = match columns_of(&layout.lists, &sets[3], ListColumns::resolve)? {
            Some(columns) => columns.parse(&sets[3])?,
            None => Vec::new(),
        };

        Ok(Some(Batch {
            requests,
            parameters,
            log,
            point_lists,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BatchFixture, MockControlStore};

    #[tokio::test]
    async fn test_empty_request_set_means_no_work() {
        let store = MockControlStore::new();
        let loader = BatchLoader::new(store.clone());
        assert!(loader.load().await.unwrap().is_none());

        store.push_batch(BatchFixture::new().build());
        assert!(loader.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_materializes_all_sets() {
        let store = MockControlStore::new();
        store.push_batch(
            BatchFixture::new()
                .request(1, "SELECT * FROM sales WHERE day = @day", "daily_sales")
                .request(2, "SELECT 1", "pings")
                .param(1, "day", 31, Value::from("2024-02-01"))
                .log_row(500, 2, "store-3")
                .point_list("/lists/north.txt", "poller", "pw")
                .build(),
        );
        let loader = BatchLoader::new(store.clone());

        let batch = loader.load().await.unwrap().unwrap();
        assert_eq!(batch.requests.len(), 2);
        assert_eq!(batch.requests.get(1).unwrap().destination, "daily_sales");
        assert_eq!(batch.parameters_of(1).len(), 1);
        assert_eq!(batch.parameters_of(1)[0].type_code, 31);
        assert!(batch.parameters_of(2).is_empty());
        assert_eq!(batch.log.get(500).unwrap().point, "store-3");
        assert!(batch.log.get(500).unwrap().is_pending());
        assert_eq!(batch.point_lists[0].credentials.login(), "poller");
        assert_eq!(batch.requests.modified().count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_ids_are_rejected() {
        let store = MockControlStore::new();
        store.push_batch(
            BatchFixture::new()
                .request(1, "SELECT 1", "a")
                .request(1, "SELECT 2", "b")
                .build(),
        );
        let loader = BatchLoader::new(store.clone());
        assert!(matches!(loader.load().await, Err(PollError::Schema(_))));
    }

    #[tokio::test]
    async fn test_missing_result_sets_are_rejected() {
        let store = MockControlStore::new();
        let mut sets = BatchFixture::new().request(1, "SELECT 1", "a").build();
        sets.truncate(2);
        store.push_batch(sets);

        let loader = BatchLoader::new(store.clone());
        assert!(loader.load().await.is_err());
    }

    #[tokio::test]
    async fn test_sets_without_rows_need_no_columns() {
        let store = MockControlStore::new();
        let mut sets = BatchFixture::new()
            .request(1, "SELECT 1", "pings")
            .point_list("/lists/north.txt", "poller", "pw")
            .build();
        sets[1] = Table::empty();
        sets[2] = Table::empty();
        store.push_batch(sets);
        let loader = BatchLoader::new(store.clone());

        let batch = loader.load().await.unwrap().unwrap();
        assert_eq!(batch.requests.len(), 1);
        assert!(batch.parameters.is_empty());
        assert!(batch.log.is_empty());
        assert_eq!(batch.point_lists.len(), 1);

        // the sets skipped above resolve once they carry rows
        store.push_batch(
            BatchFixture::new()
                .request(2, "SELECT * FROM t WHERE x = @x", "results")
                .param(2, "x", 8, Value::Int32(4))
                .log_row(77, 2, "store-1")
                .point_list("/lists/north.txt", "poller", "pw")
                .build(),
        );
        let batch = loader.load().await.unwrap().unwrap();
        assert_eq!(batch.parameters_of(2)[0].name, "x");
        assert_eq!(batch.log.get(77).unwrap().point, "store-1");
    }

    #[tokio::test]
    async fn test_rows_without_expected_columns_are_rejected() {
        let store = MockControlStore::new();
        let mut sets = BatchFixture::new().request(1, "SELECT 1", "a").build();
        sets[2] = Table::new(["id", "point"]).with_row(vec![Value::Int64(1), Value::from("p")]);
        store.push_batch(sets);

        let loader = BatchLoader::new(store.clone());
        let err = loader.load().await.unwrap_err();
        assert!(err.to_string().contains("logRowId"));
    }
}
